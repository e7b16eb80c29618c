// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements command-line argument parsing.

use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use dnsconfd::exit_code::ExitCode;
use dnsconfd::ipc::native::ServerRecord;

use crate::config::DEFAULT_CONFIG_PATH;

/// Parses the command line arguments. Invalid arguments end the process
/// with [`ExitCode::BadArguments`].
pub fn parse() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            if e.use_stderr() {
                process::exit(ExitCode::BadArguments.code());
            }
            process::exit(ExitCode::Graceful.code());
        }
    }
}

/// The dnsconfd DNS configuration daemon
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Set the configuration file to use
    #[clap(long, global = true, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Override the configured log level
    #[clap(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LevelFilter>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon
    Run,

    /// Print the status of a running daemon
    Status(StatusArgs),

    /// Restart the cache service of a running daemon
    Reload,

    /// Replace the servers of a running daemon
    Update(UpdateArgs),
}

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Print the status as JSON
    #[clap(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct UpdateArgs {
    /// The servers, as a JSON list of objects with the keys of the
    /// native update call
    #[clap(long, value_name = "SERVERS")]
    pub json: ServerList,

    /// The resolving mode: 0 (free), 1 (restrict global) or 2 (full
    /// restrictive)
    #[clap(long, default_value_t = 0, value_name = "N")]
    pub mode: u32,
}

/// A list of servers given as JSON on the command line.
#[derive(Clone, Debug)]
pub struct ServerList(pub Vec<ServerRecord>);

impl FromStr for ServerList {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_lists_parse_from_json() {
        let list: ServerList =
            r#"[{"address": "192.0.2.53", "routing_domains": ["corp.example"]}]"#
                .parse()
                .unwrap();
        assert_eq!(list.0.len(), 1);
        assert_eq!(list.0[0].address.as_deref(), Some("192.0.2.53"));
        assert!("[{\"colour\": \"blue\"}]".parse::<ServerList>().is_err());
    }

    #[test]
    fn update_takes_a_mode() {
        let args = Args::try_parse_from([
            "dnsconfd",
            "update",
            "--json",
            "[]",
            "--mode",
            "2",
        ])
        .unwrap();
        match args.command {
            Command::Update(update) => {
                assert_eq!(update.mode, 2);
                assert!(update.json.0.is_empty());
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }
}
