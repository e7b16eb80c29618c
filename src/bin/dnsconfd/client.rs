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

//! Implements the client commands, which talk to a running daemon.

use std::fmt::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{error, LevelFilter};
use zbus::blocking::Connection;

use dnsconfd::bus::proxies::DnsconfdProxyBlocking;
use dnsconfd::bus::{self, values};
use dnsconfd::exit_code::ExitCode;
use dnsconfd::ipc::native::ServerRecord;

use crate::config;
use crate::logging;

/// A client command.
pub enum Request {
    Status { json: bool },
    Reload,
    Update { servers: Vec<ServerRecord>, mode: u32 },
}

/// Sends `request` to the daemon named in the configuration and prints
/// the reply. Returns the exit code to end the process with.
pub fn run(config_path: &Path, log_level: Option<LevelFilter>, request: Request) -> ExitCode {
    logging::init(log_level.unwrap_or(LevelFilter::Warn));

    let bus_name = match config::load_from_path(config_path) {
        Ok(config) => config.bus_name,
        Err(e) => return fail(ExitCode::ConfigFailure, e),
    };
    let proxy = match connect(&bus_name) {
        Ok(proxy) => proxy,
        Err(e) => return fail(ExitCode::DbusFailure, e),
    };

    match request {
        Request::Status { json } => match proxy.status(json) {
            Ok(status) => {
                println!("{}", status);
                ExitCode::Graceful
            }
            Err(e) => fail(ExitCode::DbusFailure, e.into()),
        },
        Request::Reload => match proxy.reload() {
            Ok((true, message)) => {
                println!("{}", message);
                ExitCode::Graceful
            }
            Ok((false, message)) => {
                eprintln!("Reload failed: {}", message);
                ExitCode::ServiceFailure
            }
            Err(e) => fail(ExitCode::DbusFailure, e.into()),
        },
        Request::Update { servers, mode } => {
            let dicts = match servers
                .iter()
                .map(values::record_dict)
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(dicts) => dicts,
                Err(e) => return fail(ExitCode::BadArguments, e.into()),
            };
            match proxy.update(dicts, mode) {
                Ok((0, message)) => {
                    eprintln!("Update rejected: {}", message);
                    ExitCode::BadArguments
                }
                Ok((serial, message)) => {
                    println!("{} (configuration serial {})", message, serial);
                    ExitCode::Graceful
                }
                Err(e) => fail(ExitCode::DbusFailure, e.into()),
            }
        }
    }
}

fn connect(bus_name: &str) -> Result<DnsconfdProxyBlocking<'static>> {
    let connection: Connection = bus::system_bus()?;
    DnsconfdProxyBlocking::builder(&connection)
        .destination(bus_name.to_owned())
        .and_then(|b| b.build())
        .context("failed to reach the daemon")
}

fn fail(code: ExitCode, e: anyhow::Error) -> ExitCode {
    let mut message = String::from("Request failed:");
    for (i, cause) in e.chain().enumerate() {
        let _ = write!(message, "\n[{}] {}", i + 1, cause);
    }
    error!("{}", message);
    code
}
