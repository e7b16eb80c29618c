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

//! The unbound flavour of the cache: its control tool and configuration
//! file.

use std::fmt::Write;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::trace;

use super::{CacheControl, CacheError};

/// Renders the cache's configuration file.
pub fn configuration(listen_address: IpAddr, dnssec_enabled: bool, ca: Option<&Path>) -> String {
    let mut text = String::new();
    let module_config = if dnssec_enabled {
        "validator iterator"
    } else {
        "iterator"
    };
    // Writing to a String cannot fail.
    let _ = writeln!(text, "server:");
    let _ = writeln!(text, "    interface: {}", listen_address);
    let _ = writeln!(text, "    do-not-query-localhost: no");
    let _ = writeln!(text, "    module-config: \"{}\"", module_config);
    if let Some(ca) = ca {
        let _ = writeln!(text, "    tls-cert-bundle: \"{}\"", ca.display());
    }
    let _ = writeln!(text, "remote-control:");
    let _ = writeln!(text, "    control-enable: yes");
    text
}

/// [`CacheControl`] running `unbound-control` as a subprocess.
#[derive(Debug)]
pub struct UnboundControl {
    program: PathBuf,
    config_path: PathBuf,
}

impl UnboundControl {
    pub fn new(program: PathBuf, config_path: PathBuf) -> Self {
        Self {
            program,
            config_path,
        }
    }
}

impl CacheControl for UnboundControl {
    fn run(&mut self, args: &[String]) -> Result<(), CacheError> {
        let program = self.program.display().to_string();
        trace!("Running {} {}.", program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|source| CacheError::Spawn {
                program: program.clone(),
                source,
            })?;
        if output.status.success() {
            Ok(())
        } else {
            let mut text = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            if text.is_empty() {
                text = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            }
            Err(CacheError::Command {
                program,
                command: args.join(" "),
                status: output.status.to_string(),
                output: text,
            })
        }
    }

    fn write_configuration(&mut self, contents: &str) -> Result<(), CacheError> {
        let write_error = |source| CacheError::Write {
            path: self.config_path.clone(),
            source,
        };
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(&self.config_path, contents).map_err(write_error)
    }
}
