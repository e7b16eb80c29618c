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

//! The dnsconfd daemon and its client commands.

use std::process;

mod args;
mod client;
mod config;
mod logging;
mod run;

use args::Command;
use client::Request;

fn main() {
    let args = args::parse();
    let code = match args.command {
        Command::Run => run::run(&args.config, args.log_level),
        Command::Status(status) => client::run(
            &args.config,
            args.log_level,
            Request::Status { json: status.json },
        ),
        Command::Reload => client::run(&args.config, args.log_level, Request::Reload),
        Command::Update(update) => client::run(
            &args.config,
            args.log_level,
            Request::Update {
                servers: update.json.0,
                mode: update.mode,
            },
        ),
    };
    process::exit(code.code());
}
