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

//! Implements the `run` command (i.e., running the daemon).

use std::fmt::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use log::{error, info, warn, LevelFilter};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use dnsconfd::bus::network_manager::ZbusNetworkManager;
use dnsconfd::bus::systemd::ZbusInitSystem;
use dnsconfd::bus::{self, signals};
use dnsconfd::cache::unbound::UnboundControl;
use dnsconfd::daemon::{EventLoop, Input};
use dnsconfd::exit_code::ExitCode;
use dnsconfd::fsm::{Collaborators, Core, Event};
use dnsconfd::ipc::IpcHandler;
use dnsconfd::links::SystemLinks;
use dnsconfd::thread::{ThreadGroup, RESPAWN_DELAY};

use crate::config;
use crate::logging;

/// A failure before the event loop starts, with the exit code it
/// should end the process with.
struct Failure {
    code: ExitCode,
    error: anyhow::Error,
}

trait OrExit<T> {
    fn or_exit(self, code: ExitCode, context: &'static str) -> Result<T, Failure>;
}

impl<T, E> OrExit<T> for Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn or_exit(self, code: ExitCode, context: &'static str) -> Result<T, Failure> {
        self.map_err(|e| Failure {
            code,
            error: e.into().context(context),
        })
    }
}

/// Runs the daemon and returns the exit code to end the process with.
pub fn run(config_path: &Path, log_level: Option<LevelFilter>) -> ExitCode {
    let config = config::load_from_path(config_path);
    let default_level = log_level
        .or_else(|| config.as_ref().ok().map(|c| c.log_level.0))
        .unwrap_or(LevelFilter::Info);
    logging::init(default_level);

    let result = config
        .or_exit(ExitCode::ConfigFailure, "failed to load the configuration")
        .and_then(try_running);
    match result {
        Ok(code) => {
            if code == ExitCode::Graceful {
                info!("Exiting with success.");
            } else {
                error!("Exiting with {}.", code);
            }
            code
        }
        Err(failure) => {
            let mut message = String::from("Failed to run:");
            for (i, cause) in failure.error.chain().enumerate() {
                let _ = write!(message, "\n[{}] {}", i + 1, cause);
            }
            let _ = write!(message, "\nExiting with {}.", failure.code);
            error!("{}", message);
            failure.code
        }
    }
}

fn try_running(config: config::Config) -> Result<ExitCode, Failure> {
    info!(
        "dnsconfd v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    let settings = config
        .into_settings(&SystemLinks)
        .or_exit(ExitCode::ConfigFailure, "invalid configuration")?;

    // One connection serves our interfaces; the other carries our own
    // calls and the signals we listen to.
    let client = bus::system_bus().or_exit(ExitCode::DbusFailure, "failed to connect")?;
    let server = bus::system_bus().or_exit(ExitCode::DbusFailure, "failed to connect")?;

    let (inputs, receiver) = mpsc::channel();
    let observer = bus::serve(&server, &settings, &inputs)
        .or_exit(ExitCode::DbusFailure, "failed to serve the interfaces")?;
    let init = ZbusInitSystem::new(&client)
        .or_exit(ExitCode::DbusFailure, "failed to reach the init system")?;

    let core = Core::new(
        &settings,
        Collaborators {
            cache: Box::new(UnboundControl::new(
                settings.cache_control.clone(),
                settings.cache_config_path.clone(),
            )),
            init: Box::new(init),
            network_manager: Box::new(ZbusNetworkManager::new(client.clone())),
            links: Box::new(SystemLinks),
            observer: Box::new(observer),
        },
    );
    let ipc = IpcHandler::new(
        Box::new(SystemLinks),
        settings.prioritize_wire,
        settings.ignore_api,
    );

    let group = ThreadGroup::new();
    signals::start_listeners(&group, &client, &inputs, &core.generations())
        .or_exit(ExitCode::DbusFailure, "failed to start the signal listeners")?;
    let signals = set_up_signal_handling()
        .or_exit(ExitCode::ServiceFailure, "failed to set up signal handling")?;
    forward_signals(signals, inputs)
        .or_exit(ExitCode::ServiceFailure, "failed to start the signal thread")?;

    info!("Set-up is complete; starting the event loop.");
    let code = EventLoop::new(core, ipc, receiver).run();

    group.shut_down();
    if !group.await_shutdown(RESPAWN_DELAY) {
        warn!("Listener threads are still running at exit.");
    }
    Ok(code)
}

fn set_up_signal_handling() -> Result<Signals> {
    let all_signals = &[SIGHUP, SIGINT, SIGTERM];
    let term_signals = &[SIGINT, SIGTERM];
    let already_terminating = Arc::new(AtomicBool::new(false));

    // A second termination signal during a graceful shutdown exits
    // immediately.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, already_terminating.clone())?;
        signal_hook::flag::register(*sig, already_terminating.clone())?;
    }

    Signals::new(all_signals).map_err(Into::into)
}

/// Turns process signals into events on their own thread.
fn forward_signals(mut signals: Signals, inputs: Sender<Input>) -> Result<()> {
    thread::Builder::new()
        .name("signal handler".to_owned())
        .spawn(move || {
            for signal in signals.forever() {
                let event = match signal {
                    SIGINT => {
                        info!("Received SIGINT; shutting down.");
                        Event::Stop
                    }
                    SIGTERM => {
                        info!("Received SIGTERM; shutting down.");
                        Event::Stop
                    }
                    SIGHUP => {
                        info!("Received SIGHUP; reloading the cache service.");
                        Event::Reload
                    }
                    _ => continue,
                };
                if inputs.send(Input::Event(event)).is_err() {
                    return;
                }
            }
        })
        .context("failed to spawn a thread")?;
    Ok(())
}
