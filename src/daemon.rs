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

//! The daemon's event loop.
//!
//! Everything that can change the daemon's state arrives as an [`Input`]
//! over one channel and is processed on the loop's thread, one at a
//! time. Bus method handlers await a one-shot reply channel carried in
//! their [`Call`].

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use log::{debug, info, warn};
use tokio::sync::oneshot::Sender;

use crate::exit_code::ExitCode;
use crate::fsm::{Core, Event};
use crate::ipc::compat::LinkCall;
use crate::ipc::native::ServerRecord;
use crate::ipc::{ConfigError, IpcHandler};
use crate::routing::NmSignal;

/// One unit of work for the event loop.
#[derive(Debug)]
pub enum Input {
    /// An event for the state machine, from a signal handler or the init
    /// system.
    Event(Event),
    /// A network manager signal with the generation it was received in.
    Signal(NmSignal, u32),
    /// An IPC method call awaiting its reply.
    Call(Call),
}

/// An IPC method call. Each variant carries the channel its reply is
/// sent on.
#[derive(Debug)]
pub enum Call {
    Update {
        records: Vec<ServerRecord>,
        mode: u32,
        reply: Sender<(u32, String)>,
    },
    Status {
        json: bool,
        reply: Sender<String>,
    },
    Reload {
        reply: Sender<(bool, String)>,
    },
    Link {
        call: LinkCall,
        reply: Sender<Result<(), ConfigError>>,
    },
}

/// Runs the core until it finishes.
pub struct EventLoop {
    core: Core,
    ipc: IpcHandler,
    inputs: Receiver<Input>,
}

impl EventLoop {
    pub fn new(core: Core, ipc: IpcHandler, inputs: Receiver<Input>) -> Self {
        Self { core, ipc, inputs }
    }

    /// Starts the daemon and processes inputs until the state machine
    /// reaches its end. Returns the exit code to report.
    pub fn run(mut self) -> ExitCode {
        info!("Starting up.");
        self.core.handle(Event::Kickoff);
        self.core.publish_serial();

        while !self.core.is_finished() {
            let received = match self.core.timer_deadline() {
                Some(deadline) => self
                    .inputs
                    .recv_timeout(deadline.saturating_duration_since(Instant::now())),
                None => self
                    .inputs
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(input) => self.dispatch(input),
                Err(RecvTimeoutError::Timeout) => {
                    debug!("Timer is up.");
                    self.core.fire_timer();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("Every input source is gone, giving up.");
                    return ExitCode::DbusFailure;
                }
            }
            self.core.publish_serial();
        }

        let code = self.core.exit_code();
        info!("Exiting with {}.", code);
        code
    }

    fn dispatch(&mut self, input: Input) {
        match input {
            Input::Event(event) => self.core.handle(event),
            Input::Signal(signal, generation) => self.core.handle_signal(signal, generation),
            Input::Call(call) => self.answer(call),
        }
    }

    /// Handles a method call and sends its reply. A caller that stopped
    /// waiting is not an error.
    fn answer(&mut self, call: Call) {
        match call {
            Call::Update {
                records,
                mode,
                reply,
            } => {
                let _ = reply.send(self.ipc.update(&mut self.core, records, mode));
            }
            Call::Status { json, reply } => {
                let _ = reply.send(self.ipc.status(&self.core, json));
            }
            Call::Reload { reply } => {
                let _ = reply.send(self.ipc.reload(&mut self.core));
            }
            Call::Link { call, reply } => {
                let _ = reply.send(self.ipc.link(&mut self.core, call));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::mpsc;

    use tokio::sync::oneshot;

    use super::*;
    use crate::fsm::Collaborators;
    use crate::settings::Settings;
    use crate::testing::{MockCache, MockInit, MockLinks, MockNetworkManager, MockObserver};

    fn job_removed(id: u32) -> Input {
        Input::Event(Event::JobRemoved {
            id,
            unit: "unbound.service".to_owned(),
            result: "done".to_owned(),
        })
    }

    #[test]
    fn queued_inputs_run_the_daemon_to_a_graceful_exit() {
        let dir = tempfile::tempdir().unwrap();
        let resolv_conf = dir.path().join("resolv.conf");
        fs::write(&resolv_conf, "nameserver 192.0.2.1\n").unwrap();
        let settings = Settings {
            resolv_conf_path: resolv_conf.clone(),
            ..Settings::default()
        };
        let cache = MockCache::default();
        let observer = MockObserver::default();
        let core = Core::new(
            &settings,
            Collaborators {
                cache: Box::new(cache.clone()),
                init: Box::new(MockInit::default()),
                network_manager: Box::new(MockNetworkManager::standard()),
                links: Box::new(MockLinks::standard()),
                observer: Box::new(observer.clone()),
            },
        );
        let ipc = IpcHandler::new(Box::new(MockLinks::standard()), true, false);

        let (inputs, receiver) = mpsc::channel();
        let (reply, replies) = oneshot::channel();
        inputs
            .send(Input::Call(Call::Update {
                records: vec![ServerRecord::with_address("192.0.2.53")],
                mode: 0,
                reply,
            }))
            .unwrap();
        inputs.send(job_removed(100)).unwrap();
        inputs.send(Input::Event(Event::Stop)).unwrap();
        inputs.send(job_removed(101)).unwrap();

        let code = EventLoop::new(core, ipc, receiver).run();
        assert_eq!(code, ExitCode::Graceful);
        assert_eq!(replies.blocking_recv().unwrap().0, 2);
        assert_eq!(observer.published(), vec![2]);
        assert!(cache
            .commands()
            .contains(&"forward_add . 192.0.2.53".to_owned()));
        assert_eq!(
            fs::read_to_string(&resolv_conf).unwrap(),
            "nameserver 192.0.2.1\n"
        );
    }

    #[test]
    fn a_vanished_channel_is_a_bus_failure() {
        let dir = tempfile::tempdir().unwrap();
        let resolv_conf = dir.path().join("resolv.conf");
        fs::write(&resolv_conf, "").unwrap();
        let settings = Settings {
            resolv_conf_path: resolv_conf,
            ..Settings::default()
        };
        let core = Core::new(
            &settings,
            Collaborators {
                cache: Box::new(MockCache::default()),
                init: Box::new(MockInit::default()),
                network_manager: Box::new(MockNetworkManager::standard()),
                links: Box::new(MockLinks::standard()),
                observer: Box::new(MockObserver::default()),
            },
        );
        let ipc = IpcHandler::new(Box::new(MockLinks::standard()), true, false);
        let (inputs, receiver) = mpsc::channel::<Input>();
        drop(inputs);
        assert_eq!(
            EventLoop::new(core, ipc, receiver).run(),
            ExitCode::DbusFailure
        );
    }
}
