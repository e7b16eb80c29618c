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

//! The daemon's control-plane state machine.
//!
//! [`Core`] owns every manager and the current [`State`]. Events are fed
//! in through [`Core::handle`] (or the IPC entry points); each event is
//! looked up in the transition table together with the current state,
//! the state is changed, and the transition's action runs. An action may
//! return a follow-up event, which is processed before anything else.
//! Events that have no transition in the current state are ignored.
//!
//! The core is single-threaded and never blocks waiting for the outside
//! world: waiting is modelled as sitting in a `Waiting*` state until the
//! right event arrives.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::cache::{CacheControl, CacheManager};
use crate::description::ServerDescription;
use crate::exit_code::{ExitCode, ExitCodeHandler};
use crate::links::LinkInfo;
use crate::resolv_conf::ResolvConfManager;
use crate::routing::{Generations, NetworkManager, NmSignal, RoutingManager};
use crate::serial::{Serial, SerialObserver};
use crate::server_manager::{ResolvingMode, ServerManager};
use crate::settings::Settings;
use crate::systemd::{InitSystem, JobKind, SystemdManager};

mod actions;
mod status;
mod transitions;

#[cfg(test)]
mod tests;

/// How long to wait before retrying a failed reconciliation.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

////////////////////////////////////////////////////////////////////////
// STATES AND EVENTS                                                  //
////////////////////////////////////////////////////////////////////////

/// The states of the control plane.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Starting,
    ConfiguringCache,
    ConnectingBus,
    SubmittingStartJob,
    WaitingForStartJob,
    WaitingToSubmitStopJob,
    SubscribingNmConnections,
    CheckAllConnectionsUp,
    WaitAllConnectionsUp,
    GatherConnConfig,
    SubscribeIpChanges,
    CheckIpObjects,
    WaitIpObjects,
    ModifyConnections,
    RemoveRedundantRoutes,
    UpdatingResolvConf,
    UpdatingCache,
    Running,
    UnsubscribeImmediate,
    UnsubscribeNmAndWait,
    SubmittingRestartJob,
    WaitingRestartJob,
    RevertingResolvConf,
    SubmittingStopJob,
    WaitingStopJob,
    RemovingRoutes,
    Stopping,
}

impl State {
    pub fn name(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::ConfiguringCache => "configuring_cache",
            Self::ConnectingBus => "connecting_bus",
            Self::SubmittingStartJob => "submitting_start_job",
            Self::WaitingForStartJob => "waiting_for_start_job",
            Self::WaitingToSubmitStopJob => "waiting_to_submit_stop_job",
            Self::SubscribingNmConnections => "subscribing_nm_connections",
            Self::CheckAllConnectionsUp => "check_all_connections_up",
            Self::WaitAllConnectionsUp => "wait_all_connections_up",
            Self::GatherConnConfig => "gather_conn_config",
            Self::SubscribeIpChanges => "subscribe_ip_changes",
            Self::CheckIpObjects => "check_ip_objects",
            Self::WaitIpObjects => "wait_ip_objects",
            Self::ModifyConnections => "modify_connections",
            Self::RemoveRedundantRoutes => "remove_redundant_routes",
            Self::UpdatingResolvConf => "updating_resolv_conf",
            Self::UpdatingCache => "updating_cache",
            Self::Running => "running",
            Self::UnsubscribeImmediate => "unsubscribe_immediate",
            Self::UnsubscribeNmAndWait => "unsubscribe_nm_and_wait",
            Self::SubmittingRestartJob => "submitting_restart_job",
            Self::WaitingRestartJob => "waiting_restart_job",
            Self::RevertingResolvConf => "reverting_resolv_conf",
            Self::SubmittingStopJob => "submitting_stop_job",
            Self::WaitingStopJob => "waiting_stop_job",
            Self::RemovingRoutes => "removing_routes",
            Self::Stopping => "stopping",
        }
    }

    /// Returns whether the daemon is on its way out, in which case new
    /// configuration is refused.
    pub fn is_shutting_down(self) -> bool {
        matches!(
            self,
            Self::WaitingToSubmitStopJob
                | Self::RevertingResolvConf
                | Self::SubmittingStopJob
                | Self::WaitingStopJob
                | Self::RemovingRoutes
                | Self::Stopping
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The events the state machine reacts to.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Kickoff,
    Stop,
    Reload,
    Update {
        servers: Vec<ServerDescription>,
        mode: ResolvingMode,
    },
    InterfaceUp,
    InterfaceDown,
    IpReady,
    IpNotReady,
    DhcpChange,
    TimerUp,
    /// A raw init-system job notification; translated into
    /// [`JobDone`](Event::JobDone) and [`JobFailed`](Event::JobFailed)
    /// before the transition table is consulted.
    JobRemoved {
        id: u32,
        unit: String,
        result: String,
    },
    JobDone(JobKind),
    JobFailed(JobKind),
    Success,
    Fail,
    NoChange,
    Change,
    SkipRouting,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Kickoff => "kickoff",
            Self::Stop => "stop",
            Self::Reload => "reload",
            Self::Update { .. } => "update",
            Self::InterfaceUp => "interface_up",
            Self::InterfaceDown => "interface_down",
            Self::IpReady => "ip_ready",
            Self::IpNotReady => "ip_not_ready",
            Self::DhcpChange => "dhcp_change",
            Self::TimerUp => "timer_up",
            Self::JobRemoved { .. } => "job_removed",
            Self::JobDone(JobKind::Start) => "start_job_done",
            Self::JobDone(JobKind::Restart) => "restart_job_done",
            Self::JobDone(JobKind::Stop) => "stop_job_done",
            Self::JobFailed(JobKind::Start) => "start_job_failed",
            Self::JobFailed(JobKind::Restart) => "restart_job_failed",
            Self::JobFailed(JobKind::Stop) => "stop_job_failed",
            Self::Success => "success",
            Self::Fail => "fail",
            Self::NoChange => "no_change",
            Self::Change => "change",
            Self::SkipRouting => "skip_routing",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A transition's action. It runs after the state has been changed and
/// may return a follow-up event.
pub(crate) type Action = fn(&mut Core, Event) -> Option<Event>;

////////////////////////////////////////////////////////////////////////
// THE CORE                                                           //
////////////////////////////////////////////////////////////////////////

/// The bus-facing collaborators of the core.
pub struct Collaborators {
    pub cache: Box<dyn CacheControl>,
    pub init: Box<dyn InitSystem>,
    pub network_manager: Box<dyn NetworkManager>,
    pub links: Box<dyn LinkInfo>,
    pub observer: Box<dyn SerialObserver>,
}

/// The state machine together with everything it drives.
pub struct Core {
    state: State,
    handle_routing: bool,
    servers: ServerManager,
    cache: CacheManager,
    resolv_conf: ResolvConfManager,
    systemd: SystemdManager,
    routing: RoutingManager,
    observer: Box<dyn SerialObserver>,
    exit_code: ExitCodeHandler,
    pending_routing_failure: Option<ExitCode>,
    published_serial: Serial,
    timer: Option<Instant>,
    queue: VecDeque<Event>,
    finished: bool,
}

impl Core {
    pub fn new(settings: &Settings, collaborators: Collaborators) -> Self {
        let Collaborators {
            cache,
            init,
            network_manager,
            links,
            observer,
        } = collaborators;
        Self {
            state: State::Starting,
            handle_routing: settings.handle_routing,
            servers: ServerManager::new(settings.static_servers.clone()),
            cache: CacheManager::new(
                cache,
                settings.listen_address,
                settings.dnssec_enabled,
                settings.certification_authority.clone(),
            ),
            resolv_conf: ResolvConfManager::new(
                settings.resolv_conf_path.clone(),
                settings.listen_address,
                settings.resolver_options.clone(),
            ),
            systemd: SystemdManager::new(init, settings.cache_unit.clone()),
            routing: RoutingManager::new(network_manager, links, settings.prioritize_wire),
            observer,
            exit_code: ExitCodeHandler::new(),
            pending_routing_failure: None,
            published_serial: Serial::INITIAL,
            timer: None,
            queue: VecDeque::new(),
            finished: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Returns whether the state machine has reached its end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The exit code to report once finished.
    pub fn exit_code(&self) -> ExitCode {
        self.exit_code.get()
    }

    /// The generations that bus signals must be tagged with.
    pub fn generations(&self) -> std::sync::Arc<Generations> {
        self.routing.generations()
    }

    /// Returns when [`Event::TimerUp`] is due, if the timer is armed.
    pub fn timer_deadline(&self) -> Option<Instant> {
        self.timer
    }

    /// Fires the timer if it is armed.
    pub fn fire_timer(&mut self) {
        if self.timer.take().is_some() {
            self.handle(Event::TimerUp);
        }
    }

    /// Processes `event` and every event that follows from it.
    pub fn handle(&mut self, event: Event) {
        self.queue.push_back(event);
        while let Some(event) = self.queue.pop_front() {
            if let Event::JobRemoved { id, unit, result } = event {
                self.queue
                    .extend(self.systemd.job_removed(id, &unit, &result));
                continue;
            }

            let (next, action) = match transitions::lookup(self.state, &event) {
                Some(transition) => transition,
                None => {
                    debug!("Ignoring {} in state {}.", event, self.state);
                    continue;
                }
            };
            debug!("{} + {} -> {}.", self.state, event, next);
            self.state = next;
            if let Some(follow_up) = action(self, event) {
                self.queue.push_front(follow_up);
            }
        }
    }

    /// Delivers a network manager signal received with `generation`.
    pub fn handle_signal(&mut self, signal: NmSignal, generation: u32) {
        if let Some(event) = self.routing.translate(signal, generation) {
            self.handle(event);
        }
    }

    /// Accepts new dynamic servers. Returns the serial assigned to them,
    /// or 0 with a reason if they were refused.
    pub fn update(&mut self, servers: Vec<ServerDescription>, mode: ResolvingMode) -> (u32, String) {
        if self.state.is_shutting_down() {
            return (0, "the daemon is shutting down".to_owned());
        }
        let serial = self.cache.bump_requested_serial();
        info!(
            "Accepted {} servers in mode {} as configuration serial {}.",
            servers.len(),
            mode,
            serial
        );
        self.handle(Event::Update { servers, mode });
        (serial.get(), "configuration accepted".to_owned())
    }

    /// Restarts the cache service. Only possible while running.
    pub fn reload(&mut self) -> (bool, String) {
        if self.state != State::Running {
            return (
                false,
                format!("cannot reload in state {}, only while running", self.state),
            );
        }
        self.handle(Event::Reload);
        (true, "reload submitted".to_owned())
    }

    /// Tells the observer about the committed serial if it changed since
    /// the last call. Called once per batch of events, after any reply
    /// to the caller that caused them.
    pub fn publish_serial(&mut self) {
        let committed = self.cache.committed_serial();
        if committed != self.published_serial {
            self.published_serial = committed;
            self.observer.serial_changed(committed);
        }
    }

    /// The serial of the configuration the cache currently serves.
    pub fn committed_serial(&self) -> Serial {
        self.cache.committed_serial()
    }
}

impl fmt::Debug for Core {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Core")
            .field("state", &self.state)
            .field("cache", &self.cache)
            .field("systemd", &self.systemd)
            .field("routing", &self.routing)
            .finish()
    }
}
