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

//! Transition actions.
//!
//! Each action does the work of the state just entered and returns the
//! event describing the outcome, or [`None`] to wait for the outside
//! world. Failures are logged here, recorded as exit codes, and turned
//! into [`Event::Fail`]; nothing is propagated.

use std::error::Error;
use std::time::Instant;

use log::{debug, error, info, warn};

use super::{Core, Event, RETRY_INTERVAL};
use crate::cache::UpdateOutcome;
use crate::exit_code::ExitCode;
use crate::routing::RoutingError;
use crate::systemd::JobKind;
use crate::util::describe_error_chain;

////////////////////////////////////////////////////////////////////////
// HELPERS                                                            //
////////////////////////////////////////////////////////////////////////

fn fail(core: &mut Core, code: ExitCode, error: &dyn Error) -> Option<Event> {
    error!("{}", describe_error_chain(error));
    core.exit_code.set(code);
    Some(Event::Fail)
}

/// Routing failures are retried, so their exit code is only kept as
/// pending until reconciliation succeeds or the daemon exits.
fn routing_fail(core: &mut Core, error: RoutingError) -> Option<Event> {
    warn!("{}", describe_error_chain(&error));
    core.pending_routing_failure = Some(error.exit_code());
    Some(Event::Fail)
}

fn outcome(success: bool) -> Option<Event> {
    Some(if success {
        Event::Success
    } else {
        Event::NoChange
    })
}

impl Core {
    fn store_update(&mut self, event: Event) {
        if let Event::Update { servers, mode } = event {
            debug!("Storing {} dynamic servers in mode {}.", servers.len(), mode);
            self.servers.set_dynamic_servers(servers, mode);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// STARTUP                                                            //
////////////////////////////////////////////////////////////////////////

pub(super) fn nothing(_core: &mut Core, _event: Event) -> Option<Event> {
    None
}

pub(super) fn store_update(core: &mut Core, event: Event) -> Option<Event> {
    core.store_update(event);
    None
}

pub(super) fn configure_cache(core: &mut Core, _event: Event) -> Option<Event> {
    match core.cache.write_configuration() {
        Ok(()) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::ServiceFailure, &e),
    }
}

pub(super) fn connect_bus(_core: &mut Core, _event: Event) -> Option<Event> {
    debug!("Bus connections are established.");
    Some(Event::Success)
}

pub(super) fn submit_start_job(core: &mut Core, _event: Event) -> Option<Event> {
    match core.systemd.change_unit_state(JobKind::Start) {
        Ok(_) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::DbusFailure, &e),
    }
}

pub(super) fn start_job_done(core: &mut Core, event: Event) -> Option<Event> {
    info!("The cache service {} has started.", core.systemd.unit());
    if let Err(e) = core.cache.probe() {
        warn!("The cache does not answer its control tool yet: {}.", e);
    }
    subscribe_nm_connections(core, event)
}

pub(super) fn job_failed_exit(core: &mut Core, event: Event) -> Option<Event> {
    error!("The cache service {} could not be started.", core.systemd.unit());
    core.exit_code.set(ExitCode::ServiceFailure);
    exit(core, event)
}

pub(super) fn exit(core: &mut Core, _event: Event) -> Option<Event> {
    if let Some(code) = core.pending_routing_failure.take() {
        core.exit_code.set(code);
    }
    core.timer = None;
    core.finished = true;
    info!("Stopping with exit code {}.", core.exit_code.get());
    None
}

////////////////////////////////////////////////////////////////////////
// RECONCILIATION                                                     //
////////////////////////////////////////////////////////////////////////

pub(super) fn subscribe_nm_connections(core: &mut Core, _event: Event) -> Option<Event> {
    core.timer = None;
    if !core.handle_routing {
        return Some(Event::SkipRouting);
    }
    let used = core.servers.get_used_servers();
    match core.routing.subscribe_devices(&used) {
        Ok(()) => Some(Event::Success),
        Err(e) => routing_fail(core, e),
    }
}

pub(super) fn check_all_up(core: &mut Core, _event: Event) -> Option<Event> {
    let up = core.routing.all_devices_up();
    if !up {
        debug!("Waiting for interfaces to be activated.");
    }
    outcome(up)
}

pub(super) fn gather_connections(core: &mut Core, _event: Event) -> Option<Event> {
    match core.routing.gather_connections() {
        Ok(()) => Some(Event::Success),
        Err(e) => routing_fail(core, e),
    }
}

pub(super) fn subscribe_ip_changes(core: &mut Core, _event: Event) -> Option<Event> {
    match core.routing.subscribe_ip_configs() {
        Ok(()) => Some(Event::Success),
        Err(e) => routing_fail(core, e),
    }
}

pub(super) fn check_ip_objects(core: &mut Core, _event: Event) -> Option<Event> {
    match core.routing.check_ip_objects() {
        Ok(ready) => {
            if !ready {
                debug!("Waiting for IP configurations to show the managed routes.");
            }
            outcome(ready)
        }
        Err(e) => routing_fail(core, e),
    }
}

pub(super) fn modify_connections(core: &mut Core, _event: Event) -> Option<Event> {
    match core.routing.modify_connections() {
        Ok(true) => Some(Event::Change),
        Ok(false) => Some(Event::NoChange),
        Err(e) => routing_fail(core, e),
    }
}

pub(super) fn remove_redundant_routes(core: &mut Core, _event: Event) -> Option<Event> {
    core.routing.remove_redundant_routes();
    Some(Event::Success)
}

pub(super) fn unsubscribe_and_wait(core: &mut Core, _event: Event) -> Option<Event> {
    core.routing.unsubscribe();
    core.timer = Some(Instant::now() + RETRY_INTERVAL);
    info!(
        "Retrying routing in {} s.",
        RETRY_INTERVAL.as_secs_f32()
    );
    None
}

pub(super) fn unsubscribe_immediate(core: &mut Core, event: Event) -> Option<Event> {
    core.store_update(event);
    core.timer = None;
    core.routing.unsubscribe();
    Some(Event::Success)
}

pub(super) fn update_resolv_conf(core: &mut Core, _event: Event) -> Option<Event> {
    let used = core.servers.get_used_servers();
    let (_, search_domains) = core.servers.get_zones_to_servers(&used);
    match core.resolv_conf.update(&search_domains) {
        Ok(()) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::ResolvConfFailure, &e),
    }
}

pub(super) fn update_cache(core: &mut Core, _event: Event) -> Option<Event> {
    let used = core.servers.get_used_servers();
    let (zones, _) = core.servers.get_zones_to_servers(&used);
    match core.cache.update(&zones) {
        Ok(UpdateOutcome::Applied) => Some(Event::Success),
        Ok(UpdateOutcome::RestartRequired) => Some(Event::Change),
        Err(e) => fail(core, ExitCode::ServiceFailure, &e),
    }
}

pub(super) fn enter_running(core: &mut Core, _event: Event) -> Option<Event> {
    core.pending_routing_failure = None;
    info!(
        "Running with configuration serial {}.",
        core.cache.committed_serial()
    );
    None
}

////////////////////////////////////////////////////////////////////////
// RESTART                                                            //
////////////////////////////////////////////////////////////////////////

pub(super) fn submit_restart_job(core: &mut Core, _event: Event) -> Option<Event> {
    match core.systemd.change_unit_state(JobKind::Restart) {
        Ok(_) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::DbusFailure, &e),
    }
}

pub(super) fn restart_job_done(core: &mut Core, event: Event) -> Option<Event> {
    info!("The cache service {} has restarted.", core.systemd.unit());
    core.cache.reset();
    unsubscribe_immediate(core, event)
}

pub(super) fn job_failed_stop(core: &mut Core, event: Event) -> Option<Event> {
    error!("The cache service {} could not be restarted.", core.systemd.unit());
    core.exit_code.set(ExitCode::ServiceFailure);
    stop(core, event)
}

////////////////////////////////////////////////////////////////////////
// SHUTDOWN                                                           //
////////////////////////////////////////////////////////////////////////

pub(super) fn stop(core: &mut Core, _event: Event) -> Option<Event> {
    core.timer = None;
    core.routing.unsubscribe();
    match core.resolv_conf.revert() {
        Ok(()) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::ResolvConfFailure, &e),
    }
}

pub(super) fn submit_stop_job(core: &mut Core, _event: Event) -> Option<Event> {
    core.routing.unsubscribe();
    match core.systemd.change_unit_state(JobKind::Stop) {
        Ok(_) => Some(Event::Success),
        Err(e) => fail(core, ExitCode::DbusFailure, &e),
    }
}

pub(super) fn stop_job_failed(core: &mut Core, _event: Event) -> Option<Event> {
    core.exit_code.set(ExitCode::ServiceFailure);
    None
}

pub(super) fn remove_routes(core: &mut Core, _event: Event) -> Option<Event> {
    core.routing.remove_routes();
    Some(Event::Success)
}
