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

//! The transition table.

use super::actions::*;
use super::{Action, Event, State};
use crate::systemd::JobKind;

fn t(next: State, action: Action) -> (State, Action) {
    (next, action)
}

/// Looks up the transition for `event` in `state`.
pub(super) fn lookup(state: State, event: &Event) -> Option<(State, Action)> {
    use Event as E;
    use JobKind::*;
    use State::*;

    let transition = match (state, event) {
        // Startup.
        (Starting, E::Kickoff) => t(ConfiguringCache, configure_cache),
        (Starting, E::Update { .. }) => t(Starting, store_update),
        (Starting, E::Stop) => t(Stopping, exit),
        (ConfiguringCache, E::Success) => t(ConnectingBus, connect_bus),
        (ConfiguringCache, E::Fail) => t(Stopping, exit),
        (ConnectingBus, E::Success) => t(SubmittingStartJob, submit_start_job),
        (ConnectingBus, E::Fail) => t(Stopping, exit),
        (SubmittingStartJob, E::Success) => t(WaitingForStartJob, nothing),
        (SubmittingStartJob, E::Fail) => t(Stopping, exit),
        (WaitingForStartJob, E::JobDone(Start)) => t(SubscribingNmConnections, start_job_done),
        (WaitingForStartJob, E::JobFailed(Start)) => t(Stopping, job_failed_exit),
        (WaitingForStartJob, E::Update { .. }) => t(WaitingForStartJob, store_update),
        (WaitingForStartJob, E::Stop) => t(WaitingToSubmitStopJob, nothing),
        (WaitingToSubmitStopJob, E::JobFailed(Start)) => t(Stopping, job_failed_exit),
        (WaitingToSubmitStopJob, E::JobDone(Start)) => t(RevertingResolvConf, stop),
        (WaitingToSubmitStopJob, E::JobFailed(Restart)) => t(RevertingResolvConf, stop),
        (WaitingToSubmitStopJob, E::JobDone(Restart)) => t(RevertingResolvConf, stop),

        // Reconciliation.
        (SubscribingNmConnections, E::Success) => t(CheckAllConnectionsUp, check_all_up),
        (SubscribingNmConnections, E::SkipRouting) => t(UpdatingResolvConf, update_resolv_conf),
        (SubscribingNmConnections, E::Fail) => t(UnsubscribeNmAndWait, unsubscribe_and_wait),
        (CheckAllConnectionsUp, E::Success) => t(GatherConnConfig, gather_connections),
        (CheckAllConnectionsUp, E::NoChange) => t(WaitAllConnectionsUp, nothing),
        (WaitAllConnectionsUp, E::InterfaceUp) => t(CheckAllConnectionsUp, check_all_up),
        (WaitAllConnectionsUp, E::InterfaceDown) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (WaitAllConnectionsUp, E::Update { .. }) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (WaitAllConnectionsUp, E::Stop) => t(RevertingResolvConf, stop),
        (GatherConnConfig, E::Success) => t(SubscribeIpChanges, subscribe_ip_changes),
        (GatherConnConfig, E::Fail) => t(UnsubscribeNmAndWait, unsubscribe_and_wait),
        (SubscribeIpChanges, E::Success) => t(CheckIpObjects, check_ip_objects),
        (SubscribeIpChanges, E::Fail) => t(UnsubscribeNmAndWait, unsubscribe_and_wait),
        (CheckIpObjects, E::Success) => t(ModifyConnections, modify_connections),
        (CheckIpObjects, E::NoChange) => t(WaitIpObjects, nothing),
        (CheckIpObjects, E::Fail) => t(UnsubscribeNmAndWait, unsubscribe_and_wait),
        (WaitIpObjects, E::IpReady) => t(CheckIpObjects, check_ip_objects),
        (WaitIpObjects, E::InterfaceDown) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (WaitIpObjects, E::DhcpChange) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (WaitIpObjects, E::Update { .. }) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (WaitIpObjects, E::Stop) => t(RevertingResolvConf, stop),
        (ModifyConnections, E::Change) => t(CheckIpObjects, check_ip_objects),
        (ModifyConnections, E::NoChange) => t(RemoveRedundantRoutes, remove_redundant_routes),
        (ModifyConnections, E::Fail) => t(UnsubscribeNmAndWait, unsubscribe_and_wait),
        (RemoveRedundantRoutes, E::Success) => t(UpdatingResolvConf, update_resolv_conf),
        (UpdatingResolvConf, E::Success) => t(UpdatingCache, update_cache),
        (UpdatingResolvConf, E::Fail) => t(SubmittingStopJob, submit_stop_job),
        (UpdatingCache, E::Success) => t(Running, enter_running),
        (UpdatingCache, E::Change) => t(SubmittingRestartJob, submit_restart_job),
        (UpdatingCache, E::Fail) => t(RevertingResolvConf, stop),
        (UnsubscribeImmediate, E::Success) => t(SubscribingNmConnections, subscribe_nm_connections),
        (UnsubscribeNmAndWait, E::TimerUp) => t(SubscribingNmConnections, subscribe_nm_connections),
        (UnsubscribeNmAndWait, E::Update { .. }) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (UnsubscribeNmAndWait, E::Stop) => t(RevertingResolvConf, stop),

        // Steady state.
        (Running, E::Update { .. })
        | (Running, E::InterfaceUp)
        | (Running, E::InterfaceDown)
        | (Running, E::IpReady)
        | (Running, E::IpNotReady)
        | (Running, E::DhcpChange) => t(UnsubscribeImmediate, unsubscribe_immediate),
        (Running, E::Reload) => t(SubmittingRestartJob, submit_restart_job),
        (Running, E::Stop) => t(RevertingResolvConf, stop),

        // Restart.
        (SubmittingRestartJob, E::Success) => t(WaitingRestartJob, nothing),
        (SubmittingRestartJob, E::Fail) => t(RevertingResolvConf, stop),
        (WaitingRestartJob, E::JobDone(Restart)) => t(UnsubscribeImmediate, restart_job_done),
        (WaitingRestartJob, E::JobFailed(Restart)) => t(RevertingResolvConf, job_failed_stop),
        (WaitingRestartJob, E::Update { .. }) => t(WaitingRestartJob, store_update),
        (WaitingRestartJob, E::Stop) => t(WaitingToSubmitStopJob, nothing),

        // Shutdown.
        (RevertingResolvConf, E::Success) | (RevertingResolvConf, E::Fail) => {
            t(SubmittingStopJob, submit_stop_job)
        }
        (SubmittingStopJob, E::Success) => t(WaitingStopJob, nothing),
        (SubmittingStopJob, E::Fail) => t(RemovingRoutes, remove_routes),
        (WaitingStopJob, E::JobFailed(Stop)) => t(WaitingStopJob, stop_job_failed),
        (WaitingStopJob, E::JobDone(Stop)) => t(RemovingRoutes, remove_routes),
        (RemovingRoutes, E::Success) => t(Stopping, exit),

        _ => return None,
    };
    Some(transition)
}
