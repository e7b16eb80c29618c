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

//! Lifecycle control of the cache service through the init system.
//!
//! Jobs are submitted asynchronously: the manager's method returns a job
//! ID at once, and completion is reported later by a `JobRemoved` signal.
//! [`SystemdManager`] remembers which kind of job each pending ID is and
//! turns the signal back into state-machine events.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, warn};

use crate::fsm::Event;

/// The kinds of jobs the daemon submits for the cache unit.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum JobKind {
    Start,
    Restart,
    Stop,
}

impl JobKind {
    /// The init system's manager method submitting this kind of job.
    pub fn method(self) -> &'static str {
        match self {
            Self::Start => "ReloadOrRestartUnit",
            Self::Restart => "RestartUnit",
            Self::Stop => "StopUnit",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Restart => "restart",
            Self::Stop => "stop",
        })
    }
}

/// Errors from the init system.
#[derive(Debug, thiserror::Error)]
pub enum SystemdError {
    #[error("init system call {method} failed")]
    Call {
        method: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("init system returned a malformed job path {0:?}")]
    JobPath(String),
}

impl SystemdError {
    pub fn call(method: &str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Call {
            method: method.to_owned(),
            source: Box::new(source),
        }
    }
}

/// The init system's job interface.
pub trait InitSystem {
    /// Starts delivery of `JobRemoved` signals.
    fn subscribe(&mut self) -> Result<(), SystemdError>;

    /// Stops delivery of `JobRemoved` signals.
    fn unsubscribe(&mut self) -> Result<(), SystemdError>;

    /// Submits a job of `kind` for `unit` and returns its ID.
    fn submit(&mut self, kind: JobKind, unit: &str) -> Result<u32, SystemdError>;
}

/// Extracts the numeric job ID from a job object path such as
/// `/org/freedesktop/systemd1/job/1234`.
pub fn job_id_from_path(path: &str) -> Result<u32, SystemdError> {
    path.rsplit('/')
        .next()
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| SystemdError::JobPath(path.to_owned()))
}

/// Tracks the jobs submitted for the cache unit.
pub struct SystemdManager {
    init: Box<dyn InitSystem>,
    unit: String,
    pending: BTreeMap<u32, JobKind>,
    subscribed: bool,
}

impl SystemdManager {
    pub fn new(init: Box<dyn InitSystem>, unit: String) -> Self {
        Self {
            init,
            unit,
            pending: BTreeMap::new(),
            subscribed: false,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn has_pending_jobs(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Submits a `kind` job for the cache unit and returns its ID.
    pub fn change_unit_state(&mut self, kind: JobKind) -> Result<u32, SystemdError> {
        if !self.subscribed {
            self.init.subscribe()?;
            self.subscribed = true;
        }
        let id = self.init.submit(kind, &self.unit)?;
        debug!("Submitted {} job {} for {}.", kind, id, self.unit);
        self.pending.insert(id, kind);
        Ok(id)
    }

    /// Translates a `JobRemoved` signal into events.
    ///
    /// A failed job yields a failure event followed by a success event;
    /// a successful (or skipped) one only the success event. Signals for
    /// jobs the daemon did not submit yield nothing.
    pub fn job_removed(&mut self, id: u32, unit: &str, result: &str) -> Vec<Event> {
        let kind = match self.pending.remove(&id) {
            Some(kind) => kind,
            None => return Vec::new(),
        };
        debug!("The {} job {} for {} finished: {}.", kind, id, unit, result);

        if self.pending.is_empty() && self.subscribed {
            if let Err(e) = self.init.unsubscribe() {
                warn!("Failed to unsubscribe from init system jobs: {}.", e);
            }
            self.subscribed = false;
        }

        if result == "done" || result == "skipped" {
            vec![Event::JobDone(kind)]
        } else {
            warn!("The {} job for {} failed with result {}.", kind, unit, result);
            vec![Event::JobFailed(kind), Event::JobDone(kind)]
        }
    }
}

impl fmt::Debug for SystemdManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SystemdManager")
            .field("unit", &self.unit)
            .field("pending", &self.pending)
            .field("subscribed", &self.subscribed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockInit;

    #[test]
    fn job_ids_are_parsed_from_paths() {
        assert_eq!(
            job_id_from_path("/org/freedesktop/systemd1/job/1234").unwrap(),
            1234
        );
        assert!(job_id_from_path("/org/freedesktop/systemd1/job/x").is_err());
    }

    #[test]
    fn successful_jobs_yield_one_event_and_unsubscribe() {
        let init = MockInit::default();
        let mut manager = SystemdManager::new(Box::new(init.clone()), "unbound.service".into());
        let id = manager.change_unit_state(JobKind::Start).unwrap();
        assert_eq!(init.submitted(), vec![(JobKind::Start, "unbound.service".to_owned())]);
        assert!(init.is_subscribed());

        assert_eq!(
            manager.job_removed(id, "unbound.service", "done"),
            vec![Event::JobDone(JobKind::Start)]
        );
        assert!(!manager.has_pending_jobs());
        assert!(!init.is_subscribed());
    }

    #[test]
    fn failed_jobs_yield_failure_then_success() {
        let init = MockInit::default();
        let mut manager = SystemdManager::new(Box::new(init), "unbound.service".into());
        let id = manager.change_unit_state(JobKind::Stop).unwrap();
        assert_eq!(
            manager.job_removed(id, "unbound.service", "failed"),
            vec![Event::JobFailed(JobKind::Stop), Event::JobDone(JobKind::Stop)]
        );
    }

    #[test]
    fn unknown_jobs_are_ignored() {
        let init = MockInit::default();
        let mut manager = SystemdManager::new(Box::new(init.clone()), "unbound.service".into());
        let id = manager.change_unit_state(JobKind::Restart).unwrap();
        assert!(manager.job_removed(id + 100, "other.service", "done").is_empty());
        assert!(manager.has_pending_jobs());
        assert!(init.is_subscribed());
    }
}
