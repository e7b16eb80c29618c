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

//! The init system's manager over the system bus.

use log::debug;
use zbus::blocking::Connection;

use super::proxies::SystemdProxyBlocking;
use crate::systemd::{job_id_from_path, InitSystem, JobKind, SystemdError};

/// Jobs replace any conflicting queued job.
const JOB_MODE: &str = "replace";

/// [`InitSystem`] over a blocking bus connection.
pub struct ZbusInitSystem {
    proxy: SystemdProxyBlocking<'static>,
}

impl ZbusInitSystem {
    pub fn new(connection: &Connection) -> Result<Self, SystemdError> {
        let proxy = SystemdProxyBlocking::new(connection)
            .map_err(|e| SystemdError::call("Manager", e))?;
        Ok(Self { proxy })
    }
}

impl InitSystem for ZbusInitSystem {
    fn subscribe(&mut self) -> Result<(), SystemdError> {
        self.proxy
            .subscribe()
            .map_err(|e| SystemdError::call("Subscribe", e))
    }

    fn unsubscribe(&mut self) -> Result<(), SystemdError> {
        self.proxy
            .unsubscribe()
            .map_err(|e| SystemdError::call("Unsubscribe", e))
    }

    fn submit(&mut self, kind: JobKind, unit: &str) -> Result<u32, SystemdError> {
        let result = match kind {
            JobKind::Start => self.proxy.reload_or_restart_unit(unit, JOB_MODE),
            JobKind::Restart => self.proxy.restart_unit(unit, JOB_MODE),
            JobKind::Stop => self.proxy.stop_unit(unit, JOB_MODE),
        };
        let path = result.map_err(|e| SystemdError::call(kind.method(), e))?;
        debug!("Submitted {} job {} for {}.", kind, path.as_str(), unit);
        job_id_from_path(path.as_str())
    }
}
