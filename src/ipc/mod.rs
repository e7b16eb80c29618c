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

//! The logic behind both IPC surfaces.
//!
//! The bus glue in [`crate::bus`] decodes calls into the plain values
//! defined here and hands them to the [`IpcHandler`] on the event loop's
//! thread. Everything that can be checked without the core is checked
//! here, so invalid input never reaches the state machine.

use log::{debug, info, warn};

use crate::description::{PriorityPolicy, UnknownProtocolError};
use crate::fsm::Core;
use crate::interface::InterfaceRegistry;
use crate::links::LinkInfo;
use crate::server_manager::{InvalidModeError, ResolvingMode};

pub mod compat;
pub mod native;

use compat::{parse_dns_over_tls, parse_dnssec, parse_domains, LinkCall};
use native::{parse_servers, ServerRecord};

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Invalid input received over IPC.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("the server address is missing")]
    MissingAddress,

    #[error("invalid server address {0:?}")]
    Address(String),

    #[error("invalid address of family {family} with {length} bytes")]
    RawAddress { family: i32, length: usize },

    #[error("invalid port {0}, expected 1 to 65535")]
    Port(i64),

    #[error(transparent)]
    Protocol(#[from] UnknownProtocolError),

    #[error("invalid domain {0:?}")]
    Domain(String),

    #[error("unknown interface {0:?}")]
    Interface(String),

    #[error("unknown interface index {0}")]
    InterfaceIndex(i32),

    #[error("invalid network {0:?}")]
    Network(String),

    #[error(transparent)]
    Mode(#[from] InvalidModeError),

    #[error("if CA is used, then it has to be set and same for all servers using encryption")]
    CaMismatch,

    #[error("invalid {setting} value {value:?}")]
    Setting { setting: &'static str, value: String },

    #[error("unknown server key {0:?}")]
    UnknownKey(String),

    #[error("server key {key:?} must be {expected}")]
    Type { key: String, expected: &'static str },
}

////////////////////////////////////////////////////////////////////////
// HANDLER                                                            //
////////////////////////////////////////////////////////////////////////

/// Applies IPC calls to the core.
pub struct IpcHandler {
    links: Box<dyn LinkInfo>,
    prioritize_wire: bool,
    ignore_api: bool,
    registry: InterfaceRegistry,
}

impl IpcHandler {
    pub fn new(links: Box<dyn LinkInfo>, prioritize_wire: bool, ignore_api: bool) -> Self {
        Self {
            links,
            prioritize_wire,
            ignore_api,
            registry: InterfaceRegistry::new(),
        }
    }

    /// Handles the native `Update` call. Returns the assigned serial, or
    /// 0 and the reason for the rejection.
    pub fn update(
        &mut self,
        core: &mut Core,
        records: Vec<ServerRecord>,
        mode: u32,
    ) -> (u32, String) {
        let result = ResolvingMode::try_from(mode)
            .map_err(ConfigError::from)
            .and_then(|mode| {
                parse_servers(records, self.links.as_ref(), self.priority_policy())
                    .map(|servers| (servers, mode))
            });
        let (servers, mode) = match result {
            Ok(update) => update,
            Err(e) => {
                warn!("Rejecting update: {}.", e);
                return (0, e.to_string());
            }
        };
        if self.ignore_api {
            info!("Ignoring update of {} servers as configured.", servers.len());
            return (core.committed_serial().get(), "update ignored".to_owned());
        }
        core.update(servers, mode)
    }

    pub fn status(&self, core: &Core, as_json: bool) -> String {
        core.status(as_json)
    }

    pub fn reload(&mut self, core: &mut Core) -> (bool, String) {
        core.reload()
    }

    /// Handles a resolver-compatible call concerning an interface.
    pub fn link(&mut self, core: &mut Core, call: LinkCall) -> Result<(), ConfigError> {
        let index = match call.index() {
            Some(index) => self.check_index(index)?,
            None => {
                if let LinkCall::Ignored { method } = call {
                    debug!("Accepted {} without effect.", method);
                }
                return Ok(());
            }
        };
        if self.ignore_api {
            debug!("Ignoring a call for interface {} as configured.", index);
            return Ok(());
        }

        let state = self.registry.entry(index);
        match call {
            LinkCall::Dns { servers, .. } => {
                let servers = servers
                    .iter()
                    .map(|s| s.to_link_server())
                    .collect::<Result<Vec<_>, _>>()?;
                debug!("Interface {} has {} servers.", index, servers.len());
                state.servers = Some(servers);
            }
            LinkCall::Domains { domains, .. } => {
                state.domains = Some(parse_domains(domains)?);
            }
            LinkCall::DefaultRoute { enable, .. } => {
                state.default_route = Some(enable);
            }
            LinkCall::DnsOverTls { mode, .. } => {
                state.dns_over_tls = parse_dns_over_tls(&mode)?;
            }
            LinkCall::Dnssec { mode, .. } => {
                state.dnssec = parse_dnssec(&mode)?;
            }
            LinkCall::Ignored { .. } => return Ok(()),
        }

        if state.is_ready() {
            self.push_ready_interfaces(core);
        }
        Ok(())
    }

    fn check_index(&self, index: i32) -> Result<u32, ConfigError> {
        u32::try_from(index)
            .ok()
            .filter(|i| self.links.name_of(*i).is_some())
            .ok_or(ConfigError::InterfaceIndex(index))
    }

    fn priority_policy(&self) -> PriorityPolicy {
        PriorityPolicy::Interface {
            prioritize_wire: self.prioritize_wire,
        }
    }

    fn push_ready_interfaces(&mut self, core: &mut Core) {
        let mut servers = Vec::new();
        for state in self.registry.ready() {
            let wireless = self
                .links
                .name_of(state.index)
                .map_or(false, |name| self.links.is_wireless(&name));
            let descriptions = state.descriptions(wireless, self.priority_policy(), &servers);
            servers.extend(descriptions);
        }
        info!(
            "Forwarding {} servers of {} ready interfaces.",
            servers.len(),
            self.registry.ready().count()
        );
        core.update(servers, ResolvingMode::Free);
    }
}
