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

//! Driving the local forwarding cache.
//!
//! The [`CacheManager`] keeps the zone map last committed to the cache
//! and, for each new map, issues only the control directives needed to
//! move from one to the other. The control tool itself is behind the
//! [`CacheControl`] trait; [`unbound`] has the implementation used by the
//! daemon.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::description::{Protocol, ROOT_ZONE};
use crate::serial::Serial;
use crate::server_manager::ZoneMap;

pub mod unbound;

////////////////////////////////////////////////////////////////////////
// CONTROL INTERFACE                                                  //
////////////////////////////////////////////////////////////////////////

/// Access to the cache's control tool and configuration file.
pub trait CacheControl {
    /// Runs one control command, e.g. `["flush_zone", "."]`.
    fn run(&mut self, args: &[String]) -> Result<(), CacheError>;

    /// Replaces the cache's configuration file with `contents`.
    fn write_configuration(&mut self, contents: &str) -> Result<(), CacheError>;
}

/// Errors from the cache's control tool.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to run {program}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} {command} failed ({status}): {output}")]
    Command {
        program: String,
        command: String,
        status: String,
        output: String,
    },

    #[error("failed to write cache configuration to {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

////////////////////////////////////////////////////////////////////////
// DIRECTIVES                                                         //
////////////////////////////////////////////////////////////////////////

/// One command for the cache's control tool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Directive {
    ForwardAdd {
        flags: ZoneFlags,
        zone: String,
        servers: Vec<String>,
    },
    ForwardRemove {
        zone: String,
    },
    FlushZone {
        zone: String,
    },
}

impl Directive {
    /// Returns the control tool's arguments for this directive.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::ForwardAdd {
                flags,
                zone,
                servers,
            } => {
                let mut args = vec!["forward_add".to_owned()];
                if !flags.is_empty() {
                    args.push(flags.to_string());
                }
                args.push(zone.clone());
                args.extend(servers.iter().cloned());
                args
            }
            Self::ForwardRemove { zone } => {
                vec!["forward_remove".to_owned(), "+i".to_owned(), zone.clone()]
            }
            Self::FlushZone { zone } => vec!["flush_zone".to_owned(), zone.clone()],
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.args().join(" "))
    }
}

/// The `forward_add` flags of a zone.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ZoneFlags {
    /// Skip DNSSEC validation (`+i`).
    pub insecure: bool,
    /// Forward over TLS (`+t`).
    pub tls: bool,
}

impl ZoneFlags {
    pub fn is_empty(self) -> bool {
        !self.insecure && !self.tls
    }
}

impl fmt::Display for ZoneFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("+")?;
        if self.insecure {
            f.write_str("i")?;
        }
        if self.tls {
            f.write_str("t")?;
        }
        Ok(())
    }
}

/// A zone as it is configured in the cache.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CacheZone {
    pub flags: ZoneFlags,
    /// Control strings, best first.
    pub servers: Vec<String>,
}

/// The zones configured in the cache, keyed by (ASCII) zone name.
pub type CacheZones = BTreeMap<String, CacheZone>;

/// Reduces a zone map to what the cache is told.
///
/// Within a zone only servers sharing the best server's protocol and
/// priority are kept, without duplicates. Non-ASCII zone names are
/// IDNA-encoded; a zone whose name cannot be encoded is dropped.
pub fn trim_zones(zones: &ZoneMap, dnssec_enabled: bool) -> CacheZones {
    let mut trimmed = CacheZones::new();
    for (zone, servers) in zones {
        let first = match servers.first() {
            Some(first) => first,
            None => continue,
        };
        let name = match encode_zone(zone) {
            Some(name) => name,
            None => {
                warn!("Dropping zone {} because it cannot be IDNA-encoded.", zone);
                continue;
            }
        };

        let mut selected = Vec::new();
        let mut insecure = false;
        for server in servers {
            if server.protocol != first.protocol || server.priority != first.priority {
                break;
            }
            let control = server.control_string();
            if !selected.contains(&control) {
                selected.push(control);
            }
            insecure |= dnssec_enabled && !server.dnssec;
        }

        trimmed.insert(
            name,
            CacheZone {
                flags: ZoneFlags {
                    insecure,
                    tls: first.protocol == Protocol::DnsOverTls,
                },
                servers: selected,
            },
        );
    }
    trimmed
}

fn encode_zone(zone: &str) -> Option<String> {
    if zone == ROOT_ZONE || zone.is_ascii() {
        Some(zone.to_owned())
    } else {
        idna::domain_to_ascii(zone).ok()
    }
}

/// Computes the directives that turn `old` into `new`.
///
/// `root_placeholder` tells whether the root zone currently forwards to
/// `placeholder` because its real servers were removed earlier.
pub fn diff_zones(
    old: &CacheZones,
    new: &CacheZones,
    root_placeholder: bool,
    placeholder: IpAddr,
) -> Vec<Directive> {
    let mut directives = Vec::new();

    for zone in old.keys().filter(|z| !new.contains_key(*z)) {
        if zone == ROOT_ZONE {
            directives.push(Directive::ForwardAdd {
                flags: ZoneFlags::default(),
                zone: zone.clone(),
                servers: vec![placeholder.to_string()],
            });
        } else {
            directives.push(Directive::ForwardRemove { zone: zone.clone() });
        }
        directives.push(Directive::FlushZone { zone: zone.clone() });
    }

    for (zone, entry) in new {
        match old.get(zone) {
            Some(previous) if previous == entry => continue,
            Some(_) => directives.push(Directive::ForwardRemove { zone: zone.clone() }),
            None if zone == ROOT_ZONE && root_placeholder => {
                directives.push(Directive::ForwardRemove { zone: zone.clone() })
            }
            None => (),
        }
        directives.push(Directive::ForwardAdd {
            flags: entry.flags,
            zone: zone.clone(),
            servers: entry.servers.clone(),
        });
        directives.push(Directive::FlushZone { zone: zone.clone() });
    }

    directives
}

////////////////////////////////////////////////////////////////////////
// CACHE MANAGER                                                      //
////////////////////////////////////////////////////////////////////////

/// What [`CacheManager::update`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateOutcome {
    /// The cache now serves the new zones.
    Applied,
    /// The CA bundle changed; the configuration file was rewritten and
    /// the cache must be restarted before zones can be applied.
    RestartRequired,
}

/// Keeps the cache's forwarding configuration in sync with the zone map.
pub struct CacheManager {
    control: Box<dyn CacheControl>,
    listen_address: IpAddr,
    dnssec_enabled: bool,
    default_ca: Option<PathBuf>,
    ca: Option<PathBuf>,
    zones: CacheZones,
    root_placeholder: bool,
    requested_serial: Serial,
    committed_serial: Serial,
}

impl CacheManager {
    pub fn new(
        control: Box<dyn CacheControl>,
        listen_address: IpAddr,
        dnssec_enabled: bool,
        default_ca: Option<PathBuf>,
    ) -> Self {
        Self {
            control,
            listen_address,
            dnssec_enabled,
            ca: default_ca.clone(),
            default_ca,
            zones: CacheZones::new(),
            root_placeholder: false,
            requested_serial: Serial::INITIAL,
            committed_serial: Serial::INITIAL,
        }
    }

    /// Writes the cache's configuration file for the CA in effect.
    pub fn write_configuration(&mut self) -> Result<(), CacheError> {
        let ca = self.ca.clone();
        self.write_configuration_for(ca.as_deref())
    }

    fn write_configuration_for(&mut self, ca: Option<&Path>) -> Result<(), CacheError> {
        let contents = unbound::configuration(self.listen_address, self.dnssec_enabled, ca);
        self.control.write_configuration(&contents)
    }

    /// Checks that the cache answers its control tool.
    pub fn probe(&mut self) -> Result<(), CacheError> {
        self.control.run(&["status".to_owned()])
    }

    /// Assigns the next serial to a newly accepted update.
    pub fn bump_requested_serial(&mut self) -> Serial {
        self.requested_serial = self.requested_serial.next();
        self.requested_serial
    }

    pub fn requested_serial(&self) -> Serial {
        self.requested_serial
    }

    pub fn committed_serial(&self) -> Serial {
        self.committed_serial
    }

    pub fn zones(&self) -> &CacheZones {
        &self.zones
    }

    /// Forgets the committed zones, after the cache was restarted with
    /// a fresh configuration.
    pub fn reset(&mut self) {
        self.zones.clear();
        self.root_placeholder = false;
    }

    /// Brings the cache in line with `zones`.
    ///
    /// On success the requested serial becomes the committed one. On
    /// failure the committed state is left alone so that a later update
    /// is diffed against what the cache was last known to hold.
    pub fn update(&mut self, zones: &ZoneMap) -> Result<UpdateOutcome, CacheError> {
        let ca = zones
            .values()
            .flatten()
            .filter(|s| s.protocol.is_encrypted())
            .find_map(|s| s.ca.clone())
            .or_else(|| self.default_ca.clone());
        if ca != self.ca {
            info!(
                "CA bundle changed to {}, the cache must be restarted.",
                ca.as_ref()
                    .map_or_else(|| "none".to_owned(), |p| p.display().to_string())
            );
            self.write_configuration_for(ca.as_deref())?;
            self.ca = ca;
            return Ok(UpdateOutcome::RestartRequired);
        }

        let new_zones = trim_zones(zones, self.dnssec_enabled);
        let directives = diff_zones(
            &self.zones,
            &new_zones,
            self.root_placeholder,
            self.listen_address,
        );
        if directives.is_empty() {
            debug!("Cache zones are already up to date.");
        }
        for directive in &directives {
            debug!("Sending cache directive: {}.", directive);
            self.control.run(&directive.args())?;
        }

        if self.zones.contains_key(ROOT_ZONE) && !new_zones.contains_key(ROOT_ZONE) {
            self.root_placeholder = true;
        } else if new_zones.contains_key(ROOT_ZONE) {
            self.root_placeholder = false;
        }
        self.zones = new_zones;
        self.committed_serial = self.requested_serial;
        info!(
            "Cache updated with {} zones, configuration serial is now {}.",
            self.zones.len(),
            self.committed_serial
        );
        Ok(UpdateOutcome::Applied)
    }

    /// Renders the committed zones for status reports.
    pub fn zones_json(&self) -> Value {
        let zones: serde_json::Map<String, Value> = self
            .zones
            .iter()
            .map(|(zone, entry)| {
                (
                    zone.clone(),
                    json!({
                        "flags": entry.flags.to_string(),
                        "servers": entry.servers,
                    }),
                )
            })
            .collect();
        Value::Object(zones)
    }
}

impl fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CacheManager")
            .field("zones", &self.zones)
            .field("requested_serial", &self.requested_serial)
            .field("committed_serial", &self.committed_serial)
            .finish()
    }
}
