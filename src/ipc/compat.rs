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

//! The resolver-compatible (`org.freedesktop.resolve1`) call model.
//!
//! Calls arrive one setting at a time per interface and are accumulated
//! in an [`InterfaceRegistry`]. Once an interface is ready, every ready
//! interface's servers are sent to the core as one update.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::ConfigError;
use crate::description::is_valid_domain;
use crate::interface::LinkServer;

pub const AF_INET: i32 = 2;
pub const AF_INET6: i32 = 10;

/// A server as given to `SetLinkDNS` or `SetLinkDNSEx`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RawLinkServer {
    pub family: i32,
    pub address: Vec<u8>,
    /// Zero for the default port.
    pub port: u16,
    /// Empty for no server name.
    pub name: String,
}

impl RawLinkServer {
    pub fn new(family: i32, address: Vec<u8>) -> Self {
        Self {
            family,
            address,
            ..Self::default()
        }
    }

    pub fn to_link_server(&self) -> Result<LinkServer, ConfigError> {
        let address = match (self.family, self.address.len()) {
            (AF_INET, 4) => {
                let mut octets = [0; 4];
                octets.copy_from_slice(&self.address);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            (AF_INET6, 16) => {
                let mut octets = [0; 16];
                octets.copy_from_slice(&self.address);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            (family, length) => return Err(ConfigError::RawAddress { family, length }),
        };
        Ok(LinkServer {
            address,
            port: Some(self.port).filter(|p| *p != 0),
            name: Some(self.name.clone()).filter(|n| !n.is_empty()),
        })
    }
}

/// One resolver-compatible call concerning an interface.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkCall {
    Dns {
        index: i32,
        servers: Vec<RawLinkServer>,
    },
    /// `(domain, routing_only)` pairs.
    Domains {
        index: i32,
        domains: Vec<(String, bool)>,
    },
    DefaultRoute {
        index: i32,
        enable: bool,
    },
    DnsOverTls {
        index: i32,
        mode: String,
    },
    Dnssec {
        index: i32,
        mode: String,
    },
    /// A call that is accepted but has no effect.
    Ignored { method: &'static str },
}

impl LinkCall {
    /// The interface the call concerns, if any.
    pub fn index(&self) -> Option<i32> {
        match *self {
            Self::Dns { index, .. }
            | Self::Domains { index, .. }
            | Self::DefaultRoute { index, .. }
            | Self::DnsOverTls { index, .. }
            | Self::Dnssec { index, .. } => Some(index),
            Self::Ignored { .. } => None,
        }
    }
}

/// Interprets a `SetLinkDNSOverTLS` mode.
pub fn parse_dns_over_tls(mode: &str) -> Result<bool, ConfigError> {
    match mode {
        "yes" | "opportunistic" => Ok(true),
        "no" | "" => Ok(false),
        _ => Err(ConfigError::Setting {
            setting: "DNSOverTLS",
            value: mode.to_owned(),
        }),
    }
}

/// Interprets a `SetLinkDNSSEC` mode. Only `yes` enables validation.
pub fn parse_dnssec(mode: &str) -> Result<bool, ConfigError> {
    match mode {
        "yes" => Ok(true),
        "no" | "allow-downgrade" | "" => Ok(false),
        _ => Err(ConfigError::Setting {
            setting: "DNSSEC",
            value: mode.to_owned(),
        }),
    }
}

/// Validates the domains of a `SetLinkDomains` call. Routing-only
/// domains may be given with a leading `~`, which is stripped.
pub fn parse_domains(domains: Vec<(String, bool)>) -> Result<Vec<(String, bool)>, ConfigError> {
    domains
        .into_iter()
        .map(|(domain, routing_only)| {
            let (domain, routing_only) = match domain.strip_prefix('~') {
                Some(stripped) => (stripped.to_owned(), true),
                None => (domain, routing_only),
            };
            let domain = if domain.is_empty() { ".".to_owned() } else { domain };
            if is_valid_domain(&domain) {
                Ok((domain, routing_only))
            } else {
                Err(ConfigError::Domain(domain))
            }
        })
        .collect()
}
