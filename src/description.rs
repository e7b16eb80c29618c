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

//! Descriptions of forwarders.
//!
//! A [`ServerDescription`] is an immutable value describing one DNS
//! endpoint that the local cache may forward queries to. Descriptions
//! are built once per update (from the static configuration or from one
//! of the IPC surfaces) and are never mutated afterwards; in particular
//! the priority is fixed at construction.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;

use ipnet::IpNet;
use serde_json::{json, Value};

/// Priority assigned to servers from the static configuration.
pub const STATIC_PRIORITY: u32 = 150;

/// Priority assigned to dynamic servers on wired interfaces (and to all
/// dynamic servers when wired interfaces are not prioritized).
pub const WIRED_PRIORITY: u32 = 100;

/// Priority assigned to dynamic servers on wireless interfaces when
/// wired interfaces are prioritized.
pub const WIRELESS_PRIORITY: u32 = 50;

/// The default port for DNS over TLS.
pub const DOT_PORT: u16 = 853;

/// The zone name denoting the root (the default route).
pub const ROOT_ZONE: &str = ".";

////////////////////////////////////////////////////////////////////////
// PROTOCOLS AND ADDRESS FAMILIES                                     //
////////////////////////////////////////////////////////////////////////

/// The transport used to reach a forwarder.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Protocol {
    PlainUdp,
    PlainTcp,
    DnsOverTls,
}

impl Protocol {
    pub fn is_encrypted(self) -> bool {
        self == Self::DnsOverTls
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainUdp => "plain",
            Self::PlainTcp => "tcp",
            Self::DnsOverTls => "DoT",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown protocol name.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("unknown protocol {0:?}, expected \"plain\" or \"DoT\"")]
pub struct UnknownProtocolError(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("plain") || s.eq_ignore_ascii_case("udp") {
            Ok(Self::PlainUdp)
        } else if s.eq_ignore_ascii_case("tcp") {
            Ok(Self::PlainTcp)
        } else if s.eq_ignore_ascii_case("dot") || s.eq_ignore_ascii_case("tls") {
            Ok(Self::DnsOverTls)
        } else {
            Err(UnknownProtocolError(s.to_owned()))
        }
    }
}

/// An IP address family.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(address: &IpAddr) -> Self {
        match address {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    /// The prefix length of a host route in this family.
    pub fn max_prefix(self) -> u8 {
        match self {
            Self::V4 => 32,
            Self::V6 => 128,
        }
    }

    /// The key of this family's section in connection settings.
    pub fn settings_key(self) -> &'static str {
        match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        })
    }
}

////////////////////////////////////////////////////////////////////////
// SERVER DESCRIPTIONS                                                //
////////////////////////////////////////////////////////////////////////

/// An immutable description of a forwarder.
///
/// Two descriptions are equal iff their address, port, server name,
/// protocol and priority match; the remaining fields describe how the
/// server is used rather than which server it is.
#[derive(Clone, Debug)]
pub struct ServerDescription {
    pub address: IpAddr,
    pub port: Option<u16>,
    /// The TLS server name (SNI) for DNS over TLS.
    pub name: Option<String>,
    pub protocol: Protocol,
    /// Higher wins.
    pub priority: u32,
    /// The index of the interface through which the server must be
    /// reached, if any.
    pub interface: Option<u32>,
    /// Domains to forward to this server. `"."` denotes the default
    /// route.
    pub routing_domains: Vec<String>,
    pub search_domains: Vec<String>,
    /// Networks whose reverse zones should be forwarded to this server.
    pub networks: Vec<IpNet>,
    pub dnssec: bool,
    /// The CA bundle used to verify the server's certificate.
    pub ca: Option<PathBuf>,
}

impl ServerDescription {
    /// Creates a plain UDP description of `address` that handles the
    /// root zone with the given priority.
    pub fn new(address: IpAddr, priority: u32) -> Self {
        Self {
            address,
            port: None,
            name: None,
            protocol: Protocol::PlainUdp,
            priority,
            interface: None,
            routing_domains: vec![ROOT_ZONE.to_owned()],
            search_domains: Vec::new(),
            networks: Vec::new(),
            dnssec: false,
            ca: None,
        }
    }

    pub fn family(&self) -> AddressFamily {
        AddressFamily::of(&self.address)
    }

    /// Returns the raw address octets (4 or 16 of them).
    pub fn address_bytes(&self) -> Vec<u8> {
        match self.address {
            IpAddr::V4(a) => a.octets().to_vec(),
            IpAddr::V6(a) => a.octets().to_vec(),
        }
    }

    pub fn is_interface_bound(&self) -> bool {
        self.interface.is_some()
    }

    /// Returns whether the server only handles the root zone and
    /// contributes no networks or search domains.
    pub fn is_global_only(&self) -> bool {
        self.routing_domains.iter().all(|d| d == ROOT_ZONE)
            && self.networks.is_empty()
            && self.search_domains.is_empty()
    }

    /// The string identifying this server to the cache's control tool:
    /// `address[@port][#name]`.
    pub fn control_string(&self) -> String {
        let mut s = self.address.to_string();
        if let Some(port) = self.port {
            s.push('@');
            s.push_str(&port.to_string());
        }
        if let Some(ref name) = self.name {
            s.push('#');
            s.push_str(name);
        }
        s
    }

    /// Renders the description for status reports.
    pub fn to_json(&self) -> Value {
        json!({
            "address": self.address.to_string(),
            "port": self.port,
            "name": self.name,
            "protocol": self.protocol.as_str(),
            "priority": self.priority,
            "interface": self.interface,
            "routing_domains": self.routing_domains,
            "search_domains": self.search_domains,
            "networks": self.networks.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "dnssec": self.dnssec,
            "ca": self.ca.as_ref().map(|p| p.display().to_string()),
        })
    }
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.port == other.port
            && self.name == other.name
            && self.protocol == other.protocol
            && self.priority == other.priority
    }
}

impl Eq for ServerDescription {}

impl Hash for ServerDescription {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
        self.name.hash(state);
        self.protocol.hash(state);
        self.priority.hash(state);
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({}", self.control_string(), self.protocol)?;
        if let Some(index) = self.interface {
            write!(f, ", interface {}", index)?;
        }
        write!(f, ", priority {})", self.priority)
    }
}

/// How a new description's priority is chosen.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PriorityPolicy {
    /// Every server gets the same priority.
    Fixed(u32),
    /// The priority follows the server's interface. Wireless interfaces
    /// are demoted when wired ones are prioritized, and a server whose
    /// address was already seen bound to another interface loses one
    /// more point.
    Interface { prioritize_wire: bool },
}

impl PriorityPolicy {
    /// Returns the priority of a server for `address` bound to
    /// `interface`, given the descriptions built before it in the same
    /// batch.
    pub fn priority(
        self,
        address: IpAddr,
        interface: Option<u32>,
        wireless: bool,
        earlier: &[ServerDescription],
    ) -> u32 {
        let prioritize_wire = match self {
            Self::Fixed(priority) => return priority,
            Self::Interface { prioritize_wire } => prioritize_wire,
        };
        let base = if prioritize_wire && wireless {
            WIRELESS_PRIORITY
        } else {
            WIRED_PRIORITY
        };
        let duplicate = interface.is_some()
            && earlier.iter().any(|s| {
                s.address == address && s.interface.is_some() && s.interface != interface
            });
        if duplicate {
            base - 1
        } else {
            base
        }
    }
}

////////////////////////////////////////////////////////////////////////
// DOMAIN VALIDATION                                                  //
////////////////////////////////////////////////////////////////////////

/// The maximum length of a textual domain name without the trailing
/// dot.
const MAX_DOMAIN_LENGTH: usize = 253;

/// The maximum length of a single label.
const MAX_LABEL_LENGTH: usize = 63;

/// Checks whether `domain` is acceptable as a routing or search domain.
///
/// The root (`"."`) is accepted. Otherwise the name may carry one
/// trailing dot and must consist of non-empty labels of at most 63
/// octets without whitespace or dots; non-ASCII labels are allowed (they
/// are IDNA-encoded before reaching the cache).
pub fn is_valid_domain(domain: &str) -> bool {
    if domain == ROOT_ZONE {
        return true;
    }
    let domain = domain.strip_suffix('.').unwrap_or(domain);
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LENGTH {
        return false;
    }
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LENGTH
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| !c.is_whitespace() && !c.is_control() && c != '/' && c != '\\')
    })
}
