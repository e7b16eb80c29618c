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

//! The parts of network-manager connection settings, IP configuration
//! objects and DHCP leases that routing looks at.
//!
//! These are plain values; the bus layer converts them from and to the
//! network manager's variant dictionaries.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnet::IpNet;

use crate::description::AddressFamily;

/// A route, as found in `route-data` or `RouteData`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteEntry {
    pub dest: IpAddr,
    pub prefix: u8,
    pub next_hop: Option<IpAddr>,
    pub metric: Option<u32>,
}

impl RouteEntry {
    /// A host route to `dest` through `next_hop`.
    pub fn host(dest: IpAddr, next_hop: IpAddr) -> Self {
        Self {
            dest,
            prefix: AddressFamily::of(&dest).max_prefix(),
            next_hop: Some(next_hop),
            metric: None,
        }
    }

    pub fn is_host_route(&self) -> bool {
        self.prefix == AddressFamily::of(&self.dest).max_prefix()
    }

    /// The network the route covers, if its prefix is valid.
    pub fn network(&self) -> Option<IpNet> {
        IpNet::new(self.dest, self.prefix).ok().map(|n| n.trunc())
    }

    /// Returns whether the route is a host route to `dest` via `next_hop`.
    pub fn matches(&self, dest: IpAddr, next_hop: Option<IpAddr>) -> bool {
        self.is_host_route() && self.dest == dest && self.next_hop == next_hop
    }
}

/// An address with its prefix length.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressEntry {
    pub address: IpAddr,
    pub prefix: u8,
}

impl AddressEntry {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        IpNet::new(self.address, self.prefix)
            .map(|n| n.contains(ip))
            .unwrap_or(false)
    }
}

/// One address family's section of a connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FamilySettings {
    pub method: String,
    pub gateway: Option<IpAddr>,
    pub addresses: Vec<AddressEntry>,
    pub routes: Vec<RouteEntry>,
}

impl FamilySettings {
    /// Returns whether addresses for this family come from DHCP.
    pub fn uses_dhcp(&self) -> bool {
        self.method == "auto" || self.method == "dhcp"
    }

    pub fn host_route(&self, dest: IpAddr) -> Option<&RouteEntry> {
        self.routes.iter().find(|r| r.is_host_route() && r.dest == dest)
    }

    pub fn host_route_mut(&mut self, dest: IpAddr) -> Option<&mut RouteEntry> {
        self.routes
            .iter_mut()
            .find(|r| r.is_host_route() && r.dest == dest)
    }
}

/// A device's applied connection.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AppliedConnection {
    pub version: u64,
    pub ipv4: FamilySettings,
    pub ipv6: FamilySettings,
}

impl AppliedConnection {
    pub fn family(&self, family: AddressFamily) -> &FamilySettings {
        match family {
            AddressFamily::V4 => &self.ipv4,
            AddressFamily::V6 => &self.ipv6,
        }
    }

    pub fn family_mut(&mut self, family: AddressFamily) -> &mut FamilySettings {
        match family {
            AddressFamily::V4 => &mut self.ipv4,
            AddressFamily::V6 => &mut self.ipv6,
        }
    }
}

/// The live IP configuration of a device for one family.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct IpConfig {
    pub gateway: Option<IpAddr>,
    pub addresses: Vec<AddressEntry>,
    pub routes: Vec<RouteEntry>,
}

impl IpConfig {
    /// Returns whether a host route to `dest` via `next_hop` is in place.
    pub fn has_route(&self, dest: IpAddr, next_hop: Option<IpAddr>) -> bool {
        self.routes.iter().any(|r| r.matches(dest, next_hop))
    }
}

/// The options of a DHCP lease that routing cares about.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DhcpOptions {
    pub address: Option<AddressEntry>,
    pub routers: Vec<IpAddr>,
    /// `(network, gateway)` pairs.
    pub static_routes: Vec<(IpNet, IpAddr)>,
}

impl DhcpOptions {
    /// Builds the options from a lease's string dictionary.
    ///
    /// Understands `ip_address` with `subnet_mask` (a dotted mask or a
    /// prefix length), space-separated `routers`, and `static_routes` or
    /// `classless_static_routes` given as space-separated
    /// `network gateway` pairs. Unparsable entries are skipped.
    pub fn from_options(options: &HashMap<String, String>) -> Self {
        let address = options
            .get("ip_address")
            .and_then(|a| a.trim().parse::<IpAddr>().ok())
            .map(|address| {
                let prefix = options
                    .get("subnet_mask")
                    .and_then(|m| parse_mask(m.trim()))
                    .unwrap_or_else(|| AddressFamily::of(&address).max_prefix());
                AddressEntry { address, prefix }
            });

        let routers = options
            .get("routers")
            .map(|r| {
                r.split_whitespace()
                    .filter_map(|a| a.parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let mut static_routes = Vec::new();
        for key in ["classless_static_routes", "static_routes"] {
            if let Some(value) = options.get(key) {
                let words: Vec<&str> = value.split_whitespace().collect();
                for pair in words.chunks_exact(2) {
                    if let (Some(network), Ok(gateway)) = (parse_network(pair[0]), pair[1].parse())
                    {
                        static_routes.push((network, gateway));
                    }
                }
            }
        }

        Self {
            address,
            routers,
            static_routes,
        }
    }
}

/// Parses a subnet mask, either dotted (`255.255.255.0`) or as a prefix
/// length (`24`).
fn parse_mask(mask: &str) -> Option<u8> {
    if let Ok(prefix) = mask.parse::<u8>() {
        return Some(prefix);
    }
    let bits = u32::from(mask.parse::<Ipv4Addr>().ok()?);
    let prefix = bits.leading_ones();
    if bits.checked_shl(prefix).unwrap_or(0) == 0 {
        Some(prefix as u8)
    } else {
        None
    }
}

/// Parses `a.b.c.d/len` or a bare address (a host network).
fn parse_network(text: &str) -> Option<IpNet> {
    text.parse::<IpNet>()
        .ok()
        .or_else(|| {
            let address = text.parse::<IpAddr>().ok()?;
            IpNet::new(address, AddressFamily::of(&address).max_prefix()).ok()
        })
        .map(|n| n.trunc())
}
