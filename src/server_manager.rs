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

//! Selection of the servers in use and their assignment to zones.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use crate::description::{ServerDescription, ROOT_ZONE};
use crate::reverse::reverse_zones;
use crate::util::push_unique_domain;

/// A mapping from zone name to the servers handling it, best first.
pub type ZoneMap = BTreeMap<String, Vec<ServerDescription>>;

////////////////////////////////////////////////////////////////////////
// RESOLVING MODES                                                    //
////////////////////////////////////////////////////////////////////////

/// How much authority servers bound to interfaces are given.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum ResolvingMode {
    /// Every server is used for everything it declares.
    #[default]
    Free,
    /// Interface-bound servers may not handle the root zone.
    RestrictGlobal,
    /// Interface-bound servers are not used at all.
    FullRestrictive,
}

impl ResolvingMode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Free => 0,
            Self::RestrictGlobal => 1,
            Self::FullRestrictive => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::RestrictGlobal => "restrict_global",
            Self::FullRestrictive => "full_restrictive",
        }
    }
}

impl TryFrom<u32> for ResolvingMode {
    type Error = InvalidModeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Free),
            1 => Ok(Self::RestrictGlobal),
            2 => Ok(Self::FullRestrictive),
            _ => Err(InvalidModeError(value.to_string())),
        }
    }
}

impl std::str::FromStr for ResolvingMode {
    type Err = InvalidModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "free" => Ok(Self::Free),
            "1" | "restrict_global" => Ok(Self::RestrictGlobal),
            "2" | "full_restrictive" => Ok(Self::FullRestrictive),
            _ => Err(InvalidModeError(s.to_owned())),
        }
    }
}

impl fmt::Display for ResolvingMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown resolving mode.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid resolving mode {0}, expected 0, 1 or 2")]
pub struct InvalidModeError(pub String);

////////////////////////////////////////////////////////////////////////
// SERVER MANAGER                                                     //
////////////////////////////////////////////////////////////////////////

/// Merges static and dynamic servers and applies the resolving mode.
#[derive(Debug, Default)]
pub struct ServerManager {
    static_servers: Vec<ServerDescription>,
    dynamic_servers: Vec<ServerDescription>,
    mode: ResolvingMode,
}

impl ServerManager {
    pub fn new(static_servers: Vec<ServerDescription>) -> Self {
        Self {
            static_servers,
            dynamic_servers: Vec::new(),
            mode: ResolvingMode::default(),
        }
    }

    /// Replaces the dynamic servers and the mode.
    pub fn set_dynamic_servers(&mut self, servers: Vec<ServerDescription>, mode: ResolvingMode) {
        self.dynamic_servers = servers;
        self.mode = mode;
    }

    pub fn mode(&self) -> ResolvingMode {
        self.mode
    }

    pub fn dynamic_servers(&self) -> &[ServerDescription] {
        &self.dynamic_servers
    }

    /// Returns all servers permitted by the current mode: static servers
    /// first, then dynamic ones.
    pub fn get_used_servers(&self) -> Vec<ServerDescription> {
        self.static_servers
            .iter()
            .chain(self.dynamic_servers.iter())
            .filter(|server| self.permits(server))
            .cloned()
            .collect()
    }

    fn permits(&self, server: &ServerDescription) -> bool {
        if !server.is_interface_bound() {
            return true;
        }
        match self.mode {
            ResolvingMode::Free => true,
            ResolvingMode::RestrictGlobal => !server.is_global_only(),
            ResolvingMode::FullRestrictive => false,
        }
    }

    /// Builds the zone map and the search-domain list for `used`.
    ///
    /// Each zone's servers are sorted by descending priority, then by
    /// protocol and control string, so the result does not depend on
    /// the order of `used`. Equal-priority, equal-protocol entries for
    /// the same control string are collapsed into one.
    pub fn get_zones_to_servers(&self, used: &[ServerDescription]) -> (ZoneMap, Vec<String>) {
        let mut zones = ZoneMap::new();
        let mut search_domains = Vec::new();

        for server in used {
            for domain in &server.routing_domains {
                let zone = normalize_zone(domain);
                if zone == ROOT_ZONE
                    && server.is_interface_bound()
                    && self.mode == ResolvingMode::RestrictGlobal
                {
                    continue;
                }
                zones.entry(zone).or_default().push(server.clone());
            }
            for network in &server.networks {
                for zone in reverse_zones(network) {
                    zones.entry(zone).or_default().push(server.clone());
                }
            }
            for domain in &server.search_domains {
                push_unique_domain(&mut search_domains, &normalize_zone(domain));
            }
        }

        for servers in zones.values_mut() {
            sort_and_collapse(servers);
        }
        zones.retain(|_, servers| !servers.is_empty());
        search_domains.sort();
        (zones, search_domains)
    }
}

/// Normalizes a domain for use as a zone key: lower-case, without a
/// trailing dot (except for the root).
pub fn normalize_zone(domain: &str) -> String {
    if domain == ROOT_ZONE {
        return domain.to_owned();
    }
    domain.strip_suffix('.').unwrap_or(domain).to_lowercase()
}

fn sort_and_collapse(servers: &mut Vec<ServerDescription>) {
    servers.sort_by_cached_key(|s| {
        (
            Reverse(s.priority),
            s.protocol,
            s.control_string(),
            s.interface,
        )
    });
    let mut kept: Vec<ServerDescription> = Vec::with_capacity(servers.len());
    for server in servers.drain(..) {
        let duplicate = kept.iter().any(|k| {
            k.priority == server.priority
                && k.protocol == server.protocol
                && k.control_string() == server.control_string()
        });
        if !duplicate {
            kept.push(server);
        }
    }
    *servers = kept;
}
