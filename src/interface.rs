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

//! Per-interface DNS state advertised through the resolver-compatible
//! API.
//!
//! The network manager configures an interface through several separate
//! calls (servers, domains, default route, ...). Nothing is forwarded to
//! the core until an interface has received all three mandatory pieces;
//! see [`InterfaceState::is_ready`].

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::description::{PriorityPolicy, Protocol, ServerDescription, DOT_PORT, ROOT_ZONE};
use crate::util::push_unique_domain;

/// A server advertised for an interface.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkServer {
    pub address: IpAddr,
    pub port: Option<u16>,
    pub name: Option<String>,
}

/// The accumulated state of one interface.
#[derive(Clone, Debug, Default)]
pub struct InterfaceState {
    pub index: u32,
    /// `(name, is_routing_domain)` pairs.
    pub domains: Option<Vec<(String, bool)>>,
    pub servers: Option<Vec<LinkServer>>,
    pub default_route: Option<bool>,
    pub dns_over_tls: bool,
    pub dnssec: bool,
}

impl InterfaceState {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// An interface is ready once its domains, servers and default-route
    /// flag have all been set.
    pub fn is_ready(&self) -> bool {
        self.domains.is_some() && self.servers.is_some() && self.default_route.is_some()
    }

    /// Builds the descriptions of this interface's servers.
    ///
    /// Every domain becomes a routing domain; domains that are not
    /// routing-only are also search domains. A default route adds the
    /// root zone. Priorities follow `policy`, counting the descriptions
    /// already built for `earlier` interfaces.
    pub fn descriptions(
        &self,
        wireless: bool,
        policy: PriorityPolicy,
        earlier: &[ServerDescription],
    ) -> Vec<ServerDescription> {
        let mut routing_domains = Vec::new();
        let mut search_domains = Vec::new();
        for (name, routing_only) in self.domains.iter().flatten() {
            push_unique_domain(&mut routing_domains, name);
            if !routing_only {
                push_unique_domain(&mut search_domains, name);
            }
        }
        if self.default_route == Some(true) {
            push_unique_domain(&mut routing_domains, ROOT_ZONE);
        }

        let protocol = if self.dns_over_tls {
            Protocol::DnsOverTls
        } else {
            Protocol::PlainUdp
        };

        self.servers
            .iter()
            .flatten()
            .map(|server| ServerDescription {
                address: server.address,
                port: server
                    .port
                    .or(if self.dns_over_tls { Some(DOT_PORT) } else { None }),
                name: server.name.clone(),
                protocol,
                priority: policy.priority(server.address, Some(self.index), wireless, earlier),
                interface: Some(self.index),
                routing_domains: routing_domains.clone(),
                search_domains: search_domains.clone(),
                networks: Vec::new(),
                dnssec: self.dnssec,
                ca: None,
            })
            .collect()
    }
}

/// The registry of all interfaces configured so far.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    interfaces: BTreeMap<u32, InterfaceState>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of interface `index`, creating it on first use.
    pub fn entry(&mut self, index: u32) -> &mut InterfaceState {
        self.interfaces
            .entry(index)
            .or_insert_with(|| InterfaceState::new(index))
    }

    pub fn get(&self, index: u32) -> Option<&InterfaceState> {
        self.interfaces.get(&index)
    }

    /// Returns the ready interfaces, ordered by index.
    pub fn ready(&self) -> impl Iterator<Item = &InterfaceState> {
        self.interfaces.values().filter(|i| i.is_ready())
    }
}
