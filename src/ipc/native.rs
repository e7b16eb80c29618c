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

//! Parsing and validation of the native `Update` call's server records.

use std::net::IpAddr;
use std::path::PathBuf;

use ipnet::IpNet;
use serde::Deserialize;

use super::ConfigError;
use crate::description::{
    is_valid_domain, PriorityPolicy, Protocol, ServerDescription, DOT_PORT, ROOT_ZONE,
};
use crate::links::LinkInfo;

/// One server as received over the bus, before validation.
///
/// Every field is optional on the wire; only `address` is required.
/// The same keys describe static servers in the configuration file.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerRecord {
    pub address: Option<String>,
    pub port: Option<i64>,
    pub protocol: Option<String>,
    pub name: Option<String>,
    pub routing_domains: Option<Vec<String>>,
    pub search_domains: Option<Vec<String>>,
    pub interface: Option<String>,
    pub dnssec: Option<bool>,
    pub ca: Option<String>,
    pub networks: Option<Vec<String>>,
}

impl ServerRecord {
    /// A record holding nothing but `address`.
    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_owned()),
            ..Self::default()
        }
    }

    /// Validates the record and turns it into a description.
    ///
    /// The priority comes from `policy`, which may look at the
    /// descriptions built `earlier` in the same batch. Servers without
    /// routing domains handle the root zone.
    pub fn into_description(
        self,
        links: &dyn LinkInfo,
        policy: PriorityPolicy,
        earlier: &[ServerDescription],
    ) -> Result<ServerDescription, ConfigError> {
        let address = self.address.ok_or(ConfigError::MissingAddress)?;
        let address: IpAddr = address
            .parse()
            .map_err(|_| ConfigError::Address(address.clone()))?;

        let port = match self.port {
            Some(port) => Some(
                u16::try_from(port)
                    .ok()
                    .filter(|p| *p != 0)
                    .ok_or(ConfigError::Port(port))?,
            ),
            None => None,
        };
        let protocol = match self.protocol {
            Some(ref protocol) => protocol.parse::<Protocol>()?,
            None => Protocol::PlainUdp,
        };

        let (interface, wireless) = match self.interface {
            Some(ref name) if !name.is_empty() => {
                let index = links
                    .index_of(name)
                    .ok_or_else(|| ConfigError::Interface(name.clone()))?;
                (Some(index), links.is_wireless(name))
            }
            _ => (None, false),
        };
        let priority = policy.priority(address, interface, wireless, earlier);

        let routing_domains = match self.routing_domains {
            Some(domains) if !domains.is_empty() => validate_domains(domains)?,
            _ => vec![ROOT_ZONE.to_owned()],
        };
        let search_domains = validate_domains(self.search_domains.unwrap_or_default())?;
        let networks = self
            .networks
            .unwrap_or_default()
            .into_iter()
            .map(|network| {
                network
                    .parse::<IpNet>()
                    .map(|n| n.trunc())
                    .map_err(|_| ConfigError::Network(network))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ServerDescription {
            address,
            port: port.or(if protocol.is_encrypted() {
                Some(DOT_PORT)
            } else {
                None
            }),
            name: self.name.filter(|n| !n.is_empty()),
            protocol,
            priority,
            interface,
            routing_domains,
            search_domains,
            networks,
            dnssec: self.dnssec.unwrap_or(false),
            ca: self.ca.filter(|c| !c.is_empty()).map(PathBuf::from),
        })
    }
}

fn validate_domains(domains: Vec<String>) -> Result<Vec<String>, ConfigError> {
    match domains.iter().find(|d| !is_valid_domain(d)) {
        Some(invalid) => Err(ConfigError::Domain(invalid.clone())),
        None => Ok(domains),
    }
}

/// Validates a whole batch of records.
///
/// Besides the per-record checks, all encrypted servers must agree on
/// the CA bundle: either none of them names one, or all of them name
/// the same one.
pub fn parse_servers(
    records: Vec<ServerRecord>,
    links: &dyn LinkInfo,
    policy: PriorityPolicy,
) -> Result<Vec<ServerDescription>, ConfigError> {
    let mut servers = Vec::with_capacity(records.len());
    for record in records {
        let server = record.into_description(links, policy, &servers)?;
        servers.push(server);
    }

    let cas: Vec<_> = servers
        .iter()
        .filter(|s| s.protocol.is_encrypted())
        .map(|s| s.ca.as_ref())
        .collect();
    if cas.iter().any(Option::is_some) && cas.windows(2).any(|pair| pair[0] != pair[1]) {
        return Err(ConfigError::CaMismatch);
    }
    Ok(servers)
}
