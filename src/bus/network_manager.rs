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

//! The network manager as seen over the system bus.

use std::collections::HashMap;
use std::net::IpAddr;

use log::trace;
use zbus::blocking::Connection;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};
use zbus::CacheProperties;

use super::proxies::{
    DeviceProxyBlocking, Dhcp4ConfigProxyBlocking, Dhcp6ConfigProxyBlocking,
    Ip4ConfigProxyBlocking, Ip6ConfigProxyBlocking, NetworkManagerProxyBlocking, RawSettings,
};
use super::values::{decode, encode};
use crate::description::AddressFamily;
use crate::routing::settings::{
    AddressEntry, AppliedConnection, DhcpOptions, FamilySettings, IpConfig, RouteEntry,
};
use crate::routing::{NetworkManager, RoutingError};

/// The route attributes this daemon manages; everything else in a
/// `route-data` entry is passed back untouched.
const ROUTE_KEYS: [&str; 4] = ["dest", "prefix", "next-hop", "metric"];

type Dict = HashMap<String, OwnedValue>;

/// [`NetworkManager`] over a blocking bus connection.
pub struct ZbusNetworkManager {
    connection: Connection,
}

impl ZbusNetworkManager {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    fn device(&self, path: &str) -> Result<DeviceProxyBlocking<'static>, RoutingError> {
        DeviceProxyBlocking::builder(&self.connection)
            .path(path.to_owned())
            .and_then(|b| b.cache_properties(CacheProperties::No).build())
            .map_err(|e| RoutingError::bus("Device", e))
    }
}

/// Returns the object path unless it is the "no object" path `/`.
fn object(path: OwnedObjectPath) -> Option<String> {
    Some(path.as_str().to_owned()).filter(|p| p != "/")
}

fn malformed(what: &str) -> impl FnOnce(zbus::zvariant::Error) -> RoutingError + '_ {
    move |_| RoutingError::Malformed(what.to_owned())
}

impl NetworkManager for ZbusNetworkManager {
    fn device_path(&mut self, interface: &str) -> Result<String, RoutingError> {
        let proxy = NetworkManagerProxyBlocking::new(&self.connection)
            .map_err(|e| RoutingError::bus("NetworkManager", e))?;
        let path = proxy
            .get_device_by_ip_iface(interface)
            .map_err(|e| RoutingError::bus("GetDeviceByIpIface", e))?;
        object(path).ok_or_else(|| RoutingError::DeviceNotFound(interface.to_owned()))
    }

    fn device_state(&mut self, device: &str) -> Result<u32, RoutingError> {
        self.device(device)?
            .state()
            .map_err(|e| RoutingError::bus("State", e))
    }

    fn applied_connection(&mut self, device: &str) -> Result<AppliedConnection, RoutingError> {
        let (settings, version) = self
            .device(device)?
            .get_applied_connection(0)
            .map_err(|e| RoutingError::bus("GetAppliedConnection", e))?;
        trace!("Applied connection of {} is at version {}.", device, version);
        Ok(AppliedConnection {
            version,
            ipv4: family_settings(&settings, AddressFamily::V4)?,
            ipv6: family_settings(&settings, AddressFamily::V6)?,
        })
    }

    fn reapply(&mut self, device: &str, connection: &AppliedConnection) -> Result<(), RoutingError> {
        let proxy = self.device(device)?;
        let (mut settings, _) = proxy
            .get_applied_connection(0)
            .map_err(|e| RoutingError::bus("GetAppliedConnection", e))?;
        for family in [AddressFamily::V4, AddressFamily::V6] {
            if let Some(section) = settings.get_mut(family.settings_key()) {
                let routes = &connection.family(family).routes;
                replace_routes(section, routes)?;
            }
        }
        proxy
            .reapply(settings, connection.version, 0)
            .map_err(|e| RoutingError::bus("Reapply", e))
    }

    fn ip_config(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, IpConfig)>, RoutingError> {
        let proxy = self.device(device)?;
        let path = match family {
            AddressFamily::V4 => proxy.ip4_config(),
            AddressFamily::V6 => proxy.ip6_config(),
        }
        .map_err(|e| RoutingError::bus("IpConfig", e))?;
        let path = match object(path) {
            Some(path) => path,
            None => return Ok(None),
        };

        let bus = |e: zbus::Error| RoutingError::bus("IpConfig", e);
        let (gateway, addresses, routes) = match family {
            AddressFamily::V4 => {
                let config = Ip4ConfigProxyBlocking::builder(&self.connection)
                    .path(path.clone())
                    .and_then(|b| b.cache_properties(CacheProperties::No).build())
                    .map_err(bus)?;
                (
                    config.gateway().map_err(bus)?,
                    config.address_data().map_err(bus)?,
                    config.route_data().map_err(bus)?,
                )
            }
            AddressFamily::V6 => {
                let config = Ip6ConfigProxyBlocking::builder(&self.connection)
                    .path(path.clone())
                    .and_then(|b| b.cache_properties(CacheProperties::No).build())
                    .map_err(bus)?;
                (
                    config.gateway().map_err(bus)?,
                    config.address_data().map_err(bus)?,
                    config.route_data().map_err(bus)?,
                )
            }
        };
        let config = IpConfig {
            gateway: gateway.parse().ok(),
            addresses: addresses
                .iter()
                .map(address_entry)
                .collect::<Result<_, _>>()?,
            routes: routes.iter().map(route_entry).collect::<Result<_, _>>()?,
        };
        Ok(Some((path, config)))
    }

    fn dhcp_options(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, DhcpOptions)>, RoutingError> {
        let proxy = self.device(device)?;
        let path = match family {
            AddressFamily::V4 => proxy.dhcp4_config(),
            AddressFamily::V6 => proxy.dhcp6_config(),
        }
        .map_err(|e| RoutingError::bus("DhcpConfig", e))?;
        let path = match object(path) {
            Some(path) => path,
            None => return Ok(None),
        };

        let bus = |e: zbus::Error| RoutingError::bus("Options", e);
        let raw = match family {
            AddressFamily::V4 => Dhcp4ConfigProxyBlocking::builder(&self.connection)
                .path(path.clone())
                .and_then(|b| b.cache_properties(CacheProperties::No).build())
                .and_then(|p| p.options())
                .map_err(bus)?,
            AddressFamily::V6 => Dhcp6ConfigProxyBlocking::builder(&self.connection)
                .path(path.clone())
                .and_then(|b| b.cache_properties(CacheProperties::No).build())
                .and_then(|p| p.options())
                .map_err(bus)?,
        };
        let options: HashMap<String, String> = raw
            .iter()
            .filter_map(|(key, value)| Some((key.clone(), decode::<String>(value).ok()?)))
            .collect();
        Ok(Some((path, DhcpOptions::from_options(&options))))
    }
}

////////////////////////////////////////////////////////////////////////
// SETTINGS CONVERSION                                                //
////////////////////////////////////////////////////////////////////////

fn family_settings(
    settings: &RawSettings,
    family: AddressFamily,
) -> Result<FamilySettings, RoutingError> {
    let section = match settings.get(family.settings_key()) {
        Some(section) => section,
        None => return Ok(FamilySettings::default()),
    };
    let string = |key: &str| -> Result<Option<String>, RoutingError> {
        section
            .get(key)
            .map(|v| decode::<String>(v).map_err(malformed(key)))
            .transpose()
    };
    let dicts = |key: &str| -> Result<Vec<Dict>, RoutingError> {
        section
            .get(key)
            .map(|v| decode::<Vec<Dict>>(v).map_err(malformed(key)))
            .transpose()
            .map(Option::unwrap_or_default)
    };

    Ok(FamilySettings {
        method: string("method")?.unwrap_or_default(),
        gateway: string("gateway")?.and_then(|g| g.parse().ok()),
        addresses: dicts("address-data")?
            .iter()
            .map(address_entry)
            .collect::<Result<_, _>>()?,
        routes: dicts("route-data")?
            .iter()
            .map(route_entry)
            .collect::<Result<_, _>>()?,
    })
}

fn dict_address(dict: &Dict, key: &str) -> Result<Option<IpAddr>, RoutingError> {
    match dict.get(key) {
        Some(value) => {
            let text: String = decode(value).map_err(malformed(key))?;
            text.parse()
                .map(Some)
                .map_err(|_| RoutingError::Malformed(key.to_owned()))
        }
        None => Ok(None),
    }
}

fn dict_u32(dict: &Dict, key: &str) -> Result<Option<u32>, RoutingError> {
    dict.get(key)
        .map(|v| decode::<u32>(v).map_err(malformed(key)))
        .transpose()
}

fn prefix(dict: &Dict) -> Result<u8, RoutingError> {
    dict_u32(dict, "prefix")?
        .and_then(|p| u8::try_from(p).ok())
        .ok_or_else(|| RoutingError::Malformed("prefix".to_owned()))
}

fn address_entry(dict: &Dict) -> Result<AddressEntry, RoutingError> {
    Ok(AddressEntry {
        address: dict_address(dict, "address")?
            .ok_or_else(|| RoutingError::Malformed("address".to_owned()))?,
        prefix: prefix(dict)?,
    })
}

fn route_entry(dict: &Dict) -> Result<RouteEntry, RoutingError> {
    Ok(RouteEntry {
        dest: dict_address(dict, "dest")?
            .ok_or_else(|| RoutingError::Malformed("dest".to_owned()))?,
        prefix: prefix(dict)?,
        next_hop: dict_address(dict, "next-hop")?,
        metric: dict_u32(dict, "metric")?,
    })
}

/// Rewrites `route-data` in a raw settings section to hold `routes`.
/// Attributes of existing entries that are not managed here (tables,
/// options, ...) survive. The legacy `routes` key is dropped so that it
/// cannot contradict `route-data`.
fn replace_routes(section: &mut Dict, routes: &[RouteEntry]) -> Result<(), RoutingError> {
    let mut existing: Vec<(RouteEntry, Dict)> = match section.get("route-data") {
        Some(value) => decode::<Vec<Dict>>(value)
            .map_err(malformed("route-data"))?
            .into_iter()
            .map(|dict| Ok((route_entry(&dict)?, dict)))
            .collect::<Result<_, RoutingError>>()?,
        None => Vec::new(),
    };

    let mut entries = Vec::with_capacity(routes.len());
    for route in routes {
        let position = existing
            .iter()
            .position(|(e, _)| e.dest == route.dest && e.prefix == route.prefix);
        let mut dict = match position {
            Some(i) => existing.swap_remove(i).1,
            None => Dict::new(),
        };
        dict.retain(|key, _| !ROUTE_KEYS.contains(&key.as_str()));
        dict.insert(
            "dest".to_owned(),
            encode(route.dest.to_string()).map_err(malformed("dest"))?,
        );
        dict.insert(
            "prefix".to_owned(),
            encode(u32::from(route.prefix)).map_err(malformed("prefix"))?,
        );
        if let Some(next_hop) = route.next_hop {
            dict.insert(
                "next-hop".to_owned(),
                encode(next_hop.to_string()).map_err(malformed("next-hop"))?,
            );
        }
        if let Some(metric) = route.metric {
            dict.insert(
                "metric".to_owned(),
                encode(metric).map_err(malformed("metric"))?,
            );
        }
        entries.push(dict);
    }

    section.insert(
        "route-data".to_owned(),
        encode(Value::from(entries)).map_err(malformed("route-data"))?,
    );
    section.remove("routes");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(value: Value<'static>) -> OwnedValue {
        OwnedValue::try_from(value).unwrap()
    }

    fn route_dict(dest: &str, prefix: u32, next_hop: Option<&str>) -> Dict {
        let mut dict = Dict::new();
        dict.insert("dest".to_owned(), owned(Value::from(dest.to_owned())));
        dict.insert("prefix".to_owned(), owned(Value::from(prefix)));
        if let Some(next_hop) = next_hop {
            dict.insert("next-hop".to_owned(), owned(Value::from(next_hop.to_owned())));
        }
        dict
    }

    fn section(routes: Vec<Dict>) -> Dict {
        let mut section = Dict::new();
        section.insert("method".to_owned(), owned(Value::from("manual")));
        section.insert("gateway".to_owned(), owned(Value::from("10.0.0.254")));
        let mut address = Dict::new();
        address.insert("address".to_owned(), owned(Value::from("10.0.0.1")));
        address.insert("prefix".to_owned(), owned(Value::from(24u32)));
        section.insert("address-data".to_owned(), owned(Value::from(vec![address])));
        section.insert("route-data".to_owned(), owned(Value::from(routes)));
        section
    }

    #[test]
    fn raw_settings_parse_into_family_settings() {
        let mut settings = RawSettings::new();
        settings.insert(
            "ipv4".to_owned(),
            section(vec![route_dict("192.0.2.53", 32, Some("10.0.0.254"))]),
        );
        let ipv4 = family_settings(&settings, AddressFamily::V4).unwrap();
        assert_eq!(ipv4.method, "manual");
        assert_eq!(ipv4.gateway, Some("10.0.0.254".parse().unwrap()));
        assert_eq!(ipv4.addresses.len(), 1);
        assert!(ipv4.addresses[0].contains(&"10.0.0.77".parse().unwrap()));
        assert_eq!(
            ipv4.routes,
            vec![RouteEntry::host(
                "192.0.2.53".parse().unwrap(),
                "10.0.0.254".parse().unwrap()
            )]
        );
        assert_eq!(
            family_settings(&settings, AddressFamily::V6).unwrap(),
            FamilySettings::default()
        );
    }

    #[test]
    fn replacing_routes_keeps_foreign_attributes() {
        let mut existing = route_dict("192.0.2.53", 32, Some("10.0.0.1"));
        existing.insert("table".to_owned(), owned(Value::from(254u32)));
        let mut raw = section(vec![existing, route_dict("192.0.2.99", 32, None)]);
        raw.insert("routes".to_owned(), owned(Value::from(Vec::<u32>::new())));

        let routes = vec![RouteEntry::host(
            "192.0.2.53".parse().unwrap(),
            "10.0.0.254".parse().unwrap(),
        )];
        replace_routes(&mut raw, &routes).unwrap();

        assert!(!raw.contains_key("routes"));
        let entries: Vec<Dict> = decode(&raw["route-data"]).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(route_entry(&entries[0]).unwrap(), routes[0]);
        assert_eq!(decode::<u32>(&entries[0]["table"]).unwrap(), 254);
    }
}
