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

//! Conversions between variant dictionaries and the crate's types.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use zbus::zvariant::{self, OwnedValue, Value};

use crate::ipc::native::ServerRecord;
use crate::ipc::ConfigError;

/// Converts a variant into `T`.
pub fn decode<T>(value: &OwnedValue) -> Result<T, zvariant::Error>
where
    T: TryFrom<Value<'static>>,
    T::Error: Into<zvariant::Error>,
{
    T::try_from(Value::from(value.try_clone()?)).map_err(Into::into)
}

/// Converts `value` into a variant.
pub fn encode<'a>(value: impl Into<Value<'a>>) -> Result<OwnedValue, zvariant::Error> {
    OwnedValue::try_from(value.into())
}

/// Reads any integer variant, looking through nested variants.
pub fn decode_integer(value: &Value) -> Option<i64> {
    match *value {
        Value::U8(n) => Some(n.into()),
        Value::I16(n) => Some(n.into()),
        Value::U16(n) => Some(n.into()),
        Value::I32(n) => Some(n.into()),
        Value::U32(n) => Some(n.into()),
        Value::I64(n) => Some(n),
        Value::U64(n) => i64::try_from(n).ok(),
        Value::Value(ref inner) => decode_integer(inner),
        _ => None,
    }
}

/// Turns 4 or 16 raw octets into an address.
pub fn address_from_octets(octets: &[u8]) -> Option<IpAddr> {
    match octets.len() {
        4 => {
            let mut array = [0; 4];
            array.copy_from_slice(octets);
            Some(IpAddr::V4(Ipv4Addr::from(array)))
        }
        16 => {
            let mut array = [0; 16];
            array.copy_from_slice(octets);
            Some(IpAddr::V6(Ipv6Addr::from(array)))
        }
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////
// NATIVE SERVER RECORDS                                              //
////////////////////////////////////////////////////////////////////////

fn type_error(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::Type {
        key: key.to_owned(),
        expected,
    }
}

fn string(key: &str, value: &OwnedValue) -> Result<String, ConfigError> {
    decode(value).map_err(|_| type_error(key, "a string"))
}

fn strings(key: &str, value: &OwnedValue) -> Result<Vec<String>, ConfigError> {
    decode(value).map_err(|_| type_error(key, "a list of strings"))
}

/// Decodes one server dictionary of the native `Update` call. The
/// address may be given as a string or as raw octets.
pub fn server_record(dict: &HashMap<String, OwnedValue>) -> Result<ServerRecord, ConfigError> {
    let mut record = ServerRecord::default();
    for (key, value) in dict {
        match key.as_str() {
            "address" => {
                let address = match decode::<Vec<u8>>(value) {
                    Ok(octets) => address_from_octets(&octets)
                        .map(|a| a.to_string())
                        .ok_or_else(|| type_error(key, "4 or 16 octets"))?,
                    Err(_) => string(key, value)?,
                };
                record.address = Some(address);
            }
            "port" => {
                record.port =
                    Some(decode_integer(value).ok_or_else(|| type_error(key, "an integer"))?);
            }
            "protocol" => record.protocol = Some(string(key, value)?),
            "name" => record.name = Some(string(key, value)?),
            "interface" => record.interface = Some(string(key, value)?),
            "ca" => record.ca = Some(string(key, value)?),
            "routing_domains" => record.routing_domains = Some(strings(key, value)?),
            "search_domains" => record.search_domains = Some(strings(key, value)?),
            "networks" => record.networks = Some(strings(key, value)?),
            "dnssec" => {
                record.dnssec = Some(decode(value).map_err(|_| type_error(key, "a boolean"))?);
            }
            _ => return Err(ConfigError::UnknownKey(key.clone())),
        }
    }
    Ok(record)
}

/// Encodes a record as the dictionary the native `Update` call takes.
/// Absent fields are left out.
pub fn record_dict(record: &ServerRecord) -> Result<HashMap<String, OwnedValue>, zvariant::Error> {
    let mut dict = HashMap::new();
    let mut put = |key: &str, value: Option<Value>| -> Result<(), zvariant::Error> {
        if let Some(value) = value {
            dict.insert(key.to_owned(), encode(value)?);
        }
        Ok(())
    };
    put("address", record.address.as_deref().map(Value::from))?;
    put("port", record.port.map(Value::from))?;
    put("protocol", record.protocol.as_deref().map(Value::from))?;
    put("name", record.name.as_deref().map(Value::from))?;
    put("interface", record.interface.as_deref().map(Value::from))?;
    put("ca", record.ca.as_deref().map(Value::from))?;
    put("dnssec", record.dnssec.map(Value::from))?;
    put("routing_domains", record.routing_domains.clone().map(Value::from))?;
    put("search_domains", record.search_domains.clone().map(Value::from))?;
    put("networks", record.networks.clone().map(Value::from))?;
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: Vec<(&str, Value<'static>)>) -> HashMap<String, OwnedValue> {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_owned(), OwnedValue::try_from(v).unwrap()))
            .collect()
    }

    #[test]
    fn server_dictionaries_decode_into_records() {
        let record = server_record(&dict(vec![
            ("address", Value::from("192.0.2.53")),
            ("port", Value::from(853u16)),
            ("protocol", Value::from("DoT")),
            ("routing_domains", Value::from(vec!["corp.example"])),
            ("dnssec", Value::from(true)),
        ]))
        .unwrap();
        assert_eq!(record.address.as_deref(), Some("192.0.2.53"));
        assert_eq!(record.port, Some(853));
        assert_eq!(record.protocol.as_deref(), Some("DoT"));
        assert_eq!(record.routing_domains, Some(vec!["corp.example".to_owned()]));
        assert_eq!(record.dnssec, Some(true));
    }

    #[test]
    fn addresses_may_be_raw_octets() {
        let record = server_record(&dict(vec![(
            "address",
            Value::from(vec![192u8, 0, 2, 53]),
        )]))
        .unwrap();
        assert_eq!(record.address.as_deref(), Some("192.0.2.53"));
    }

    #[test]
    fn encoded_records_decode_to_themselves() {
        let record = ServerRecord {
            port: Some(853),
            protocol: Some("DoT".to_owned()),
            routing_domains: Some(vec!["corp.example".to_owned()]),
            dnssec: Some(true),
            ..ServerRecord::with_address("2001:db8::53")
        };
        let dict = record_dict(&record).unwrap();
        assert_eq!(dict.len(), 5);
        assert_eq!(server_record(&dict).unwrap(), record);
    }

    #[test]
    fn unknown_keys_and_wrong_types_are_rejected() {
        assert!(matches!(
            server_record(&dict(vec![("colour", Value::from("blue"))])),
            Err(ConfigError::UnknownKey(_))
        ));
        assert!(matches!(
            server_record(&dict(vec![("port", Value::from("53"))])),
            Err(ConfigError::Type { .. })
        ));
    }
}
