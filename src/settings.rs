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

//! Daemon settings as consumed by the library.
//!
//! Loading them from a file is the binary's business; the library only
//! sees this plain value.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::description::ServerDescription;

pub const DEFAULT_BUS_NAME: &str = "com.redhat.dnsconfd";
pub const DEFAULT_OBJECT_PATH: &str = "/com/redhat/dnsconfd";

/// Which IPC surfaces the daemon serves.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ApiChoice {
    /// Only the native interface.
    Dnsconfd,
    /// Only the resolver-compatible interface.
    Resolve1,
    #[default]
    Both,
}

impl ApiChoice {
    pub fn serves_native(self) -> bool {
        self != Self::Resolve1
    }

    pub fn serves_resolve1(self) -> bool {
        self != Self::Dnsconfd
    }
}

impl FromStr for ApiChoice {
    type Err = InvalidApiChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dnsconfd" => Ok(Self::Dnsconfd),
            "resolve1" => Ok(Self::Resolve1),
            "both" => Ok(Self::Both),
            _ => Err(InvalidApiChoiceError(s.to_owned())),
        }
    }
}

impl fmt::Display for ApiChoice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Self::Dnsconfd => "dnsconfd",
            Self::Resolve1 => "resolve1",
            Self::Both => "both",
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("invalid API choice {0:?}, expected \"dnsconfd\", \"resolve1\" or \"both\"")]
pub struct InvalidApiChoiceError(pub String);

/// Everything the daemon's components are configured with.
#[derive(Clone, Debug)]
pub struct Settings {
    /// The address the local cache listens on.
    pub listen_address: IpAddr,
    pub prioritize_wire: bool,
    pub resolv_conf_path: PathBuf,
    pub resolver_options: String,
    pub dnssec_enabled: bool,
    pub handle_routing: bool,
    pub ignore_api: bool,
    pub api_choice: ApiChoice,
    pub certification_authority: Option<PathBuf>,
    pub bus_name: String,
    pub cache_unit: String,
    pub cache_control: PathBuf,
    pub cache_config_path: PathBuf,
    pub static_servers: Vec<ServerDescription>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            prioritize_wire: true,
            resolv_conf_path: PathBuf::from("/etc/resolv.conf"),
            resolver_options: "edns0 trust-ad".to_owned(),
            dnssec_enabled: false,
            handle_routing: true,
            ignore_api: false,
            api_choice: ApiChoice::default(),
            certification_authority: None,
            bus_name: DEFAULT_BUS_NAME.to_owned(),
            cache_unit: "unbound.service".to_owned(),
            cache_control: PathBuf::from("unbound-control"),
            cache_config_path: PathBuf::from("/run/dnsconfd/unbound.conf"),
            static_servers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_choice_parses_and_selects_surfaces() {
        assert_eq!("both".parse::<ApiChoice>().unwrap(), ApiChoice::Both);
        let native = "dnsconfd".parse::<ApiChoice>().unwrap();
        assert!(native.serves_native() && !native.serves_resolve1());
        let compat = "resolve1".parse::<ApiChoice>().unwrap();
        assert!(!compat.serves_native() && compat.serves_resolve1());
        assert!("neither".parse::<ApiChoice>().is_err());
    }
}
