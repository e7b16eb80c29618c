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

//! Implements the daemon configuration file.

use std::fmt;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::Level::Debug;
use log::{debug, info, log_enabled, LevelFilter};
use paste::paste;
use serde::{de, Deserialize};

use dnsconfd::description::{PriorityPolicy, STATIC_PRIORITY};
use dnsconfd::ipc::native::{parse_servers, ServerRecord};
use dnsconfd::links::LinkInfo;
use dnsconfd::settings::{ApiChoice, Settings};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnsconfd.toml";

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from the file given by `path`. A missing
/// file at the default location means the defaults are used.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw_config = match fs::read(path) {
        Ok(raw_config) => raw_config,
        Err(e) if e.kind() == io::ErrorKind::NotFound && path == Path::new(DEFAULT_CONFIG_PATH) => {
            info!("No configuration file at {}, using defaults.", path.display());
            return Ok(Config::default());
        }
        Err(e) => return Err(e).context("failed to read the configuration file"),
    };
    toml::from_slice(&raw_config).context("failed to parse the configuration file")
}

impl Config {
    /// Turns the configuration into the settings the daemon runs with.
    /// Static servers are validated like servers received over the bus.
    pub fn into_settings(self, links: &dyn LinkInfo) -> Result<Settings> {
        let static_servers = parse_servers(
            self.static_servers,
            links,
            PriorityPolicy::Fixed(STATIC_PRIORITY),
        )
        .context("invalid static server")?;

        let settings = Settings {
            listen_address: self.listen_address,
            prioritize_wire: self.prioritize_wire,
            resolv_conf_path: self.resolv_conf_path,
            resolver_options: self.resolver_options,
            dnssec_enabled: self.dnssec_enabled,
            handle_routing: self.handle_routing,
            ignore_api: self.ignore_api,
            api_choice: self.api_choice.0,
            certification_authority: self.certification_authority,
            bus_name: self.bus_name,
            cache_unit: self.cache_unit,
            cache_control: self.cache_control,
            cache_config_path: self.cache_config_path,
            static_servers,
        };
        log_settings_summary(&settings);
        Ok(settings)
    }
}

/// Summarizes the settings in the log, if the debug log level is
/// enabled.
fn log_settings_summary(settings: &Settings) {
    if !log_enabled!(Debug) {
        return;
    }
    debug!(
        "Configuration loaded:\n\
         Listen address:  {}\n\
         Resolver file:   {}\n\
         Cache unit:      {}\n\
         Interfaces:      {}\n\
         DNSSEC:          {}\n\
         Routing:         {}\n\
         Static servers:  {}",
        settings.listen_address,
        settings.resolv_conf_path.display(),
        settings.cache_unit,
        settings.api_choice,
        if settings.dnssec_enabled { "enabled" } else { "disabled" },
        if settings.handle_routing { "enabled" } else { "disabled" },
        settings.static_servers.len(),
    );
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION FILE STRUCTURE                                       //
////////////////////////////////////////////////////////////////////////

/// The complete configuration file.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub log_level: ConfigLevelFilter,
    pub listen_address: IpAddr,
    pub prioritize_wire: bool,
    pub resolv_conf_path: PathBuf,
    pub resolver_options: String,
    pub dnssec_enabled: bool,
    pub handle_routing: bool,
    pub ignore_api: bool,
    pub api_choice: ConfigApiChoice,
    pub certification_authority: Option<PathBuf>,
    pub bus_name: String,
    pub cache_unit: String,
    pub cache_control: PathBuf,
    pub cache_config_path: PathBuf,
    pub static_servers: Vec<ServerRecord>,
}

impl Default for Config {
    fn default() -> Self {
        let settings = Settings::default();
        Self {
            log_level: ConfigLevelFilter(LevelFilter::Info),
            listen_address: settings.listen_address,
            prioritize_wire: settings.prioritize_wire,
            resolv_conf_path: settings.resolv_conf_path,
            resolver_options: settings.resolver_options,
            dnssec_enabled: settings.dnssec_enabled,
            handle_routing: settings.handle_routing,
            ignore_api: settings.ignore_api,
            api_choice: ConfigApiChoice(settings.api_choice),
            certification_authority: None,
            bus_name: settings.bus_name,
            cache_unit: settings.cache_unit,
            cache_control: settings.cache_control,
            cache_config_path: settings.cache_config_path,
            static_servers: Vec::new(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// WRAPPERS OVER STRING-PARSED TYPES FOR SERDE                        //
////////////////////////////////////////////////////////////////////////

/// Generates a deserializable `ConfigX` structure wrapping an `X` type,
/// using its [`FromStr`](std::str::FromStr) implementation.
macro_rules! make_serde_wrapper {
    ($wrapper:ident, $over:ty, $description:literal) => {
        /// A macro-generated deserializable wrapper.
        #[derive(Clone, Debug)]
        pub struct $wrapper(pub $over);

        impl<'de> Deserialize<'de> for $wrapper {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: de::Deserializer<'de>,
            {
                deserializer.deserialize_str(paste! { [<$wrapper Visitor>] })
            }
        }

        paste! {
            /// A macro-generated [`Visitor`](de::Visitor).
            #[derive(Debug)]
            struct [<$wrapper Visitor>];
        }

        impl<'de> de::Visitor<'de> for paste! { [<$wrapper Visitor>] } {
            type Value = $wrapper;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str($description)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                value
                    .parse()
                    .map($wrapper)
                    .map_err(|e| E::custom(format!("invalid {}: {}", $description, e)))
            }
        }
    };
}

make_serde_wrapper!(ConfigLevelFilter, LevelFilter, "log level");
make_serde_wrapper!(ConfigApiChoice, ApiChoice, "API choice");

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use dnsconfd::links::SystemLinks;

    #[test]
    fn empty_files_give_the_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.log_level.0, LevelFilter::Info);
        let settings = config.into_settings(&SystemLinks).unwrap();
        assert_eq!(settings.listen_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(settings.api_choice, ApiChoice::Both);
        assert!(settings.handle_routing);
    }

    #[test]
    fn keys_are_read() {
        let config: Config = toml::from_str(
            r#"
            log_level = "debug"
            listen_address = "127.0.0.53"
            api_choice = "resolve1"
            handle_routing = false
            cache_unit = "unbound-test.service"

            [[static_servers]]
            address = "192.0.2.53"
            protocol = "DoT"
            routing_domains = ["corp.example"]

            [[static_servers]]
            address = "192.0.2.53"
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level.0, LevelFilter::Debug);
        let settings = config.into_settings(&SystemLinks).unwrap();
        assert_eq!(settings.listen_address, "127.0.0.53".parse::<IpAddr>().unwrap());
        assert_eq!(settings.api_choice, ApiChoice::Resolve1);
        assert!(!settings.handle_routing);
        assert_eq!(settings.cache_unit, "unbound-test.service");
        assert_eq!(settings.static_servers.len(), 2);
        assert!(settings
            .static_servers
            .iter()
            .all(|s| s.priority == STATIC_PRIORITY));
        assert_eq!(settings.static_servers[0].port, Some(853));
    }

    #[test]
    fn unknown_keys_and_bad_values_are_rejected() {
        assert!(toml::from_str::<Config>("colour = \"blue\"").is_err());
        assert!(toml::from_str::<Config>("api_choice = \"neither\"").is_err());
        assert!(toml::from_str::<Config>("log_level = \"loud\"").is_err());

        let config: Config = toml::from_str(
            r#"
            [[static_servers]]
            address = "not an address"
            "#,
        )
        .unwrap();
        assert!(config.into_settings(&SystemLinks).is_err());
    }

    #[test]
    fn missing_files_elsewhere_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_from_path(dir.path().join("missing.toml")).is_err());
        let path = dir.path().join("dnsconfd.toml");
        fs::write(&path, "dnssec_enabled = true\n").unwrap();
        assert!(load_from_path(&path).unwrap().dnssec_enabled);
    }
}
