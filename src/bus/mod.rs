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

//! Everything that talks to the system bus.
//!
//! The daemon keeps two connections: one serving its interfaces, and one
//! for its own calls to the init system and the network manager and for
//! receiving their signals.

use std::sync::mpsc::Sender;

use log::{info, warn};
use zbus::blocking::Connection;

use crate::daemon::Input;
use crate::settings::{Settings, DEFAULT_OBJECT_PATH};
use crate::systemd::SystemdError;
use crate::thread;

pub mod network_manager;
pub mod proxies;
pub mod server;
pub mod signals;
pub mod systemd;
pub mod values;

use server::{
    shared_serial, BusObserver, NativeInterface, Resolve1Interface, RESOLVE1_NAME, RESOLVE1_PATH,
};

/// Errors setting up the daemon's bus presence.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("failed to connect to the system bus")]
    Connect(#[source] zbus::Error),

    #[error("failed to serve {interface} at {path}")]
    Serve {
        interface: &'static str,
        path: &'static str,
        #[source]
        source: zbus::Error,
    },

    #[error("failed to acquire the bus name {name}")]
    Name {
        name: String,
        #[source]
        source: zbus::Error,
    },

    #[error(transparent)]
    Systemd(#[from] SystemdError),

    #[error("failed to start the signal listeners")]
    Listeners(#[from] thread::Error),
}

/// Opens a connection to the system bus.
pub fn system_bus() -> Result<Connection, BusError> {
    Connection::system().map_err(BusError::Connect)
}

/// Serves the interfaces selected by the settings on `connection` and
/// acquires their names. Returns the observer that publishes the
/// configuration serial.
///
/// Failing to acquire the resolver's name is not fatal: another
/// resolver may own it, and the native interface still works.
pub fn serve(
    connection: &Connection,
    settings: &Settings,
    inputs: &Sender<Input>,
) -> Result<BusObserver, BusError> {
    let object_server = connection.object_server();
    let choice = settings.api_choice;
    let serial = shared_serial();

    if choice.serves_native() {
        object_server
            .at(DEFAULT_OBJECT_PATH, NativeInterface::new(inputs.clone(), serial.clone()))
            .map_err(|source| BusError::Serve {
                interface: "the native interface",
                path: DEFAULT_OBJECT_PATH,
                source,
            })?;
        connection
            .request_name(settings.bus_name.as_str())
            .map_err(|source| BusError::Name {
                name: settings.bus_name.clone(),
                source,
            })?;
        info!("Serving {} at {}.", settings.bus_name, DEFAULT_OBJECT_PATH);
    }

    if choice.serves_resolve1() {
        object_server
            .at(RESOLVE1_PATH, Resolve1Interface::new(inputs.clone()))
            .map_err(|source| BusError::Serve {
                interface: "the resolver interface",
                path: RESOLVE1_PATH,
                source,
            })?;
        match connection.request_name(RESOLVE1_NAME) {
            Ok(()) => info!("Serving {} at {}.", RESOLVE1_NAME, RESOLVE1_PATH),
            Err(e) => warn!("Failed to acquire {}: {}.", RESOLVE1_NAME, e),
        }
    }

    Ok(BusObserver::new(
        connection.clone(),
        choice.serves_native().then_some(DEFAULT_OBJECT_PATH),
        serial,
    ))
}
