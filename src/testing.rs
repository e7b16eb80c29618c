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

//! Recording mocks of the bus-facing collaborators, for tests.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io;
use std::net::IpAddr;
use std::rc::Rc;

use crate::cache::{CacheControl, CacheError};
use crate::description::AddressFamily;
use crate::links::LinkInfo;
use crate::routing::settings::{
    AddressEntry, AppliedConnection, DhcpOptions, FamilySettings, IpConfig,
};
use crate::routing::{NetworkManager, RoutingError, DEVICE_STATE_ACTIVATED};
use crate::serial::{Serial, SerialObserver};
use crate::systemd::{InitSystem, JobKind, SystemdError};

////////////////////////////////////////////////////////////////////////
// CACHE                                                              //
////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct CacheState {
    commands: Vec<String>,
    configuration: Option<String>,
    fail_next: bool,
}

/// A [`CacheControl`] that records commands.
#[derive(Clone, Debug, Default)]
pub struct MockCache(Rc<RefCell<CacheState>>);

impl MockCache {
    pub fn commands(&self) -> Vec<String> {
        self.0.borrow().commands.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().commands.clear();
    }

    pub fn configuration(&self) -> Option<String> {
        self.0.borrow().configuration.clone()
    }

    /// Makes the next command or configuration write fail.
    pub fn fail_next(&self) {
        self.0.borrow_mut().fail_next = true;
    }
}

impl CacheControl for MockCache {
    fn run(&mut self, args: &[String]) -> Result<(), CacheError> {
        let mut state = self.0.borrow_mut();
        let command = args.join(" ");
        if std::mem::take(&mut state.fail_next) {
            return Err(CacheError::Command {
                program: "mock-control".to_owned(),
                command,
                status: "exit status: 1".to_owned(),
                output: "error".to_owned(),
            });
        }
        if command != "status" {
            state.commands.push(command);
        }
        Ok(())
    }

    fn write_configuration(&mut self, contents: &str) -> Result<(), CacheError> {
        let mut state = self.0.borrow_mut();
        if std::mem::take(&mut state.fail_next) {
            return Err(CacheError::Write {
                path: "mock.conf".into(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "error"),
            });
        }
        state.configuration = Some(contents.to_owned());
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// INIT SYSTEM                                                        //
////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
struct InitState {
    submitted: Vec<(JobKind, String)>,
    ids: Vec<u32>,
    subscribed: bool,
    refuse: bool,
}

/// An [`InitSystem`] that records jobs and hands out increasing IDs.
#[derive(Clone, Debug, Default)]
pub struct MockInit(Rc<RefCell<InitState>>);

impl MockInit {
    pub fn submitted(&self) -> Vec<(JobKind, String)> {
        self.0.borrow().submitted.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.0.borrow().subscribed
    }

    /// The ID of the most recently submitted job.
    pub fn last_id(&self) -> u32 {
        self.0.borrow().ids.last().copied().unwrap_or(0)
    }

    /// Makes submissions fail.
    pub fn refuse_jobs(&self, refuse: bool) {
        self.0.borrow_mut().refuse = refuse;
    }
}

impl InitSystem for MockInit {
    fn subscribe(&mut self) -> Result<(), SystemdError> {
        self.0.borrow_mut().subscribed = true;
        Ok(())
    }

    fn unsubscribe(&mut self) -> Result<(), SystemdError> {
        self.0.borrow_mut().subscribed = false;
        Ok(())
    }

    fn submit(&mut self, kind: JobKind, unit: &str) -> Result<u32, SystemdError> {
        let mut state = self.0.borrow_mut();
        if state.refuse {
            return Err(SystemdError::call(
                kind.method(),
                io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
            ));
        }
        let id = 100 + state.ids.len() as u32;
        state.ids.push(id);
        state.submitted.push((kind, unit.to_owned()));
        Ok(id)
    }
}

////////////////////////////////////////////////////////////////////////
// LINKS                                                              //
////////////////////////////////////////////////////////////////////////

/// A fixed set of interfaces.
#[derive(Clone, Debug)]
pub struct MockLinks {
    links: Vec<(u32, &'static str, bool)>,
}

impl MockLinks {
    /// `lo` (1), `eth0` (2), wireless `wlan0` (3) and `eth1` (4).
    pub fn standard() -> Self {
        Self {
            links: vec![
                (1, "lo", false),
                (2, "eth0", false),
                (3, "wlan0", true),
                (4, "eth1", false),
            ],
        }
    }
}

impl LinkInfo for MockLinks {
    fn name_of(&self, index: u32) -> Option<String> {
        self.links
            .iter()
            .find(|(i, _, _)| *i == index)
            .map(|(_, name, _)| name.to_string())
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        self.links
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(index, _, _)| *index)
    }

    fn is_wireless(&self, name: &str) -> bool {
        self.links.iter().any(|(_, n, w)| *n == name && *w)
    }
}

////////////////////////////////////////////////////////////////////////
// NETWORK MANAGER                                                    //
////////////////////////////////////////////////////////////////////////

#[derive(Debug)]
struct MockDevice {
    index: u32,
    state: u32,
    connection: AppliedConnection,
    ip4: IpConfig,
    ip6: IpConfig,
    dhcp4: Option<DhcpOptions>,
    dhcp6: Option<DhcpOptions>,
    reapplies: usize,
}

impl MockDevice {
    fn new(index: u32, ipv4: FamilySettings, ipv6: FamilySettings) -> Self {
        let ip = |s: &FamilySettings| IpConfig {
            gateway: s.gateway,
            addresses: s.addresses.clone(),
            routes: s.routes.clone(),
        };
        Self {
            index,
            state: DEVICE_STATE_ACTIVATED,
            ip4: ip(&ipv4),
            ip6: ip(&ipv6),
            connection: AppliedConnection {
                version: 1,
                ipv4,
                ipv6,
            },
            dhcp4: None,
            dhcp6: None,
            reapplies: 0,
        }
    }

    fn path(&self) -> String {
        format!("/org/freedesktop/NetworkManager/Devices/{}", self.index)
    }

    fn sync(&mut self) {
        self.ip4.routes = self.connection.ipv4.routes.clone();
        self.ip6.routes = self.connection.ipv6.routes.clone();
    }
}

#[derive(Debug, Default)]
struct NmState {
    devices: BTreeMap<String, MockDevice>,
    lag: bool,
}

impl NmState {
    fn by_path(&mut self, path: &str) -> Result<&mut MockDevice, RoutingError> {
        self.devices
            .values_mut()
            .find(|d| d.path() == path)
            .ok_or_else(|| RoutingError::DeviceNotFound(path.to_owned()))
    }
}

fn family(method: &str, address: &str, prefix: u8, gateway: &str) -> FamilySettings {
    FamilySettings {
        method: method.to_owned(),
        gateway: Some(gateway.parse().unwrap()),
        addresses: vec![AddressEntry {
            address: address.parse().unwrap(),
            prefix,
        }],
        routes: Vec::new(),
    }
}

fn ignored() -> FamilySettings {
    FamilySettings {
        method: "ignore".to_owned(),
        ..FamilySettings::default()
    }
}

/// A [`NetworkManager`] whose IP configurations follow reapplied
/// connections immediately, unless told to lag.
#[derive(Clone, Debug, Default)]
pub struct MockNetworkManager(Rc<RefCell<NmState>>);

impl MockNetworkManager {
    /// Activated devices matching [`MockLinks::standard`]:
    ///
    /// * `eth0`: 10.0.0.1/24 via 10.0.0.254, 2001:db8:1::1/64 via
    ///   2001:db8:1::fffe;
    /// * `wlan0`: 192.168.1.10/24 via 192.168.1.1;
    /// * `eth1`: 172.16.0.1/24 via 172.16.0.254.
    pub fn standard() -> Self {
        let mut state = NmState::default();
        state.devices.insert(
            "eth0".to_owned(),
            MockDevice::new(
                2,
                family("manual", "10.0.0.1", 24, "10.0.0.254"),
                family("manual", "2001:db8:1::1", 64, "2001:db8:1::fffe"),
            ),
        );
        state.devices.insert(
            "wlan0".to_owned(),
            MockDevice::new(3, family("manual", "192.168.1.10", 24, "192.168.1.1"), ignored()),
        );
        state.devices.insert(
            "eth1".to_owned(),
            MockDevice::new(4, family("manual", "172.16.0.1", 24, "172.16.0.254"), ignored()),
        );
        Self(Rc::new(RefCell::new(state)))
    }

    fn with_device<T>(&self, name: &str, f: impl FnOnce(&mut MockDevice) -> T) -> T {
        let mut state = self.0.borrow_mut();
        let lag = state.lag;
        let device = state.devices.get_mut(name).unwrap();
        let result = f(device);
        if !lag {
            device.sync();
        }
        result
    }

    pub fn device(&self, name: &str) -> String {
        self.0.borrow().devices[name].path()
    }

    pub fn connection(&self, name: &str) -> AppliedConnection {
        self.0.borrow().devices[name].connection.clone()
    }

    pub fn edit_connection(&self, name: &str, f: impl FnOnce(&mut AppliedConnection)) {
        self.with_device(name, |d| f(&mut d.connection));
    }

    pub fn set_device_state(&self, name: &str, state: u32) {
        self.with_device(name, |d| d.state = state);
    }

    /// Changes the gateway of the gateway's family, in both the
    /// connection and the live configuration.
    pub fn set_gateway(&self, name: &str, gateway: IpAddr) {
        self.with_device(name, |d| match AddressFamily::of(&gateway) {
            AddressFamily::V4 => {
                d.connection.ipv4.gateway = Some(gateway);
                d.ip4.gateway = Some(gateway);
            }
            AddressFamily::V6 => {
                d.connection.ipv6.gateway = Some(gateway);
                d.ip6.gateway = Some(gateway);
            }
        });
    }

    pub fn clear_gateways(&self, name: &str) {
        self.with_device(name, |d| {
            d.connection.ipv4.gateway = None;
            d.connection.ipv6.gateway = None;
            d.ip4.gateway = None;
            d.ip6.gateway = None;
        });
    }

    pub fn set_dhcp_routers(&self, name: &str, routers: &[&str]) {
        self.with_device(name, |d| {
            let lease = d.dhcp4.get_or_insert_with(DhcpOptions::default);
            lease.routers = routers.iter().map(|r| r.parse().unwrap()).collect();
        });
    }

    pub fn set_dhcp_address(&self, name: &str, address: AddressEntry) {
        self.with_device(name, |d| {
            d.dhcp4.get_or_insert_with(DhcpOptions::default).address = Some(address);
        });
    }

    pub fn set_lag(&self, lag: bool) {
        self.0.borrow_mut().lag = lag;
    }

    /// Brings every live configuration in line with its connection.
    pub fn sync_ip_configs(&self) {
        for device in self.0.borrow_mut().devices.values_mut() {
            device.sync();
        }
    }

    pub fn ip_config_path(&self, name: &str, family: AddressFamily) -> String {
        let index = self.0.borrow().devices[name].index;
        ip_config_path(index, family)
    }

    pub fn reapply_count(&self, name: &str) -> usize {
        self.0.borrow().devices[name].reapplies
    }

    pub fn total_reapplies(&self) -> usize {
        self.0.borrow().devices.values().map(|d| d.reapplies).sum()
    }
}

fn ip_config_path(index: u32, family: AddressFamily) -> String {
    match family {
        AddressFamily::V4 => format!("/org/freedesktop/NetworkManager/IP4Config/{}", index),
        AddressFamily::V6 => format!("/org/freedesktop/NetworkManager/IP6Config/{}", index),
    }
}

impl NetworkManager for MockNetworkManager {
    fn device_path(&mut self, interface: &str) -> Result<String, RoutingError> {
        self.0
            .borrow()
            .devices
            .get(interface)
            .map(MockDevice::path)
            .ok_or_else(|| RoutingError::DeviceNotFound(interface.to_owned()))
    }

    fn device_state(&mut self, device: &str) -> Result<u32, RoutingError> {
        Ok(self.0.borrow_mut().by_path(device)?.state)
    }

    fn applied_connection(&mut self, device: &str) -> Result<AppliedConnection, RoutingError> {
        Ok(self.0.borrow_mut().by_path(device)?.connection.clone())
    }

    fn reapply(
        &mut self,
        device: &str,
        connection: &AppliedConnection,
    ) -> Result<(), RoutingError> {
        let mut state = self.0.borrow_mut();
        let lag = state.lag;
        let device = state.by_path(device)?;
        device.connection = AppliedConnection {
            version: device.connection.version + 1,
            ..connection.clone()
        };
        device.reapplies += 1;
        if !lag {
            device.sync();
        }
        Ok(())
    }

    fn ip_config(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, IpConfig)>, RoutingError> {
        let mut state = self.0.borrow_mut();
        let device = state.by_path(device)?;
        if device.connection.family(family).method == "ignore" {
            return Ok(None);
        }
        let config = match family {
            AddressFamily::V4 => device.ip4.clone(),
            AddressFamily::V6 => device.ip6.clone(),
        };
        Ok(Some((ip_config_path(device.index, family), config)))
    }

    fn dhcp_options(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, DhcpOptions)>, RoutingError> {
        let mut state = self.0.borrow_mut();
        let device = state.by_path(device)?;
        let (lease, kind) = match family {
            AddressFamily::V4 => (&device.dhcp4, "DHCP4Config"),
            AddressFamily::V6 => (&device.dhcp6, "DHCP6Config"),
        };
        Ok(lease.clone().map(|options| {
            (
                format!("/org/freedesktop/NetworkManager/{}/{}", kind, device.index),
                options,
            )
        }))
    }
}

////////////////////////////////////////////////////////////////////////
// SERIAL OBSERVER                                                    //
////////////////////////////////////////////////////////////////////////

/// A [`SerialObserver`] that records every published serial.
#[derive(Clone, Debug, Default)]
pub struct MockObserver(Rc<RefCell<Vec<u32>>>);

impl MockObserver {
    pub fn published(&self) -> Vec<u32> {
        self.0.borrow().clone()
    }
}

impl SerialObserver for MockObserver {
    fn serial_changed(&mut self, serial: Serial) {
        self.0.borrow_mut().push(serial.get());
    }
}
