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

//! Host routes to interface-bound forwarders.
//!
//! A forwarder learned from an interface has to be reached through that
//! interface, even when the default route points elsewhere (a VPN, a
//! second uplink). For every such forwarder that is not on one of the
//! interface's own subnets, the [`RoutingManager`] adds a host route to
//! the device's applied connection in the network manager and reapplies
//! it. Routes it added are remembered as *managed* and are the only ones
//! it ever changes or removes.
//!
//! Reconciliation is split into steps that the state machine drives one
//! at a time, since several of them have to wait for the network manager
//! to catch up:
//!
//! 1. [`subscribe_devices`](RoutingManager::subscribe_devices) picks the
//!    forwarders to route and looks up their devices;
//! 2. [`all_devices_up`](RoutingManager::all_devices_up) waits for the
//!    devices to be activated;
//! 3. [`gather_connections`](RoutingManager::gather_connections) reads
//!    DHCP leases for DHCP-configured families;
//! 4. [`subscribe_ip_configs`](RoutingManager::subscribe_ip_configs) and
//!    [`check_ip_objects`](RoutingManager::check_ip_objects) wait until
//!    the live IP configuration shows every managed route;
//! 5. [`modify_connections`](RoutingManager::modify_connections) adds,
//!    fixes and drops routes and reapplies changed connections;
//! 6. [`remove_redundant_routes`](RoutingManager::remove_redundant_routes)
//!    cleans up interfaces that no longer carry forwarders.
//!
//! Bus signals are delivered as [`NmSignal`]s tagged with the generation
//! of their signal class at the time they were received. Unsubscribing
//! bumps the generations, so signals from an earlier cycle are dropped
//! by [`translate`](RoutingManager::translate).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ipnet::IpNet;
use log::{debug, info, trace, warn};
use serde_json::{json, Value};

use crate::description::{AddressFamily, ServerDescription};
use crate::exit_code::ExitCode;
use crate::fsm::Event;
use crate::links::LinkInfo;

pub mod settings;

use settings::{AppliedConnection, DhcpOptions, IpConfig, RouteEntry};

/// The network manager's device state for an activated device.
pub const DEVICE_STATE_ACTIVATED: u32 = 100;

const FAMILIES: [AddressFamily; 2] = [AddressFamily::V4, AddressFamily::V6];

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// Errors from routing reconciliation.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("network manager call {method} failed")]
    Bus {
        method: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },

    #[error("the network manager has no device for interface {0}")]
    DeviceNotFound(String),

    #[error("malformed {0} from the network manager")]
    Malformed(String),

    #[error("no gateway to {address} on interface {interface}")]
    NoGateway { address: IpAddr, interface: String },

    #[error("failed to reapply the connection on interface {interface}")]
    Reapply {
        interface: String,
        #[source]
        source: Box<RoutingError>,
    },
}

impl RoutingError {
    pub fn bus(method: &str, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Bus {
            method: method.to_owned(),
            source: Box::new(source),
        }
    }

    /// The exit code to report if this error is never recovered from.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::NoGateway { .. } | Self::Reapply { .. } => ExitCode::RouteFailure,
            _ => ExitCode::DbusFailure,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// NETWORK MANAGER INTERFACE                                          //
////////////////////////////////////////////////////////////////////////

/// The network manager calls that routing needs. Devices are identified
/// by their object paths.
pub trait NetworkManager {
    /// Returns the device for the interface called `interface`.
    fn device_path(&mut self, interface: &str) -> Result<String, RoutingError>;

    fn device_state(&mut self, device: &str) -> Result<u32, RoutingError>;

    fn applied_connection(&mut self, device: &str) -> Result<AppliedConnection, RoutingError>;

    /// Reapplies `connection`, which was obtained from
    /// [`applied_connection`](Self::applied_connection) and modified.
    fn reapply(&mut self, device: &str, connection: &AppliedConnection)
        -> Result<(), RoutingError>;

    /// Returns the path and content of the device's IP configuration
    /// object for `family`, if it has one.
    fn ip_config(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, IpConfig)>, RoutingError>;

    /// Returns the path and options of the device's DHCP lease for
    /// `family`, if it has one.
    fn dhcp_options(
        &mut self,
        device: &str,
        family: AddressFamily,
    ) -> Result<Option<(String, DhcpOptions)>, RoutingError>;
}

////////////////////////////////////////////////////////////////////////
// SIGNALS AND GENERATIONS                                            //
////////////////////////////////////////////////////////////////////////

/// A network manager signal relevant to routing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NmSignal {
    /// A device changed state.
    DeviceState {
        path: String,
        new_state: u32,
        old_state: u32,
    },
    /// An IP configuration object, or a device's reference to one,
    /// changed.
    IpConfig { path: String },
    /// A DHCP lease changed.
    Dhcp { path: String },
}

/// The classes of signals with independent generations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalClass {
    DeviceState,
    IpConfig,
    Dhcp,
}

impl NmSignal {
    pub fn class(&self) -> SignalClass {
        match self {
            Self::DeviceState { .. } => SignalClass::DeviceState,
            Self::IpConfig { .. } => SignalClass::IpConfig,
            Self::Dhcp { .. } => SignalClass::Dhcp,
        }
    }
}

/// Subscription generations, shared with the threads that receive
/// signals.
#[derive(Debug, Default)]
pub struct Generations {
    device_state: AtomicU32,
    ip_config: AtomicU32,
    dhcp: AtomicU32,
}

impl Generations {
    fn counter(&self, class: SignalClass) -> &AtomicU32 {
        match class {
            SignalClass::DeviceState => &self.device_state,
            SignalClass::IpConfig => &self.ip_config,
            SignalClass::Dhcp => &self.dhcp,
        }
    }

    pub fn current(&self, class: SignalClass) -> u32 {
        self.counter(class).load(Ordering::SeqCst)
    }

    fn bump(&self, class: SignalClass) {
        self.counter(class).fetch_add(1, Ordering::SeqCst);
    }
}

////////////////////////////////////////////////////////////////////////
// ROUTING MANAGER                                                    //
////////////////////////////////////////////////////////////////////////

/// A forwarder that has to be routed through an interface.
#[derive(Clone, Debug)]
struct BoundServer {
    address: IpAddr,
    interface: u32,
    name: String,
    priority: u32,
    wireless: bool,
}

#[derive(Debug)]
struct Device {
    name: String,
    path: String,
    activated: bool,
}

/// The managed routes of one interface, keyed by destination.
#[derive(Clone, Debug)]
struct ManagedRoutes {
    name: String,
    routes: BTreeMap<IpAddr, RouteEntry>,
}

type FamilyKey = (u32, AddressFamily);

/// Reconciles the network manager's routes with the interface-bound
/// forwarders in use.
pub struct RoutingManager {
    nm: Box<dyn NetworkManager>,
    links: Box<dyn LinkInfo>,
    generations: Arc<Generations>,
    prioritize_wire: bool,
    servers: Vec<BoundServer>,
    devices: BTreeMap<u32, Device>,
    dhcp: BTreeMap<FamilyKey, DhcpOptions>,
    dhcp_paths: HashMap<String, FamilyKey>,
    ip_configs: BTreeMap<FamilyKey, Option<IpConfig>>,
    ip_paths: HashMap<String, FamilyKey>,
    ip_ready: bool,
    routes: BTreeMap<u32, ManagedRoutes>,
}

impl RoutingManager {
    pub fn new(
        nm: Box<dyn NetworkManager>,
        links: Box<dyn LinkInfo>,
        prioritize_wire: bool,
    ) -> Self {
        Self {
            nm,
            links,
            generations: Arc::new(Generations::default()),
            prioritize_wire,
            servers: Vec::new(),
            devices: BTreeMap::new(),
            dhcp: BTreeMap::new(),
            dhcp_paths: HashMap::new(),
            ip_configs: BTreeMap::new(),
            ip_paths: HashMap::new(),
            ip_ready: false,
            routes: BTreeMap::new(),
        }
    }

    /// Returns the generations, for tagging received signals.
    pub fn generations(&self) -> Arc<Generations> {
        self.generations.clone()
    }

    ////////////////////////////////////////////////////////////////////
    // SUBSCRIPTION                                                   //
    ////////////////////////////////////////////////////////////////////

    /// Selects the forwarders to route among `used` and looks up the
    /// state of their devices.
    pub fn subscribe_devices(&mut self, used: &[ServerDescription]) -> Result<(), RoutingError> {
        self.clear_subscriptions();
        self.servers = self.select_servers(used);

        let mut names = BTreeMap::new();
        for server in &self.servers {
            names.insert(server.interface, server.name.clone());
        }
        for (index, name) in names {
            let path = self.nm.device_path(&name)?;
            let state = self.nm.device_state(&path)?;
            trace!("Device {} for {} is in state {}.", path, name, state);
            self.devices.insert(
                index,
                Device {
                    name,
                    path,
                    activated: state == DEVICE_STATE_ACTIVATED,
                },
            );
        }
        debug!(
            "Routing {} forwarders through {} interfaces.",
            self.servers.len(),
            self.devices.len()
        );
        Ok(())
    }

    /// Picks one interface per forwarder address. Higher priority wins;
    /// on a tie a wired interface beats a wireless one if wired
    /// interfaces are prioritized, and the lower index wins otherwise.
    fn select_servers(&self, used: &[ServerDescription]) -> Vec<BoundServer> {
        let mut selected: BTreeMap<IpAddr, BoundServer> = BTreeMap::new();
        for server in used {
            let index = match server.interface {
                Some(index) => index,
                None => continue,
            };
            let name = match self.links.name_of(index) {
                Some(name) => name,
                None => {
                    warn!(
                        "Not routing {} because interface {} has no name.",
                        server.address, index
                    );
                    continue;
                }
            };
            let candidate = BoundServer {
                address: server.address,
                interface: index,
                wireless: self.links.is_wireless(&name),
                name,
                priority: server.priority,
            };
            match selected.get(&server.address) {
                Some(current) if !self.is_better(&candidate, current) => (),
                _ => {
                    selected.insert(server.address, candidate);
                }
            }
        }
        selected.into_values().collect()
    }

    fn is_better(&self, candidate: &BoundServer, current: &BoundServer) -> bool {
        if candidate.interface == current.interface {
            return false;
        }
        if candidate.priority != current.priority {
            return candidate.priority > current.priority;
        }
        if self.prioritize_wire && candidate.wireless != current.wireless {
            return !candidate.wireless;
        }
        candidate.interface < current.interface
    }

    /// Returns whether every device is activated.
    pub fn all_devices_up(&self) -> bool {
        self.devices.values().all(|d| d.activated)
    }

    /// Reads the DHCP leases of every DHCP-configured family.
    pub fn gather_connections(&mut self) -> Result<(), RoutingError> {
        self.dhcp.clear();
        self.dhcp_paths.clear();
        for (&index, device) in &self.devices {
            let connection = self.nm.applied_connection(&device.path)?;
            for family in FAMILIES {
                if !connection.family(family).uses_dhcp() {
                    continue;
                }
                trace!("Interface {} uses DHCP for {}.", device.name, family);
                if let Some((path, options)) = self.nm.dhcp_options(&device.path, family)? {
                    self.dhcp_paths.insert(path, (index, family));
                    self.dhcp.insert((index, family), options);
                }
            }
        }
        Ok(())
    }

    /// Reads the IP configuration objects of every family that has
    /// forwarders or managed routes.
    pub fn subscribe_ip_configs(&mut self) -> Result<(), RoutingError> {
        self.ip_configs.clear();
        self.ip_paths.clear();
        let mut keys = BTreeSet::new();
        for server in &self.servers {
            keys.insert((server.interface, AddressFamily::of(&server.address)));
        }
        for (&index, managed) in &self.routes {
            if self.devices.contains_key(&index) {
                for dest in managed.routes.keys() {
                    keys.insert((index, AddressFamily::of(dest)));
                }
            }
        }
        for key in keys {
            self.refresh_ip_config(key)?;
        }
        Ok(())
    }

    fn refresh_ip_config(&mut self, key: FamilyKey) -> Result<(), RoutingError> {
        let device = match self.devices.get(&key.0) {
            Some(device) => device,
            None => return Ok(()),
        };
        match self.nm.ip_config(&device.path, key.1)? {
            Some((path, config)) => {
                self.ip_paths.retain(|_, k| *k != key);
                self.ip_paths.insert(path, key);
                self.ip_configs.insert(key, Some(config));
            }
            None => {
                self.ip_configs.insert(key, None);
            }
        }
        Ok(())
    }

    /// Refreshes the IP configurations and returns whether they show
    /// every managed route.
    pub fn check_ip_objects(&mut self) -> Result<bool, RoutingError> {
        let keys: Vec<FamilyKey> = self.ip_configs.keys().copied().collect();
        for key in keys {
            self.refresh_ip_config(key)?;
        }
        self.ip_ready = self.ip_objects_ready();
        Ok(self.ip_ready)
    }

    fn ip_objects_ready(&self) -> bool {
        self.routes
            .iter()
            .filter(|(index, _)| self.devices.contains_key(index))
            .all(|(&index, managed)| {
                managed.routes.values().all(|route| {
                    match self.ip_configs.get(&(index, AddressFamily::of(&route.dest))) {
                        Some(Some(config)) => config.has_route(route.dest, route.next_hop),
                        _ => false,
                    }
                })
            })
    }

    /// Forgets all subscriptions and invalidates signals received so
    /// far.
    pub fn unsubscribe(&mut self) {
        self.clear_subscriptions();
        self.generations.bump(SignalClass::DeviceState);
        self.generations.bump(SignalClass::IpConfig);
        self.generations.bump(SignalClass::Dhcp);
    }

    fn clear_subscriptions(&mut self) {
        self.devices.clear();
        self.dhcp.clear();
        self.dhcp_paths.clear();
        self.ip_configs.clear();
        self.ip_paths.clear();
        self.ip_ready = false;
    }

    /// Turns a signal into an event, if it is current and concerns a
    /// subscribed object.
    pub fn translate(&mut self, signal: NmSignal, generation: u32) -> Option<Event> {
        let current = self.generations.current(signal.class());
        if generation != current {
            trace!(
                "Dropping {:?} from generation {} (current is {}).",
                signal,
                generation,
                current
            );
            return None;
        }

        match signal {
            NmSignal::DeviceState {
                path,
                new_state,
                old_state,
            } => {
                let device = self.devices.values_mut().find(|d| d.path == path)?;
                if new_state == DEVICE_STATE_ACTIVATED && old_state != DEVICE_STATE_ACTIVATED {
                    info!("Interface {} is up.", device.name);
                    device.activated = true;
                    Some(Event::InterfaceUp)
                } else if old_state == DEVICE_STATE_ACTIVATED && new_state != DEVICE_STATE_ACTIVATED
                {
                    info!("Interface {} went down.", device.name);
                    device.activated = false;
                    Some(Event::InterfaceDown)
                } else {
                    None
                }
            }
            NmSignal::IpConfig { path } => {
                let keys: Vec<FamilyKey> = match self.ip_paths.get(&path) {
                    Some(&key) => vec![key],
                    None => {
                        let (&index, _) = self.devices.iter().find(|(_, d)| d.path == path)?;
                        self.ip_configs
                            .keys()
                            .filter(|(i, _)| *i == index)
                            .copied()
                            .collect()
                    }
                };
                for key in keys {
                    if let Err(e) = self.refresh_ip_config(key) {
                        warn!("Failed to read IP configuration: {}.", e);
                        self.ip_ready = false;
                        return Some(Event::IpNotReady);
                    }
                }
                let ready = self.ip_objects_ready();
                if ready == self.ip_ready {
                    return None;
                }
                self.ip_ready = ready;
                Some(if ready {
                    Event::IpReady
                } else {
                    Event::IpNotReady
                })
            }
            NmSignal::Dhcp { path } => {
                let (index, family) = *self.dhcp_paths.get(&path)?;
                debug!("DHCP lease for {} on interface {} changed.", family, index);
                Some(Event::DhcpChange)
            }
        }
    }

    ////////////////////////////////////////////////////////////////////
    // RECONCILIATION                                                 //
    ////////////////////////////////////////////////////////////////////

    /// Brings every device's routes in line with the forwarders bound to
    /// it. Returns whether any connection was reapplied.
    pub fn modify_connections(&mut self) -> Result<bool, RoutingError> {
        let indexes: Vec<u32> = self.devices.keys().copied().collect();
        let mut changed = false;
        for index in indexes {
            changed |= self.modify_connection(index)?;
        }
        Ok(changed)
    }

    fn modify_connection(&mut self, index: u32) -> Result<bool, RoutingError> {
        let (name, path) = match self.devices.get(&index) {
            Some(device) => (device.name.clone(), device.path.clone()),
            None => return Ok(false),
        };
        let mut connection = self.nm.applied_connection(&path)?;
        let owned = self
            .routes
            .get(&index)
            .map(|m| m.routes.clone())
            .unwrap_or_default();
        let addresses: Vec<IpAddr> = self
            .servers
            .iter()
            .filter(|s| s.interface == index)
            .map(|s| s.address)
            .collect();

        let mut valid = BTreeMap::new();
        let mut dirty = false;
        for address in addresses {
            if self.is_local(index, &connection, address) {
                trace!("{} is local to {}, no route needed.", address, name);
                continue;
            }
            let gateway = self.find_gateway(index, &connection, address);
            let no_gateway = || RoutingError::NoGateway {
                address,
                interface: name.clone(),
            };
            let settings = connection.family_mut(AddressFamily::of(&address));
            match settings.host_route_mut(address) {
                Some(route) if gateway.is_some() && route.next_hop == gateway => {
                    if owned.contains_key(&address) {
                        valid.insert(address, route.clone());
                    }
                }
                Some(route) if owned.contains_key(&address) => {
                    let gateway = gateway.ok_or_else(no_gateway)?;
                    debug!(
                        "Moving route to {} on {} to gateway {}.",
                        address, name, gateway
                    );
                    route.next_hop = Some(gateway);
                    valid.insert(address, route.clone());
                    dirty = true;
                }
                Some(_) => {
                    debug!(
                        "Leaving the existing route to {} on {} alone.",
                        address, name
                    );
                }
                None => {
                    let gateway = gateway.ok_or_else(no_gateway)?;
                    debug!("Adding route to {} via {} on {}.", address, gateway, name);
                    let route = RouteEntry::host(address, gateway);
                    settings.routes.push(route.clone());
                    valid.insert(address, route);
                    dirty = true;
                }
            }
        }

        for route in owned.values() {
            if valid.contains_key(&route.dest) {
                continue;
            }
            debug!("Removing route to {} on {}.", route.dest, name);
            let settings = connection.family_mut(AddressFamily::of(&route.dest));
            let before = settings.routes.len();
            settings
                .routes
                .retain(|r| !(r.is_host_route() && r.dest == route.dest));
            dirty |= settings.routes.len() != before;
        }

        if dirty {
            info!(
                "Reapplying the connection on {} with {} managed routes.",
                name,
                valid.len()
            );
            self.nm
                .reapply(&path, &connection)
                .map_err(|e| RoutingError::Reapply {
                    interface: name.clone(),
                    source: Box::new(e),
                })?;
        }
        if valid.is_empty() {
            self.routes.remove(&index);
        } else {
            self.routes.insert(
                index,
                ManagedRoutes {
                    name,
                    routes: valid,
                },
            );
        }
        Ok(dirty)
    }

    /// Returns whether `address` is on one of the interface's subnets.
    fn is_local(&self, index: u32, connection: &AppliedConnection, address: IpAddr) -> bool {
        let family = AddressFamily::of(&address);
        let key = (index, family);
        connection
            .family(family)
            .addresses
            .iter()
            .any(|a| a.contains(&address))
            || self
                .dhcp
                .get(&key)
                .and_then(|lease| lease.address)
                .map_or(false, |a| a.contains(&address))
            || self
                .ip_configs
                .get(&key)
                .and_then(Option::as_ref)
                .map_or(false, |c| c.addresses.iter().any(|a| a.contains(&address)))
    }

    /// Finds the gateway through which `address` is reached on the
    /// interface: the live configuration's gateway, the connection's
    /// gateway, the DHCP router, then the most specific covering route in
    /// the connection or the DHCP lease.
    fn find_gateway(
        &self,
        index: u32,
        connection: &AppliedConnection,
        address: IpAddr,
    ) -> Option<IpAddr> {
        let family = AddressFamily::of(&address);
        let settings = connection.family(family);
        let live = self.ip_configs.get(&(index, family)).and_then(Option::as_ref);
        let lease = self.dhcp.get(&(index, family));
        let same_family = |gateway: &IpAddr| AddressFamily::of(gateway) == family;

        live.and_then(|c| c.gateway)
            .filter(same_family)
            .or_else(|| settings.gateway.filter(same_family))
            .or_else(|| lease.and_then(|l| l.routers.first().copied()))
            .or_else(|| {
                longest_prefix(
                    settings
                        .routes
                        .iter()
                        .filter(|r| !r.is_host_route())
                        .filter_map(|r| Some((r.network()?, r.next_hop?))),
                    address,
                )
            })
            .or_else(|| {
                longest_prefix(
                    lease.into_iter().flat_map(|l| l.static_routes.iter().copied()),
                    address,
                )
            })
    }

    /// Removes the routes of interfaces that no longer carry forwarders.
    /// Failures are logged; the routes are forgotten either way.
    pub fn remove_redundant_routes(&mut self) {
        let stale: Vec<u32> = self
            .routes
            .keys()
            .filter(|index| !self.devices.contains_key(index))
            .copied()
            .collect();
        for index in stale {
            if let Some(managed) = self.routes.remove(&index) {
                info!("Removing the routes of interface {}.", managed.name);
                if let Err(e) = self.strip_routes(&managed) {
                    warn!("Failed to remove routes from {}: {}.", managed.name, e);
                }
            }
        }
    }

    /// Removes every managed route. Failures are logged and skipped.
    pub fn remove_routes(&mut self) {
        for (_, managed) in std::mem::take(&mut self.routes) {
            info!("Removing the routes of interface {}.", managed.name);
            if let Err(e) = self.strip_routes(&managed) {
                warn!("Failed to remove routes from {}: {}.", managed.name, e);
            }
        }
    }

    fn strip_routes(&mut self, managed: &ManagedRoutes) -> Result<(), RoutingError> {
        let path = self.nm.device_path(&managed.name)?;
        let mut connection = self.nm.applied_connection(&path)?;
        let mut changed = false;
        for family in FAMILIES {
            let settings = connection.family_mut(family);
            let before = settings.routes.len();
            settings
                .routes
                .retain(|r| !(r.is_host_route() && managed.routes.contains_key(&r.dest)));
            changed |= settings.routes.len() != before;
        }
        if changed {
            self.nm.reapply(&path, &connection)?;
        }
        Ok(())
    }

    ////////////////////////////////////////////////////////////////////
    // INSPECTION                                                     //
    ////////////////////////////////////////////////////////////////////

    /// Returns the managed routes as `(interface index, route)` pairs.
    pub fn managed_routes(&self) -> Vec<(u32, RouteEntry)> {
        self.routes
            .iter()
            .flat_map(|(&index, managed)| managed.routes.values().map(move |r| (index, r.clone())))
            .collect()
    }

    /// Renders the managed routes for status reports.
    pub fn routes_json(&self) -> Value {
        self.routes
            .values()
            .flat_map(|managed| {
                managed.routes.values().map(move |route| {
                    json!({
                        "interface": managed.name,
                        "destination": route.dest.to_string(),
                        "prefix": route.prefix,
                        "gateway": route.next_hop.map(|g| g.to_string()),
                    })
                })
            })
            .collect()
    }
}

impl fmt::Debug for RoutingManager {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RoutingManager")
            .field("servers", &self.servers)
            .field("devices", &self.devices)
            .field("routes", &self.routes)
            .finish()
    }
}

/// Returns the gateway of the most specific network in `routes` that
/// contains `address`.
fn longest_prefix(routes: impl Iterator<Item = (IpNet, IpAddr)>, address: IpAddr) -> Option<IpAddr> {
    routes
        .filter(|(network, gateway)| {
            network.contains(&address) && AddressFamily::of(gateway) == AddressFamily::of(&address)
        })
        .max_by_key(|(network, _)| network.prefix_len())
        .map(|(_, gateway)| gateway)
}
