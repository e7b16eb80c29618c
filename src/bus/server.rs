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

//! The interface objects served on the system bus.
//!
//! Method handlers run on the bus connection's executor. They only decode
//! their arguments and pass them to the event loop as a [`Call`], then
//! await its reply, so other calls keep being dispatched meanwhile.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::oneshot;
use zbus::blocking::Connection;
use zbus::fdo;
use zbus::zvariant::OwnedValue;

use super::values;
use crate::daemon::{Call, Input};
use crate::ipc::compat::{LinkCall, RawLinkServer};
use crate::serial::{Serial, SerialObserver};

pub const RESOLVE1_NAME: &str = "org.freedesktop.resolve1";
pub const RESOLVE1_PATH: &str = "/org/freedesktop/resolve1";

const GONE: &str = "the daemon is shutting down";

/// Sends a call to the event loop and waits for its reply. Returns
/// [`None`] if the event loop has ended.
async fn request<T>(
    inputs: &Sender<Input>,
    call: impl FnOnce(oneshot::Sender<T>) -> Call,
) -> Option<T> {
    let (reply, replies) = oneshot::channel();
    inputs.send(Input::Call(call(reply))).ok()?;
    replies.await.ok()
}

/// The committed configuration serial, shared between the native
/// interface and the observer that publishes it.
pub type SharedSerial = Arc<AtomicU32>;

/// Creates a [`SharedSerial`] holding the initial serial.
pub fn shared_serial() -> SharedSerial {
    Arc::new(AtomicU32::new(Serial::INITIAL.get()))
}

////////////////////////////////////////////////////////////////////////
// NATIVE INTERFACE                                                   //
////////////////////////////////////////////////////////////////////////

/// The daemon's own management interface.
pub struct NativeInterface {
    inputs: Sender<Input>,
    serial: SharedSerial,
}

impl NativeInterface {
    pub fn new(inputs: Sender<Input>, serial: SharedSerial) -> Self {
        Self { inputs, serial }
    }
}

#[zbus::interface(name = "com.redhat.dnsconfd.Manager")]
impl NativeInterface {
    /// Replaces the dynamic servers. Returns the configuration serial
    /// that will reflect them, or 0 and the reason for a rejection.
    async fn update(&self, servers: Vec<HashMap<String, OwnedValue>>, mode: u32) -> (u32, String) {
        let records = match servers
            .iter()
            .map(values::server_record)
            .collect::<Result<Vec<_>, _>>()
        {
            Ok(records) => records,
            Err(e) => {
                warn!("Rejecting update: {}.", e);
                return (0, e.to_string());
            }
        };
        request(&self.inputs, |reply| Call::Update {
            records,
            mode,
            reply,
        })
        .await
        .unwrap_or_else(|| (0, GONE.to_owned()))
    }

    async fn status(&self, json: bool) -> String {
        request(&self.inputs, |reply| Call::Status { json, reply })
            .await
            .unwrap_or_else(|| GONE.to_owned())
    }

    async fn reload(&self) -> (bool, String) {
        request(&self.inputs, |reply| Call::Reload { reply })
            .await
            .unwrap_or_else(|| (false, GONE.to_owned()))
    }

    #[zbus(property, name = "configuration_serial")]
    fn configuration_serial(&self) -> u32 {
        self.serial.load(Ordering::Acquire)
    }
}

/// Publishes committed serials as the native interface's property.
pub struct BusObserver {
    connection: Connection,
    /// Where the native interface is served, if it is.
    path: Option<String>,
    serial: SharedSerial,
}

impl BusObserver {
    pub fn new(connection: Connection, path: Option<&str>, serial: SharedSerial) -> Self {
        Self {
            connection,
            path: path.map(ToOwned::to_owned),
            serial,
        }
    }

    /// Emits the property change. Only a shared borrow of the interface
    /// is taken, so handlers awaiting the event loop never hold it up.
    fn publish(&self, path: &str) -> zbus::Result<()> {
        let iface_ref = self
            .connection
            .object_server()
            .interface::<_, NativeInterface>(path)?;
        let iface = iface_ref.get();
        zbus::block_on(iface.configuration_serial_changed(iface_ref.signal_context()))
    }
}

impl SerialObserver for BusObserver {
    fn serial_changed(&mut self, serial: Serial) {
        self.serial.store(serial.get(), Ordering::Release);
        let path = match self.path {
            Some(ref path) => path,
            None => return,
        };
        debug!("Publishing configuration serial {}.", serial);
        if let Err(e) = self.publish(path) {
            warn!("Failed to publish configuration serial {}: {}.", serial, e);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// RESOLVER-COMPATIBLE INTERFACE                                      //
////////////////////////////////////////////////////////////////////////

/// The subset of the resolver manager interface that network
/// configuration tools use to push per-link settings.
pub struct Resolve1Interface {
    inputs: Sender<Input>,
}

impl Resolve1Interface {
    pub fn new(inputs: Sender<Input>) -> Self {
        Self { inputs }
    }

    async fn link(&self, call: LinkCall) -> fdo::Result<()> {
        match request(&self.inputs, |reply| Call::Link { call, reply }).await {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => {
                warn!("Rejecting link call: {}.", e);
                Err(fdo::Error::InvalidArgs(e.to_string()))
            }
            None => Err(fdo::Error::Failed(GONE.to_owned())),
        }
    }
}

#[zbus::interface(name = "org.freedesktop.resolve1.Manager")]
impl Resolve1Interface {
    #[zbus(name = "SetLinkDNS")]
    async fn set_link_dns(
        &self,
        ifindex: i32,
        addresses: Vec<(i32, Vec<u8>)>,
    ) -> fdo::Result<()> {
        let servers = addresses
            .into_iter()
            .map(|(family, address)| RawLinkServer::new(family, address))
            .collect();
        self.link(LinkCall::Dns {
            index: ifindex,
            servers,
        })
        .await
    }

    #[zbus(name = "SetLinkDNSEx")]
    async fn set_link_dns_ex(
        &self,
        ifindex: i32,
        addresses: Vec<(i32, Vec<u8>, u16, String)>,
    ) -> fdo::Result<()> {
        let servers = addresses
            .into_iter()
            .map(|(family, address, port, name)| RawLinkServer {
                family,
                address,
                port,
                name,
            })
            .collect();
        self.link(LinkCall::Dns {
            index: ifindex,
            servers,
        })
        .await
    }

    #[zbus(name = "SetLinkDomains")]
    async fn set_link_domains(
        &self,
        ifindex: i32,
        domains: Vec<(String, bool)>,
    ) -> fdo::Result<()> {
        self.link(LinkCall::Domains {
            index: ifindex,
            domains,
        })
        .await
    }

    #[zbus(name = "SetLinkDefaultRoute")]
    async fn set_link_default_route(&self, ifindex: i32, enable: bool) -> fdo::Result<()> {
        self.link(LinkCall::DefaultRoute {
            index: ifindex,
            enable,
        })
        .await
    }

    #[zbus(name = "SetLinkDNSOverTLS")]
    async fn set_link_dns_over_tls(&self, ifindex: i32, mode: String) -> fdo::Result<()> {
        self.link(LinkCall::DnsOverTls {
            index: ifindex,
            mode,
        })
        .await
    }

    #[zbus(name = "SetLinkDNSSEC")]
    async fn set_link_dnssec(&self, ifindex: i32, mode: String) -> fdo::Result<()> {
        self.link(LinkCall::Dnssec {
            index: ifindex,
            mode,
        })
        .await
    }

    #[zbus(name = "SetLinkLLMNR")]
    async fn set_link_llmnr(&self, _ifindex: i32, _mode: String) -> fdo::Result<()> {
        self.link(LinkCall::Ignored {
            method: "SetLinkLLMNR",
        })
        .await
    }

    #[zbus(name = "SetLinkMulticastDNS")]
    async fn set_link_multicast_dns(&self, _ifindex: i32, _mode: String) -> fdo::Result<()> {
        self.link(LinkCall::Ignored {
            method: "SetLinkMulticastDNS",
        })
        .await
    }

    #[zbus(name = "SetLinkDNSSECNegativeTrustAnchors")]
    async fn set_link_dnssec_negative_trust_anchors(
        &self,
        _ifindex: i32,
        _names: Vec<String>,
    ) -> fdo::Result<()> {
        self.link(LinkCall::Ignored {
            method: "SetLinkDNSSECNegativeTrustAnchors",
        })
        .await
    }

    #[zbus(name = "RevertLink")]
    async fn revert_link(&self, _ifindex: i32) -> fdo::Result<()> {
        self.link(LinkCall::Ignored {
            method: "RevertLink",
        })
        .await
    }

    #[zbus(name = "FlushCaches")]
    async fn flush_caches(&self) -> fdo::Result<()> {
        self.link(LinkCall::Ignored {
            method: "FlushCaches",
        })
        .await
    }

    async fn status(&self, json: bool) -> String {
        request(&self.inputs, |reply| Call::Status { json, reply })
            .await
            .unwrap_or_else(|| GONE.to_owned())
    }

    async fn reload(&self) -> (bool, String) {
        request(&self.inputs, |reply| Call::Reload { reply })
            .await
            .unwrap_or_else(|| (false, GONE.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;

    use super::*;

    #[test]
    fn requests_wait_for_the_event_loop() {
        let (inputs, receiver) = mpsc::channel();
        let event_loop = thread::spawn(move || match receiver.recv().unwrap() {
            Input::Call(Call::Reload { reply }) => reply.send((true, "ok".to_owned())).unwrap(),
            other => panic!("unexpected input {:?}", other),
        });
        let answer = zbus::block_on(request(&inputs, |reply| Call::Reload { reply }));
        assert_eq!(answer, Some((true, "ok".to_owned())));
        event_loop.join().unwrap();
    }

    #[test]
    fn pending_calls_do_not_hold_up_each_other() {
        let (inputs, receiver) = mpsc::channel();
        let event_loop = thread::spawn(move || {
            let first = receiver.recv().unwrap();
            let second = receiver.recv().unwrap();
            for input in [second, first] {
                match input {
                    Input::Call(Call::Status { json, reply }) => {
                        reply.send(format!("json {}", json)).unwrap()
                    }
                    other => panic!("unexpected input {:?}", other),
                }
            }
        });
        let interface = NativeInterface::new(inputs, shared_serial());
        let (text, json) =
            zbus::block_on(async { tokio::join!(interface.status(false), interface.status(true)) });
        assert_eq!(text, "json false");
        assert_eq!(json, "json true");
        event_loop.join().unwrap();
    }

    #[test]
    fn requests_fail_once_the_event_loop_is_gone() {
        let (inputs, receiver) = mpsc::channel::<Input>();
        drop(receiver);
        let interface = NativeInterface::new(inputs, shared_serial());
        assert_eq!(zbus::block_on(interface.reload()), (false, GONE.to_owned()));
    }

    #[test]
    fn the_property_reads_the_shared_serial() {
        let (inputs, _receiver) = mpsc::channel::<Input>();
        let serial = shared_serial();
        let interface = NativeInterface::new(inputs, serial.clone());
        assert_eq!(interface.configuration_serial(), Serial::INITIAL.get());
        serial.store(7, Ordering::Release);
        assert_eq!(interface.configuration_serial(), 7);
    }

    #[test]
    fn ignored_link_calls_still_reach_the_event_loop() {
        let (inputs, receiver) = mpsc::channel();
        let event_loop = thread::spawn(move || match receiver.recv().unwrap() {
            Input::Call(Call::Link { call, reply }) => {
                assert_eq!(call, LinkCall::Ignored { method: "FlushCaches" });
                reply.send(Ok(())).unwrap();
            }
            other => panic!("unexpected input {:?}", other),
        });
        let interface = Resolve1Interface::new(inputs);
        assert!(zbus::block_on(interface.flush_caches()).is_ok());
        event_loop.join().unwrap();
    }
}
