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

//! Listener threads turning bus signals into event-loop inputs.
//!
//! Network manager signals are tagged with the generation of their
//! class when they arrive, so the core can tell which ones predate its
//! latest subscription.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use log::{debug, trace, warn};
use zbus::blocking::{Connection, MessageIterator};
use zbus::message::Type as MessageType;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};
use zbus::{MatchRule, Message};

use crate::daemon::Input;
use crate::fsm::Event;
use crate::routing::{Generations, NmSignal};
use crate::thread::{self, ThreadGroup};

const NM_SERVICE: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const DEVICE_INTERFACE: &str = "org.freedesktop.NetworkManager.Device";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
const SYSTEMD_SERVICE: &str = "org.freedesktop.systemd1";
const SYSTEMD_INTERFACE: &str = "org.freedesktop.systemd1.Manager";

/// How many unread signals each listener queues.
const MAX_QUEUED: usize = 64;

/// Starts the listeners for device state changes, property changes of
/// network manager objects and init-system job completions.
pub fn start_listeners(
    group: &Arc<ThreadGroup>,
    connection: &Connection,
    inputs: &Sender<Input>,
    generations: &Arc<Generations>,
) -> Result<(), thread::Error> {
    let nm_listener = |member: &'static str, interface: &'static str| {
        let connection = connection.clone();
        let inputs = inputs.clone();
        let generations = generations.clone();
        move || {
            let rule = MatchRule::builder()
                .msg_type(MessageType::Signal)
                .sender(NM_SERVICE)
                .and_then(|b| b.interface(interface))
                .and_then(|b| b.member(member))
                .and_then(|b| b.path_namespace(NM_PATH))
                .map(|b| b.build());
            listen(&connection, rule, |message| {
                let signal = match nm_signal(message) {
                    Some(signal) => signal,
                    None => return true,
                };
                let generation = generations.current(signal.class());
                trace!("Received {:?} in generation {}.", signal, generation);
                inputs.send(Input::Signal(signal, generation)).is_ok()
            })
        }
    };
    group.start_listener(
        "device state listener",
        nm_listener("StateChanged", DEVICE_INTERFACE),
    )?;
    group.start_listener(
        "properties listener",
        nm_listener("PropertiesChanged", PROPERTIES_INTERFACE),
    )?;

    let connection = connection.clone();
    let inputs = inputs.clone();
    group.start_listener("job listener", move || {
        let rule = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .sender(SYSTEMD_SERVICE)
            .and_then(|b| b.interface(SYSTEMD_INTERFACE))
            .and_then(|b| b.member("JobRemoved"))
            .map(|b| b.build());
        listen(&connection, rule, |message| match job_removed(message) {
            Some(event) => inputs.send(Input::Event(event)).is_ok(),
            None => true,
        })
    })
}

/// Feeds every message matching `rule` to `handle` until it returns
/// false or the stream ends.
fn listen<F>(connection: &Connection, rule: zbus::Result<MatchRule<'static>>, mut handle: F)
where
    F: FnMut(&Message) -> bool,
{
    let messages = match rule
        .and_then(|rule| MessageIterator::for_match_rule(rule, connection, Some(MAX_QUEUED)))
    {
        Ok(messages) => messages,
        Err(e) => {
            warn!("Failed to subscribe to signals: {}.", e);
            return;
        }
    };
    for message in messages {
        match message {
            Ok(message) => {
                if !handle(&message) {
                    debug!("Event loop is gone, listener ends.");
                    return;
                }
            }
            Err(e) => warn!("Failed to receive a signal: {}.", e),
        }
    }
}

fn nm_signal(message: &Message) -> Option<NmSignal> {
    let header = message.header();
    let path = header.path()?.as_str().to_owned();
    match header.member()?.as_str() {
        "StateChanged" => {
            let (new_state, old_state, _reason): (u32, u32, u32) =
                message.body().deserialize().ok()?;
            Some(NmSignal::DeviceState {
                path,
                new_state,
                old_state,
            })
        }
        "PropertiesChanged" => {
            let (interface, changed, _invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
                message.body().deserialize().ok()?;
            properties_signal(path, &interface, &changed)
        }
        _ => None,
    }
}

/// Classifies a property change of a network manager object.
fn properties_signal(
    path: String,
    interface: &str,
    changed: &HashMap<String, OwnedValue>,
) -> Option<NmSignal> {
    match interface.strip_prefix("org.freedesktop.NetworkManager.")? {
        "IP4Config" | "IP6Config" => Some(NmSignal::IpConfig { path }),
        "DHCP4Config" | "DHCP6Config" => Some(NmSignal::Dhcp { path }),
        "Device" if changed.contains_key("Ip4Config") || changed.contains_key("Ip6Config") => {
            Some(NmSignal::IpConfig { path })
        }
        _ => None,
    }
}

fn job_removed(message: &Message) -> Option<Event> {
    let (id, _job, unit, result): (u32, OwnedObjectPath, String, String) =
        message.body().deserialize().ok()?;
    trace!("Job {} for {} ended with {}.", id, unit, result);
    Some(Event::JobRemoved { id, unit, result })
}

#[cfg(test)]
mod tests {
    use super::*;
    use zbus::zvariant::Value;

    fn changed(keys: &[&str]) -> HashMap<String, OwnedValue> {
        keys.iter()
            .map(|k| {
                let value = OwnedValue::try_from(Value::from("/")).unwrap();
                (k.to_string(), value)
            })
            .collect()
    }

    #[test]
    fn property_changes_are_classified() {
        let path = "/org/freedesktop/NetworkManager/IP4Config/7".to_owned();
        assert_eq!(
            properties_signal(
                path.clone(),
                "org.freedesktop.NetworkManager.IP4Config",
                &changed(&["RouteData"])
            ),
            Some(NmSignal::IpConfig { path })
        );

        let path = "/org/freedesktop/NetworkManager/DHCP6Config/3".to_owned();
        assert_eq!(
            properties_signal(
                path.clone(),
                "org.freedesktop.NetworkManager.DHCP6Config",
                &changed(&["Options"])
            ),
            Some(NmSignal::Dhcp { path })
        );
    }

    #[test]
    fn device_changes_matter_only_for_ip_config_references() {
        let path = "/org/freedesktop/NetworkManager/Devices/2".to_owned();
        assert_eq!(
            properties_signal(path.clone(), DEVICE_INTERFACE, &changed(&["Ip6Config"])),
            Some(NmSignal::IpConfig { path: path.clone() })
        );
        assert_eq!(
            properties_signal(path.clone(), DEVICE_INTERFACE, &changed(&["Autoconnect"])),
            None
        );
        assert_eq!(
            properties_signal(path, "org.freedesktop.NetworkManager.Settings", &changed(&[])),
            None
        );
    }
}
