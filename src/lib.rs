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

//! A daemon that keeps a local caching resolver configured with the DNS
//! servers it learns about.
//!
//! Servers arrive over the system bus, either through the daemon's own
//! interface or through a resolver-compatible one fed by network
//! configuration tools. A state machine ([`fsm`]) turns them into
//! forwarding zones for the cache service ([`cache`]), keeps the host's
//! resolver file pointing at the cache ([`resolv_conf`]), manages the
//! cache service's lifecycle ([`systemd`]) and adds host routes so that
//! interface-bound servers are reached through their interfaces
//! ([`routing`]). Everything bus-specific lives in [`bus`]; the rest of
//! the crate sees the outside world through traits.

pub mod bus;
pub mod cache;
pub mod daemon;
pub mod description;
pub mod exit_code;
pub mod fsm;
pub mod interface;
pub mod ipc;
pub mod links;
pub mod resolv_conf;
pub mod reverse;
pub mod routing;
pub mod serial;
pub mod server_manager;
pub mod settings;
pub mod systemd;
pub mod thread;
pub mod util;

#[cfg(test)]
mod testing;
