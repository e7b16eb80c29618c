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

//! Information about the host's network interfaces.

use std::path::PathBuf;

/// Where the kernel publishes per-interface information.
const SYSFS_NET: &str = "/sys/class/net";

/// Lookups of network interfaces by index and name.
pub trait LinkInfo {
    /// Returns the kernel name of the interface with `index`, or
    /// [`None`] if there is no such interface.
    fn name_of(&self, index: u32) -> Option<String>;

    /// Returns the index of the interface called `name`.
    fn index_of(&self, name: &str) -> Option<u32>;

    /// Returns whether the interface called `name` is wireless.
    fn is_wireless(&self, name: &str) -> bool;
}

/// [`LinkInfo`] backed by the running kernel.
#[derive(Debug, Default)]
pub struct SystemLinks;

#[cfg(target_os = "linux")]
impl LinkInfo for SystemLinks {
    fn name_of(&self, index: u32) -> Option<String> {
        let mut buffer = [0 as libc::c_char; libc::IF_NAMESIZE];
        // SAFETY: the buffer is IF_NAMESIZE bytes long, as
        // if_indextoname requires, and is only read on success, when it
        // holds a NUL-terminated name.
        let name = unsafe {
            let result = libc::if_indextoname(index, buffer.as_mut_ptr());
            if result.is_null() {
                return None;
            }
            std::ffi::CStr::from_ptr(buffer.as_ptr())
        };
        name.to_str().ok().map(ToOwned::to_owned)
    }

    fn index_of(&self, name: &str) -> Option<u32> {
        nix::net::if_::if_nametoindex(name).ok()
    }

    fn is_wireless(&self, name: &str) -> bool {
        wireless_marker(name).exists()
    }
}

#[cfg(not(target_os = "linux"))]
impl LinkInfo for SystemLinks {
    fn name_of(&self, _index: u32) -> Option<String> {
        None
    }

    fn index_of(&self, _name: &str) -> Option<u32> {
        None
    }

    fn is_wireless(&self, name: &str) -> bool {
        wireless_marker(name).exists()
    }
}

/// The sysfs entry that only exists for wireless interfaces.
fn wireless_marker(name: &str) -> PathBuf {
    [SYSFS_NET, name, "wireless"].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wireless_marker_lives_in_sysfs() {
        assert_eq!(
            wireless_marker("wlan0"),
            PathBuf::from("/sys/class/net/wlan0/wireless")
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn loopback_round_trips_between_name_and_index() {
        let links = SystemLinks;
        if let Some(index) = links.index_of("lo") {
            assert_eq!(links.name_of(index).as_deref(), Some("lo"));
            assert!(!links.is_wireless("lo"));
        }
    }
}
