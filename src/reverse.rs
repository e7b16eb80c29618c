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

//! Reverse-lookup zones for networks.
//!
//! A server that declares a network should also answer reverse lookups
//! for the addresses in it. Reverse names only have label boundaries at
//! octets (IPv4) or nibbles (IPv6), so a network whose prefix does not
//! fall on such a boundary is covered by the set of sibling zones one
//! label below the boundary. For example, `10.0.0.0/22` becomes
//! `0.0.10.in-addr.arpa` through `3.0.10.in-addr.arpa`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::util::nibble_to_ascii_hex_digit;

pub const IN_ADDR_ARPA: &str = "in-addr.arpa";
pub const IP6_ARPA: &str = "ip6.arpa";

/// Returns the reverse zones that exactly cover `network`.
pub fn reverse_zones(network: &IpNet) -> Vec<String> {
    match network {
        IpNet::V4(net) => reverse_zones_v4(net),
        IpNet::V6(net) => reverse_zones_v6(net),
    }
}

fn reverse_zones_v4(network: &Ipv4Net) -> Vec<String> {
    let octets = network.network().octets();
    let host_bits = 32 - u32::from(network.prefix_len());
    let kept = 4 - (host_bits / 8) as usize;
    let siblings = 1u32 << (host_bits % 8);
    if kept == 0 {
        return vec![IN_ADDR_ARPA.to_owned()];
    }

    (0..siblings)
        .map(|i| {
            let mut labels: Vec<String> = octets[..kept - 1].iter().map(u8::to_string).collect();
            labels.push((u32::from(octets[kept - 1]) + i).to_string());
            labels.reverse();
            format!("{}.{}", labels.join("."), IN_ADDR_ARPA)
        })
        .collect()
}

fn reverse_zones_v6(network: &Ipv6Net) -> Vec<String> {
    let nibbles = nibbles(&network.network());
    let host_bits = 128 - u32::from(network.prefix_len());
    let kept = 32 - (host_bits / 4) as usize;
    let siblings = 1u8 << (host_bits % 4);
    if kept == 0 {
        return vec![IP6_ARPA.to_owned()];
    }

    (0..siblings)
        .map(|i| {
            let mut labels: Vec<char> = nibbles[..kept - 1]
                .iter()
                .map(|n| nibble_to_ascii_hex_digit(*n))
                .collect();
            labels.push(nibble_to_ascii_hex_digit(nibbles[kept - 1] + i));
            labels.reverse();
            let mut name = String::with_capacity(labels.len() * 2 + IP6_ARPA.len());
            for label in labels {
                name.push(label);
                name.push('.');
            }
            name.push_str(IP6_ARPA);
            name
        })
        .collect()
}

/// Returns the full reverse-lookup name of a single address.
pub fn reverse_name(address: &IpAddr) -> String {
    match address {
        IpAddr::V4(a) => reverse_name_v4(a),
        IpAddr::V6(a) => reverse_name_v6(a),
    }
}

fn reverse_name_v4(address: &Ipv4Addr) -> String {
    let octets = address.octets();
    format!(
        "{}.{}.{}.{}.{}",
        octets[3], octets[2], octets[1], octets[0], IN_ADDR_ARPA
    )
}

fn reverse_name_v6(address: &Ipv6Addr) -> String {
    let mut name = String::with_capacity(64 + IP6_ARPA.len());
    for nibble in nibbles(address).iter().rev() {
        name.push(nibble_to_ascii_hex_digit(*nibble));
        name.push('.');
    }
    name.push_str(IP6_ARPA);
    name
}

/// Splits an IPv6 address into its 32 nibbles, most significant first.
fn nibbles(address: &Ipv6Addr) -> [u8; 32] {
    let mut nibbles = [0; 32];
    for (i, octet) in address.octets().iter().enumerate() {
        nibbles[2 * i] = octet >> 4;
        nibbles[2 * i + 1] = octet & 0x0f;
    }
    nibbles
}

/// Returns whether `name` is `zone` or a subdomain of it.
pub fn is_within_zone(name: &str, zone: &str) -> bool {
    name == zone
        || name
            .strip_suffix(zone)
            .map_or(false, |prefix| prefix.ends_with('.'))
}
