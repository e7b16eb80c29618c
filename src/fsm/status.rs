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

//! Status reports.

use std::fmt::Write;

use serde_json::json;

use super::Core;

impl Core {
    /// Describes the daemon's state, as JSON or as text.
    pub fn status(&self, as_json: bool) -> String {
        let used = self.servers.get_used_servers();
        if as_json {
            let report = json!({
                "state": self.state.name(),
                "configuration_serial": self.cache.committed_serial().get(),
                "requested_serial": self.cache.requested_serial().get(),
                "mode": self.servers.mode().as_str(),
                "servers": used.iter().map(|s| s.to_json()).collect::<Vec<_>>(),
                "cache": self.cache.zones_json(),
                "routes": self.routing.routes_json(),
            });
            return report.to_string();
        }

        // Writing to a String cannot fail.
        let mut text = String::new();
        let _ = writeln!(text, "State: {}", self.state);
        let _ = writeln!(
            text,
            "Configuration serial: {} (requested {})",
            self.cache.committed_serial(),
            self.cache.requested_serial()
        );
        let _ = writeln!(text, "Resolving mode: {}", self.servers.mode());
        let _ = writeln!(text, "Servers:");
        for server in &used {
            let _ = writeln!(text, "    {}", server);
        }
        let _ = writeln!(text, "Cache zones:");
        for (zone, entry) in self.cache.zones() {
            let _ = write!(text, "    {}", zone);
            if !entry.flags.is_empty() {
                let _ = write!(text, " [{}]", entry.flags);
            }
            let _ = writeln!(text, " -> {}", entry.servers.join(" "));
        }
        let _ = writeln!(text, "Managed routes:");
        for (index, route) in self.routing.managed_routes() {
            let _ = write!(text, "    {}/{}", route.dest, route.prefix);
            if let Some(gateway) = route.next_hop {
                let _ = write!(text, " via {}", gateway);
            }
            let _ = writeln!(text, " (interface {})", index);
        }
        text
    }
}
