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

//! Implements logger set-up.

use env_logger::Env;
use log::LevelFilter;

/// Installs the logger. `RUST_LOG` takes precedence over
/// `default_level`.
pub fn init(default_level: LevelFilter) {
    let default_filter = default_level.to_string().to_lowercase();
    env_logger::init_from_env(Env::new().default_filter_or(default_filter));
}
