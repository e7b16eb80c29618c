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

//! The configuration serial.
//!
//! Clients that submit an update receive the serial their configuration
//! was assigned, and can watch the published serial to learn when it has
//! been applied. Serial 0 is reserved to signal a rejected request, so
//! the counter skips it when wrapping around.

use std::fmt;

/// The largest serial handed out before wrapping back to 1.
pub const MAX_SERIAL: u32 = u32::MAX - 1;

/// A monotonic configuration serial that never takes the value 0.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Serial(u32);

impl Serial {
    /// The serial in effect before any update has been received.
    pub const INITIAL: Self = Self(1);

    /// Creates a serial from its raw value. Returns [`None`] for 0 and
    /// for values above [`MAX_SERIAL`].
    pub fn new(value: u32) -> Option<Self> {
        if value == 0 || value > MAX_SERIAL {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Returns the raw value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// Returns the serial that follows this one, wrapping from
    /// [`MAX_SERIAL`] back to 1.
    pub fn next(self) -> Self {
        if self.0 >= MAX_SERIAL {
            Self(1)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl Default for Serial {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Receives the committed serial whenever it changes.
pub trait SerialObserver {
    fn serial_changed(&mut self, serial: Serial);
}
