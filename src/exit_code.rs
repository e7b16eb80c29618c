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

//! Process exit codes and the first-failure-wins handler.

use std::fmt;

/// The exit codes that the daemon reports to its caller.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(i32)]
pub enum ExitCode {
    Graceful = 0,
    ServiceFailure = 8,
    DbusFailure = 9,
    ResolvConfFailure = 10,
    ConfigFailure = 11,
    RouteFailure = 12,
    BadArguments = 13,
}

impl ExitCode {
    /// Returns the numeric process exit status.
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Self::Graceful => "graceful",
            Self::ServiceFailure => "service failure",
            Self::DbusFailure => "D-Bus failure",
            Self::ResolvConfFailure => "resolv.conf failure",
            Self::ConfigFailure => "configuration failure",
            Self::RouteFailure => "route failure",
            Self::BadArguments => "bad arguments",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Remembers the first non-graceful exit code that was reported.
///
/// Later failures are usually consequences of the first one (a failed
/// start job is followed by a failed resolv.conf revert, and so on), so
/// only the first is kept.
#[derive(Debug, Default)]
pub struct ExitCodeHandler {
    code: Option<ExitCode>,
}

impl ExitCodeHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `code` unless a failure was already recorded.
    /// [`ExitCode::Graceful`] is never recorded.
    pub fn set(&mut self, code: ExitCode) {
        if code != ExitCode::Graceful && self.code.is_none() {
            self.code = Some(code);
        }
    }

    /// Returns the exit code to report.
    pub fn get(&self) -> ExitCode {
        self.code.unwrap_or(ExitCode::Graceful)
    }
}
