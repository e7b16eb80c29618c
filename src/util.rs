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

//! Crate-private utilities.

use std::error::Error;
use std::fmt::Write;

/// A wrapper around [`str`] references whose [`PartialEq`] and [`Eq`]
/// implementations are ASCII-case-insensitive. Domain names are
/// compared this way.
pub struct Caseless<'a>(pub &'a str);

impl PartialEq for Caseless<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl Eq for Caseless<'_> {}

/// Converts a nibble into an ASCII hex character. Lower-case hex digits
/// are used. The passed value must be less than 16.
pub fn nibble_to_ascii_hex_digit(nibble: u8) -> char {
    assert!(nibble < 16);
    if nibble < 10 {
        (b'0' + nibble) as char
    } else {
        (b'a' + nibble - 10) as char
    }
}

/// Renders an error and its chain of sources as an enumerated list,
/// one cause per line.
pub fn describe_error_chain(error: &dyn Error) -> String {
    let mut message = String::new();
    let mut cause = Some(error);
    let mut i = 1;
    while let Some(e) = cause {
        if i > 1 {
            message.push('\n');
        }
        let _ = write!(message, "[{}] {}", i, e);
        cause = e.source();
        i += 1;
    }
    message
}

/// Pushes `domain` onto `domains` unless an ASCII-case-insensitively
/// equal entry is already present.
pub fn push_unique_domain(domains: &mut Vec<String>, domain: &str) {
    if !domains.iter().any(|d| Caseless(d) == Caseless(domain)) {
        domains.push(domain.to_owned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Outer(Inner);

    #[derive(Debug)]
    struct Inner;

    impl fmt::Display for Outer {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("outer failed")
        }
    }

    impl fmt::Display for Inner {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("inner failed")
        }
    }

    impl Error for Outer {
        fn source(&self) -> Option<&(dyn Error + 'static)> {
            Some(&self.0)
        }
    }

    impl Error for Inner {}

    #[test]
    fn nibbles_render_as_lowercase_hex() {
        assert_eq!(nibble_to_ascii_hex_digit(0), '0');
        assert_eq!(nibble_to_ascii_hex_digit(9), '9');
        assert_eq!(nibble_to_ascii_hex_digit(10), 'a');
        assert_eq!(nibble_to_ascii_hex_digit(15), 'f');
    }

    #[test]
    fn error_chain_is_enumerated() {
        assert_eq!(
            describe_error_chain(&Outer(Inner)),
            "[1] outer failed\n[2] inner failed"
        );
    }

    #[test]
    fn push_unique_domain_ignores_case() {
        let mut domains = vec!["Example.com".to_owned()];
        push_unique_domain(&mut domains, "example.COM");
        push_unique_domain(&mut domains, "corp.example");
        assert_eq!(domains, vec!["Example.com", "corp.example"]);
    }
}
