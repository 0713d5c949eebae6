// Copyright 2021 Matthew Ingwersen.
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

/// A wrapper around [`str`] references whose [`PartialEq`] and [`Eq`]
/// implementations are ASCII-case-insensitive.
#[derive(Debug)]
pub struct Caseless<'a>(pub &'a str);

impl PartialEq for Caseless<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(other.0)
    }
}

impl Eq for Caseless<'_> {}

/// Converts a nibble into an ASCII hex character. Lower-case hex digits
/// are used. The passed value must be less than 16.
pub fn nibble_to_ascii_hex_digit(nibble: u8) -> u8 {
    assert!(nibble < 16);
    if nibble < 10 {
        b'0' + nibble
    } else {
        b'a' + nibble - 10
    }
}

/// Converts an ASCII hexadecimal digit to its numeric value. This
/// returns [`None`] if `digit` is not one of the ASCII characters
/// `0` through `9`, `A` through `F`, or `a` through `f`.
pub fn ascii_hex_digit_to_nibble(digit: u8) -> Option<u8> {
    if digit.is_ascii_digit() {
        Some(digit - b'0')
    } else if (b'A'..=b'F').contains(&digit) {
        Some(digit - b'A' + 10)
    } else if (b'a'..=b'f').contains(&digit) {
        Some(digit - b'a' + 10)
    } else {
        None
    }
}

/// Returns whether `octet` belongs to the set of bytes that the
/// directory DN escaper passes through verbatim. Everything else must
/// be escaped. The set is security-sensitive: see
/// [`crate::codec::dns_to_dn_escape`].
pub fn is_dn_safe_byte(octet: u8) -> bool {
    octet.is_ascii_alphanumeric() || matches!(octet, b'.' | b'_' | b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caseless_comparison_works() {
        assert_eq!(Caseless("idnsName"), Caseless("IDNSNAME"));
        assert_ne!(Caseless("idnsName"), Caseless("idnsNames"));
    }

    #[test]
    fn hex_digit_conversions_round_trip() {
        for value in 0..16 {
            let digit = nibble_to_ascii_hex_digit(value);
            assert_eq!(ascii_hex_digit_to_nibble(digit), Some(value));
        }
        assert_eq!(ascii_hex_digit_to_nibble(b'g'), None);
    }

    #[test]
    fn dn_safe_set_matches_documented_class() {
        for octet in 0..=255u8 {
            let expected = matches!(octet,
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-');
            assert_eq!(is_dn_safe_byte(octet), expected, "octet {octet:#x}");
        }
    }
}
