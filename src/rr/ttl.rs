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

//! Provides the [`Ttl`] structure for DNS RR TTLs.

use std::fmt;
use std::str::FromStr;

////////////////////////////////////////////////////////////////////////
// TTLS                                                               //
////////////////////////////////////////////////////////////////////////

/// The time to live (TTL) of a DNS record.
///
/// There are contradictory definitions of the TTL field in [RFC 1035]
/// (see [erratum 2130]), so [RFC 2181 § 8] clarified that TTL values
/// are unsigned integers between 0 and 2³¹ - 1, inclusive. Because the
/// TTL field is 32 bits wide, the most significant bit is zero. A TTL
/// value received with the most significant bit set is interpreted as
/// zero.
///
/// This type wraps `u32` to implement [RFC 2181 § 8]. The public API
/// will only instantiate `Ttl` objects whose underlying `u32` values
/// have the most significant bit set to zero, and `Ttl::from(u32)`
/// treats TTL values with the most significant bit set as zero.
///
/// [Erratum 2130]: https://www.rfc-editor.org/errata/eid2130
/// [RFC 1035]: https://datatracker.ietf.org/doc/html/rfc1035
/// [RFC 2181 § 8]: https://datatracker.ietf.org/doc/html/rfc2181#section-8
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Ttl(u32);

impl Ttl {
    /// Constructs a `Ttl` from a second count known to be within
    /// range. Used for compile-time constants.
    pub const fn from_secs(secs: u32) -> Self {
        assert!(secs <= i32::MAX as u32);
        Self(secs)
    }
}

impl From<u32> for Ttl {
    fn from(raw: u32) -> Self {
        if raw > i32::MAX as u32 {
            Self(0)
        } else {
            Self(raw)
        }
    }
}

impl From<Ttl> for u32 {
    fn from(ttl: Ttl) -> Self {
        ttl.0
    }
}

/// Parses a TTL in master-file form: either a plain second count or a
/// concatenation of `<number><unit>` terms with units `w`, `d`, `h`,
/// `m`, and `s` (case-insensitive), e.g. `1h30m`. This is the form
/// accepted for the `dnsTTL` attribute and the SOA timer fields.
impl FromStr for Ttl {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text.is_empty() {
            return Err("empty TTL");
        }
        if text.bytes().all(|b| b.is_ascii_digit()) {
            return text
                .parse::<u32>()
                .ok()
                .filter(|&v| v <= i32::MAX as u32)
                .map(Ttl)
                .ok_or("TTL value out of range");
        }

        let mut total: u64 = 0;
        let mut number: Option<u64> = None;
        for byte in text.bytes() {
            if byte.is_ascii_digit() {
                let digit = (byte - b'0') as u64;
                let value = number.unwrap_or(0) * 10 + digit;
                if value > u32::MAX as u64 {
                    return Err("TTL value out of range");
                }
                number = Some(value);
            } else {
                let factor = match byte.to_ascii_lowercase() {
                    b'w' => 604800,
                    b'd' => 86400,
                    b'h' => 3600,
                    b'm' => 60,
                    b's' => 1,
                    _ => return Err("invalid TTL unit"),
                };
                let value = number.take().ok_or("TTL unit without a number")?;
                total += value * factor;
                if total > i32::MAX as u64 {
                    return Err("TTL value out of range");
                }
            }
        }
        if number.is_some() {
            return Err("trailing number without a unit");
        }
        Ok(Ttl(total as u32))
    }
}

impl fmt::Debug for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_ttls_are_not_modified() {
        let i32_max = i32::MAX as u32;
        assert_eq!(u32::from(Ttl::from(0)), 0);
        assert_eq!(u32::from(Ttl::from(23)), 23);
        assert_eq!(u32::from(Ttl::from(i32_max)), i32_max);
    }

    #[test]
    fn large_ttls_become_zero() {
        assert_eq!(u32::from(Ttl::from(i32::MAX as u32 + 1)), 0);
    }

    #[test]
    fn fromstr_parses_plain_seconds() {
        assert_eq!("86400".parse::<Ttl>().unwrap(), Ttl::from(86400));
    }

    #[test]
    fn fromstr_parses_unit_forms() {
        assert_eq!("1h".parse::<Ttl>().unwrap(), Ttl::from(3600));
        assert_eq!("1h30m".parse::<Ttl>().unwrap(), Ttl::from(5400));
        assert_eq!("2W".parse::<Ttl>().unwrap(), Ttl::from(1209600));
    }

    #[test]
    fn fromstr_rejects_malformed_input() {
        assert!("".parse::<Ttl>().is_err());
        assert!("1x".parse::<Ttl>().is_err());
        assert!("h".parse::<Ttl>().is_err());
        assert!("1h30".parse::<Ttl>().is_err());
        assert!("4294967296".parse::<Ttl>().is_err());
    }
}
