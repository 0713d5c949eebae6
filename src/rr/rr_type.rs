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

//! Provides the [`Type`] structure for DNS RR types.

use std::fmt;
use std::str::FromStr;

use crate::util::Caseless;

////////////////////////////////////////////////////////////////////////
// RR TYPES                                                           //
////////////////////////////////////////////////////////////////////////

/// Represents the RR type of a DNS record.
///
/// An RR type is represented on the wire as an unsigned 16-bit integer.
/// Hence this is basically a wrapper around `u16` with nice
/// [`Debug`](fmt::Debug), [`Display`](fmt::Display), and [`FromStr`]
/// implementations for working with the common textual representations
/// of RR types.
///
/// The mnemonic table below is the set of types the engine "knows":
/// record attributes in the directory are recognized by stripping the
/// `Record` suffix and parsing the rest through [`FromStr`], so every
/// mnemonic here (plus the RFC 3597 `TYPEnnn` form) names a usable
/// attribute.
#[derive(Clone, Copy, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct Type(u16);

macro_rules! rr_types {
    ($(($mnemonic:ident, $value:expr),)*) => {
        impl Type {
            $(pub const $mnemonic: Type = Type($value);)*
        }

        impl FromStr for Type {
            type Err = &'static str;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                match Caseless(text) {
                    $(Caseless(stringify!($mnemonic)) => Ok(Self::$mnemonic),)*
                    _ => {
                        if text
                            .get(0..4)
                            .map_or(false, |prefix| prefix.eq_ignore_ascii_case("TYPE"))
                        {
                            text[4..]
                                .parse::<u16>()
                                .map(Self::from)
                                .or(Err("type value is not a valid unsigned 16-bit integer"))
                        } else {
                            Err("unknown type")
                        }
                    }
                }
            }
        }

        impl fmt::Display for Type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                match *self {
                    $(Self::$mnemonic => f.write_str(stringify!($mnemonic)),)*
                    Self(value) => write!(f, "TYPE{value}"), // RFC 3597 § 5
                }
            }
        }
    };
}

rr_types! {
    (A, 1),
    (NS, 2),
    (MD, 3),
    (MF, 4),
    (CNAME, 5),
    (SOA, 6),
    (MB, 7),
    (MG, 8),
    (MR, 9),
    (NULL, 10),
    (WKS, 11),
    (PTR, 12),
    (HINFO, 13),
    (MINFO, 14),
    (MX, 15),
    (TXT, 16),
    (RP, 17),
    (AFSDB, 18),
    (AAAA, 28),
    (LOC, 29),
    (SRV, 33),
    (NAPTR, 35),
    (KX, 36),
    (CERT, 37),
    (DNAME, 39),
    (DS, 43),
    (SSHFP, 44),
    (RRSIG, 46),
    (NSEC, 47),
    (DNSKEY, 48),
    (TLSA, 52),
    (SPF, 99),
    (CAA, 257),
}

impl Type {
    /// Returns whether RDATA of this type embeds domain names subject
    /// to case-insensitive comparison. Per [RFC 3597 § 6], this
    /// treatment applies only to types defined before that RFC; names
    /// in later types are compared bitwise.
    ///
    /// [RFC 3597 § 6]: https://datatracker.ietf.org/doc/html/rfc3597#section-6
    pub fn embeds_compressible_names(self) -> bool {
        matches!(
            self,
            Self::NS
                | Self::MD
                | Self::MF
                | Self::CNAME
                | Self::SOA
                | Self::MB
                | Self::MG
                | Self::MR
                | Self::PTR
                | Self::MINFO
                | Self::MX
        )
    }
}

impl From<u16> for Type {
    fn from(raw: u16) -> Self {
        Self(raw)
    }
}

impl From<Type> for u16 {
    fn from(rr_type: Type) -> Self {
        rr_type.0
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_displays_according_to_rfc3597() {
        // TYPE65280 is from the private use range, so it should always
        // be unknown.
        let rr_type = Type::from(0xff00);
        assert_eq!(rr_type.to_string(), "TYPE65280");
    }

    #[test]
    fn type_parses_according_to_rfc3597() {
        let type_a: Type = "TYPE1".parse().unwrap();
        let type_65280: Type = "TYPE65280".parse().unwrap();
        assert_eq!(type_a, Type::A);
        assert_eq!(u16::from(type_65280), 65280);
    }

    #[test]
    fn type_parsing_is_case_insensitive() {
        assert_eq!("aaaa".parse::<Type>().unwrap(), Type::AAAA);
        assert_eq!("NaPtR".parse::<Type>().unwrap(), Type::NAPTR);
    }

    #[test]
    fn name_embedding_follows_rfc3597() {
        assert!(Type::CNAME.embeds_compressible_names());
        assert!(Type::SOA.embeds_compressible_names());
        // SRV and DNAME post-date RFC 3597's cutoff list.
        assert!(!Type::SRV.embeds_compressible_names());
        assert!(!Type::DNAME.embeds_compressible_names());
        assert!(!Type::A.embeds_compressible_names());
    }
}
