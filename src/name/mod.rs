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

//! Implementation of data structures related to domain names.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::FusedIterator;
use std::str::FromStr;

use lazy_static::lazy_static;

mod builder;
mod error;
mod label;
pub use builder::NameBuilder;
pub use error::Error;
pub use label::Label;

/// The maximum number of labels in a domain name.
const MAX_N_LABELS: usize = 128;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A structure to represent an absolute domain name.
///
/// Internally, a `Name` owns two heap buffers:
///
/// * the uncompressed on-the-wire representation of the name, as
///   defined in [RFC 1035 § 3.1]; and
/// * an array providing the offset of each label in that
///   representation.
///
/// Every name handled by the synchronization engine is absolute, so
/// the terminal null label is always present and `Name` offers no
/// relative form. Names are constructed through the [`FromStr`]
/// implementation (which requires a trailing dot), through
/// [`Name::from_text`] (which completes relative input against an
/// origin), or through a [`NameBuilder`].
///
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: Box<[u8]>,
    offsets: Box<[u8]>,
}

lazy_static! {
    static ref ROOT: Name = Name {
        wire: Box::new([0]),
        offsets: Box::new([0]),
    };
}

#[allow(clippy::len_without_is_empty)] // A domain name is never empty!
impl Name {
    /// Assembles a `Name` from a wire representation and label
    /// offsets. For use by [`NameBuilder`], which guarantees validity.
    fn from_parts(wire: &[u8], offsets: &[u8]) -> Self {
        Self {
            wire: wire.into(),
            offsets: offsets.into(),
        }
    }

    /// Returns a reference to a `Name` representing the DNS root, `.`.
    pub fn root() -> &'static Name {
        &ROOT
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.offsets.len() == 1
    }

    /// Returns the number of labels in this `Name`, including the
    /// terminal null label.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the label at position `n`, where position 0 is the
    /// leftmost (deepest) label. Panics if `n` is out of bounds.
    pub fn label(&self, n: usize) -> &Label {
        let offset = self.offsets[n] as usize;
        let len = self.wire[offset] as usize;
        Label::from_unchecked(&self.wire[offset + 1..offset + 1 + len])
    }

    /// Returns an iterator over the labels in this `Name`.
    pub fn labels(&self) -> Labels {
        Labels {
            name: self,
            front: 0,
            back: self.len(),
        }
    }

    /// Returns the (uncompressed) on-the-wire representation of the
    /// `Name`.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        self.len() >= other.len()
            && self
                .labels()
                .rev()
                .zip(other.labels().rev())
                .all(|(a, b)| a == b)
    }

    /// Returns whether this `Name` is a *proper* subdomain of `other`
    /// (a subdomain not equal to `other`).
    pub fn is_subdomain_of(&self, other: &Name) -> bool {
        self.len() > other.len() && self.eq_or_subdomain_of(other)
    }

    /// Returns the superdomain obtained by skipping the first `skip`
    /// labels of the `Name`, or `None` if there aren't enough labels.
    pub fn superdomain(&self, skip: usize) -> Option<Name> {
        if skip >= self.len() {
            return None;
        }
        let start = self.offsets[skip] as usize;
        let wire = &self.wire[start..];
        let offsets: Vec<u8> = self.offsets[skip..]
            .iter()
            .map(|offset| offset - start as u8)
            .collect();
        Some(Self::from_parts(wire, &offsets))
    }

    /// Returns a [`Display`](fmt::Display) adapter for the first `n`
    /// labels of the `Name`, rendered in master-file text form with
    /// labels separated by `.` and no trailing dot. Panics if
    /// `n >= self.len()` (the terminal null label cannot be part of a
    /// prefix).
    pub fn prefix(&self, n: usize) -> Prefix {
        assert!(n < self.len());
        Prefix { name: self, n }
    }

    /// Parses a name from master-file text. Input without a trailing
    /// dot is completed by appending `origin` (which must be
    /// provided). Escape sequences as defined by [RFC 4343 § 2.1] are
    /// supported.
    ///
    /// [RFC 4343 § 2.1]: https://datatracker.ietf.org/doc/html/rfc4343#section-2.1
    pub fn from_text(text: &str, origin: Option<&Name>) -> Result<Self, Error> {
        if text.is_empty() {
            return Err(Error::StrEmpty);
        } else if text == "." {
            return Ok(Name::root().clone());
        } else if text == "@" {
            // Master-file shorthand for the origin itself.
            return match origin {
                Some(origin) => Ok(origin.clone()),
                None => Err(Error::NonNullTerminal),
            };
        }

        let mut remaining: &[u8] = text.as_ref();
        let mut builder = NameBuilder::new();
        let mut absolute = false;

        // NOTE: to check that the string is ASCII, it suffices to check
        // that each octet is ASCII as we go. This is because all
        // multi-byte characters start with an octet that is not ASCII.
        while let Some(&octet) = remaining.first() {
            if octet == b'\\' {
                let (value, consumed) = parse_escape(&remaining[1..])?;
                builder.try_push(value)?;
                remaining = &remaining[consumed + 1..];
            } else if octet == b'.' {
                if remaining.len() == 1 {
                    absolute = true;
                } else {
                    builder.end_label()?;
                }
                remaining = &remaining[1..];
            } else if !octet.is_ascii() {
                return Err(Error::StrNotAscii);
            } else {
                builder.try_push(octet)?;
                remaining = &remaining[1..];
            }
        }

        if absolute {
            builder.end_label()?;
            builder.finish()
        } else {
            match origin {
                Some(origin) => builder.finish_with_origin(origin),
                None => Err(Error::NonNullTerminal),
            }
        }
    }
}

/// Requires absolute input (with a trailing dot).
impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Name::from_text(s, None)
    }
}

/// Parses an escape sequence. We expect `remaining` to start with the
/// octet immediately *after* the backslash that introduces the escape
/// sequence.
fn parse_escape(remaining: &[u8]) -> Result<(u8, usize), Error> {
    if remaining.is_empty() {
        Err(Error::InvalidEscape)
    } else if remaining[0].is_ascii_digit() {
        if remaining.len() < 3 || !remaining[1].is_ascii_digit() || !remaining[2].is_ascii_digit() {
            Err(Error::InvalidEscape)
        } else {
            let hundreds = (remaining[0] - b'0') as usize;
            let tens = (remaining[1] - b'0') as usize;
            let ones = (remaining[2] - b'0') as usize;
            let value = 100 * hundreds + 10 * tens + ones;
            if value > 255 {
                Err(Error::InvalidEscape)
            } else {
                Ok((value as u8, 3))
            }
        }
    } else {
        Ok((remaining[0], 1))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            f.write_str(".")
        } else {
            for label in self.labels() {
                if !label.is_null() {
                    write!(f, "{}.", label)?;
                }
            }
            Ok(())
        }
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "\"{}\"", self)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.labels().zip(other.labels()).all(|(a, b)| a == b)
    }
}

impl Eq for Name {}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The [`Ord`] implementation for `Name` employs DNSSEC's canonical
/// ordering of domain names. Per [RFC 4034 § 6.1], `Name`s are ordered
/// as strings of labels read from right to left.
///
/// [RFC 4034 § 6.1]: https://datatracker.ietf.org/doc/html/rfc4034#section-6.1
impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels()
            .rev()
            .zip(other.labels().rev())
            .find_map(|(a, b)| Some(a.cmp(b)).filter(|ordering| ordering.is_ne()))
            .unwrap_or_else(|| self.len().cmp(&other.len()))
    }
}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for label in self.labels() {
            label.hash(state);
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ITERATION OVER A NAME'S LABELS                                     //
////////////////////////////////////////////////////////////////////////

/// An iterator over the [`Label`]s in a [`Name`].
///
/// To use this iterator, construct one from a [`Name`] using
/// [`Name::labels`].
#[derive(Clone, Debug)]
pub struct Labels<'a> {
    name: &'a Name,
    front: usize,
    back: usize,
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a Label;

    fn next(&mut self) -> Option<Self::Item> {
        if self.front < self.back {
            let this_one = self.front;
            self.front += 1;
            Some(self.name.label(this_one))
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Labels<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.back > self.front {
            self.back -= 1;
            Some(self.name.label(self.back))
        } else {
            None
        }
    }
}

impl ExactSizeIterator for Labels<'_> {}

impl FusedIterator for Labels<'_> {}

////////////////////////////////////////////////////////////////////////
// PREFIX RENDERING                                                   //
////////////////////////////////////////////////////////////////////////

/// [`Display`](fmt::Display) adapter produced by [`Name::prefix`].
pub struct Prefix<'a> {
    name: &'a Name,
    n: usize,
}

impl fmt::Display for Prefix<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, label) in self.name.labels().take(self.n).enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", label)?;
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_expected_characteristics() {
        let root = Name::root();
        assert!(root.is_root());
        assert_eq!(root.len(), 1);
        assert_eq!(root.wire_repr(), &[0]);
        assert_eq!(root.to_string(), ".");
    }

    #[test]
    fn fromstr_works() {
        let name: Name = "example.test.".parse().unwrap();
        assert_eq!(name.wire_repr(), b"\x07example\x04test\x00");
        assert_eq!(name.to_string(), "example.test.");
    }

    #[test]
    fn fromstr_works_for_root() {
        let name: Name = ".".parse().unwrap();
        assert_eq!(&name, Name::root());
    }

    #[test]
    fn fromstr_rejects_empty() {
        assert_eq!("".parse::<Name>(), Err(Error::StrEmpty));
    }

    #[test]
    fn fromstr_rejects_non_ascii() {
        assert_eq!("✈.aero.".parse::<Name>(), Err(Error::StrNotAscii));
    }

    #[test]
    fn fromstr_rejects_non_fqdn() {
        assert_eq!("non.fqdn".parse::<Name>(), Err(Error::NonNullTerminal));
    }

    #[test]
    fn fromstr_rejects_null_non_terminal() {
        assert_eq!("a.b..c.".parse::<Name>(), Err(Error::NullNonTerminal));
    }

    #[test]
    fn fromstr_escaping_works() {
        let escaped: Name = "\\000.\\\\\\..".parse().unwrap();
        assert_eq!(escaped.wire_repr(), b"\x01\x00\x02\\.\x00");
    }

    #[test]
    fn fromstr_rejects_invalid_escapes() {
        assert_eq!("\\00".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\00x.".parse::<Name>(), Err(Error::InvalidEscape));
        assert_eq!("\\256.".parse::<Name>(), Err(Error::InvalidEscape));
    }

    #[test]
    fn from_text_completes_relative_names() {
        let origin: Name = "example.test.".parse().unwrap();
        let name = Name::from_text("host", Some(&origin)).unwrap();
        assert_eq!(name.to_string(), "host.example.test.");
        let already_absolute = Name::from_text("other.org.", Some(&origin)).unwrap();
        assert_eq!(already_absolute.to_string(), "other.org.");
    }

    #[test]
    fn from_text_resolves_at_sign_to_origin() {
        let origin: Name = "example.test.".parse().unwrap();
        let name = Name::from_text("@", Some(&origin)).unwrap();
        assert_eq!(name, origin);
    }

    #[test]
    fn labels_iterator_works() {
        let name: Name = "a.b.example.test.".parse().unwrap();
        let labels: Vec<String> = name.labels().map(|l| l.to_string()).collect();
        assert_eq!(labels, ["a", "b", "example", "test", ""]);
        let reversed: Vec<String> = name.labels().rev().map(|l| l.to_string()).collect();
        assert_eq!(reversed, ["", "test", "example", "b", "a"]);
    }

    #[test]
    fn superdomain_works() {
        let subdomain: Name = "subdomain.example.test.".parse().unwrap();
        assert_eq!(subdomain.superdomain(0).as_ref(), Some(&subdomain));
        assert_eq!(
            subdomain.superdomain(1).unwrap().to_string(),
            "example.test."
        );
        assert_eq!(subdomain.superdomain(2).unwrap().to_string(), "test.");
        assert_eq!(subdomain.superdomain(3).as_ref(), Some(Name::root()));
        assert_eq!(subdomain.superdomain(4), None);
    }

    #[test]
    fn eq_or_subdomain_of_works() {
        let subdomain: Name = "subdomain.example.test.".parse().unwrap();
        let domain: Name = "example.test.".parse().unwrap();
        let other: Name = "other.test.".parse().unwrap();
        assert!(subdomain.eq_or_subdomain_of(&subdomain));
        assert!(subdomain.eq_or_subdomain_of(&domain));
        assert!(subdomain.eq_or_subdomain_of(Name::root()));
        assert!(!domain.eq_or_subdomain_of(&subdomain));
        assert!(!domain.eq_or_subdomain_of(&other));
        assert!(subdomain.is_subdomain_of(&domain));
        assert!(!subdomain.is_subdomain_of(&subdomain));
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let lower: Name = "example.test.".parse().unwrap();
        let upper: Name = "EXAMPLE.TEST.".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn ord_works() {
        // This ordered list is from RFC 4034 § 6.1, which defines the
        // canonical ordering of domain names.
        let names: Vec<Name> = [
            "example.",
            "a.example.",
            "yljkjljk.a.example.",
            "Z.a.example.",
            "zABC.a.EXAMPLE.",
            "z.example.",
            "\\001.z.example.",
            "*.z.example.",
            "\\200.z.example.",
        ]
        .into_iter()
        .map(|n| n.parse().unwrap())
        .collect();

        for (i, ni) in names.iter().enumerate() {
            for (j, nj) in names.iter().enumerate() {
                assert_eq!(i.cmp(&j), ni.cmp(nj));
            }
        }
    }

    #[test]
    fn prefix_renders_leading_labels() {
        let name: Name = "a.b.example.test.".parse().unwrap();
        assert_eq!(name.prefix(2).to_string(), "a.b");
        assert_eq!(name.prefix(1).to_string(), "a");
    }

    #[test]
    fn prefix_escapes_labels() {
        let origin: Name = "example.test.".parse().unwrap();
        let name = Name::from_text("a\\.b", Some(&origin)).unwrap();
        assert_eq!(name.len(), 4);
        assert_eq!(name.prefix(1).to_string(), "a\\.b");
    }
}
