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

//! The [`Rdata`] structure and its master-file text codec.
//!
//! Directory record attributes carry their values in master-file text
//! form, and write-back renders values in the same form, so `Rdata`
//! must convert in both directions. Types without a dedicated codec
//! here are still accepted through the RFC 3597 `\# <len> <hex>`
//! generic encoding, which is also the fallback output form.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::errors::{Error, Result};
use crate::name::Name;
use crate::util::{ascii_hex_digit_to_nibble, nibble_to_ascii_hex_digit};

use super::{Ttl, Type};

/// The maximum length of RDATA on the wire.
const MAX_RDATA_LEN: usize = 65535;

////////////////////////////////////////////////////////////////////////
// RDATA STRUCTURE                                                    //
////////////////////////////////////////////////////////////////////////

/// The data of a single resource record, in uncompressed wire form.
///
/// Embedded domain names are always stored uncompressed; this is the
/// form diffs, zone databases, and the journal operate on.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Rdata {
    octets: Box<[u8]>,
}

impl Rdata {
    /// Wraps wire octets as `Rdata`. Fails with
    /// [`Error::UnexpectedToken`] if the data exceeds the wire limit.
    pub fn from_octets(octets: Vec<u8>) -> Result<Self> {
        if octets.len() > MAX_RDATA_LEN {
            Err(Error::UnexpectedToken)
        } else {
            Ok(Self {
                octets: octets.into(),
            })
        }
    }

    /// Returns the wire octets of this `Rdata`.
    pub fn octets(&self) -> &[u8] {
        &self.octets
    }

    /// Returns the length of this `Rdata` in octets.
    pub fn len(&self) -> usize {
        self.octets.len()
    }

    /// Returns whether this `Rdata` is empty.
    pub fn is_empty(&self) -> bool {
        self.octets.is_empty()
    }

    /// Compares two `Rdata` as values of `rr_type`. For RR types that
    /// embed domain names subject to case-insensitive comparison (see
    /// [`Type::embeds_compressible_names`]), the embedded names are
    /// compared ASCII-case-insensitively; everything else is compared
    /// bitwise.
    pub fn equals(&self, other: &Rdata, rr_type: Type) -> bool {
        if !rr_type.embeds_compressible_names() {
            return self.octets == other.octets;
        }
        if self.len() != other.len() {
            return false;
        }
        match rr_type {
            Type::MX => {
                fixed_then_name_equal(&self.octets, &other.octets, 2)
            }
            Type::SOA => soa_equal(&self.octets, &other.octets),
            Type::MINFO => two_names_equal(&self.octets, &other.octets),
            // The remaining compressible types hold a single name.
            _ => self.octets.eq_ignore_ascii_case(&other.octets),
        }
    }
}

/// Compares a fixed-width prefix bitwise, then the remainder as a
/// domain name.
fn fixed_then_name_equal(a: &[u8], b: &[u8], fixed: usize) -> bool {
    a.len() >= fixed
        && b.len() >= fixed
        && a[..fixed] == b[..fixed]
        && a[fixed..].eq_ignore_ascii_case(&b[fixed..])
}

/// Compares two wire-form names at the head of `a` and `b`, returning
/// the lengths consumed, or `None` on malformed data.
fn wire_name_len(octets: &[u8]) -> Option<usize> {
    let mut at = 0;
    loop {
        let len = *octets.get(at)? as usize;
        if len > 63 {
            return None;
        }
        at += 1 + len;
        if len == 0 {
            return Some(at);
        }
    }
}

fn two_names_equal(a: &[u8], b: &[u8]) -> bool {
    let (Some(first_a), Some(first_b)) = (wire_name_len(a), wire_name_len(b)) else {
        return a == b;
    };
    first_a == first_b
        && a[..first_a].eq_ignore_ascii_case(&b[..first_b])
        && a[first_a..].eq_ignore_ascii_case(&b[first_b..])
}

fn soa_equal(a: &[u8], b: &[u8]) -> bool {
    // Two names followed by the five 32-bit timer fields.
    let (Some(mname_a), Some(mname_b)) = (wire_name_len(a), wire_name_len(b)) else {
        return a == b;
    };
    if mname_a != mname_b || !a[..mname_a].eq_ignore_ascii_case(&b[..mname_b]) {
        return false;
    }
    let (Some(rname_a), Some(rname_b)) = (wire_name_len(&a[mname_a..]), wire_name_len(&b[mname_b..]))
    else {
        return a[mname_a..] == b[mname_b..];
    };
    rname_a == rname_b
        && a[mname_a..mname_a + rname_a].eq_ignore_ascii_case(&b[mname_b..mname_b + rname_b])
        && a[mname_a + rname_a..] == b[mname_b + rname_b..]
}

////////////////////////////////////////////////////////////////////////
// TEXT PARSING                                                       //
////////////////////////////////////////////////////////////////////////

/// A cursor over master-file rdata text.
struct TextReader<'a> {
    rest: &'a str,
}

impl<'a> TextReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text.trim() }
    }

    /// Returns the next whitespace-delimited token, verbatim. Escape
    /// sequences are left intact for downstream parsers (e.g.
    /// [`Name::from_text`]).
    fn token(&mut self) -> Option<&'a str> {
        self.rest = self.rest.trim_start();
        if self.rest.is_empty() {
            return None;
        }
        let end = self
            .rest
            .find(|c: char| c.is_ascii_whitespace())
            .unwrap_or(self.rest.len());
        let (token, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(token)
    }

    /// Parses a character-string: either a quoted string or a bare
    /// token, in both cases with `\DDD` and `\X` escapes decoded. The
    /// result must fit in 255 octets.
    fn char_string(&mut self) -> Result<Vec<u8>> {
        self.rest = self.rest.trim_start();
        let rest = self.rest;
        let bytes = rest.as_bytes();
        let raw = if bytes.first() == Some(&b'"') {
            let end = find_closing_quote(&bytes[1..]).ok_or(Error::UnexpectedToken)?;
            self.rest = &rest[end + 2..];
            &rest[1..1 + end]
        } else {
            self.token().ok_or(Error::UnexpectedToken)?
        };

        let mut out = Vec::with_capacity(raw.len());
        let mut octets = raw.bytes();
        while let Some(octet) = octets.next() {
            if octet == b'\\' {
                let first = octets.next().ok_or(Error::UnexpectedToken)?;
                if first.is_ascii_digit() {
                    let tens = octets.next().ok_or(Error::UnexpectedToken)?;
                    let ones = octets.next().ok_or(Error::UnexpectedToken)?;
                    if !tens.is_ascii_digit() || !ones.is_ascii_digit() {
                        return Err(Error::UnexpectedToken);
                    }
                    let value = 100 * (first - b'0') as usize
                        + 10 * (tens - b'0') as usize
                        + (ones - b'0') as usize;
                    if value > 255 {
                        return Err(Error::UnexpectedToken);
                    }
                    out.push(value as u8);
                } else {
                    out.push(first);
                }
            } else {
                out.push(octet);
            }
        }
        if out.len() > 255 {
            return Err(Error::UnexpectedToken);
        }
        Ok(out)
    }

    /// Returns whether only whitespace remains.
    fn finished(&mut self) -> bool {
        self.rest.trim_start().is_empty()
    }
}

/// Finds the index of the closing quote in `bytes` (which starts just
/// after the opening quote), skipping escaped quotes.
fn find_closing_quote(bytes: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some(i),
            b'\\' => i += 2,
            _ => i += 1,
        }
    }
    None
}

fn parse_u8(token: &str) -> Result<u8> {
    token.parse().or(Err(Error::UnexpectedToken))
}

fn parse_u16(token: &str) -> Result<u16> {
    token.parse().or(Err(Error::UnexpectedToken))
}

fn parse_u32(token: &str) -> Result<u32> {
    token.parse().or(Err(Error::UnexpectedToken))
}

/// Parses a 32-bit timer field of the SOA RDATA. Unit-suffixed TTL
/// forms are accepted, matching master-file practice.
fn parse_timer(token: &str) -> Result<u32> {
    token
        .parse::<Ttl>()
        .map(u32::from)
        .or(Err(Error::UnexpectedToken))
}

fn parse_name(reader: &mut TextReader, origin: &Name) -> Result<Name> {
    let token = reader.token().ok_or(Error::UnexpectedToken)?;
    Name::from_text(token, Some(origin)).map_err(|_| Error::UnexpectedToken)
}

fn parse_hex_blob(reader: &mut TextReader) -> Result<Vec<u8>> {
    let mut nibbles = Vec::new();
    while let Some(token) = reader.token() {
        for octet in token.bytes() {
            nibbles.push(ascii_hex_digit_to_nibble(octet).ok_or(Error::UnexpectedToken)?);
        }
    }
    if nibbles.is_empty() || nibbles.len() % 2 != 0 {
        return Err(Error::UnexpectedToken);
    }
    Ok(nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair[1])
        .collect())
}

fn push_char_string(out: &mut Vec<u8>, string: &[u8]) {
    out.push(string.len() as u8);
    out.extend_from_slice(string);
}

impl Rdata {
    /// Parses RDATA of `rr_type` from master-file text. Relative names
    /// are completed against `origin`. Malformed values produce
    /// [`Error::UnexpectedToken`].
    pub fn from_text(rr_type: Type, origin: &Name, text: &str) -> Result<Self> {
        let mut reader = TextReader::new(text);

        // RFC 3597 § 5 generic encoding is accepted for any type.
        if text.trim_start().starts_with("\\#") {
            return Self::from_generic_text(&mut reader);
        }

        let mut out = Vec::new();
        match rr_type {
            Type::A => {
                let token = reader.token().ok_or(Error::UnexpectedToken)?;
                let addr: Ipv4Addr = token.parse().or(Err(Error::UnexpectedToken))?;
                out.extend_from_slice(&addr.octets());
            }
            Type::AAAA => {
                let token = reader.token().ok_or(Error::UnexpectedToken)?;
                let addr: Ipv6Addr = token.parse().or(Err(Error::UnexpectedToken))?;
                out.extend_from_slice(&addr.octets());
            }
            Type::NS
            | Type::MD
            | Type::MF
            | Type::CNAME
            | Type::MB
            | Type::MG
            | Type::MR
            | Type::PTR
            | Type::DNAME => {
                let name = parse_name(&mut reader, origin)?;
                out.extend_from_slice(name.wire_repr());
            }
            Type::MX | Type::AFSDB | Type::KX => {
                let preference = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                let name = parse_name(&mut reader, origin)?;
                out.extend_from_slice(&preference.to_be_bytes());
                out.extend_from_slice(name.wire_repr());
            }
            Type::MINFO | Type::RP => {
                let first = parse_name(&mut reader, origin)?;
                let second = parse_name(&mut reader, origin)?;
                out.extend_from_slice(first.wire_repr());
                out.extend_from_slice(second.wire_repr());
            }
            Type::TXT | Type::SPF => {
                let mut strings = 0;
                while !reader.finished() {
                    push_char_string(&mut out, &reader.char_string()?);
                    strings += 1;
                }
                if strings == 0 {
                    return Err(Error::UnexpectedToken);
                }
            }
            Type::HINFO => {
                push_char_string(&mut out, &reader.char_string()?);
                push_char_string(&mut out, &reader.char_string()?);
            }
            Type::SRV => {
                let priority = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                let weight = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                let port = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                let target = parse_name(&mut reader, origin)?;
                out.extend_from_slice(&priority.to_be_bytes());
                out.extend_from_slice(&weight.to_be_bytes());
                out.extend_from_slice(&port.to_be_bytes());
                out.extend_from_slice(target.wire_repr());
            }
            Type::SOA => {
                let mname = parse_name(&mut reader, origin)?;
                let rname = parse_name(&mut reader, origin)?;
                let serial = parse_u32(reader.token().ok_or(Error::UnexpectedToken)?)?;
                out.extend_from_slice(mname.wire_repr());
                out.extend_from_slice(rname.wire_repr());
                out.extend_from_slice(&serial.to_be_bytes());
                for _ in 0..4 {
                    let timer = parse_timer(reader.token().ok_or(Error::UnexpectedToken)?)?;
                    out.extend_from_slice(&timer.to_be_bytes());
                }
            }
            Type::NAPTR => {
                let order = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                let preference = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                out.extend_from_slice(&order.to_be_bytes());
                out.extend_from_slice(&preference.to_be_bytes());
                for _ in 0..3 {
                    push_char_string(&mut out, &reader.char_string()?);
                }
                let replacement = parse_name(&mut reader, origin)?;
                out.extend_from_slice(replacement.wire_repr());
            }
            Type::SSHFP => {
                out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                out.extend_from_slice(&parse_hex_blob(&mut reader)?);
            }
            Type::DS => {
                let key_tag = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)?;
                out.extend_from_slice(&key_tag.to_be_bytes());
                out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                out.extend_from_slice(&parse_hex_blob(&mut reader)?);
            }
            Type::TLSA => {
                for _ in 0..3 {
                    out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                }
                out.extend_from_slice(&parse_hex_blob(&mut reader)?);
            }
            Type::CAA => {
                out.push(parse_u8(reader.token().ok_or(Error::UnexpectedToken)?)?);
                push_char_string(&mut out, &reader.char_string()?);
                out.extend_from_slice(&reader.char_string()?);
            }
            _ => return Err(Error::UnexpectedToken),
        }

        if rr_type != Type::TXT && rr_type != Type::SPF && !reader.finished() {
            return Err(Error::UnexpectedToken);
        }
        Self::from_octets(out)
    }

    /// Parses the RFC 3597 `\# <len> <hex>` generic form. The reader
    /// is positioned at the `\#` token.
    fn from_generic_text(reader: &mut TextReader) -> Result<Self> {
        let marker = reader.token().ok_or(Error::UnexpectedToken)?;
        if marker != "\\#" {
            return Err(Error::UnexpectedToken);
        }
        let len = parse_u16(reader.token().ok_or(Error::UnexpectedToken)?)? as usize;
        let octets = if len == 0 {
            Vec::new()
        } else {
            parse_hex_blob(reader)?
        };
        if octets.len() != len || !reader.finished() {
            return Err(Error::UnexpectedToken);
        }
        Self::from_octets(octets)
    }
}

////////////////////////////////////////////////////////////////////////
// TEXT RENDERING                                                     //
////////////////////////////////////////////////////////////////////////

/// Renders a wire-form name found at the head of `octets`; returns the
/// rendered length in octets, or `None` on malformed data.
fn render_name(out: &mut String, octets: &[u8]) -> Option<usize> {
    let len = wire_name_len(octets)?;
    if len == 1 {
        out.push('.');
        return Some(len);
    }
    let mut at = 0;
    loop {
        let label_len = octets[at] as usize;
        if label_len == 0 {
            return Some(len);
        }
        for &octet in &octets[at + 1..at + 1 + label_len] {
            if octet == b'.' {
                out.push_str("\\.");
            } else if octet == b'\\' {
                out.push_str("\\\\");
            } else if octet.is_ascii_graphic() {
                out.push(octet as char);
            } else {
                let _ = write!(out, "\\{:03}", octet);
            }
        }
        out.push('.');
        at += 1 + label_len;
    }
}

fn render_char_string(out: &mut String, string: &[u8]) {
    out.push('"');
    for &octet in string {
        if octet == b'"' || octet == b'\\' {
            out.push('\\');
            out.push(octet as char);
        } else if (b' '..=b'~').contains(&octet) {
            out.push(octet as char);
        } else {
            let _ = write!(out, "\\{:03}", octet);
        }
    }
    out.push('"');
}

fn render_hex(out: &mut String, octets: &[u8]) {
    for &octet in octets {
        out.push(char::from(nibble_to_ascii_hex_digit((octet & 0xf0) >> 4)));
        out.push(char::from(nibble_to_ascii_hex_digit(octet & 0xf)));
    }
}

impl Rdata {
    /// Renders this `Rdata` in master-file text form as a value of
    /// `rr_type`. Data that does not parse as the given type (or a
    /// type without a dedicated codec) is rendered in the RFC 3597
    /// generic form, which [`Rdata::from_text`] accepts back.
    pub fn to_text(&self, rr_type: Type) -> String {
        self.try_to_text(rr_type).unwrap_or_else(|| {
            let mut out = format!("\\# {}", self.len());
            if !self.is_empty() {
                out.push(' ');
                render_hex(&mut out, &self.octets);
            }
            out
        })
    }

    fn try_to_text(&self, rr_type: Type) -> Option<String> {
        let octets = &self.octets[..];
        let mut out = String::new();
        match rr_type {
            Type::A => {
                let quad: [u8; 4] = octets.try_into().ok()?;
                let _ = write!(out, "{}", Ipv4Addr::from(quad));
            }
            Type::AAAA => {
                let group: [u8; 16] = octets.try_into().ok()?;
                let _ = write!(out, "{}", Ipv6Addr::from(group));
            }
            Type::NS
            | Type::MD
            | Type::MF
            | Type::CNAME
            | Type::MB
            | Type::MG
            | Type::MR
            | Type::PTR
            | Type::DNAME => {
                let len = render_name(&mut out, octets)?;
                if len != octets.len() {
                    return None;
                }
            }
            Type::MX | Type::AFSDB | Type::KX => {
                let preference = u16::from_be_bytes(octets.get(0..2)?.try_into().ok()?);
                let _ = write!(out, "{} ", preference);
                let len = render_name(&mut out, &octets[2..])?;
                if 2 + len != octets.len() {
                    return None;
                }
            }
            Type::MINFO | Type::RP => {
                let first = render_name(&mut out, octets)?;
                out.push(' ');
                let second = render_name(&mut out, &octets[first..])?;
                if first + second != octets.len() {
                    return None;
                }
            }
            Type::TXT | Type::SPF => {
                let mut at = 0;
                while at < octets.len() {
                    let len = *octets.get(at)? as usize;
                    let string = octets.get(at + 1..at + 1 + len)?;
                    if at > 0 {
                        out.push(' ');
                    }
                    render_char_string(&mut out, string);
                    at += 1 + len;
                }
                if at == 0 {
                    return None;
                }
            }
            Type::HINFO => {
                let cpu_len = *octets.first()? as usize;
                let cpu = octets.get(1..1 + cpu_len)?;
                let os_at = 1 + cpu_len;
                let os_len = *octets.get(os_at)? as usize;
                let os = octets.get(os_at + 1..os_at + 1 + os_len)?;
                if os_at + 1 + os_len != octets.len() {
                    return None;
                }
                render_char_string(&mut out, cpu);
                out.push(' ');
                render_char_string(&mut out, os);
            }
            Type::SRV => {
                for i in 0..3 {
                    let field = u16::from_be_bytes(octets.get(2 * i..2 * i + 2)?.try_into().ok()?);
                    let _ = write!(out, "{} ", field);
                }
                let len = render_name(&mut out, &octets[6..])?;
                if 6 + len != octets.len() {
                    return None;
                }
            }
            Type::SOA => {
                let mname = render_name(&mut out, octets)?;
                out.push(' ');
                let rname = render_name(&mut out, &octets[mname..])?;
                let mut at = mname + rname;
                for _ in 0..5 {
                    let field = u32::from_be_bytes(octets.get(at..at + 4)?.try_into().ok()?);
                    let _ = write!(out, " {}", field);
                    at += 4;
                }
                if at != octets.len() {
                    return None;
                }
            }
            Type::NAPTR => {
                let order = u16::from_be_bytes(octets.get(0..2)?.try_into().ok()?);
                let preference = u16::from_be_bytes(octets.get(2..4)?.try_into().ok()?);
                let _ = write!(out, "{} {} ", order, preference);
                let mut at = 4;
                for _ in 0..3 {
                    let len = *octets.get(at)? as usize;
                    render_char_string(&mut out, octets.get(at + 1..at + 1 + len)?);
                    out.push(' ');
                    at += 1 + len;
                }
                let len = render_name(&mut out, &octets[at..])?;
                if at + len != octets.len() {
                    return None;
                }
            }
            Type::SSHFP => {
                let _ = write!(out, "{} {} ", *octets.first()?, *octets.get(1)?);
                if octets.len() < 3 {
                    return None;
                }
                render_hex(&mut out, &octets[2..]);
            }
            Type::DS => {
                let key_tag = u16::from_be_bytes(octets.get(0..2)?.try_into().ok()?);
                let _ = write!(out, "{} {} {} ", key_tag, *octets.get(2)?, *octets.get(3)?);
                if octets.len() < 5 {
                    return None;
                }
                render_hex(&mut out, &octets[4..]);
            }
            Type::TLSA => {
                let _ = write!(
                    out,
                    "{} {} {} ",
                    *octets.first()?,
                    *octets.get(1)?,
                    *octets.get(2)?
                );
                if octets.len() < 4 {
                    return None;
                }
                render_hex(&mut out, &octets[3..]);
            }
            Type::CAA => {
                let _ = write!(out, "{} ", *octets.first()?);
                let tag_len = *octets.get(1)? as usize;
                let tag = octets.get(2..2 + tag_len)?;
                render_char_string(&mut out, tag);
                out.push(' ');
                render_char_string(&mut out, octets.get(2 + tag_len..)?);
            }
            _ => return None,
        }
        Some(out)
    }
}

impl std::fmt::Debug for Rdata {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "\\# {}", self.len())?;
        if !self.is_empty() {
            f.write_str(" ")?;
            let mut hex = String::new();
            render_hex(&mut hex, &self.octets);
            f.write_str(&hex)?;
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
    use lazy_static::lazy_static;

    lazy_static! {
        static ref ORIGIN: Name = "example.test.".parse().unwrap();
    }

    fn round_trip(rr_type: Type, text: &str) -> Rdata {
        let rdata = Rdata::from_text(rr_type, &ORIGIN, text).unwrap();
        let rendered = rdata.to_text(rr_type);
        let reparsed = Rdata::from_text(rr_type, &ORIGIN, &rendered).unwrap();
        assert_eq!(rdata, reparsed, "{rr_type} text {text:?} → {rendered:?}");
        rdata
    }

    #[test]
    fn a_rdata_works() {
        let rdata = round_trip(Type::A, "192.0.2.1");
        assert_eq!(rdata.octets(), &[192, 0, 2, 1]);
    }

    #[test]
    fn aaaa_rdata_works() {
        let rdata = round_trip(Type::AAAA, "2001:db8::1");
        assert_eq!(rdata.len(), 16);
        assert_eq!(rdata.to_text(Type::AAAA), "2001:db8::1");
    }

    #[test]
    fn name_rdata_completes_relative_targets() {
        let rdata = Rdata::from_text(Type::NS, &ORIGIN, "ns1").unwrap();
        assert_eq!(rdata.octets(), b"\x03ns1\x07example\x04test\x00");
        assert_eq!(rdata.to_text(Type::NS), "ns1.example.test.");
    }

    #[test]
    fn mx_rdata_works() {
        let rdata = round_trip(Type::MX, "10 mail.example.test.");
        assert_eq!(&rdata.octets()[..2], &[0, 10]);
        assert_eq!(rdata.to_text(Type::MX), "10 mail.example.test.");
    }

    #[test]
    fn srv_rdata_works() {
        let rdata = round_trip(Type::SRV, "0 5 88 kdc.example.test.");
        assert_eq!(rdata.to_text(Type::SRV), "0 5 88 kdc.example.test.");
    }

    #[test]
    fn txt_rdata_handles_quoting() {
        let rdata = round_trip(Type::TXT, "\"hello world\" bare");
        assert_eq!(rdata.octets()[0], 11);
        assert_eq!(rdata.to_text(Type::TXT), "\"hello world\" \"bare\"");
    }

    #[test]
    fn soa_rdata_works() {
        let rdata = round_trip(
            Type::SOA,
            "ns root 1 3600 900 1209600 3600",
        );
        assert_eq!(
            rdata.to_text(Type::SOA),
            "ns.example.test. root.example.test. 1 3600 900 1209600 3600"
        );
    }

    #[test]
    fn soa_timers_accept_unit_forms() {
        let rdata = Rdata::from_text(Type::SOA, &ORIGIN, "ns root 1 1h 15m 2w 1h").unwrap();
        assert_eq!(
            rdata.to_text(Type::SOA),
            "ns.example.test. root.example.test. 1 3600 900 1209600 3600"
        );
    }

    #[test]
    fn naptr_rdata_works() {
        round_trip(
            Type::NAPTR,
            "100 50 \"s\" \"SIP+D2U\" \"\" _sip._udp.example.test.",
        );
    }

    #[test]
    fn sshfp_rdata_works() {
        let rdata = round_trip(Type::SSHFP, "1 1 0123456789abcdef");
        assert_eq!(rdata.octets()[..2], [1, 1]);
    }

    #[test]
    fn generic_rdata_works_for_any_type() {
        let rdata = Rdata::from_text(Type::from(65280), &ORIGIN, "\\# 3 abcdef").unwrap();
        assert_eq!(rdata.octets(), &[0xab, 0xcd, 0xef]);
        assert_eq!(rdata.to_text(Type::from(65280)), "\\# 3 abcdef");
    }

    #[test]
    fn unsupported_type_without_generic_form_is_rejected() {
        assert_eq!(
            Rdata::from_text(Type::LOC, &ORIGIN, "52 22 23.000 N 4 53 32.000 E -2.00m"),
            Err(Error::UnexpectedToken)
        );
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Rdata::from_text(Type::A, &ORIGIN, "192.0.2").is_err());
        assert!(Rdata::from_text(Type::A, &ORIGIN, "192.0.2.1 trailing").is_err());
        assert!(Rdata::from_text(Type::MX, &ORIGIN, "mail.example.test.").is_err());
        assert!(Rdata::from_text(Type::SOA, &ORIGIN, "ns root 1 2 3").is_err());
    }

    #[test]
    fn equals_compares_embedded_names_case_insensitively() {
        let lower = Rdata::from_text(Type::CNAME, &ORIGIN, "target.example.test.").unwrap();
        let upper = Rdata::from_text(Type::CNAME, &ORIGIN, "TARGET.EXAMPLE.TEST.").unwrap();
        assert!(lower.equals(&upper, Type::CNAME));
        assert_ne!(lower, upper);

        // For A records, bitwise comparison is used.
        let a1 = Rdata::from_text(Type::A, &ORIGIN, "192.0.2.1").unwrap();
        let a2 = Rdata::from_text(Type::A, &ORIGIN, "192.0.2.2").unwrap();
        assert!(!a1.equals(&a2, Type::A));
    }

    #[test]
    fn equals_mx_preference_is_bitwise() {
        // Preference octets 0x41 and 0x61 are 'A' and 'a'; a naive
        // caseless comparison of the whole RDATA would conflate them.
        let mx1 = Rdata::from_text(Type::MX, &ORIGIN, "65 x.").unwrap();
        let mx2 = Rdata::from_text(Type::MX, &ORIGIN, "97 x.").unwrap();
        assert!(!mx1.equals(&mx2, Type::MX));
    }

    #[test]
    fn equals_soa_ignores_name_case_only() {
        let soa1 = Rdata::from_text(Type::SOA, &ORIGIN, "NS root 1 2 3 4 5").unwrap();
        let soa2 = Rdata::from_text(Type::SOA, &ORIGIN, "ns ROOT 1 2 3 4 5").unwrap();
        let soa3 = Rdata::from_text(Type::SOA, &ORIGIN, "ns root 9 2 3 4 5").unwrap();
        assert!(soa1.equals(&soa2, Type::SOA));
        assert!(!soa1.equals(&soa3, Type::SOA));
    }
}
