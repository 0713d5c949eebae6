// Copyright 2023 Matthew Ingwersen.
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

//! Conversion between DNS names and directory DNs.
//!
//! A zone's DN carries one `idnsName` component (its origin); a
//! record's DN carries two (owner relative to the zone, then the
//! origin); the configuration entry carries none. Both directions of
//! the mapping live here, together with the escape transformations
//! they depend on.
//!
//! **The escape functions mangle input received from the network and
//! are security-sensitive.** Every byte outside `[A-Za-z0-9._-]` must
//! be hex-escaped on the way into a DN; any ambiguity here can be
//! leveraged into directory injection.

use std::fmt::Write as _;
use std::path::PathBuf;

use log::error;

use crate::errors::{Error, Result};
use crate::name::Name;
use crate::register::ZoneRegister;
use crate::util::{ascii_hex_digit_to_nibble, is_dn_safe_byte, nibble_to_ascii_hex_digit};

/// The attribute that carries DNS names in DNs.
const NAME_ATTRIBUTE: &str = "idnsName";

////////////////////////////////////////////////////////////////////////
// ESCAPE TRANSFORMATIONS                                             //
////////////////////////////////////////////////////////////////////////

/// Converts a DNS-escaped name string into the directory's DN escape
/// form.
///
/// The input is master-file text (the output of the [`Name`] display
/// form): labels may contain `\DDD` decimal escapes and `\X`
/// single-character escapes, and some unusual bytes (e.g. `,`) appear
/// entirely unescaped. The output uses `\HH` hex escapes for every
/// byte outside `[A-Za-z0-9._-]`; input consisting only of safe bytes
/// is copied verbatim.
///
/// A malformed master-file escape is fatal for the conversion
/// ([`Error::BadEscape`]) and logged as a bug: the input is supposed
/// to be produced by our own name rendering.
pub fn dns_to_dn_escape(dns_str: &str) -> Result<String> {
    let bytes = dns_str.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut at = 0;
    while at < bytes.len() {
        let byte = bytes[at];
        if is_dn_safe_byte(byte) {
            out.push(byte as char);
            at += 1;
            continue;
        }
        let value = if byte == b'\\' {
            // A DNS escape: \DDD or \X.
            let first = *bytes.get(at + 1).ok_or_else(|| bad_escape(dns_str))?;
            if first.is_ascii_digit() {
                let tens = *bytes.get(at + 2).ok_or_else(|| bad_escape(dns_str))?;
                let ones = *bytes.get(at + 3).ok_or_else(|| bad_escape(dns_str))?;
                if !tens.is_ascii_digit() || !ones.is_ascii_digit() {
                    return Err(bad_escape(dns_str));
                }
                let value = 100 * (first - b'0') as u32
                    + 10 * (tens - b'0') as u32
                    + (ones - b'0') as u32;
                if value > 255 {
                    return Err(bad_escape(dns_str));
                }
                at += 4;
                value as u8
            } else {
                at += 2;
                first
            }
        } else {
            // An unescaped unusual byte.
            at += 1;
            byte
        };
        out.push('\\');
        out.push(char::from(nibble_to_ascii_hex_digit((value & 0xf0) >> 4)));
        out.push(char::from(nibble_to_ascii_hex_digit(value & 0xf)));
    }
    Ok(out)
}

fn bad_escape(input: &str) -> Error {
    error!("improperly escaped DNS string: '{}'", input);
    Error::BadEscape
}

/// Converts a DN attribute value (with `\HH` hex escapes and `\X`
/// special-character escapes) into DNS master-file text suitable for
/// [`Name::from_text`]. Escaped bytes become `\DDD` decimal escapes,
/// so a hex-escaped dot stays label content while an unescaped dot
/// stays a label separator. The round trip depends on that
/// distinction.
pub fn dn_value_to_dns_text(value: &str) -> Result<String> {
    let bytes = value.as_bytes();
    let mut out = String::with_capacity(bytes.len());
    let mut at = 0;
    while at < bytes.len() {
        let byte = bytes[at];
        if byte != b'\\' {
            out.push(byte as char);
            at += 1;
            continue;
        }
        let first = *bytes.get(at + 1).ok_or(Error::BadEscape)?;
        let value = match (
            ascii_hex_digit_to_nibble(first),
            bytes.get(at + 2).copied().and_then(ascii_hex_digit_to_nibble),
        ) {
            (Some(high), Some(low)) => {
                at += 3;
                (high << 4) | low
            }
            _ => {
                // An escaped special character, e.g. `\,`.
                at += 2;
                first
            }
        };
        let _ = write!(out, "\\{:03}", value);
    }
    Ok(out)
}

////////////////////////////////////////////////////////////////////////
// DN PARSING                                                         //
////////////////////////////////////////////////////////////////////////

/// Splits `text` on unescaped occurrences of `sep`.
fn split_unescaped(text: &str, sep: u8) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, &byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == sep {
            parts.push(&text[start..i]);
            start = i + 1;
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Finds the position of the first unescaped occurrence of `sep`.
fn find_unescaped(text: &str, sep: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut escaped = false;
    for (i, &byte) in bytes.iter().enumerate() {
        if escaped {
            escaped = false;
        } else if byte == b'\\' {
            escaped = true;
        } else if byte == sep {
            return Some(i);
        }
    }
    None
}

/// Splits a DN into `(attribute, value)` pairs. Multi-valued RDNs
/// (e.g. `cn=a+sn=b`) are rejected: nothing in the schema produces
/// them, so one showing up is an error worth refusing.
pub fn explode_dn(dn: &str) -> Result<Vec<(&str, &str)>> {
    let mut rdns = Vec::new();
    for component in split_unescaped(dn, b',') {
        let component = component.trim();
        if component.is_empty() {
            return Err(Error::UnexpectedToken);
        }
        if find_unescaped(component, b'+').is_some() {
            error!("multi-valued RDNs are not supported: '{}'", dn);
            return Err(Error::NotImplemented);
        }
        let eq = find_unescaped(component, b'=').ok_or(Error::UnexpectedToken)?;
        rdns.push((component[..eq].trim(), component[eq + 1..].trim()));
    }
    Ok(rdns)
}

/// Canonicalizes a DN for comparison: case is folded and the optional
/// space after each RDN separator is dropped.
pub fn normalize_dn(dn: &str) -> String {
    let mut out = String::with_capacity(dn.len());
    let mut escaped = false;
    let mut after_comma = false;
    for c in dn.chars() {
        if after_comma && c == ' ' {
            continue;
        }
        after_comma = false;
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == ',' {
            after_comma = true;
        }
        out.extend(c.to_lowercase());
    }
    out
}

/// Returns whether `dn` names the same entry as `base`
/// (case-insensitively, canonicalized).
pub fn dn_matches_base(dn: &str, base: &str) -> bool {
    normalize_dn(dn) == normalize_dn(base)
}

/// Derives DNS names from a DN carrying one or two `idnsName`
/// components.
///
/// One component is a zone origin; two are a record owner under that
/// origin. The returned pair is `(owner, origin)`; for a zone entry
/// the owner *is* the origin's name rooted at the DNS root.
///
/// With two components, the owner must be a *proper* subdomain of the
/// origin: out-of-zone data and attempts to respecify the apex (which
/// the one-component form already denotes) both fail with
/// [`Error::BadOwnerName`].
pub fn name_from_dn(dn: &str) -> Result<(Name, Name)> {
    let rdns = explode_dn(dn)?;
    let mut components = Vec::new();
    for (attr, value) in &rdns {
        if components.len() >= 2 || !attr.eq_ignore_ascii_case(NAME_ATTRIBUTE) {
            break;
        }
        components.push(*value);
    }

    let result = match components.len() {
        0 => {
            error!("no {} component found in DN '{}'", NAME_ATTRIBUTE, dn);
            Err(Error::UnexpectedToken)
        }
        1 => {
            let text = dn_value_to_dns_text(components[0])?;
            let name = Name::from_text(&text, Some(Name::root()))?;
            Ok((name, Name::root().clone()))
        }
        _ => {
            let origin_text = dn_value_to_dns_text(components[1])?;
            let origin = Name::from_text(&origin_text, Some(Name::root()))?;
            let owner_text = dn_value_to_dns_text(components[0])?;
            let owner = Name::from_text(&owner_text, Some(&origin))?;
            if owner == origin {
                error!(
                    "attempt to redefine zone apex: first {} equals the zone name in '{}'",
                    NAME_ATTRIBUTE, dn
                );
                Err(Error::BadOwnerName)
            } else if !owner.is_subdomain_of(&origin) {
                error!(
                    "out-of-zone data: first {} is not a subdomain of the other in '{}'",
                    NAME_ATTRIBUTE, dn
                );
                Err(Error::BadOwnerName)
            } else {
                Ok((owner, origin))
            }
        }
    };
    if result.is_err() {
        error!("failed to convert DN '{}' to a DNS name", dn);
    }
    result
}

////////////////////////////////////////////////////////////////////////
// DN CONSTRUCTION                                                    //
////////////////////////////////////////////////////////////////////////

/// Renders the DN of `name` by locating its deepest registered
/// ancestor zone: the labels above the zone origin become an escaped
/// `idnsName` component prefixed to the zone's DN. A name that *is* a
/// zone origin maps to the zone DN itself.
pub fn name_to_dn(register: &ZoneRegister, name: &Name) -> Result<String> {
    let (zone_dn, matched) = register.get_dn(name).ok_or(Error::NotFound)?;
    let label_count = name.len() - matched.len();
    if label_count == 0 {
        return Ok(zone_dn);
    }
    let dns_text = name.prefix(label_count).to_string();
    let escaped = dns_to_dn_escape(&dns_text)?;
    // NOTE: write-back splits the owner DN at the first ", " to
    // recover the zone DN, so the separator must stay exactly this.
    Ok(format!("{}={}, {}", NAME_ATTRIBUTE, escaped, zone_dn))
}

////////////////////////////////////////////////////////////////////////
// FILESYSTEM NAMES                                                   //
////////////////////////////////////////////////////////////////////////

/// Renders a zone origin as a filesystem-safe directory name: letters
/// are lowercased, digits and `._-` are kept, every other byte
/// becomes `%HH`, the trailing dot is dropped, and the root zone maps
/// to `@` (avoiding a collision with the filesystem's `.`).
pub fn filesafe_name(origin: &Name) -> String {
    if origin.is_root() {
        return "@".to_owned();
    }
    let mut out = String::new();
    for (i, label) in origin.labels().enumerate() {
        if label.is_null() {
            break;
        }
        if i > 0 {
            out.push('.');
        }
        for &byte in label.octets() {
            if byte.is_ascii_alphanumeric() {
                out.push(byte.to_ascii_lowercase() as char);
            } else if byte == b'-' || byte == b'_' {
                out.push(byte as char);
            } else {
                out.push('%');
                out.push(char::from(nibble_to_ascii_hex_digit((byte & 0xf0) >> 4).to_ascii_uppercase()));
                out.push(char::from(nibble_to_ascii_hex_digit(byte & 0xf).to_ascii_uppercase()));
            }
        }
    }
    out
}

/// Builds the on-disk path of a zone artifact:
/// `<directory>/master/<filesafe-origin>/<component>`.
pub fn zone_path(directory: &str, origin: &Name, component: &str) -> PathBuf {
    let mut path = PathBuf::from(directory);
    path.push("master");
    path.push(filesafe_name(origin));
    if !component.is_empty() {
        path.push(component);
    }
    path
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::db::ZoneDb;
    use crate::register::ZoneInfo;
    use crate::settings::SettingsSet;
    use crate::task::{Task, TaskSet};
    use std::sync::Arc;

    #[test]
    fn escape_passes_safe_strings_through() {
        assert_eq!(dns_to_dn_escape("example.org.").unwrap(), "example.org.");
        assert_eq!(
            dns_to_dn_escape("a-b_c.123.test.").unwrap(),
            "a-b_c.123.test."
        );
    }

    #[test]
    fn escape_handles_all_dns_escape_forms() {
        // The two DNS escape forms plus raw unusual bytes, after
        // the conversion documented in the original driver:
        //   \$.\255_aaa,bbb\127\000ccc.555.ddd-eee
        //   \24.\ff_aaa\2cbbb\7f\00ccc.555.ddd-eee
        assert_eq!(
            dns_to_dn_escape("\\$.\\255_aaa,bbb\\127\\000ccc.555.ddd-eee").unwrap(),
            "\\24.\\ff_aaa\\2cbbb\\7f\\00ccc.555.ddd-eee"
        );
    }

    #[test]
    fn escape_rejects_malformed_input() {
        assert_eq!(dns_to_dn_escape("abc\\"), Err(Error::BadEscape));
        assert_eq!(dns_to_dn_escape("a\\12"), Err(Error::BadEscape));
        assert_eq!(dns_to_dn_escape("a\\12x"), Err(Error::BadEscape));
        assert_eq!(dns_to_dn_escape("a\\999"), Err(Error::BadEscape));
    }

    #[test]
    fn escape_output_uses_only_safe_bytes() {
        for byte in 0..=255u8 {
            let input = format!("\\{:03}", byte);
            let escaped = dns_to_dn_escape(&input).unwrap();
            assert!(
                escaped
                    .bytes()
                    .all(|b| is_dn_safe_byte(b) || b == b'\\'),
                "byte {byte:#x} produced {escaped:?}"
            );
        }
    }

    #[test]
    fn escape_round_trips_through_dn_values() {
        for byte in 0..=255u8 {
            let input = format!("\\{:03}", byte);
            let escaped = dns_to_dn_escape(&input).unwrap();
            let back = dn_value_to_dns_text(&escaped).unwrap();
            // An escaped input byte always comes back as a \DDD
            // escape of the same value.
            assert_eq!(back, format!("\\{:03}", byte), "byte {byte:#x}");
        }
    }

    #[test]
    fn explode_dn_rejects_multi_valued_rdns() {
        assert_eq!(
            explode_dn("idnsName=a+sn=b, cn=dns").err(),
            Some(Error::NotImplemented)
        );
        // An escaped plus is label content, not an RDN separator.
        assert!(explode_dn("idnsName=a\\+b, cn=dns").is_ok());
    }

    #[test]
    fn name_from_dn_handles_zone_dns() {
        let (owner, origin) =
            name_from_dn("idnsName=example.org., cn=dns, dc=example, dc=org").unwrap();
        assert_eq!(owner.to_string(), "example.org.");
        assert!(origin.is_root());

        // Without the trailing dot the component is still absolute
        // (completed at the root).
        let (owner, _) = name_from_dn("idnsname=4.34.10.in-addr.arpa, cn=dns").unwrap();
        assert_eq!(owner.to_string(), "4.34.10.in-addr.arpa.");
    }

    #[test]
    fn name_from_dn_handles_record_dns() {
        let (owner, origin) =
            name_from_dn("idnsName=foo.bar, idnsName=example.org., cn=dns").unwrap();
        assert_eq!(owner.to_string(), "foo.bar.example.org.");
        assert_eq!(origin.to_string(), "example.org.");

        let (owner, origin) = name_from_dn("idnsname=89, idnsname=4.34.10.in-addr.arpa, cn=dns")
            .unwrap();
        assert_eq!(owner.to_string(), "89.4.34.10.in-addr.arpa.");
        assert_eq!(origin.to_string(), "4.34.10.in-addr.arpa.");
    }

    #[test]
    fn name_from_dn_rejects_bad_owners() {
        // An absolute owner outside the zone.
        assert_eq!(
            name_from_dn("idnsName=third.test., idnsName=other.test., cn=dns").err(),
            Some(Error::BadOwnerName)
        );
        // The apex must use the one-component form.
        assert_eq!(
            name_from_dn("idnsName=test., idnsName=test., cn=dns").err(),
            Some(Error::BadOwnerName)
        );
        // No idnsName at all.
        assert_eq!(
            name_from_dn("cn=dns, dc=example").err(),
            Some(Error::UnexpectedToken)
        );
    }

    fn register_with_zone(origin: &str, dn: &str) -> (Arc<ZoneRegister>, Arc<TaskSet>) {
        let set = TaskSet::new();
        let register = ZoneRegister::new();
        let origin: Name = origin.parse().unwrap();
        let db = ZoneDb::new(origin.clone(), Class::IN);
        let settings = SettingsSet::new("zone test", &[], None);
        let task = Task::new(&set, "zone test").unwrap();
        register
            .add(ZoneInfo::new(origin, dn.to_owned(), db, None, settings, task))
            .unwrap();
        (register, set)
    }

    #[test]
    fn name_to_dn_renders_owners_and_apexes() {
        let (register, set) =
            register_with_zone("example.org.", "idnsName=example.org., cn=dns");

        let apex: Name = "example.org.".parse().unwrap();
        assert_eq!(
            name_to_dn(&register, &apex).unwrap(),
            "idnsName=example.org., cn=dns"
        );

        let owner: Name = "foo.bar.example.org.".parse().unwrap();
        assert_eq!(
            name_to_dn(&register, &owner).unwrap(),
            "idnsName=foo.bar, idnsName=example.org., cn=dns"
        );

        let outside: Name = "other.test.".parse().unwrap();
        assert_eq!(name_to_dn(&register, &outside), Err(Error::NotFound));
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn name_round_trips_through_dn_form() {
        let (register, set) =
            register_with_zone("example.org.", "idnsName=example.org., cn=dns");
        for text in ["host.example.org.", "a.b.c.example.org.", "x-1_y.example.org."] {
            let name: Name = text.parse().unwrap();
            let dn = name_to_dn(&register, &name).unwrap();
            let (owner, _) = name_from_dn(&dn).unwrap();
            assert_eq!(owner, name, "{text}");
        }
        // A label with bytes needing both escape layers.
        let origin: Name = "example.org.".parse().unwrap();
        let odd = Name::from_text("a\\.b\\044c", Some(&origin)).unwrap();
        let dn = name_to_dn(&register, &odd).unwrap();
        let (owner, _) = name_from_dn(&dn).unwrap();
        assert_eq!(owner, odd);
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn dn_base_comparison_is_canonicalized() {
        assert!(dn_matches_base(
            "CN=dns, DC=Example,DC=Test",
            "cn=dns,dc=example, dc=test"
        ));
        assert!(!dn_matches_base("cn=dns,dc=a", "cn=dns,dc=b"));
    }

    #[test]
    fn filesafe_names_match_documented_forms() {
        let root = Name::root();
        assert_eq!(filesafe_name(root), "@");
        let plain: Name = "test.".parse().unwrap();
        assert_eq!(filesafe_name(&plain), "test");
        let odd = Name::from_text("TEST.0\\/1.a.", None).unwrap();
        assert_eq!(filesafe_name(&odd), "test.0%2F1.a");
    }

    #[test]
    fn zone_paths_compose() {
        let origin: Name = "example.test.".parse().unwrap();
        assert_eq!(
            zone_path("/var/named/dyndb-ldap/ipa/", &origin, "raw"),
            PathBuf::from("/var/named/dyndb-ldap/ipa/master/example.test/raw")
        );
    }
}
