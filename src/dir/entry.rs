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

//! The in-memory representation of a directory entry.

use std::fmt;
use std::str::FromStr;

use crate::class::Class;
use crate::rr::{Ttl, Type, DEFAULT_TTL};

////////////////////////////////////////////////////////////////////////
// CHANGE TYPES                                                       //
////////////////////////////////////////////////////////////////////////

/// How an entry arrived through the change stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeType {
    /// The entry was newly added.
    Add,
    /// The entry was modified.
    Modify,
    /// The entry was reported as present during a refresh phase.
    Present,
    /// The entry was deleted. Deleted entries carry no attributes.
    Delete,
}

impl ChangeType {
    /// Returns whether this is a delete event.
    pub fn is_delete(self) -> bool {
        self == Self::Delete
    }
}

////////////////////////////////////////////////////////////////////////
// OBJECT CLASS SETS                                                  //
////////////////////////////////////////////////////////////////////////

/// The set of engine-relevant object classes attached to an entry.
///
/// A single entry may carry several: FreeIPA, for instance, stores the
/// apex records of a master zone on the zone entry itself, which is
/// then both `MASTER_ZONE` and `RECORD`.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct ClassSet(u8);

impl ClassSet {
    pub const CONFIG: Self = Self(1 << 0);
    pub const MASTER_ZONE: Self = Self(1 << 1);
    pub const FORWARD_ZONE: Self = Self(1 << 2);
    pub const RECORD: Self = Self(1 << 3);

    /// Returns the empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns whether every class in `other` is in this set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Inserts the classes of `other` into this set.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Returns whether the set is empty.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Derives a class set from `objectClass` attribute values.
    pub fn from_object_classes<'a>(values: impl Iterator<Item = &'a str>) -> Self {
        let mut set = Self::empty();
        for value in values {
            if value.eq_ignore_ascii_case("idnsConfigObject") {
                set.insert(Self::CONFIG);
            } else if value.eq_ignore_ascii_case("idnsZone") {
                set.insert(Self::MASTER_ZONE);
            } else if value.eq_ignore_ascii_case("idnsForwardZone") {
                set.insert(Self::FORWARD_ZONE);
            } else if value.eq_ignore_ascii_case("idnsRecord") {
                set.insert(Self::RECORD);
            }
        }
        set
    }
}

impl fmt::Debug for ClassSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut list = f.debug_list();
        for (class, name) in [
            (Self::CONFIG, "CONFIG"),
            (Self::MASTER_ZONE, "MASTER_ZONE"),
            (Self::FORWARD_ZONE, "FORWARD_ZONE"),
            (Self::RECORD, "RECORD"),
        ] {
            if self.contains(class) {
                list.entry(&name);
            }
        }
        list.finish()
    }
}

////////////////////////////////////////////////////////////////////////
// ENTRIES                                                            //
////////////////////////////////////////////////////////////////////////

/// The seven SOA field attributes, in RDATA order.
const SOA_ATTRIBUTES: [&str; 7] = [
    "idnsSOAmName",
    "idnsSOArName",
    "idnsSOAserial",
    "idnsSOArefresh",
    "idnsSOAretry",
    "idnsSOAexpire",
    "idnsSOAminimum",
];

/// The suffix that marks an attribute as carrying record data.
const RECORD_SUFFIX: &str = "Record";

/// A directory entry as delivered by the change stream: its DN, how it
/// changed, and its attributes (a case-insensitive name → value-list
/// mapping, case-preserving on values).
pub struct Entry {
    dn: String,
    change: ChangeType,
    attributes: Vec<(String, Vec<String>)>,
    classes: ClassSet,
}

impl Entry {
    /// Builds an entry, deriving its object-class set from the
    /// `objectClass` attribute values.
    pub fn new(dn: String, change: ChangeType, attributes: Vec<(String, Vec<String>)>) -> Self {
        let classes = attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("objectClass"))
            .map(|(_, values)| ClassSet::from_object_classes(values.iter().map(String::as_str)))
            .unwrap_or_default();
        Self {
            dn,
            change,
            attributes,
            classes,
        }
    }

    /// Returns the entry's DN.
    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns how the entry changed.
    pub fn change(&self) -> ChangeType {
        self.change
    }

    /// Returns the entry's object-class set. Empty for delete events,
    /// which carry no attributes.
    pub fn classes(&self) -> ClassSet {
        self.classes
    }

    /// Returns all values of the named attribute (case-insensitive).
    pub fn values(&self, attribute: &str) -> Option<&[String]> {
        self.attributes
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values.as_slice())
    }

    /// Returns the first value of the named attribute.
    pub fn first_value(&self, attribute: &str) -> Option<&str> {
        self.values(attribute)?.first().map(String::as_str)
    }

    /// Iterates over the record attributes of this entry: attributes
    /// whose name is `<TYPE>Record` where `<TYPE>` parses as an RR
    /// type the engine knows. Yields the attribute name and the type.
    pub fn rr_attributes(&self) -> impl Iterator<Item = (&str, Type)> + '_ {
        self.attributes.iter().filter_map(|(name, _)| {
            let prefix_len = name.len().checked_sub(RECORD_SUFFIX.len())?;
            if prefix_len == 0 || !name[prefix_len..].eq_ignore_ascii_case(RECORD_SUFFIX) {
                return None;
            }
            let rr_type = Type::from_str(&name[..prefix_len]).ok()?;
            Some((name.as_str(), rr_type))
        })
    }

    /// Returns the node TTL: the parsed `dnsTTL` attribute, or the
    /// default of 86400 seconds when absent or malformed.
    pub fn ttl(&self) -> Ttl {
        self.first_value("dnsTTL")
            .and_then(|text| text.parse().ok())
            .unwrap_or(DEFAULT_TTL)
    }

    /// Returns the entry's DNS class. The directory schema has no
    /// class attribute today; everything is `IN`.
    pub fn dns_class(&self) -> Class {
        Class::IN
    }

    /// Composes the master-file text of the entry's SOA record from
    /// the seven `idnsSOA*` attributes. A non-empty `fake_mname`
    /// overrides `idnsSOAmName`. Returns `None` if any required
    /// attribute is missing.
    pub fn fake_soa_text(&self, fake_mname: &str) -> Option<String> {
        let mut text = String::new();
        let mut fields = SOA_ATTRIBUTES.iter();
        if !fake_mname.is_empty() {
            text.push_str(fake_mname);
            text.push(' ');
            fields.next();
        }
        for attribute in fields {
            text.push_str(self.first_value(attribute)?);
            text.push(' ');
        }
        Some(text)
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Entry")
            .field("dn", &self.dn)
            .field("change", &self.change)
            .field("classes", &self.classes)
            .field("attributes", &self.attributes.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(attrs: &[(&str, &[&str])]) -> Entry {
        Entry::new(
            "idnsName=example.test., cn=dns".to_owned(),
            ChangeType::Add,
            attrs
                .iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn classes_derive_from_object_class_values() {
        let e = entry(&[("objectClass", &["top", "idnsZone", "idnsRecord"])]);
        assert!(e.classes().contains(ClassSet::MASTER_ZONE));
        assert!(e.classes().contains(ClassSet::RECORD));
        assert!(!e.classes().contains(ClassSet::CONFIG));
    }

    #[test]
    fn attribute_lookup_is_case_insensitive() {
        let e = entry(&[("ARecord", &["192.0.2.1", "192.0.2.2"])]);
        assert_eq!(e.values("arecord").unwrap().len(), 2);
        assert_eq!(e.first_value("ARECORD"), Some("192.0.2.1"));
        assert_eq!(e.first_value("AAAARecord"), None);
    }

    #[test]
    fn rr_attributes_recognize_known_types() {
        let e = entry(&[
            ("ARecord", &["192.0.2.1"]),
            ("mxRECORD", &["10 mail"]),
            ("TYPE65280Record", &["\\# 0"]),
            ("FROBRecord", &["x"]),
            ("Record", &["x"]),
            ("dnsTTL", &["300"]),
        ]);
        let mut found: Vec<(String, Type)> = e
            .rr_attributes()
            .map(|(name, t)| (name.to_owned(), t))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(
            found,
            vec![
                ("ARecord".to_owned(), Type::A),
                ("TYPE65280Record".to_owned(), Type::from(65280)),
                ("mxRECORD".to_owned(), Type::MX),
            ]
        );
    }

    #[test]
    fn ttl_parses_or_defaults() {
        assert_eq!(u32::from(entry(&[("dnsTTL", &["300"])]).ttl()), 300);
        assert_eq!(u32::from(entry(&[]).ttl()), 86400);
        assert_eq!(u32::from(entry(&[("dnsTTL", &["junk"])]).ttl()), 86400);
    }

    #[test]
    fn fake_soa_composition_works() {
        let e = entry(&[
            ("idnsSOAmName", &["ns.example.test."]),
            ("idnsSOArName", &["root"]),
            ("idnsSOAserial", &["1"]),
            ("idnsSOArefresh", &["3600"]),
            ("idnsSOAretry", &["900"]),
            ("idnsSOAexpire", &["1209600"]),
            ("idnsSOAminimum", &["3600"]),
        ]);
        assert_eq!(
            e.fake_soa_text("").unwrap(),
            "ns.example.test. root 1 3600 900 1209600 3600 "
        );
        assert_eq!(
            e.fake_soa_text("fake.primary.").unwrap(),
            "fake.primary. root 1 3600 900 1209600 3600 "
        );
    }

    #[test]
    fn fake_soa_requires_all_attributes() {
        let e = entry(&[("idnsSOAmName", &["ns"])]);
        assert_eq!(e.fake_soa_text(""), None);
    }
}
