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

//! The per-class entry handlers: configuration, zones (master and
//! forward), and records.

pub mod config;
pub mod record;
pub mod zone;

use crate::db::{Diff, DiffOp, DiffTuple, Version};
use crate::dir::{ClassSet, Entry};
use crate::errors::Result;
use crate::name::Name;
use crate::rr::{Rdata, RdataListSet, Type};

/// Parses the record content of an entry into rdata lists keyed by RR
/// type. For entries that are (also) master zones, the SOA is
/// synthesized first from the seven `idnsSOA*` attributes; ordinary
/// record attributes are parsed afterwards, so a stray `SOARecord`
/// value cannot displace the synthesized one. Relative names in
/// record values are completed against `origin`.
pub(crate) fn parse_entry_records(
    fake_mname: &str,
    entry: &Entry,
    origin: &Name,
) -> Result<RdataListSet> {
    let mut lists = RdataListSet::new();
    let class = entry.dns_class();
    let ttl = entry.ttl();

    if entry.classes().contains(ClassSet::MASTER_ZONE) {
        if let Some(soa_text) = entry.fake_soa_text(fake_mname) {
            let rdata = Rdata::from_text(Type::SOA, origin, &soa_text)?;
            lists.find_or_create(Type::SOA, class, ttl)?.push(rdata);
        }
    }

    for (attribute, rr_type) in entry.rr_attributes() {
        let values = match entry.values(attribute) {
            Some(values) => values,
            None => continue,
        };
        for value in values {
            let rdata = Rdata::from_text(rr_type, origin, value)?;
            lists.find_or_create(rr_type, class, ttl)?.push(rdata);
        }
    }
    Ok(lists)
}

/// Appends the tuples that transform the contents of `owner` in
/// `version` into `desired`: a deletion for every present record, an
/// addition for every desired one. The minimal-append rule melts the
/// unchanged majority away.
pub(crate) fn diff_node(version: &Version, owner: &Name, desired: &RdataListSet, diff: &mut Diff) {
    if let Some(node) = version.node(owner) {
        for list in node.iter() {
            for rdata in list.rdatas() {
                diff.append_minimal(DiffTuple {
                    op: DiffOp::Del,
                    name: owner.clone(),
                    rr_type: list.rr_type,
                    class: list.class,
                    ttl: list.ttl,
                    rdata: rdata.clone(),
                });
            }
        }
    }
    for list in desired.iter() {
        for rdata in list.rdatas() {
            diff.append_minimal(DiffTuple {
                op: DiffOp::Add,
                name: owner.clone(),
                rr_type: list.rr_type,
                class: list.class,
                ttl: list.ttl,
                rdata: rdata.clone(),
            });
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::ChangeType;

    fn entry(attrs: &[(&str, &[&str])]) -> Entry {
        Entry::new(
            "idnsName=example.test., cn=dns".to_owned(),
            ChangeType::Modify,
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

    /// An entry that is both a master zone and a record container gets
    /// its SOA synthesized from the `idnsSOA*` attributes *before*
    /// ordinary record attributes are parsed, so a stray `SOARecord`
    /// value cannot become the zone's primary SOA.
    #[test]
    fn soa_synthesis_precedes_record_attributes() {
        let origin: Name = "example.test.".parse().unwrap();
        let e = entry(&[
            ("objectClass", &["idnsZone", "idnsRecord"]),
            ("idnsSOAmName", &["ns"]),
            ("idnsSOArName", &["root"]),
            ("idnsSOAserial", &["7"]),
            ("idnsSOArefresh", &["3600"]),
            ("idnsSOAretry", &["900"]),
            ("idnsSOAexpire", &["1209600"]),
            ("idnsSOAminimum", &["3600"]),
            ("SOARecord", &["other root 99 1 2 3 4"]),
            ("ARecord", &["192.0.2.1"]),
        ]);
        let lists = parse_entry_records("", &e, &origin).unwrap();
        let soa = lists.get(Type::SOA).unwrap();
        let first = crate::rr::Soa::from_rdata(soa.rdatas().next().unwrap()).unwrap();
        assert_eq!(first.serial, 7);
        assert_eq!(first.mname.to_string(), "ns.example.test.");
        assert!(lists.get(Type::A).is_some());
    }

    /// The configured fake primary name overrides `idnsSOAmName`.
    #[test]
    fn fake_mname_overrides_the_entry() {
        let origin: Name = "example.test.".parse().unwrap();
        let e = entry(&[
            ("objectClass", &["idnsZone"]),
            ("idnsSOAmName", &["ns"]),
            ("idnsSOArName", &["root"]),
            ("idnsSOAserial", &["7"]),
            ("idnsSOArefresh", &["3600"]),
            ("idnsSOAretry", &["900"]),
            ("idnsSOAexpire", &["1209600"]),
            ("idnsSOAminimum", &["3600"]),
        ]);
        let lists = parse_entry_records("fake.primary.", &e, &origin).unwrap();
        let soa = lists.get(Type::SOA).unwrap();
        let parsed = crate::rr::Soa::from_rdata(soa.rdatas().next().unwrap()).unwrap();
        assert_eq!(parsed.mname.to_string(), "fake.primary.");
    }

    /// Entries with heterogeneous TTLs across one type are refused.
    #[test]
    fn mixed_ttls_are_not_implemented() {
        let origin: Name = "example.test.".parse().unwrap();
        let mut lists = RdataListSet::new();
        let rdata = Rdata::from_text(Type::A, &origin, "192.0.2.1").unwrap();
        lists
            .add(Type::A, crate::class::Class::IN, crate::rr::Ttl::from(60), rdata)
            .unwrap();
        let other = Rdata::from_text(Type::A, &origin, "192.0.2.2").unwrap();
        assert!(lists
            .add(Type::A, crate::class::Class::IN, crate::rr::Ttl::from(90), other)
            .is_err());
    }
}
