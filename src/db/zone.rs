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

//! Implementation of the [`ZoneDb`] versioned zone database.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::class::Class;
use crate::errors::{Error, Result};
use crate::name::Name;
use crate::rr::{Rdata, RdataList, RdataListSet, Soa, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// ZONE DATABASE                                                      //
////////////////////////////////////////////////////////////////////////

/// A versioned in-memory zone database.
///
/// The committed contents are an immutable snapshot behind an
/// [`RwLock`]; readers clone the [`Arc`] and never block writers.
/// Mutation goes through a [`Version`]: a copy of the snapshot that
/// accumulates changes and replaces the committed state atomically on
/// [`Version::commit`]. Dropping a version without committing
/// abandons its changes, which is the rollback path for failed
/// projections.
pub struct ZoneDb {
    origin: Name,
    class: Class,
    committed: RwLock<Arc<ZoneData>>,
}

/// The record contents of one snapshot: owner name → RRset list.
///
/// A flat ordered map (rather than a label tree) is enough here: the
/// engine enumerates and mutates nodes but never runs the downward
/// lookup algorithm, which belongs to the host server.
#[derive(Clone, Default)]
pub(super) struct ZoneData {
    pub(super) nodes: BTreeMap<Name, RdataListSet>,
}

impl ZoneDb {
    /// Creates a new, empty database for `origin`.
    pub fn new(origin: Name, class: Class) -> Arc<Self> {
        Arc::new(Self {
            origin,
            class,
            committed: RwLock::new(Arc::new(ZoneData::default())),
        })
    }

    /// Returns the zone origin.
    pub fn origin(&self) -> &Name {
        &self.origin
    }

    /// Returns the zone class.
    pub fn class(&self) -> Class {
        self.class
    }

    /// Opens a fresh version seeded with the committed contents.
    pub fn new_version(self: &Arc<Self>) -> Version {
        let data = self.committed.read().unwrap();
        Version {
            db: self.clone(),
            data: (**data).clone(),
        }
    }

    /// Returns whether the committed contents hold no records at all.
    pub fn is_empty(&self) -> bool {
        self.committed.read().unwrap().nodes.is_empty()
    }

    /// Returns a clone of the committed rdata list at
    /// `(name, rr_type)`, if present.
    pub fn find_rdatalist(&self, name: &Name, rr_type: Type) -> Option<RdataList> {
        let data = self.committed.read().unwrap();
        data.nodes.get(name)?.get(rr_type).cloned()
    }

    /// Returns the number of record types present at `name` in the
    /// committed contents.
    pub fn type_count_at(&self, name: &Name) -> usize {
        let data = self.committed.read().unwrap();
        data.nodes.get(name).map_or(0, |node| node.iter().count())
    }

    /// Returns the committed SOA serial, if the apex SOA exists.
    pub fn serial(&self) -> Option<u32> {
        let data = self.committed.read().unwrap();
        let soa = data.nodes.get(&self.origin)?.get(Type::SOA)?;
        let serial = Soa::serial_of(soa.rdatas().next()?).ok();
        serial
    }

    /// Dumps the committed contents as a master file at `path`,
    /// replacing any previous dump. This is the `raw` zone file the
    /// host server loads and transfers from.
    pub fn dump_to(&self, path: &std::path::Path) -> Result<()> {
        use std::io::Write;
        let data = self.committed.read().unwrap();
        let file = std::fs::File::create(path)?;
        let mut out = std::io::BufWriter::new(file);
        writeln!(out, "$ORIGIN {}", self.origin)?;
        for (name, node) in &data.nodes {
            for list in node.iter() {
                for rdata in list.rdatas() {
                    writeln!(
                        out,
                        "{} {} {} {} {}",
                        name,
                        list.ttl,
                        list.class,
                        list.rr_type,
                        rdata.to_text(list.rr_type)
                    )?;
                }
            }
        }
        out.flush()?;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// VERSIONS                                                           //
////////////////////////////////////////////////////////////////////////

/// An open version of a [`ZoneDb`].
pub struct Version {
    db: Arc<ZoneDb>,
    data: ZoneData,
}

impl Version {
    /// Returns the origin of the underlying database.
    pub fn origin(&self) -> &Name {
        self.db.origin()
    }

    /// Returns the RRset list at `name`, if the node exists.
    pub fn node(&self, name: &Name) -> Option<&RdataListSet> {
        self.data.nodes.get(name)
    }

    /// Iterates over all nodes in canonical name order.
    pub fn nodes(&self) -> impl Iterator<Item = (&Name, &RdataListSet)> + '_ {
        self.data.nodes.iter()
    }

    /// Returns the apex SOA RDATA, if present.
    pub fn soa_rdata(&self) -> Option<Rdata> {
        let soa = self.data.nodes.get(&self.db.origin)?.get(Type::SOA)?;
        soa.rdatas().next().cloned()
    }

    /// Returns the SOA serial of this version, if the apex SOA exists.
    pub fn serial(&self) -> Option<u32> {
        Soa::serial_of(&self.soa_rdata()?).ok()
    }

    /// Adds one record. The owner must be at or below the origin.
    pub(super) fn add_rdata(
        &mut self,
        name: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: Rdata,
    ) -> Result<()> {
        if !name.eq_or_subdomain_of(&self.db.origin) {
            return Err(Error::NotFound);
        }
        if class != self.db.class {
            return Err(Error::NotImplemented);
        }
        self.data
            .nodes
            .entry(name.clone())
            .or_default()
            .add(rr_type, class, ttl, rdata)
    }

    /// Removes one record, dropping the node once it holds nothing.
    pub(super) fn del_rdata(&mut self, name: &Name, rr_type: Type, rdata: &Rdata) -> Result<()> {
        let node = self.data.nodes.get_mut(name).ok_or(Error::NotFound)?;
        if !node.remove(rr_type, rdata) {
            return Err(Error::NotFound);
        }
        if node.is_empty() {
            self.data.nodes.remove(name);
        }
        Ok(())
    }

    /// Commits this version, atomically replacing the committed
    /// contents of the database.
    pub fn commit(self) {
        let mut committed = self.db.committed.write().unwrap();
        *committed = Arc::new(self.data);
    }

    // Abandoning a version is just dropping it: the committed
    // snapshot was never touched.
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rr::{Ttl, DEFAULT_TTL};

    fn origin() -> Name {
        "example.test.".parse().unwrap()
    }

    fn a_rdata(text: &str) -> Rdata {
        Rdata::from_text(Type::A, &origin(), text).unwrap()
    }

    #[test]
    fn committed_state_is_unchanged_until_commit() {
        let db = ZoneDb::new(origin(), Class::IN);
        let mut version = db.new_version();
        let host: Name = "host.example.test.".parse().unwrap();
        version
            .add_rdata(&host, Type::A, Class::IN, DEFAULT_TTL, a_rdata("192.0.2.1"))
            .unwrap();
        assert!(db.find_rdatalist(&host, Type::A).is_none());
        version.commit();
        assert_eq!(db.find_rdatalist(&host, Type::A).unwrap().len(), 1);
    }

    #[test]
    fn abandoned_versions_roll_back() {
        let db = ZoneDb::new(origin(), Class::IN);
        let host: Name = "host.example.test.".parse().unwrap();
        let mut version = db.new_version();
        version
            .add_rdata(&host, Type::A, Class::IN, DEFAULT_TTL, a_rdata("192.0.2.1"))
            .unwrap();
        drop(version);
        assert!(db.is_empty());
    }

    #[test]
    fn del_rdata_prunes_empty_nodes() {
        let db = ZoneDb::new(origin(), Class::IN);
        let host: Name = "host.example.test.".parse().unwrap();
        let mut version = db.new_version();
        version
            .add_rdata(&host, Type::A, Class::IN, DEFAULT_TTL, a_rdata("192.0.2.1"))
            .unwrap();
        version.del_rdata(&host, Type::A, &a_rdata("192.0.2.1")).unwrap();
        assert!(version.node(&host).is_none());
        assert_eq!(
            version.del_rdata(&host, Type::A, &a_rdata("192.0.2.1")),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn add_rdata_rejects_out_of_zone_owners() {
        let db = ZoneDb::new(origin(), Class::IN);
        let outside: Name = "other.org.".parse().unwrap();
        let mut version = db.new_version();
        assert_eq!(
            version.add_rdata(&outside, Type::A, Class::IN, DEFAULT_TTL, a_rdata("192.0.2.1")),
            Err(Error::NotFound)
        );
    }

    #[test]
    fn serial_reads_the_apex_soa() {
        let db = ZoneDb::new(origin(), Class::IN);
        let soa = Rdata::from_text(Type::SOA, &origin(), "ns root 42 4 3 2 1").unwrap();
        let mut version = db.new_version();
        version
            .add_rdata(&origin(), Type::SOA, Class::IN, Ttl::from(3600), soa)
            .unwrap();
        assert_eq!(version.serial(), Some(42));
        version.commit();
        assert_eq!(db.serial(), Some(42));
    }
}
