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

//! The [`RdataList`] and [`RdataListSet`] structures.
//!
//! An `RdataList` is the in-memory form of one RRset-to-be: a common
//! RR type, class, and TTL plus the deduplicated RDATA parsed from a
//! directory entry. A directory entry's full record content is an
//! `RdataListSet`, keyed by RR type.

use crate::class::Class;
use crate::errors::{Error, Result};

use super::{Rdata, Ttl, Type};

////////////////////////////////////////////////////////////////////////
// RDATA LISTS                                                        //
////////////////////////////////////////////////////////////////////////

/// The RDATA of a single (type, class, TTL) group at one owner name.
#[derive(Clone, Debug)]
pub struct RdataList {
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    rdatas: Vec<Rdata>,
}

impl RdataList {
    /// Creates a new, empty `RdataList`.
    pub fn new(rr_type: Type, class: Class, ttl: Ttl) -> Self {
        Self {
            rr_type,
            class,
            ttl,
            rdatas: Vec::new(),
        }
    }

    /// Adds `rdata` to the list. Following the behavior of other
    /// nameservers, RDATA already present (compared as values of the
    /// list's type) is silently discarded.
    pub fn push(&mut self, rdata: Rdata) {
        for existing in &self.rdatas {
            if rdata.equals(existing, self.rr_type) {
                return;
            }
        }
        self.rdatas.push(rdata);
    }

    /// Returns an iterator over the RDATA of this list.
    pub fn rdatas(&self) -> impl Iterator<Item = &Rdata> + '_ {
        self.rdatas.iter()
    }

    /// Returns the number of RDATA in this list.
    pub fn len(&self) -> usize {
        self.rdatas.len()
    }

    /// Returns whether this list holds no RDATA.
    pub fn is_empty(&self) -> bool {
        self.rdatas.is_empty()
    }

    /// Returns whether the list contains RDATA equal to `rdata` as a
    /// value of the list's type.
    pub fn contains(&self, rdata: &Rdata) -> bool {
        self.rdatas.iter().any(|r| r.equals(rdata, self.rr_type))
    }
}

////////////////////////////////////////////////////////////////////////
// RDATA LIST SETS                                                    //
////////////////////////////////////////////////////////////////////////

/// All of the [`RdataList`]s of one owner name, keyed by RR type.
#[derive(Clone, Debug, Default)]
pub struct RdataListSet {
    lists: Vec<RdataList>,
}

impl RdataListSet {
    /// Creates a new, empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds the list for `rr_type`, creating it with the given class
    /// and TTL if absent. An existing list whose TTL differs from
    /// `ttl` fails with [`Error::NotImplemented`]: all records of one
    /// group share a single TTL, and there is no support for anything
    /// else.
    pub fn find_or_create(&mut self, rr_type: Type, class: Class, ttl: Ttl) -> Result<&mut RdataList> {
        if let Some(at) = self.lists.iter().position(|l| l.rr_type == rr_type) {
            if self.lists[at].ttl != ttl {
                return Err(Error::NotImplemented);
            }
            Ok(&mut self.lists[at])
        } else {
            self.lists.push(RdataList::new(rr_type, class, ttl));
            Ok(self.lists.last_mut().unwrap())
        }
    }

    /// Returns the list for `rr_type`, if present.
    pub fn get(&self, rr_type: Type) -> Option<&RdataList> {
        self.lists.iter().find(|l| l.rr_type == rr_type)
    }

    /// Adds a single RDATA under `rr_type`, creating the list if
    /// necessary. Fails with [`Error::NotImplemented`] on a TTL
    /// mismatch with an existing list.
    pub fn add(&mut self, rr_type: Type, class: Class, ttl: Ttl, rdata: Rdata) -> Result<()> {
        self.find_or_create(rr_type, class, ttl)?.push(rdata);
        Ok(())
    }

    /// Removes the RDATA equal to `rdata` (as a value of `rr_type`)
    /// from the matching list, dropping the list once it is empty.
    /// Returns whether anything was removed.
    pub fn remove(&mut self, rr_type: Type, rdata: &Rdata) -> bool {
        let Some(at) = self.lists.iter().position(|l| l.rr_type == rr_type) else {
            return false;
        };
        let list = &mut self.lists[at];
        let Some(i) = list.rdatas.iter().position(|r| r.equals(rdata, rr_type)) else {
            return false;
        };
        list.rdatas.remove(i);
        if list.rdatas.is_empty() {
            self.lists.remove(at);
        }
        true
    }

    /// Returns an iterator over the lists in this set.
    pub fn iter(&self) -> impl Iterator<Item = &RdataList> + '_ {
        self.lists.iter()
    }

    /// Returns whether this set holds no lists.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;
    use crate::rr::DEFAULT_TTL;

    fn a(text: &str) -> Rdata {
        let origin: Name = "example.test.".parse().unwrap();
        Rdata::from_text(Type::A, &origin, text).unwrap()
    }

    #[test]
    fn push_discards_duplicates() {
        let mut list = RdataList::new(Type::A, Class::IN, DEFAULT_TTL);
        list.push(a("192.0.2.1"));
        list.push(a("192.0.2.2"));
        list.push(a("192.0.2.1"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn find_or_create_reuses_lists() {
        let mut set = RdataListSet::new();
        set.find_or_create(Type::A, Class::IN, DEFAULT_TTL)
            .unwrap()
            .push(a("192.0.2.1"));
        set.find_or_create(Type::A, Class::IN, DEFAULT_TTL)
            .unwrap()
            .push(a("192.0.2.2"));
        assert_eq!(set.get(Type::A).unwrap().len(), 2);
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn find_or_create_rejects_heterogeneous_ttls() {
        let mut set = RdataListSet::new();
        set.find_or_create(Type::A, Class::IN, Ttl::from(3600))
            .unwrap();
        assert_eq!(
            set.find_or_create(Type::A, Class::IN, Ttl::from(7200))
                .err(),
            Some(Error::NotImplemented)
        );
    }
}
