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

//! Record-level diffs and SOA serial arithmetic.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::class::Class;
use crate::errors::{Error, Result};
use crate::name::Name;
use crate::rr::{Rdata, Soa, Ttl, Type};

use super::Version;

////////////////////////////////////////////////////////////////////////
// DIFF TUPLES                                                        //
////////////////////////////////////////////////////////////////////////

/// The direction of a [`DiffTuple`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DiffOp {
    Add,
    Del,
}

/// One record-level change: the addition or deletion of a single
/// resource record.
#[derive(Clone, Debug)]
pub struct DiffTuple {
    pub op: DiffOp,
    pub name: Name,
    pub rr_type: Type,
    pub class: Class,
    pub ttl: Ttl,
    pub rdata: Rdata,
}

impl DiffTuple {
    /// Returns whether `other` is the exact inverse of this tuple:
    /// the opposite operation on the same `(name, type, class, ttl,
    /// rdata)`. RDATA comparison follows the type's comparison rules.
    fn cancels(&self, other: &DiffTuple) -> bool {
        self.op != other.op
            && self.rr_type == other.rr_type
            && self.class == other.class
            && self.ttl == other.ttl
            && self.name == other.name
            && self.rdata.equals(&other.rdata, self.rr_type)
    }
}

impl fmt::Display for DiffTuple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let op = match self.op {
            DiffOp::Add => "add",
            DiffOp::Del => "del",
        };
        write!(
            f,
            "{} {} {} {} {} {}",
            op,
            self.name,
            self.ttl,
            self.class,
            self.rr_type,
            self.rdata.to_text(self.rr_type)
        )
    }
}

////////////////////////////////////////////////////////////////////////
// DIFFS                                                              //
////////////////////////////////////////////////////////////////////////

/// An ordered collection of [`DiffTuple`]s, kept strictly minimal: a
/// tuple whose exact inverse is already present cancels it instead of
/// being appended, so delete-and-re-add of identical records melts
/// away. This is what makes the engine tolerate seeing its own
/// directory writes echoed back through the change stream.
#[derive(Default)]
pub struct Diff {
    tuples: Vec<DiffTuple>,
}

impl Diff {
    /// Creates an empty diff.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `tuple`, cancelling it against an existing inverse
    /// tuple if one is present.
    pub fn append_minimal(&mut self, tuple: DiffTuple) {
        if let Some(at) = self.tuples.iter().position(|t| t.cancels(&tuple)) {
            self.tuples.remove(at);
        } else {
            self.tuples.push(tuple);
        }
    }

    /// Returns whether the diff holds no tuples.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Returns the number of tuples in the diff.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// Iterates over the tuples in application order.
    pub fn tuples(&self) -> impl Iterator<Item = &DiffTuple> + '_ {
        self.tuples.iter()
    }

    /// Returns whether any tuple concerns a type other than SOA.
    pub fn has_non_soa(&self) -> bool {
        self.tuples.iter().any(|t| t.rr_type != Type::SOA)
    }

    /// Removes and returns the SOA tuple of the given direction, if
    /// any. The projector uses this to inspect and rewrite the serial
    /// before application.
    pub fn take_soa(&mut self, op: DiffOp) -> Option<DiffTuple> {
        let at = self
            .tuples
            .iter()
            .position(|t| t.rr_type == Type::SOA && t.op == op)?;
        Some(self.tuples.remove(at))
    }

    /// Appends a tuple unconditionally, without the cancelling rule.
    /// Used to re-insert SOA tuples taken with [`Diff::take_soa`].
    pub fn push(&mut self, tuple: DiffTuple) {
        self.tuples.push(tuple);
    }

    /// Applies every tuple, in order, to `version`. On failure the
    /// caller abandons the version, so partial application does not
    /// leak.
    pub fn apply(&self, version: &mut Version) -> Result<()> {
        for tuple in &self.tuples {
            match tuple.op {
                DiffOp::Add => version.add_rdata(
                    &tuple.name,
                    tuple.rr_type,
                    tuple.class,
                    tuple.ttl,
                    tuple.rdata.clone(),
                )?,
                DiffOp::Del => version.del_rdata(&tuple.name, tuple.rr_type, &tuple.rdata)?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Diff {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut list = f.debug_list();
        for tuple in &self.tuples {
            list.entry(&format_args!("{}", tuple));
        }
        list.finish()
    }
}

////////////////////////////////////////////////////////////////////////
// SOA SERIAL ARITHMETIC                                              //
////////////////////////////////////////////////////////////////////////

/// Returns whether serial `a` is greater than serial `b` under
/// [RFC 1982] serial number arithmetic.
///
/// [RFC 1982]: https://datatracker.ietf.org/doc/html/rfc1982
pub fn serial_gt(a: u32, b: u32) -> bool {
    (a < b && b - a > 0x8000_0000) || (a > b && a - b < 0x8000_0000)
}

/// Computes the next serial after `old` under the unix-time update
/// method: the current unix time if that moves the serial forward,
/// `old + 1` otherwise. Zero is never produced.
pub fn soa_serial_next(old: u32) -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as u32)
        .unwrap_or(0);
    let next = if serial_gt(now, old) {
        now
    } else {
        old.wrapping_add(1)
    };
    if next == 0 {
        1
    } else {
        next
    }
}

/// Appends a DEL/ADD pair for the apex SOA of `version` with the
/// serial bumped by [`soa_serial_next`], and returns the new serial.
/// Fails with `NotFound` if the version has no apex SOA.
pub fn soa_serial_tuples(version: &Version, ttl: Ttl, diff: &mut Diff) -> Result<u32> {
    let old_rdata = version.soa_rdata().ok_or(Error::NotFound)?;
    let old_serial = Soa::serial_of(&old_rdata)?;
    let new_serial = soa_serial_next(old_serial);
    let new_rdata = Soa::with_serial(&old_rdata, new_serial)?;
    let origin = version.origin().clone();
    diff.append_minimal(DiffTuple {
        op: DiffOp::Del,
        name: origin.clone(),
        rr_type: Type::SOA,
        class: Class::IN,
        ttl,
        rdata: old_rdata,
    });
    diff.append_minimal(DiffTuple {
        op: DiffOp::Add,
        name: origin,
        rr_type: Type::SOA,
        class: Class::IN,
        ttl,
        rdata: new_rdata,
    });
    Ok(new_serial)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
