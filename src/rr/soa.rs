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

//! The [`Soa`] structure: a parsed view of SOA RDATA.
//!
//! The projection engine manipulates SOA records far more than any
//! other type: serials are compared, rewritten, and written back to
//! the directory as individual `idnsSOA*` attributes. A structured
//! view is therefore kept alongside the wire form.

use std::fmt;

use crate::errors::{Error, Result};
use crate::name::Name;

use super::{Rdata, Type};

/// A parsed SOA record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Soa {
    pub mname: Name,
    pub rname: Name,
    pub serial: u32,
    pub refresh: u32,
    pub retry: u32,
    pub expire: u32,
    pub minimum: u32,
}

impl Soa {
    /// Parses SOA RDATA into its fields.
    pub fn from_rdata(rdata: &Rdata) -> Result<Self> {
        let text = rdata.to_text(Type::SOA);
        let mut tokens = text.split_ascii_whitespace();
        let mut next = || tokens.next().ok_or(Error::UnexpectedToken);
        let mname: Name = next()?.parse().map_err(Error::BadName)?;
        let rname: Name = next()?.parse().map_err(Error::BadName)?;
        let mut timers = [0u32; 5];
        for timer in timers.iter_mut() {
            *timer = next()?.parse().or(Err(Error::UnexpectedToken))?;
        }
        Ok(Self {
            mname,
            rname,
            serial: timers[0],
            refresh: timers[1],
            retry: timers[2],
            expire: timers[3],
            minimum: timers[4],
        })
    }

    /// Renders the fields back into SOA RDATA.
    pub fn to_rdata(&self) -> Rdata {
        let mut octets = Vec::with_capacity(
            self.mname.wire_repr().len() + self.rname.wire_repr().len() + 20,
        );
        octets.extend_from_slice(self.mname.wire_repr());
        octets.extend_from_slice(self.rname.wire_repr());
        for field in [self.serial, self.refresh, self.retry, self.expire, self.minimum] {
            octets.extend_from_slice(&field.to_be_bytes());
        }
        // The wire limit cannot be exceeded: two names and five
        // 32-bit fields always fit.
        Rdata::from_octets(octets).unwrap()
    }

    /// Returns a copy of `rdata` with its serial field replaced.
    pub fn with_serial(rdata: &Rdata, serial: u32) -> Result<Rdata> {
        let mut soa = Self::from_rdata(rdata)?;
        soa.serial = serial;
        Ok(soa.to_rdata())
    }

    /// Extracts the serial field from SOA RDATA.
    pub fn serial_of(rdata: &Rdata) -> Result<u32> {
        Ok(Self::from_rdata(rdata)?.serial)
    }

    /// Compares two SOA RDATA ignoring the serial field. Used to
    /// decide whether an SOA change is serial-only (and therefore not
    /// a data change in itself).
    pub fn equal_except_serial(a: &Rdata, b: &Rdata) -> bool {
        match (Self::from_rdata(a), Self::from_rdata(b)) {
            (Ok(mut soa_a), Ok(mut soa_b)) => {
                soa_a.serial = 0;
                soa_b.serial = 0;
                soa_a == soa_b
            }
            _ => a.equals(b, Type::SOA),
        }
    }
}

impl fmt::Display for Soa {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.mname, self.rname, self.serial, self.refresh, self.retry, self.expire,
            self.minimum
        )
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
