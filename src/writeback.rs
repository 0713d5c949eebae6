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

//! Translation of zone mutations into directory modifications.
//!
//! Dynamic updates accepted by the host server are written back to
//! the directory as attribute modifications on the owner's entry; the
//! resulting change then re-enters the engine through the change
//! stream. SOA records are special-cased: their five numeric fields
//! are written as individual `idnsSOA*` REPLACEs, and an SOA deletion
//! is silently ignored (the zone entry keeps its SOA attributes until
//! the zone itself goes away).

use std::sync::Arc;

use log::{debug, error};

use crate::codec;
use crate::dir::{DirError, Mod, ModOp};
use crate::errors::{Error, Result};
use crate::instance::Instance;
use crate::name::Name;
use crate::rr::{Rdata, RdataList, Soa, Type};

/// Writes an rdata-list addition to the directory.
pub fn write_to_ldap(instance: &Arc<Instance>, owner: &Name, rdlist: &RdataList) -> Result<()> {
    modify_common(instance, owner, rdlist, ModOp::Add, false)
}

/// Writes an rdata-list deletion to the directory. With
/// `delete_node`, the owner's whole entry is deleted instead.
pub fn remove_values(
    instance: &Arc<Instance>,
    owner: &Name,
    rdlist: &RdataList,
    delete_node: bool,
) -> Result<()> {
    modify_common(instance, owner, rdlist, ModOp::Delete, delete_node)
}

fn modify_common(
    instance: &Arc<Instance>,
    owner: &Name,
    rdlist: &RdataList,
    op: ModOp,
    delete_node: bool,
) -> Result<()> {
    if rdlist.rr_type == Type::SOA && op == ModOp::Delete {
        // The SOA attributes live on the zone entry; deleting them
        // record-wise is silently skipped.
        return Ok(());
    }

    let dn = codec::name_to_dn(instance.register(), owner)?;

    if rdlist.rr_type == Type::SOA {
        let rdata = rdlist.rdatas().next().ok_or(Error::UnexpectedToken)?;
        return modify_soa(instance, &dn, rdata);
    }

    let attribute = format!("{}Record", rdlist.rr_type);
    let values: Vec<String> = rdlist
        .rdatas()
        .map(|rdata| rdata.to_text(rdlist.rr_type))
        .collect();
    let mut mods = vec![Mod::new(op, &attribute, values)];
    if op == ModOp::Add {
        // The node TTL is refreshed alongside every addition.
        mods.push(Mod::new(
            ModOp::Replace,
            "dnsTTL",
            vec![rdlist.ttl.to_string()],
        ));
    }
    ldap_modify_do(instance, &dn, &mods, delete_node)
}

/// Writes an SOA record as five REPLACE modifications of the
/// `idnsSOA*` numeric attributes. The primary name and contact are
/// never written back; they are operator-owned.
pub(crate) fn modify_soa(instance: &Arc<Instance>, dn: &str, rdata: &Rdata) -> Result<()> {
    let soa = Soa::from_rdata(rdata)?;
    let mods = [
        ("idnsSOAserial", soa.serial),
        ("idnsSOArefresh", soa.refresh),
        ("idnsSOAretry", soa.retry),
        ("idnsSOAexpire", soa.expire),
        ("idnsSOAminimum", soa.minimum),
    ]
    .map(|(attribute, value)| Mod::new(ModOp::Replace, attribute, vec![value.to_string()]));
    ldap_modify_do(instance, dn, &mods, false)
}

/// Performs one directory modification with the engine's contract:
///
/// * a DELETE of an attribute that is not there is a silent success;
/// * an ADD against a missing entry is retried as the creation of a
///   new `idnsRecord` entry carrying the same attributes;
/// * a connection-level failure is retried exactly once after a
///   forced reconnect.
pub(crate) fn ldap_modify_do(
    instance: &Arc<Instance>,
    dn: &str,
    mods: &[Mod],
    delete_node: bool,
) -> Result<()> {
    let mut guard = instance.pool().acquire()?;
    let mut retried = false;
    loop {
        let result = {
            let conn = guard.conn()?;
            if delete_node {
                debug!("deleting whole entry '{}'", dn);
                conn.delete_entry(dn)
            } else {
                debug!("writing to '{}'", dn);
                conn.modify(dn, mods)
            }
        };
        let err = match result {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let first_op = mods.first().map(|m| m.op);
        match err {
            DirError::NoSuchAttribute if first_op == Some(ModOp::Delete) => {
                // Deleting what is already gone is fine.
                return Ok(());
            }
            DirError::NoSuchObject if delete_node => {
                // Likewise for a vanished entry.
                return Ok(());
            }
            DirError::NoSuchObject if first_op == Some(ModOp::Add) => {
                // The entry does not exist yet; create it with the
                // same attributes plus the record object class.
                debug!("entry '{}' does not exist; adding it", dn);
                let mut add_mods = mods.to_vec();
                add_mods.push(Mod::new(
                    ModOp::Add,
                    "objectClass",
                    vec!["idnsRecord".to_owned()],
                ));
                let conn = guard.conn()?;
                return conn.add_entry(dn, &add_mods).map_err(Into::into);
            }
            err if err.is_connection_error() && !retried => {
                guard.reconnect()?;
                retried = true;
                continue;
            }
            DirError::Timeout => {
                error!(
                    "directory request timed out; consider raising the \
                     'timeout' setting"
                );
                return Err(Error::Timeout);
            }
            err => return Err(err.into()),
        }
    }
}
