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

//! Automatic PTR record synchronization.
//!
//! When an A or AAAA record changes through a dynamic update and the
//! owning zone enables `sync_ptr`, the paired PTR record in the
//! reverse zone is kept in step. Synchronization runs in two phases:
//! a strict *validation* phase that can refuse the primary update
//! (reverse zone missing or closed to updates, or a conflicting PTR
//! already present), and an *apply* phase whose failures are logged
//! but no longer affect the primary update.

use std::fmt::Write as _;
use std::sync::Arc;

use log::{debug, error, warn};

use crate::codec;
use crate::db::{journal, soa_serial_tuples, Diff, DiffOp, DiffTuple};
use crate::dir::{Mod, ModOp};
use crate::errors::{Error, Result};
use crate::instance::Instance;
use crate::name::Name;
use crate::rr::{Rdata, Ttl, Type, DEFAULT_TTL};
use crate::sync::SyncState;
use crate::writeback;

/// The direction of a synchronization.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncOp {
    Add,
    Delete,
}

/// A validated synchronization, ready to apply.
#[derive(Debug)]
pub struct SyncPlan {
    op: SyncOp,
    /// The reverse-map owner name of the PTR record.
    ptr_name: Name,
    /// The origin of the reverse zone.
    origin: Name,
    /// The A/AAAA owner; the PTR target.
    target: Name,
    /// The existing PTR rdata to delete (delete direction only).
    old: Option<(Ttl, Rdata)>,
    /// Whether deleting the PTR leaves the node empty, so the whole
    /// directory entry goes away.
    delete_node: bool,
}

////////////////////////////////////////////////////////////////////////
// REVERSE-MAP NAMES                                                  //
////////////////////////////////////////////////////////////////////////

/// Derives the reverse-map name of an address: `in-addr.arpa.` for
/// IPv4, nibble-reversed `ip6.arpa.` for IPv6. The rdata length must
/// match the record type's address family.
pub fn reverse_name(rr_type: Type, rdata: &Rdata) -> Result<Name> {
    let octets = rdata.octets();
    let mut text = String::new();
    match (rr_type, octets.len()) {
        (Type::A, 4) => {
            for octet in octets.iter().rev() {
                let _ = write!(text, "{}.", octet);
            }
            text.push_str("in-addr.arpa.");
        }
        (Type::AAAA, 16) => {
            for octet in octets.iter().rev() {
                let _ = write!(text, "{:x}.{:x}.", octet & 0xf, (octet & 0xf0) >> 4);
            }
            text.push_str("ip6.arpa.");
        }
        _ => {
            error!("unsupported address family for PTR synchronization");
            return Err(Error::NotImplemented);
        }
    }
    text.parse().map_err(Error::BadName)
}

////////////////////////////////////////////////////////////////////////
// VALIDATION                                                         //
////////////////////////////////////////////////////////////////////////

/// Validates one address of a changed A/AAAA record against the
/// reverse zone. Returns `Ok(None)` when nothing needs to be done
/// (the synchronization is idempotent), a plan when a change is due,
/// and an error when the primary update must be refused.
pub fn plan(
    instance: &Arc<Instance>,
    owner: &Name,
    rr_type: Type,
    rdata: &Rdata,
    op: SyncOp,
) -> Result<Option<SyncPlan>> {
    let ptr_name = reverse_name(rr_type, rdata)?;

    // Find the serving reverse zone in the view, then make sure it is
    // one of ours: only the register can vouch for that.
    let Some(view_zone) = instance.view().find_zone_for(&ptr_name) else {
        error!(
            "PTR record synchronization for '{}' refused: no active reverse \
             zone for '{}'",
            owner, ptr_name
        );
        return Err(Error::NoPerm);
    };
    let Some(info) = instance.register().get(view_zone.origin()) else {
        error!(
            "PTR record synchronization for '{}' refused: reverse zone '{}' \
             is not managed by this instance",
            owner,
            view_zone.origin()
        );
        return Err(Error::NoPerm);
    };
    if !info.settings().get_bool("dyn_update").unwrap_or(false) {
        error!(
            "PTR record synchronization for '{}' refused: reverse zone '{}' \
             does not allow dynamic updates",
            owner,
            info.origin()
        );
        return Err(Error::NoPerm);
    }

    let current = info.db().find_rdatalist(&ptr_name, Type::PTR);
    let current = match &current {
        Some(list) if list.len() > 1 => {
            error!(
                "PTR record synchronization failed: multiple PTR records under \
                 '{}' are not supported",
                ptr_name
            );
            return Err(Error::NotImplemented);
        }
        Some(list) => list.rdatas().next().map(|rdata| (list.ttl, rdata.clone())),
        None => None,
    };
    let target_matches = current
        .as_ref()
        .map(|(_, rdata)| rdata.octets().eq_ignore_ascii_case(owner.wire_repr()))
        .unwrap_or(false);

    match op {
        SyncOp::Add => match current {
            None => Ok(Some(SyncPlan {
                op,
                ptr_name,
                origin: info.origin().clone(),
                target: owner.clone(),
                old: None,
                delete_node: false,
            })),
            Some(_) if target_matches => {
                debug!(
                    "PTR record synchronization skipped: '{}' already points at \
                     '{}'",
                    ptr_name, owner
                );
                Ok(None)
            }
            Some(_) => {
                error!(
                    "PTR record synchronization failed: existing PTR at '{}' \
                     contains an unexpected value (expected '{}')",
                    ptr_name, owner
                );
                Err(Error::Singleton)
            }
        },
        SyncOp::Delete => match current {
            None => {
                debug!(
                    "PTR record synchronization skipped: no PTR records at '{}'",
                    ptr_name
                );
                Ok(None)
            }
            Some(old) if target_matches => {
                let delete_node = info.db().type_count_at(&ptr_name) == 1;
                Ok(Some(SyncPlan {
                    op,
                    ptr_name,
                    origin: info.origin().clone(),
                    target: owner.clone(),
                    old: Some(old),
                    delete_node,
                }))
            }
            Some(_) => {
                error!(
                    "PTR record synchronization failed: existing PTR at '{}' \
                     contains an unexpected value (expected '{}')",
                    ptr_name, owner
                );
                Err(Error::UnexpectedToken)
            }
        },
    }
}

////////////////////////////////////////////////////////////////////////
// APPLICATION                                                        //
////////////////////////////////////////////////////////////////////////

/// Applies a validated plan: the reverse zone's database, journal,
/// and serial, then the paired directory entry.
pub fn apply(instance: &Arc<Instance>, plan: &SyncPlan) -> Result<()> {
    let info = instance
        .register()
        .get(&plan.origin)
        .ok_or(Error::NotFound)?;

    let ptr_rdata = Rdata::from_octets(plan.target.wire_repr().to_vec())?;
    let mut version = info.db().new_version();
    let mut diff = Diff::new();
    match plan.op {
        SyncOp::Add => {
            diff.append_minimal(DiffTuple {
                op: DiffOp::Add,
                name: plan.ptr_name.clone(),
                rr_type: Type::PTR,
                class: info.db().class(),
                ttl: DEFAULT_TTL,
                rdata: ptr_rdata.clone(),
            });
        }
        SyncOp::Delete => {
            if let Some((ttl, old)) = &plan.old {
                diff.append_minimal(DiffTuple {
                    op: DiffOp::Del,
                    name: plan.ptr_name.clone(),
                    rr_type: Type::PTR,
                    class: info.db().class(),
                    ttl: *ttl,
                    rdata: old.clone(),
                });
            }
        }
    }
    if diff.is_empty() {
        return Ok(());
    }

    let sync_finished = instance.barrier().state() == SyncState::Finished;
    let mut new_serial = None;
    if sync_finished {
        let soa_ttl = version
            .node(&plan.origin)
            .and_then(|node| node.get(Type::SOA))
            .map(|list| list.ttl);
        if let Some(ttl) = soa_ttl {
            new_serial = Some(soa_serial_tuples(&version, ttl, &mut diff)?);
        }
    }

    diff.apply(&mut version)?;
    let final_soa = version.soa_rdata();
    let final_serial = version.serial();
    if sync_finished {
        let path = codec::zone_path(instance.directory_path(), &plan.origin, "journal");
        journal::write_transaction(&path, final_serial.unwrap_or(0), &diff)?;
    }
    version.commit();

    // The paired directory entry.
    let dn = codec::name_to_dn(instance.register(), &plan.ptr_name)?;
    let target_text = ptr_rdata.to_text(Type::PTR);
    match plan.op {
        SyncOp::Add => {
            let mods = [
                Mod::new(ModOp::Add, "PTRRecord", vec![target_text]),
                Mod::new(ModOp::Replace, "dnsTTL", vec![DEFAULT_TTL.to_string()]),
            ];
            writeback::ldap_modify_do(instance, &dn, &mods, false)?;
        }
        SyncOp::Delete => {
            let mods = [Mod::new(ModOp::Delete, "PTRRecord", vec![target_text])];
            writeback::ldap_modify_do(instance, &dn, &mods, plan.delete_node)?;
        }
    }

    if let (Some(_), Some(soa)) = (new_serial, final_soa.as_ref()) {
        if let Err(err) = writeback::modify_soa(instance, info.dn(), soa) {
            warn!(
                "failed to write serial of reverse zone '{}' back to the \
                 directory: {}",
                plan.origin, err
            );
        }
    }

    if sync_finished {
        let raw = codec::zone_path(instance.directory_path(), &plan.origin, "raw");
        if let Err(err) = info.db().dump_to(&raw) {
            warn!("failed to rewrite zone file for '{}': {}", plan.origin, err);
        }
    }
    debug!(
        "PTR record at '{}' synchronized with '{}'",
        plan.ptr_name, plan.target
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::Name;

    fn a_rdata(text: &str) -> Rdata {
        let origin: Name = "example.test.".parse().unwrap();
        Rdata::from_text(Type::A, &origin, text).unwrap()
    }

    fn aaaa_rdata(text: &str) -> Rdata {
        let origin: Name = "example.test.".parse().unwrap();
        Rdata::from_text(Type::AAAA, &origin, text).unwrap()
    }

    #[test]
    fn ipv4_reverse_names() {
        let name = reverse_name(Type::A, &a_rdata("192.0.2.1")).unwrap();
        assert_eq!(name.to_string(), "1.2.0.192.in-addr.arpa.");
    }

    #[test]
    fn ipv6_reverse_names() {
        let name = reverse_name(Type::AAAA, &aaaa_rdata("2001:db8::567:89ab")).unwrap();
        assert_eq!(
            name.to_string(),
            "b.a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."
        );
    }

    #[test]
    fn mismatched_rdata_is_rejected() {
        assert_eq!(
            reverse_name(Type::A, &aaaa_rdata("2001:db8::1")).err(),
            Some(Error::NotImplemented)
        );
    }
}
