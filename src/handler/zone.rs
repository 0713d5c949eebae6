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

//! The zone handlers: projection of master-zone entries, forward-zone
//! handling, activation, and deletion.
//!
//! Projection is the heart of the engine: parse the entry's records,
//! diff them against the live database, settle the SOA serial, apply,
//! journal, and load. The serial rules double as the echo absorber:
//! when the engine's own directory write comes back through the
//! change stream, the diff cancels to nothing and a backward-moving
//! serial-only change is discarded rather than re-applied.

use std::fs;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::class::Class;
use crate::codec;
use crate::db::{
    journal, serial_gt, soa_serial_next, soa_serial_tuples, Diff, DiffOp, Version, ZoneDb,
};
use crate::dir::Entry;
use crate::errors::{Error, Result};
use crate::instance::{zone_settings_defs, Instance, ZONE_SETTINGS_MAP};
use crate::name::Name;
use crate::register::{PubState, ZoneInfo};
use crate::rr::{Soa, Type};
use crate::settings::SettingsSet;
use crate::sync::SyncState;
use crate::task::Task;
use crate::view::{Acl, ForwardPolicy, Forwarding, UpdatePolicy};
use crate::writeback;

use super::{diff_node, parse_entry_records};

////////////////////////////////////////////////////////////////////////
// MASTER-ZONE HANDLING                                               //
////////////////////////////////////////////////////////////////////////

/// Handles a master-zone entry event: creation, reprojection, zone
/// deactivation, or takeover by a forwarder declaration.
pub fn zone_handler(instance: &Arc<Instance>, entry: &Entry, origin: &Name) -> Result<()> {
    if entry.change().is_delete() {
        return delete_zone(instance, origin, false);
    }
    if let Some(active) = entry.first_value("idnsZoneActive") {
        if active.eq_ignore_ascii_case("FALSE") {
            info!("zone '{}' deactivated", origin);
            return delete_zone(instance, origin, false);
        }
    }

    // Projection mutates view-wide state; serialize against every
    // other task in the set.
    let _excl = instance.task_set().begin_exclusive();

    if install_forwarding(instance, entry, origin)? {
        // Forwarder takeover: the master zone (if any) yields.
        delete_master_only(instance, origin)?;
        instance.view().flush_cache();
        return Ok(());
    }

    let (info, new_zone) = ensure_zone(instance, entry, origin)?;
    let result = project_zone(instance, entry, origin, &info, new_zone);
    if result.is_err() && new_zone {
        // Roll the half-created zone back out.
        if let Err(rollback) = delete_zone(instance, origin, false) {
            error!("rollback of zone '{}' failed: {}", origin, rollback);
            instance.taint("zone rollback");
        }
    }
    result
}

/// Handles a forward-zone entry event.
pub fn forward_handler(instance: &Arc<Instance>, entry: &Entry, origin: &Name) -> Result<()> {
    let _excl = instance.task_set().begin_exclusive();
    if entry.change().is_delete() {
        instance.forward_register().remove(origin);
        instance.view().remove_forwarding(origin);
        instance.view().flush_cache();
        info!("forward zone '{}' removed", origin);
        return Ok(());
    }
    if install_forwarding(instance, entry, origin)? {
        // A master zone of the same origin (zone-type change) yields.
        delete_master_only(instance, origin)?;
        instance.view().flush_cache();
    }
    Ok(())
}

/// Computes and installs the forwarding declared on `entry`, if any.
/// Returns whether a forwarding entry is now installed for `origin`.
///
/// A takeover requires a syntactically valid, non-empty forwarders
/// list; an invalid one logs an audit record and leaves forwarding
/// uninstalled, so the entry continues as a master zone.
fn install_forwarding(instance: &Arc<Instance>, entry: &Entry, origin: &Name) -> Result<bool> {
    let values = match entry.values("idnsForwarders") {
        Some(values) if !values.is_empty() => values,
        _ => {
            instance.forward_register().remove(origin);
            instance.view().remove_forwarding(origin);
            return Ok(false);
        }
    };
    let policy = match entry.first_value("idnsForwardPolicy") {
        Some(text) => match text.parse::<ForwardPolicy>() {
            Ok(policy) => policy,
            Err(_) => {
                warn!(
                    "audit: invalid idnsForwardPolicy on '{}'; forwarding disabled",
                    entry.dn()
                );
                instance.forward_register().remove(origin);
                instance.view().remove_forwarding(origin);
                return Ok(false);
            }
        },
        None => ForwardPolicy::First,
    };
    if policy == ForwardPolicy::None {
        instance.forward_register().remove(origin);
        instance.view().remove_forwarding(origin);
        return Ok(false);
    }
    match Forwarding::parse_forwarders(values) {
        Ok(forwarders) => {
            instance
                .view()
                .set_forwarding(origin, Forwarding { policy, forwarders });
            instance.forward_register().insert(origin);
            debug!("forwarding installed for '{}'", origin);
            Ok(true)
        }
        Err(_) => {
            warn!(
                "audit: invalid idnsForwarders on '{}'; forwarding disabled",
                entry.dn()
            );
            instance.forward_register().remove(origin);
            instance.view().remove_forwarding(origin);
            Ok(false)
        }
    }
}

/// Finds or creates the zone object for `origin`.
fn ensure_zone(
    instance: &Arc<Instance>,
    entry: &Entry,
    origin: &Name,
) -> Result<(Arc<ZoneInfo>, bool)> {
    if let Some(info) = instance.register().get(origin) {
        return Ok((info, false));
    }

    if let Some(existing) = instance.view().find_zone(origin) {
        if existing.is_builtin_empty() {
            // The host server's built-in empty zone yields to real
            // data.
            instance.view().delete_zone(origin);
        } else {
            error!(
                "zone '{}' already exists in the view and is not ours",
                origin
            );
            return Err(Error::Exists);
        }
    }

    let db = ZoneDb::new(origin.clone(), Class::IN);
    let settings = SettingsSet::new(
        &format!("zone {}", origin),
        &zone_settings_defs(),
        Some(instance.global_settings().clone()),
    );
    let task = Task::new(instance.task_set(), &format!("zone {}", origin))?;

    // Prepare the on-disk layout: the keys directory for the host
    // server's signing machinery, and no stale raw file.
    let keys = codec::zone_path(instance.directory_path(), origin, "keys");
    fs::create_dir_all(&keys)?;
    let raw = codec::zone_path(instance.directory_path(), origin, "raw");
    let _ = fs::remove_file(&raw);

    let info = ZoneInfo::new(
        origin.clone(),
        entry.dn().to_owned(),
        db,
        None,
        settings,
        task,
    );
    instance.register().add(info.clone())?;
    info!("zone '{}' registered", origin);
    Ok((info, true))
}

/// Projects the entry's state onto the zone: settings, policy, ACLs,
/// records, serial, journal, load.
fn project_zone(
    instance: &Arc<Instance>,
    entry: &Entry,
    origin: &Name,
    info: &Arc<ZoneInfo>,
    new_zone: bool,
) -> Result<()> {
    info.settings().update_from_entry(entry, &ZONE_SETTINGS_MAP)?;
    install_update_policy(entry, info);
    install_acls(entry, info);

    let sync_finished = instance.barrier().state() == SyncState::Finished;
    if new_zone && sync_finished {
        publish_zone(instance, info)?;
    }

    let desired = parse_entry_records(instance.fake_mname(), entry, origin)?;

    let mut version = info.db().new_version();
    let mut diff = Diff::new();
    diff_node(&version, origin, &desired, &mut diff);
    if instance.verbose_checks() {
        debug!("zone '{}' projection diff: {:?}", origin, diff);
    }

    let fresh = new_zone || !sync_finished;
    let decision = analyze_serial(&mut diff, &version, fresh)?;
    let (data_changed, new_serial) = match decision {
        SerialDecision::Discard => {
            debug!(
                "zone '{}': no data change and backward serial; diff discarded",
                origin
            );
            return Ok(());
        }
        SerialDecision::Apply {
            data_changed,
            new_serial,
        } => (data_changed, new_serial),
    };

    if diff.is_empty() {
        debug!("zone '{}': nothing to apply", origin);
        return Ok(());
    }

    diff.apply(&mut version)?;
    let final_soa = version.soa_rdata();
    let final_serial = version.serial();

    if sync_finished && !new_zone {
        let path = codec::zone_path(instance.directory_path(), origin, "journal");
        journal::write_transaction(&path, final_serial.unwrap_or(0), &diff)?;
    }
    version.commit();

    if let (Some(_), Some(soa)) = (new_serial, final_soa.as_ref()) {
        // The rewritten serial goes back to the directory. The write
        // will echo through the change stream; the discard rule above
        // absorbs it.
        if let Err(err) = writeback::modify_soa(instance, info.dn(), soa) {
            warn!(
                "failed to write serial of zone '{}' back to the directory: {}",
                origin, err
            );
        }
    }

    if sync_finished && data_changed {
        load_zone(instance, info)?;
        info.set_state(PubState::Active);
    }
    Ok(())
}

/// Derives and installs the zone's simple-secure-update table.
fn install_update_policy(entry: &Entry, info: &Arc<ZoneInfo>) {
    let dyn_update = info.settings().get_bool("dyn_update").unwrap_or(false);
    let policy = if dyn_update {
        match info.settings().get_str("update_policy") {
            Ok(text) => match UpdatePolicy::parse(&text) {
                Ok(policy) => policy,
                Err(_) => {
                    warn!(
                        "audit: invalid idnsUpdatePolicy on '{}'; updates refused",
                        entry.dn()
                    );
                    UpdatePolicy::empty()
                }
            },
            Err(_) => UpdatePolicy::empty(),
        }
    } else {
        UpdatePolicy::empty()
    };
    info.view_zone().set_update_policy(policy);
}

/// Installs the query and transfer ACLs from the entry. A parse
/// failure installs the most restrictive policy and logs an audit
/// record.
fn install_acls(entry: &Entry, info: &Arc<ZoneInfo>) {
    match entry.values("idnsAllowQuery") {
        Some(values) => match Acl::from_values(values) {
            Ok(acl) => info.view_zone().set_query_acl(acl),
            Err(_) => {
                warn!(
                    "audit: invalid idnsAllowQuery on '{}'; installing most \
                     restrictive policy",
                    entry.dn()
                );
                info.view_zone().set_query_acl(Acl::most_restrictive());
            }
        },
        None => debug!("allow-query not set on '{}'", entry.dn()),
    }
    match entry.values("idnsAllowTransfer") {
        Some(values) => match Acl::from_values(values) {
            Ok(acl) => info.view_zone().set_transfer_acl(acl),
            Err(_) => {
                warn!(
                    "audit: invalid idnsAllowTransfer on '{}'; installing most \
                     restrictive policy",
                    entry.dn()
                );
                info.view_zone().set_transfer_acl(Acl::most_restrictive());
            }
        },
        None => debug!("allow-transfer not set on '{}'", entry.dn()),
    }
}

////////////////////////////////////////////////////////////////////////
// SERIAL ANALYSIS                                                    //
////////////////////////////////////////////////////////////////////////

/// The outcome of serial analysis.
enum SerialDecision {
    /// The diff would only move the serial backward with no data
    /// change: drop it entirely (this is what absorbs echoes of our
    /// own writes).
    Discard,
    /// Apply the (possibly rewritten) diff.
    Apply {
        data_changed: bool,
        new_serial: Option<u32>,
    },
}

/// Settles the SOA serial of a projection diff.
///
/// `fresh` is true for a newly created zone and throughout the
/// initial refresh, when serials are always rewritten with the
/// unix-time method.
fn analyze_serial(diff: &mut Diff, version: &Version, fresh: bool) -> Result<SerialDecision> {
    let del_soa = diff.take_soa(DiffOp::Del);
    let add_soa = diff.take_soa(DiffOp::Add);
    let has_other = diff.has_non_soa();

    match (del_soa, add_soa) {
        (None, None) => {
            let data_changed = has_other || fresh;
            if !data_changed || diff.is_empty() {
                return Ok(SerialDecision::Apply {
                    data_changed,
                    new_serial: None,
                });
            }
            // Data changed with no SOA tuples in sight: synthesize a
            // bumped pair from the live SOA.
            let ttl = version
                .node(version.origin())
                .and_then(|node| node.get(Type::SOA))
                .map(|list| list.ttl);
            match ttl {
                Some(ttl) => {
                    let serial = soa_serial_tuples(version, ttl, diff)?;
                    Ok(SerialDecision::Apply {
                        data_changed: true,
                        new_serial: Some(serial),
                    })
                }
                // No live SOA to bump; apply the data as-is.
                None => Ok(SerialDecision::Apply {
                    data_changed: true,
                    new_serial: None,
                }),
            }
        }
        (Some(del), Some(mut add)) => {
            let serial_only = Soa::equal_except_serial(&del.rdata, &add.rdata);
            let data_changed = has_other || fresh || !serial_only;
            let old_serial = Soa::serial_of(&del.rdata)?;
            let new_serial = Soa::serial_of(&add.rdata)?;

            if !data_changed && !serial_gt(new_serial, old_serial) {
                return Ok(SerialDecision::Discard);
            }

            let mut rewritten = None;
            if !serial_gt(new_serial, old_serial) || fresh {
                let bumped = soa_serial_next(old_serial);
                add.rdata = Soa::with_serial(&add.rdata, bumped)?;
                rewritten = Some(bumped);
            }
            diff.push(del);
            diff.push(add);
            Ok(SerialDecision::Apply {
                data_changed,
                new_serial: rewritten,
            })
        }
        (None, Some(mut add)) => {
            // A new SOA is being inserted (zone creation); its serial
            // starts from the unix-time method.
            let entry_serial = Soa::serial_of(&add.rdata)?;
            let bumped = soa_serial_next(entry_serial);
            add.rdata = Soa::with_serial(&add.rdata, bumped)?;
            diff.push(add);
            Ok(SerialDecision::Apply {
                data_changed: true,
                new_serial: Some(bumped),
            })
        }
        (Some(del), None) => {
            // The SOA is going away without replacement; unusual, but
            // the data change stands.
            diff.push(del);
            Ok(SerialDecision::Apply {
                data_changed: true,
                new_serial: None,
            })
        }
    }
}

////////////////////////////////////////////////////////////////////////
// PUBLICATION, ACTIVATION, DELETION                                  //
////////////////////////////////////////////////////////////////////////

/// Publishes a created zone to the view.
fn publish_zone(instance: &Arc<Instance>, info: &Arc<ZoneInfo>) -> Result<()> {
    instance.view().add_zone(info.view_zone().clone())?;
    info.set_state(PubState::Published);
    debug!("zone '{}' published to the view", info.origin());
    Ok(())
}

/// Materializes a zone's on-disk state and marks it loaded.
fn load_zone(instance: &Arc<Instance>, info: &Arc<ZoneInfo>) -> Result<()> {
    let raw = codec::zone_path(instance.directory_path(), info.origin(), "raw");
    if let Some(parent) = raw.parent() {
        fs::create_dir_all(parent)?;
    }
    info.db().dump_to(&raw)?;
    let journal_path = codec::zone_path(instance.directory_path(), info.origin(), "journal");
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&journal_path)?;
    info.view_zone().load();
    info.set_state(PubState::Loaded);
    debug!(
        "zone '{}' loaded (serial {:?})",
        info.origin(),
        info.db().serial()
    );
    Ok(())
}

/// Publishes and loads every zone still pending after the initial
/// refresh. Called once the sync barrier drains.
pub fn activate_zones(instance: &Arc<Instance>) {
    let _excl = instance.task_set().begin_exclusive();
    for origin in instance.register().origins() {
        let Some(info) = instance.register().get(&origin) else {
            continue;
        };
        if info.state() == PubState::Created {
            if let Err(err) = publish_zone(instance, &info) {
                error!("failed to publish zone '{}': {}", origin, err);
                instance.taint("zone activation");
                continue;
            }
        }
        match load_zone(instance, &info) {
            Ok(()) => info.set_state(PubState::Active),
            Err(err) => {
                error!("failed to load zone '{}': {}", origin, err);
                instance.taint("zone activation");
            }
        }
    }
}

/// Deletes a master zone from service: view, register, and on-disk
/// state. With `preserve_forwarding`, any forwarding installed for
/// the origin stays (used when a forwarder declaration takes over).
pub fn delete_zone(
    instance: &Arc<Instance>,
    origin: &Name,
    preserve_forwarding: bool,
) -> Result<()> {
    if !preserve_forwarding {
        instance.forward_register().remove(origin);
        instance.view().remove_forwarding(origin);
    }
    delete_master_only(instance, origin)
}

/// Removes the master-zone half of `origin`, leaving forwarding
/// state untouched.
fn delete_master_only(instance: &Arc<Instance>, origin: &Name) -> Result<()> {
    let Some(info) = instance.register().get(origin) else {
        return Ok(());
    };
    if info.state() != PubState::Created {
        instance.view().delete_zone(origin);
    }
    instance.register().delete(origin);
    let dir = codec::zone_path(instance.directory_path(), origin, "");
    match fs::remove_dir_all(&dir) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove {}: {}", dir.display(), err),
    }
    info!("zone '{}' deleted", origin);
    Ok(())
}
