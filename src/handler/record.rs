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

//! The record handler: projection of a single owner name.

use std::sync::Arc;

use log::{debug, warn};

use crate::codec;
use crate::db::{journal, soa_serial_tuples, Diff};
use crate::dir::Entry;
use crate::errors::{Error, Result};
use crate::instance::Instance;
use crate::name::Name;
use crate::rr::{RdataListSet, Type};
use crate::sync::SyncState;
use crate::writeback;

use super::{diff_node, parse_entry_records};

/// Handles a record entry event: the entry's rdata lists become the
/// complete contents of `owner` in the zone at `origin`; a delete
/// event means "no data at this name".
///
/// A failed application is retried once after re-reading the zone, in
/// case the zone was reloaded underneath the update.
pub fn record_handler(
    instance: &Arc<Instance>,
    entry: &Entry,
    owner: &Name,
    origin: &Name,
) -> Result<()> {
    match update_record(instance, entry, owner, origin) {
        Err(Error::NotFound) | Err(Error::Exists) => {
            debug!(
                "retrying update of '{}' after concurrent zone change",
                owner
            );
            update_record(instance, entry, owner, origin)
        }
        result => result,
    }
}

fn update_record(
    instance: &Arc<Instance>,
    entry: &Entry,
    owner: &Name,
    origin: &Name,
) -> Result<()> {
    let info = instance.register().get(origin).ok_or(Error::NotFound)?;

    // The desired state: empty on delete, the parsed entry otherwise.
    // An entry that is also a master-zone object gets its SOA
    // synthesized first, like in full zone projection.
    let desired = if entry.change().is_delete() {
        RdataListSet::new()
    } else {
        parse_entry_records(instance.fake_mname(), entry, origin)?
    };

    let mut version = info.db().new_version();
    let mut diff = Diff::new();
    diff_node(&version, owner, &desired, &mut diff);

    if diff.is_empty() {
        debug!("'{}': no effective change", owner);
        return Ok(());
    }

    let sync_finished = instance.barrier().state() == SyncState::Finished;
    let mut new_serial = None;
    if sync_finished {
        let soa_ttl = version
            .node(origin)
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
        let path = codec::zone_path(instance.directory_path(), origin, "journal");
        journal::write_transaction(&path, final_serial.unwrap_or(0), &diff)?;
    }
    version.commit();

    if let (Some(_), Some(soa)) = (new_serial, final_soa.as_ref()) {
        if let Err(err) = writeback::modify_soa(instance, info.dn(), soa) {
            warn!(
                "failed to write serial of zone '{}' back to the directory: {}",
                origin, err
            );
        }
    }

    if sync_finished {
        // Re-materialize the zone file so transfers see the change.
        let raw = codec::zone_path(instance.directory_path(), origin, "raw");
        if let Err(err) = info.db().dump_to(&raw) {
            warn!("failed to rewrite zone file for '{}': {}", origin, err);
        }
    }
    debug!("'{}' updated (serial {:?})", owner, final_serial);
    Ok(())
}
