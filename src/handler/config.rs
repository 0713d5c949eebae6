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

//! The configuration-entry handler.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::dir::Entry;
use crate::errors::Result;
use crate::instance::{Instance, GLOBAL_SETTINGS_MAP};
use crate::name::Name;
use crate::view::{ForwardPolicy, Forwarding};

/// Reconfigures the instance from the `idnsConfigObject` entry at the
/// configured base. The global settings are refreshed atomically: a
/// malformed entry leaves them untouched.
pub fn configure_instance(instance: &Arc<Instance>, entry: &Entry) -> Result<()> {
    if entry.change().is_delete() {
        // The configuration entry disappeared; every global slot is
        // unset so local defaults apply again.
        for (setting, _) in GLOBAL_SETTINGS_MAP {
            instance.global_settings().unset(setting)?;
        }
        instance.view().remove_forwarding(Name::root());
        info!("global configuration entry removed; using local defaults");
        return Ok(());
    }

    instance
        .global_settings()
        .update_from_entry_rollback(entry, &GLOBAL_SETTINGS_MAP)?;
    debug!("global settings refreshed from '{}'", entry.dn());

    configure_global_forwarding(instance, entry);
    Ok(())
}

/// Installs (or removes) the instance-wide forwarders from the
/// configuration entry. Invalid forwarder values disable global
/// forwarding rather than installing a partial list.
fn configure_global_forwarding(instance: &Arc<Instance>, entry: &Entry) {
    let root = Name::root();
    let values = match entry.values("idnsForwarders") {
        Some(values) if !values.is_empty() => values,
        _ => {
            instance.view().remove_forwarding(root);
            return;
        }
    };
    let policy = entry
        .first_value("idnsForwardPolicy")
        .and_then(|text| text.parse().ok())
        .unwrap_or(ForwardPolicy::First);
    if policy == ForwardPolicy::None {
        instance.view().remove_forwarding(root);
        return;
    }
    match Forwarding::parse_forwarders(values) {
        Ok(forwarders) => {
            instance
                .view()
                .set_forwarding(root, Forwarding { policy, forwarders });
            instance.view().flush_cache();
        }
        Err(_) => {
            warn!(
                "audit: invalid global forwarders in '{}'; forwarding disabled",
                entry.dn()
            );
            instance.view().remove_forwarding(root);
        }
    }
}
