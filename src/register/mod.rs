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

//! The zone register.
//!
//! The register is the engine's own record of the zones it manages:
//! origin → {databases, owning DN, per-zone settings, per-zone task,
//! publication state}. The view could almost answer "which zone serves
//! this name", but only the register guarantees the zone is *ours*,
//! and only it can map a name back to the directory DN that defines
//! it.

mod forward;
pub use forward::ForwardRegister;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use log::error;

use crate::db::ZoneDb;
use crate::errors::{Error, Result};
use crate::name::Name;
use crate::settings::SettingsSet;
use crate::task::Task;
use crate::view::ViewZone;

////////////////////////////////////////////////////////////////////////
// ZONE INFO                                                          //
////////////////////////////////////////////////////////////////////////

/// The publication state of a registered zone. Creation happens on
/// first sight of a master-zone entry; publication to the view is
/// deferred until the initial refresh completes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PubState {
    Created,
    Published,
    Loaded,
    Active,
}

/// Everything the register knows about one zone.
pub struct ZoneInfo {
    origin: Name,
    dn: String,
    db: Arc<ZoneDb>,
    secure_db: Option<Arc<ZoneDb>>,
    view_zone: Arc<ViewZone>,
    settings: Arc<SettingsSet>,
    task: Arc<Task>,
    state: Mutex<PubState>,
}

impl ZoneInfo {
    pub fn new(
        origin: Name,
        dn: String,
        db: Arc<ZoneDb>,
        secure_db: Option<Arc<ZoneDb>>,
        settings: Arc<SettingsSet>,
        task: Arc<Task>,
    ) -> Arc<Self> {
        let view_zone = ViewZone::new(origin.clone(), db.clone());
        Arc::new(Self {
            origin,
            dn,
            db,
            secure_db,
            view_zone,
            settings,
            task,
            state: Mutex::new(PubState::Created),
        })
    }

    pub fn origin(&self) -> &Name {
        &self.origin
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    /// Returns the raw (unsigned) database.
    pub fn db(&self) -> &Arc<ZoneDb> {
        &self.db
    }

    /// Returns the secure database, when inline signing is active.
    pub fn secure_db(&self) -> Option<&Arc<ZoneDb>> {
        self.secure_db.as_ref()
    }

    /// Returns the zone object published (or to be published) to the
    /// view. ACLs and update policy are installed here even before
    /// publication.
    pub fn view_zone(&self) -> &Arc<ViewZone> {
        &self.view_zone
    }

    pub fn settings(&self) -> &Arc<SettingsSet> {
        &self.settings
    }

    /// Returns the zone's serial task. All projection and update work
    /// for this origin is posted here.
    pub fn task(&self) -> &Arc<Task> {
        &self.task
    }

    pub fn state(&self) -> PubState {
        *self.state.lock().unwrap()
    }

    pub fn set_state(&self, state: PubState) {
        *self.state.lock().unwrap() = state;
    }
}

////////////////////////////////////////////////////////////////////////
// THE REGISTER                                                       //
////////////////////////////////////////////////////////////////////////

/// A thread-safe map from zone origin to [`ZoneInfo`].
///
/// Readers resolve names by longest match (probing each ancestor of
/// the name, deepest first). Iteration takes a snapshot of the origins
/// and re-resolves each by name, so it tolerates concurrent removal.
pub struct ZoneRegister {
    zones: RwLock<BTreeMap<Name, Arc<ZoneInfo>>>,
}

impl ZoneRegister {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            zones: RwLock::new(BTreeMap::new()),
        })
    }

    /// Adds a zone. The origin must be absolute (all [`Name`]s are)
    /// and must not already be registered; child zones of existing
    /// zones are fine.
    pub fn add(&self, info: Arc<ZoneInfo>) -> Result<()> {
        let mut zones = self.zones.write().unwrap();
        if zones.contains_key(info.origin()) {
            error!("failed to add zone '{}' to the zone register", info.origin());
            return Err(Error::Exists);
        }
        zones.insert(info.origin().clone(), info);
        Ok(())
    }

    /// Removes a zone. Removing an origin that is not registered is a
    /// success, so deletion events are idempotent.
    pub fn delete(&self, origin: &Name) {
        let mut zones = self.zones.write().unwrap();
        zones.remove(origin);
    }

    /// Returns the zone registered at exactly `origin`.
    pub fn get(&self, origin: &Name) -> Option<Arc<ZoneInfo>> {
        self.zones.read().unwrap().get(origin).cloned()
    }

    /// Returns the deepest registered zone at or above `name`.
    pub fn find(&self, name: &Name) -> Option<Arc<ZoneInfo>> {
        let zones = self.zones.read().unwrap();
        for skip in 0..name.len() {
            if let Some(candidate) = name.superdomain(skip) {
                if let Some(info) = zones.get(&candidate) {
                    return Some(info.clone());
                }
            }
        }
        None
    }

    /// Returns the databases of the zone serving `name` (longest
    /// match): the raw database and, if present, the secure one.
    pub fn get_dbs(&self, name: &Name) -> Option<(Arc<ZoneDb>, Option<Arc<ZoneDb>>)> {
        let info = self.find(name)?;
        Some((info.db().clone(), info.secure_db().cloned()))
    }

    /// Returns the DN of the zone enclosing `name` plus the matched
    /// origin, for DN construction.
    pub fn get_dn(&self, name: &Name) -> Option<(String, Name)> {
        let info = self.find(name)?;
        Some((info.dn().to_owned(), info.origin().clone()))
    }

    /// Returns the settings of the zone registered at exactly
    /// `origin`.
    pub fn get_settings(&self, origin: &Name) -> Option<Arc<SettingsSet>> {
        Some(self.get(origin)?.settings().clone())
    }

    /// Returns a snapshot of all registered origins. Callers re-key
    /// by name: an origin may have been removed by the time it is
    /// visited, and [`ZoneRegister::get`] then returns `None`.
    pub fn origins(&self) -> Vec<Name> {
        self.zones.read().unwrap().keys().cloned().collect()
    }

    /// Returns the number of registered zones.
    pub fn len(&self) -> usize {
        self.zones.read().unwrap().len()
    }

    /// Returns whether the register is empty.
    pub fn is_empty(&self) -> bool {
        self.zones.read().unwrap().is_empty()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;
    use crate::task::TaskSet;

    fn info(set: &Arc<TaskSet>, origin: &str, dn: &str) -> Arc<ZoneInfo> {
        let origin: Name = origin.parse().unwrap();
        let db = ZoneDb::new(origin.clone(), Class::IN);
        let settings = SettingsSet::new("zone test", &[], None);
        let task = Task::new(set, &format!("zone {origin}")).unwrap();
        ZoneInfo::new(origin, dn.to_owned(), db, None, settings, task)
    }

    #[test]
    fn longest_match_resolution_works() {
        let set = TaskSet::new();
        let register = ZoneRegister::new();
        register
            .add(info(&set, "test.", "idnsName=test., cn=dns"))
            .unwrap();
        register
            .add(info(&set, "x.example.test.", "idnsName=x.example.test., cn=dns"))
            .unwrap();

        let deep: Name = "y.x.example.test.".parse().unwrap();
        let (dn, matched) = register.get_dn(&deep).unwrap();
        assert_eq!(dn, "idnsName=x.example.test., cn=dns");
        assert_eq!(matched.to_string(), "x.example.test.");

        let shallow: Name = "other.example.test.".parse().unwrap();
        let (_, matched) = register.get_dn(&shallow).unwrap();
        assert_eq!(matched.to_string(), "test.");

        let (db, secure) = register.get_dbs(&deep).unwrap();
        assert_eq!(db.origin().to_string(), "x.example.test.");
        assert!(secure.is_none());

        assert!(register.find(&"unrelated.org.".parse().unwrap()).is_none());
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn duplicate_origins_are_rejected() {
        let set = TaskSet::new();
        let register = ZoneRegister::new();
        register
            .add(info(&set, "example.test.", "idnsName=example.test., cn=dns"))
            .unwrap();
        assert_eq!(
            register
                .add(info(&set, "example.test.", "idnsName=example.test., cn=dns"))
                .err(),
            Some(Error::Exists)
        );
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn iteration_tolerates_concurrent_removal() {
        let set = TaskSet::new();
        let register = ZoneRegister::new();
        register
            .add(info(&set, "a.test.", "idnsName=a.test., cn=dns"))
            .unwrap();
        register
            .add(info(&set, "b.test.", "idnsName=b.test., cn=dns"))
            .unwrap();
        let origins = register.origins();
        register.delete(&"a.test.".parse().unwrap());
        let survivors: Vec<_> = origins
            .iter()
            .filter_map(|origin| register.get(origin))
            .collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].origin().to_string(), "b.test.");
        set.shut_down();
        set.await_shutdown();
    }
}
