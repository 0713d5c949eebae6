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

//! Stacked key→value configuration sets.
//!
//! Settings live in named sets arranged in a parent chain: per-zone
//! sets inherit from the instance's global set, which inherits from
//! the local set filled from the host server's configuration. A read
//! resolves from the innermost set outward, falling back to declared
//! defaults; a write lands in one specific set. Updating a set from a
//! directory entry *unsets* keys whose attributes are absent, so
//! inheritance resumes when an operator removes an attribute.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::dir::Entry;
use crate::errors::{Error, Result};

////////////////////////////////////////////////////////////////////////
// VALUES                                                             //
////////////////////////////////////////////////////////////////////////

/// The type of a setting.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    Str,
    Uint,
    Bool,
}

/// A typed setting value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    Str(String),
    Uint(u32),
    Bool(bool),
}

impl Value {
    fn kind(&self) -> Kind {
        match self {
            Self::Str(_) => Kind::Str,
            Self::Uint(_) => Kind::Uint,
            Self::Bool(_) => Kind::Bool,
        }
    }

    /// Parses a textual value as the given kind. Booleans accept the
    /// directory's `TRUE`/`FALSE` plus the usual yes/no/1/0 forms,
    /// case-insensitively.
    fn parse(kind: Kind, text: &str) -> Result<Self> {
        match kind {
            Kind::Str => Ok(Self::Str(text.to_owned())),
            Kind::Uint => u32::from_str(text)
                .map(Self::Uint)
                .or(Err(Error::UnexpectedToken)),
            Kind::Bool => match text.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Self::Bool(true)),
                "false" | "no" | "0" => Ok(Self::Bool(false)),
                _ => Err(Error::UnexpectedToken),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Uint(u) => write!(f, "{}", u),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// SETTING DECLARATIONS                                               //
////////////////////////////////////////////////////////////////////////

/// The static declaration of one setting: its name, type, and
/// (optional) default. Sets are created from tables of these.
pub struct Def {
    pub name: &'static str,
    pub kind: Kind,
    pub default: Option<Value>,
}

/// Shorthand constructors used in declaration tables.
impl Def {
    pub const fn required(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            default: None,
        }
    }

    pub fn with_str(name: &'static str, default: &str) -> Self {
        Self {
            name,
            kind: Kind::Str,
            default: Some(Value::Str(default.to_owned())),
        }
    }

    pub const fn with_uint(name: &'static str, default: u32) -> Self {
        Self {
            name,
            kind: Kind::Uint,
            default: Some(Value::Uint(default)),
        }
    }

    pub const fn with_bool(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: Kind::Bool,
            default: Some(Value::Bool(default)),
        }
    }
}

struct Slot {
    name: &'static str,
    kind: Kind,
    default: Option<Value>,
    value: Option<Value>,
}

////////////////////////////////////////////////////////////////////////
// SETTINGS SETS                                                      //
////////////////////////////////////////////////////////////////////////

/// A named set of settings with an optional parent set.
pub struct SettingsSet {
    name: String,
    parent: Option<Arc<SettingsSet>>,
    slots: Mutex<Vec<Slot>>,
}

impl SettingsSet {
    /// Creates a set from a declaration table.
    pub fn new(name: &str, defs: &[Def], parent: Option<Arc<SettingsSet>>) -> Arc<Self> {
        let slots = defs
            .iter()
            .map(|def| Slot {
                name: def.name,
                kind: def.kind,
                default: def.default.clone(),
                value: None,
            })
            .collect();
        Arc::new(Self {
            name: name.to_owned(),
            parent,
            slots: Mutex::new(slots),
        })
    }

    /// Returns the set's name (used in log messages).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolves `key`, walking from this set outward through the
    /// parent chain. The first explicitly set value wins; failing
    /// that, the first declared default.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.find_set(key) {
            return Ok(value);
        }
        self.find_default(key).ok_or(Error::NotFound)
    }

    fn find_set(&self, key: &str) -> Option<Value> {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter().find(|s| s.name == key) {
            if let Some(value) = &slot.value {
                return Some(value.clone());
            }
        }
        drop(slots);
        self.parent.as_ref()?.find_set(key)
    }

    fn find_default(&self, key: &str) -> Option<Value> {
        let slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.iter().find(|s| s.name == key) {
            if let Some(default) = &slot.default {
                return Some(default.clone());
            }
        }
        drop(slots);
        self.parent.as_ref()?.find_default(key)
    }

    /// Typed accessor for string settings.
    pub fn get_str(&self, key: &str) -> Result<String> {
        match self.get(key)? {
            Value::Str(s) => Ok(s),
            _ => Err(Error::UnexpectedToken),
        }
    }

    /// Typed accessor for unsigned-integer settings.
    pub fn get_uint(&self, key: &str) -> Result<u32> {
        match self.get(key)? {
            Value::Uint(u) => Ok(u),
            _ => Err(Error::UnexpectedToken),
        }
    }

    /// Typed accessor for boolean settings.
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        match self.get(key)? {
            Value::Bool(b) => Ok(b),
            _ => Err(Error::UnexpectedToken),
        }
    }

    /// Sets `key` in *this* set. The value's type must match the
    /// slot's declaration.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .iter_mut()
            .find(|s| s.name == key)
            .ok_or(Error::NotFound)?;
        if slot.kind != value.kind() {
            return Err(Error::UnexpectedToken);
        }
        slot.value = Some(value);
        Ok(())
    }

    /// Unsets `key` in this set, so that reads resume resolving
    /// through the parent chain (or defaults).
    pub fn unset(&self, key: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots
            .iter_mut()
            .find(|s| s.name == key)
            .ok_or(Error::NotFound)?;
        slot.value = None;
        Ok(())
    }

    /// Parses and sets textual values, e.g. from the host server's
    /// configuration. Unknown keys fail with `NotFound`.
    pub fn fill_from_pairs(&self, pairs: &[(&str, &str)]) -> Result<()> {
        for (key, text) in pairs {
            let kind = {
                let slots = self.slots.lock().unwrap();
                slots
                    .iter()
                    .find(|s| s.name == *key)
                    .map(|s| s.kind)
                    .ok_or(Error::NotFound)?
            };
            self.set(key, Value::parse(kind, text)?)?;
        }
        Ok(())
    }

    /// Returns whether every slot resolves to a value (set anywhere in
    /// the chain, or defaulted). Used to catch missing required keys
    /// before the engine starts.
    pub fn is_filled(&self) -> bool {
        let names: Vec<&'static str> = {
            let slots = self.slots.lock().unwrap();
            slots.iter().map(|s| s.name).collect()
        };
        names.iter().all(|name| self.get(name).is_ok())
    }

    /// Updates this set from a directory entry: for each
    /// `(setting, attribute)` mapping, a present attribute has its
    /// first value parsed and set, and an absent attribute unsets the
    /// slot so inheritance resumes. Fails on the first malformed
    /// value, leaving earlier mappings applied; use
    /// [`SettingsSet::update_from_entry_rollback`] for all-or-nothing
    /// behavior.
    pub fn update_from_entry(&self, entry: &Entry, map: &[(&str, &str)]) -> Result<()> {
        for (setting, attribute) in map {
            match entry.first_value(attribute) {
                Some(text) => {
                    let kind = {
                        let slots = self.slots.lock().unwrap();
                        slots
                            .iter()
                            .find(|s| s.name == *setting)
                            .map(|s| s.kind)
                            .ok_or(Error::NotFound)?
                    };
                    let value = Value::parse(kind, text)?;
                    debug!(
                        "settings '{}': {} = {} (from {})",
                        self.name, setting, value, attribute
                    );
                    self.set(setting, value)?;
                }
                None => self.unset(setting)?,
            }
        }
        Ok(())
    }

    /// The rollback-on-error variant of
    /// [`SettingsSet::update_from_entry`]: parses every mapped
    /// attribute first and commits only if all of them are valid, so a
    /// malformed entry leaves the set untouched.
    pub fn update_from_entry_rollback(&self, entry: &Entry, map: &[(&str, &str)]) -> Result<()> {
        let mut staged: Vec<(&str, Option<Value>)> = Vec::with_capacity(map.len());
        for (setting, attribute) in map {
            match entry.first_value(attribute) {
                Some(text) => {
                    let kind = {
                        let slots = self.slots.lock().unwrap();
                        slots
                            .iter()
                            .find(|s| s.name == *setting)
                            .map(|s| s.kind)
                            .ok_or(Error::NotFound)?
                    };
                    staged.push((setting, Some(Value::parse(kind, text)?)));
                }
                None => staged.push((setting, None)),
            }
        }
        for (setting, value) in staged {
            match value {
                Some(value) => self.set(setting, value)?,
                None => self.unset(setting)?,
            }
        }
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir::{ChangeType, Entry};

    fn defs() -> Vec<Def> {
        vec![
            Def::required("uri", Kind::Str),
            Def::with_uint("connections", 2),
            Def::with_bool("sync_ptr", false),
        ]
    }

    #[test]
    fn defaults_and_required_keys_resolve_correctly() {
        let set = SettingsSet::new("test", &defs(), None);
        assert_eq!(set.get_uint("connections").unwrap(), 2);
        assert_eq!(set.get("uri"), Err(Error::NotFound));
        assert!(!set.is_filled());
        set.set("uri", Value::Str("ldap://localhost".into())).unwrap();
        assert!(set.is_filled());
    }

    #[test]
    fn child_sets_shadow_and_inherit() {
        let parent = SettingsSet::new("global", &defs(), None);
        parent.set("sync_ptr", Value::Bool(true)).unwrap();
        let child = SettingsSet::new(
            "zone",
            &[Def::required("sync_ptr", Kind::Bool)],
            Some(parent.clone()),
        );
        // Inherits the parent's explicit value.
        assert!(child.get_bool("sync_ptr").unwrap());
        // A local value shadows it.
        child.set("sync_ptr", Value::Bool(false)).unwrap();
        assert!(!child.get_bool("sync_ptr").unwrap());
        // Unsetting resumes inheritance.
        child.unset("sync_ptr").unwrap();
        assert!(child.get_bool("sync_ptr").unwrap());
    }

    #[test]
    fn set_checks_value_types() {
        let set = SettingsSet::new("test", &defs(), None);
        assert_eq!(
            set.set("connections", Value::Str("three".into())),
            Err(Error::UnexpectedToken)
        );
        assert_eq!(set.set("unknown", Value::Uint(1)), Err(Error::NotFound));
    }

    #[test]
    fn fill_from_pairs_parses_by_kind() {
        let set = SettingsSet::new("test", &defs(), None);
        set.fill_from_pairs(&[
            ("uri", "ldap://localhost"),
            ("connections", "4"),
            ("sync_ptr", "TRUE"),
        ])
        .unwrap();
        assert_eq!(set.get_uint("connections").unwrap(), 4);
        assert!(set.get_bool("sync_ptr").unwrap());
        assert_eq!(
            set.fill_from_pairs(&[("connections", "many")]),
            Err(Error::UnexpectedToken)
        );
    }

    fn entry_with(attrs: &[(&str, &[&str])]) -> Entry {
        Entry::new(
            "idnsName=example.test., cn=dns".to_owned(),
            ChangeType::Modify,
            attrs
                .iter()
                .map(|(name, values)| {
                    (
                        name.to_string(),
                        values.iter().map(|v| v.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn update_from_entry_sets_and_unsets() {
        let set = SettingsSet::new("zone", &defs(), None);
        let map = [("sync_ptr", "idnsAllowSyncPTR")];
        let present = entry_with(&[("idnsAllowSyncPTR", &["TRUE"])]);
        set.update_from_entry(&present, &map).unwrap();
        assert!(set.get_bool("sync_ptr").unwrap());

        let absent = entry_with(&[]);
        set.update_from_entry(&absent, &map).unwrap();
        // Falls back to the declared default.
        assert!(!set.get_bool("sync_ptr").unwrap());
    }

    #[test]
    fn rollback_variant_leaves_set_untouched_on_error() {
        let set = SettingsSet::new("zone", &defs(), None);
        set.set("connections", Value::Uint(7)).unwrap();
        let entry = entry_with(&[
            ("uri", &["ldap://other"]),
            ("connections", &["not-a-number"]),
        ]);
        let map = [("uri", "uri"), ("connections", "connections")];
        assert_eq!(
            set.update_from_entry_rollback(&entry, &map),
            Err(Error::UnexpectedToken)
        );
        assert_eq!(set.get("uri"), Err(Error::NotFound));
        assert_eq!(set.get_uint("connections").unwrap(), 7);
    }
}
