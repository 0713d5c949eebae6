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

//! The forward register: the set of origins currently served as
//! forward zones.
//!
//! Delete events carry no object classes, so the dispatcher needs its
//! own memory of which origins were forward zones to classify their
//! deletion correctly. That memory is this set.

use std::collections::BTreeSet;
use std::sync::RwLock;

use crate::name::Name;

/// A thread-safe set of forward-zone origins.
#[derive(Default)]
pub struct ForwardRegister {
    origins: RwLock<BTreeSet<Name>>,
}

impl ForwardRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `origin` as a forward zone.
    pub fn insert(&self, origin: &Name) {
        self.origins.write().unwrap().insert(origin.clone());
    }

    /// Forgets `origin`. Removing an absent origin is fine.
    pub fn remove(&self, origin: &Name) {
        self.origins.write().unwrap().remove(origin);
    }

    /// Returns whether `origin` is currently a forward zone.
    pub fn contains(&self, origin: &Name) -> bool {
        self.origins.read().unwrap().contains(origin)
    }

    /// Returns a snapshot of the registered origins.
    pub fn origins(&self) -> Vec<Name> {
        self.origins.read().unwrap().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_round_trips() {
        let register = ForwardRegister::new();
        let origin: Name = "sub.example.test.".parse().unwrap();
        assert!(!register.contains(&origin));
        register.insert(&origin);
        assert!(register.contains(&origin));
        register.remove(&origin);
        assert!(!register.contains(&origin));
        register.remove(&origin);
    }
}
