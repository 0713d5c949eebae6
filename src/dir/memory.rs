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

//! An in-process [`Directory`] implementation.
//!
//! This is the reference implementation of the protocol seam and the
//! backing store for the test suite: an entry map plus a
//! persistent-refresh event queue. Mutations made through a
//! connection are echoed into the open stream exactly the way a real
//! directory replays a writer's own changes, which is what the
//! engine's echo-absorption behavior is tested against.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::codec::normalize_dn;

use super::backend::{BindConfig, DirConn, DirError, Directory, Mod, ModOp, Scope, StreamEvent};
use super::entry::ChangeType;

type Attributes = Vec<(String, Vec<String>)>;

////////////////////////////////////////////////////////////////////////
// DIRECTORY STATE                                                    //
////////////////////////////////////////////////////////////////////////

struct State {
    /// Normalized DN → (original DN, attributes).
    entries: BTreeMap<String, (String, Attributes)>,
    /// Events queued for the open persistent-refresh stream.
    events: VecDeque<StreamEvent>,
    /// Whether a stream is open (mutations are echoed only then).
    stream_open: bool,
    /// The objectClass values the open stream's filter selects.
    stream_classes: Vec<String>,
    /// Set by [`Directory::wake`]; makes the next poll return idle.
    woken: bool,
    /// Outcomes forced onto upcoming binds (for failure testing).
    bind_failures: VecDeque<DirError>,
    bind_count: usize,
    modify_count: usize,
}

/// State shared between the directory handle and its connections.
struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

impl Shared {
    /// Echoes the current contents of `key` into the stream, if one is
    /// open and its filter matches.
    fn echo(&self, state: &mut State, key: &str, change: ChangeType) {
        if !state.stream_open {
            return;
        }
        if let Some((dn, attributes)) = state.entries.get(key) {
            if !matches_classes(&state.stream_classes, attributes) {
                return;
            }
            state.events.push_back(StreamEvent::Entry {
                dn: dn.clone(),
                change,
                attributes: attributes.clone(),
            });
            self.wakeup.notify_all();
        }
    }

    /// Echoes a deletion of `dn` into the stream, if one is open.
    fn echo_delete(&self, state: &mut State, dn: String) {
        if state.stream_open {
            state.events.push_back(StreamEvent::Entry {
                dn,
                change: ChangeType::Delete,
                attributes: Vec::new(),
            });
            self.wakeup.notify_all();
        }
    }
}

/// The in-memory directory server.
pub struct MemoryDirectory {
    shared: Arc<Shared>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    entries: BTreeMap::new(),
                    events: VecDeque::new(),
                    stream_open: false,
                    stream_classes: Vec::new(),
                    woken: false,
                    bind_failures: VecDeque::new(),
                    bind_count: 0,
                    modify_count: 0,
                }),
                wakeup: Condvar::new(),
            }),
        })
    }

    /// Seeds an entry without generating a stream event. For test
    /// setup before the engine connects.
    pub fn install(&self, dn: &str, attributes: Attributes) {
        let mut state = self.shared.state.lock().unwrap();
        state
            .entries
            .insert(normalize_dn(dn), (dn.to_owned(), attributes));
    }

    /// Creates or replaces an entry and echoes the change into the
    /// open stream, as an operator modification would.
    pub fn upsert(&self, dn: &str, attributes: Attributes) {
        let mut state = self.shared.state.lock().unwrap();
        let key = normalize_dn(dn);
        let change = if state.entries.contains_key(&key) {
            ChangeType::Modify
        } else {
            ChangeType::Add
        };
        state
            .entries
            .insert(key.clone(), (dn.to_owned(), attributes));
        self.shared.echo(&mut state, &key, change);
    }

    /// Removes an entry and echoes the deletion into the open stream.
    pub fn remove(&self, dn: &str) {
        let mut state = self.shared.state.lock().unwrap();
        let key = normalize_dn(dn);
        if let Some((original, _)) = state.entries.remove(&key) {
            self.shared.echo_delete(&mut state, original);
        }
    }

    /// Returns a copy of the attributes of `dn`, if present.
    pub fn get(&self, dn: &str) -> Option<Attributes> {
        let state = self.shared.state.lock().unwrap();
        state
            .entries
            .get(&normalize_dn(dn))
            .map(|(_, attrs)| attrs.clone())
    }

    /// Returns the values of one attribute of `dn`, if present.
    pub fn attr_values(&self, dn: &str, attribute: &str) -> Option<Vec<String>> {
        self.get(dn)?
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(attribute))
            .map(|(_, values)| values)
    }

    /// Forces the next `count` binds (on any connection) to fail with
    /// `error`.
    pub fn fail_binds(&self, count: usize, error: DirError) {
        let mut state = self.shared.state.lock().unwrap();
        for _ in 0..count {
            state.bind_failures.push_back(error.clone());
        }
    }

    /// Returns how many bind attempts have been made.
    pub fn bind_count(&self) -> usize {
        self.shared.state.lock().unwrap().bind_count
    }

    /// Returns how many modification operations have been applied.
    pub fn modify_count(&self) -> usize {
        self.shared.state.lock().unwrap().modify_count
    }

    /// Queues a raw stream event.
    pub fn push_event(&self, event: StreamEvent) {
        let mut state = self.shared.state.lock().unwrap();
        state.events.push_back(event);
        self.shared.wakeup.notify_all();
    }
}

/// Extracts the `objectClass=` terms of a search filter. An empty
/// result means the filter selects everything the test cares about.
fn filter_classes(filter: &str) -> Vec<String> {
    let mut classes = Vec::new();
    let lower = filter.to_ascii_lowercase();
    let mut rest = lower.as_str();
    while let Some(at) = rest.find("objectclass=") {
        let value = &rest[at + "objectclass=".len()..];
        let end = value.find(')').unwrap_or(value.len());
        classes.push(value[..end].to_owned());
        rest = &value[end..];
    }
    classes
}

fn matches_classes(classes: &[String], attributes: &Attributes) -> bool {
    if classes.is_empty() {
        return true;
    }
    attributes
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("objectClass"))
        .flat_map(|(_, values)| values.iter())
        .any(|value| {
            classes
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(value))
        })
}

impl Directory for MemoryDirectory {
    fn open(&self) -> Result<Box<dyn DirConn>, DirError> {
        Ok(Box::new(MemoryConn {
            shared: self.shared.clone(),
        }))
    }

    fn wake(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.woken = true;
        self.shared.wakeup.notify_all();
    }
}

////////////////////////////////////////////////////////////////////////
// CONNECTIONS                                                        //
////////////////////////////////////////////////////////////////////////

struct MemoryConn {
    shared: Arc<Shared>,
}

impl DirConn for MemoryConn {
    fn bind(&mut self, _config: &BindConfig) -> Result<(), DirError> {
        let mut state = self.shared.state.lock().unwrap();
        state.bind_count += 1;
        match state.bind_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        _attributes: Option<&[&str]>,
    ) -> Result<Vec<(String, Attributes)>, DirError> {
        let state = self.shared.state.lock().unwrap();
        let base_key = normalize_dn(base);
        let classes = filter_classes(filter);
        let mut results = Vec::new();
        for (key, (dn, attributes)) in &state.entries {
            let in_scope = match scope {
                Scope::Base => *key == base_key,
                Scope::Subtree => key.ends_with(&base_key),
            };
            if in_scope && matches_classes(&classes, attributes) {
                results.push((dn.clone(), attributes.clone()));
            }
        }
        Ok(results)
    }

    fn modify(&mut self, dn: &str, mods: &[Mod]) -> Result<(), DirError> {
        let mut state = self.shared.state.lock().unwrap();
        let key = normalize_dn(dn);
        {
            let (_, attributes) = state.entries.get_mut(&key).ok_or(DirError::NoSuchObject)?;
            apply_mods(attributes, mods)?;
        }
        state.modify_count += 1;
        self.shared.echo(&mut state, &key, ChangeType::Modify);
        Ok(())
    }

    fn add_entry(&mut self, dn: &str, mods: &[Mod]) -> Result<(), DirError> {
        let mut state = self.shared.state.lock().unwrap();
        let key = normalize_dn(dn);
        if state.entries.contains_key(&key) {
            return Err(DirError::Other("entry already exists".to_owned()));
        }
        let mut attributes: Attributes = Vec::new();
        apply_mods(&mut attributes, mods)?;
        state
            .entries
            .insert(key.clone(), (dn.to_owned(), attributes));
        state.modify_count += 1;
        self.shared.echo(&mut state, &key, ChangeType::Add);
        Ok(())
    }

    fn delete_entry(&mut self, dn: &str) -> Result<(), DirError> {
        let mut state = self.shared.state.lock().unwrap();
        let key = normalize_dn(dn);
        let (original, _) = state
            .entries
            .remove(&key)
            .ok_or(DirError::NoSuchObject)?;
        state.modify_count += 1;
        self.shared.echo_delete(&mut state, original);
        Ok(())
    }

    fn open_stream(&mut self, _base: &str, filter: &str) -> Result<(), DirError> {
        let mut state = self.shared.state.lock().unwrap();
        state.stream_open = true;
        state.stream_classes = filter_classes(filter);
        state.events.clear();
        // The refresh phase: replay every matching entry, parents
        // before children (as a hierarchical backend would return
        // them), then mark the refresh as done.
        let mut refresh: Vec<(usize, StreamEvent)> = state
            .entries
            .values()
            .filter(|(_, attributes)| matches_classes(&state.stream_classes, attributes))
            .map(|(dn, attributes)| {
                let depth = dn.matches(',').count();
                (
                    depth,
                    StreamEvent::Entry {
                        dn: dn.clone(),
                        change: ChangeType::Add,
                        attributes: attributes.clone(),
                    },
                )
            })
            .collect();
        refresh.sort_by_key(|(depth, _)| *depth);
        state.events.extend(refresh.into_iter().map(|(_, event)| event));
        state.events.push_back(StreamEvent::RefreshDone);
        self.shared.wakeup.notify_all();
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<StreamEvent>, DirError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.woken {
                state.woken = false;
                return Ok(None);
            }
            if let Some(event) = state.events.pop_front() {
                return Ok(Some(event));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .shared
                .wakeup
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }
}

/// Applies modifications to an attribute list with the usual directory
/// semantics: deleting a missing attribute is an error the caller maps
/// to a silent success, deleting specific values removes just those,
/// and deleting the last value drops the attribute.
fn apply_mods(attributes: &mut Attributes, mods: &[Mod]) -> Result<(), DirError> {
    for m in mods {
        let at = attributes
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(&m.attribute));
        match m.op {
            ModOp::Add => match at {
                Some(at) => attributes[at].1.extend(m.values.iter().cloned()),
                None => attributes.push((m.attribute.clone(), m.values.clone())),
            },
            ModOp::Replace => match at {
                Some(at) => attributes[at].1 = m.values.clone(),
                None => attributes.push((m.attribute.clone(), m.values.clone())),
            },
            ModOp::Delete => {
                let Some(at) = at else {
                    return Err(DirError::NoSuchAttribute);
                };
                if m.values.is_empty() {
                    attributes.remove(at);
                } else {
                    attributes[at].1.retain(|v| !m.values.contains(v));
                    if attributes[at].1.is_empty() {
                        attributes.remove(at);
                    }
                }
            }
        }
    }
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dn_canonicalizes() {
        assert_eq!(
            normalize_dn("idnsName=Example.Org., cn=dns,dc=test"),
            "idnsname=example.org.,cn=dns,dc=test"
        );
    }

    #[test]
    fn mutations_echo_into_an_open_stream() {
        let dir = MemoryDirectory::new();
        let mut conn = dir.open().unwrap();
        conn.open_stream("cn=dns", "(|(objectClass=idnsZone)(objectClass=idnsRecord))")
            .unwrap();
        // Refresh of an empty directory: just the marker.
        assert!(matches!(
            conn.poll(Duration::from_millis(10)).unwrap(),
            Some(StreamEvent::RefreshDone)
        ));

        dir.upsert(
            "idnsName=host, idnsName=example.test., cn=dns",
            vec![
                ("objectClass".to_owned(), vec!["idnsRecord".to_owned()]),
                ("ARecord".to_owned(), vec!["192.0.2.1".to_owned()]),
            ],
        );
        match conn.poll(Duration::from_millis(10)).unwrap() {
            Some(StreamEvent::Entry { change, .. }) => assert_eq!(change, ChangeType::Add),
            other => panic!("unexpected event: {other:?}"),
        }

        // Entries outside the filter are not echoed.
        dir.upsert("cn=unrelated, cn=dns", vec![]);
        assert!(conn.poll(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn wake_interrupts_poll() {
        let dir = MemoryDirectory::new();
        let mut conn = dir.open().unwrap();
        conn.open_stream("cn=dns", "").unwrap();
        let _ = conn.poll(Duration::from_millis(10));
        dir.wake();
        // The wake flag makes the next poll return immediately.
        let start = Instant::now();
        assert!(conn.poll(Duration::from_secs(5)).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn modify_semantics_match_the_directory_contract() {
        let dir = MemoryDirectory::new();
        let mut conn = dir.open().unwrap();
        dir.install("cn=a, cn=dns", vec![("x".to_owned(), vec!["1".to_owned()])]);

        // Deleting a missing attribute reports NoSuchAttribute.
        assert_eq!(
            conn.modify(
                "cn=a, cn=dns",
                &[Mod::new(ModOp::Delete, "y", vec!["1".to_owned()])]
            ),
            Err(DirError::NoSuchAttribute)
        );

        // Modifying a missing entry reports NoSuchObject.
        assert_eq!(
            conn.modify("cn=b, cn=dns", &[Mod::new(ModOp::Add, "x", vec![])]),
            Err(DirError::NoSuchObject)
        );

        // Deleting the last value drops the attribute.
        conn.modify(
            "cn=a, cn=dns",
            &[Mod::new(ModOp::Delete, "x", vec!["1".to_owned()])],
        )
        .unwrap();
        assert_eq!(dir.attr_values("cn=a, cn=dns", "x"), None);
    }

    #[test]
    fn open_stream_replays_matching_entries() {
        let dir = MemoryDirectory::new();
        dir.install(
            "idnsName=example.test., cn=dns",
            vec![("objectClass".to_owned(), vec!["idnsZone".to_owned()])],
        );
        dir.install("cn=unrelated, cn=dns", vec![]);
        let mut conn = dir.open().unwrap();
        conn.open_stream("cn=dns", "(objectClass=idnsZone)").unwrap();
        let first = conn.poll(Duration::from_millis(10)).unwrap();
        assert!(matches!(first, Some(StreamEvent::Entry { .. })));
        let second = conn.poll(Duration::from_millis(10)).unwrap();
        assert!(matches!(second, Some(StreamEvent::RefreshDone)));
        assert!(conn.poll(Duration::from_millis(10)).unwrap().is_none());
    }
}
