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

//! The host name server's view, as consumed by the engine.
//!
//! The query path, zone manager, and cache belong to the host server;
//! what the engine needs is the surface it mutates: publish and
//! unload zones, install per-zone access control and update policy,
//! maintain the forwarding table, and flush the cache after topology
//! changes. [`View`] models exactly that surface.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use std::collections::BTreeMap;

use log::warn;

use crate::db::ZoneDb;
use crate::errors::{Error, Result};
use crate::name::Name;

////////////////////////////////////////////////////////////////////////
// ACCESS CONTROL LISTS                                               //
////////////////////////////////////////////////////////////////////////

/// One element of an address-based ACL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AclElement {
    Localhost,
    Net { addr: IpAddr, prefix: u8 },
}

/// An address-based access control list.
///
/// This is a deliberately small model of the host server's ACL
/// machinery: enough to install what `idnsAllowQuery` and
/// `idnsAllowTransfer` describe and to fall back to the most
/// restrictive policy when an operator writes something unparsable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Acl {
    Any,
    None,
    List(Vec<AclElement>),
}

impl Acl {
    /// The most restrictive policy; the fallback when parsing fails.
    pub fn most_restrictive() -> Self {
        Self::None
    }

    /// Parses an ACL from attribute values. Each value is `any`,
    /// `none`, `localhost`, or an address with an optional `/prefix`.
    pub fn from_values(values: &[String]) -> Result<Self> {
        if values.is_empty() {
            return Err(Error::UnexpectedToken);
        }
        if values.len() == 1 {
            match values[0].to_ascii_lowercase().as_str() {
                "any" => return Ok(Self::Any),
                "none" => return Ok(Self::None),
                _ => {}
            }
        }
        let mut elements = Vec::with_capacity(values.len());
        for value in values {
            elements.push(value.parse()?);
        }
        Ok(Self::List(elements))
    }
}

impl FromStr for AclElement {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        if text.eq_ignore_ascii_case("localhost") {
            return Ok(Self::Localhost);
        }
        let (addr_text, prefix_text) = match text.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (text, None),
        };
        let addr: IpAddr = addr_text.parse().or(Err(Error::UnexpectedToken))?;
        let max_prefix = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = match prefix_text {
            Some(prefix) => prefix.parse().or(Err(Error::UnexpectedToken))?,
            None => max_prefix,
        };
        if prefix > max_prefix {
            return Err(Error::UnexpectedToken);
        }
        Ok(Self::Net { addr, prefix })
    }
}

////////////////////////////////////////////////////////////////////////
// UPDATE POLICY                                                      //
////////////////////////////////////////////////////////////////////////

/// A simple-secure-update table: the validated `grant`/`deny`
/// statements derived from `idnsUpdatePolicy`. The host server
/// enforces the statements; the engine only validates and installs
/// them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UpdatePolicy {
    statements: Vec<String>,
}

impl UpdatePolicy {
    /// The empty policy: all dynamic updates are refused.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a policy string: semicolon-separated statements, each
    /// beginning with `grant` or `deny`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut statements = Vec::new();
        for statement in text.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            let keyword = statement.split_ascii_whitespace().next();
            match keyword {
                Some(word) if word.eq_ignore_ascii_case("grant") => {}
                Some(word) if word.eq_ignore_ascii_case("deny") => {}
                _ => return Err(Error::UnexpectedToken),
            }
            statements.push(statement.to_owned());
        }
        Ok(Self { statements })
    }

    /// Returns whether the policy grants nothing.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Returns the validated statements.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }
}

////////////////////////////////////////////////////////////////////////
// FORWARDING                                                         //
////////////////////////////////////////////////////////////////////////

/// The forwarding policy of a forward zone.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ForwardPolicy {
    /// Try the forwarders, then recurse normally.
    First,
    /// Use only the forwarders.
    Only,
    /// Forwarding disabled.
    None,
}

impl FromStr for ForwardPolicy {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "first" => Ok(Self::First),
            "only" => Ok(Self::Only),
            "none" => Ok(Self::None),
            _ => Err(Error::UnexpectedToken),
        }
    }
}

/// A forwarding table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Forwarding {
    pub policy: ForwardPolicy,
    pub forwarders: Vec<IpAddr>,
}

impl Forwarding {
    /// Parses forwarder addresses from attribute values. Fails on the
    /// first unparsable address.
    pub fn parse_forwarders(values: &[String]) -> Result<Vec<IpAddr>> {
        values
            .iter()
            .map(|value| {
                // A value may carry a trailing " port NNN" clause; the
                // engine forwards on the default port only.
                let addr = value.split_ascii_whitespace().next().unwrap_or("");
                addr.parse().or(Err(Error::UnexpectedToken))
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////
// PUBLISHED ZONES                                                    //
////////////////////////////////////////////////////////////////////////

/// A zone as the view sees it.
pub struct ViewZone {
    origin: Name,
    db: Arc<ZoneDb>,
    /// Whether this is a built-in empty zone installed by the host
    /// server's defaults (e.g. RFC 6303 coverage) rather than by this
    /// engine. Such a zone yields to a projected master zone.
    builtin_empty: bool,
    loaded: AtomicBool,
    update_policy: Mutex<UpdatePolicy>,
    query_acl: Mutex<Acl>,
    transfer_acl: Mutex<Acl>,
}

impl ViewZone {
    pub fn new(origin: Name, db: Arc<ZoneDb>) -> Arc<Self> {
        Arc::new(Self {
            origin,
            db,
            builtin_empty: false,
            loaded: AtomicBool::new(false),
            update_policy: Mutex::new(UpdatePolicy::empty()),
            query_acl: Mutex::new(Acl::Any),
            transfer_acl: Mutex::new(Acl::most_restrictive()),
        })
    }

    /// Creates a built-in empty zone placeholder.
    pub fn new_builtin_empty(origin: Name, db: Arc<ZoneDb>) -> Arc<Self> {
        Arc::new(Self {
            origin,
            db,
            builtin_empty: true,
            loaded: AtomicBool::new(true),
            update_policy: Mutex::new(UpdatePolicy::empty()),
            query_acl: Mutex::new(Acl::Any),
            transfer_acl: Mutex::new(Acl::most_restrictive()),
        })
    }

    pub fn origin(&self) -> &Name {
        &self.origin
    }

    pub fn db(&self) -> &Arc<ZoneDb> {
        &self.db
    }

    pub fn is_builtin_empty(&self) -> bool {
        self.builtin_empty
    }

    /// Marks the zone loaded: its database contents are being served.
    pub fn load(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub fn set_update_policy(&self, policy: UpdatePolicy) {
        *self.update_policy.lock().unwrap() = policy;
    }

    pub fn update_policy(&self) -> UpdatePolicy {
        self.update_policy.lock().unwrap().clone()
    }

    pub fn set_query_acl(&self, acl: Acl) {
        *self.query_acl.lock().unwrap() = acl;
    }

    pub fn query_acl(&self) -> Acl {
        self.query_acl.lock().unwrap().clone()
    }

    pub fn set_transfer_acl(&self, acl: Acl) {
        *self.transfer_acl.lock().unwrap() = acl;
    }

    pub fn transfer_acl(&self) -> Acl {
        self.transfer_acl.lock().unwrap().clone()
    }
}

impl fmt::Debug for ViewZone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ViewZone")
            .field("origin", &self.origin)
            .field("builtin_empty", &self.builtin_empty)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// THE VIEW                                                           //
////////////////////////////////////////////////////////////////////////

/// The mutable surface of the host server's view.
pub struct View {
    zones: RwLock<BTreeMap<Name, Arc<ViewZone>>>,
    forward: RwLock<BTreeMap<Name, Forwarding>>,
    cache_flushes: AtomicU64,
}

impl View {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            zones: RwLock::new(BTreeMap::new()),
            forward: RwLock::new(BTreeMap::new()),
            cache_flushes: AtomicU64::new(0),
        })
    }

    /// Publishes a zone. Fails with [`Error::Exists`] if a zone with
    /// the same origin is already in the view.
    pub fn add_zone(&self, zone: Arc<ViewZone>) -> Result<()> {
        let mut zones = self.zones.write().unwrap();
        if zones.contains_key(zone.origin()) {
            return Err(Error::Exists);
        }
        zones.insert(zone.origin().clone(), zone);
        Ok(())
    }

    /// Removes a zone from the view. Removing a zone that is not
    /// there is not an error; deletion is idempotent.
    pub fn delete_zone(&self, origin: &Name) {
        let mut zones = self.zones.write().unwrap();
        if zones.remove(origin).is_none() {
            warn!("attempt to unload zone '{}' which is not in the view", origin);
        }
    }

    /// Returns the zone with exactly this origin, if any.
    pub fn find_zone(&self, origin: &Name) -> Option<Arc<ViewZone>> {
        self.zones.read().unwrap().get(origin).cloned()
    }

    /// Returns the deepest zone at or above `name`, if any.
    pub fn find_zone_for(&self, name: &Name) -> Option<Arc<ViewZone>> {
        let zones = self.zones.read().unwrap();
        for skip in 0..name.len() {
            // The terminal null label always yields the root name, so
            // superdomain cannot fail here.
            if let Some(candidate) = name.superdomain(skip) {
                if let Some(zone) = zones.get(&candidate) {
                    return Some(zone.clone());
                }
            }
        }
        None
    }

    /// Installs (or replaces) a forwarding table entry.
    pub fn set_forwarding(&self, origin: &Name, forwarding: Forwarding) {
        let mut forward = self.forward.write().unwrap();
        forward.insert(origin.clone(), forwarding);
    }

    /// Removes a forwarding table entry, if present.
    pub fn remove_forwarding(&self, origin: &Name) {
        let mut forward = self.forward.write().unwrap();
        forward.remove(origin);
    }

    /// Returns the forwarding entry for `origin`, if any.
    pub fn forwarding(&self, origin: &Name) -> Option<Forwarding> {
        self.forward.read().unwrap().get(origin).cloned()
    }

    /// Flushes the resolver cache. The engine calls this after
    /// forwarding topology changes so stale answers do not linger.
    pub fn flush_cache(&self) {
        self.cache_flushes.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns how many times the cache has been flushed.
    pub fn cache_flush_count(&self) -> u64 {
        self.cache_flushes.load(Ordering::SeqCst)
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::Class;

    fn zone(origin: &str) -> Arc<ViewZone> {
        let origin: Name = origin.parse().unwrap();
        let db = ZoneDb::new(origin.clone(), Class::IN);
        ViewZone::new(origin, db)
    }

    #[test]
    fn add_and_find_zones() {
        let view = View::new();
        view.add_zone(zone("example.test.")).unwrap();
        assert!(view.find_zone(&"example.test.".parse().unwrap()).is_some());
        assert_eq!(
            view.add_zone(zone("example.test.")).err(),
            Some(Error::Exists)
        );
        let below: Name = "a.b.example.test.".parse().unwrap();
        assert_eq!(
            view.find_zone_for(&below).unwrap().origin().to_string(),
            "example.test."
        );
        assert!(view.find_zone_for(&"other.org.".parse().unwrap()).is_none());
    }

    #[test]
    fn acl_parsing_works() {
        assert_eq!(Acl::from_values(&["any".to_owned()]).unwrap(), Acl::Any);
        assert_eq!(Acl::from_values(&["none".to_owned()]).unwrap(), Acl::None);
        let list = Acl::from_values(&[
            "localhost".to_owned(),
            "192.0.2.0/24".to_owned(),
            "2001:db8::1".to_owned(),
        ])
        .unwrap();
        match list {
            Acl::List(elements) => assert_eq!(elements.len(), 3),
            other => panic!("unexpected ACL: {other:?}"),
        }
        assert!(Acl::from_values(&["192.0.2.0/33".to_owned()]).is_err());
        assert!(Acl::from_values(&["bogus".to_owned()]).is_err());
        assert!(Acl::from_values(&[]).is_err());
    }

    #[test]
    fn update_policy_parsing_works() {
        let policy =
            UpdatePolicy::parse("grant EXAMPLE.TEST krb5-self * A; grant * tcp-self * PTR;")
                .unwrap();
        assert_eq!(policy.statements().len(), 2);
        assert!(UpdatePolicy::parse("").unwrap().is_empty());
        assert!(UpdatePolicy::parse("allow everything").is_err());
    }

    #[test]
    fn forwarder_parsing_works() {
        let addrs = Forwarding::parse_forwarders(&[
            "192.0.2.53".to_owned(),
            "2001:db8::53 port 5353".to_owned(),
        ])
        .unwrap();
        assert_eq!(addrs.len(), 2);
        assert!(Forwarding::parse_forwarders(&["not-an-ip".to_owned()]).is_err());
    }

    #[test]
    fn builtin_empty_zones_are_marked() {
        let view = View::new();
        let origin: Name = "10.in-addr.arpa.".parse().unwrap();
        let db = ZoneDb::new(origin.clone(), Class::IN);
        view.add_zone(ViewZone::new_builtin_empty(origin.clone(), db))
            .unwrap();
        let found = view.find_zone(&origin).unwrap();
        assert!(found.is_builtin_empty());
        assert!(found.is_loaded());
        assert!(!zone("example.test.").is_builtin_empty());
    }

    #[test]
    fn forwarding_table_and_cache_flushes() {
        let view = View::new();
        let origin: Name = "sub.example.test.".parse().unwrap();
        view.set_forwarding(
            &origin,
            Forwarding {
                policy: ForwardPolicy::Only,
                forwarders: vec!["192.0.2.53".parse().unwrap()],
            },
        );
        assert!(view.forwarding(&origin).is_some());
        view.flush_cache();
        assert_eq!(view.cache_flush_count(), 1);
        view.remove_forwarding(&origin);
        assert!(view.forwarding(&origin).is_none());
    }
}
