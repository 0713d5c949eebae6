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

//! End-to-end tests of the synchronization engine against the
//! in-memory directory.

use std::sync::Arc;
use std::time::{Duration, Instant};

use liaison::class::Class;
use liaison::codec;
use liaison::db::{journal, serial_gt};
use liaison::dir::{memory::MemoryDirectory, NoKrb};
use liaison::errors::Error;
use liaison::instance::Instance;
use liaison::name::Name;
use liaison::rr::{Rdata, RdataList, Type, DEFAULT_TTL};
use liaison::sync::SyncState;
use liaison::view::{Acl, View};

const BASE: &str = "cn=dns, dc=example, dc=test";

/// Everything one engine-under-test needs, torn down on drop.
struct Harness {
    directory: Arc<MemoryDirectory>,
    view: Arc<View>,
    instance: Arc<Instance>,
    _workdir: tempfile::TempDir,
}

impl Harness {
    /// Builds an instance over a fresh in-memory directory, seeds it
    /// with `entries`, and runs the initial refresh to completion.
    fn start<S: AsRef<str>>(name: &str, entries: &[(S, Vec<(String, Vec<String>)>)]) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let directory = MemoryDirectory::new();
        for (dn, attrs) in entries {
            directory.install(dn.as_ref(), attrs.clone());
        }
        let view = View::new();
        let workdir = tempfile::tempdir().unwrap();
        let dir_setting = format!("{}/", workdir.path().display());
        let config = [
            ("uri", "ldap://localhost"),
            ("base", BASE),
            ("connections", "2"),
            ("timeout", "1"),
            ("directory", dir_setting.as_str()),
        ];
        let instance = Instance::new(
            name,
            view.clone(),
            directory.clone(),
            Arc::new(NoKrb),
            &config,
        )
        .unwrap();
        instance.start().unwrap();

        let harness = Harness {
            directory,
            view,
            instance,
            _workdir: workdir,
        };
        assert!(
            harness.wait_until(|| harness.instance.barrier().state() == SyncState::Finished),
            "initial refresh did not complete"
        );
        // Zone activation runs on the instance task right after the
        // state flips; draining it makes the published state visible.
        harness.quiesce();
        harness
    }

    /// Polls `condition` for up to five seconds.
    fn wait_until(&self, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        condition()
    }

    /// Waits until every live change so far has been handled, by
    /// draining the instance task and every zone task.
    fn quiesce(&self) {
        // Two rounds: a job on the instance task may itself post to a
        // zone task.
        for _ in 0..2 {
            self.instance.instance_task().post_and_wait(|| ()).unwrap();
            for origin in self.instance.register().origins() {
                if let Some(info) = self.instance.register().get(&origin) {
                    info.task().post_and_wait(|| ()).unwrap();
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    fn journal_count(&self, origin: &Name) -> usize {
        let path = codec::zone_path(
            self.instance.directory_path(),
            origin,
            "journal",
        );
        journal::transaction_count(&path).unwrap()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.instance.shutdown();
    }
}

fn own_attrs(attrs: &[(&str, Vec<&str>)]) -> Vec<(String, Vec<String>)> {
    attrs
        .iter()
        .map(|(name, values)| {
            (
                name.to_string(),
                values.iter().map(|v| v.to_string()).collect(),
            )
        })
        .collect()
}

fn master_zone(serial: &str) -> Vec<(String, Vec<String>)> {
    vec![
        (
            "objectClass".to_owned(),
            vec!["top".to_owned(), "idnsZone".to_owned()],
        ),
        ("idnsZoneActive".to_owned(), vec!["TRUE".to_owned()]),
        ("idnsSOAmName".to_owned(), vec!["ns".to_owned()]),
        ("idnsSOArName".to_owned(), vec!["root".to_owned()]),
        ("idnsSOAserial".to_owned(), vec![serial.to_owned()]),
        ("idnsSOArefresh".to_owned(), vec!["3600".to_owned()]),
        ("idnsSOAretry".to_owned(), vec!["900".to_owned()]),
        ("idnsSOAexpire".to_owned(), vec!["1209600".to_owned()]),
        ("idnsSOAminimum".to_owned(), vec!["3600".to_owned()]),
    ]
}

fn with_attr(
    mut attrs: Vec<(String, Vec<String>)>,
    name: &str,
    values: &[&str],
) -> Vec<(String, Vec<String>)> {
    attrs.push((
        name.to_owned(),
        values.iter().map(|v| v.to_string()).collect(),
    ));
    attrs
}

fn a_list(rdata: Rdata) -> RdataList {
    let mut list = RdataList::new(Type::A, Class::IN, DEFAULT_TTL);
    list.push(rdata);
    list
}

fn a_rdata(text: &str) -> Rdata {
    Rdata::from_text(Type::A, Name::root(), text).unwrap()
}

////////////////////////////////////////////////////////////////////////
// SCENARIOS                                                          //
////////////////////////////////////////////////////////////////////////

#[test]
fn projection_of_a_fresh_zone() {
    let zone_dn = format!("idnsName=example.org., {}", BASE);
    let attrs = with_attr(
        with_attr(master_zone("1"), "idnsAllowQuery", &["any"]),
        "idnsAllowTransfer",
        &["not an acl"],
    );
    let harness = Harness::start("fresh-zone", &[(&zone_dn, attrs)]);

    // The instance is discoverable by name, and the zone is
    // registered and published.
    assert!(liaison::find_instance("fresh-zone").is_some());
    let origin: Name = "example.org.".parse().unwrap();
    let info = harness.instance.register().get(&origin).expect("zone registered");
    assert!(harness.view.find_zone(&origin).is_some());
    assert!(info.view_zone().is_loaded());

    // On-disk artifacts exist.
    let raw = codec::zone_path(harness.instance.directory_path(), &origin, "raw");
    let journal_path = codec::zone_path(harness.instance.directory_path(), &origin, "journal");
    assert!(raw.exists(), "raw zone file missing");
    assert!(journal_path.exists(), "journal missing");

    // The database holds only the SOA, with a unix-time serial
    // strictly greater than the entry's 1.
    let serial = info.db().serial().expect("SOA projected");
    assert!(serial_gt(serial, 1), "serial {serial} not advanced");
    assert_eq!(info.db().type_count_at(&origin), 1);

    // ACLs were installed: the valid one verbatim, the unparsable one
    // as the most restrictive policy. Updates stay refused without a
    // policy grant.
    assert_eq!(info.view_zone().query_acl(), Acl::Any);
    assert_eq!(info.view_zone().transfer_acl(), Acl::most_restrictive());
    assert!(info.view_zone().update_policy().is_empty());

    // The rewritten serial went back to the directory.
    assert!(harness.wait_until(|| {
        harness
            .directory
            .attr_values(&zone_dn, "idnsSOAserial")
            .unwrap_or_default()
            == vec![serial.to_string()]
    }));
}

#[test]
fn record_add_triggers_ptr_sync() {
    let zone_dn = format!("idnsName=example.org., {}", BASE);
    let reverse_dn = format!("idnsName=2.0.192.in-addr.arpa., {}", BASE);
    let forward_attrs = with_attr(
        with_attr(master_zone("1"), "idnsAllowSyncPTR", &["TRUE"]),
        "idnsAllowDynUpdate",
        &["TRUE"],
    );
    let reverse_attrs = with_attr(master_zone("1"), "idnsAllowDynUpdate", &["TRUE"]);
    let harness = Harness::start(
        "ptr-sync",
        &[(&zone_dn, forward_attrs), (&reverse_dn, reverse_attrs)],
    );

    let forward: Name = "example.org.".parse().unwrap();
    let reverse: Name = "2.0.192.in-addr.arpa.".parse().unwrap();
    let forward_serial = harness.instance.register().get(&forward).unwrap().db().serial().unwrap();
    let reverse_serial = harness.instance.register().get(&reverse).unwrap().db().serial().unwrap();
    let reverse_journal_before = harness.journal_count(&reverse);

    // The dynamic update.
    let owner: Name = "host.example.org.".parse().unwrap();
    harness
        .instance
        .write_to_ldap(&owner, &a_list(a_rdata("192.0.2.1")))
        .unwrap();

    // Directory state: the host entry gained the A record...
    let host_dn = format!("idnsName=host, {}", zone_dn);
    assert_eq!(
        harness.directory.attr_values(&host_dn, "ARecord"),
        Some(vec!["192.0.2.1".to_owned()])
    );
    // ...and the reverse entry gained the paired PTR.
    let ptr_dn = format!("idnsName=1, {}", reverse_dn);
    assert_eq!(
        harness.directory.attr_values(&ptr_dn, "PTRRecord"),
        Some(vec!["host.example.org.".to_owned()])
    );

    // The reverse zone applied locally: one journal transaction, one
    // serial advance.
    let reverse_info = harness.instance.register().get(&reverse).unwrap();
    let new_reverse_serial = reverse_info.db().serial().unwrap();
    assert!(serial_gt(new_reverse_serial, reverse_serial));
    assert_eq!(harness.journal_count(&reverse), reverse_journal_before + 1);
    let ptr_name: Name = "1.2.0.192.in-addr.arpa.".parse().unwrap();
    let ptr_list = reverse_info.db().find_rdatalist(&ptr_name, Type::PTR).unwrap();
    assert_eq!(ptr_list.len(), 1);

    // The forward zone catches up through the echo of our own write.
    assert!(harness.wait_until(|| {
        harness
            .instance
            .register()
            .get(&forward)
            .and_then(|info| info.db().find_rdatalist(&owner, Type::A))
            .is_some()
    }));
    harness.quiesce();
    let forward_info = harness.instance.register().get(&forward).unwrap();
    let new_forward_serial = forward_info.db().serial().unwrap();
    assert!(serial_gt(new_forward_serial, forward_serial));
    assert_eq!(harness.journal_count(&forward), 1);

    // Deleting the address unwinds both sides: the A value leaves the
    // host entry, and the PTR (the reverse node's only record) takes
    // its whole entry with it.
    harness
        .instance
        .remove_values(&owner, &a_list(a_rdata("192.0.2.1")), false)
        .unwrap();
    assert_eq!(harness.directory.attr_values(&host_dn, "ARecord"), None);
    assert_eq!(harness.directory.get(&ptr_dn), None);
    assert!(reverse_info.db().find_rdatalist(&ptr_name, Type::PTR).is_none());
    assert_eq!(harness.journal_count(&reverse), reverse_journal_before + 2);
    assert!(harness.wait_until(|| {
        harness
            .instance
            .register()
            .get(&forward)
            .and_then(|info| info.db().find_rdatalist(&owner, Type::A))
            .is_none()
    }));
}

#[test]
fn ptr_conflict_refuses_update() {
    let zone_dn = format!("idnsName=example.org., {}", BASE);
    let reverse_dn = format!("idnsName=2.0.192.in-addr.arpa., {}", BASE);
    let ptr_dn = format!("idnsName=1, {}", reverse_dn);
    let forward_attrs = with_attr(master_zone("1"), "idnsAllowSyncPTR", &["TRUE"]);
    let reverse_attrs = with_attr(master_zone("1"), "idnsAllowDynUpdate", &["TRUE"]);
    let ptr_attrs = own_attrs(&[
        ("objectClass", vec!["top", "idnsRecord"]),
        ("PTRRecord", vec!["mail.example.org."]),
    ]);
    let harness = Harness::start(
        "ptr-conflict",
        &[
            (&zone_dn, forward_attrs),
            (&reverse_dn, reverse_attrs),
            (&ptr_dn, ptr_attrs),
        ],
    );

    let modifications_before = harness.directory.modify_count();
    let owner: Name = "host.example.org.".parse().unwrap();
    let result = harness
        .instance
        .write_to_ldap(&owner, &a_list(a_rdata("192.0.2.1")));
    assert_eq!(result, Err(Error::Singleton));

    // Nothing was written anywhere.
    assert_eq!(harness.directory.modify_count(), modifications_before);
    let host_dn = format!("idnsName=host, {}", zone_dn);
    assert_eq!(harness.directory.attr_values(&host_dn, "ARecord"), None);
    assert_eq!(
        harness.directory.attr_values(&ptr_dn, "PTRRecord"),
        Some(vec!["mail.example.org.".to_owned()])
    );
}

#[test]
fn master_to_forward_switch() {
    let zone_dn = format!("idnsName=sub.example.org., {}", BASE);
    let harness = Harness::start("master-to-forward", &[(&zone_dn, master_zone("1"))]);

    let origin: Name = "sub.example.org.".parse().unwrap();
    let info = harness.instance.register().get(&origin).expect("master zone");
    assert!(info.view_zone().is_loaded());
    let zone_dir = codec::zone_path(harness.instance.directory_path(), &origin, "");
    assert!(zone_dir.exists());
    let flushes_before = harness.view.cache_flush_count();

    // The operator turns the zone into a forward zone.
    let mut attrs = master_zone("1");
    attrs = with_attr(attrs, "idnsForwardPolicy", &["only"]);
    attrs = with_attr(attrs, "idnsForwarders", &["192.0.2.53"]);
    harness.directory.upsert(&zone_dn, attrs);

    assert!(harness.wait_until(|| harness.instance.register().get(&origin).is_none()));
    harness.quiesce();

    // Forwarding is installed, the master zone and its files are
    // gone, and the cache was flushed.
    let forwarding = harness.view.forwarding(&origin).expect("forwarding installed");
    assert_eq!(forwarding.forwarders.len(), 1);
    assert!(harness.instance.forward_register().contains(&origin));
    assert!(harness.view.find_zone(&origin).is_none());
    assert!(!zone_dir.exists(), "zone files not removed");
    assert!(harness.view.cache_flush_count() > flushes_before);
}

#[test]
fn multi_valued_rdn_is_skipped() {
    let zone_dn = format!("idnsName=example.org., {}", BASE);
    let harness = Harness::start("multi-rdn", &[(&zone_dn, master_zone("1"))]);

    let origin: Name = "example.org.".parse().unwrap();
    let bogus_dn = format!("idnsName=a+sn=b, {}", zone_dn);
    harness.directory.upsert(
        &bogus_dn,
        own_attrs(&[
            ("objectClass", vec!["top", "idnsRecord"]),
            ("ARecord", vec!["192.0.2.7"]),
        ]),
    );
    harness.quiesce();

    // The entry was skipped: no record appeared anywhere in the zone,
    // and the zone itself is untouched.
    let info = harness.instance.register().get(&origin).unwrap();
    assert_eq!(info.db().type_count_at(&origin), 1);
    let journal_count = harness.journal_count(&origin);
    assert_eq!(journal_count, 0);
    assert!(!harness.instance.is_tainted());
}

#[test]
fn echo_of_own_write_back_is_absorbed() {
    let zone_dn = format!("idnsName=example.org., {}", BASE);
    let harness = Harness::start("echo-absorb", &[(&zone_dn, master_zone("1"))]);

    let origin: Name = "example.org.".parse().unwrap();
    let owner: Name = "host.example.org.".parse().unwrap();
    let host_dn = format!("idnsName=host, {}", zone_dn);

    harness
        .instance
        .write_to_ldap(&owner, &a_list(a_rdata("192.0.2.1")))
        .unwrap();

    // The echo projects the record into the zone.
    assert!(harness.wait_until(|| {
        harness
            .instance
            .register()
            .get(&origin)
            .and_then(|info| info.db().find_rdatalist(&owner, Type::A))
            .is_some()
    }));
    harness.quiesce();

    let info = harness.instance.register().get(&origin).unwrap();
    let serial = info.db().serial().unwrap();
    let journal_count = harness.journal_count(&origin);
    let modifications = harness.directory.modify_count();

    // Replay the same entry through the stream.
    let attrs = harness.directory.get(&host_dn).unwrap();
    harness.directory.upsert(&host_dn, attrs);
    harness.quiesce();

    // Empty effective diff: no journal growth, no serial bump, no
    // directory write.
    assert_eq!(info.db().serial().unwrap(), serial);
    assert_eq!(harness.journal_count(&origin), journal_count);
    assert_eq!(harness.directory.modify_count(), modifications);
}
