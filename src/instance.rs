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

//! The synchronization-engine instance.
//!
//! One [`Instance`] corresponds to one backend declaration in the
//! host server's configuration: one directory, one base, one view.
//! It owns the connection pool, the reserved streaming connection,
//! the zone and forward registers, the settings stack, and the task
//! set, and it is the entry point for dynamic-update write-back.
//!
//! Instances live in a process-wide registry so that tasks dispatched
//! by the host server can find their instance by name; the registry
//! has explicit init (construction) and teardown ([`Instance::
//! shutdown`]) under a dedicated mutex.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lazy_static::lazy_static;
use log::{error, info, warn};

use crate::dir::{
    AuthMethod, BindConfig, ConnPool, ConnSlot, Connector, Directory, KrbClient, Semaphore,
};
use crate::errors::{Error, Result};
use crate::name::Name;
use crate::register::{ForwardRegister, ZoneRegister};
use crate::rr::{RdataList, Type};
use crate::settings::{Def, Kind, SettingsSet};
use crate::sync::SyncBarrier;
use crate::task::{Task, TaskSet};
use crate::view::View;
use crate::{syncptr, writeback};

lazy_static! {
    /// The process-wide instance registry.
    static ref INSTANCES: Mutex<HashMap<String, Arc<Instance>>> = Mutex::new(HashMap::new());
}

/// Returns the instance registered under `name`, if any.
pub fn find_instance(name: &str) -> Option<Arc<Instance>> {
    INSTANCES.lock().unwrap().get(name).cloned()
}

////////////////////////////////////////////////////////////////////////
// SETTINGS TABLES                                                    //
////////////////////////////////////////////////////////////////////////

/// The instance-local settings, filled from the host server's
/// configuration arguments.
fn local_settings_defs() -> Vec<Def> {
    vec![
        Def::required("uri", Kind::Str),
        Def::required("base", Kind::Str),
        Def::with_uint("connections", 2),
        Def::with_uint("reconnect_interval", 60),
        Def::with_uint("timeout", 10),
        Def::with_str("auth_method", "none"),
        Def::with_str("bind_dn", ""),
        Def::with_str("password", ""),
        Def::with_str("krb5_principal", ""),
        Def::with_str("sasl_mech", "GSSAPI"),
        Def::with_str("sasl_user", ""),
        Def::with_str("sasl_auth_name", ""),
        Def::with_str("sasl_realm", ""),
        Def::with_str("sasl_password", ""),
        Def::with_str("krb5_keytab", ""),
        Def::with_str("fake_mname", ""),
        Def::with_str("ldap_hostname", ""),
        Def::with_bool("sync_ptr", false),
        Def::with_bool("dyn_update", false),
        Def::with_bool("verbose_checks", false),
        Def::with_str("directory", ""),
    ]
}

/// The global settings, refreshed from the directory's configuration
/// entry. Unset slots fall through to the local set.
fn global_settings_defs() -> Vec<Def> {
    vec![
        Def::required("dyn_update", Kind::Bool),
        Def::required("sync_ptr", Kind::Bool),
        Def::required("forward_policy", Kind::Str),
        Def::required("forwarders", Kind::Str),
    ]
}

/// The per-zone settings template. Everything is unset by default so
/// reads inherit from the global and local sets.
pub fn zone_settings_defs() -> Vec<Def> {
    vec![
        Def::required("dyn_update", Kind::Bool),
        Def::required("sync_ptr", Kind::Bool),
        Def::required("update_policy", Kind::Str),
        Def::required("forward_policy", Kind::Str),
        Def::required("forwarders", Kind::Str),
    ]
}

/// The attribute mapping used when refreshing the global settings
/// from the `idnsConfigObject` entry.
pub const GLOBAL_SETTINGS_MAP: [(&str, &str); 4] = [
    ("dyn_update", "idnsAllowDynUpdate"),
    ("sync_ptr", "idnsAllowSyncPTR"),
    ("forward_policy", "idnsForwardPolicy"),
    ("forwarders", "idnsForwarders"),
];

/// The attribute mapping used when refreshing a zone's settings from
/// its `idnsZone` entry.
pub const ZONE_SETTINGS_MAP: [(&str, &str); 3] = [
    ("dyn_update", "idnsAllowDynUpdate"),
    ("sync_ptr", "idnsAllowSyncPTR"),
    ("update_policy", "idnsUpdatePolicy"),
];

////////////////////////////////////////////////////////////////////////
// THE INSTANCE                                                       //
////////////////////////////////////////////////////////////////////////

/// One directory-backed name-service backend.
pub struct Instance {
    name: String,
    view: Arc<View>,
    register: Arc<ZoneRegister>,
    forward_register: ForwardRegister,
    local_settings: Arc<SettingsSet>,
    global_settings: Arc<SettingsSet>,
    pool: ConnPool,
    connector: Arc<Connector>,
    stream_slot: ConnSlot,
    task_set: Arc<TaskSet>,
    instance_task: Arc<Task>,
    barrier: SyncBarrier,
    dispatch_semaphore: Semaphore,
    exiting: AtomicBool,
    tainted: AtomicBool,
    base: String,
    directory_path: String,
    fake_mname: String,
    timeout: Duration,
}

impl Instance {
    /// Creates an instance from the host server's configuration
    /// arguments and registers it under `name`. The consumer is not
    /// started yet; see [`Instance::start`].
    pub fn new(
        name: &str,
        view: Arc<View>,
        directory: Arc<dyn Directory>,
        krb: Arc<dyn KrbClient>,
        config: &[(&str, &str)],
    ) -> Result<Arc<Self>> {
        {
            let instances = INSTANCES.lock().unwrap();
            if instances.contains_key(name) {
                error!("instance '{}' is already registered", name);
                return Err(Error::Exists);
            }
        }

        let local_settings =
            SettingsSet::new(&format!("local ({})", name), &local_settings_defs(), None);
        local_settings.fill_from_pairs(config)?;
        if !local_settings.is_filled() {
            error!("instance '{}': required settings are missing", name);
            return Err(Error::NotFound);
        }

        let connections = local_settings.get_uint("connections")?;
        if connections < 2 {
            error!("at least two connections are required");
            return Err(Error::NotImplemented);
        }
        let timeout = Duration::from_secs(local_settings.get_uint("timeout")? as u64);
        let reconnect_interval =
            Duration::from_secs(local_settings.get_uint("reconnect_interval")? as u64);
        let base = local_settings.get_str("base")?;
        let fake_mname = local_settings.get_str("fake_mname")?;

        let mut directory_path = local_settings.get_str("directory")?;
        if directory_path.is_empty() {
            directory_path = format!("dyndb-ldap/{}/", name);
        }

        let auth_method: AuthMethod = local_settings
            .get_str("auth_method")?
            .parse()
            .map_err(|message| {
                error!("unknown authentication method: {}", message);
                Error::UnexpectedToken
            })?;
        let sasl_mech = local_settings.get_str("sasl_mech")?.to_uppercase();
        let mut krb5_principal = local_settings.get_str("krb5_principal")?;
        if auth_method == AuthMethod::Sasl && sasl_mech == "GSSAPI" && krb5_principal.is_empty() {
            let sasl_user = local_settings.get_str("sasl_user")?;
            if !sasl_user.is_empty() {
                krb5_principal = sasl_user;
            } else {
                let hostname = local_settings.get_str("ldap_hostname")?;
                if hostname.is_empty() {
                    error!(
                        "SASL mech GSSAPI selected but krb5_principal, sasl_user, \
                         and ldap_hostname are all empty"
                    );
                    return Err(Error::UnexpectedToken);
                }
                krb5_principal = format!("DNS/{}", hostname);
            }
        }

        let bind = BindConfig {
            method: auth_method,
            bind_dn: local_settings.get_str("bind_dn")?,
            password: local_settings.get_str("password")?,
            sasl_mech,
            sasl_user: local_settings.get_str("sasl_user")?,
            sasl_auth_name: local_settings.get_str("sasl_auth_name")?,
            sasl_realm: local_settings.get_str("sasl_realm")?,
            sasl_password: local_settings.get_str("sasl_password")?,
            krb5_principal,
            krb5_keytab: local_settings.get_str("krb5_keytab")?,
        };

        let connector = Arc::new(Connector::new(directory, krb, bind, reconnect_interval));
        let pool = ConnPool::new(connector.clone(), connections as usize, timeout)?;

        let global_settings = SettingsSet::new(
            &format!("global ({})", name),
            &global_settings_defs(),
            Some(local_settings.clone()),
        );

        let task_set = TaskSet::new();
        let instance_task = Task::new(&task_set, &format!("{} instance", name))?;

        let instance = Arc::new(Self {
            name: name.to_owned(),
            view,
            register: ZoneRegister::new(),
            forward_register: ForwardRegister::new(),
            local_settings,
            global_settings,
            pool,
            connector,
            stream_slot: ConnSlot::new(),
            task_set,
            instance_task,
            barrier: SyncBarrier::new(),
            dispatch_semaphore: Semaphore::new(connections as usize),
            exiting: AtomicBool::new(false),
            tainted: AtomicBool::new(false),
            base,
            directory_path,
            fake_mname,
            timeout,
        });

        INSTANCES
            .lock()
            .unwrap()
            .insert(name.to_owned(), instance.clone());
        info!("instance '{}' registered", name);
        Ok(instance)
    }

    /// Starts the change-stream consumer on its own thread.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let instance = self.clone();
        self.task_set
            .spawn(&format!("{} sync", self.name), move || {
                crate::sync::consumer::run(instance);
            })
    }

    /// Shuts the instance down: signals the consumer, stops every
    /// task, waits for the threads to exit, and deregisters the
    /// instance.
    pub fn shutdown(&self) {
        self.exiting.store(true, Ordering::SeqCst);
        self.connector.directory().wake();
        self.task_set.shut_down();
        self.task_set.await_shutdown();
        INSTANCES.lock().unwrap().remove(&self.name);
        info!("instance '{}' shut down", self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view(&self) -> &Arc<View> {
        &self.view
    }

    pub fn register(&self) -> &Arc<ZoneRegister> {
        &self.register
    }

    pub fn forward_register(&self) -> &ForwardRegister {
        &self.forward_register
    }

    pub fn local_settings(&self) -> &Arc<SettingsSet> {
        &self.local_settings
    }

    pub fn global_settings(&self) -> &Arc<SettingsSet> {
        &self.global_settings
    }

    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Returns the connection reserved for the change stream. It is
    /// not part of the pool: pool exhaustion must never stall the
    /// stream.
    pub fn stream_slot(&self) -> &ConnSlot {
        &self.stream_slot
    }

    pub fn task_set(&self) -> &Arc<TaskSet> {
        &self.task_set
    }

    pub fn instance_task(&self) -> &Arc<Task> {
        &self.instance_task
    }

    pub fn barrier(&self) -> &SyncBarrier {
        &self.barrier
    }

    /// The semaphore capping the number of in-flight entry events.
    pub fn dispatch_semaphore(&self) -> &Semaphore {
        &self.dispatch_semaphore
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn directory_path(&self) -> &str {
        &self.directory_path
    }

    pub fn fake_mname(&self) -> &str {
        &self.fake_mname
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn verbose_checks(&self) -> bool {
        self.local_settings.get_bool("verbose_checks").unwrap_or(false)
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    /// Returns the shutdown flag for blocking waits to observe.
    pub fn exiting_flag(&self) -> &AtomicBool {
        &self.exiting
    }

    /// Fails with [`Error::Shutdown`] once shutdown has begun. Every
    /// blocking loop in the engine calls this.
    pub fn check_exiting(&self) -> Result<()> {
        if self.is_exiting() {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Marks the instance tainted: the in-memory zone data may have
    /// diverged from the directory. The only recovery is an operator
    /// reload.
    pub fn taint(&self, context: &str) {
        if !self.tainted.swap(true, Ordering::SeqCst) {
            error!(
                "instance '{}' may be out of sync after error in {}; \
                 run `rndc reload` to re-synchronize",
                self.name, context
            );
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted.load(Ordering::SeqCst)
    }
}

////////////////////////////////////////////////////////////////////////
// DYNAMIC UPDATE WRITE-BACK                                          //
////////////////////////////////////////////////////////////////////////

impl Instance {
    /// Writes a dynamic-update addition back to the directory: the
    /// rdata list is added to the owner's entry (creating it if
    /// necessary), and for A/AAAA records with PTR synchronization
    /// enabled the paired reverse entry is updated as well.
    ///
    /// PTR pre-validation is the strict gate: if it refuses, nothing
    /// is written. After validation succeeds, a PTR-side failure is
    /// logged but does not fail the primary update.
    pub fn write_to_ldap(self: &Arc<Self>, owner: &Name, rdlist: &RdataList) -> Result<()> {
        let plans = self.plan_ptr_sync(owner, rdlist, syncptr::SyncOp::Add)?;
        writeback::write_to_ldap(self, owner, rdlist)?;
        for plan in plans {
            if let Err(err) = syncptr::apply(self, &plan) {
                warn!(
                    "PTR record synchronization for '{}' failed after \
                     validation: {}",
                    owner, err
                );
            }
        }
        Ok(())
    }

    /// Writes a dynamic-update deletion back to the directory. With
    /// `delete_node`, the whole entry is removed instead of single
    /// attribute values. PTR synchronization follows the same rules
    /// as [`Instance::write_to_ldap`].
    pub fn remove_values(
        self: &Arc<Self>,
        owner: &Name,
        rdlist: &RdataList,
        delete_node: bool,
    ) -> Result<()> {
        let plans = self.plan_ptr_sync(owner, rdlist, syncptr::SyncOp::Delete)?;
        writeback::remove_values(self, owner, rdlist, delete_node)?;
        for plan in plans {
            if let Err(err) = syncptr::apply(self, &plan) {
                warn!(
                    "PTR record synchronization for '{}' failed after \
                     validation: {}",
                    owner, err
                );
            }
        }
        Ok(())
    }

    /// Pre-validates PTR synchronization for every address in an
    /// A/AAAA rdata list, if the owner's zone enables it.
    fn plan_ptr_sync(
        self: &Arc<Self>,
        owner: &Name,
        rdlist: &RdataList,
        op: syncptr::SyncOp,
    ) -> Result<Vec<syncptr::SyncPlan>> {
        if rdlist.rr_type != Type::A && rdlist.rr_type != Type::AAAA {
            return Ok(Vec::new());
        }
        let Some(info) = self.register.find(owner) else {
            return Ok(Vec::new());
        };
        if !info.settings().get_bool("sync_ptr").unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut plans = Vec::new();
        for rdata in rdlist.rdatas() {
            if let Some(plan) = syncptr::plan(self, owner, rdlist.rr_type, rdata, op)? {
                plans.push(plan);
            }
        }
        Ok(plans)
    }
}
