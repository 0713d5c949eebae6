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

//! The entry-event dispatcher.
//!
//! Every event from the change stream is classified (configuration,
//! master zone, forward zone, or record) and posted to the right
//! task: zone and record work goes to the owning zone's serial task,
//! configuration and forward-zone work to the instance task. Handler
//! failures never terminate the consumer; they are logged with the
//! offending DN, and failures that suggest database divergence taint
//! the instance.

use std::sync::Arc;

use log::{debug, error};

use crate::codec;
use crate::dir::{ClassSet, Entry};
use crate::errors::{Error, Result};
use crate::handler;
use crate::instance::Instance;
use crate::name::Name;
use crate::sync::SyncState;
use crate::task::Task;

/// The classification of one entry event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryClass {
    Config,
    Master,
    Forward,
    Record,
}

/// Classifies and dispatches one entry event. The dispatch semaphore
/// permit held by the consumer is handed over to the posted job,
/// which releases it on completion; on a classification or posting
/// failure this function releases it itself (by returning the error
/// to the consumer, which releases).
pub fn dispatch(instance: &Arc<Instance>, entry: Entry) -> Result<()> {
    // Classification. The configured base is the configuration entry;
    // everything else must carry idnsName components.
    if codec::dn_matches_base(entry.dn(), instance.base()) {
        return post(instance, EntryClass::Config, entry, None, None);
    }

    let (owner, origin) = codec::name_from_dn(entry.dn())?;
    let class = if !entry.change().is_delete() {
        let classes = entry.classes();
        if classes.contains(ClassSet::MASTER_ZONE) {
            EntryClass::Master
        } else if classes.contains(ClassSet::FORWARD_ZONE) {
            EntryClass::Forward
        } else if classes.contains(ClassSet::RECORD) {
            EntryClass::Record
        } else {
            debug!("entry '{}' carries no relevant object class", entry.dn());
            return Err(Error::NotImplemented);
        }
    } else {
        // Delete events carry no object classes; infer from what we
        // are serving.
        if instance.forward_register().contains(&owner) {
            EntryClass::Forward
        } else if instance.register().get(&owner).is_some() {
            EntryClass::Master
        } else {
            EntryClass::Record
        }
    };
    post(instance, class, entry, Some(owner), Some(origin))
}

/// Picks the task for the event and posts the handler job.
fn post(
    instance: &Arc<Instance>,
    class: EntryClass,
    entry: Entry,
    owner: Option<Name>,
    origin: Option<Name>,
) -> Result<()> {
    let task: Arc<Task> = match class {
        EntryClass::Config | EntryClass::Forward => instance.instance_task().clone(),
        EntryClass::Master => {
            // The entry's own name is the zone origin. A zone not yet
            // registered falls back to the instance task; the handler
            // will create it (and its task) there.
            match owner.as_ref().and_then(|o| instance.register().get(o)) {
                Some(info) => info.task().clone(),
                None => instance.instance_task().clone(),
            }
        }
        EntryClass::Record => match origin.as_ref().and_then(|o| instance.register().get(o)) {
            Some(info) => info.task().clone(),
            None => instance.instance_task().clone(),
        },
    };

    // During the initial refresh, the barrier must be able to wait
    // for this work before declaring the instance synchronized.
    let registered = instance.barrier().state() == SyncState::Init;
    if registered {
        instance.barrier().register_task();
    }

    let job_instance = instance.clone();
    let result = task.post(move || {
        let dn = entry.dn().to_owned();
        let result = match class {
            EntryClass::Config => handler::config::configure_instance(&job_instance, &entry),
            EntryClass::Master => match owner.as_ref() {
                Some(owner) => handler::zone::zone_handler(&job_instance, &entry, owner),
                None => Err(Error::NotFound),
            },
            EntryClass::Forward => match owner.as_ref() {
                Some(owner) => handler::zone::forward_handler(&job_instance, &entry, owner),
                None => Err(Error::NotFound),
            },
            EntryClass::Record => match (owner.as_ref(), origin.as_ref()) {
                (Some(owner), Some(origin)) => {
                    handler::record::record_handler(&job_instance, &entry, owner, origin)
                }
                _ => Err(Error::NotFound),
            },
        };
        if let Err(err) = result {
            error!("failed to handle entry '{}': {}", dn, err);
            if err.suggests_divergence() {
                job_instance.taint("change-stream handling");
            }
        }
        if registered {
            job_instance.barrier().task_done();
        }
        job_instance.dispatch_semaphore().signal();
    });

    if result.is_err() && registered {
        instance.barrier().task_done();
    }
    result
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
