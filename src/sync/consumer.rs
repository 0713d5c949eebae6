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

//! The persistent change-stream consumer.
//!
//! A dedicated thread owns the reserved streaming connection and
//! lives in a reconnect loop: bind, open the persistent-refresh
//! search, deliver events to the dispatcher, and start over when the
//! connection fails. Every blocking wait observes the instance's
//! shutdown flag.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::codec;
use crate::dir::{Entry, StreamEvent};
use crate::errors::Error;
use crate::handler;
use crate::instance::Instance;

use super::dispatcher;

/// The filter selecting every entry the engine consumes.
const STREAM_FILTER: &str = "(|(objectClass=idnsConfigObject)(objectClass=idnsZone)\
                             (objectClass=idnsForwardZone)(objectClass=idnsRecord))";

/// How long one poll may block before the consumer rechecks the
/// shutdown flag.
const POLL_SLICE: Duration = Duration::from_secs(1);

/// The slice used for interruptible sleeps in the reconnect loop.
const SLEEP_SLICE: Duration = Duration::from_millis(200);

/// The consumer entry point; runs until shutdown.
pub fn run(instance: Arc<Instance>) {
    while !instance.is_exiting() {
        instance.barrier().reset();
        remove_stale_zone_files(&instance);

        if wait_until_bound(&instance).is_err() {
            return;
        }

        let opened = instance
            .stream_slot()
            .with_conn(|conn| Ok(conn.open_stream(instance.base(), STREAM_FILTER)?));
        if let Err(err) = opened {
            error!("failed to open the persistent search: {}", err);
            instance
                .stream_slot()
                .mark_disconnected(instance.connector());
            continue;
        }
        info!("watching directory subtree '{}'", instance.base());

        if let Err(err) = poll_loop(&instance) {
            if err == Error::Shutdown {
                return;
            }
            error!("change stream interrupted: {}", err);
            instance
                .stream_slot()
                .mark_disconnected(instance.connector());
        }
    }
}

/// Removes the on-disk zone files of previously registered zones;
/// projection will re-materialize them from directory data.
fn remove_stale_zone_files(instance: &Arc<Instance>) {
    for origin in instance.register().origins() {
        let raw = codec::zone_path(instance.directory_path(), &origin, "raw");
        match fs::remove_file(&raw) {
            Ok(()) => debug!("removed stale zone file {}", raw.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("failed to remove {}: {}", raw.display(), err),
        }
    }
}

/// Blocks until the reserved connection is bound, reconnecting in a
/// loop and honoring shutdown at every wait.
fn wait_until_bound(instance: &Arc<Instance>) -> Result<(), Error> {
    loop {
        instance.check_exiting()?;
        match instance
            .stream_slot()
            .ensure_bound(instance.connector(), false)
        {
            Ok(()) => return Ok(()),
            Err(Error::SoftQuota) => {
                let remaining = instance.stream_slot().backoff_remaining();
                interruptible_sleep(instance, remaining)?;
            }
            Err(err) => {
                debug!("stream connection not yet usable: {}", err);
                interruptible_sleep(instance, SLEEP_SLICE)?;
            }
        }
    }
}

/// Sleeps for `duration` in small slices, unwinding on shutdown.
fn interruptible_sleep(instance: &Arc<Instance>, duration: Duration) -> Result<(), Error> {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        instance.check_exiting()?;
        let slice = remaining.min(SLEEP_SLICE);
        thread::sleep(slice);
        remaining -= slice;
    }
    instance.check_exiting()
}

/// Delivers stream events until the connection fails or shutdown is
/// requested.
fn poll_loop(instance: &Arc<Instance>) -> Result<(), Error> {
    loop {
        instance.check_exiting()?;
        let event = instance
            .stream_slot()
            .with_conn(|conn| Ok(conn.poll(POLL_SLICE)?))?;
        let Some(event) = event else {
            continue; // idle tick
        };
        match event {
            StreamEvent::Entry {
                dn,
                change,
                attributes,
            } => {
                wait_for_dispatch_permit(instance)?;
                let entry = Entry::new(dn, change, attributes);
                if let Err(err) = dispatcher::dispatch(instance, entry) {
                    // The permit travels with a successfully posted
                    // job; on failure it is released here and the
                    // entry is skipped.
                    instance.dispatch_semaphore().signal();
                    debug!("entry skipped: {}", err);
                }
            }
            StreamEvent::RefreshDone => {
                instance.barrier().wait_drain(instance.exiting_flag())?;
                instance.barrier().finish();
                let activation = instance.clone();
                instance
                    .instance_task()
                    .post_and_wait(move || handler::zone::activate_zones(&activation))?;
                info!(
                    "instance '{}': directory data are now synchronized",
                    instance.name()
                );
            }
            StreamEvent::Reference => {
                warn!("search references are not supported; continuing");
            }
        }
    }
}

/// Takes a dispatch-semaphore permit, retrying in slices so shutdown
/// is never missed.
fn wait_for_dispatch_permit(instance: &Arc<Instance>) -> Result<(), Error> {
    loop {
        instance.check_exiting()?;
        match instance.dispatch_semaphore().wait(POLL_SLICE) {
            Ok(()) => return Ok(()),
            Err(Error::Timeout) => continue,
            Err(err) => return Err(err),
        }
    }
}
