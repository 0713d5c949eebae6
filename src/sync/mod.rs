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

//! Change-stream consumption: the synchronization barrier, the
//! dispatcher, and the long-running consumer.

pub mod consumer;
pub mod dispatcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::errors::{Error, Result};

////////////////////////////////////////////////////////////////////////
// THE SYNC BARRIER                                                   //
////////////////////////////////////////////////////////////////////////

/// The synchronization state of an instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncState {
    /// The initial refresh pass is in progress: zones are created but
    /// not yet published, journals are not written, and serials are
    /// always rewritten.
    Init,
    /// The initial refresh has completed; changes are live.
    Finished,
}

/// Tracks the initial-refresh state and the tasks dispatched during
/// it.
///
/// While the state is [`SyncState::Init`], the dispatcher registers
/// every posted config/zone task here. The "refresh done" stream
/// event waits for all of them to drain before flipping to
/// [`SyncState::Finished`] and letting the consumer publish the
/// pending zones, so the view never serves a half-populated zone set.
pub struct SyncBarrier {
    inner: Mutex<BarrierState>,
    wakeup: Condvar,
}

struct BarrierState {
    state: SyncState,
    pending: usize,
}

impl SyncBarrier {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BarrierState {
                state: SyncState::Init,
                pending: 0,
            }),
            wakeup: Condvar::new(),
        }
    }

    /// Returns the current synchronization state.
    pub fn state(&self) -> SyncState {
        self.inner.lock().unwrap().state
    }

    /// Resets to [`SyncState::Init`]. Called when the consumer
    /// (re)starts its persistent-refresh search.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = SyncState::Init;
        inner.pending = 0;
    }

    /// Registers one dispatched Init-phase task.
    pub fn register_task(&self) {
        self.inner.lock().unwrap().pending += 1;
    }

    /// Marks one registered task complete.
    pub fn task_done(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.pending = inner.pending.saturating_sub(1);
        if inner.pending == 0 {
            self.wakeup.notify_all();
        }
    }

    /// Waits until every registered task has completed, observing the
    /// shutdown flag.
    pub fn wait_drain(&self, exiting: &AtomicBool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if exiting.load(Ordering::SeqCst) {
                return Err(Error::Shutdown);
            }
            if inner.pending == 0 {
                return Ok(());
            }
            let (guard, _) = self
                .wakeup
                .wait_timeout(inner, Duration::from_millis(200))
                .unwrap();
            inner = guard;
        }
    }

    /// Flips to [`SyncState::Finished`].
    pub fn finish(&self) {
        self.inner.lock().unwrap().state = SyncState::Finished;
    }
}

impl Default for SyncBarrier {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn barrier_waits_for_registered_tasks() {
        let barrier = Arc::new(SyncBarrier::new());
        let exiting = Arc::new(AtomicBool::new(false));
        barrier.register_task();
        barrier.register_task();

        let barrier_cloned = barrier.clone();
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            barrier_cloned.task_done();
            thread::sleep(Duration::from_millis(30));
            barrier_cloned.task_done();
        });

        barrier.wait_drain(&exiting).unwrap();
        barrier.finish();
        assert_eq!(barrier.state(), SyncState::Finished);
        worker.join().unwrap();
    }

    #[test]
    fn wait_drain_observes_shutdown() {
        let barrier = SyncBarrier::new();
        let exiting = AtomicBool::new(false);
        barrier.register_task();
        exiting.store(true, Ordering::SeqCst);
        assert_eq!(barrier.wait_drain(&exiting), Err(Error::Shutdown));
    }

    #[test]
    fn reset_returns_to_init() {
        let barrier = SyncBarrier::new();
        barrier.finish();
        assert_eq!(barrier.state(), SyncState::Finished);
        barrier.reset();
        assert_eq!(barrier.state(), SyncState::Init);
    }
}
