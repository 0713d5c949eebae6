// Copyright 2022 Matthew Ingwersen.
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

//! Serial task queues and the cooperative exclusive-mode barrier.
//!
//! The host name server hands the engine single-threaded FIFO tasks:
//! one per zone plus one per instance. All mutations of a given zone
//! are posted to that zone's task, which is what makes them totally
//! ordered without a per-zone lock. A [`TaskSet`] owns the worker
//! threads behind these tasks and supports an *exclusive mode*: a job
//! may ask to become the only job running in the whole set, which the
//! engine uses as a write barrier around shared zone-manager state.
//! Exclusive mode is cooperative rather than a kernel mutex: it
//! waits for running jobs to finish and parks new ones.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};

use log::error;
use slab::Slab;

use crate::errors::{Error, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

////////////////////////////////////////////////////////////////////////
// TASK SETS                                                          //
////////////////////////////////////////////////////////////////////////

/// A group of serial tasks managed together.
///
/// Tasks are created with [`Task::new`] and one-shot threads (the
/// stream consumer) with [`TaskSet::spawn`]. Shutting the set down
/// stops every task after its queued jobs drain;
/// [`TaskSet::await_shutdown`] blocks until all worker threads have
/// exited.
pub struct TaskSet {
    records: Mutex<SetRecords>,

    /// Notified when shutdown is initiated and when the last thread
    /// exits. Used with the `records` mutex.
    shutdown_wakeup: Condvar,

    excl: ExclBarrier,
}

#[derive(Default)]
struct SetRecords {
    thread_count: usize,
    tasks: Slab<Arc<TaskShared>>,
    shutting_down: bool,
}

impl TaskSet {
    /// Creates a new task set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(SetRecords::default()),
            shutdown_wakeup: Condvar::new(),
            excl: ExclBarrier::new(),
        })
    }

    /// Starts a one-shot thread in the set. The thread does not
    /// participate in exclusive mode; it is counted only for
    /// shutdown.
    pub fn spawn<F>(self: &Arc<Self>, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut records = self.records.lock().unwrap();
        if records.shutting_down {
            return Err(Error::Shutdown);
        }
        records.thread_count += 1;
        drop(records);

        let set = self.clone();
        let result = thread::Builder::new().name(name.to_owned()).spawn(move || {
            let _guard = ThreadGuard { set: &set };
            f();
        });
        if result.is_err() {
            self.end_thread();
            return Err(Error::Io(std::io::ErrorKind::Other));
        }
        Ok(())
    }

    /// Initiates shutdown: every task stops accepting jobs, drains
    /// its queue, and exits.
    pub fn shut_down(&self) {
        let mut records = self.records.lock().unwrap();
        records.shutting_down = true;
        for (_, task) in records.tasks.iter() {
            task.stop();
        }
        records.tasks.clear();
        self.shutdown_wakeup.notify_all();
    }

    /// Waits until shutdown has been initiated and every worker
    /// thread has exited. Calling this from a worker thread would
    /// deadlock.
    pub fn await_shutdown(&self) {
        let records = self.records.lock().unwrap();
        let _guard = self
            .shutdown_wakeup
            .wait_while(records, |r| !r.shutting_down || r.thread_count > 0)
            .unwrap();
    }

    /// Returns whether the set is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.records.lock().unwrap().shutting_down
    }

    /// Enters exclusive mode: parks new jobs and waits until the
    /// calling job is the only one running in the set. Re-entry from
    /// the thread already holding exclusive mode returns a guard that
    /// releases nothing, mirroring the host scheduler's
    /// "already exclusive" answer.
    pub fn begin_exclusive(&self) -> ExclusiveGuard {
        self.excl.begin()
    }

    fn end_thread(&self) {
        let mut records = self.records.lock().unwrap();
        records.thread_count -= 1;
        if records.shutting_down && records.thread_count == 0 {
            self.shutdown_wakeup.notify_all();
        }
    }
}

/// Decrements the thread count when a worker exits, however it exits.
struct ThreadGuard<'a> {
    set: &'a Arc<TaskSet>,
}

impl Drop for ThreadGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            let thread = thread::current();
            error!(
                "task thread {} panicked",
                thread.name().unwrap_or("anonymous")
            );
        }
        self.set.end_thread();
    }
}

////////////////////////////////////////////////////////////////////////
// SERIAL TASKS                                                       //
////////////////////////////////////////////////////////////////////////

struct TaskShared {
    name: String,
    queue: Mutex<TaskQueue>,

    /// Wakes the worker when a job is posted or the task stops. Used
    /// with the `queue` mutex.
    wakeup: Condvar,
}

struct TaskQueue {
    jobs: VecDeque<Job>,
    stopping: bool,
}

impl TaskShared {
    fn stop(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.stopping = true;
        self.wakeup.notify_all();
    }
}

/// A single-threaded FIFO task: jobs posted to it run one at a time,
/// in order, on a dedicated worker thread. Dropping the last handle
/// to a `Task` stops its worker once the queue drains.
pub struct Task {
    set: Arc<TaskSet>,
    shared: Arc<TaskShared>,
    key: usize,
}

impl Task {
    /// Creates a task (and its worker thread) in `set`.
    pub fn new(set: &Arc<TaskSet>, name: &str) -> Result<Arc<Self>> {
        let shared = Arc::new(TaskShared {
            name: name.to_owned(),
            queue: Mutex::new(TaskQueue {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            wakeup: Condvar::new(),
        });

        let key;
        {
            let mut records = set.records.lock().unwrap();
            if records.shutting_down {
                return Err(Error::Shutdown);
            }
            key = records.tasks.insert(shared.clone());
            records.thread_count += 1;
        }

        let worker_set = set.clone();
        let worker_shared = shared.clone();
        let result = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let _guard = ThreadGuard { set: &worker_set };
                task_worker_loop(&worker_set, &worker_shared);
            });
        if result.is_err() {
            let mut records = set.records.lock().unwrap();
            records.tasks.try_remove(key);
            drop(records);
            set.end_thread();
            return Err(Error::Io(std::io::ErrorKind::Other));
        }

        Ok(Arc::new(Self {
            set: set.clone(),
            shared,
            key,
        }))
    }

    /// Returns the task's name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Posts a job. Jobs posted from the same thread run in posting
    /// order.
    pub fn post<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queue = self.shared.queue.lock().unwrap();
        if queue.stopping {
            return Err(Error::Shutdown);
        }
        queue.jobs.push_back(Box::new(job));
        self.shared.wakeup.notify_one();
        Ok(())
    }

    /// Posts a job and blocks until it has run. Primarily for tests
    /// and shutdown paths that need quiescence.
    pub fn post_and_wait<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        self.post(move || {
            job();
            let _ = sender.send(());
        })?;
        receiver.recv().or(Err(Error::Shutdown))
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // The last handle is gone (e.g. the zone was deleted); the
        // worker drains its queue and exits.
        let mut records = self.set.records.lock().unwrap();
        records.tasks.try_remove(self.key);
        drop(records);
        self.shared.stop();
    }
}

/// The worker loop of a serial task: take a job, run it inside the
/// exclusive-mode accounting, repeat. On stop, queued jobs drain
/// before the thread exits.
fn task_worker_loop(set: &Arc<TaskSet>, shared: &Arc<TaskShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.stopping {
                    return;
                }
                queue = shared.wakeup.wait(queue).unwrap();
            }
        };
        set.excl.enter();
        job();
        set.excl.exit();
    }
}

////////////////////////////////////////////////////////////////////////
// EXCLUSIVE MODE                                                     //
////////////////////////////////////////////////////////////////////////

struct ExclBarrier {
    state: Mutex<ExclState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct ExclState {
    running: usize,
    requested: bool,
    holder: Option<ThreadId>,
}

impl ExclBarrier {
    fn new() -> Self {
        Self {
            state: Mutex::new(ExclState::default()),
            wakeup: Condvar::new(),
        }
    }

    /// Called by a worker before running a job: park while exclusive
    /// mode is requested or held by another thread.
    fn enter(&self) {
        let state = self.state.lock().unwrap();
        let mut state = self
            .wakeup
            .wait_while(state, |s| s.requested && s.holder != Some(thread::current().id()))
            .unwrap();
        state.running += 1;
    }

    /// Called by a worker after a job completes.
    fn exit(&self) {
        let mut state = self.state.lock().unwrap();
        state.running -= 1;
        self.wakeup.notify_all();
    }

    /// Claims the exclusive token. Must be called from within a job.
    fn begin(&self) -> ExclusiveGuard {
        let current = thread::current().id();
        let mut state = self.state.lock().unwrap();
        if state.holder == Some(current) {
            // Already exclusive on this thread; hand out a guard that
            // releases nothing.
            return ExclusiveGuard {
                barrier: self,
                owned: false,
            };
        }
        // Yield our own running slot while waiting, so two jobs
        // requesting exclusive mode at once cannot deadlock on each
        // other's slot.
        let yielded = state.running > 0;
        if yielded {
            state.running -= 1;
            self.wakeup.notify_all();
        }
        // Wait for any other exclusive request to clear, claim the
        // token, then wait until no other job is running.
        let mut state = self.wakeup.wait_while(state, |s| s.requested).unwrap();
        state.requested = true;
        state.holder = Some(current);
        let mut state = self.wakeup.wait_while(state, |s| s.running > 0).unwrap();
        if yielded {
            state.running += 1;
        }
        ExclusiveGuard {
            barrier: self,
            owned: true,
        }
    }

    fn end(&self) {
        let mut state = self.state.lock().unwrap();
        state.requested = false;
        state.holder = None;
        self.wakeup.notify_all();
    }
}

/// Exclusive-mode token. Dropping it leaves exclusive mode (unless it
/// was a re-entrant grant).
pub struct ExclusiveGuard<'a> {
    barrier: &'a ExclBarrier,
    owned: bool,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.barrier.end();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn jobs_run_in_posting_order() {
        let set = TaskSet::new();
        let task = Task::new(&set, "order").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16 {
            let log = log.clone();
            task.post(move || log.lock().unwrap().push(i)).unwrap();
        }
        task.post_and_wait(|| ()).unwrap();
        assert_eq!(*log.lock().unwrap(), (0..16).collect::<Vec<_>>());
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let set = TaskSet::new();
        let task = Task::new(&set, "drain").unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            task.post(move || {
                thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        set.shut_down();
        set.await_shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert!(matches!(task.post(|| ()), Err(Error::Shutdown)));
    }

    #[test]
    fn tasks_reject_jobs_after_shutdown() {
        let set = TaskSet::new();
        let task = Task::new(&set, "rejects").unwrap();
        set.shut_down();
        assert!(matches!(task.post(|| ()), Err(Error::Shutdown)));
        assert!(Task::new(&set, "late").is_err());
        set.await_shutdown();
    }

    #[test]
    fn exclusive_mode_serializes_against_other_tasks() {
        let set = TaskSet::new();
        let a = Task::new(&set, "a").unwrap();
        let b = Task::new(&set, "b").unwrap();
        let witness = Arc::new(AtomicUsize::new(0));

        // Task A enters exclusive mode and holds it briefly; task B's
        // job must not observe a torn intermediate state.
        let witness_a = witness.clone();
        let set_a = set.clone();
        a.post(move || {
            let _excl = set_a.begin_exclusive();
            witness_a.store(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            witness_a.store(2, Ordering::SeqCst);
        })
        .unwrap();
        thread::sleep(Duration::from_millis(10));
        let witness_b = witness.clone();
        let observed = Arc::new(AtomicUsize::new(0));
        let observed_b = observed.clone();
        b.post(move || {
            observed_b.store(witness_b.load(Ordering::SeqCst), Ordering::SeqCst);
        })
        .unwrap();
        b.post_and_wait(|| ()).unwrap();
        // B's job ran either before A took the barrier or after it
        // released; never between the two stores.
        assert_ne!(observed.load(Ordering::SeqCst), 1);
        set.shut_down();
        set.await_shutdown();
    }

    #[test]
    fn exclusive_mode_is_reentrant() {
        let set = TaskSet::new();
        let task = Task::new(&set, "reentrant").unwrap();
        let set_cloned = set.clone();
        task.post_and_wait(move || {
            let _outer = set_cloned.begin_exclusive();
            let _inner = set_cloned.begin_exclusive();
        })
        .unwrap();
        set.shut_down();
        set.await_shutdown();
    }
}
