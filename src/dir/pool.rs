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

//! The directory connection pool and the per-connection reconnect
//! state machine.
//!
//! A fixed set of connections is guarded by a counting semaphore (one
//! permit per connection) plus one mutex per connection, so no
//! connection is ever used by two tasks at once. Acquiring a
//! connection also guarantees it is bound: a connection that lost its
//! handle forces a synchronous reconnect on its acquirer, with
//! failure backoff per connection.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::{debug, error, warn};

use crate::errors::{Error, Result};

use super::backend::{AuthMethod, BindConfig, DirConn, DirError, Directory, KrbClient};

lazy_static! {
    /// Process-wide exclusion around Kerberos TGT acquisition: the
    /// credential cache is shared by every instance in the process.
    static ref KINIT_LOCK: Mutex<()> = Mutex::new(());
}

/// The reconnect backoff table, in seconds, indexed by the number of
/// consecutive failures (saturating). Each value is additionally
/// capped by the configured `reconnect_interval`.
const RECONNECT_BACKOFF: [u64; 4] = [2, 5, 20, u64::MAX];

/// The semaphore wait for a pool connection is this multiple of the
/// per-query timeout. A genuine deadlock or an undersized pool thus
/// surfaces as a logged timeout instead of hanging forever.
const ACQUIRE_TIMEOUT_MULTIPLIER: u32 = 10;

////////////////////////////////////////////////////////////////////////
// SEMAPHORE                                                          //
////////////////////////////////////////////////////////////////////////

/// A counting semaphore built on a mutex and condition variable.
pub struct Semaphore {
    permits: Mutex<usize>,
    wakeup: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with `permits` initial permits.
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            wakeup: Condvar::new(),
        }
    }

    /// Takes a permit, waiting up to `timeout`.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut permits = self.permits.lock().unwrap();
        loop {
            if *permits > 0 {
                *permits -= 1;
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (guard, _) = self.wakeup.wait_timeout(permits, deadline - now).unwrap();
            permits = guard;
        }
    }

    /// Returns a permit.
    pub fn signal(&self) {
        let mut permits = self.permits.lock().unwrap();
        *permits += 1;
        self.wakeup.notify_one();
    }
}

////////////////////////////////////////////////////////////////////////
// CONNECTION SLOTS                                                   //
////////////////////////////////////////////////////////////////////////

/// The reconnect state of one connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BindState {
    /// Never connected; first use triggers a bind.
    Never,
    /// A bind attempt is in progress on the owning thread.
    Binding,
    /// The connection is bound and usable.
    Bound,
    /// The last bind failed; retry after the backoff window.
    Failed,
}

struct SlotInner {
    handle: Option<Box<dyn DirConn>>,
    state: BindState,
    tries: u32,
    next_reconnect: Instant,
}

/// One lockable connection slot. Pool connections and the consumer's
/// reserved streaming connection are both slots; the reserved slot
/// simply never participates in the semaphore.
pub struct ConnSlot {
    inner: Mutex<SlotInner>,
}

impl ConnSlot {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                handle: None,
                state: BindState::Never,
                tries: 0,
                next_reconnect: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<SlotInner> {
        self.inner.lock().unwrap()
    }

    fn try_lock(&self) -> Option<MutexGuard<SlotInner>> {
        self.inner.try_lock().ok()
    }
}

impl Default for ConnSlot {
    fn default() -> Self {
        Self::new()
    }
}

////////////////////////////////////////////////////////////////////////
// THE CONNECTOR                                                      //
////////////////////////////////////////////////////////////////////////

/// Shared bind/reconnect machinery for connection slots.
pub struct Connector {
    directory: Arc<dyn Directory>,
    krb: Arc<dyn KrbClient>,
    bind: Mutex<BindConfig>,
    reconnect_interval: Duration,
}

impl Connector {
    pub fn new(
        directory: Arc<dyn Directory>,
        krb: Arc<dyn KrbClient>,
        bind: BindConfig,
        reconnect_interval: Duration,
    ) -> Self {
        Self {
            directory,
            krb,
            bind: Mutex::new(bind),
            reconnect_interval,
        }
    }

    /// Returns the directory this connector binds against.
    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Downgrades the bind configuration to an anonymous bind. Used
    /// when the directory rejects our credentials, so the engine can
    /// still serve (possibly restricted) data.
    fn fall_back_to_anonymous(&self) {
        warn!("invalid credentials; falling back to password-less login");
        self.bind.lock().unwrap().method = AuthMethod::None;
    }

    /// Ensures the slot behind `inner` is bound, reconnecting if
    /// necessary. With `force`, the backoff window is ignored (used
    /// when an operation just failed on a previously healthy
    /// connection). Without it, a slot inside its backoff window
    /// returns [`Error::SoftQuota`] so the caller can retry later.
    fn ensure_bound(&self, inner: &mut SlotInner, force: bool) -> Result<()> {
        if inner.state == BindState::Bound && inner.handle.is_some() {
            return Ok(());
        }
        if inner.state == BindState::Failed && !force && Instant::now() < inner.next_reconnect {
            return Err(Error::SoftQuota);
        }
        inner.state = BindState::Binding;

        // Compute the next allowed reconnect time up front, so a
        // failure anywhere below leaves the backoff armed.
        let backoff = RECONNECT_BACKOFF[inner.tries.min(3) as usize];
        let delay = Duration::from_secs(backoff).min(self.reconnect_interval);
        inner.next_reconnect = Instant::now() + delay;
        inner.tries += 1;

        if inner.handle.is_none() {
            match self.directory.open() {
                Ok(handle) => inner.handle = Some(handle),
                Err(err) => {
                    inner.state = BindState::Failed;
                    error!("directory connection failed: {}", err);
                    return Err(err.into());
                }
            }
        }

        let bind = self.bind.lock().unwrap().clone();
        if bind.method == AuthMethod::Sasl && bind.sasl_mech.eq_ignore_ascii_case("GSSAPI") {
            let _kinit = KINIT_LOCK.lock().unwrap();
            if let Err(err) = self.krb.obtain_tgt(&bind.krb5_principal, &bind.krb5_keytab) {
                inner.state = BindState::Failed;
                error!("failed to obtain Kerberos TGT: {}", err);
                return Err(Error::NotConnected);
            }
        }

        debug!("trying to establish directory connection");
        let handle = match inner.handle.as_mut() {
            Some(handle) => handle,
            None => return Err(Error::NotConnected),
        };
        match handle.bind(&bind) {
            Ok(()) => {
                inner.state = BindState::Bound;
                inner.tries = 0;
                debug!("bind to directory server successful");
                Ok(())
            }
            Err(err) => {
                inner.state = BindState::Failed;
                error!("bind to directory server failed: {}", err);
                match err {
                    DirError::InvalidCredentials => Err(Error::NoPerm),
                    DirError::ServerDown | DirError::ConnectError => Err(Error::NotConnected),
                    _ => Err(Error::NotConnected),
                }
            }
        }
    }

    /// Marks the slot disconnected after an operation-level connection
    /// error; the next acquisition will rebind.
    fn mark_disconnected(&self, inner: &mut SlotInner) {
        if inner.state == BindState::Bound {
            error!("connection to the directory server was lost");
        }
        inner.handle = None;
        inner.state = BindState::Never;
    }
}

////////////////////////////////////////////////////////////////////////
// THE POOL                                                           //
////////////////////////////////////////////////////////////////////////

/// A fixed-size pool of directory connections.
pub struct ConnPool {
    connector: Arc<Connector>,
    semaphore: Semaphore,
    slots: Vec<ConnSlot>,
    query_timeout: Duration,
}

impl ConnPool {
    /// Creates a pool of `connections` slots (at least two: one
    /// long-running zone transfer or update must never starve the
    /// change stream's helpers). Performs an initial connect pass; a
    /// directory that is down is tolerated, but invalid credentials
    /// downgrade the bind configuration to anonymous and the pass is
    /// retried once.
    pub fn new(
        connector: Arc<Connector>,
        connections: usize,
        query_timeout: Duration,
    ) -> Result<Self> {
        if connections < 2 {
            error!("at least two directory connections are required");
            return Err(Error::NotImplemented);
        }
        let pool = Self {
            connector,
            semaphore: Semaphore::new(connections),
            slots: (0..connections).map(|_| ConnSlot::new()).collect(),
            query_timeout,
        };

        let mut retried = false;
        loop {
            let mut noperm = false;
            for slot in &pool.slots {
                let mut inner = slot.lock();
                match pool.connector.ensure_bound(&mut inner, true) {
                    Ok(()) => {}
                    Err(Error::NoPerm) => {
                        noperm = true;
                        break;
                    }
                    // A directory that is down at startup is fine; the
                    // reconnect machinery will catch up.
                    Err(Error::NotConnected) | Err(Error::SoftQuota) => {}
                    Err(err) => return Err(err),
                }
            }
            if noperm && !retried {
                pool.connector.fall_back_to_anonymous();
                for slot in &pool.slots {
                    let mut inner = slot.lock();
                    inner.handle = None;
                    inner.state = BindState::Never;
                    inner.tries = 0;
                }
                retried = true;
                continue;
            }
            if noperm {
                return Err(Error::NoPerm);
            }
            break;
        }
        Ok(pool)
    }

    /// Returns the connector shared with this pool.
    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    /// Acquires a connection: waits on the semaphore (with a timeout
    /// derived from the query timeout), takes the first free slot,
    /// and ensures it is bound before returning.
    pub fn acquire(&self) -> Result<ConnGuard> {
        let timeout = self.query_timeout * ACQUIRE_TIMEOUT_MULTIPLIER;
        if let Err(err) = self.semaphore.wait(timeout) {
            error!(
                "timed out waiting for a directory connection; \
                 consider raising the 'connections' setting"
            );
            return Err(err);
        }

        // The semaphore guarantees a free slot exists; take the first
        // one whose mutex we can grab without blocking.
        for slot in &self.slots {
            if let Some(mut inner) = slot.try_lock() {
                if let Err(err) = self.connector.ensure_bound(&mut inner, false) {
                    drop(inner);
                    self.semaphore.signal();
                    return Err(err);
                }
                return Ok(ConnGuard {
                    pool: self,
                    inner: Some(inner),
                });
            }
        }

        // Unreachable while the semaphore accounting is sound.
        self.semaphore.signal();
        Err(Error::Timeout)
    }
}

/// An acquired pool connection. Releases the slot and the semaphore
/// permit on drop.
pub struct ConnGuard<'a> {
    pool: &'a ConnPool,
    inner: Option<MutexGuard<'a, SlotInner>>,
}

impl ConnGuard<'_> {
    /// Returns the bound protocol handle.
    pub fn conn(&mut self) -> Result<&mut (dyn DirConn + 'static)> {
        match self.inner.as_mut().and_then(|inner| inner.handle.as_mut()) {
            Some(handle) => Ok(handle.as_mut()),
            None => Err(Error::NotConnected),
        }
    }

    /// Reconnects this connection in place after an operation-level
    /// connection error, bypassing the backoff window.
    pub fn reconnect(&mut self) -> Result<()> {
        let inner = match self.inner.as_mut() {
            Some(inner) => inner,
            None => return Err(Error::NotConnected),
        };
        self.pool.connector.mark_disconnected(inner);
        self.pool.connector.ensure_bound(inner, true)
    }
}

impl Drop for ConnGuard<'_> {
    fn drop(&mut self) {
        drop(self.inner.take());
        self.pool.semaphore.signal();
    }
}

////////////////////////////////////////////////////////////////////////
// RESERVED (STREAM) CONNECTIONS                                      //
////////////////////////////////////////////////////////////////////////

impl ConnSlot {
    /// Ensures this slot is bound using `connector`, honoring the
    /// backoff window unless `force` is set. Reserved slots are owned
    /// by a single task, so no semaphore is involved.
    pub fn ensure_bound(&self, connector: &Connector, force: bool) -> Result<()> {
        let mut inner = self.lock();
        connector.ensure_bound(&mut inner, force)
    }

    /// Marks this slot disconnected, forcing a rebind on next use.
    pub fn mark_disconnected(&self, connector: &Connector) {
        let mut inner = self.lock();
        connector.mark_disconnected(&mut inner);
    }

    /// Runs `operation` on the bound handle.
    pub fn with_conn<T>(
        &self,
        operation: impl FnOnce(&mut dyn DirConn) -> Result<T>,
    ) -> Result<T> {
        let mut inner = self.lock();
        match inner.handle.as_mut() {
            Some(handle) => operation(handle.as_mut()),
            None => Err(Error::NotConnected),
        }
    }

    /// Returns the seconds remaining in this slot's backoff window,
    /// or zero if a reconnect may be attempted now.
    pub fn backoff_remaining(&self) -> Duration {
        let inner = self.lock();
        if inner.state == BindState::Failed {
            inner
                .next_reconnect
                .saturating_duration_since(Instant::now())
        } else {
            Duration::ZERO
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::memory::MemoryDirectory;
    use super::super::NoKrb;
    use super::*;
    use std::thread;

    fn bind_config() -> BindConfig {
        BindConfig {
            method: AuthMethod::None,
            bind_dn: String::new(),
            password: String::new(),
            sasl_mech: "GSSAPI".to_owned(),
            sasl_user: String::new(),
            sasl_auth_name: String::new(),
            sasl_realm: String::new(),
            sasl_password: String::new(),
            krb5_principal: String::new(),
            krb5_keytab: String::new(),
        }
    }

    fn connector(directory: Arc<MemoryDirectory>) -> Arc<Connector> {
        Arc::new(Connector::new(
            directory,
            Arc::new(NoKrb),
            bind_config(),
            Duration::from_secs(60),
        ))
    }

    #[test]
    fn semaphore_admits_and_blocks() {
        let semaphore = Semaphore::new(1);
        semaphore.wait(Duration::from_millis(10)).unwrap();
        assert_eq!(
            semaphore.wait(Duration::from_millis(10)),
            Err(Error::Timeout)
        );
        semaphore.signal();
        semaphore.wait(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn pool_requires_two_connections() {
        let directory = MemoryDirectory::new();
        assert!(ConnPool::new(connector(directory), 1, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn pool_enforces_connection_exclusivity() {
        let directory = MemoryDirectory::new();
        let pool = Arc::new(
            ConnPool::new(connector(directory), 2, Duration::from_secs(1)).unwrap(),
        );
        let guard_a = pool.acquire().unwrap();
        let guard_b = pool.acquire().unwrap();
        // Both slots are taken; a third acquirer must wait until one
        // is released.
        let pool_cloned = pool.clone();
        let waiter = thread::spawn(move || pool_cloned.acquire().map(drop));
        thread::sleep(Duration::from_millis(50));
        drop(guard_a);
        waiter.join().unwrap().unwrap();
        drop(guard_b);
    }

    #[test]
    fn bind_failures_back_off() {
        let directory = MemoryDirectory::new();
        directory.fail_binds(10, DirError::ServerDown);
        let connector = connector(directory);
        let slot = ConnSlot::new();
        assert_eq!(slot.ensure_bound(&connector, true), Err(Error::NotConnected));
        // Within the backoff window, a non-forced attempt is refused.
        assert_eq!(slot.ensure_bound(&connector, false), Err(Error::SoftQuota));
        assert!(slot.backoff_remaining() > Duration::ZERO);
        // A forced attempt goes through (and fails again).
        assert_eq!(slot.ensure_bound(&connector, true), Err(Error::NotConnected));
    }

    #[test]
    fn backoff_delays_follow_the_table() {
        let directory = MemoryDirectory::new();
        directory.fail_binds(10, DirError::ServerDown);
        let connector = connector(directory);
        let slot = ConnSlot::new();
        let expected = [2, 5, 20, 60, 60];
        for &secs in &expected {
            let _ = slot.ensure_bound(&connector, true);
            let remaining = slot.backoff_remaining();
            assert!(
                remaining <= Duration::from_secs(secs),
                "backoff {remaining:?} exceeds {secs}s"
            );
            assert!(
                remaining > Duration::from_secs(secs.saturating_sub(1)),
                "backoff {remaining:?} is under {secs}s"
            );
        }
    }

    #[test]
    fn invalid_credentials_fall_back_to_anonymous() {
        let directory = MemoryDirectory::new();
        directory.fail_binds(1, DirError::InvalidCredentials);
        let mut config = bind_config();
        config.method = AuthMethod::Simple;
        config.bind_dn = "cn=dns".to_owned();
        config.password = "secret".to_owned();
        let connector = Arc::new(Connector::new(
            directory.clone(),
            Arc::new(NoKrb),
            config,
            Duration::from_secs(60),
        ));
        let pool = ConnPool::new(connector.clone(), 2, Duration::from_secs(1)).unwrap();
        drop(pool);
        assert_eq!(connector.bind.lock().unwrap().method, AuthMethod::None);
    }
}
