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

//! The directory-protocol seam.
//!
//! The engine is written against the [`Directory`] and [`DirConn`]
//! traits rather than a concrete protocol library. A production build
//! binds them to an LDAP client; the in-tree [`memory`](super::memory)
//! implementation backs the test suite. Errors cross this seam as
//! [`DirError`], which the engine maps into its own result space.

use std::fmt;
use std::time::Duration;

use crate::dir::entry::ChangeType;
use crate::errors::Error;

////////////////////////////////////////////////////////////////////////
// PROTOCOL TYPES                                                     //
////////////////////////////////////////////////////////////////////////

/// Search scope.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope {
    Base,
    Subtree,
}

/// A modification operation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

/// One attribute modification.
#[derive(Clone, Debug)]
pub struct Mod {
    pub op: ModOp,
    pub attribute: String,
    pub values: Vec<String>,
}

impl Mod {
    pub fn new(op: ModOp, attribute: &str, values: Vec<String>) -> Self {
        Self {
            op,
            attribute: attribute.to_owned(),
            values,
        }
    }
}

/// An event delivered by a persistent-refresh search.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// An entry was added, modified, reported present, or deleted.
    Entry {
        dn: String,
        change: ChangeType,
        attributes: Vec<(String, Vec<String>)>,
    },
    /// The initial refresh pass has completed; subsequent events are
    /// live changes.
    RefreshDone,
    /// A search reference, which the engine does not follow.
    Reference,
}

/// An error reported by the directory protocol library.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DirError {
    /// The target entry does not exist.
    NoSuchObject,
    /// The target attribute does not exist on the entry.
    NoSuchAttribute,
    /// The credentials were rejected.
    InvalidCredentials,
    /// The server is down or the connection was lost.
    ServerDown,
    /// The connection could not be established.
    ConnectError,
    /// The operation timed out.
    Timeout,
    /// Any other protocol-level failure.
    Other(String),
}

impl DirError {
    /// Returns whether the error indicates a lost or unusable
    /// connection, which triggers the reconnect path.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ServerDown | Self::ConnectError)
    }
}

impl From<DirError> for Error {
    fn from(err: DirError) -> Self {
        match err {
            DirError::NoSuchObject | DirError::NoSuchAttribute => Error::NotFound,
            DirError::InvalidCredentials => Error::NoPerm,
            DirError::ServerDown | DirError::ConnectError => Error::NotConnected,
            DirError::Timeout => Error::Timeout,
            DirError::Other(_) => Error::NotConnected,
        }
    }
}

impl fmt::Display for DirError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NoSuchObject => f.write_str("no such object"),
            Self::NoSuchAttribute => f.write_str("no such attribute"),
            Self::InvalidCredentials => f.write_str("invalid credentials"),
            Self::ServerDown => f.write_str("server is down"),
            Self::ConnectError => f.write_str("connection error"),
            Self::Timeout => f.write_str("request timed out"),
            Self::Other(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for DirError {}

////////////////////////////////////////////////////////////////////////
// BIND CONFIGURATION                                                 //
////////////////////////////////////////////////////////////////////////

/// The authentication method for directory binds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthMethod {
    None,
    Simple,
    Sasl,
}

impl std::str::FromStr for AuthMethod {
    type Err = &'static str;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        match text {
            "none" => Ok(Self::None),
            "simple" => Ok(Self::Simple),
            "sasl" => Ok(Self::Sasl),
            _ => Err("unknown authentication method"),
        }
    }
}

/// Everything a connection needs to bind.
#[derive(Clone, Debug)]
pub struct BindConfig {
    pub method: AuthMethod,
    pub bind_dn: String,
    pub password: String,
    pub sasl_mech: String,
    pub sasl_user: String,
    pub sasl_auth_name: String,
    pub sasl_realm: String,
    pub sasl_password: String,
    pub krb5_principal: String,
    pub krb5_keytab: String,
}

////////////////////////////////////////////////////////////////////////
// THE SEAM TRAITS                                                    //
////////////////////////////////////////////////////////////////////////

/// A directory server: a factory for connections plus the asynchronous
/// wake primitive used at shutdown.
pub trait Directory: Send + Sync {
    /// Opens a new, unbound connection.
    fn open(&self) -> Result<Box<dyn DirConn>, DirError>;

    /// Interrupts any connection blocked in [`DirConn::poll`]. Used to
    /// deliver the shutdown signal to the stream consumer.
    fn wake(&self);
}

/// One directory connection. Connections are never shared between
/// threads concurrently; the pool enforces exclusivity.
pub trait DirConn: Send {
    /// Binds (or rebinds) the connection.
    fn bind(&mut self, config: &BindConfig) -> Result<(), DirError>;

    /// Runs a synchronous search and returns the matching entries as
    /// `(dn, attributes)` pairs.
    fn search(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attributes: Option<&[&str]>,
    ) -> Result<Vec<(String, Vec<(String, Vec<String>)>)>, DirError>;

    /// Applies modifications to an existing entry.
    fn modify(&mut self, dn: &str, mods: &[Mod]) -> Result<(), DirError>;

    /// Adds a new entry with the given attributes.
    fn add_entry(&mut self, dn: &str, mods: &[Mod]) -> Result<(), DirError>;

    /// Deletes an entire entry.
    fn delete_entry(&mut self, dn: &str) -> Result<(), DirError>;

    /// Opens a persistent-refresh search. The directory will deliver
    /// every matching entry, a [`StreamEvent::RefreshDone`] marker,
    /// and then live changes, all through [`DirConn::poll`].
    fn open_stream(&mut self, base: &str, filter: &str) -> Result<(), DirError>;

    /// Blocks for up to `timeout` waiting for the next stream event.
    /// Returns `Ok(None)` on an idle tick (timeout or wake), so the
    /// caller can observe shutdown.
    fn poll(&mut self, timeout: Duration) -> Result<Option<StreamEvent>, DirError>;
}

////////////////////////////////////////////////////////////////////////
// KERBEROS SEAM                                                      //
////////////////////////////////////////////////////////////////////////

/// Ticket acquisition for SASL/GSSAPI binds. The real implementation
/// lives out of tree; obtaining the TGT is always serialized under the
/// process-wide Kerberos mutex.
pub trait KrbClient: Send + Sync {
    fn obtain_tgt(&self, principal: &str, keytab: &str) -> Result<(), DirError>;
}

/// The placeholder client used when no Kerberos support is wired in:
/// every acquisition fails as a connection problem, so the reconnect
/// loop keeps retrying.
pub struct NoKrb;

impl KrbClient for NoKrb {
    fn obtain_tgt(&self, _principal: &str, _keytab: &str) -> Result<(), DirError> {
        Err(DirError::ConnectError)
    }
}
