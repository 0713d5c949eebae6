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

//! The crate-wide [`Error`] type.
//!
//! Most of the synchronization engine operates in a single result
//! space: an entry handler may fail because a name was malformed,
//! because the directory connection dropped, or because the engine is
//! shutting down, and the dispatcher reacts to the *kind* of failure,
//! not to the module it came from. Leaf modules with self-contained
//! failure modes (e.g. [`crate::name`]) keep their own error enums and
//! convert into this one at the boundary.

use std::fmt;
use std::io;

use crate::name;

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error produced by the synchronization engine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    /// A name, zone, or entry was not found. Lookups frequently
    /// coalesce this with a partial match into success; mutations
    /// treat it as a hard failure.
    NotFound,

    /// An attempt was made to create a zone that is already live with
    /// non-empty content.
    Exists,

    /// A malformed master-file escape sequence was found in a name
    /// that is about to be converted for use in a directory DN. This
    /// is fatal for the conversion and logged as a bug, since the
    /// conversion mangles network input.
    BadEscape,

    /// A DN carries an owner name that is not a proper subdomain of
    /// its zone (or equals the zone apex). The entry is skipped.
    BadOwnerName,

    /// The entry uses a construct the engine does not support:
    /// heterogeneous TTLs within one rdata list, a multi-valued RDN,
    /// or an unsupported address family. The entry is skipped.
    NotImplemented,

    /// The directory rejected our credentials, or a PTR
    /// synchronization target zone does not allow dynamic updates.
    NoPerm,

    /// The directory server is unreachable, or credential material
    /// (e.g. a Kerberos TGT) could not be obtained.
    NotConnected,

    /// A directory operation or a pool wait exceeded its deadline.
    Timeout,

    /// An attribute value could not be parsed: an invalid forwarder,
    /// an invalid ACL element, malformed record data, or a PTR record
    /// whose target does not match expectations.
    UnexpectedToken,

    /// A PTR record is already present with a conflicting target.
    Singleton,

    /// The instance is shutting down; the operation unwound cleanly.
    Shutdown,

    /// A reconnect was attempted before the backoff window elapsed.
    SoftQuota,

    /// A malformed domain name was found in directory data.
    BadName(name::Error),

    /// An I/O failure while maintaining on-disk zone state. Only the
    /// kind is kept so that errors stay comparable; the message is
    /// logged at the point of failure.
    Io(io::ErrorKind),
}

impl Error {
    /// Returns whether this error indicates that the in-memory zone
    /// state may have diverged from the directory, in which case the
    /// instance is marked tainted.
    pub fn suggests_divergence(&self) -> bool {
        matches!(self, Self::Exists | Self::Io(_))
    }
}

impl From<name::Error> for Error {
    fn from(err: name::Error) -> Self {
        Self::BadName(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err.kind())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("not found"),
            Self::Exists => f.write_str("already exists"),
            Self::BadEscape => f.write_str("malformed escape sequence"),
            Self::BadOwnerName => f.write_str("owner name not subordinate to its zone"),
            Self::NotImplemented => f.write_str("not implemented"),
            Self::NoPerm => f.write_str("permission denied"),
            Self::NotConnected => f.write_str("not connected to the directory server"),
            Self::Timeout => f.write_str("operation timed out"),
            Self::UnexpectedToken => f.write_str("unexpected token"),
            Self::Singleton => f.write_str("conflicting singleton record"),
            Self::Shutdown => f.write_str("instance is shutting down"),
            Self::SoftQuota => f.write_str("reconnect backoff window has not elapsed"),
            Self::BadName(err) => write!(f, "malformed domain name: {}", err),
            Self::Io(kind) => write!(f, "I/O error: {}", kind),
        }
    }
}

impl std::error::Error for Error {}
