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

//! Directory access: the protocol seam, the entry model, and the
//! connection pool.
//!
//! The actual directory protocol implementation lives behind the
//! [`Directory`]/[`DirConn`] traits; the engine itself only deals in
//! parsed [`Entry`] values and bounded connection access through
//! [`ConnPool`]. The [`memory`] module provides the in-process
//! implementation the test suite runs against.

pub mod memory;

mod backend;
mod entry;
mod pool;
pub use backend::{
    AuthMethod, BindConfig, DirConn, DirError, Directory, KrbClient, Mod, ModOp, NoKrb, Scope,
    StreamEvent,
};
pub use entry::{ChangeType, ClassSet, Entry};
pub use pool::{ConnGuard, ConnPool, ConnSlot, Connector, Semaphore};
