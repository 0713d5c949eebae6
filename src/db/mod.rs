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

//! The in-memory zone database and its change machinery.
//!
//! The synchronization engine does not serve queries; it *projects*
//! directory state into zone databases that the host name server
//! serves from. What the engine needs from a database is therefore
//! narrow: open a fresh version, enumerate what a version holds, apply
//! a [`Diff`] of record-level changes, and commit or abandon the
//! version atomically. [`ZoneDb`] provides exactly that, and the
//! [`journal`] module persists applied diffs so the host server can
//! answer incremental zone transfers.

pub mod journal;

mod diff;
mod zone;
pub use diff::{serial_gt, soa_serial_next, soa_serial_tuples, Diff, DiffOp, DiffTuple};
pub use zone::{Version, ZoneDb};
