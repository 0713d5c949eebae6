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

//! The per-zone change journal.
//!
//! Every diff applied to a live zone is appended here as one
//! transaction, which is what lets the host server answer incremental
//! zone transfers without replaying the directory. The file is created
//! on the first write. The format is private to this crate: one
//! `;BEGIN serial=N tuples=N` header line, one presentation-format
//! line per tuple, and a `;END` trailer.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::errors::Result;

use super::Diff;

/// Appends `diff` as one transaction to the journal at `path`,
/// creating the file (but not its parent directories) if needed.
/// `serial` is the zone serial the transaction produces.
pub fn write_transaction(path: &Path, serial: u32, diff: &Diff) -> Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut out = BufWriter::new(file);
    writeln!(out, ";BEGIN serial={} tuples={}", serial, diff.len())?;
    for tuple in diff.tuples() {
        writeln!(out, "{}", tuple)?;
    }
    writeln!(out, ";END")?;
    out.flush()?;
    Ok(())
}

/// Counts the transactions recorded in the journal at `path`. A
/// missing file counts as zero transactions.
pub fn transaction_count(path: &Path) -> Result<usize> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err.into()),
    };
    let mut count = 0;
    for line in BufReader::new(file).lines() {
        if line?.starts_with(";BEGIN") {
            count += 1;
        }
    }
    Ok(count)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{DiffOp, DiffTuple};
    use super::*;
    use crate::class::Class;
    use crate::name::Name;
    use crate::rr::{Rdata, Type, DEFAULT_TTL};

    fn sample_diff() -> Diff {
        let origin: Name = "example.test.".parse().unwrap();
        let mut diff = Diff::new();
        diff.append_minimal(DiffTuple {
            op: DiffOp::Add,
            name: "host.example.test.".parse().unwrap(),
            rr_type: Type::A,
            class: Class::IN,
            ttl: DEFAULT_TTL,
            rdata: Rdata::from_text(Type::A, &origin, "192.0.2.1").unwrap(),
        });
        diff
    }

    #[test]
    fn transactions_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        assert_eq!(transaction_count(&path).unwrap(), 0);
        write_transaction(&path, 10, &sample_diff()).unwrap();
        assert_eq!(transaction_count(&path).unwrap(), 1);
        write_transaction(&path, 11, &sample_diff()).unwrap();
        assert_eq!(transaction_count(&path).unwrap(), 2);
    }

    #[test]
    fn transactions_record_their_tuples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal");
        write_transaction(&path, 10, &sample_diff()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains(";BEGIN serial=10 tuples=1"));
        assert!(contents.contains("add host.example.test. 86400 IN A 192.0.2.1"));
        assert!(contents.trim_end().ends_with(";END"));
    }
}
