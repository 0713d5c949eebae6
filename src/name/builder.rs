// Copyright 2021 Matthew Ingwersen.
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

//! Implementation of the [`NameBuilder`] type.

use arrayvec::ArrayVec;

use super::{Error, Name, MAX_LABEL_LEN, MAX_N_LABELS, MAX_WIRE_LEN};

/// A builder to construct [`Name`]s label by label.
///
/// Octets are appended to the open label with [`NameBuilder::try_push`]
/// and the label is closed with [`NameBuilder::end_label`]. A builder
/// is consumed either by [`NameBuilder::finish`], which requires the
/// final label to be the null label (i.e. the textual input ended with
/// an unescaped `.`), or by [`NameBuilder::finish_with_origin`], which
/// completes a relative name by appending the labels of an absolute
/// origin.
pub struct NameBuilder {
    wire: ArrayVec<u8, MAX_WIRE_LEN>,
    offsets: ArrayVec<u8, MAX_N_LABELS>,
    label: ArrayVec<u8, MAX_LABEL_LEN>,
    labels_ended: usize,
}

impl NameBuilder {
    /// Creates a new `NameBuilder` with an empty open label.
    pub fn new() -> Self {
        Self {
            wire: ArrayVec::new(),
            offsets: ArrayVec::new(),
            label: ArrayVec::new(),
            labels_ended: 0,
        }
    }

    /// Appends an octet to the open label.
    pub fn try_push(&mut self, octet: u8) -> Result<(), Error> {
        self.label.try_push(octet).or(Err(Error::LabelTooLong))
    }

    /// Closes the open label and opens a new, empty one. The closed
    /// label must not be empty: null labels occur only in the terminal
    /// position, which is handled by [`NameBuilder::finish`].
    pub fn end_label(&mut self) -> Result<(), Error> {
        if self.label.is_empty() {
            return Err(Error::NullNonTerminal);
        }
        self.append_closed_label()
    }

    /// Consumes the builder, appending the terminal null label. The
    /// open label must be empty (the input ended with `.`); otherwise
    /// the name was relative and [`Error::NonNullTerminal`] is
    /// returned.
    pub fn finish(mut self) -> Result<Name, Error> {
        if !self.label.is_empty() {
            return Err(Error::NonNullTerminal);
        }
        if self.offsets.try_push(self.wire.len() as u8).is_err() {
            return Err(Error::TooManyLabels);
        }
        self.wire.try_push(0).or(Err(Error::NameTooLong))?;
        Ok(Name::from_parts(&self.wire, &self.offsets))
    }

    /// Consumes the builder, closing the open label (if any) and
    /// appending the labels of `origin`, which must be absolute. This
    /// implements the usual master-file rule that a name without a
    /// trailing dot is interpreted relative to the origin.
    pub fn finish_with_origin(mut self, origin: &Name) -> Result<Name, Error> {
        if !self.label.is_empty() {
            self.append_closed_label()?;
        } else if self.labels_ended == 0 {
            return Err(Error::StrEmpty);
        }
        for label in origin.labels() {
            if self.offsets.try_push(self.wire.len() as u8).is_err() {
                return Err(Error::TooManyLabels);
            }
            self.wire
                .try_push(label.len() as u8)
                .or(Err(Error::NameTooLong))?;
            self.wire
                .try_extend_from_slice(label.octets())
                .or(Err(Error::NameTooLong))?;
        }
        Ok(Name::from_parts(&self.wire, &self.offsets))
    }

    /// Moves the open label into the wire buffer.
    fn append_closed_label(&mut self) -> Result<(), Error> {
        if self.offsets.try_push(self.wire.len() as u8).is_err() {
            return Err(Error::TooManyLabels);
        }
        // The terminal null label must still fit afterwards, so a name
        // may use at most MAX_WIRE_LEN - 1 octets of ordinary labels.
        if self.wire.len() + 1 + self.label.len() > MAX_WIRE_LEN - 1 {
            return Err(Error::NameTooLong);
        }
        self.wire.push(self.label.len() as u8);
        self.wire.extend(self.label.drain(..));
        self.labels_ended += 1;
        Ok(())
    }
}

impl Default for NameBuilder {
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

    #[test]
    fn builder_produces_absolute_names() {
        let mut builder = NameBuilder::new();
        for octet in *b"abc" {
            builder.try_push(octet).unwrap();
        }
        builder.end_label().unwrap();
        let name = builder.finish().unwrap();
        assert_eq!(name.wire_repr(), b"\x03abc\x00");
    }

    #[test]
    fn builder_rejects_relative_names_without_origin() {
        let mut builder = NameBuilder::new();
        builder.try_push(b'a').unwrap();
        assert_eq!(builder.finish(), Err(Error::NonNullTerminal));
    }

    #[test]
    fn builder_completes_relative_names_with_origin() {
        let origin: Name = "example.test.".parse().unwrap();
        let mut builder = NameBuilder::new();
        builder.try_push(b'a').unwrap();
        let name = builder.finish_with_origin(&origin).unwrap();
        assert_eq!(name.wire_repr(), b"\x01a\x07example\x04test\x00");
        assert_eq!(name.len(), 4);
    }

    #[test]
    fn builder_rejects_oversized_labels() {
        let mut builder = NameBuilder::new();
        for _ in 0..MAX_LABEL_LEN {
            builder.try_push(b'x').unwrap();
        }
        assert_eq!(builder.try_push(b'x'), Err(Error::LabelTooLong));
    }

    #[test]
    fn builder_rejects_oversized_names() {
        // 85 labels of 3 wire octets each exceed 255 octets total.
        let mut builder = NameBuilder::new();
        let mut result = Ok(());
        for _ in 0..85 {
            for _ in 0..2 {
                builder.try_push(b'x').unwrap();
            }
            result = builder.end_label();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(Error::NameTooLong));
    }
}
