//! Per-context string interning.
//!
//! The producer interns every string it puts on the wire and ships newly
//! registered strings ahead of the instruction units that reference them. The
//! consumer appends those registrations in the same order, so both tables
//! assign identical ids.

use std::collections::HashMap;
use std::ops::Range;

use thiserror::Error;

use crate::layout::STRING_ID_BASE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StringTableError {
    #[error("string table exhausted ({count} strings registered)")]
    Exhausted { count: usize },

    /// The two contexts no longer agree on the id sequence.
    #[error("string registration out of sync: expected first id {expected}, got {actual}")]
    OutOfSync { expected: u32, actual: u32 },

    #[error("unknown string id {0}")]
    UnknownId(u16),
}

/// Append-only mapping between strings and small integer ids.
///
/// Ids are assigned monotonically from [`STRING_ID_BASE`] and never reused or
/// reassigned while the table lives.
#[derive(Debug, Default)]
pub struct StringTable {
    ids: HashMap<String, u16>,
    strings: Vec<String>,
    /// Index into `strings` of the first registration not yet handed to the transport.
    unsent: usize,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Id the next fresh registration will receive.
    pub fn next_id(&self) -> u32 {
        u32::from(STRING_ID_BASE) + self.strings.len() as u32
    }

    /// Intern `value`, returning its id. Idempotent.
    pub fn store(&mut self, value: &str) -> Result<u16, StringTableError> {
        if let Some(&id) = self.ids.get(value) {
            return Ok(id);
        }
        let id = u16::try_from(self.next_id()).map_err(|_| StringTableError::Exhausted {
            count: self.strings.len(),
        })?;
        self.ids.insert(value.to_string(), id);
        self.strings.push(value.to_string());
        Ok(id)
    }

    /// Look up a previously registered id.
    pub fn get(&self, id: u16) -> Result<&str, StringTableError> {
        let index = id
            .checked_sub(STRING_ID_BASE)
            .ok_or(StringTableError::UnknownId(id))?;
        self.strings
            .get(usize::from(index))
            .map(String::as_str)
            .ok_or(StringTableError::UnknownId(id))
    }

    pub fn id_of(&self, value: &str) -> Option<u16> {
        self.ids.get(value).copied()
    }

    /// Registrations made since the previous call, with the id of the first one.
    ///
    /// Producer side: the returned strings must reach the consumer before any
    /// instruction encoded after them.
    pub fn take_unsent(&mut self) -> (u32, Vec<String>) {
        let first = u32::from(STRING_ID_BASE) + self.unsent as u32;
        let batch = self.strings[self.unsent..].to_vec();
        self.unsent = self.strings.len();
        (first, batch)
    }

    /// Index of the first registration not yet handed to the transport.
    pub fn unsent_index(&self) -> usize {
        self.unsent
    }

    /// Registrations by index, in id order.
    pub fn registrations(&self, range: Range<usize>) -> &[String] {
        &self.strings[range]
    }

    /// Move the send cursor to `index`.
    ///
    /// Moving it back makes the registrations from `index` on ship again with
    /// the next frame, which is how a frame the transport refused is undone.
    pub fn set_unsent_index(&mut self, index: usize) {
        self.unsent = index.min(self.strings.len());
    }

    /// Forget registrations from index `len` on.
    ///
    /// Only registrations that were never handed to the transport can be
    /// withdrawn; the cut stops at the send cursor.
    pub fn truncate(&mut self, len: usize) {
        let len = len.max(self.unsent);
        if len >= self.strings.len() {
            return;
        }
        for value in self.strings.drain(len..) {
            if self.ids.get(&value).is_some_and(|&id| usize::from(id - STRING_ID_BASE) >= len) {
                self.ids.remove(&value);
            }
        }
    }

    /// Consumer side: append a batch shipped by the producer.
    ///
    /// Strings already present keep their id (the producer never ships a
    /// duplicate, but a repeated value must not disturb the sequence).
    pub fn register_batch(
        &mut self,
        first_id: u32,
        batch: impl IntoIterator<Item = String>,
    ) -> Result<(), StringTableError> {
        let expected = self.next_id();
        if first_id != expected {
            return Err(StringTableError::OutOfSync {
                expected,
                actual: first_id,
            });
        }
        for value in batch {
            if u16::try_from(self.next_id()).is_err() {
                return Err(StringTableError::Exhausted {
                    count: self.strings.len(),
                });
            }
            let id = self.next_id() as u16;
            self.ids.entry(value.clone()).or_insert(id);
            self.strings.push(value);
        }
        self.unsent = self.strings.len();
        Ok(())
    }
}
