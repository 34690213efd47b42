//! Event identifiers attached to mutating requests and subscription events.

use super::part::Part;
use crate::error::Result;
use crate::serialization::{DataInput, DataOutput, ObjectDataOutput};

/// Identifies one event: the originating member, a logical thread of that
/// member, and a per-thread sequence number.
///
/// Servers use event ids to make retried requests idempotent; clients use
/// them to drop duplicate subscription events delivered by redundant queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
    /// Serialized membership id of the originating member.
    pub member_id: Vec<u8>,
    /// Logical thread id within the member.
    pub thread_id: i64,
    /// Sequence number within the thread.
    pub sequence_id: i64,
}

impl EventId {
    /// Creates an event id.
    pub fn new(member_id: Vec<u8>, thread_id: i64, sequence_id: i64) -> Self {
        Self {
            member_id,
            thread_id,
            sequence_id,
        }
    }

    /// Encodes the id as a raw part.
    pub fn to_part(&self) -> Result<Part> {
        let mut output = ObjectDataOutput::with_capacity(self.member_id.len() + 20);
        output.write_byte_array(Some(self.member_id.as_slice()))?;
        output.write_long(self.thread_id)?;
        output.write_long(self.sequence_id)?;
        Ok(Part::raw(output.freeze()))
    }

    /// Decodes an id from a part written by [`EventId::to_part`].
    pub fn from_part(part: &Part) -> Result<Self> {
        let mut input = part.input();
        let member_id = input.read_byte_array()?.unwrap_or_default();
        let thread_id = input.read_long()?;
        let sequence_id = input.read_long()?;
        Ok(Self {
            member_id,
            thread_id,
            sequence_id,
        })
    }
}
