//! Geode client/server wire protocol.
//!
//! A request is a 17-byte header followed by length-prefixed parts. Most
//! replies use the same layout; responses that stream results are split
//! into chunks, each a group of parts, the last one carrying
//! [`LAST_CHUNK_FLAG`](constants::LAST_CHUNK_FLAG).

pub mod chunk;
pub mod codec;
pub mod constants;
pub mod event_id;
pub mod handshake;
pub mod location;
pub mod locator;
pub mod message;
pub mod part;

pub use chunk::{chunk_exception, read_chunk_part_header, Chunk, ChunkObjectType};
pub use codec::{ChunkedResponseDecoder, ChunkedResponseEncoder, MessageCodec};
pub use event_id::EventId;
pub use handshake::{
    ClientMemberId, CommunicationMode, HandshakeRequest, HandshakeRequestDecoder,
    HandshakeResponse, HandshakeResponseDecoder, QueueStatus,
};
pub use location::{BucketServerLocation, ServerLocation};
pub use locator::{LocatorRequest, LocatorResponse};
pub use message::{Message, ServerException};
pub use part::Part;
