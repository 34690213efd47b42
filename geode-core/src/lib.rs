//! Core types and protocols for the Geode native client.

#![warn(missing_docs)]

pub mod error;
pub mod protocol;
pub mod serialization;

pub use error::{GeodeError, Result};
pub use protocol::{BucketServerLocation, ServerLocation};
pub use serialization::{
    CacheableKey, CacheableValue, DataInput, DataOutput, Deserializable, ObjectDataInput,
    ObjectDataOutput, Serializable,
};
