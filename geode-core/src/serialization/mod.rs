//! Serialization framework for Geode's binary format.

mod data_input;
mod data_output;
pub mod ds_code;
pub mod modified_utf8;
mod traits;

pub use data_input::{DataInput, ObjectDataInput};
pub use data_output::{DataOutput, ObjectDataOutput};
pub use traits::{
    read_typed_string, write_typed_string, CacheableKey, CacheableValue, Deserializable,
    Serializable,
};
