//! Field layer: typed field values and their on-disk codec.

pub mod codec;
pub mod value;

pub use value::{FieldType, FieldValue};
