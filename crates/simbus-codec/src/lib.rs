//! # simbus-codec
//!
//! Self-describing structured encoding.
//!
//! Types implement [`Encodable`] by writing and reading *named* fields through
//! the [`FieldWriter`] / [`FieldReader`] traits. Concrete codecs implement only
//! those low-level get/put-by-name operations over their own document model:
//!
//! - [`JsonEncoder`]: `serde_json` objects, bytes as base64 strings
//! - [`MessagePackEncoder`]: a typed field tree serialized with `rmp-serde`
//!
//! Every object is written with a type tag. Decoding resolves tags through an
//! explicit [`TypeRegistry`], so adding a payload type means registering it,
//! never touching dispatch or transport code.
//!
//! [`EncoderFactory`] hands out pooled encoders per [`EncoderKind`]; the
//! [`PooledEncoder`] guard returns its encoder to the pool when dropped.

#![deny(unsafe_code)]

pub mod encodable;
pub mod errors;
pub mod factory;
pub mod json;
pub mod msgpack;
pub mod registry;

pub use encodable::{
    Encodable, FieldReader, FieldWriter, decode_dynamic, decode_typed, downcast_ref,
    read_dynamic_list, read_object, read_object_list,
};
pub use errors::CodecError;
pub use factory::{Encoder, EncoderFactory, EncoderKind, PooledEncoder};
pub use json::JsonEncoder;
pub use msgpack::MessagePackEncoder;
pub use registry::TypeRegistry;

/// Field name under which every object's type tag is stored.
pub const TYPE_KEY: &str = "@type";

#[cfg(test)]
pub(crate) mod test_types;
