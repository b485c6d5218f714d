//! The encodable contract and the field-level reader/writer seams.

use std::any::Any;
use std::fmt;

use simbus_core::ValidationError;

use crate::errors::CodecError;
use crate::registry::TypeRegistry;

/// A type that can be written to and read from any codec by field name.
///
/// Implementations write every field they own in [`encode`](Self::encode)
/// and read the same names back in [`decode`](Self::decode). Decoding starts
/// from [`Default`]-constructed instances, so `decode` only has to fill
/// fields in.
pub trait Encodable: Any + Send + Sync + fmt::Debug {
    /// Tag written alongside the fields so the receiver can pick the type.
    fn type_tag(&self) -> &'static str;

    /// Write this value's fields.
    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError>;

    /// Read this value's fields.
    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError>;

    /// Called once all fields of this instance have been read.
    ///
    /// Use it to rebuild derived or cached state.
    fn decoding_completed(&mut self) {}

    /// Check semantic invariants.
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Put-by-name half of a codec.
pub trait FieldWriter {
    /// Write a boolean.
    fn put_bool(&mut self, name: &str, value: bool) -> Result<(), CodecError>;
    /// Write a signed integer.
    fn put_i64(&mut self, name: &str, value: i64) -> Result<(), CodecError>;
    /// Write a float. Non-finite values may be rejected by text codecs.
    fn put_f64(&mut self, name: &str, value: f64) -> Result<(), CodecError>;
    /// Write a string.
    fn put_str(&mut self, name: &str, value: &str) -> Result<(), CodecError>;
    /// Write raw bytes.
    fn put_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), CodecError>;
    /// Write a list of strings.
    fn put_str_list(&mut self, name: &str, values: &[String]) -> Result<(), CodecError>;
    /// Write a list of integers.
    fn put_i64_list(&mut self, name: &str, values: &[i64]) -> Result<(), CodecError>;
    /// Write a list of floats.
    fn put_f64_list(&mut self, name: &str, values: &[f64]) -> Result<(), CodecError>;
    /// Write a nested, type-tagged object.
    fn put_object(&mut self, name: &str, value: &dyn Encodable) -> Result<(), CodecError>;
    /// Write a list of nested, type-tagged objects.
    fn put_object_list(&mut self, name: &str, values: &[&dyn Encodable])
    -> Result<(), CodecError>;
}

/// Get-by-name half of a codec.
pub trait FieldReader {
    /// Type tag of the object being read, if present.
    fn type_tag(&self) -> Option<&str>;
    /// Whether the object has a field called `name`.
    fn has_field(&self, name: &str) -> bool;
    /// Read a boolean.
    fn get_bool(&self, name: &str) -> Result<bool, CodecError>;
    /// Read a signed integer.
    fn get_i64(&self, name: &str) -> Result<i64, CodecError>;
    /// Read a float.
    fn get_f64(&self, name: &str) -> Result<f64, CodecError>;
    /// Read a string.
    fn get_str(&self, name: &str) -> Result<String, CodecError>;
    /// Read raw bytes.
    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, CodecError>;
    /// Read a list of strings.
    fn get_str_list(&self, name: &str) -> Result<Vec<String>, CodecError>;
    /// Read a list of integers.
    fn get_i64_list(&self, name: &str) -> Result<Vec<i64>, CodecError>;
    /// Read a list of floats.
    fn get_f64_list(&self, name: &str) -> Result<Vec<f64>, CodecError>;
    /// Reader over a nested object.
    fn object(&self, name: &str) -> Result<Box<dyn FieldReader + '_>, CodecError>;
    /// Readers over a list of nested objects.
    fn object_list(&self, name: &str) -> Result<Vec<Box<dyn FieldReader + '_>>, CodecError>;
    /// Registry used to resolve type tags of nested objects.
    fn registry(&self) -> &TypeRegistry;

    /// Read an optional string; absent fields yield `None`.
    fn get_opt_str(&self, name: &str) -> Result<Option<String>, CodecError> {
        if self.has_field(name) {
            self.get_str(name).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Decode the object under `reader` as a `T`, checking its type tag.
pub fn decode_typed<T: Encodable + Default>(reader: &dyn FieldReader) -> Result<T, CodecError> {
    let mut value = T::default();
    let expected = value.type_tag();
    match reader.type_tag() {
        Some(found) if found == expected => {}
        Some(found) => {
            return Err(CodecError::TypeMismatch {
                expected: expected.to_owned(),
                found: found.to_owned(),
            });
        }
        None => return Err(CodecError::MissingTypeTag),
    }
    value.decode(reader)?;
    value.decoding_completed();
    Ok(value)
}

/// Decode the object under `reader` as whatever type its tag names.
pub fn decode_dynamic(reader: &dyn FieldReader) -> Result<Box<dyn Encodable>, CodecError> {
    let tag = reader.type_tag().ok_or(CodecError::MissingTypeTag)?;
    let mut value = reader.registry().create(tag)?;
    value.decode(reader)?;
    value.decoding_completed();
    Ok(value)
}

/// Read the nested object `name` as a `T`.
pub fn read_object<T: Encodable + Default>(
    reader: &dyn FieldReader,
    name: &str,
) -> Result<T, CodecError> {
    let child = reader.object(name)?;
    decode_typed(child.as_ref())
}

/// Read the nested object list `name` as `T`s.
pub fn read_object_list<T: Encodable + Default>(
    reader: &dyn FieldReader,
    name: &str,
) -> Result<Vec<T>, CodecError> {
    reader
        .object_list(name)?
        .iter()
        .map(|child| decode_typed(child.as_ref()))
        .collect()
}

/// Read the nested object list `name`, resolving each entry by its tag.
pub fn read_dynamic_list(
    reader: &dyn FieldReader,
    name: &str,
) -> Result<Vec<Box<dyn Encodable>>, CodecError> {
    reader
        .object_list(name)?
        .iter()
        .map(|child| decode_dynamic(child.as_ref()))
        .collect()
}

/// Borrow a dynamically typed value as a concrete `T`.
pub fn downcast_ref<T: Encodable>(value: &dyn Encodable) -> Option<&T> {
    let any: &dyn Any = value;
    any.downcast_ref::<T>()
}
