//! Text codec over JSON objects.
//!
//! Objects map to JSON objects with the type tag under [`TYPE_KEY`]. Bytes
//! are written as standard base64 strings; everything else uses the natural
//! JSON representation.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Map, Number, Value};

use crate::TYPE_KEY;
use crate::encodable::{Encodable, FieldReader, FieldWriter};
use crate::errors::CodecError;
use crate::factory::{Encoder, EncoderKind};
use crate::registry::TypeRegistry;

/// Encoders keep their scratch buffer between uses unless it grew past this.
const MAX_RETAINED_BUFFER: usize = 64 * 1024;

/// JSON codec instance.
#[derive(Debug)]
pub struct JsonEncoder {
    registry: Arc<TypeRegistry>,
    buffer: Vec<u8>,
}

impl JsonEncoder {
    /// Create an encoder resolving tags through `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            buffer: Vec::new(),
        }
    }
}

impl Encoder for JsonEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Json
    }

    fn encode(&mut self, value: &dyn Encodable) -> Result<Vec<u8>, CodecError> {
        let root = Value::Object(JsonWriter::write_object(value)?);
        self.buffer.clear();
        serde_json::to_writer(&mut self.buffer, &root)?;
        Ok(self.buffer.clone())
    }

    fn read_root(
        &mut self,
        bytes: &[u8],
        visit: &mut dyn FnMut(&dyn FieldReader) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let root: Value = serde_json::from_slice(bytes)?;
        let Value::Object(fields) = &root else {
            return Err(CodecError::NotAnObject);
        };
        visit(&JsonReader {
            fields,
            registry: &self.registry,
        })
    }

    fn reset(&mut self) {
        if self.buffer.capacity() > MAX_RETAINED_BUFFER {
            self.buffer = Vec::new();
        } else {
            self.buffer.clear();
        }
    }
}

/// Writes fields into a JSON object.
struct JsonWriter {
    fields: Map<String, Value>,
}

impl JsonWriter {
    fn write_object(value: &dyn Encodable) -> Result<Map<String, Value>, CodecError> {
        let mut writer = Self { fields: Map::new() };
        writer.insert(TYPE_KEY, Value::String(value.type_tag().to_owned()));
        value.encode(&mut writer)?;
        Ok(writer.fields)
    }

    fn insert(&mut self, name: &str, value: Value) {
        let _ = self.fields.insert(name.to_owned(), value);
    }

    fn number(name: &str, value: f64) -> Result<Value, CodecError> {
        Number::from_f64(value)
            .map(Value::Number)
            .ok_or_else(|| CodecError::InvalidField {
                field: name.to_owned(),
                message: format!("{value} is not representable in JSON"),
            })
    }
}

impl FieldWriter for JsonWriter {
    fn put_bool(&mut self, name: &str, value: bool) -> Result<(), CodecError> {
        self.insert(name, Value::Bool(value));
        Ok(())
    }

    fn put_i64(&mut self, name: &str, value: i64) -> Result<(), CodecError> {
        self.insert(name, Value::from(value));
        Ok(())
    }

    fn put_f64(&mut self, name: &str, value: f64) -> Result<(), CodecError> {
        let number = Self::number(name, value)?;
        self.insert(name, number);
        Ok(())
    }

    fn put_str(&mut self, name: &str, value: &str) -> Result<(), CodecError> {
        self.insert(name, Value::String(value.to_owned()));
        Ok(())
    }

    fn put_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), CodecError> {
        self.insert(name, Value::String(STANDARD.encode(value)));
        Ok(())
    }

    fn put_str_list(&mut self, name: &str, values: &[String]) -> Result<(), CodecError> {
        self.insert(name, Value::from(values.to_vec()));
        Ok(())
    }

    fn put_i64_list(&mut self, name: &str, values: &[i64]) -> Result<(), CodecError> {
        self.insert(name, Value::from(values.to_vec()));
        Ok(())
    }

    fn put_f64_list(&mut self, name: &str, values: &[f64]) -> Result<(), CodecError> {
        let numbers = values
            .iter()
            .map(|v| Self::number(name, *v))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(name, Value::Array(numbers));
        Ok(())
    }

    fn put_object(&mut self, name: &str, value: &dyn Encodable) -> Result<(), CodecError> {
        let object = Self::write_object(value)?;
        self.insert(name, Value::Object(object));
        Ok(())
    }

    fn put_object_list(
        &mut self,
        name: &str,
        values: &[&dyn Encodable],
    ) -> Result<(), CodecError> {
        let objects = values
            .iter()
            .map(|v| Self::write_object(*v).map(Value::Object))
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(name, Value::Array(objects));
        Ok(())
    }
}

/// Reads fields out of a JSON object.
struct JsonReader<'a> {
    fields: &'a Map<String, Value>,
    registry: &'a TypeRegistry,
}

impl<'a> JsonReader<'a> {
    fn field(&self, name: &str) -> Result<&'a Value, CodecError> {
        self.fields.get(name).ok_or_else(|| CodecError::missing(name))
    }

    fn array(&self, name: &str) -> Result<&'a Vec<Value>, CodecError> {
        self.field(name)?
            .as_array()
            .ok_or_else(|| CodecError::wrong_type(name, "a list"))
    }

    fn list<T>(
        &self,
        name: &str,
        expected: &'static str,
        convert: impl Fn(&Value) -> Option<T>,
    ) -> Result<Vec<T>, CodecError> {
        self.array(name)?
            .iter()
            .map(|v| convert(v).ok_or_else(|| CodecError::wrong_type(name, expected)))
            .collect()
    }
}

impl FieldReader for JsonReader<'_> {
    fn type_tag(&self) -> Option<&str> {
        self.fields.get(TYPE_KEY).and_then(Value::as_str)
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    fn get_bool(&self, name: &str) -> Result<bool, CodecError> {
        self.field(name)?
            .as_bool()
            .ok_or_else(|| CodecError::wrong_type(name, "a boolean"))
    }

    fn get_i64(&self, name: &str) -> Result<i64, CodecError> {
        self.field(name)?
            .as_i64()
            .ok_or_else(|| CodecError::wrong_type(name, "an integer"))
    }

    fn get_f64(&self, name: &str) -> Result<f64, CodecError> {
        self.field(name)?
            .as_f64()
            .ok_or_else(|| CodecError::wrong_type(name, "a number"))
    }

    fn get_str(&self, name: &str) -> Result<String, CodecError> {
        self.field(name)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| CodecError::wrong_type(name, "a string"))
    }

    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, CodecError> {
        let encoded = self
            .field(name)?
            .as_str()
            .ok_or_else(|| CodecError::wrong_type(name, "a base64 string"))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| CodecError::InvalidField {
                field: name.to_owned(),
                message: e.to_string(),
            })
    }

    fn get_str_list(&self, name: &str) -> Result<Vec<String>, CodecError> {
        self.list(name, "a list of strings", |v| v.as_str().map(str::to_owned))
    }

    fn get_i64_list(&self, name: &str) -> Result<Vec<i64>, CodecError> {
        self.list(name, "a list of integers", Value::as_i64)
    }

    fn get_f64_list(&self, name: &str) -> Result<Vec<f64>, CodecError> {
        self.list(name, "a list of numbers", Value::as_f64)
    }

    fn object(&self, name: &str) -> Result<Box<dyn FieldReader + '_>, CodecError> {
        let fields = self
            .field(name)?
            .as_object()
            .ok_or_else(|| CodecError::wrong_type(name, "an object"))?;
        Ok(Box::new(JsonReader {
            fields,
            registry: self.registry,
        }))
    }

    fn object_list(&self, name: &str) -> Result<Vec<Box<dyn FieldReader + '_>>, CodecError> {
        self.array(name)?
            .iter()
            .map(|v| {
                let fields = v
                    .as_object()
                    .ok_or_else(|| CodecError::wrong_type(name, "a list of objects"))?;
                Ok(Box::new(JsonReader {
                    fields,
                    registry: self.registry,
                }) as Box<dyn FieldReader + '_>)
            })
            .collect()
    }

    fn registry(&self) -> &TypeRegistry {
        self.registry
    }
}
