//! Binary codec over MessagePack.
//!
//! Objects are collected into a typed field tree ([`ObjectNode`]) and
//! serialized with `rmp-serde` as named maps. Each value keeps its variant,
//! so integers never come back as floats and bytes stay bytes.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encodable::{Encodable, FieldReader, FieldWriter};
use crate::errors::CodecError;
use crate::factory::{Encoder, EncoderKind};
use crate::registry::TypeRegistry;

const MAX_RETAINED_BUFFER: usize = 64 * 1024;

/// A single field value in the tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    StrList(Vec<String>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    Object(ObjectNode),
    ObjectList(Vec<ObjectNode>),
}

/// One encoded object: its type tag plus named fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct ObjectNode {
    #[serde(rename = "@type")]
    tag: String,
    fields: BTreeMap<String, FieldValue>,
}

impl ObjectNode {
    fn from_value(value: &dyn Encodable) -> Result<Self, CodecError> {
        let mut node = Self {
            tag: value.type_tag().to_owned(),
            fields: BTreeMap::new(),
        };
        value.encode(&mut node)?;
        Ok(node)
    }

    fn put(&mut self, name: &str, value: FieldValue) -> Result<(), CodecError> {
        let _ = self.fields.insert(name.to_owned(), value);
        Ok(())
    }
}

/// MessagePack codec instance.
#[derive(Debug)]
pub struct MessagePackEncoder {
    registry: Arc<TypeRegistry>,
    buffer: Vec<u8>,
}

impl MessagePackEncoder {
    /// Create an encoder resolving tags through `registry`.
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            buffer: Vec::new(),
        }
    }
}

impl Encoder for MessagePackEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::MessagePack
    }

    fn encode(&mut self, value: &dyn Encodable) -> Result<Vec<u8>, CodecError> {
        let node = ObjectNode::from_value(value)?;
        self.buffer.clear();
        rmp_serde::encode::write_named(&mut self.buffer, &node)?;
        Ok(self.buffer.clone())
    }

    fn read_root(
        &mut self,
        bytes: &[u8],
        visit: &mut dyn FnMut(&dyn FieldReader) -> Result<(), CodecError>,
    ) -> Result<(), CodecError> {
        let node: ObjectNode = rmp_serde::from_slice(bytes)?;
        visit(&NodeReader {
            node: &node,
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

impl FieldWriter for ObjectNode {
    fn put_bool(&mut self, name: &str, value: bool) -> Result<(), CodecError> {
        self.put(name, FieldValue::Bool(value))
    }

    fn put_i64(&mut self, name: &str, value: i64) -> Result<(), CodecError> {
        self.put(name, FieldValue::Int(value))
    }

    fn put_f64(&mut self, name: &str, value: f64) -> Result<(), CodecError> {
        self.put(name, FieldValue::Float(value))
    }

    fn put_str(&mut self, name: &str, value: &str) -> Result<(), CodecError> {
        self.put(name, FieldValue::Str(value.to_owned()))
    }

    fn put_bytes(&mut self, name: &str, value: &[u8]) -> Result<(), CodecError> {
        self.put(name, FieldValue::Bytes(value.to_vec()))
    }

    fn put_str_list(&mut self, name: &str, values: &[String]) -> Result<(), CodecError> {
        self.put(name, FieldValue::StrList(values.to_vec()))
    }

    fn put_i64_list(&mut self, name: &str, values: &[i64]) -> Result<(), CodecError> {
        self.put(name, FieldValue::IntList(values.to_vec()))
    }

    fn put_f64_list(&mut self, name: &str, values: &[f64]) -> Result<(), CodecError> {
        self.put(name, FieldValue::FloatList(values.to_vec()))
    }

    fn put_object(&mut self, name: &str, value: &dyn Encodable) -> Result<(), CodecError> {
        let child = Self::from_value(value)?;
        self.put(name, FieldValue::Object(child))
    }

    fn put_object_list(
        &mut self,
        name: &str,
        values: &[&dyn Encodable],
    ) -> Result<(), CodecError> {
        let children = values
            .iter()
            .map(|v| Self::from_value(*v))
            .collect::<Result<Vec<_>, _>>()?;
        self.put(name, FieldValue::ObjectList(children))
    }
}

struct NodeReader<'a> {
    node: &'a ObjectNode,
    registry: &'a TypeRegistry,
}

impl<'a> NodeReader<'a> {
    fn field(&self, name: &str) -> Result<&'a FieldValue, CodecError> {
        self.node
            .fields
            .get(name)
            .ok_or_else(|| CodecError::missing(name))
    }

    fn child(&self, node: &'a ObjectNode) -> Box<dyn FieldReader + 'a> {
        Box::new(NodeReader {
            node,
            registry: self.registry,
        })
    }
}

impl FieldReader for NodeReader<'_> {
    fn type_tag(&self) -> Option<&str> {
        (!self.node.tag.is_empty()).then_some(self.node.tag.as_str())
    }

    fn has_field(&self, name: &str) -> bool {
        self.node.fields.contains_key(name)
    }

    fn get_bool(&self, name: &str) -> Result<bool, CodecError> {
        match self.field(name)? {
            FieldValue::Bool(v) => Ok(*v),
            _ => Err(CodecError::wrong_type(name, "a boolean")),
        }
    }

    fn get_i64(&self, name: &str) -> Result<i64, CodecError> {
        match self.field(name)? {
            FieldValue::Int(v) => Ok(*v),
            _ => Err(CodecError::wrong_type(name, "an integer")),
        }
    }

    fn get_f64(&self, name: &str) -> Result<f64, CodecError> {
        match self.field(name)? {
            FieldValue::Float(v) => Ok(*v),
            _ => Err(CodecError::wrong_type(name, "a float")),
        }
    }

    fn get_str(&self, name: &str) -> Result<String, CodecError> {
        match self.field(name)? {
            FieldValue::Str(v) => Ok(v.clone()),
            _ => Err(CodecError::wrong_type(name, "a string")),
        }
    }

    fn get_bytes(&self, name: &str) -> Result<Vec<u8>, CodecError> {
        match self.field(name)? {
            FieldValue::Bytes(v) => Ok(v.clone()),
            _ => Err(CodecError::wrong_type(name, "bytes")),
        }
    }

    fn get_str_list(&self, name: &str) -> Result<Vec<String>, CodecError> {
        match self.field(name)? {
            FieldValue::StrList(v) => Ok(v.clone()),
            _ => Err(CodecError::wrong_type(name, "a list of strings")),
        }
    }

    fn get_i64_list(&self, name: &str) -> Result<Vec<i64>, CodecError> {
        match self.field(name)? {
            FieldValue::IntList(v) => Ok(v.clone()),
            _ => Err(CodecError::wrong_type(name, "a list of integers")),
        }
    }

    fn get_f64_list(&self, name: &str) -> Result<Vec<f64>, CodecError> {
        match self.field(name)? {
            FieldValue::FloatList(v) => Ok(v.clone()),
            _ => Err(CodecError::wrong_type(name, "a list of floats")),
        }
    }

    fn object(&self, name: &str) -> Result<Box<dyn FieldReader + '_>, CodecError> {
        match self.field(name)? {
            FieldValue::Object(node) => Ok(self.child(node)),
            _ => Err(CodecError::wrong_type(name, "an object")),
        }
    }

    fn object_list(&self, name: &str) -> Result<Vec<Box<dyn FieldReader + '_>>, CodecError> {
        match self.field(name)? {
            FieldValue::ObjectList(nodes) => Ok(nodes.iter().map(|n| self.child(n)).collect()),
            _ => Err(CodecError::wrong_type(name, "a list of objects")),
        }
    }

    fn registry(&self) -> &TypeRegistry {
        self.registry
    }
}
