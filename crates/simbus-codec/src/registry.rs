//! Explicit type-tag registry used to reconstruct polymorphic values.

use std::collections::HashMap;
use std::fmt;

use crate::encodable::Encodable;
use crate::errors::CodecError;

type Factory = fn() -> Box<dyn Encodable>;

fn make<T: Encodable + Default>() -> Box<dyn Encodable> {
    Box::new(T::default())
}

/// Maps type tags to constructors of default instances.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    factories: HashMap<&'static str, Factory>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` under the tag its default instance reports.
    ///
    /// Registering a second type with the same tag replaces the first.
    pub fn register<T: Encodable + Default>(&mut self) -> &mut Self {
        let tag = T::default().type_tag();
        if self.factories.insert(tag, make::<T>).is_some() {
            tracing::debug!(tag, "type tag re-registered");
        }
        self
    }

    /// Construct a default instance of the type registered under `tag`.
    pub fn create(&self, tag: &str) -> Result<Box<dyn Encodable>, CodecError> {
        self.factories
            .get(tag)
            .map(|factory| factory())
            .ok_or_else(|| CodecError::UnknownType(tag.to_owned()))
    }

    /// Whether `tag` is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// All registered tags (sorted).
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.factories.keys().copied().collect();
        tags.sort_unstable();
        tags
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}
