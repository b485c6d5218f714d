//! Codec error type.

use thiserror::Error;

/// Failure while encoding a value or reconstructing one from bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No type is registered under the tag found in the input.
    #[error("unknown type tag '{0}'")]
    UnknownType(String),

    /// The input carried a different type than the one being decoded.
    #[error("expected type '{expected}', found '{found}'")]
    TypeMismatch {
        /// Tag of the type being decoded.
        expected: String,
        /// Tag found in the input.
        found: String,
    },

    /// An object in the input has no type tag.
    #[error("object has no type tag")]
    MissingTypeTag,

    /// A required field is absent.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// A field is present but holds the wrong kind of value.
    #[error("field '{field}' is not {expected}")]
    WrongFieldType {
        /// Field name.
        field: String,
        /// Expected value kind.
        expected: &'static str,
    },

    /// A field's value could not be interpreted.
    #[error("field '{field}': {message}")]
    InvalidField {
        /// Field name.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// The root of the input is not an object.
    #[error("root value is not an object")]
    NotAnObject,

    /// JSON (de)serialization failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization failed.
    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MessagePack deserialization failed.
    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

impl CodecError {
    pub(crate) fn wrong_type(field: &str, expected: &'static str) -> Self {
        Self::WrongFieldType {
            field: field.to_owned(),
            expected,
        }
    }

    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingField(field.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            CodecError::UnknownType("Foo".into()).to_string(),
            "unknown type tag 'Foo'"
        );
        assert_eq!(
            CodecError::wrong_type("count", "an integer").to_string(),
            "field 'count' is not an integer"
        );
        assert_eq!(CodecError::missing("name").to_string(), "missing field 'name'");
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: CodecError = json_err.into();
        assert!(matches!(err, CodecError::Json(_)));
    }
}
