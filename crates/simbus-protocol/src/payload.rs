//! The in-band error payload.

use std::fmt;

use simbus_codec::{CodecError, Encodable, FieldReader, FieldWriter, downcast_ref};
use simbus_core::ValidationError;

/// Tag of [`ErrorPayload`].
pub const ERROR_PAYLOAD_TAG: &str = "ErrorPayload";

/// An error carried inside a packet instead of a regular payload.
///
/// Replies use it to report a failed request; receivers see it separated
/// from the other payloads before any handler runs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl ErrorPayload {
    /// Create an error payload.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Borrow `payload` as an error payload, if it is one.
    pub fn from_payload(payload: &dyn Encodable) -> Option<&Self> {
        downcast_ref::<Self>(payload)
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl Encodable for ErrorPayload {
    fn type_tag(&self) -> &'static str {
        ERROR_PAYLOAD_TAG
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_str("code", &self.code)?;
        writer.put_str("message", &self.message)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.code = reader.get_str("code")?;
        self.message = reader.get_str("message")?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.code.is_empty() {
            return Err(ValidationError::payload(ERROR_PAYLOAD_TAG, "code is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::values::StringValue;

    #[test]
    fn detects_error_payloads() {
        let err = ErrorPayload::new("BOOM", "failed");
        let other = StringValue::new("fine");
        assert_eq!(ErrorPayload::from_payload(&err).unwrap().code, "BOOM");
        assert!(ErrorPayload::from_payload(&other).is_none());
    }

    #[test]
    fn empty_code_is_invalid() {
        assert!(ErrorPayload::new("", "x").validate().is_err());
        assert!(ErrorPayload::new("E", "").validate().is_ok());
    }

    #[test]
    fn display_shows_code_and_message() {
        assert_eq!(ErrorPayload::new("E1", "bad").to_string(), "[E1] bad");
    }
}
