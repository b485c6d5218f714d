//! Error kinds raised below the RPC layer.
//!
//! - [`ValidationError`]: a malformed topic, header, payload, or packet,
//!   always detected before any transport I/O
//! - [`TransportError`]: the single failure kind surfaced by a transport
//!   implementation; nothing in simbus retries on it

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value failed a structural or semantic check.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A topic was absent or had no segments.
    #[error("topic must contain at least one segment")]
    EmptyTopic,

    /// A topic or subject segment was empty.
    #[error("segment {position} is empty")]
    EmptySegment {
        /// Zero-based position of the offending segment.
        position: usize,
    },

    /// A segment contained a forbidden character or was too long.
    #[error("invalid segment '{segment}': {reason}")]
    InvalidSegment {
        /// The offending segment.
        segment: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A subject was built without any segments.
    #[error("subject must contain at least one segment")]
    EmptySubject,

    /// A required field was empty.
    #[error("required field '{field}' is empty")]
    MissingField {
        /// Name of the field.
        field: &'static str,
    },

    /// No packet was supplied for publishing.
    #[error("no packet supplied")]
    MissingPacket,

    /// The publishing manager has no encoder factory configured.
    #[error("no encoder factory configured")]
    NoEncoderFactory,

    /// The publishing manager has no transport publisher configured.
    #[error("no transport publisher configured")]
    NoPublisher,

    /// A payload rejected its own contents.
    #[error("invalid {type_tag} payload: {message}")]
    InvalidPayload {
        /// Type tag of the payload.
        type_tag: String,
        /// Description of the violation.
        message: String,
    },
}

impl ValidationError {
    /// Convenience constructor for payload validation failures.
    #[must_use]
    pub fn payload(type_tag: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            type_tag: type_tag.into(),
            message: message.into(),
        }
    }
}

/// Transport operation that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportOperation {
    /// Establishing the connection.
    Connect,
    /// Tearing the connection down.
    Disconnect,
    /// Publishing bytes on a topic.
    Publish,
    /// Adding topic subscriptions.
    Subscribe,
    /// Removing topic subscriptions.
    Unsubscribe,
}

impl fmt::Display for TransportOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::Publish => write!(f, "publish"),
            Self::Subscribe => write!(f, "subscribe"),
            Self::Unsubscribe => write!(f, "unsubscribe"),
        }
    }
}

/// Failure reported by a transport implementation.
#[derive(Debug, Error)]
#[error("transport {operation} failed: {message}")]
pub struct TransportError {
    /// The operation that failed.
    pub operation: TransportOperation,
    /// Human-readable description.
    pub message: String,
    /// Underlying cause, if the transport has one.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    /// Create a transport error without an underlying cause.
    #[must_use]
    pub fn new(operation: TransportOperation, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for an error raised because the transport is not connected.
    #[must_use]
    pub fn not_connected(operation: TransportOperation) -> Self {
        Self::new(operation, "transport is not connected")
    }
}
