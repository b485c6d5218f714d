//! RPC error codes and error types.

use simbus_codec::CodecError;
use simbus_core::{TransportError, ValidationError};
use simbus_protocol::ErrorPayload;
use simbus_settings::SettingsError;
use thiserror::Error;

// ── Error code constants ────────────────────────────────────────────

/// A packet, topic, or payload failed validation before I/O.
pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
/// Encoding or decoding failed.
pub const CODEC_ERROR: &str = "CODEC_ERROR";
/// The transport reported a failure.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// The dispatching tree rejected a path.
pub const DISPATCH_ERROR: &str = "DISPATCH_ERROR";
/// A request handler is already bound at the subject.
pub const DUPLICATE_HANDLER: &str = "DUPLICATE_HANDLER";
/// A packet did not follow the request/reply protocol.
pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
/// A request collected a different number of replies than expected.
pub const REPLY_COUNT_MISMATCH: &str = "REPLY_COUNT_MISMATCH";
/// No tokio runtime was available to schedule request timeouts.
pub const NO_RUNTIME: &str = "NO_RUNTIME";
/// No transport is registered under the requested access name.
pub const UNKNOWN_TRANSPORT: &str = "UNKNOWN_TRANSPORT";
/// Settings could not be turned into a connection.
pub const SETTINGS_ERROR: &str = "SETTINGS_ERROR";
/// A request handler failed without a more specific code.
pub const HANDLER_FAILED: &str = "HANDLER_FAILED";
/// An inbound message was not a decodable packet.
pub const NO_VALID_PACKET: &str = "NO_VALID_PACKET";
/// A handler failed while processing an inbound packet.
pub const PROCESSING_FAILED: &str = "PROCESSING_FAILED";

/// Failure to attach a handler to the dispatching tree.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The path was empty once the owner's identity prefix was removed.
    #[error("cannot attach a handler at the root")]
    RootPath,

    /// The terminal node already has a handler.
    #[error("a handler is already registered at '{path}'")]
    AlreadyRegistered {
        /// Dotted path relative to the owner.
        path: String,
    },
}

/// Top-level error of the RPC layer.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Rejected before any I/O.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The dispatching tree rejected a path.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Settings could not be applied.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A request handler is already bound at `subject`.
    #[error("a request handler is already registered for '{subject}'")]
    DuplicateHandler {
        /// Dotted subject.
        subject: String,
    },

    /// A packet did not follow the request/reply protocol.
    #[error("protocol violation: {message}")]
    Protocol {
        /// Description.
        message: String,
    },

    /// A request collected a different number of replies than expected.
    #[error("expected {expected} replies, received {received}")]
    ReplyCountMismatch {
        /// Replies the caller asked for.
        expected: usize,
        /// Replies that arrived before the timeout.
        received: usize,
    },

    /// No tokio runtime was available.
    #[error("no tokio runtime available to schedule request timeouts")]
    NoRuntime,

    /// No transport is registered under `name`.
    #[error("no transport registered as '{name}'")]
    UnknownTransport {
        /// Requested access name.
        name: String,
    },

    /// Application-level handler failure with its own code.
    #[error("{message}")]
    Handler {
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },
}

impl RpcError {
    /// Handler failure with an application-defined code.
    pub fn handler(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Protocol violation.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => VALIDATION_ERROR,
            Self::Codec(_) => CODEC_ERROR,
            Self::Transport(_) => TRANSPORT_ERROR,
            Self::Dispatch(_) => DISPATCH_ERROR,
            Self::Settings(_) => SETTINGS_ERROR,
            Self::DuplicateHandler { .. } => DUPLICATE_HANDLER,
            Self::Protocol { .. } => PROTOCOL_ERROR,
            Self::ReplyCountMismatch { .. } => REPLY_COUNT_MISMATCH,
            Self::NoRuntime => NO_RUNTIME,
            Self::UnknownTransport { .. } => UNKNOWN_TRANSPORT,
            Self::Handler { code, .. } => code,
        }
    }

    /// Convert to the in-band error payload sent back to a requester.
    pub fn to_error_payload(&self) -> ErrorPayload {
        ErrorPayload::new(self.code(), self.to_string())
    }
}
