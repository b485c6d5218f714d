//! Callback execution for inbound packets.
//!
//! Every inbound message runs through [`CallbackExecutor::execute`]:
//!
//! 1. Anything that is not a decoded [`Packet`] records one
//!    [`ExecutionError::NoValidPacket`] and runs no callback.
//! 2. Payloads are split once, in order, into [`ErrorPayload`]s and the rest.
//! 3. When error payloads exist, `handle_error` runs exactly once.
//! 4. `execute_handle_callback` always runs next with the remaining payloads.
//! 5. A failure in step 4 records one [`ExecutionError::ProcessingFailed`].

use std::sync::Arc;

use simbus_codec::{Encodable, downcast_ref};
use simbus_protocol::{ErrorPayload, Packet, Payload};
use thiserror::Error;

use crate::errors::{NO_VALID_PACKET, RpcError};
use crate::handlers::{NotificationBinding, RequestBinding};
use crate::requester::ReplyDispatcher;

/// A failure recorded while handling one inbound message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// The message did not decode to a packet.
    #[error("message is not a valid packet")]
    NoValidPacket,

    /// The handler callback failed.
    #[error("processing failed [{code}]: {message}")]
    ProcessingFailed {
        /// Code of the underlying [`RpcError`].
        code: String,
        /// Its message.
        message: String,
    },
}

impl ExecutionError {
    /// Machine-readable code.
    pub fn code(&self) -> &str {
        match self {
            Self::NoValidPacket => NO_VALID_PACKET,
            Self::ProcessingFailed { code, .. } => code,
        }
    }
}

impl From<&RpcError> for ExecutionError {
    fn from(err: &RpcError) -> Self {
        Self::ProcessingFailed {
            code: err.code().to_owned(),
            message: err.to_string(),
        }
    }
}

/// Handles packets routed to one dispatcher.
pub trait CallbackExecutor: Send + Sync {
    /// Called once per packet that carries error payloads.
    fn handle_error(&self, packet: &Packet, errors: &[ErrorPayload]);

    /// Called for every packet with its non-error payloads.
    fn execute_handle_callback(&self, packet: &Packet, payloads: &[Payload])
    -> Result<(), RpcError>;

    /// Run the full callback sequence for one decoded message.
    fn execute(&self, decoded: Option<&dyn Encodable>, errors: &mut Vec<ExecutionError>) {
        let Some(packet) = decoded.and_then(downcast_ref::<Packet>) else {
            errors.push(ExecutionError::NoValidPacket);
            return;
        };
        let (error_payloads, payloads) = packet.partition();
        if !error_payloads.is_empty() {
            self.handle_error(packet, &error_payloads);
        }
        if let Err(err) = self.execute_handle_callback(packet, &payloads) {
            errors.push(ExecutionError::from(&err));
        }
    }
}

/// What a dispatching tree node routes to.
#[derive(Clone)]
pub enum Route {
    /// A durable request handler.
    Request(Arc<RequestBinding>),
    /// The ephemeral reply collector of one outstanding request.
    Reply(Arc<ReplyDispatcher>),
    /// A notification handler.
    Notification(Arc<NotificationBinding>),
}

impl Route {
    /// The executor behind this route.
    pub fn executor(&self) -> &dyn CallbackExecutor {
        match self {
            Self::Request(binding) => binding.as_ref(),
            Self::Reply(dispatcher) => dispatcher.as_ref(),
            Self::Notification(binding) => binding.as_ref(),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Reply(_) => "reply",
            Self::Notification(_) => "notification",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use simbus_core::{ClientIdentifier, Subject};
    use simbus_protocol::{Header, IntegerValue, StringValue};

    #[derive(Default)]
    struct Probe {
        error_calls: Mutex<Vec<Vec<String>>>,
        callback_calls: Mutex<Vec<usize>>,
        fail: bool,
    }

    impl CallbackExecutor for Probe {
        fn handle_error(&self, _packet: &Packet, errors: &[ErrorPayload]) {
            self.error_calls
                .lock()
                .push(errors.iter().map(|e| e.code.clone()).collect());
        }

        fn execute_handle_callback(
            &self,
            _packet: &Packet,
            payloads: &[Payload],
        ) -> Result<(), RpcError> {
            self.callback_calls.lock().push(payloads.len());
            if self.fail {
                Err(RpcError::handler("BROKEN", "handler broke"))
            } else {
                Ok(())
            }
        }
    }

    fn packet() -> Packet {
        let id = ClientIdentifier::new(["lab"], "sim", "g", "c1").unwrap();
        Packet::new(Header::new(&Subject::parse("x").unwrap(), &id), Vec::new())
    }

    #[test]
    fn absent_object_records_no_valid_packet() {
        let probe = Probe::default();
        let mut errors = Vec::new();
        probe.execute(None, &mut errors);
        assert_eq!(errors, vec![ExecutionError::NoValidPacket]);
        assert!(probe.callback_calls.lock().is_empty());
        assert!(probe.error_calls.lock().is_empty());
    }

    #[test]
    fn non_packet_records_no_valid_packet() {
        let probe = Probe::default();
        let mut errors = Vec::new();
        probe.execute(Some(&StringValue::new("loose")), &mut errors);
        assert_eq!(errors, vec![ExecutionError::NoValidPacket]);
        assert!(probe.callback_calls.lock().is_empty());
    }

    #[test]
    fn clean_packet_skips_error_handler() {
        let probe = Probe::default();
        let mut errors = Vec::new();
        let packet = packet().with_payload(IntegerValue::new(1));
        probe.execute(Some(&packet), &mut errors);
        assert!(errors.is_empty());
        assert!(probe.error_calls.lock().is_empty());
        assert_eq!(*probe.callback_calls.lock(), vec![1]);
    }

    #[test]
    fn errors_partitioned_then_callback_still_runs() {
        let probe = Probe::default();
        let mut errors = Vec::new();
        let packet = packet()
            .with_payload(ErrorPayload::new("E1", "a"))
            .with_payload(IntegerValue::new(1))
            .with_payload(ErrorPayload::new("E2", "b"));
        probe.execute(Some(&packet), &mut errors);
        assert!(errors.is_empty());
        assert_eq!(*probe.error_calls.lock(), vec![vec!["E1", "E2"]]);
        assert_eq!(*probe.callback_calls.lock(), vec![1]);
    }

    #[test]
    fn callback_failure_records_one_processing_error() {
        let probe = Probe {
            fail: true,
            ..Probe::default()
        };
        let mut errors = Vec::new();
        probe.execute(Some(&packet()), &mut errors);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), "BROKEN");
        assert!(probe.error_calls.lock().is_empty());
    }

    #[test]
    fn accumulator_keeps_earlier_errors() {
        let probe = Probe::default();
        let mut errors = vec![ExecutionError::NoValidPacket];
        probe.execute(None, &mut errors);
        assert_eq!(errors.len(), 2);
    }
}
