//! Durable request and notification handlers.
//!
//! Handlers are attached to the dispatching tree at their subject. A request
//! handler's reply payloads are published back to
//! `<requester identity>.rpc-reply.<correlation id>`; when the handler fails
//! the reply carries a single [`ErrorPayload`] instead.

use std::fmt;
use std::sync::Arc;

use simbus_core::constants::REPLY_SEGMENT;
use simbus_core::{ClientIdentifier, Subject};
use simbus_protocol::{ErrorPayload, Packet, PacketHeader, Payload, RpcHeader};
use tracing::{debug, warn};

use crate::dispatch::DispatchingTree;
use crate::errors::{DispatchError, RpcError};
use crate::executor::{CallbackExecutor, Route};
use crate::publishing::PublishingManager;

/// Answers requests on one subject.
pub trait RequestHandler: Send + Sync {
    /// Produce the reply payloads for `request`.
    fn handle_request(&self, request: &RpcHeader, payloads: &[Payload]) -> Result<Vec<Payload>, RpcError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&RpcHeader, &[Payload]) -> Result<Vec<Payload>, RpcError> + Send + Sync,
{
    fn handle_request(&self, request: &RpcHeader, payloads: &[Payload]) -> Result<Vec<Payload>, RpcError> {
        self(request, payloads)
    }
}

/// Consumes notifications on one subject.
pub trait NotificationHandler: Send + Sync {
    /// Handle one notification's non-error payloads.
    fn handle_notification(&self, header: &PacketHeader, payloads: &[Payload]) -> Result<(), RpcError>;
}

impl<F> NotificationHandler for F
where
    F: Fn(&PacketHeader, &[Payload]) -> Result<(), RpcError> + Send + Sync,
{
    fn handle_notification(&self, header: &PacketHeader, payloads: &[Payload]) -> Result<(), RpcError> {
        self(header, payloads)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bindings
// ─────────────────────────────────────────────────────────────────────────────

/// A request handler attached to the tree.
pub struct RequestBinding {
    subject: Subject,
    responder: ClientIdentifier,
    handler: Arc<dyn RequestHandler>,
    publisher: PublishingManager,
}

impl RequestBinding {
    /// Subject the handler answers.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    fn reply(&self, request: &RpcHeader, payloads: Vec<Payload>) -> Result<(), RpcError> {
        let mut topic = request.source().to_vec();
        topic.push(REPLY_SEGMENT.to_owned());
        topic.push(request.packet_id().to_owned());
        let packet = Packet::new(RpcHeader::reply_to(request, &self.responder), payloads);
        self.publisher.publish(&topic, &packet)
    }
}

impl CallbackExecutor for RequestBinding {
    fn handle_error(&self, packet: &Packet, errors: &[ErrorPayload]) {
        for error in errors {
            warn!(
                subject = %self.subject,
                packet_id = packet.header().packet_id().unwrap_or_default(),
                error = %error,
                "request carried an error payload"
            );
        }
    }

    fn execute_handle_callback(&self, packet: &Packet, payloads: &[Payload]) -> Result<(), RpcError> {
        let request = packet
            .header()
            .as_rpc()
            .ok_or_else(|| RpcError::protocol(format!("request on '{}' without rpc header", self.subject)))?;
        request
            .validate()
            .map_err(|err| RpcError::protocol(format!("malformed request on '{}': {err}", self.subject)))?;
        match self.handler.handle_request(request, payloads) {
            Ok(replies) => {
                debug!(subject = %self.subject, packet_id = request.packet_id(), replies = replies.len(), "request handled");
                self.reply(request, replies)
            }
            Err(err) => {
                warn!(subject = %self.subject, packet_id = request.packet_id(), error = %err, "request handler failed");
                self.reply(request, vec![Arc::new(err.to_error_payload()) as Payload])?;
                Err(err)
            }
        }
    }
}

impl fmt::Debug for RequestBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBinding")
            .field("subject", &self.subject.to_string())
            .finish_non_exhaustive()
    }
}

/// A notification handler attached to the tree.
pub struct NotificationBinding {
    subject: Subject,
    handler: Arc<dyn NotificationHandler>,
}

impl NotificationBinding {
    /// Subject the handler consumes.
    pub fn subject(&self) -> &Subject {
        &self.subject
    }
}

impl CallbackExecutor for NotificationBinding {
    fn handle_error(&self, _packet: &Packet, errors: &[ErrorPayload]) {
        for error in errors {
            warn!(subject = %self.subject, error = %error, "notification carried an error payload");
        }
    }

    fn execute_handle_callback(&self, packet: &Packet, payloads: &[Payload]) -> Result<(), RpcError> {
        self.handler.handle_notification(packet.header(), payloads)
    }
}

impl fmt::Debug for NotificationBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBinding")
            .field("subject", &self.subject.to_string())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Attaches and detaches durable handlers.
#[derive(Clone)]
pub struct RequestHandlerRegistry {
    identity: ClientIdentifier,
    tree: Arc<DispatchingTree<Route>>,
    publisher: PublishingManager,
}

impl RequestHandlerRegistry {
    /// Registry for `identity`, replying through `publisher`.
    pub fn new(
        identity: ClientIdentifier,
        tree: Arc<DispatchingTree<Route>>,
        publisher: PublishingManager,
    ) -> Self {
        Self {
            identity,
            tree,
            publisher,
        }
    }

    /// Bind `handler` to `subject`.
    ///
    /// Fails with [`RpcError::DuplicateHandler`] when any handler is already
    /// attached there.
    pub fn register_request_handler(
        &self,
        subject: &Subject,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcError> {
        let binding = RequestBinding {
            subject: subject.clone(),
            responder: self.identity.clone(),
            handler,
            publisher: self.publisher.clone(),
        };
        self.attach(subject, Route::Request(Arc::new(binding)))?;
        debug!(subject = %subject, "request handler registered");
        Ok(())
    }

    /// Detach `handler` from `subject`.
    ///
    /// Does nothing when a different handler, or none, is attached there.
    /// Returns whether a binding was removed.
    pub fn unregister_request_handler(&self, subject: &Subject, handler: &Arc<dyn RequestHandler>) -> bool {
        let removed = self
            .tree
            .remove_dispatcher_if(subject.segments(), |route| {
                matches!(route, Route::Request(binding) if Arc::ptr_eq(&binding.handler, handler))
            })
            .is_some();
        if removed {
            debug!(subject = %subject, "request handler unregistered");
        }
        removed
    }

    /// Bind a notification `handler` to `subject`.
    pub fn register_notification_handler(
        &self,
        subject: &Subject,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), RpcError> {
        let binding = NotificationBinding {
            subject: subject.clone(),
            handler,
        };
        self.attach(subject, Route::Notification(Arc::new(binding)))?;
        debug!(subject = %subject, "notification handler registered");
        Ok(())
    }

    /// Detach a notification `handler` from `subject`.
    pub fn unregister_notification_handler(
        &self,
        subject: &Subject,
        handler: &Arc<dyn NotificationHandler>,
    ) -> bool {
        self.tree
            .remove_dispatcher_if(subject.segments(), |route| {
                matches!(route, Route::Notification(binding) if Arc::ptr_eq(&binding.handler, handler))
            })
            .is_some()
    }

    fn attach(&self, subject: &Subject, route: Route) -> Result<(), RpcError> {
        self.tree
            .add_dispatcher(subject.segments(), route)
            .map_err(|err| match err {
                DispatchError::AlreadyRegistered { .. } => RpcError::DuplicateHandler {
                    subject: subject.to_string(),
                },
                other @ DispatchError::RootPath => other.into(),
            })
    }
}

impl fmt::Debug for RequestHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandlerRegistry")
            .field("identity", &self.identity.to_string())
            .finish_non_exhaustive()
    }
}
