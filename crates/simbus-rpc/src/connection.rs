//! Client connection.
//!
//! A [`Connection`] owns one transport and the per-client state built on it:
//! the dispatching tree, the publishing manager, the requester, and the
//! handler registry. Opening a connection subscribes to every topic the
//! client answers to (its own, its group broadcast, and the application
//! broadcast) and routes inbound messages through the tree.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use simbus_codec::{EncoderFactory, TypeRegistry};
use simbus_core::constants::DEFAULT_REQUEST_TIMEOUT_MS;
use simbus_core::{ClientIdentifier, Destination, LogContext, Subject, split_topic};
use simbus_protocol::{Header, Packet, Payload};
use simbus_settings::BusSettings;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::dispatch::DispatchingTree;
use crate::errors::RpcError;
use crate::executor::{ExecutionError, Route};
use crate::handlers::{NotificationHandler, RequestHandler, RequestHandlerRegistry};
use crate::publishing::PublishingManager;
use crate::requester::{DiscardReplies, ExpectedReplies, PendingRequest, ReplyCallback, RpcRequester};
use crate::transport::{ConnectionListener, MessageListener, Transport, TransportRegistry};

struct ConnectionInner {
    identity: ClientIdentifier,
    transport: Arc<dyn Transport>,
    encoders: Arc<EncoderFactory>,
    tree: Arc<DispatchingTree<Route>>,
    publisher: PublishingManager,
    requester: RpcRequester,
    handlers: RequestHandlerRegistry,
    log: LogContext,
}

impl ConnectionInner {
    fn dispatch(&self, topic: &str, payload: &[u8]) -> Vec<ExecutionError> {
        let _entered = self.log.enter();
        let mut errors = Vec::new();
        let path = split_topic(topic);
        let Some(route) = self.tree.get_dispatcher(&path) else {
            debug!(topic, "no dispatcher for topic");
            return errors;
        };
        let decoded = match self.encoders.decode_detected(payload) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                warn!(topic, bytes = payload.len(), error = %err, "failed to decode inbound message");
                None
            }
        };
        route.executor().execute(decoded.as_deref(), &mut errors);
        for err in &errors {
            warn!(topic, route = route.kind(), code = err.code(), error = %err, "inbound message failed");
        }
        errors
    }
}

/// Routes transport messages into a connection without keeping it alive.
struct InboundRouter {
    inner: Weak<ConnectionInner>,
}

impl MessageListener for InboundRouter {
    fn on_raw_message(&self, topic: &str, payload: &[u8]) {
        if let Some(inner) = self.inner.upgrade() {
            let _ = inner.dispatch(topic, payload);
        }
    }
}

/// Logs connection state changes for one client.
#[derive(Debug)]
pub struct LoggingConnectionListener {
    client: String,
}

impl LoggingConnectionListener {
    /// Listener tagging its events with `identity`.
    pub fn new(identity: &ClientIdentifier) -> Self {
        Self {
            client: identity.to_string(),
        }
    }
}

impl ConnectionListener for LoggingConnectionListener {
    fn on_connection_established(&self) {
        info!(client = %self.client, "connection established");
    }

    fn on_connection_lost(&self, cause: &str) {
        warn!(client = %self.client, cause, "connection lost");
    }

    fn on_disconnecting(&self) {
        info!(client = %self.client, "disconnecting");
    }
}

/// An open client connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
    request_timeout: Duration,
}

impl Connection {
    /// Connect `transport` as `identity` and subscribe to its topics.
    ///
    /// Must be called inside a tokio runtime; request timers run on it.
    pub fn open(
        identity: ClientIdentifier,
        transport: Arc<dyn Transport>,
        encoders: Arc<EncoderFactory>,
    ) -> Result<Self, RpcError> {
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        let tree = Arc::new(DispatchingTree::new(identity.clone()));
        let publisher = PublishingManager::new(Arc::clone(&encoders), transport.clone());
        let requester = RpcRequester::new(identity.clone(), Arc::clone(&tree), publisher.clone(), runtime);
        let handlers = RequestHandlerRegistry::new(identity.clone(), Arc::clone(&tree), publisher.clone());
        let log = LogContext::for_client(&identity);
        let inner = Arc::new(ConnectionInner {
            identity,
            transport,
            encoders,
            tree,
            publisher,
            requester,
            handlers,
            log,
        });

        let transport = &inner.transport;
        transport.add_connection_listener(Arc::new(LoggingConnectionListener::new(&inner.identity)));
        transport.set_message_listener(Arc::new(InboundRouter {
            inner: Arc::downgrade(&inner),
        }));
        transport.connect()?;
        let filters = inner.identity.subscription_filters();
        transport.subscribe(&filters)?;
        info!(client = %inner.identity, filters = ?filters, "connection opened");

        Ok(Self {
            inner,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        })
    }

    /// Open a connection described by `settings`.
    ///
    /// The transport comes from `transports`; payload types come from
    /// `types`.
    pub fn from_settings(
        settings: &BusSettings,
        transports: &TransportRegistry,
        types: Arc<TypeRegistry>,
    ) -> Result<Self, RpcError> {
        let identity = settings.client_identifier()?;
        let transport = transports.create(&settings.transport)?;
        let encoders = Arc::new(
            EncoderFactory::new(types, settings.default_codec).with_pool_capacity(settings.encoder_pool_size),
        );
        Ok(Self::open(identity, transport, encoders)?.with_request_timeout(settings.request_timeout()))
    }

    /// Use `timeout` for [`Connection::request`].
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Identity of this client.
    pub fn identity(&self) -> &ClientIdentifier {
        &self.inner.identity
    }

    /// Whether the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    /// Default timeout of [`Connection::request`].
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// The publishing manager of this connection.
    pub fn publisher(&self) -> &PublishingManager {
        &self.inner.publisher
    }

    /// Route one inbound message and return the failures it produced.
    ///
    /// Messages on topics without a dispatcher are ignored. Failures are
    /// also logged.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> Vec<ExecutionError> {
        self.inner.dispatch(topic, payload)
    }

    /// Publish a notification on `subject` to `destination`.
    pub fn publish_notification(
        &self,
        destination: &Destination,
        subject: &Subject,
        payloads: Vec<Payload>,
    ) -> Result<(), RpcError> {
        let packet = Packet::new(Header::new(subject, &self.inner.identity), payloads);
        let topic = destination.topic_for(&self.inner.identity, subject);
        self.inner.publisher.publish(&topic, &packet)
    }

    /// Send a request; see [`RpcRequester::send_request`].
    pub fn send_request(
        &self,
        destination: &Destination,
        subject: &Subject,
        payloads: Vec<Payload>,
        expected: ExpectedReplies,
        timeout: Duration,
        callback: Arc<dyn ReplyCallback>,
    ) -> Result<PendingRequest, RpcError> {
        self.inner
            .requester
            .send_request(destination, subject, payloads, expected, timeout, callback)
    }

    /// Send a request with the connection's default timeout and await its
    /// outcome through the returned handle.
    pub fn request(
        &self,
        destination: &Destination,
        subject: &Subject,
        payloads: Vec<Payload>,
        expected: ExpectedReplies,
    ) -> Result<PendingRequest, RpcError> {
        self.send_request(
            destination,
            subject,
            payloads,
            expected,
            self.request_timeout,
            Arc::new(DiscardReplies),
        )
    }

    /// Bind a request handler; see [`RequestHandlerRegistry`].
    pub fn register_request_handler(
        &self,
        subject: &Subject,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RpcError> {
        self.inner.handlers.register_request_handler(subject, handler)
    }

    /// Unbind a request handler. Returns whether it was bound.
    pub fn unregister_request_handler(&self, subject: &Subject, handler: &Arc<dyn RequestHandler>) -> bool {
        self.inner.handlers.unregister_request_handler(subject, handler)
    }

    /// Bind a notification handler.
    pub fn on_notification(
        &self,
        subject: &Subject,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<(), RpcError> {
        self.inner.handlers.register_notification_handler(subject, handler)
    }

    /// Unbind a notification handler. Returns whether it was bound.
    pub fn remove_notification_handler(&self, subject: &Subject, handler: &Arc<dyn NotificationHandler>) -> bool {
        self.inner.handlers.unregister_notification_handler(subject, handler)
    }

    /// Observe connection state changes.
    pub fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.inner.transport.add_connection_listener(listener);
    }

    /// Unsubscribe and disconnect. A closed connection stays closed.
    ///
    /// Outstanding requests still finish when their timers fire.
    pub fn close(&self) -> Result<(), RpcError> {
        let transport = &self.inner.transport;
        if !transport.is_connected() {
            return Ok(());
        }
        transport.unsubscribe(&self.inner.identity.subscription_filters())?;
        transport.disconnect()?;
        info!(client = %self.inner.identity, "connection closed");
        Ok(())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("identity", &self.inner.identity.to_string())
            .field("connected", &self.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}
