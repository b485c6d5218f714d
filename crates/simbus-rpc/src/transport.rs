//! Transport abstraction and the in-process broker.
//!
//! A [`Transport`] moves raw bytes on string topics. simbus never retries a
//! failed transport call; every failure surfaces as a single
//! [`TransportError`].
//!
//! [`InMemoryBroker`] connects any number of [`InMemoryTransport`]s inside
//! one process. Subscriptions use dotted filters where `+` matches exactly
//! one segment and `#` matches the rest of the topic. Delivery is inline on
//! the publishing thread.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;
use simbus_core::constants::TOPIC_SEPARATOR;
use simbus_core::{ConnectionId, TransportError, TransportOperation};
use simbus_settings::TransportSettings;
use tracing::{debug, trace};

use crate::errors::RpcError;

/// Receives raw inbound messages.
pub trait MessageListener: Send + Sync {
    /// Called for every message on a subscribed topic.
    fn on_raw_message(&self, topic: &str, payload: &[u8]);
}

/// Observes connection state changes.
pub trait ConnectionListener: Send + Sync {
    /// The transport connected.
    fn on_connection_established(&self) {}
    /// The connection dropped without a disconnect request.
    fn on_connection_lost(&self, _cause: &str) {}
    /// A disconnect was requested and is about to happen.
    fn on_disconnecting(&self) {}
}

/// The publish half of a transport.
pub trait TransportPublisher: Send + Sync {
    /// Publish `payload` on `topic`.
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// A publish/subscribe transport.
pub trait Transport: TransportPublisher {
    /// Establish the connection.
    fn connect(&self) -> Result<(), TransportError>;
    /// Tear the connection down.
    fn disconnect(&self) -> Result<(), TransportError>;
    /// Whether the transport is connected.
    fn is_connected(&self) -> bool;
    /// Add topic filters.
    fn subscribe(&self, filters: &[String]) -> Result<(), TransportError>;
    /// Remove topic filters.
    fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError>;
    /// Set the single listener receiving inbound messages.
    fn set_message_listener(&self, listener: Arc<dyn MessageListener>);
    /// Add a connection state listener.
    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>);
}

/// Whether a dotted `filter` matches a dotted `topic`.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_segments = topic.split(TOPIC_SEPARATOR);
    for part in filter.split(TOPIC_SEPARATOR) {
        match part {
            "#" => return true,
            "+" => {
                if topic_segments.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_segments.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    topic_segments.next().is_none()
}

// ─────────────────────────────────────────────────────────────────────────────
// In-memory broker
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Endpoint {
    filters: RwLock<Vec<String>>,
    listener: RwLock<Option<Arc<dyn MessageListener>>>,
}

impl Endpoint {
    fn accepts(&self, topic: &str) -> bool {
        self.filters.read().iter().any(|f| topic_matches(f, topic))
    }
}

/// Routes messages between in-process transports.
#[derive(Default)]
pub struct InMemoryBroker {
    endpoints: DashMap<ConnectionId, Arc<Endpoint>>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a transport attached to this broker.
    pub fn transport(self: &Arc<Self>) -> InMemoryTransport {
        InMemoryTransport {
            id: ConnectionId::next(),
            broker: Arc::clone(self),
            endpoint: Arc::new(Endpoint::default()),
            connected: AtomicBool::new(false),
            connection_listeners: RwLock::new(Vec::new()),
        }
    }

    /// Number of connected transports.
    pub fn connected_count(&self) -> usize {
        self.endpoints.len()
    }

    fn deliver(&self, topic: &str, payload: &[u8]) -> usize {
        // Snapshot first so listeners may publish without holding shard locks.
        let listeners: Vec<Arc<dyn MessageListener>> = self
            .endpoints
            .iter()
            .filter(|entry| entry.value().accepts(topic))
            .filter_map(|entry| entry.value().listener.read().clone())
            .collect();
        for listener in &listeners {
            listener.on_raw_message(topic, payload);
        }
        listeners.len()
    }
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("connected", &self.endpoints.len())
            .finish()
    }
}

/// A transport connected to an [`InMemoryBroker`].
pub struct InMemoryTransport {
    id: ConnectionId,
    broker: Arc<InMemoryBroker>,
    endpoint: Arc<Endpoint>,
    connected: AtomicBool,
    connection_listeners: RwLock<Vec<Arc<dyn ConnectionListener>>>,
}

impl InMemoryTransport {
    /// Unique id of this transport.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Drop the connection as if the broker went away.
    pub fn simulate_connection_lost(&self, cause: &str) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let _ = self.broker.endpoints.remove(&self.id);
            debug!(transport = %self.id, cause, "in-memory connection lost");
            for listener in self.listeners() {
                listener.on_connection_lost(cause);
            }
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn ConnectionListener>> {
        self.connection_listeners.read().clone()
    }

    fn ensure_connected(&self, operation: TransportOperation) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::not_connected(operation))
        }
    }
}

impl fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl TransportPublisher for InMemoryTransport {
    fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_connected(TransportOperation::Publish)?;
        let delivered = self.broker.deliver(topic, payload);
        trace!(transport = %self.id, topic, bytes = payload.len(), delivered, "published");
        Ok(())
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> Result<(), TransportError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self
            .broker
            .endpoints
            .insert(self.id, Arc::clone(&self.endpoint));
        debug!(transport = %self.id, "in-memory transport connected");
        for listener in self.listeners() {
            listener.on_connection_established();
        }
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Ok(());
        }
        for listener in self.listeners() {
            listener.on_disconnecting();
        }
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.broker.endpoints.remove(&self.id);
        debug!(transport = %self.id, "in-memory transport disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        self.ensure_connected(TransportOperation::Subscribe)?;
        let mut current = self.endpoint.filters.write();
        for filter in filters {
            if !current.contains(filter) {
                current.push(filter.clone());
            }
        }
        Ok(())
    }

    fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        self.ensure_connected(TransportOperation::Unsubscribe)?;
        self.endpoint.filters.write().retain(|f| !filters.contains(f));
        Ok(())
    }

    fn set_message_listener(&self, listener: Arc<dyn MessageListener>) {
        *self.endpoint.listener.write() = Some(listener);
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.connection_listeners.write().push(listener);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport registry
// ─────────────────────────────────────────────────────────────────────────────

/// Builds a transport from settings.
pub type TransportFactory =
    Arc<dyn Fn(&TransportSettings) -> Result<Arc<dyn Transport>, TransportError> + Send + Sync>;

/// A transport implementation available by name.
#[derive(Clone)]
pub struct TransportDescriptor {
    /// Name used in settings to select this transport.
    pub access_name: String,
    /// One-line description.
    pub description: String,
    /// Whether the host setting is a placeholder rather than a network host.
    pub pseudo_host: bool,
    /// Constructor.
    pub factory: TransportFactory,
}

impl fmt::Debug for TransportDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportDescriptor")
            .field("access_name", &self.access_name)
            .field("description", &self.description)
            .field("pseudo_host", &self.pseudo_host)
            .finish_non_exhaustive()
    }
}

/// Explicit table of available transports.
#[derive(Clone, Debug, Default)]
pub struct TransportRegistry {
    descriptors: HashMap<String, TransportDescriptor>,
}

impl TransportRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry offering the in-process transport as `memory`.
    pub fn with_in_memory(broker: Arc<InMemoryBroker>) -> Self {
        let mut registry = Self::new();
        registry.register(TransportDescriptor {
            access_name: "memory".to_string(),
            description: "in-process broker, delivery on the publishing thread".to_string(),
            pseudo_host: true,
            factory: Arc::new(move |_settings: &TransportSettings| {
                Ok(Arc::new(broker.transport()) as Arc<dyn Transport>)
            }),
        });
        registry
    }

    /// Add or replace a descriptor.
    pub fn register(&mut self, descriptor: TransportDescriptor) {
        if let Some(previous) = self
            .descriptors
            .insert(descriptor.access_name.clone(), descriptor)
        {
            debug!(name = %previous.access_name, "transport descriptor replaced");
        }
    }

    /// Look up a descriptor.
    pub fn get(&self, access_name: &str) -> Option<&TransportDescriptor> {
        self.descriptors.get(access_name)
    }

    /// Registered access names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the transport selected by `settings`.
    pub fn create(&self, settings: &TransportSettings) -> Result<Arc<dyn Transport>, RpcError> {
        let descriptor =
            self.get(&settings.access_name)
                .ok_or_else(|| RpcError::UnknownTransport {
                    name: settings.access_name.clone(),
                })?;
        debug!(
            name = %descriptor.access_name,
            host = %settings.host,
            pseudo_host = descriptor.pseudo_host,
            "creating transport"
        );
        Ok((descriptor.factory)(settings)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MessageListener for Recorder {
        fn on_raw_message(&self, topic: &str, payload: &[u8]) {
            self.messages.lock().push((topic.to_owned(), payload.to_vec()));
        }
    }

    #[derive(Default)]
    struct StateLog {
        events: Mutex<Vec<String>>,
    }

    impl ConnectionListener for StateLog {
        fn on_connection_established(&self) {
            self.events.lock().push("established".into());
        }
        fn on_connection_lost(&self, cause: &str) {
            self.events.lock().push(format!("lost:{cause}"));
        }
        fn on_disconnecting(&self) {
            self.events.lock().push("disconnecting".into());
        }
    }

    fn connected(broker: &Arc<InMemoryBroker>, filters: &[&str]) -> (InMemoryTransport, Arc<Recorder>) {
        let transport = broker.transport();
        let recorder = Arc::new(Recorder::default());
        transport.set_message_listener(recorder.clone());
        transport.connect().unwrap();
        let filters: Vec<String> = filters.iter().map(|f| (*f).to_owned()).collect();
        transport.subscribe(&filters).unwrap();
        (transport, recorder)
    }

    #[test]
    fn filter_matching() {
        assert!(topic_matches("a.b.c", "a.b.c"));
        assert!(!topic_matches("a.b.c", "a.b"));
        assert!(!topic_matches("a.b", "a.b.c"));
        assert!(topic_matches("a.+.c", "a.x.c"));
        assert!(!topic_matches("a.+", "a"));
        assert!(topic_matches("a.#", "a.b.c.d"));
        assert!(topic_matches("a.#", "a"));
        assert!(!topic_matches("a.#", "b.c"));
    }

    #[test]
    fn delivers_to_matching_subscribers_once() {
        let broker = InMemoryBroker::new();
        let (publisher, _) = connected(&broker, &[]);
        let (_a, a) = connected(&broker, &["s.g.c1.#", "s.g.+.x"]);
        let (_b, b) = connected(&broker, &["s.g.c2.#"]);

        publisher.publish("s.g.c1.x", b"hi").unwrap();
        assert_eq!(a.messages.lock().len(), 1);
        assert!(b.messages.lock().is_empty());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = InMemoryBroker::new();
        let (transport, recorder) = connected(&broker, &["t.#"]);
        transport.unsubscribe(&["t.#".to_owned()]).unwrap();
        transport.publish("t.x", b"1").unwrap();
        assert!(recorder.messages.lock().is_empty());
    }

    #[test]
    fn publish_requires_connection() {
        let broker = InMemoryBroker::new();
        let transport = broker.transport();
        let err = transport.publish("a", b"x").unwrap_err();
        assert_eq!(err.operation, TransportOperation::Publish);
    }

    #[test]
    fn connection_listeners_see_lifecycle() {
        let broker = InMemoryBroker::new();
        let transport = broker.transport();
        let log = Arc::new(StateLog::default());
        transport.add_connection_listener(log.clone());

        transport.connect().unwrap();
        assert_eq!(broker.connected_count(), 1);
        transport.disconnect().unwrap();
        assert_eq!(broker.connected_count(), 0);
        transport.connect().unwrap();
        transport.simulate_connection_lost("broker restart");
        assert!(!transport.is_connected());

        assert_eq!(
            *log.events.lock(),
            vec!["established", "disconnecting", "established", "lost:broker restart"]
        );
    }

    #[test]
    fn registry_creates_by_access_name() {
        let registry = TransportRegistry::with_in_memory(InMemoryBroker::new());
        assert_eq!(registry.names(), vec!["memory"]);
        assert!(registry.get("memory").unwrap().pseudo_host);

        let transport = registry.create(&TransportSettings::default()).unwrap();
        assert!(!transport.is_connected());

        let settings = TransportSettings {
            access_name: "mqtt".into(),
            ..TransportSettings::default()
        };
        assert_matches!(
            registry.create(&settings).err(),
            Some(RpcError::UnknownTransport { name }) if name == "mqtt"
        );
    }
}
