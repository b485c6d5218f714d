//! # simbus-rpc
//!
//! The client runtime of the bus.
//!
//! - [`transport`]: the [`Transport`] trait, the in-process broker, and the
//!   explicit [`TransportRegistry`]
//! - [`publishing`]: validate, encode, and publish packets
//! - [`dispatch`]: the concurrent topic trie routing inbound packets
//! - [`executor`]: the per-message callback sequence
//! - [`requester`]: outbound requests with timeout-bounded reply aggregation
//! - [`handlers`]: durable request and notification handlers
//! - [`connection`]: one client's transport plus all of the above
//!
//! Inbound messages are handled on the thread the transport delivers them
//! on. No lock is held while publishing or while running a handler, so an
//! inline transport may deliver a reply before `publish` returns.

#![deny(unsafe_code)]

pub mod connection;
pub mod dispatch;
pub mod errors;
pub mod executor;
pub mod handlers;
pub mod publishing;
pub mod requester;
pub mod transport;

pub use connection::{Connection, LoggingConnectionListener};
pub use dispatch::DispatchingTree;
pub use errors::{DispatchError, RpcError};
pub use executor::{CallbackExecutor, ExecutionError, Route};
pub use handlers::{
    NotificationBinding, NotificationHandler, RequestBinding, RequestHandler, RequestHandlerRegistry,
};
pub use publishing::PublishingManager;
pub use requester::{
    Completion, DiscardReplies, ExpectedReplies, PendingRequest, ReplyCallback, ReplyDispatcher,
    RequestOutcome, RequestPhase, RpcRequester,
};
pub use transport::{
    ConnectionListener, InMemoryBroker, InMemoryTransport, MessageListener, Transport,
    TransportDescriptor, TransportFactory, TransportPublisher, TransportRegistry, topic_matches,
};
