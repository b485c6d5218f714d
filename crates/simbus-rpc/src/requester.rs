//! Outbound requests and timeout-bounded reply aggregation.
//!
//! Each request gets a fresh correlation id and an ephemeral
//! [`ReplyDispatcher`] attached at `<own identity>.rpc-reply.<id>`. Replies
//! accumulate until the request's timer fires; there is no early completion.
//! When the timer fires the dispatcher is detached from the tree first, then
//! its state is closed under the mutex, so every concurrent reply is either
//! fully counted or fully excluded.
//!
//! Phases: `Created -> Sent -> AccumulatingReplies -> Detached`. A reply may
//! arrive before the request is marked sent when the transport delivers
//! inline; the phase then skips straight to `AccumulatingReplies`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use simbus_core::constants::REPLY_SEGMENT;
use simbus_core::{ClientIdentifier, CorrelationId, Destination, LogContext, Subject};
use simbus_protocol::{ErrorPayload, Packet, Payload, RpcHeader};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, warn};

use crate::dispatch::DispatchingTree;
use crate::errors::RpcError;
use crate::executor::{CallbackExecutor, Route};
use crate::publishing::PublishingManager;

/// How many replies a request expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedReplies {
    /// Exactly this many; any other count is reported as a mismatch.
    Exactly(usize),
    /// Any number, including none.
    Unlimited,
}

impl ExpectedReplies {
    /// Map a signed count: negative means unlimited.
    pub fn from_count(count: i64) -> Self {
        usize::try_from(count).map_or(Self::Unlimited, Self::Exactly)
    }

    /// Whether `received` replies satisfy the expectation.
    pub fn is_satisfied_by(self, received: usize) -> bool {
        match self {
            Self::Exactly(expected) => expected == received,
            Self::Unlimited => true,
        }
    }
}

/// Receives the outcome of one request.
pub trait ReplyCallback: Send + Sync {
    /// Called once when the request times out, with every counted reply in
    /// arrival order.
    fn handle_replies(&self, request: &RpcHeader, replies: &[Packet]);

    /// Called once per reply that carries errors, with all of that reply's
    /// errors in order, and once for a reply count mismatch.
    fn handle_error(&self, request: &RpcHeader, errors: &[ErrorPayload]);
}

/// Callback that ignores everything; the outcome is still available
/// through [`PendingRequest::wait`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardReplies;

impl ReplyCallback for DiscardReplies {
    fn handle_replies(&self, _request: &RpcHeader, _replies: &[Packet]) {}

    fn handle_error(&self, _request: &RpcHeader, _errors: &[ErrorPayload]) {}
}

/// How a finished request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// The reply count satisfied the expectation.
    Complete,
    /// An exact count was expected and a different one arrived.
    CountMismatch,
}

/// Lifecycle of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPhase {
    /// Registered, not yet published.
    Created,
    /// Published, no reply yet.
    Sent,
    /// At least one reply counted.
    AccumulatingReplies,
    /// Detached from the tree; no further replies are counted.
    Detached(Completion),
}

/// Final result of a request, delivered through [`PendingRequest`].
#[derive(Clone, Debug)]
pub struct RequestOutcome {
    /// Correlation id of the request.
    pub correlation_id: CorrelationId,
    /// Replies counted before the timeout, in arrival order.
    pub replies: Vec<Packet>,
    /// What the caller asked for.
    pub expected: ExpectedReplies,
    /// How the request ended.
    pub completion: Completion,
}

impl RequestOutcome {
    /// The replies, or a [`RpcError::ReplyCountMismatch`].
    pub fn into_replies(self) -> Result<Vec<Packet>, RpcError> {
        match (self.completion, self.expected) {
            (Completion::CountMismatch, ExpectedReplies::Exactly(expected)) => {
                Err(RpcError::ReplyCountMismatch {
                    expected,
                    received: self.replies.len(),
                })
            }
            _ => Ok(self.replies),
        }
    }
}

/// Handle to an outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<RequestOutcome>,
}

impl PendingRequest {
    /// Correlation id of the request.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Wait for the request's timer to fire.
    ///
    /// Fails only when the runtime dropped the timer task before it ran.
    pub async fn wait(self) -> Result<RequestOutcome, RpcError> {
        self.receiver.await.map_err(|_| RpcError::NoRuntime)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ReplyDispatcher
// ─────────────────────────────────────────────────────────────────────────────

struct ReplyState {
    phase: RequestPhase,
    replies: Vec<Packet>,
}

impl ReplyState {
    fn is_closed(&self) -> bool {
        matches!(self.phase, RequestPhase::Detached(_))
    }
}

/// Collects the replies of one outstanding request.
pub struct ReplyDispatcher {
    request: RpcHeader,
    correlation_id: CorrelationId,
    expected: ExpectedReplies,
    state: Mutex<ReplyState>,
    callback: Arc<dyn ReplyCallback>,
    outcome: Mutex<Option<oneshot::Sender<RequestOutcome>>>,
}

impl ReplyDispatcher {
    fn new(
        request: RpcHeader,
        correlation_id: CorrelationId,
        expected: ExpectedReplies,
        callback: Arc<dyn ReplyCallback>,
        outcome: oneshot::Sender<RequestOutcome>,
    ) -> Self {
        Self {
            request,
            correlation_id,
            expected,
            state: Mutex::new(ReplyState {
                phase: RequestPhase::Created,
                replies: Vec::new(),
            }),
            callback,
            outcome: Mutex::new(Some(outcome)),
        }
    }

    /// Correlation id this dispatcher collects for.
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Current phase.
    pub fn phase(&self) -> RequestPhase {
        self.state.lock().phase
    }

    /// Replies counted so far.
    pub fn reply_count(&self) -> usize {
        self.state.lock().replies.len()
    }

    fn mark_sent(&self) {
        let mut state = self.state.lock();
        if state.phase == RequestPhase::Created {
            state.phase = RequestPhase::Sent;
        }
    }

    /// Close the state, deliver the replies, and report a count mismatch.
    ///
    /// Only the first call has an effect.
    fn finish(&self) {
        let (replies, completion) = {
            let mut state = self.state.lock();
            if state.is_closed() {
                return;
            }
            let replies = std::mem::take(&mut state.replies);
            let completion = if self.expected.is_satisfied_by(replies.len()) {
                Completion::Complete
            } else {
                Completion::CountMismatch
            };
            state.phase = RequestPhase::Detached(completion);
            (replies, completion)
        };

        debug!(
            correlation_id = %self.correlation_id,
            replies = replies.len(),
            expected = ?self.expected,
            "request timed out"
        );
        self.callback.handle_replies(&self.request, &replies);
        if let (Completion::CountMismatch, ExpectedReplies::Exactly(expected)) = (completion, self.expected) {
            let err = RpcError::ReplyCountMismatch {
                expected,
                received: replies.len(),
            };
            warn!(correlation_id = %self.correlation_id, error = %err, "reply count mismatch");
            self.callback.handle_error(&self.request, &[err.to_error_payload()]);
        }

        if let Some(sender) = self.outcome.lock().take() {
            let _ = sender.send(RequestOutcome {
                correlation_id: self.correlation_id.clone(),
                replies,
                expected: self.expected,
                completion,
            });
        }
    }

    fn check_correlation(&self, packet: &Packet) -> Result<(), RpcError> {
        match packet.header().as_rpc() {
            Some(rpc) if rpc.packet_id() == self.correlation_id.as_str() => Ok(()),
            Some(rpc) => Err(RpcError::protocol(format!(
                "reply for '{}' routed to request '{}'",
                rpc.packet_id(),
                self.correlation_id
            ))),
            None => Err(RpcError::protocol("reply without rpc header")),
        }
    }
}

impl CallbackExecutor for ReplyDispatcher {
    fn handle_error(&self, packet: &Packet, errors: &[ErrorPayload]) {
        if let Err(err) = self.check_correlation(packet) {
            debug!(correlation_id = %self.correlation_id, error = %err, "errors of a foreign reply dropped");
            return;
        }
        if self.state.lock().is_closed() {
            debug!(correlation_id = %self.correlation_id, "late error reply ignored");
            return;
        }
        self.callback.handle_error(&self.request, errors);
    }

    fn execute_handle_callback(&self, packet: &Packet, _payloads: &[Payload]) -> Result<(), RpcError> {
        self.check_correlation(packet)?;
        let mut state = self.state.lock();
        if state.is_closed() {
            debug!(correlation_id = %self.correlation_id, "late reply ignored");
            return Ok(());
        }
        state.replies.push(packet.clone());
        state.phase = RequestPhase::AccumulatingReplies;
        Ok(())
    }
}

impl fmt::Debug for ReplyDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyDispatcher")
            .field("correlation_id", &self.correlation_id)
            .field("expected", &self.expected)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RpcRequester
// ─────────────────────────────────────────────────────────────────────────────

/// Sends requests and schedules their reply aggregation.
#[derive(Clone)]
pub struct RpcRequester {
    identity: ClientIdentifier,
    tree: Arc<DispatchingTree<Route>>,
    publisher: PublishingManager,
    runtime: Handle,
    log: LogContext,
}

impl RpcRequester {
    /// Requester publishing through `publisher` and attaching reply
    /// dispatchers to `tree`. Timers run on `runtime`.
    pub fn new(
        identity: ClientIdentifier,
        tree: Arc<DispatchingTree<Route>>,
        publisher: PublishingManager,
        runtime: Handle,
    ) -> Self {
        let log = LogContext::for_client(&identity);
        Self {
            identity,
            tree,
            publisher,
            runtime,
            log,
        }
    }

    /// Requester bound to the current tokio runtime.
    pub fn with_current_runtime(
        identity: ClientIdentifier,
        tree: Arc<DispatchingTree<Route>>,
        publisher: PublishingManager,
    ) -> Result<Self, RpcError> {
        let runtime = Handle::try_current().map_err(|_| RpcError::NoRuntime)?;
        Ok(Self::new(identity, tree, publisher, runtime))
    }

    /// Tree path of the reply dispatcher for `correlation_id`.
    pub fn reply_path(&self, correlation_id: &CorrelationId) -> Vec<String> {
        let mut path = self.identity.topic_prefix();
        path.push(REPLY_SEGMENT.to_owned());
        path.push(correlation_id.to_string());
        path
    }

    /// Publish a request and collect replies until `timeout` elapses.
    ///
    /// On publish failure the reply dispatcher is detached again and the
    /// error is returned; no timer is scheduled.
    pub fn send_request(
        &self,
        destination: &Destination,
        subject: &Subject,
        payloads: Vec<Payload>,
        expected: ExpectedReplies,
        timeout: Duration,
        callback: Arc<dyn ReplyCallback>,
    ) -> Result<PendingRequest, RpcError> {
        let _entered = self.log.enter();
        let correlation_id = CorrelationId::new();
        let header = RpcHeader::new(subject, &self.identity, destination, &correlation_id);
        let packet = Packet::new(header.clone(), payloads);
        let (sender, receiver) = oneshot::channel();
        let dispatcher = Arc::new(ReplyDispatcher::new(
            header,
            correlation_id.clone(),
            expected,
            callback,
            sender,
        ));

        let reply_path = self.reply_path(&correlation_id);
        self.tree
            .add_dispatcher(&reply_path, Route::Reply(Arc::clone(&dispatcher)))?;

        let topic = destination.topic_for(&self.identity, subject);
        if let Err(err) = self.publisher.publish(&topic, &packet) {
            let _ = self
                .tree
                .remove_dispatcher_if(&reply_path, |route| is_same_reply(route, &dispatcher));
            warn!(correlation_id = %correlation_id, subject = %subject, error = %err, "request publish failed");
            return Err(err);
        }
        dispatcher.mark_sent();
        debug!(
            correlation_id = %correlation_id,
            subject = %subject,
            expected = ?expected,
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "request sent"
        );

        let tree = Arc::clone(&self.tree);
        let span = self.log.span().clone();
        let _ = self.runtime.spawn(
            async move {
                tokio::time::sleep(timeout).await;
                let _ = tree.remove_dispatcher_if(&reply_path, |route| is_same_reply(route, &dispatcher));
                dispatcher.finish();
            }
            .instrument(span),
        );

        Ok(PendingRequest {
            correlation_id,
            receiver,
        })
    }
}

impl fmt::Debug for RpcRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcRequester")
            .field("identity", &self.identity.to_string())
            .finish_non_exhaustive()
    }
}

fn is_same_reply(route: &Route, dispatcher: &Arc<ReplyDispatcher>) -> bool {
    matches!(route, Route::Reply(attached) if Arc::ptr_eq(attached, dispatcher))
}
