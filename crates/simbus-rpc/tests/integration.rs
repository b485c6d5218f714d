//! End-to-end tests: several connections sharing one in-memory broker.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use parking_lot::Mutex;

use simbus_codec::{EncoderFactory, EncoderKind, downcast_ref};
use simbus_core::constants::REPLY_SEGMENT;
use simbus_core::{ClientIdentifier, Destination, Subject};
use simbus_protocol::{
    ErrorPayload, IntegerValue, Packet, PacketHeader, Payload, RpcHeader, StringValue,
    standard_registry,
};
use simbus_rpc::errors::REPLY_COUNT_MISMATCH;
use simbus_rpc::{
    Completion, Connection, ExecutionError, ExpectedReplies, InMemoryBroker, NotificationHandler,
    ReplyCallback, RequestHandler, RpcError,
};

const TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Default)]
struct RecordingCallback {
    batches: Mutex<Vec<usize>>,
    errors: Mutex<Vec<Vec<String>>>,
}

impl ReplyCallback for RecordingCallback {
    fn handle_replies(&self, _request: &RpcHeader, replies: &[Packet]) {
        self.batches.lock().push(replies.len());
    }

    fn handle_error(&self, _request: &RpcHeader, errors: &[ErrorPayload]) {
        self.errors.lock().push(errors.iter().map(|e| e.code.clone()).collect());
    }
}

struct Bus {
    broker: Arc<InMemoryBroker>,
    encoders: Arc<EncoderFactory>,
}

impl Bus {
    fn new() -> Self {
        Self {
            broker: InMemoryBroker::new(),
            encoders: Arc::new(EncoderFactory::new(
                Arc::new(standard_registry()),
                EncoderKind::Json,
            )),
        }
    }

    fn join(&self, group: &str, client: &str) -> Connection {
        let identity = ClientIdentifier::new(["lab"], "sim", group, client).unwrap();
        Connection::open(
            identity,
            Arc::new(self.broker.transport()),
            Arc::clone(&self.encoders),
        )
        .unwrap()
    }
}

fn step() -> Subject {
    Subject::parse("sim.step").unwrap()
}

/// Replies with the client id of the responder.
fn echo_client(connection: &Connection) -> Arc<dyn RequestHandler> {
    let client = connection.identity().client_id().to_owned();
    Arc::new(
        move |_request: &RpcHeader, _payloads: &[Payload]| -> Result<Vec<Payload>, RpcError> {
            Ok(vec![Arc::new(StringValue::new(client.clone())) as Payload])
        },
    )
}

fn plant_with_responders(bus: &Bus, count: usize) -> Vec<Connection> {
    (1..=count)
        .map(|i| {
            let responder = bus.join("plant", &format!("p{i}"));
            responder
                .register_request_handler(&step(), echo_client(&responder))
                .unwrap();
            responder
        })
        .collect()
}

fn reply_values(replies: &[Packet]) -> Vec<String> {
    let mut values: Vec<String> = replies
        .iter()
        .flat_map(|packet| packet.payloads().iter())
        .filter_map(|payload| downcast_ref::<StringValue>(payload.as_ref()))
        .map(|value| value.value.clone())
        .collect();
    values.sort();
    values
}

#[tokio::test(start_paused = true)]
async fn group_request_collects_every_reply() {
    let bus = Bus::new();
    let _responders = plant_with_responders(&bus, 3);
    let controller = bus.join("ctrl", "c1");
    let callback = Arc::new(RecordingCallback::default());

    let pending = controller
        .send_request(
            &Destination::group("plant"),
            &step(),
            Vec::new(),
            ExpectedReplies::Unlimited,
            TIMEOUT,
            callback.clone(),
        )
        .unwrap();
    let outcome = pending.wait().await.unwrap();

    assert_eq!(outcome.completion, Completion::Complete);
    assert_eq!(reply_values(&outcome.replies), vec!["p1", "p2", "p3"]);
    assert_eq!(*callback.batches.lock(), vec![3]);
    assert!(callback.errors.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unlimited_with_no_responders_never_raises() {
    let bus = Bus::new();
    let controller = bus.join("ctrl", "c1");
    let callback = Arc::new(RecordingCallback::default());

    let outcome = controller
        .send_request(
            &Destination::group("plant"),
            &step(),
            Vec::new(),
            ExpectedReplies::from_count(-1),
            TIMEOUT,
            callback.clone(),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.completion, Completion::Complete);
    assert!(outcome.replies.is_empty());
    assert_eq!(*callback.batches.lock(), vec![0]);
    assert!(callback.errors.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exact_count_mismatch_raises_once() {
    let bus = Bus::new();
    let _responders = plant_with_responders(&bus, 3);
    let controller = bus.join("ctrl", "c1");
    let callback = Arc::new(RecordingCallback::default());

    let outcome = controller
        .send_request(
            &Destination::group("plant"),
            &step(),
            Vec::new(),
            ExpectedReplies::Exactly(5),
            TIMEOUT,
            callback.clone(),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.completion, Completion::CountMismatch);
    assert_eq!(*callback.errors.lock(), vec![vec![REPLY_COUNT_MISMATCH]]);
    assert_eq!(*callback.batches.lock(), vec![3]);
    assert_matches!(
        outcome.into_replies(),
        Err(RpcError::ReplyCountMismatch { expected: 5, received: 3 })
    );
}

#[tokio::test(start_paused = true)]
async fn exact_count_match_is_complete() {
    let bus = Bus::new();
    let _responders = plant_with_responders(&bus, 3);
    let controller = bus.join("ctrl", "c1");
    let callback = Arc::new(RecordingCallback::default());

    let outcome = controller
        .send_request(
            &Destination::group("plant"),
            &step(),
            Vec::new(),
            ExpectedReplies::Exactly(3),
            TIMEOUT,
            callback.clone(),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.completion, Completion::Complete);
    assert!(callback.errors.lock().is_empty());
    assert_eq!(outcome.into_replies().unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn replies_after_timeout_are_excluded() {
    let bus = Bus::new();
    let controller = bus.join("ctrl", "c1");
    let responder = bus.join("plant", "p1");

    // Capture the request without answering it right away.
    let captured: Arc<Mutex<Option<RpcHeader>>> = Arc::default();
    let sink = Arc::clone(&captured);
    let silent: Arc<dyn NotificationHandler> = Arc::new(
        move |header: &PacketHeader, _payloads: &[Payload]| -> Result<(), RpcError> {
            *sink.lock() = header.as_rpc().cloned();
            Ok(())
        },
    );
    responder.on_notification(&step(), silent).unwrap();

    let callback = Arc::new(RecordingCallback::default());
    let pending = controller
        .send_request(
            &Destination::client("plant", "p1"),
            &step(),
            Vec::new(),
            ExpectedReplies::Unlimited,
            TIMEOUT,
            callback.clone(),
        )
        .unwrap();
    let request = captured.lock().clone().unwrap();
    let reply = |value: i64| {
        let mut topic = request.source().to_vec();
        topic.push(REPLY_SEGMENT.to_owned());
        topic.push(request.packet_id().to_owned());
        let packet = Packet::new(RpcHeader::reply_to(&request, responder.identity()), Vec::new())
            .with_payload(IntegerValue::new(value));
        responder.publisher().publish(&topic, &packet).unwrap();
    };

    tokio::time::advance(Duration::from_millis(500)).await;
    reply(1);
    let outcome = pending.wait().await.unwrap();
    reply(2);

    assert_eq!(outcome.replies.len(), 1);
    let value = downcast_ref::<IntegerValue>(outcome.replies[0].payloads()[0].as_ref()).unwrap();
    assert_eq!(value.value, 1);
    assert_eq!(*callback.batches.lock(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn handler_failure_reaches_requester_in_band() {
    let bus = Bus::new();
    let responder = bus.join("plant", "p1");
    let failing: Arc<dyn RequestHandler> = Arc::new(
        |_request: &RpcHeader, _payloads: &[Payload]| -> Result<Vec<Payload>, RpcError> {
            Err(RpcError::handler("SIM_NOT_READY", "model still loading"))
        },
    );
    responder.register_request_handler(&step(), failing).unwrap();
    let controller = bus.join("ctrl", "c1");
    let callback = Arc::new(RecordingCallback::default());

    let outcome = controller
        .send_request(
            &Destination::client("plant", "p1"),
            &step(),
            Vec::new(),
            ExpectedReplies::Exactly(1),
            TIMEOUT,
            callback.clone(),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(outcome.completion, Completion::Complete);
    assert_eq!(*callback.errors.lock(), vec![vec!["SIM_NOT_READY"]]);
    let (errors, rest) = outcome.replies[0].partition();
    assert!(rest.is_empty());
    assert_eq!(errors[0].message, "model still loading");
}

#[tokio::test(start_paused = true)]
async fn request_to_own_client_is_answered() {
    let bus = Bus::new();
    let solo = bus.join("plant", "p1");
    solo.register_request_handler(&step(), echo_client(&solo)).unwrap();

    let outcome = solo
        .request(&Destination::Own, &step(), Vec::new(), ExpectedReplies::Exactly(1))
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(reply_values(&outcome.replies), vec!["p1"]);
}

#[tokio::test(start_paused = true)]
async fn unregistered_handler_no_longer_answers() {
    let bus = Bus::new();
    let responder = bus.join("plant", "p1");
    let handler = echo_client(&responder);
    responder
        .register_request_handler(&step(), Arc::clone(&handler))
        .unwrap();
    assert_matches!(
        responder.register_request_handler(&step(), echo_client(&responder)),
        Err(RpcError::DuplicateHandler { .. })
    );
    assert!(responder.unregister_request_handler(&step(), &handler));

    let controller = bus.join("ctrl", "c1");
    let outcome = controller
        .request(
            &Destination::group("plant"),
            &step(),
            Vec::new(),
            ExpectedReplies::Unlimited,
        )
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert!(outcome.replies.is_empty());
}

#[tokio::test]
async fn broadcast_notification_reaches_every_subscriber() {
    let bus = Bus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let clients: Vec<Connection> = [("plant", "p1"), ("plant", "p2"), ("ctrl", "c1")]
        .into_iter()
        .map(|(group, client)| {
            let connection = bus.join(group, client);
            let sink = Arc::clone(&seen);
            let me = client.to_owned();
            let handler: Arc<dyn NotificationHandler> = Arc::new(
                move |_header: &PacketHeader, _payloads: &[Payload]| -> Result<(), RpcError> {
                    sink.lock().push(me.clone());
                    Ok(())
                },
            );
            connection
                .on_notification(&Subject::parse("sim.tick").unwrap(), handler)
                .unwrap();
            connection
        })
        .collect();

    clients[2]
        .publish_notification(
            &Destination::group("plant"),
            &Subject::parse("sim.tick").unwrap(),
            vec![Arc::new(IntegerValue::new(1)) as Payload],
        )
        .unwrap();
    let mut group_only = seen.lock().clone();
    group_only.sort();
    assert_eq!(group_only, vec!["p1", "p2"]);

    seen.lock().clear();
    clients[0]
        .publish_notification(
            &Destination::All,
            &Subject::parse("sim.tick").unwrap(),
            Vec::new(),
        )
        .unwrap();
    let mut everyone = seen.lock().clone();
    everyone.sort();
    assert_eq!(everyone, vec!["c1", "p1", "p2"]);
}

#[tokio::test]
async fn undecodable_message_reports_no_valid_packet() {
    let bus = Bus::new();
    let client = bus.join("plant", "p1");
    let handler: Arc<dyn NotificationHandler> = Arc::new(
        |_header: &PacketHeader, _payloads: &[Payload]| -> Result<(), RpcError> {
            panic!("handler must not run for an undecodable message")
        },
    );
    client
        .on_notification(&Subject::parse("sim.tick").unwrap(), handler)
        .unwrap();

    let errors = client.dispatch("lab.sim.plant.p1.sim.tick", b"{not json");
    assert_eq!(errors, vec![ExecutionError::NoValidPacket]);
}

#[tokio::test]
async fn closed_connection_cannot_publish() {
    let bus = Bus::new();
    let client = bus.join("plant", "p1");
    client.close().unwrap();
    assert_matches!(
        client.publish_notification(
            &Destination::All,
            &Subject::parse("sim.tick").unwrap(),
            Vec::new()
        ),
        Err(RpcError::Transport(_))
    );
}
