//! Outbound packet publishing.
//!
//! Every outbound packet goes through [`PublishingManager::publish_packet`]:
//! configuration, topic, and packet are checked first, then the packet is
//! encoded with a pooled encoder and handed to the transport in a single
//! call. Nothing reaches the transport when any check fails.

use std::fmt;
use std::sync::Arc;

use simbus_codec::{EncoderFactory, EncoderKind};
use simbus_core::topic::validate_segment;
use simbus_core::{ValidationError, join_topic};
use simbus_protocol::Packet;
use tracing::trace;

use crate::errors::RpcError;
use crate::transport::TransportPublisher;

/// Encodes packets and publishes them on topics.
#[derive(Clone, Default)]
pub struct PublishingManager {
    encoders: Option<Arc<EncoderFactory>>,
    publisher: Option<Arc<dyn TransportPublisher>>,
}

impl PublishingManager {
    /// A fully configured manager.
    pub fn new(encoders: Arc<EncoderFactory>, publisher: Arc<dyn TransportPublisher>) -> Self {
        Self {
            encoders: Some(encoders),
            publisher: Some(publisher),
        }
    }

    /// Replace the encoder factory.
    #[must_use]
    pub fn with_encoders(mut self, encoders: Arc<EncoderFactory>) -> Self {
        self.encoders = Some(encoders);
        self
    }

    /// Replace the transport publisher.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn TransportPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Validate, encode, and publish `packet` on `topic`.
    ///
    /// `kind` selects the codec; `None` uses the factory default. Fails with
    /// a [`ValidationError`] and performs no I/O when the manager is not
    /// configured, the topic is empty or has a segment that is not a valid
    /// topic segment, the packet is absent, or the packet fails validation.
    pub fn publish_packet(
        &self,
        topic: &[String],
        packet: Option<&Packet>,
        kind: Option<EncoderKind>,
    ) -> Result<(), RpcError> {
        let encoders = self.encoders.as_ref().ok_or(ValidationError::NoEncoderFactory)?;
        let publisher = self.publisher.as_ref().ok_or(ValidationError::NoPublisher)?;
        if topic.is_empty() {
            return Err(ValidationError::EmptyTopic.into());
        }
        for (position, segment) in topic.iter().enumerate() {
            validate_segment(segment, position)?;
        }
        let packet = packet.ok_or(ValidationError::MissingPacket)?;
        packet.validate()?;

        let topic = join_topic(topic);
        let bytes = {
            let mut encoder = encoders.encoder(kind.unwrap_or(encoders.default_kind()));
            encoder.encode(packet)?
        };
        publisher.publish(&topic, &bytes)?;
        trace!(topic = %topic, bytes = bytes.len(), "packet published");
        Ok(())
    }

    /// Publish with the default codec.
    pub fn publish(&self, topic: &[String], packet: &Packet) -> Result<(), RpcError> {
        self.publish_packet(topic, Some(packet), None)
    }
}

impl fmt::Debug for PublishingManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishingManager")
            .field("encoders", &self.encoders)
            .field("publisher", &self.publisher.is_some())
            .finish()
    }
}
