//! The top-level unit published on a topic.

use std::sync::Arc;

use simbus_codec::{CodecError, Encodable, FieldReader, FieldWriter, read_dynamic_list};
use simbus_core::ValidationError;

use crate::header::PacketHeader;
use crate::payload::ErrorPayload;

/// Tag of [`Packet`].
pub const PACKET_TAG: &str = "Packet";

/// Shared handle to any registered payload.
pub type Payload = Arc<dyn Encodable>;

/// A header plus an ordered list of payloads.
#[derive(Clone, Debug, Default)]
pub struct Packet {
    header: PacketHeader,
    payloads: Vec<Payload>,
}

impl Packet {
    /// Create a packet.
    pub fn new(header: impl Into<PacketHeader>, payloads: Vec<Payload>) -> Self {
        Self {
            header: header.into(),
            payloads,
        }
    }

    /// Append a payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Encodable) -> Self {
        self.payloads.push(Arc::new(payload));
        self
    }

    /// The header.
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Payloads in order.
    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    /// Split payloads, in order, into error payloads and everything else.
    pub fn partition(&self) -> (Vec<ErrorPayload>, Vec<Payload>) {
        let mut errors = Vec::new();
        let mut others = Vec::new();
        for payload in &self.payloads {
            match ErrorPayload::from_payload(payload.as_ref()) {
                Some(error) => errors.push(error.clone()),
                None => others.push(Arc::clone(payload)),
            }
        }
        (errors, others)
    }

    /// Check the header, then each payload in order.
    ///
    /// Stops at the first violation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.header.validate()?;
        self.payloads.iter().try_for_each(|p| p.validate())
    }
}

impl Encodable for Packet {
    fn type_tag(&self) -> &'static str {
        PACKET_TAG
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_object("header", self.header.as_encodable())?;
        let payloads: Vec<&dyn Encodable> = self.payloads.iter().map(|p| p.as_ref()).collect();
        writer.put_object_list("payloads", &payloads)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        let header = reader.object("header")?;
        self.header = PacketHeader::read(header.as_ref())?;
        self.payloads = read_dynamic_list(reader, "payloads")?
            .into_iter()
            .map(Arc::from)
            .collect();
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Packet::validate(self)
    }
}
