//! Packet headers.
//!
//! A [`Header`] names the subject and the sending client. An [`RpcHeader`]
//! additionally names the destination and carries the correlation id that
//! ties replies back to their request.

use simbus_codec::{CodecError, Encodable, FieldReader, FieldWriter, decode_typed};
use simbus_core::topic::validate_segment;
use simbus_core::{ClientIdentifier, CorrelationId, Destination, Subject, ValidationError};

/// Tag of [`Header`].
pub const HEADER_TAG: &str = "Header";
/// Tag of [`RpcHeader`].
pub const RPC_HEADER_TAG: &str = "RpcHeader";

fn validate_segments(segments: &[String], field: &'static str) -> Result<(), ValidationError> {
    if segments.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    for (position, segment) in segments.iter().enumerate() {
        validate_segment(segment, position)?;
    }
    Ok(())
}

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        Err(ValidationError::MissingField { field })
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Header
// ─────────────────────────────────────────────────────────────────────────────

/// Header of a notification packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Header {
    subject: Vec<String>,
    source: Vec<String>,
    packet_id: Option<String>,
}

impl Header {
    /// Header for `subject` sent by `source`.
    pub fn new(subject: &Subject, source: &ClientIdentifier) -> Self {
        Self {
            subject: subject.segments().to_vec(),
            source: source.topic_prefix(),
            packet_id: None,
        }
    }

    /// Attach a packet id.
    #[must_use]
    pub fn with_packet_id(mut self, packet_id: impl Into<String>) -> Self {
        self.packet_id = Some(packet_id.into());
        self
    }

    /// Subject segments.
    pub fn subject(&self) -> &[String] {
        &self.subject
    }

    /// Topic prefix of the sending client.
    pub fn source(&self) -> &[String] {
        &self.source
    }

    /// Packet id, if any.
    pub fn packet_id(&self) -> Option<&str> {
        self.packet_id.as_deref()
    }

    /// Check subject and source.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_segments(&self.subject, "subject")?;
        validate_segments(&self.source, "source")?;
        if let Some(packet_id) = &self.packet_id {
            require(packet_id, "packet_id")?;
        }
        Ok(())
    }

    fn encode_fields(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_str_list("subject", &self.subject)?;
        writer.put_str_list("source", &self.source)?;
        if let Some(packet_id) = &self.packet_id {
            writer.put_str("packet_id", packet_id)?;
        }
        Ok(())
    }

    fn decode_fields(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.subject = reader.get_str_list("subject")?;
        self.source = reader.get_str_list("source")?;
        self.packet_id = reader.get_opt_str("packet_id")?;
        Ok(())
    }
}

impl Encodable for Header {
    fn type_tag(&self) -> &'static str {
        HEADER_TAG
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        self.encode_fields(writer)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.decode_fields(reader)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Header::validate(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RpcHeader
// ─────────────────────────────────────────────────────────────────────────────

/// Header of a request or reply packet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RpcHeader {
    base: Header,
    destination_group_id: String,
    destination_client_id: String,
}

impl RpcHeader {
    /// Header for a request on `subject` from `source` to `destination`.
    pub fn new(
        subject: &Subject,
        source: &ClientIdentifier,
        destination: &Destination,
        correlation_id: &CorrelationId,
    ) -> Self {
        Self {
            base: Header::new(subject, source).with_packet_id(correlation_id.as_str()),
            destination_group_id: destination.group_id(source).to_owned(),
            destination_client_id: destination.client_id(source).to_owned(),
        }
    }

    /// Header for the reply to `request`, sent by `responder`.
    ///
    /// The reply is addressed back to the requester and keeps the request's
    /// subject and correlation id.
    pub fn reply_to(request: &RpcHeader, responder: &ClientIdentifier) -> Self {
        let (group, client) = request.source_group_and_client();
        Self {
            base: Header {
                subject: request.base.subject.clone(),
                source: responder.topic_prefix(),
                packet_id: request.base.packet_id.clone(),
            },
            destination_group_id: group.to_owned(),
            destination_client_id: client.to_owned(),
        }
    }

    /// Subject segments.
    pub fn subject(&self) -> &[String] {
        &self.base.subject
    }

    /// Topic prefix of the sending client.
    pub fn source(&self) -> &[String] {
        &self.base.source
    }

    /// Correlation id (empty only on a malformed header).
    pub fn packet_id(&self) -> &str {
        self.base.packet_id.as_deref().unwrap_or_default()
    }

    /// Destination group segment.
    pub fn destination_group_id(&self) -> &str {
        &self.destination_group_id
    }

    /// Destination client segment.
    pub fn destination_client_id(&self) -> &str {
        &self.destination_client_id
    }

    /// The plain header part.
    pub fn base(&self) -> &Header {
        &self.base
    }

    /// Check the base header plus destination and correlation id.
    ///
    /// Empty destination group, destination client, or packet id are
    /// rejected; the packet id is required here, unlike on [`Header`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.base.validate()?;
        require(&self.destination_group_id, "destination_group_id")?;
        require(&self.destination_client_id, "destination_client_id")?;
        require(self.packet_id(), "packet_id")
    }

    fn source_group_and_client(&self) -> (&str, &str) {
        match self.base.source.as_slice() {
            [.., group, client] => (group.as_str(), client.as_str()),
            _ => ("", ""),
        }
    }
}

impl Encodable for RpcHeader {
    fn type_tag(&self) -> &'static str {
        RPC_HEADER_TAG
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        self.base.encode_fields(writer)?;
        writer.put_str("destination_group_id", &self.destination_group_id)?;
        writer.put_str("destination_client_id", &self.destination_client_id)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.base.decode_fields(reader)?;
        self.destination_group_id = reader.get_str("destination_group_id")?;
        self.destination_client_id = reader.get_str("destination_client_id")?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        RpcHeader::validate(self)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PacketHeader
// ─────────────────────────────────────────────────────────────────────────────

/// Either kind of header a packet can carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PacketHeader {
    /// Notification header.
    Plain(Header),
    /// Request or reply header.
    Rpc(RpcHeader),
}

impl PacketHeader {
    /// Subject segments.
    pub fn subject(&self) -> &[String] {
        match self {
            Self::Plain(h) => h.subject(),
            Self::Rpc(h) => h.subject(),
        }
    }

    /// Topic prefix of the sending client.
    pub fn source(&self) -> &[String] {
        match self {
            Self::Plain(h) => h.source(),
            Self::Rpc(h) => h.source(),
        }
    }

    /// Packet id, if present.
    pub fn packet_id(&self) -> Option<&str> {
        match self {
            Self::Plain(h) => h.packet_id(),
            Self::Rpc(h) => h.base.packet_id(),
        }
    }

    /// The RPC header, if this is one.
    pub fn as_rpc(&self) -> Option<&RpcHeader> {
        match self {
            Self::Rpc(h) => Some(h),
            Self::Plain(_) => None,
        }
    }

    /// Validate whichever header this is.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Plain(h) => h.validate(),
            Self::Rpc(h) => h.validate(),
        }
    }

    pub(crate) fn as_encodable(&self) -> &dyn Encodable {
        match self {
            Self::Plain(h) => h,
            Self::Rpc(h) => h,
        }
    }

    pub(crate) fn read(reader: &dyn FieldReader) -> Result<Self, CodecError> {
        match reader.type_tag() {
            Some(RPC_HEADER_TAG) => decode_typed::<RpcHeader>(reader).map(Self::Rpc),
            Some(_) => decode_typed::<Header>(reader).map(Self::Plain),
            None => Err(CodecError::MissingTypeTag),
        }
    }
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self::Plain(Header::default())
    }
}

impl From<Header> for PacketHeader {
    fn from(header: Header) -> Self {
        Self::Plain(header)
    }
}

impl From<RpcHeader> for PacketHeader {
    fn from(header: RpcHeader) -> Self {
        Self::Rpc(header)
    }
}
