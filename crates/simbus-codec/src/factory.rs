//! Encoder trait, codec selection, and the pooled encoder factory.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::encodable::{Encodable, FieldReader, decode_dynamic, decode_typed};
use crate::errors::CodecError;
use crate::json::JsonEncoder;
use crate::msgpack::MessagePackEncoder;
use crate::registry::TypeRegistry;

/// Default number of idle encoders kept per kind.
pub const DEFAULT_POOL_CAPACITY: usize = 4;

/// Available codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Text codec over JSON objects.
    Json,
    /// Binary codec over MessagePack.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl EncoderKind {
    /// Every kind, in pool order.
    pub const ALL: [Self; 2] = [Self::Json, Self::MessagePack];

    /// Guess the codec that produced `bytes`.
    ///
    /// JSON documents start with `{` (after optional whitespace); MessagePack
    /// roots are maps, whose marker bytes never collide with `{`.
    pub fn detect(bytes: &[u8]) -> Self {
        match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Self::Json,
            _ => Self::MessagePack,
        }
    }

    fn pool_index(self) -> usize {
        match self {
            Self::Json => 0,
            Self::MessagePack => 1,
        }
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::MessagePack => write!(f, "msgpack"),
        }
    }
}

impl FromStr for EncoderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" | "binary" => Ok(Self::MessagePack),
            other => Err(format!("unknown codec '{other}'")),
        }
    }
}

/// A concrete codec instance.
///
/// Encoders may keep scratch state between uses; [`reset`](Self::reset) is
/// called whenever one goes back to a pool.
pub trait Encoder: Send + fmt::Debug {
    /// Which codec this is.
    fn kind(&self) -> EncoderKind;

    /// Encode `value` (with its type tag) as a root object.
    fn encode(&mut self, value: &dyn Encodable) -> Result<Vec<u8>, CodecError>;

    /// Parse `bytes` and hand a reader over the root object to `visit`.
    fn read_root(
        &mut self,
        bytes: &[u8],
        visit: &mut dyn FnMut(&dyn FieldReader) -> Result<(), CodecError>,
    ) -> Result<(), CodecError>;

    /// Drop any per-use state.
    fn reset(&mut self) {}

    /// Decode a root object of whatever registered type its tag names.
    fn decode(&mut self, bytes: &[u8]) -> Result<Box<dyn Encodable>, CodecError> {
        let mut decoded = None;
        self.read_root(bytes, &mut |reader| {
            decoded = Some(decode_dynamic(reader)?);
            Ok(())
        })?;
        decoded.ok_or(CodecError::NotAnObject)
    }

    /// Decode a root object that must be a `T`.
    fn decode_as<T: Encodable + Default>(&mut self, bytes: &[u8]) -> Result<T, CodecError>
    where
        Self: Sized,
    {
        let mut decoded = None;
        self.read_root(bytes, &mut |reader| {
            decoded = Some(decode_typed::<T>(reader)?);
            Ok(())
        })?;
        decoded.ok_or(CodecError::NotAnObject)
    }
}

/// Hands out pooled encoders per [`EncoderKind`].
pub struct EncoderFactory {
    registry: Arc<TypeRegistry>,
    default_kind: EncoderKind,
    capacity: usize,
    pools: [Mutex<Vec<Box<dyn Encoder>>>; 2],
}

impl EncoderFactory {
    /// Create a factory whose encoders resolve tags through `registry`.
    pub fn new(registry: Arc<TypeRegistry>, default_kind: EncoderKind) -> Self {
        Self {
            registry,
            default_kind,
            capacity: DEFAULT_POOL_CAPACITY,
            pools: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
        }
    }

    /// Set how many idle encoders are kept per kind.
    #[must_use]
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// The codec used when none is requested.
    pub fn default_kind(&self) -> EncoderKind {
        self.default_kind
    }

    /// The registry shared by every encoder.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    /// Borrow an encoder of the default kind.
    pub fn default_encoder(&self) -> PooledEncoder<'_> {
        self.encoder(self.default_kind)
    }

    /// Borrow an encoder of `kind`, reusing an idle one when available.
    pub fn encoder(&self, kind: EncoderKind) -> PooledEncoder<'_> {
        let pooled = self.pools[kind.pool_index()].lock().pop();
        let encoder = pooled.unwrap_or_else(|| {
            trace!(%kind, "creating encoder");
            self.create(kind)
        });
        PooledEncoder {
            factory: self,
            encoder: Some(encoder),
        }
    }

    /// Return an encoder to its pool.
    ///
    /// The encoder is reset first; when the pool is full it is dropped.
    pub fn release(&self, mut encoder: Box<dyn Encoder>) {
        encoder.reset();
        let mut pool = self.pools[encoder.kind().pool_index()].lock();
        if pool.len() < self.capacity {
            pool.push(encoder);
        }
    }

    /// Number of idle encoders of `kind`.
    pub fn idle(&self, kind: EncoderKind) -> usize {
        self.pools[kind.pool_index()].lock().len()
    }

    /// Decode `bytes` with the codec detected from their first byte.
    pub fn decode_detected(&self, bytes: &[u8]) -> Result<Box<dyn Encodable>, CodecError> {
        self.encoder(EncoderKind::detect(bytes)).decode(bytes)
    }

    fn create(&self, kind: EncoderKind) -> Box<dyn Encoder> {
        match kind {
            EncoderKind::Json => Box::new(JsonEncoder::new(Arc::clone(&self.registry))),
            EncoderKind::MessagePack => {
                Box::new(MessagePackEncoder::new(Arc::clone(&self.registry)))
            }
        }
    }
}

impl fmt::Debug for EncoderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderFactory")
            .field("default_kind", &self.default_kind)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// An encoder on loan from an [`EncoderFactory`]; returned when dropped.
pub struct PooledEncoder<'a> {
    factory: &'a EncoderFactory,
    encoder: Option<Box<dyn Encoder>>,
}

impl PooledEncoder<'_> {
    /// Take the encoder out of the pool's custody.
    ///
    /// The caller becomes responsible for handing it back through
    /// [`EncoderFactory::release`].
    pub fn detach(mut self) -> Box<dyn Encoder> {
        self.encoder
            .take()
            .expect("pooled encoder present until drop or detach")
    }
}

impl Deref for PooledEncoder<'_> {
    type Target = dyn Encoder;

    fn deref(&self) -> &Self::Target {
        self.encoder
            .as_deref()
            .expect("pooled encoder present until drop or detach")
    }
}

impl DerefMut for PooledEncoder<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.encoder
            .as_deref_mut()
            .expect("pooled encoder present until drop or detach")
    }
}

impl Drop for PooledEncoder<'_> {
    fn drop(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.factory.release(encoder);
        }
    }
}
