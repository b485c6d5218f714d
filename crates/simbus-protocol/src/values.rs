//! Standard payloads: single values and log records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use simbus_codec::{CodecError, Encodable, FieldReader, FieldWriter, read_object_list};
use simbus_core::ValidationError;

macro_rules! scalar_payload {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $put:ident, $get:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq)]
        pub struct $name {
            /// The carried value.
            pub value: $ty,
        }

        impl $name {
            /// Wrap `value`.
            pub fn new(value: $ty) -> Self {
                Self { value }
            }
        }

        impl Encodable for $name {
            fn type_tag(&self) -> &'static str {
                stringify!($name)
            }

            fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
                writer.$put("value", self.value)
            }

            fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
                self.value = reader.$get("value")?;
                Ok(())
            }
        }
    };
}

scalar_payload!(
    /// A single boolean.
    BooleanValue, bool, put_bool, get_bool
);
scalar_payload!(
    /// A single signed integer.
    IntegerValue, i64, put_i64, get_i64
);
scalar_payload!(
    /// A single float.
    DoubleValue, f64, put_f64, get_f64
);

/// A single string.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringValue {
    /// The carried value.
    pub value: String,
}

impl StringValue {
    /// Wrap `value`.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Encodable for StringValue {
    fn type_tag(&self) -> &'static str {
        "StringValue"
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_str("value", &self.value)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.value = reader.get_str("value")?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log records
// ─────────────────────────────────────────────────────────────────────────────

/// Severity of a forwarded log record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Finest detail.
    Trace,
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    #[default]
    Info,
    /// Something unexpected but recoverable.
    Warn,
    /// A failure.
    Error,
}

impl LogLevel {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// One log line forwarded from another client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch on the producing client.
    pub timestamp_ms: i64,
    /// Severity.
    pub level: LogLevel,
    /// Name of the producing logger.
    pub logger: String,
    /// The message.
    pub message: String,
}

impl LogRecord {
    /// Create a record.
    pub fn new(
        timestamp_ms: i64,
        level: LogLevel,
        logger: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp_ms,
            level,
            logger: logger.into(),
            message: message.into(),
        }
    }

    /// Re-emit this record as a local `tracing` event tagged with `origin`.
    pub fn emit(&self, origin: &str) {
        let (ts, logger, message) = (self.timestamp_ms, self.logger.as_str(), &self.message);
        match self.level {
            LogLevel::Trace => tracing::trace!(origin, logger, ts, "{message}"),
            LogLevel::Debug => tracing::debug!(origin, logger, ts, "{message}"),
            LogLevel::Info => tracing::info!(origin, logger, ts, "{message}"),
            LogLevel::Warn => tracing::warn!(origin, logger, ts, "{message}"),
            LogLevel::Error => tracing::error!(origin, logger, ts, "{message}"),
        }
    }
}

impl Encodable for LogRecord {
    fn type_tag(&self) -> &'static str {
        "LogRecord"
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_i64("timestamp_ms", self.timestamp_ms)?;
        writer.put_str("level", self.level.as_str())?;
        writer.put_str("logger", &self.logger)?;
        writer.put_str("message", &self.message)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.timestamp_ms = reader.get_i64("timestamp_ms")?;
        self.level = reader
            .get_str("level")?
            .parse()
            .map_err(|message| CodecError::InvalidField {
                field: "level".into(),
                message,
            })?;
        self.logger = reader.get_str("logger")?;
        self.message = reader.get_str("message")?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.logger.is_empty() {
            return Err(ValidationError::payload("LogRecord", "logger is empty"));
        }
        if self.timestamp_ms < 0 {
            return Err(ValidationError::payload("LogRecord", "timestamp is negative"));
        }
        Ok(())
    }
}

/// Several log records shipped together.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LogBatch {
    /// The records, oldest first.
    pub records: Vec<LogRecord>,
}

impl LogBatch {
    /// Create a batch.
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records }
    }
}

impl Encodable for LogBatch {
    fn type_tag(&self) -> &'static str {
        "LogBatch"
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        let records: Vec<&dyn Encodable> =
            self.records.iter().map(|r| r as &dyn Encodable).collect();
        writer.put_object_list("records", &records)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.records = read_object_list(reader, "records")?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.records.is_empty() {
            return Err(ValidationError::payload("LogBatch", "batch is empty"));
        }
        self.records.iter().try_for_each(Encodable::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standard_registry;
    use assert_matches::assert_matches;
    use simbus_codec::{EncoderFactory, EncoderKind};
    use simbus_core::logging::test_utils::capture_logs;
    use std::sync::Arc;

    fn factory() -> EncoderFactory {
        EncoderFactory::new(Arc::new(standard_registry()), EncoderKind::Json)
    }

    #[test]
    fn scalar_tags() {
        assert_eq!(BooleanValue::new(true).type_tag(), "BooleanValue");
        assert_eq!(IntegerValue::new(1).type_tag(), "IntegerValue");
        assert_eq!(DoubleValue::new(1.0).type_tag(), "DoubleValue");
        assert_eq!(StringValue::new("x").type_tag(), "StringValue");
    }

    #[test]
    fn log_batch_round_trips_in_both_codecs() {
        let batch = LogBatch::new(vec![
            LogRecord::new(1_700_000_000_000, LogLevel::Warn, "sim.core", "slow step"),
            LogRecord::new(1_700_000_000_001, LogLevel::Error, "sim.io", "disk full"),
        ]);
        let factory = factory();
        for kind in EncoderKind::ALL {
            let bytes = factory.encoder(kind).encode(&batch).unwrap();
            let value = factory.decode_detected(&bytes).unwrap();
            let back = simbus_codec::downcast_ref::<LogBatch>(value.as_ref()).unwrap();
            assert_eq!(back, &batch);
        }
    }

    #[test]
    fn unknown_level_is_decode_error() {
        let bytes = br#"{"@type":"LogRecord","timestamp_ms":1,"level":"loud","logger":"a","message":"m"}"#;
        let err = factory().decode_detected(bytes).unwrap_err();
        assert_matches!(err, CodecError::InvalidField { field, .. } if field == "level");
    }

    #[test]
    fn log_validation() {
        assert!(LogBatch::default().validate().is_err());
        let bad = LogBatch::new(vec![LogRecord::new(1, LogLevel::Info, "", "m")]);
        assert!(bad.validate().is_err());
        let good = LogBatch::new(vec![LogRecord::new(1, LogLevel::Info, "a", "m")]);
        assert!(good.validate().is_ok());
    }

    #[test]
    fn level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("nope".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::from(tracing::Level::DEBUG), LogLevel::Debug);
    }

    #[test]
    fn emit_relogs_at_record_level() {
        let (logs, _guard) = capture_logs();
        LogRecord::new(5, LogLevel::Warn, "remote", "careful").emit("lab.sim.g.c2");
        let events = logs.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, tracing::Level::WARN);
        assert!(events[0].message.contains("careful"));
    }

    #[test]
    fn level_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
        let level: LogLevel = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, LogLevel::Error);
        assert_eq!(LogLevel::default(), LogLevel::Info);
    }
}
