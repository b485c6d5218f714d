//! # simbus-protocol
//!
//! What travels over the bus.
//!
//! A [`Packet`] is a header plus an ordered list of payloads. Notifications
//! carry a [`Header`]; requests and replies carry an [`RpcHeader`] with the
//! destination and correlation id. Payloads are any registered
//! [`Encodable`](simbus_codec::Encodable) type; [`ErrorPayload`] is the one
//! reserved for in-band errors.
//!
//! [`standard_registry`] returns a type registry with every type defined
//! here. Applications add their own payload types to it.

#![deny(unsafe_code)]

pub mod header;
pub mod packet;
pub mod payload;
pub mod values;

pub use header::{Header, PacketHeader, RpcHeader};
pub use packet::{Packet, Payload};
pub use payload::ErrorPayload;
pub use values::{
    BooleanValue, DoubleValue, IntegerValue, LogBatch, LogLevel, LogRecord, StringValue,
};

use simbus_codec::TypeRegistry;

/// Register every packet and payload type defined in this crate.
pub fn register_standard_types(registry: &mut TypeRegistry) -> &mut TypeRegistry {
    registry
        .register::<Packet>()
        .register::<Header>()
        .register::<RpcHeader>()
        .register::<ErrorPayload>()
        .register::<BooleanValue>()
        .register::<IntegerValue>()
        .register::<DoubleValue>()
        .register::<StringValue>()
        .register::<LogRecord>()
        .register::<LogBatch>()
}

/// A registry holding the standard types.
pub fn standard_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let _ = register_standard_types(&mut registry);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_knows_every_type() {
        let registry = standard_registry();
        for tag in [
            "Packet",
            "Header",
            "RpcHeader",
            "ErrorPayload",
            "BooleanValue",
            "IntegerValue",
            "DoubleValue",
            "StringValue",
            "LogRecord",
            "LogBatch",
        ] {
            assert!(registry.contains(tag), "{tag} missing");
        }
    }
}
