//! Wire-level constants shared by topic builders and the dispatching tree.

/// Separator between topic segments in the transport's topic string.
pub const TOPIC_SEPARATOR: char = '.';

/// Group or client segment that addresses every member at that level.
pub const BROADCAST_SEGMENT: &str = "_all";

/// First subject segment of every RPC reply topic.
pub const REPLY_SEGMENT: &str = "rpc-reply";

/// Maximum byte length of a single topic segment.
pub const MAX_SEGMENT_LENGTH: usize = 128;

/// Default request timeout when the application supplies none (5 s).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
