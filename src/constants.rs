/// Maximum size of an egress UDP payload. Kept below typical Ethernet MTU.
pub const PACKET_MAX: usize = 1450;

/// Number of fixed-size packet buffers in the egress ring.
pub const RING_SIZE: usize = 16;

/// Longest serialized form of a counter value: `%.15g|c\n`.
pub const MAX_COUNTER_LENGTH: usize = 18;

/// Smallest conceivable metric line: `a:1|c\n` (7 bytes including name).
const MIN_SLOT_BYTES: usize = 7;

/// Worst case: a packet full of distinct one-byte-name counters.
pub const NUM_OF_SLOTS: usize = PACKET_MAX / MIN_SLOT_BYTES;

/// Only the first staged downstream address is ever adopted; the rest of
/// this array is vestigial (see spec's Open Questions) but kept for parity.
pub const MAX_DS: usize = 32;

/// Scratch buffer size for a single inbound UDP datagram.
pub const DATA_BUF_SIZE: usize = 4096;

/// Lines shorter than this (inclusive) are rejected as malformed.
pub const MIN_LINE_LENGTH: usize = 6;

/// Default `dns_refresh_interval`, seconds.
pub const DEFAULT_DNS_REFRESH_INTERVAL: u64 = 60;

/// Default `downstream_health_check_interval`, seconds.
pub const DEFAULT_DS_HEALTHCHECK_INTERVAL: f64 = 1.0;

/// Default `log_level`, matching the source's `DEFAULT_LOG_LEVEL` (TRACE).
pub const DEFAULT_LOG_LEVEL: u8 = 0;
