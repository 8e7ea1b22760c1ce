//! Protocol version constants and the feature thresholds keyed on them.

/// The protocol version both legs of the proxy speak.
pub const CURRENT: u32 = 898;

/// The game version announced in forged chains.
pub const GAME_VERSION: &str = "1.21.130";

/// From this version the transport cipher runs AES-CTR instead of AES-CFB8.
pub const COUNTER_MODE_CIPHER_SINCE: u32 = 428;

/// From this version every batch starts with a compression algorithm id byte.
pub const COMPRESSION_PREFIX_SINCE: u32 = 649;

/// From this version skin claims must name the server they were signed for.
pub const SKIN_SERVER_ADDRESS_SINCE: u32 = 388;

pub fn compression_prefixed(protocol_version: u32) -> bool {
    protocol_version >= COMPRESSION_PREFIX_SINCE
}

pub fn skin_binds_server_address(protocol_version: u32) -> bool {
    protocol_version >= SKIN_SERVER_ADDRESS_SINCE
}
