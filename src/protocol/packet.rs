//! The packets the handshake core reacts to. Everything else is relayed as
//! [`Packet::Opaque`] by the external dispatch layer.
//!
//! 握手核心会处理的数据包。其余数据包由外部分发层以 [`Packet::Opaque`] 形式中继。

use crate::codec::compression::CompressionAlgorithm;
use crate::protocol::auth::AuthPayload;
use uuid::Uuid;

/// Login outcome reported to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayStatus {
    LoginSuccess,
    /// The client runs an older protocol than the proxy.
    LoginFailedClient,
    /// The client runs a newer protocol than the proxy.
    LoginFailedServer,
}

/// Client answers during resource pack negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePackResponse {
    Refused,
    SendPacks,
    HaveAllPacks,
    Completed,
}

/// One pack offered by the destination server.
///
/// 目标服务器提供的单个资源包。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackAnnouncement {
    pub pack_id: Uuid,
    /// Empty when the pack is not encrypted.
    pub content_key: String,
    /// Empty when the pack is only available through chunk transfer.
    pub cdn_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    RequestNetworkSettings {
        protocol_version: u32,
    },
    NetworkSettings {
        compression_threshold: u16,
        compression_algorithm: CompressionAlgorithm,
    },
    Login {
        protocol_version: u32,
        auth: AuthPayload,
        /// The client's skin token.
        client_jwt: String,
    },
    PlayStatus(PlayStatus),
    Disconnect {
        reason: String,
    },
    ServerToClientHandshake {
        jwt: String,
    },
    ClientToServerHandshake,
    ResourcePacksInfo {
        packs: Vec<PackAnnouncement>,
    },
    ResourcePackChunkData {
        pack_id: Uuid,
        chunk_index: u32,
        /// Byte offset of `data` within the archive.
        offset: u64,
        data: Vec<u8>,
    },
    ResourcePackClientResponse {
        status: ResourcePackResponse,
        pack_ids: Vec<String>,
    },
    Opaque {
        id: u32,
        payload: Vec<u8>,
    },
}

/// What the core did with a packet handed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSignal {
    /// Consumed by the core; must not be relayed.
    Handled,
    /// Not the core's business; relay unchanged.
    Unhandled,
}
