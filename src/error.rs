use thiserror::Error;

/// Disconnect reason shown to the client when the proxy cannot complete a login.
///
/// 代理无法完成登录时显示给客户端的断开原因。
pub const REASON_CANT_CONNECT: &str = "disconnectionScreen.internalError.cantConnect";

/// Disconnect reason shown to the client when its identity cannot be verified.
///
/// 客户端身份无法验证时显示的断开原因。
pub const REASON_NOT_AUTHENTICATED: &str = "disconnectionScreen.notAuthenticated";

#[derive(Debug, Error)]
pub enum ProxyError {
    // --- Handshake phase: always fatal to the connection ---
    #[error("certificate chain is malformed: {0}")]
    ChainMalformed(String),

    #[error("chain link {index} is missing its identityPublicKey claim")]
    ChainPayloadMissingKey { index: usize },

    #[error("terminal chain link is missing `{0}`")]
    TerminalClaimMissing(&'static str),

    #[error("signature of link {index} could not be verified")]
    SignatureInvalid { index: usize },

    #[error("identity forging failed: {0}")]
    ForgeryFailure(String),

    #[error("client protocol {client} does not match proxy protocol {server}")]
    ProtocolMismatch { client: u32, server: u32 },

    #[error("session was closed before the handshake completed")]
    SessionClosed,

    #[error("could not reach the destination server: {0}")]
    Connect(String),

    #[error("invalid state transition attempted")]
    InvalidState,

    #[error("received an unexpected or invalid message for the current state")]
    InvalidMessage,

    // --- Transport phase ---
    #[error("encryption has already been enabled on this connection")]
    EncryptionAlreadyEnabled,

    #[error("frame trailer does not match its contents")]
    TrailerMismatch,

    #[error("frame counter exhausted for the current key")]
    CounterExhausted,

    #[error("unsupported compression algorithm id {0:#04x}")]
    UnsupportedCompression(u8),

    // --- Pack phase: isolated per pack ---
    #[error("pack decryption failed: {0}")]
    PackDecryptFailure(String),

    #[error("pack archive has no manifest and cannot be normalized")]
    ArchiveStructureUnrecognized,

    #[error("pack archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("pack download failed: {0}")]
    Download(#[from] reqwest::Error),

    // --- Ambient ---
    #[error("configuration error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProxyError {
    /// The reason string sent to the client before the connection is torn down.
    ///
    /// 在连接被拆除之前发送给客户端的原因字符串。
    pub fn disconnect_reason(&self) -> &'static str {
        match self {
            ProxyError::SignatureInvalid { .. } => REASON_NOT_AUTHENTICATED,
            _ => REASON_CANT_CONNECT,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;
