//! The batch pipeline of one connection leg: compression, then encryption.
//!
//! 单条连接链路的批次管线：先压缩，再加密。

pub mod compression;

use crate::config::ProxyConfig;
use crate::crypto::keys::SessionKey;
use crate::crypto::transport::{CipherMode, SharedEncryptor, TransportCrypto};
use crate::error::{ProxyError, Result};
pub use compression::{CompressionAlgorithm, CompressionFramer};

/// First byte of every batch on the wire.
pub const BATCH_HEADER: u8 = 0xFE;

/// Owns both directions of one leg. Outgoing batches may be produced from
/// several tasks; incoming batches are read by a single reader.
///
/// 持有单条链路的两个方向。发出的批次可能来自多个任务；接收的批次由单一读取者读取。
pub struct ConnectionCodec {
    protocol_version: u32,
    compression: Option<CompressionFramer>,
    threshold: usize,
    outbound: SharedEncryptor,
    inbound: TransportCrypto,
}

impl ConnectionCodec {
    pub fn new(protocol_version: u32, verify_trailer: bool) -> Self {
        Self {
            protocol_version,
            compression: None,
            threshold: 0,
            outbound: SharedEncryptor::new(),
            inbound: TransportCrypto::decrypting(verify_trailer),
        }
    }

    /// A codec for one leg, verifying inbound trailers when `validate-encryption` is set.
    pub fn for_config(config: &ProxyConfig) -> Self {
        Self::new(config.protocol_version, config.validate_encryption)
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Turns compression on for both directions.
    ///
    /// 为两个方向开启压缩。
    pub fn enable_compression(&mut self, algorithm: CompressionAlgorithm, threshold: u16) {
        self.compression = Some(CompressionFramer::for_protocol(algorithm, self.protocol_version));
        self.threshold = usize::from(threshold);
    }

    pub fn compression(&self) -> Option<CompressionAlgorithm> {
        self.compression.map(|c| c.algorithm())
    }

    /// Keys both directions with `key`. A second call fails and leaves both
    /// ciphers running on the first key.
    ///
    /// 使用 `key` 为两个方向设置密钥。第二次调用会失败，两个密码继续使用第一次的密钥。
    pub fn enable_encryption(&mut self, key: SessionKey) -> Result<()> {
        if self.inbound.is_enabled() || self.outbound.is_enabled() {
            return Err(ProxyError::EncryptionAlreadyEnabled);
        }
        let mode = CipherMode::for_protocol(self.protocol_version);
        self.outbound.enable(key.clone(), mode)?;
        self.inbound.enable(key, mode)
    }

    pub fn is_encrypted(&self) -> bool {
        self.inbound.is_enabled() && self.outbound.is_enabled()
    }

    /// A handle to the outgoing cipher, for writers on other tasks.
    pub fn outbound(&self) -> SharedEncryptor {
        self.outbound.clone()
    }

    /// Encodes one batch and passes the finished frame to `emit` while the
    /// outgoing counter is still held.
    ///
    /// 编码一个批次，并在仍持有发出计数器时将完成的帧交给 `emit`。
    pub fn encode_with<R>(&self, payload: &[u8], emit: impl FnOnce(Vec<u8>) -> R) -> Result<R> {
        let body = match &self.compression {
            Some(framer) => framer.encode(payload, self.threshold)?,
            None => payload.to_vec(),
        };
        self.outbound.seal_and_emit(&body, |sealed| {
            let mut frame = Vec::with_capacity(sealed.len() + 1);
            frame.push(BATCH_HEADER);
            frame.extend_from_slice(&sealed);
            emit(frame)
        })
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        self.encode_with(payload, |frame| frame)
    }

    pub fn decode(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        let (&header, sealed) = frame.split_first().ok_or(ProxyError::InvalidMessage)?;
        if header != BATCH_HEADER {
            return Err(ProxyError::InvalidMessage);
        }
        let body = self.inbound.decrypt(sealed)?;
        match &self.compression {
            Some(framer) => framer.decode(&body),
            None => Ok(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::version;

    fn pair(protocol_version: u32) -> (ConnectionCodec, ConnectionCodec) {
        let key = SessionKey::from_bytes([9u8; 32]);
        let mut a = ConnectionCodec::new(protocol_version, true);
        let mut b = ConnectionCodec::new(protocol_version, true);
        a.enable_compression(CompressionAlgorithm::Zlib, 16);
        b.enable_compression(CompressionAlgorithm::Zlib, 16);
        a.enable_encryption(key.clone()).unwrap();
        b.enable_encryption(key).unwrap();
        (a, b)
    }

    #[test]
    fn compressed_and_encrypted_batches_round_trip() {
        let (a, mut b) = pair(version::CURRENT);
        for payload in [&b"short"[..], &[0x55u8; 1000][..]] {
            let frame = a.encode(payload).unwrap();
            assert_eq!(frame[0], BATCH_HEADER);
            assert_eq!(b.decode(&frame).unwrap(), payload);
        }
    }

    #[test]
    fn second_enable_keeps_first_key() {
        let (mut a, mut b) = pair(version::CURRENT);
        assert!(matches!(
            a.enable_encryption(SessionKey::from_bytes([1u8; 32])),
            Err(ProxyError::EncryptionAlreadyEnabled)
        ));
        let frame = a.encode(b"still on the first key").unwrap();
        assert_eq!(b.decode(&frame).unwrap(), b"still on the first key");
    }

    #[test]
    fn enable_touches_neither_direction_once_one_is_keyed() {
        let mut codec = ConnectionCodec::new(version::CURRENT, true);
        codec
            .outbound()
            .enable(SessionKey::from_bytes([4u8; 32]), CipherMode::Cfb8)
            .unwrap();

        assert!(matches!(
            codec.enable_encryption(SessionKey::from_bytes([5u8; 32])),
            Err(ProxyError::EncryptionAlreadyEnabled)
        ));
        assert!(!codec.inbound.is_enabled());
        assert!(!codec.is_encrypted());
        assert_eq!(codec.outbound.counter(), Some(0));
    }

    #[test]
    fn missing_batch_header_is_invalid() {
        let mut codec = ConnectionCodec::new(version::CURRENT, false);
        assert!(matches!(codec.decode(&[0x00, 1]), Err(ProxyError::InvalidMessage)));
        assert!(matches!(codec.decode(&[]), Err(ProxyError::InvalidMessage)));
    }
}
