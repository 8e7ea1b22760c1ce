//! Computes the keyed running-counter trailer appended to every encrypted frame.
//!
//! The trailer is `SHA256(le64(counter) || plaintext || key)` truncated to eight
//! bytes. Encrypting and decrypting sides share this routine so both agree on
//! the digest input layout.
//!
//! 计算附加在每个加密帧末尾的带密钥运行计数器尾部。
//!
//! 尾部为截断到八字节的 `SHA256(le64(counter) || plaintext || key)`。
//! 加密端和解密端共用此例程，确保双方对摘要输入布局达成一致。
use crate::crypto::keys::SessionKey;
use sha2::{Digest, Sha256};

/// Length of the trailer in bytes.
pub const TRAILER_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct Trailer {
    hasher: Sha256,
}

impl Trailer {
    /// Starts a trailer for the frame numbered `counter`.
    pub fn new(counter: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        Self { hasher }
    }

    /// Feeds the frame plaintext.
    ///
    /// 输入帧的明文。
    pub fn update(&mut self, plaintext: &[u8]) {
        self.hasher.update(plaintext);
    }

    /// Mixes in the key and returns the truncated digest.
    ///
    /// 混入密钥并返回截断后的摘要。
    pub fn finish(mut self, key: &SessionKey) -> [u8; TRAILER_LEN] {
        self.hasher.update(key.as_bytes());
        let digest = self.hasher.finalize();
        let mut out = [0u8; TRAILER_LEN];
        out.copy_from_slice(&digest[..TRAILER_LEN]);
        out
    }
}

/// One-shot trailer over a complete plaintext.
pub fn compute(counter: u64, plaintext: &[u8], key: &SessionKey) -> [u8; TRAILER_LEN] {
    let mut trailer = Trailer::new(counter);
    trailer.update(plaintext);
    trailer.finish(key)
}
