//! Per-connection symmetric cipher state for the relayed legs.
//!
//! Each direction of a connection owns one [`TransportCrypto`]. It starts disabled
//! and passes frames through untouched until [`TransportCrypto::enable`] is called
//! exactly once with the negotiated session key. From then on every frame carries
//! an eight-byte trailer bound to a per-direction counter.
//!
//! 中继链路上每个连接的对称密码状态。
//!
//! 连接的每个方向各持有一个 [`TransportCrypto`]。它初始处于禁用状态，
//! 原样透传帧，直到使用协商好的会话密钥调用且仅调用一次 [`TransportCrypto::enable`]。
//! 此后每一帧都带有一个与该方向计数器绑定的八字节尾部。

use crate::crypto::keys::SessionKey;
use crate::crypto::trailer::{self, TRAILER_LEN};
use crate::error::{ProxyError, Result};
use crate::protocol::version;
use aes::Aes256;
use cfb8::cipher::generic_array::GenericArray;
use cfb8::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type Aes256Cfb8Enc = cfb8::Encryptor<Aes256>;
type Aes256Cfb8Dec = cfb8::Decryptor<Aes256>;

/// Which way frames flow through a cipher instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// The stream cipher construction, fixed for the lifetime of a connection.
///
/// 流密码构造，在连接的整个生命周期内固定不变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    /// AES-256 in 8-bit cipher feedback mode, IV = key[0..16].
    Cfb8,
    /// AES-256 in counter mode, IV = key[0..12] || 00 00 00 02.
    Ctr,
}

impl CipherMode {
    /// Picks the mode the given protocol version negotiates.
    ///
    /// 选择给定协议版本所协商的模式。
    pub fn for_protocol(protocol_version: u32) -> Self {
        if protocol_version >= version::COUNTER_MODE_CIPHER_SINCE {
            CipherMode::Ctr
        } else {
            CipherMode::Cfb8
        }
    }
}

enum StreamState {
    Cfb8Encrypt(Box<Aes256Cfb8Enc>),
    Cfb8Decrypt(Box<Aes256Cfb8Dec>),
    Ctr(Box<Aes256Ctr>),
}

impl StreamState {
    fn new(mode: CipherMode, direction: Direction, key: &SessionKey) -> Result<Self> {
        let key = key.as_bytes();
        let invalid = |_: cfb8::cipher::InvalidLength| ProxyError::InvalidState;
        Ok(match (mode, direction) {
            (CipherMode::Ctr, _) => {
                let mut iv = [0u8; 16];
                iv[..12].copy_from_slice(&key[..12]);
                iv[15] = 2;
                StreamState::Ctr(Box::new(Aes256Ctr::new_from_slices(key, &iv).map_err(invalid)?))
            }
            (CipherMode::Cfb8, Direction::Encrypt) => StreamState::Cfb8Encrypt(Box::new(
                Aes256Cfb8Enc::new_from_slices(key, &key[..16]).map_err(invalid)?,
            )),
            (CipherMode::Cfb8, Direction::Decrypt) => StreamState::Cfb8Decrypt(Box::new(
                Aes256Cfb8Dec::new_from_slices(key, &key[..16]).map_err(invalid)?,
            )),
        })
    }

    fn apply(&mut self, buf: &mut [u8]) {
        match self {
            StreamState::Ctr(cipher) => cipher.apply_keystream(buf),
            // CFB8 works on one-byte blocks and carries its shift register across frames.
            StreamState::Cfb8Encrypt(cipher) => {
                for byte in buf.chunks_mut(1) {
                    cipher.encrypt_block_mut(GenericArray::from_mut_slice(byte));
                }
            }
            StreamState::Cfb8Decrypt(cipher) => {
                for byte in buf.chunks_mut(1) {
                    cipher.decrypt_block_mut(GenericArray::from_mut_slice(byte));
                }
            }
        }
    }
}

/// Live cipher material for one direction of one connection.
///
/// 单个连接单个方向上的有效密码材料。
pub struct CipherState {
    key: SessionKey,
    mode: CipherMode,
    counter: u64,
    stream: StreamState,
}

impl CipherState {
    /// Claims the counter value for the next frame.
    fn next_counter(&mut self) -> Result<u64> {
        let current = self.counter;
        self.counter = current.checked_add(1).ok_or(ProxyError::CounterExhausted)?;
        Ok(current)
    }
}

/// The `Disabled -> Enabled` cipher state machine for one direction.
///
/// 单个方向上 `Disabled -> Enabled` 的密码状态机。
pub struct TransportCrypto {
    direction: Direction,
    verify_trailer: bool,
    state: Option<CipherState>,
}

impl TransportCrypto {
    /// An outgoing-side instance.
    pub fn encrypting() -> Self {
        Self {
            direction: Direction::Encrypt,
            verify_trailer: false,
            state: None,
        }
    }

    /// An incoming-side instance. With `verify_trailer` every frame's trailer is
    /// recomputed and a mismatch is reported as [`ProxyError::TrailerMismatch`].
    ///
    /// 输入端实例。启用 `verify_trailer` 时会重新计算每帧的尾部，
    /// 不匹配时报告 [`ProxyError::TrailerMismatch`]。
    pub fn decrypting(verify_trailer: bool) -> Self {
        Self {
            direction: Direction::Decrypt,
            verify_trailer,
            state: None,
        }
    }

    /// Switches the direction on. This is a one-way transition: a second call
    /// fails with [`ProxyError::EncryptionAlreadyEnabled`] and leaves the running
    /// cipher untouched.
    ///
    /// 启用该方向。这是单向转换：第二次调用会以
    /// [`ProxyError::EncryptionAlreadyEnabled`] 失败，且不影响正在运行的密码。
    pub fn enable(&mut self, key: SessionKey, mode: CipherMode) -> Result<()> {
        if self.state.is_some() {
            return Err(ProxyError::EncryptionAlreadyEnabled);
        }
        let stream = StreamState::new(mode, self.direction, &key)?;
        self.state = Some(CipherState {
            key,
            mode,
            counter: 0,
            stream,
        });
        debug!(direction = ?self.direction, ?mode, "transport encryption enabled");
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state.is_some()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> Option<CipherMode> {
        self.state.as_ref().map(|s| s.mode)
    }

    /// The counter value the next frame will use.
    pub fn counter(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.counter)
    }

    /// Encrypts one frame, returning `ciphertext || trailer`. Disabled instances
    /// return the plaintext unchanged.
    ///
    /// 加密一帧并返回 `ciphertext || trailer`。禁用状态下原样返回明文。
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.direction != Direction::Encrypt {
            return Err(ProxyError::InvalidState);
        }
        let Some(state) = self.state.as_mut() else {
            return Ok(plaintext.to_vec());
        };

        let counter = state.next_counter()?;
        let tag = trailer::compute(counter, plaintext, &state.key);

        let mut frame = Vec::with_capacity(plaintext.len() + TRAILER_LEN);
        frame.extend_from_slice(plaintext);
        frame.extend_from_slice(&tag);
        state.stream.apply(&mut frame);

        trace!(counter, len = plaintext.len(), "encrypted frame");
        Ok(frame)
    }

    /// Decrypts one `ciphertext || trailer` frame. Disabled instances return the
    /// frame unchanged.
    ///
    /// 解密一个 `ciphertext || trailer` 帧。禁用状态下原样返回该帧。
    pub fn decrypt(&mut self, frame: &[u8]) -> Result<Vec<u8>> {
        if self.direction != Direction::Decrypt {
            return Err(ProxyError::InvalidState);
        }
        let verify = self.verify_trailer;
        let Some(state) = self.state.as_mut() else {
            return Ok(frame.to_vec());
        };
        if frame.len() < TRAILER_LEN {
            return Err(ProxyError::InvalidMessage);
        }

        let counter = state.next_counter()?;
        let mut plaintext = frame.to_vec();
        state.stream.apply(&mut plaintext);
        let received = plaintext.split_off(plaintext.len() - TRAILER_LEN);

        if verify && received[..] != trailer::compute(counter, &plaintext, &state.key)[..] {
            debug!(counter, "dropping frame with mismatched trailer");
            return Err(ProxyError::TrailerMismatch);
        }

        trace!(counter, len = plaintext.len(), "decrypted frame");
        Ok(plaintext)
    }
}

/// An encrypting direction shared by several producers.
///
/// Counter assignment and frame emission happen under one lock, so frames reach
/// the wire in counter order and no counter value is handed out twice.
///
/// 由多个生产者共享的加密方向。
///
/// 计数器分配与帧发送在同一把锁内完成，因此帧按计数器顺序上线，且不会重复分配计数器值。
#[derive(Clone)]
pub struct SharedEncryptor {
    inner: Arc<Mutex<TransportCrypto>>,
}

impl SharedEncryptor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransportCrypto::encrypting())),
        }
    }

    /// Keying goes through [`crate::codec::ConnectionCodec::enable_encryption`],
    /// which keys both directions of a leg together.
    pub(crate) fn enable(&self, key: SessionKey, mode: CipherMode) -> Result<()> {
        self.inner.lock().enable(key, mode)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().is_enabled()
    }

    /// Encrypts `plaintext` and hands the frame to `emit` before releasing the lock.
    ///
    /// 加密 `plaintext`，并在释放锁之前将帧交给 `emit`。
    pub fn seal_and_emit<R>(&self, plaintext: &[u8], emit: impl FnOnce(Vec<u8>) -> R) -> Result<R> {
        let mut crypto = self.inner.lock();
        let frame = crypto.encrypt(plaintext)?;
        Ok(emit(frame))
    }

    pub fn counter(&self) -> Option<u64> {
        self.inner.lock().counter()
    }
}

impl Default for SharedEncryptor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(seed: u8) -> SessionKey {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
        SessionKey::from_bytes(bytes)
    }

    #[test]
    fn disabled_direction_passes_through() {
        let mut enc = TransportCrypto::encrypting();
        assert_eq!(enc.encrypt(b"plain").unwrap(), b"plain");
        assert_eq!(enc.counter(), None);
    }

    #[test]
    fn cfb8_keeps_stream_state_across_frames() {
        let mut enc = TransportCrypto::encrypting();
        let mut dec = TransportCrypto::decrypting(true);
        enc.enable(key(1), CipherMode::Cfb8).unwrap();
        dec.enable(key(1), CipherMode::Cfb8).unwrap();

        let first = enc.encrypt(b"same bytes").unwrap();
        let second = enc.encrypt(b"same bytes").unwrap();
        assert_ne!(first, second);

        assert_eq!(dec.decrypt(&first).unwrap(), b"same bytes");
        assert_eq!(dec.decrypt(&second).unwrap(), b"same bytes");
    }

    #[test]
    fn tampered_frame_fails_verification() {
        let mut enc = TransportCrypto::encrypting();
        let mut dec = TransportCrypto::decrypting(true);
        enc.enable(key(7), CipherMode::Ctr).unwrap();
        dec.enable(key(7), CipherMode::Ctr).unwrap();

        let mut frame = enc.encrypt(b"payload").unwrap();
        frame[0] ^= 0x01;
        assert!(matches!(dec.decrypt(&frame), Err(ProxyError::TrailerMismatch)));
    }

    #[test]
    fn tampered_frame_passes_when_verification_is_off() {
        let mut enc = TransportCrypto::encrypting();
        let mut dec = TransportCrypto::decrypting(false);
        enc.enable(key(7), CipherMode::Ctr).unwrap();
        dec.enable(key(7), CipherMode::Ctr).unwrap();

        let mut frame = enc.encrypt(b"payload").unwrap();
        frame[0] ^= 0x01;
        let out = dec.decrypt(&frame).unwrap();
        assert_eq!(out.len(), b"payload".len());
        assert_eq!(dec.counter(), Some(1));
    }

    #[test]
    fn short_frame_is_rejected() {
        let mut dec = TransportCrypto::decrypting(false);
        dec.enable(key(3), CipherMode::Ctr).unwrap();
        assert!(matches!(dec.decrypt(&[1, 2, 3]), Err(ProxyError::InvalidMessage)));
    }

    #[test]
    fn mode_threshold_follows_protocol_version() {
        assert_eq!(CipherMode::for_protocol(version::COUNTER_MODE_CIPHER_SINCE), CipherMode::Ctr);
        assert_eq!(CipherMode::for_protocol(version::COUNTER_MODE_CIPHER_SINCE - 1), CipherMode::Cfb8);
    }
}
