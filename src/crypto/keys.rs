//! Manages identity key pairs and the derivation of per-connection session keys.
//!
//! The identity keys are P-384 ECDSA pairs whose public halves travel through the
//! certificate chain as base64 SPKI DER text. The same pair is used for the ECDH
//! agreement that keys the transport cipher once the destination answers with its
//! server-to-client handshake token.
//!
//! 管理身份密钥对以及每个连接的会话密钥派生。
//!
//! 身份密钥是 P-384 ECDSA 密钥对，其公钥以 base64 SPKI DER 文本形式在证书链中传递。
//! 当目标服务器以其服务器到客户端握手令牌作出应答后，同一密钥对也用于 ECDH 协商，
//! 从而为传输密码提供密钥。

use crate::crypto::signature::SignedToken;
use crate::error::{ProxyError, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use p384::ecdsa::{SigningKey, VerifyingKey};
use p384::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of the random salt carried by a server-to-client handshake token.
pub const HANDSHAKE_SALT_LEN: usize = 16;

/// A P-384 public key as it appears in `identityPublicKey` and `x5u` claims.
///
/// 出现在 `identityPublicKey` 和 `x5u` 声明中的 P-384 公钥。
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Parses a base64-encoded SPKI DER public key.
    ///
    /// 解析 base64 编码的 SPKI DER 公钥。
    pub fn from_base64(text: &str) -> Result<Self> {
        let der = STANDARD
            .decode(text.trim())
            .map_err(|e| ProxyError::ChainMalformed(format!("public key is not base64: {e}")))?;
        VerifyingKey::from_public_key_der(&der)
            .map(PublicKey)
            .map_err(|e| ProxyError::ChainMalformed(format!("public key is not valid P-384 SPKI: {e}")))
    }

    /// Encodes the key the way chain claims carry it.
    ///
    /// 按照链声明携带的方式对密钥进行编码。
    pub fn to_base64(&self) -> Result<String> {
        let der = self
            .0
            .to_public_key_der()
            .map_err(|e| ProxyError::ForgeryFailure(format!("public key encoding failed: {e}")))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.0
    }
}

impl From<VerifyingKey> for PublicKey {
    fn from(key: VerifyingKey) -> Self {
        PublicKey(key)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_base64() {
            Ok(text) => f.debug_tuple("PublicKey").field(&text).finish(),
            Err(_) => f.write_str("PublicKey(<unencodable>)"),
        }
    }
}

/// An asymmetric key pair held exclusively by one session (offline mode) or
/// shared by every session of one authenticated account (online mode).
///
/// 由单个会话独占（离线模式）或由同一认证账户的所有会话共享（在线模式）的非对称密钥对。
#[derive(Clone)]
pub struct SessionKeyPair {
    signing: SigningKey,
    public: PublicKey,
}

impl SessionKeyPair {
    /// Generates a fresh P-384 key pair.
    ///
    /// 生成新的 P-384 密钥对。
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    pub fn from_signing_key(signing: SigningKey) -> Self {
        let public = PublicKey(VerifyingKey::from(&signing));
        Self { signing, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing
    }

    /// Runs P-384 ECDH against the peer's public key and returns the raw shared secret.
    fn agree(&self, peer: &PublicKey) -> Vec<u8> {
        let shared = p384::ecdh::diffie_hellman(
            self.signing.as_nonzero_scalar(),
            peer.verifying_key().as_affine(),
        );
        shared.raw_secret_bytes().to_vec()
    }
}

impl fmt::Debug for SessionKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// The 32-byte symmetric key negotiated for one connection.
///
/// 为单个连接协商出的 32 字节对称密钥。
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        SessionKey(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Derives the session key: `SHA256(salt || ECDH(local, peer))`.
///
/// Both ends of a leg compute the same value from their own private key and the
/// other side's public key.
///
/// 派生会话密钥：`SHA256(salt || ECDH(local, peer))`。
///
/// 一条链路的两端使用各自的私钥和对方的公钥计算出相同的值。
pub fn derive_session_key(local: &SessionKeyPair, peer: &PublicKey, salt: &[u8]) -> SessionKey {
    let secret = local.agree(peer);
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(&secret);
    SessionKey(hasher.finalize().into())
}

/// Builds a server-to-client handshake token for `peer` and returns it together
/// with the session key the server side will use.
///
/// Used when the proxy terminates encryption on the client-facing leg.
///
/// 为 `peer` 构建服务器到客户端的握手令牌，并返回该令牌以及服务器端将使用的会话密钥。
pub fn issue_server_handshake(
    server: &SessionKeyPair,
    peer: &PublicKey,
) -> Result<(SignedToken, SessionKey)> {
    let mut salt = [0u8; HANDSHAKE_SALT_LEN];
    OsRng.fill_bytes(&mut salt);

    let token = SignedToken::sign(server, &json!({ "salt": STANDARD.encode(salt) }))?;
    Ok((token, derive_session_key(server, peer, &salt)))
}

/// Verifies a server-to-client handshake token against its own `x5u` key and
/// derives the session key for the client side.
///
/// 根据令牌自身的 `x5u` 密钥验证服务器到客户端的握手令牌，并为客户端派生会话密钥。
pub fn accept_server_handshake(client: &SessionKeyPair, token: &str) -> Result<SessionKey> {
    let token = SignedToken::parse(token)?;
    let server_key = token
        .header_key()?
        .ok_or_else(|| ProxyError::ChainMalformed("handshake token has no x5u header".into()))?;
    if !token.verify(&server_key) {
        return Err(ProxyError::SignatureInvalid { index: 0 });
    }

    let salt = token
        .claim("salt")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProxyError::ChainMalformed("handshake token has no salt".into()))?;
    let salt = STANDARD
        .decode(salt)
        .map_err(|e| ProxyError::ChainMalformed(format!("handshake salt is not base64: {e}")))?;

    Ok(derive_session_key(client, &server_key, &salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_text_round_trips() {
        let pair = SessionKeyPair::generate();
        let text = pair.public_key().to_base64().unwrap();
        assert_eq!(&PublicKey::from_base64(&text).unwrap(), pair.public_key());
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let server = SessionKeyPair::generate();
        let client = SessionKeyPair::generate();

        let (token, server_key) = issue_server_handshake(&server, client.public_key()).unwrap();
        let client_key = accept_server_handshake(&client, token.as_str()).unwrap();

        assert_eq!(server_key, client_key);
    }

    #[test]
    fn garbage_key_text_is_malformed() {
        assert!(matches!(
            PublicKey::from_base64("not a key"),
            Err(ProxyError::ChainMalformed(_))
        ));
    }
}
