//! Creation and verification of the compact ES384 tokens that make up identity
//! chains, skin payloads and handshake messages.
//!
//! This module centralizes the token format so that the validator and the forger
//! agree byte-for-byte on what gets signed.
//!
//! 创建和验证构成身份链、皮肤载荷和握手消息的紧凑 ES384 令牌。
//!
//! 该模块集中了令牌格式，确保验证器和伪造器对签名内容的理解逐字节一致。

use crate::crypto::keys::{PublicKey, SessionKeyPair};
use crate::error::{ProxyError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use p384::ecdsa::Signature;
use p384::ecdsa::signature::{Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The only signing algorithm the chain uses.
pub const ALGORITHM: &str = "ES384";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5u: Option<String>,
}

/// One signed token in compact serialization.
///
/// 以紧凑序列化形式表示的单个签名令牌。
#[derive(Debug, Clone)]
pub struct SignedToken {
    compact: String,
    header: TokenHeader,
    payload: Value,
    /// Byte length of `header.payload`, the signed portion of `compact`.
    signing_input_len: usize,
    signature: Vec<u8>,
}

impl SignedToken {
    /// Parses a compact token without verifying it.
    ///
    /// 解析紧凑令牌但不进行验证。
    pub fn parse(compact: &str) -> Result<Self> {
        let mut parts = compact.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ProxyError::ChainMalformed(
                "token must have exactly three segments".into(),
            ));
        };

        let header: TokenHeader = serde_json::from_slice(&decode_segment(header)?)
            .map_err(|e| ProxyError::ChainMalformed(format!("token header: {e}")))?;
        let payload_value: Value = serde_json::from_slice(&decode_segment(payload)?)
            .map_err(|e| ProxyError::ChainMalformed(format!("token payload: {e}")))?;
        let signature = decode_segment(signature)?;

        Ok(Self {
            signing_input_len: compact.len() - signature_segment_len(compact),
            compact: compact.to_owned(),
            header,
            payload: payload_value,
            signature,
        })
    }

    /// Signs `payload` with `key_pair`, announcing the public key in `x5u`.
    ///
    /// 使用 `key_pair` 对 `payload` 签名，并在 `x5u` 中公布公钥。
    pub fn sign(key_pair: &SessionKeyPair, payload: &Value) -> Result<Self> {
        let header = TokenHeader {
            alg: ALGORITHM.to_owned(),
            x5u: Some(key_pair.public_key().to_base64()?),
        };

        let header_json = serde_json::to_vec(&header)?;
        let payload_json = serde_json::to_vec(payload)?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header_json),
            URL_SAFE_NO_PAD.encode(payload_json)
        );

        let signature: Signature = key_pair
            .signing_key()
            .try_sign(signing_input.as_bytes())
            .map_err(|e| ProxyError::ForgeryFailure(format!("ES384 signing failed: {e}")))?;
        let signature = signature.to_bytes().to_vec();

        Ok(Self {
            signing_input_len: signing_input.len(),
            compact: format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(&signature)),
            header,
            payload: payload.clone(),
            signature,
        })
    }

    /// Checks the signature against `key`. A token with a foreign algorithm never verifies.
    ///
    /// 使用 `key` 校验签名。算法不符的令牌永远不会通过验证。
    pub fn verify(&self, key: &PublicKey) -> bool {
        if self.header.alg != ALGORITHM {
            return false;
        }
        let Ok(signature) = Signature::from_slice(&self.signature) else {
            return false;
        };
        key.verifying_key()
            .verify(self.signing_input(), &signature)
            .is_ok()
    }

    /// The key named by the `x5u` header, if any.
    pub fn header_key(&self) -> Result<Option<PublicKey>> {
        self.header
            .x5u
            .as_deref()
            .map(PublicKey::from_base64)
            .transpose()
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    pub fn as_str(&self) -> &str {
        &self.compact
    }

    fn signing_input(&self) -> &[u8] {
        &self.compact.as_bytes()[..self.signing_input_len]
    }
}

fn decode_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| ProxyError::ChainMalformed(format!("token segment is not base64url: {e}")))
}

/// Length of the trailing `.signature` part, separator included.
fn signature_segment_len(compact: &str) -> usize {
    compact.rfind('.').map_or(0, |dot| compact.len() - dot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signed_token_verifies_after_reparse() {
        let pair = SessionKeyPair::generate();
        let token = SignedToken::sign(&pair, &json!({ "hello": "world" })).unwrap();

        let parsed = SignedToken::parse(token.as_str()).unwrap();
        assert!(parsed.verify(pair.public_key()));
        assert_eq!(parsed.header_key().unwrap().as_ref(), Some(pair.public_key()));
        assert_eq!(parsed.claim("hello"), Some(&json!("world")));
    }

    #[test]
    fn foreign_key_does_not_verify() {
        let pair = SessionKeyPair::generate();
        let other = SessionKeyPair::generate();
        let token = SignedToken::sign(&pair, &json!({})).unwrap();
        assert!(!token.verify(other.public_key()));
    }

    #[test]
    fn two_segment_token_is_malformed() {
        assert!(matches!(
            SignedToken::parse("abc.def"),
            Err(ProxyError::ChainMalformed(_))
        ));
    }
}
