//! Trust anchors: the compiled-in root key and the process-wide stand-in used
//! when no service-issued chain is available.
//!
//! 信任锚：编译进程序的根密钥，以及在没有服务签发链时使用的进程级替代密钥。

use crate::crypto::keys::{PublicKey, SessionKeyPair};
use crate::error::Result;
use std::sync::OnceLock;

/// Base64 SPKI DER of the root key that signs every genuine identity chain.
pub const WELL_KNOWN_ROOT_KEY: &str = "MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAE8ELkixyLcwlZryUQcu1TvPOmI2B7vX83ndnWRUaXm74wFfa5f/lwQNTfrLVHa2PmenpGI6JhIMUJaWZrjmMj90NoKNFSNBuKdm8rYiXsfaz3K36x/1U26HpG0ZxK/V1V";

static FORGED: OnceLock<TrustAnchor> = OnceLock::new();

/// A root of trust. Only anchors created from a key pair can sign.
///
/// 信任根。只有由密钥对创建的锚才能签名。
#[derive(Debug, Clone)]
pub struct TrustAnchor {
    public: PublicKey,
    key_pair: Option<SessionKeyPair>,
}

impl TrustAnchor {
    /// The compiled-in root key. Verification only.
    pub fn well_known() -> Result<Self> {
        Ok(Self::from_public_key(PublicKey::from_base64(WELL_KNOWN_ROOT_KEY)?))
    }

    /// The process-wide trust-anchor-equivalent key, generated on first use and
    /// never replaced afterwards.
    ///
    /// 进程级的信任锚等价密钥，首次使用时生成，此后不再替换。
    pub fn forged() -> &'static TrustAnchor {
        FORGED.get_or_init(|| Self::from_key_pair(SessionKeyPair::generate()))
    }

    pub fn from_public_key(public: PublicKey) -> Self {
        Self {
            public,
            key_pair: None,
        }
    }

    pub fn from_key_pair(key_pair: SessionKeyPair) -> Self {
        Self {
            public: key_pair.public_key().clone(),
            key_pair: Some(key_pair),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn key_pair(&self) -> Option<&SessionKeyPair> {
        self.key_pair.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_root_parses() {
        let anchor = TrustAnchor::well_known().unwrap();
        assert!(anchor.key_pair().is_none());
        assert_eq!(anchor.public_key().to_base64().unwrap(), WELL_KNOWN_ROOT_KEY);
    }

    #[test]
    fn forged_anchor_is_stable() {
        let first = TrustAnchor::forged().public_key().clone();
        assert_eq!(&first, TrustAnchor::forged().public_key());
        assert!(TrustAnchor::forged().key_pair().is_some());
    }
}
