//! Identity-bearing payloads carried by the login packet.
//!
//! 登录数据包中携带身份信息的载荷。

use crate::crypto::signature::SignedToken;
use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// The player identity extracted from a validated chain or from an account.
///
/// 从已验证的证书链或账户中提取的玩家身份。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaim {
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "identity")]
    pub identity_id: Uuid,
    #[serde(rename = "XUID", default)]
    pub xuid: String,
}

impl IdentityClaim {
    pub fn new(display_name: impl Into<String>, identity_id: Uuid, xuid: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            identity_id,
            xuid: xuid.into(),
        }
    }

    /// Reads the claim from a terminal link's `extraData` object.
    ///
    /// 从终端链节的 `extraData` 对象中读取身份声明。
    pub fn from_extra_data(extra: &Value) -> Result<Self> {
        let display_name = extra
            .get("displayName")
            .and_then(Value::as_str)
            .ok_or(ProxyError::TerminalClaimMissing("extraData.displayName"))?;
        let identity = extra
            .get("identity")
            .and_then(Value::as_str)
            .ok_or(ProxyError::TerminalClaimMissing("extraData.identity"))?;
        let identity_id = Uuid::parse_str(identity)
            .map_err(|e| ProxyError::ChainMalformed(format!("extraData.identity: {e}")))?;
        let xuid = extra.get("XUID").and_then(Value::as_str).unwrap_or_default();

        Ok(Self::new(display_name, identity_id, xuid))
    }

    pub fn to_extra_data(&self) -> Value {
        json!({
            "displayName": self.display_name,
            "identity": self.identity_id.hyphenated().to_string(),
            "XUID": self.xuid,
        })
    }
}

/// An ordered list of compact tokens, root first.
///
/// 按根优先顺序排列的紧凑令牌列表。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CertificateChain {
    #[serde(rename = "chain")]
    pub links: Vec<String>,
}

impl CertificateChain {
    pub fn new(links: Vec<String>) -> Self {
        Self { links }
    }

    /// Parses the `{"chain": [...]}` document form.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| ProxyError::ChainMalformed(format!("chain document: {e}")))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Parses every link, failing on the first one that is not a token.
    pub fn parse_links(&self) -> Result<Vec<SignedToken>> {
        self.links
            .iter()
            .enumerate()
            .map(|(index, link)| {
                SignedToken::parse(link).map_err(|e| match e {
                    ProxyError::ChainMalformed(reason) => {
                        ProxyError::ChainMalformed(format!("link {index}: {reason}"))
                    }
                    other => other,
                })
            })
            .collect()
    }
}

/// The client's signed skin token. Its payload is application data the proxy
/// forwards without interpreting.
///
/// 客户端签名的皮肤令牌。其载荷是代理不做解释而直接转发的应用数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkinPayload {
    pub token: String,
}

impl SkinPayload {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn parse(&self) -> Result<SignedToken> {
        SignedToken::parse(&self.token)
    }
}

/// Forged artifacts share the shape of the originals.
pub type ForgedChain = CertificateChain;
pub type ForgedSkin = SkinPayload;

/// The authentication payload variants seen across protocol versions.
///
/// 各协议版本中出现的身份验证载荷变体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthPayload {
    /// A chain rooted in a self-signed link, as sent to offline servers.
    SelfSigned(CertificateChain),
    /// A chain expected to pass trust-anchor validation.
    Full(CertificateChain),
    /// A service token, optionally accompanied by the legacy chain.
    Token {
        token: String,
        chain: Option<CertificateChain>,
    },
}

impl AuthPayload {
    /// The certificate chain carried by this payload, if any.
    pub fn chain(&self) -> Option<&CertificateChain> {
        match self {
            AuthPayload::SelfSigned(chain) | AuthPayload::Full(chain) => Some(chain),
            AuthPayload::Token { chain, .. } => chain.as_ref(),
        }
    }
}
