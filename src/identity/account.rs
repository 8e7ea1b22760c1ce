//! The authenticated account the online mode forges on behalf of.

use crate::crypto::keys::SessionKeyPair;
use crate::protocol::auth::IdentityClaim;

/// Provider of an already authenticated account. Refreshing credentials is the
/// provider's business; the proxy only reads them.
///
/// 已认证账户的提供者。凭据刷新由提供者负责；代理只读取它们。
pub trait AccountSession: Send + Sync {
    /// Stable id used to key cached chains.
    fn account_id(&self) -> &str;

    fn identity(&self) -> &IdentityClaim;

    /// The long-lived key pair the account's chain vouches for.
    fn key_pair(&self) -> &SessionKeyPair;

    fn authorization_token(&self) -> &str;

    /// Chain links issued by the authentication service for `key_pair`, if the
    /// provider fetched them.
    fn issued_chain(&self) -> Option<&[String]> {
        None
    }
}

/// An account held entirely in memory.
#[derive(Debug, Clone)]
pub struct StaticAccount {
    account_id: String,
    identity: IdentityClaim,
    key_pair: SessionKeyPair,
    authorization_token: String,
    issued_chain: Option<Vec<String>>,
}

impl StaticAccount {
    pub fn new(identity: IdentityClaim, key_pair: SessionKeyPair) -> Self {
        Self {
            account_id: identity.identity_id.to_string(),
            identity,
            key_pair,
            authorization_token: String::new(),
            issued_chain: None,
        }
    }

    pub fn with_authorization_token(mut self, token: impl Into<String>) -> Self {
        self.authorization_token = token.into();
        self
    }

    pub fn with_issued_chain(mut self, links: Vec<String>) -> Self {
        self.issued_chain = Some(links);
        self
    }
}

impl AccountSession for StaticAccount {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn identity(&self) -> &IdentityClaim {
        &self.identity
    }

    fn key_pair(&self) -> &SessionKeyPair {
        &self.key_pair
    }

    fn authorization_token(&self) -> &str {
        &self.authorization_token
    }

    fn issued_chain(&self) -> Option<&[String]> {
        self.issued_chain.as_deref()
    }
}
