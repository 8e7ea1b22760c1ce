//! Certificate chain validation.
//!
//! Links are walked root first. Each link must verify either against the trust
//! anchor or against the key the previous link vouched for; the first link may
//! instead be self-signed under its own `x5u` key. A chain in which no link
//! verified against the anchor is still returned, but with `valid == false`.
//!
//! 证书链验证。
//!
//! 按根优先顺序遍历链节。每个链节必须能通过信任锚或上一链节所担保的密钥验证；
//! 第一个链节也可以是使用其自身 `x5u` 密钥的自签名。没有任何链节通过信任锚验证的链
//! 仍会被返回，但 `valid == false`。

use crate::crypto::keys::PublicKey;
use crate::crypto::signature::SignedToken;
use crate::error::{ProxyError, Result};
use crate::protocol::auth::{AuthPayload, CertificateChain, IdentityClaim, SkinPayload};
use serde_json::Value;
use tracing::{debug, trace};

/// The outcome of a successful walk over a chain.
///
/// 成功遍历证书链后的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainValidation {
    /// At least one link verified against the trust anchor.
    pub valid: bool,
    pub identity: IdentityClaim,
    /// The terminal link's `identityPublicKey`. The skin token must verify under it.
    pub last_public_key: PublicKey,
}

/// Validates `chain` against `anchor`.
///
/// # Errors
///
/// - [`ProxyError::ChainMalformed`] for an empty chain or a link that does not parse.
/// - [`ProxyError::SignatureInvalid`] naming the first link whose signature fails.
/// - [`ProxyError::ChainPayloadMissingKey`] for a non-terminal link without `identityPublicKey`.
/// - [`ProxyError::TerminalClaimMissing`] when the terminal link lacks its claims.
///
/// 根据 `anchor` 验证 `chain`。
pub fn validate(chain: &CertificateChain, anchor: &PublicKey) -> Result<ChainValidation> {
    if chain.is_empty() {
        return Err(ProxyError::ChainMalformed("chain has no links".into()));
    }
    let links = chain.parse_links()?;
    let terminal = links.len() - 1;

    let mut valid = false;
    let mut running: Option<PublicKey> = None;

    for (index, link) in links.iter().enumerate() {
        let anchored = if link.verify(anchor) {
            true
        } else {
            let fallback = match running.take() {
                Some(previous) => previous,
                // The root may be self-signed.
                None => link.header_key()?.ok_or(ProxyError::SignatureInvalid { index })?,
            };
            if !link.verify(&fallback) {
                debug!(index, "chain link failed signature verification");
                return Err(ProxyError::SignatureInvalid { index });
            }
            &fallback == anchor
        };
        valid |= anchored;
        trace!(index, anchored, "chain link verified");

        let next = match identity_public_key(link)? {
            Some(key) => key,
            None if index == terminal => {
                return Err(ProxyError::TerminalClaimMissing("identityPublicKey"));
            }
            None => return Err(ProxyError::ChainPayloadMissingKey { index }),
        };
        running = Some(next);
    }

    let extra = links[terminal]
        .claim("extraData")
        .ok_or(ProxyError::TerminalClaimMissing("extraData"))?;
    let identity = IdentityClaim::from_extra_data(extra)?;
    let last_public_key = running.ok_or(ProxyError::TerminalClaimMissing("identityPublicKey"))?;

    debug!(valid, links = links.len(), display_name = %identity.display_name, "chain validated");
    Ok(ChainValidation {
        valid,
        identity,
        last_public_key,
    })
}

/// Validates whichever chain an authentication payload carries.
///
/// A token payload without the accompanying legacy chain has no identity the
/// proxy can check, and is rejected.
///
/// 验证身份验证载荷携带的任意证书链。
pub fn validate_payload(payload: &AuthPayload, anchor: &PublicKey) -> Result<ChainValidation> {
    match payload {
        AuthPayload::SelfSigned(chain) | AuthPayload::Full(chain) => validate(chain, anchor),
        AuthPayload::Token {
            chain: Some(chain), ..
        } => validate(chain, anchor),
        AuthPayload::Token { chain: None, .. } => Err(ProxyError::TerminalClaimMissing("extraData")),
    }
}

/// Verifies the skin token under the chain's terminal key.
///
/// A failure is reported as [`ProxyError::SignatureInvalid`] with `index` set to
/// the chain length, i.e. the position just past the terminal link.
///
/// 使用证书链的终端密钥验证皮肤令牌。
pub fn verify_skin(
    skin: &SkinPayload,
    validation: &ChainValidation,
    chain_len: usize,
) -> Result<SignedToken> {
    let token = skin.parse()?;
    if !token.verify(&validation.last_public_key) {
        return Err(ProxyError::SignatureInvalid { index: chain_len });
    }
    Ok(token)
}

fn identity_public_key(link: &SignedToken) -> Result<Option<PublicKey>> {
    match link.claim("identityPublicKey") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => PublicKey::from_base64(text).map(Some),
        Some(_) => Err(ProxyError::ChainMalformed(
            "identityPublicKey is not a string".into(),
        )),
    }
}
