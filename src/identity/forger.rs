//! Builds the chain and skin presented on the server-facing leg.
//!
//! Offline forging self-signs a one-link chain with a per-session key pair.
//! Online forging roots a chain in the account's long-lived key and lets either
//! the authentication service's links or the process trust anchor vouch for it.
//! Every failure here is a [`ProxyError::ForgeryFailure`]; nothing falls back to
//! an unsigned chain.
//!
//! 构建在面向服务器一侧链路上出示的证书链和皮肤。
//!
//! 离线伪造使用每个会话的密钥对自签名一条单链节的链。
//! 在线伪造以账户的长期密钥为根，并由认证服务签发的链节或进程信任锚为其担保。
//! 此处的任何失败都是 [`ProxyError::ForgeryFailure`]；不会退回到未签名的链。

use crate::crypto::keys::SessionKeyPair;
use crate::crypto::signature::SignedToken;
use crate::error::{ProxyError, Result};
use crate::identity::account::AccountSession;
use crate::identity::anchor::TrustAnchor;
use crate::protocol::auth::{ForgedChain, ForgedSkin, IdentityClaim, SkinPayload};
use crate::protocol::version;
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// How long a forged link stays valid.
pub const LINK_LIFETIME_SECS: u64 = 2 * 24 * 60 * 60;

/// Back-dating applied to `nbf` to tolerate clock skew.
pub const NOT_BEFORE_SKEW_SECS: u64 = 60;

/// Skin claim naming the server the skin was signed for.
pub const SERVER_ADDRESS_CLAIM: &str = "ServerAddress";

/// A single self-signed link carrying `identity` and the session's public key.
///
/// 一个携带 `identity` 和会话公钥的自签名单链节。
pub fn forge_offline_chain(key_pair: &SessionKeyPair, identity: &IdentityClaim) -> Result<ForgedChain> {
    let (nbf, exp) = validity_window();
    let payload = json!({
        "extraData": identity.to_extra_data(),
        "identityPublicKey": public_text(key_pair)?,
        "nbf": nbf,
        "exp": exp,
    });
    let link = sign(key_pair, &payload)?;
    debug!(display_name = %identity.display_name, "forged offline chain");
    Ok(ForgedChain::new(vec![link]))
}

/// Re-signs the client's skin claims under `key_pair` without touching them.
pub fn forge_offline_skin(key_pair: &SessionKeyPair, skin: &SkinPayload) -> Result<ForgedSkin> {
    let claims = skin_claims(skin)?;
    Ok(SkinPayload::new(sign(key_pair, &claims)?))
}

/// The server-facing chain for an authenticated account.
///
/// `anchor` must hold a key pair when the account has no service-issued links,
/// since the proxy then signs the vouching link itself.
///
/// 已认证账户在面向服务器一侧使用的证书链。
///
/// 当账户没有服务签发的链节时，`anchor` 必须持有密钥对，因为此时由代理自行签署担保链节。
pub fn forge_online_chain(account: &dyn AccountSession, anchor: &TrustAnchor) -> Result<ForgedChain> {
    let key_pair = account.key_pair();
    let (nbf, exp) = validity_window();
    let anchor_text = anchor
        .public_key()
        .to_base64()
        .map_err(into_forgery)?;

    let root = sign(
        key_pair,
        &json!({
            "certificateAuthority": true,
            "exp": exp,
            "identityPublicKey": anchor_text,
            "nbf": nbf,
        }),
    )?;

    let mut links = vec![root];
    match account.issued_chain() {
        Some([]) => {
            return Err(ProxyError::ForgeryFailure("account issued an empty chain".into()));
        }
        Some(issued) => links.extend(issued.iter().cloned()),
        None => {
            let anchor_pair = anchor.key_pair().ok_or_else(|| {
                ProxyError::ForgeryFailure("trust anchor has no signing key".into())
            })?;
            links.push(sign(
                anchor_pair,
                &json!({
                    "extraData": account.identity().to_extra_data(),
                    "identityPublicKey": public_text(key_pair)?,
                    "nbf": nbf,
                    "exp": exp,
                }),
            )?);
        }
    }

    debug!(
        account = account.account_id(),
        links = links.len(),
        "forged online chain"
    );
    Ok(ForgedChain::new(links))
}

/// Signs the client's skin claims with the account key. From the protocol
/// version that requires it, the claims name `destination`.
///
/// 使用账户密钥签署客户端的皮肤声明。从要求该字段的协议版本起，声明中会写入 `destination`。
pub fn forge_online_skin(
    account: &dyn AccountSession,
    skin: &SkinPayload,
    destination: &str,
    protocol_version: u32,
) -> Result<ForgedSkin> {
    let mut claims = skin_claims(skin)?;
    if version::skin_binds_server_address(protocol_version) {
        let Value::Object(map) = &mut claims else {
            return Err(ProxyError::ForgeryFailure("skin claims are not an object".into()));
        };
        map.insert(SERVER_ADDRESS_CLAIM.to_owned(), Value::String(destination.to_owned()));
    }
    Ok(SkinPayload::new(sign(account.key_pair(), &claims)?))
}

fn skin_claims(skin: &SkinPayload) -> Result<Value> {
    skin.parse()
        .map(|token| token.payload().clone())
        .map_err(into_forgery)
}

fn sign(key_pair: &SessionKeyPair, payload: &Value) -> Result<String> {
    SignedToken::sign(key_pair, payload)
        .map(|token| token.as_str().to_owned())
        .map_err(into_forgery)
}

fn public_text(key_pair: &SessionKeyPair) -> Result<String> {
    key_pair.public_key().to_base64().map_err(into_forgery)
}

fn into_forgery(err: ProxyError) -> ProxyError {
    match err {
        ProxyError::ForgeryFailure(_) => err,
        other => ProxyError::ForgeryFailure(other.to_string()),
    }
}

fn validity_window() -> (u64, u64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    (now.saturating_sub(NOT_BEFORE_SKEW_SECS), now + LINK_LIFETIME_SECS)
}
