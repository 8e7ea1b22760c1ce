//! Integration tests for chain validation and identity forging.
//! 对证书链验证和身份伪造的集成测试。

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use relay_handshake::crypto::{PublicKey, SessionKeyPair, SignedToken};
use relay_handshake::error::{ProxyError, Result};
use relay_handshake::identity::{
    self, AccountSession, OnlineChainCache, StaticAccount, TrustAnchor, forger,
};
use relay_handshake::protocol::auth::{AuthPayload, CertificateChain, IdentityClaim, SkinPayload};
use relay_handshake::protocol::version;
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

fn steve() -> IdentityClaim {
    IdentityClaim::new("Steve", Uuid::new_v4(), "2535400000000000")
}

/// Signs a link announcing `next`, with terminal claims when `identity` is given.
fn link(signer: &SessionKeyPair, next: &PublicKey, identity: Option<&IdentityClaim>) -> String {
    let mut payload = json!({ "identityPublicKey": next.to_base64().unwrap() });
    if let Some(identity) = identity {
        payload["extraData"] = identity.to_extra_data();
    }
    SignedToken::sign(signer, &payload).unwrap().as_str().to_owned()
}

fn corrupt_signature(token: &str) -> String {
    let (head, signature) = token.rsplit_once('.').unwrap();
    let mut bytes = URL_SAFE_NO_PAD.decode(signature).unwrap();
    bytes[10] ^= 0xFF;
    format!("{head}.{}", URL_SAFE_NO_PAD.encode(bytes))
}

/// root (self-signed, vouches for the anchor) -> anchor -> intermediate -> player.
struct FourLinkChain {
    anchor: SessionKeyPair,
    links: Vec<String>,
    player: SessionKeyPair,
}

fn four_link_chain(identity: &IdentityClaim) -> FourLinkChain {
    let anchor = SessionKeyPair::generate();
    let root = SessionKeyPair::generate();
    let intermediate = SessionKeyPair::generate();
    let leaf = SessionKeyPair::generate();
    let player = SessionKeyPair::generate();
    let links = vec![
        link(&root, anchor.public_key(), None),
        link(&anchor, intermediate.public_key(), None),
        link(&intermediate, leaf.public_key(), None),
        link(&leaf, player.public_key(), Some(identity)),
    ];
    FourLinkChain {
        anchor,
        links,
        player,
    }
}

#[test]
fn self_signed_single_link_is_unverified_but_identified() -> Result<()> {
    let anchor = TrustAnchor::well_known()?;
    let identity = steve();
    let key_pair = SessionKeyPair::generate();
    let chain = CertificateChain::new(vec![link(&key_pair, key_pair.public_key(), Some(&identity))]);

    let validation = identity::validate(&chain, anchor.public_key())?;
    println!("single link validated, valid = {}", validation.valid);

    assert!(!validation.valid);
    assert_eq!(validation.identity, identity);
    assert_eq!(&validation.last_public_key, key_pair.public_key());
    Ok(())
}

#[test]
fn anchor_signed_single_link_is_valid() -> Result<()> {
    let anchor = SessionKeyPair::generate();
    let player = SessionKeyPair::generate();
    let identity = steve();
    let chain = CertificateChain::new(vec![link(&anchor, player.public_key(), Some(&identity))]);

    let validation = identity::validate(&chain, anchor.public_key())?;
    assert!(validation.valid);
    assert_eq!(&validation.last_public_key, player.public_key());
    Ok(())
}

#[test]
fn corrupted_link_fails_at_its_own_index() {
    let identity = steve();
    let fixture = four_link_chain(&identity);

    for corrupted in 0..fixture.links.len() {
        let mut links = fixture.links.clone();
        links[corrupted] = corrupt_signature(&links[corrupted]);
        let result = identity::validate(&CertificateChain::new(links), fixture.anchor.public_key());
        println!("corrupted link {corrupted}: {result:?}");

        match result {
            Err(ProxyError::SignatureInvalid { index }) => assert_eq!(index, corrupted),
            other => panic!("expected SignatureInvalid at {corrupted}, got {other:?}"),
        }
    }
}

#[test]
fn three_link_chain_with_anchor_signed_middle() -> Result<()> {
    // --- 1. Setup: link 1 self-signed, link 2 signed by the anchor ---
    println!("--- Building a three-link chain ---");
    let anchor = SessionKeyPair::generate();
    let root = SessionKeyPair::generate();
    let vouched = SessionKeyPair::generate();
    let player = SessionKeyPair::generate();
    let identity = steve();

    let chain = CertificateChain::new(vec![
        link(&root, anchor.public_key(), None),
        link(&anchor, vouched.public_key(), None),
        link(&vouched, player.public_key(), Some(&identity)),
    ]);

    // --- 2. Validate ---
    let validation = identity::validate(&chain, anchor.public_key())?;
    assert!(validation.valid);
    assert_eq!(validation.identity, identity);
    assert_eq!(&validation.last_public_key, player.public_key());

    // --- 3. The skin verifies under the terminal key only ---
    let skin = SkinPayload::new(SignedToken::sign(&player, &json!({ "SkinId": "custom" }))?.as_str());
    let token = identity::verify_skin(&skin, &validation, chain.len())?;
    assert_eq!(token.claim("SkinId"), Some(&json!("custom")));

    let foreign = SkinPayload::new(SignedToken::sign(&root, &json!({ "SkinId": "custom" }))?.as_str());
    assert!(matches!(
        identity::verify_skin(&foreign, &validation, chain.len()),
        Err(ProxyError::SignatureInvalid { index: 3 })
    ));
    Ok(())
}

#[test]
fn four_link_chain_keeps_the_player_key() -> Result<()> {
    let identity = steve();
    let fixture = four_link_chain(&identity);
    let validation = identity::validate(&CertificateChain::new(fixture.links), fixture.anchor.public_key())?;
    assert!(validation.valid);
    assert_eq!(&validation.last_public_key, fixture.player.public_key());
    Ok(())
}

#[test]
fn broken_chain_shapes_are_rejected() {
    let anchor = SessionKeyPair::generate();
    let a = SessionKeyPair::generate();
    let identity = steve();

    assert!(matches!(
        identity::validate(&CertificateChain::default(), anchor.public_key()),
        Err(ProxyError::ChainMalformed(_))
    ));
    assert!(matches!(
        identity::validate(&CertificateChain::new(vec!["not-a-token".into()]), anchor.public_key()),
        Err(ProxyError::ChainMalformed(_))
    ));

    let keyless = SignedToken::sign(&a, &json!({ "certificateAuthority": true })).unwrap();
    let chain = CertificateChain::new(vec![
        keyless.as_str().to_owned(),
        link(&a, a.public_key(), Some(&identity)),
    ]);
    assert!(matches!(
        identity::validate(&chain, anchor.public_key()),
        Err(ProxyError::ChainPayloadMissingKey { index: 0 })
    ));

    let no_extra = CertificateChain::new(vec![link(&a, a.public_key(), None)]);
    assert!(matches!(
        identity::validate(&no_extra, anchor.public_key()),
        Err(ProxyError::TerminalClaimMissing("extraData"))
    ));

    let bare_token = AuthPayload::Token {
        token: "opaque".into(),
        chain: None,
    };
    assert!(matches!(
        identity::validate_payload(&bare_token, anchor.public_key()),
        Err(ProxyError::TerminalClaimMissing(_))
    ));
}

#[test]
fn forged_offline_chain_recovers_identity() -> Result<()> {
    let identity = steve();
    let key_pair = SessionKeyPair::generate();
    let chain = forger::forge_offline_chain(&key_pair, &identity)?;
    assert_eq!(chain.len(), 1);

    let validation = identity::validate(&chain, TrustAnchor::well_known()?.public_key())?;
    assert!(!validation.valid);
    assert_eq!(validation.identity, identity);

    let original = SessionKeyPair::generate();
    let claims = json!({ "SkinId": "abc", "SkinData": "AAAA", "ThirdPartyName": "Steve" });
    let skin = SkinPayload::new(SignedToken::sign(&original, &claims)?.as_str());
    let forged = forger::forge_offline_skin(&key_pair, &skin)?;

    let token = identity::verify_skin(&forged, &validation, chain.len())?;
    assert_eq!(token.payload(), &claims);
    // Field order survives re-signing.
    let keys: Vec<&String> = token.payload().as_object().unwrap().keys().collect();
    assert_eq!(keys, ["SkinId", "SkinData", "ThirdPartyName"]);
    Ok(())
}

#[test]
fn online_chain_is_anchored_and_skin_names_destination() -> Result<()> {
    let account = StaticAccount::new(steve(), SessionKeyPair::generate());
    let anchor = TrustAnchor::forged();

    let chain = forger::forge_online_chain(&account, anchor)?;
    assert_eq!(chain.len(), 2);
    let validation = identity::validate(&chain, anchor.public_key())?;
    assert!(validation.valid);
    assert_eq!(&validation.identity, account.identity());
    assert_eq!(&validation.last_public_key, account.key_pair().public_key());

    let skin = SkinPayload::new(SignedToken::sign(&SessionKeyPair::generate(), &json!({ "SkinId": "x" }))?.as_str());
    let forged = forger::forge_online_skin(&account, &skin, "play.example.net:19132", version::CURRENT)?;
    let token = identity::verify_skin(&forged, &validation, chain.len())?;
    assert_eq!(
        token.claim(forger::SERVER_ADDRESS_CLAIM),
        Some(&Value::String("play.example.net:19132".into()))
    );

    let legacy = forger::forge_online_skin(&account, &skin, "ignored", version::SKIN_SERVER_ADDRESS_SINCE - 1)?;
    assert!(legacy.parse()?.claim(forger::SERVER_ADDRESS_CLAIM).is_none());
    Ok(())
}

#[test]
fn online_chain_prefixes_issued_links() -> Result<()> {
    let service = SessionKeyPair::generate();
    let account_key = SessionKeyPair::generate();
    let identity = steve();
    let issued = vec![link(&service, account_key.public_key(), Some(&identity))];
    let account = StaticAccount::new(identity.clone(), account_key).with_issued_chain(issued.clone());

    let anchor = TrustAnchor::from_key_pair(service);
    let chain = forger::forge_online_chain(&account, &anchor)?;
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.links[1..], issued[..]);

    let validation = identity::validate(&chain, anchor.public_key())?;
    assert!(validation.valid);
    assert_eq!(validation.identity, identity);
    Ok(())
}

#[test]
fn online_chain_needs_anchor_signing_key() {
    let account = StaticAccount::new(steve(), SessionKeyPair::generate());
    let verify_only = TrustAnchor::from_public_key(SessionKeyPair::generate().public_key().clone());
    assert!(matches!(
        forger::forge_online_chain(&account, &verify_only),
        Err(ProxyError::ForgeryFailure(_))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn online_chain_is_forged_once_for_concurrent_sessions() -> Result<()> {
    const SESSIONS: u64 = 16;
    let cache = Arc::new(OnlineChainCache::new());
    let account = Arc::new(StaticAccount::new(steve(), SessionKeyPair::generate()));

    let mut handles = Vec::new();
    for _ in 0..SESSIONS {
        let cache = cache.clone();
        let account = account.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_forge(account.account_id(), version::CURRENT, || {
                    forger::forge_online_chain(account.as_ref(), TrustAnchor::forged())
                })
                .await
        }));
    }

    let mut chains = Vec::new();
    for handle in handles {
        chains.push(handle.await.expect("session task panicked")?);
    }
    println!("hits = {}, computes = {}", cache.hits(), cache.computes());

    assert_eq!(cache.computes(), 1);
    assert_eq!(cache.hits(), SESSIONS - 1);
    assert!(chains.windows(2).all(|pair| pair[0] == pair[1]));
    Ok(())
}
