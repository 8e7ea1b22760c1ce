//! The per-connection handshake state machine.
//!
//! One orchestrator is created per client connection and is driven serially by
//! the dispatch layer: client packets go to [`HandshakeOrchestrator::handle_upstream`],
//! server packets to [`HandshakeOrchestrator::handle_downstream`]. It validates the
//! client's chain, opens the server-facing leg, forges the login presented there
//! and steps aside once the destination accepts it.
//!
//! 每个连接的握手状态机。
//!
//! 每个客户端连接创建一个编排器，由分发层串行驱动：客户端数据包交给
//! [`HandshakeOrchestrator::handle_upstream`]，服务器数据包交给
//! [`HandshakeOrchestrator::handle_downstream`]。它验证客户端的证书链，打开面向服务器的链路，
//! 伪造在那里出示的登录信息，并在目标服务器接受后退出。

use crate::codec::CompressionAlgorithm;
use crate::config::ProxyConfig;
use crate::crypto::keys::{self, PublicKey, SessionKeyPair};
use crate::error::{ProxyError, Result};
use crate::identity::{self, AccountSession, ChainValidation, OnlineChainCache, TrustAnchor, forger};
use crate::pack::PackDownloader;
use crate::protocol::auth::{AuthPayload, ForgedChain, ForgedSkin, IdentityClaim, SkinPayload};
use crate::protocol::packet::{Packet, PacketSignal, PlayStatus, ResourcePackResponse};
use crate::protocol::state::HandshakeState;
use crate::session::persist;
use crate::session::registry::{ConnectionRegistry, SessionId};
use crate::session::sink::{CloseSignal, DownstreamConnector, PacketSink};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const REASON_OUTDATED_CLIENT: &str = "disconnectionScreen.outdatedClient";
pub const REASON_OUTDATED_SERVER: &str = "disconnectionScreen.outdatedServer";

/// Which identity the server-facing leg presents.
///
/// 面向服务器一侧的链路所出示的身份。
#[derive(Clone)]
pub enum ForgeMode {
    /// A self-signed chain carrying the client's own identity.
    Offline,
    /// A chain backed by an authenticated account.
    Online(Arc<dyn AccountSession>),
}

/// What the proxy learned from the client's login.
#[derive(Debug, Clone)]
pub struct ClientLogin {
    pub protocol_version: u32,
    pub identity: IdentityClaim,
    /// The chain was rooted in the trust anchor.
    pub verified: bool,
    pub public_key: PublicKey,
    pub skin_claims: Value,
    skin: SkinPayload,
}

pub struct HandshakeOrchestrator<C: DownstreamConnector> {
    pub(super) state: HandshakeState,
    pub(super) config: Arc<ProxyConfig>,
    pub(super) connector: C,
    pub(super) upstream: Arc<dyn PacketSink>,
    pub(super) downstream: Option<Arc<dyn PacketSink>>,
    pub(super) mode: ForgeMode,
    /// Key pair the forged login is bound to.
    pub(super) key_pair: SessionKeyPair,
    pub(super) anchor: PublicKey,
    pub(super) cache: Arc<OnlineChainCache>,
    pub(super) packs: Option<Arc<PackDownloader>>,
    pub(super) registry: Arc<ConnectionRegistry>,
    pub(super) session_id: SessionId,
    pub(super) close: Arc<CloseSignal>,
    pub(super) client: Option<ClientLogin>,
    pub(super) forged: Option<(ForgedChain, ForgedSkin)>,
    /// The forged login went downstream. It is sent at most once.
    pub(super) login_sent: bool,
    pub(super) upstream_encrypted: bool,
}

impl<C: DownstreamConnector> HandshakeOrchestrator<C> {
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Handle the transport uses to report a client disconnect, possibly while a
    /// handler is suspended.
    ///
    /// 传输层用来报告客户端断开的句柄，可能在处理器挂起期间调用。
    pub fn close_signal(&self) -> Arc<CloseSignal> {
        self.close.clone()
    }

    pub fn client(&self) -> Option<&ClientLogin> {
        self.client.as_ref()
    }

    pub fn forged(&self) -> Option<(&ForgedChain, &ForgedSkin)> {
        self.forged.as_ref().map(|(chain, skin)| (chain, skin))
    }

    /// Handles a packet from the client.
    ///
    /// Any error before [`HandshakeState::Relaying`] tears the connection down
    /// after sending the client a disconnect reason, and is returned.
    ///
    /// 处理来自客户端的数据包。
    ///
    /// 在 [`HandshakeState::Relaying`] 之前发生的任何错误都会在向客户端发送断开原因后
    /// 拆除连接，并返回该错误。
    pub async fn handle_upstream(&mut self, packet: Packet) -> Result<PacketSignal> {
        if self.state == HandshakeState::Closed {
            return Err(ProxyError::SessionClosed);
        }
        let result = self.dispatch_upstream(packet).await;
        self.settle(result)
    }

    /// Handles a packet from the destination server.
    ///
    /// 处理来自目标服务器的数据包。
    pub fn handle_downstream(&mut self, packet: Packet) -> Result<PacketSignal> {
        if self.state == HandshakeState::Closed {
            return Err(ProxyError::SessionClosed);
        }
        let result = self.dispatch_downstream(packet);
        self.settle(result)
    }

    /// The client went away.
    pub fn client_disconnected(&mut self) {
        self.close.close();
        self.shutdown(crate::error::REASON_CANT_CONNECT);
    }

    fn settle(&mut self, result: Result<PacketSignal>) -> Result<PacketSignal> {
        if let Err(err) = &result {
            if self.state != HandshakeState::Closed {
                warn!(session = self.session_id, state = ?self.state, error = %err, "handshake failed");
                self.shutdown(err.disconnect_reason());
            }
        }
        result
    }

    async fn dispatch_upstream(&mut self, packet: Packet) -> Result<PacketSignal> {
        match (self.state, packet) {
            (HandshakeState::AwaitingNetworkSettingsRequest, Packet::RequestNetworkSettings { protocol_version }) => {
                self.on_network_settings_request(protocol_version)
            }
            (HandshakeState::AwaitingLogin, Packet::Login { protocol_version, auth, client_jwt }) => {
                self.on_login(protocol_version, auth, SkinPayload::new(client_jwt)).await
            }
            (HandshakeState::Relaying, Packet::ResourcePackClientResponse { status, .. }) => {
                if status == ResourcePackResponse::Completed {
                    if let Some(packs) = &self.packs {
                        let submitted = packs.process_packs();
                        debug!(session = self.session_id, submitted, "pack transfers submitted");
                    }
                }
                Ok(PacketSignal::Unhandled)
            }
            (HandshakeState::Relaying, Packet::ClientToServerHandshake) if self.upstream_encrypted => {
                Ok(PacketSignal::Handled)
            }
            (HandshakeState::Relaying, _) | (_, Packet::Opaque { .. }) => Ok(PacketSignal::Unhandled),
            (state, packet) => {
                debug!(?state, ?packet, "unexpected client packet during handshake");
                Err(ProxyError::InvalidMessage)
            }
        }
    }

    fn dispatch_downstream(&mut self, packet: Packet) -> Result<PacketSignal> {
        match (self.state, packet) {
            (HandshakeState::AwaitingDownstreamAccept, Packet::NetworkSettings { compression_threshold, compression_algorithm }) => {
                self.on_downstream_network_settings(compression_algorithm, compression_threshold)
            }
            (HandshakeState::AwaitingDownstreamAccept, Packet::ServerToClientHandshake { jwt }) => {
                self.on_server_handshake(&jwt)
            }
            (HandshakeState::AwaitingDownstreamAccept, Packet::PlayStatus(PlayStatus::LoginSuccess)) => {
                self.advance(HandshakeState::Relaying)?;
                info!(session = self.session_id, "destination accepted login without encryption");
                Ok(PacketSignal::Unhandled)
            }
            (_, Packet::Disconnect { reason }) => {
                info!(session = self.session_id, %reason, "destination disconnected");
                self.shutdown(&reason);
                Ok(PacketSignal::Handled)
            }
            (HandshakeState::Relaying, Packet::ResourcePacksInfo { packs }) => {
                if let Some(downloader) = &self.packs {
                    for pack in &packs {
                        downloader.register_pack(pack.pack_id, &pack.content_key, &pack.cdn_url);
                    }
                }
                Ok(PacketSignal::Unhandled)
            }
            (HandshakeState::Relaying, Packet::ResourcePackChunkData { pack_id, offset, data, .. }) => {
                if let Some(downloader) = &self.packs {
                    downloader.add_chunk(pack_id, offset, data);
                }
                Ok(PacketSignal::Unhandled)
            }
            (HandshakeState::Relaying, _) | (_, Packet::Opaque { .. }) => Ok(PacketSignal::Unhandled),
            (state, packet) => {
                debug!(?state, ?packet, "unexpected server packet during handshake");
                Err(ProxyError::InvalidMessage)
            }
        }
    }

    fn on_network_settings_request(&mut self, protocol_version: u32) -> Result<PacketSignal> {
        let server = self.config.protocol_version;
        if protocol_version != server {
            let (status, reason) = if protocol_version < server {
                (PlayStatus::LoginFailedClient, REASON_OUTDATED_CLIENT)
            } else {
                (PlayStatus::LoginFailedServer, REASON_OUTDATED_SERVER)
            };
            info!(session = self.session_id, client = protocol_version, server, "protocol mismatch");
            self.upstream.send_immediately(Packet::PlayStatus(status));
            self.shutdown(reason);
            return Err(ProxyError::ProtocolMismatch {
                client: protocol_version,
                server,
            });
        }

        let threshold = self.config.compression_threshold;
        self.upstream.send_immediately(Packet::NetworkSettings {
            compression_threshold: threshold,
            compression_algorithm: CompressionAlgorithm::Zlib,
        });
        self.upstream.set_compression(CompressionAlgorithm::Zlib, threshold);
        self.advance(HandshakeState::AwaitingLogin)?;
        Ok(PacketSignal::Handled)
    }

    async fn on_login(
        &mut self,
        protocol_version: u32,
        auth: AuthPayload,
        skin: SkinPayload,
    ) -> Result<PacketSignal> {
        self.advance(HandshakeState::ValidatingChain)?;
        let validation = identity::validate_payload(&auth, &self.anchor)?;
        let chain_len = auth.chain().map_or(0, |chain| chain.len());
        let skin_token = identity::verify_skin(&skin, &validation, chain_len)?;
        let ChainValidation {
            valid,
            identity,
            last_public_key,
        } = validation;
        if valid {
            info!(session = self.session_id, display_name = %identity.display_name, "client chain verified");
        } else {
            warn!(session = self.session_id, display_name = %identity.display_name, "client chain is not rooted in the trust anchor");
        }
        self.client = Some(ClientLogin {
            protocol_version,
            identity,
            verified: valid,
            public_key: last_public_key,
            skin_claims: skin_token.payload().clone(),
            skin,
        });

        self.advance(HandshakeState::ConnectingDownstream)?;
        let destination = self.config.destination.clone();
        let close = self.close.clone();
        let downstream = tokio::select! {
            biased;
            _ = close.closed() => return Err(ProxyError::SessionClosed),
            connected = self.connector.connect(&destination) => connected?,
        };
        self.registry.attach_downstream(self.session_id, downstream.clone());
        self.downstream = Some(downstream.clone());
        self.ensure_open()?;

        self.advance(HandshakeState::ForgingHandshake)?;
        let (chain, forged_skin) = self.forge().await?;
        // A disconnect may have landed while the chain was being forged.
        self.ensure_open()?;

        if self.config.save_auth_details {
            if let Some(client) = &self.client {
                match persist::save_auth_details(
                    &self.config.sessions_dir,
                    &client.identity.display_name,
                    &chain,
                    &client.skin_claims,
                ) {
                    Ok(dir) => debug!(dir = %dir.display(), "auth details saved"),
                    Err(e) => warn!(error = %e, "could not save auth details"),
                }
            }
        }

        self.forged = Some((chain, forged_skin));
        downstream.send_immediately(Packet::RequestNetworkSettings {
            protocol_version: self.config.protocol_version,
        });
        self.advance(HandshakeState::AwaitingDownstreamAccept)?;
        Ok(PacketSignal::Handled)
    }

    async fn forge(&self) -> Result<(ForgedChain, ForgedSkin)> {
        let client = self.client.as_ref().ok_or(ProxyError::InvalidState)?;
        match &self.mode {
            ForgeMode::Offline => Ok((
                forger::forge_offline_chain(&self.key_pair, &client.identity)?,
                forger::forge_offline_skin(&self.key_pair, &client.skin)?,
            )),
            ForgeMode::Online(account) => {
                let protocol_version = self.config.protocol_version;
                let account = account.as_ref();
                let chain = self
                    .cache
                    .get_or_forge(account.account_id(), protocol_version, || {
                        forger::forge_online_chain(account, &online_anchor(account)?)
                    })
                    .await?;
                let skin = forger::forge_online_skin(
                    account,
                    &client.skin,
                    &self.config.destination.to_string(),
                    protocol_version,
                )?;
                Ok((chain, skin))
            }
        }
    }

    fn on_downstream_network_settings(
        &mut self,
        algorithm: CompressionAlgorithm,
        threshold: u16,
    ) -> Result<PacketSignal> {
        if self.login_sent {
            debug!(session = self.session_id, "repeated network settings from destination");
            return Err(ProxyError::InvalidMessage);
        }
        let downstream = self.downstream.clone().ok_or(ProxyError::InvalidState)?;
        let (chain, skin) = self.forged.clone().ok_or(ProxyError::InvalidState)?;
        downstream.set_compression(algorithm, threshold);

        let auth = match self.mode {
            ForgeMode::Offline => AuthPayload::SelfSigned(chain),
            ForgeMode::Online(_) => AuthPayload::Full(chain),
        };
        downstream.send_immediately(Packet::Login {
            protocol_version: self.config.protocol_version,
            auth,
            client_jwt: skin.token,
        });
        self.login_sent = true;
        debug!(session = self.session_id, ?algorithm, threshold, "forged login sent");
        Ok(PacketSignal::Handled)
    }

    fn on_server_handshake(&mut self, jwt: &str) -> Result<PacketSignal> {
        let downstream = self.downstream.clone().ok_or(ProxyError::InvalidState)?;
        let key = keys::accept_server_handshake(&self.key_pair, jwt)?;
        downstream.enable_encryption(key)?;
        downstream.send_immediately(Packet::ClientToServerHandshake);

        if self.config.encrypt_upstream {
            let client_key = self
                .client
                .as_ref()
                .map(|client| client.public_key.clone())
                .ok_or(ProxyError::InvalidState)?;
            let (token, key) = keys::issue_server_handshake(&SessionKeyPair::generate(), &client_key)?;
            self.upstream.send_immediately(Packet::ServerToClientHandshake {
                jwt: token.as_str().to_owned(),
            });
            self.upstream.enable_encryption(key)?;
            self.upstream_encrypted = true;
        }

        self.advance(HandshakeState::Relaying)?;
        info!(session = self.session_id, upstream_encrypted = self.upstream_encrypted, "handshake complete, relaying");
        Ok(PacketSignal::Handled)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.close.is_closed() {
            return Err(ProxyError::SessionClosed);
        }
        Ok(())
    }

    fn advance(&mut self, next: HandshakeState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(ProxyError::InvalidState);
        }
        debug!(session = self.session_id, from = ?self.state, to = ?next, "handshake state");
        self.state = next;
        Ok(())
    }

    fn shutdown(&mut self, reason: &str) {
        if self.state == HandshakeState::Closed {
            return;
        }
        self.state = HandshakeState::Closed;
        self.registry.teardown(self.session_id, reason);
        self.downstream = None;
    }
}

/// Service-issued links are rooted in the well-known key; otherwise the proxy
/// vouches for the account with its own stand-in anchor.
fn online_anchor(account: &dyn AccountSession) -> Result<TrustAnchor> {
    if account.issued_chain().is_some() {
        TrustAnchor::well_known()
    } else {
        Ok(TrustAnchor::forged().clone())
    }
}
