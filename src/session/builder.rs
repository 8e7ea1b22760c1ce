use super::orchestrator::{ForgeMode, HandshakeOrchestrator};
use super::registry::ConnectionRegistry;
use super::sink::{CloseSignal, DownstreamConnector, PacketSink};
use crate::config::ProxyConfig;
use crate::crypto::keys::{PublicKey, SessionKeyPair};
use crate::error::{ProxyError, Result};
use crate::identity::{OnlineChainCache, TrustAnchor};
use crate::pack::PackDownloader;
use crate::protocol::state::HandshakeState;
use std::sync::Arc;

/// Marker type for a missing field in the builder.
///
/// 用于在构建器中标记缺失字段的类型。
pub struct Missing;

/// A builder for creating a `HandshakeOrchestrator`.
///
/// The client-facing sink and the downstream connector must be provided before
/// `build` becomes available.
///
/// 用于创建 `HandshakeOrchestrator` 的构建器。
///
/// 必须先提供面向客户端的接收端和下游连接器，`build` 才可用。
pub struct HandshakeOrchestratorBuilder<Upstream, Connector> {
    upstream: Upstream,
    connector: Connector,
    config: Arc<ProxyConfig>,
    mode: ForgeMode,
    anchor: Option<PublicKey>,
    cache: Option<Arc<OnlineChainCache>>,
    packs: Option<Arc<PackDownloader>>,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl HandshakeOrchestratorBuilder<Missing, Missing> {
    pub fn new() -> Self {
        Self {
            upstream: Missing,
            connector: Missing,
            config: Arc::new(ProxyConfig::default()),
            mode: ForgeMode::Offline,
            anchor: None,
            cache: None,
            packs: None,
            registry: None,
        }
    }
}

impl Default for HandshakeOrchestratorBuilder<Missing, Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U, C> HandshakeOrchestratorBuilder<U, C> {
    /// Sets the client-facing leg.
    ///
    /// 设置面向客户端的链路。
    pub fn upstream(
        self,
        upstream: Arc<dyn PacketSink>,
    ) -> HandshakeOrchestratorBuilder<Arc<dyn PacketSink>, C> {
        HandshakeOrchestratorBuilder {
            upstream,
            connector: self.connector,
            config: self.config,
            mode: self.mode,
            anchor: self.anchor,
            cache: self.cache,
            packs: self.packs,
            registry: self.registry,
        }
    }

    /// Sets how the server-facing leg is opened.
    ///
    /// 设置面向服务器一侧链路的打开方式。
    pub fn connector<N: DownstreamConnector>(self, connector: N) -> HandshakeOrchestratorBuilder<U, N> {
        HandshakeOrchestratorBuilder {
            upstream: self.upstream,
            connector,
            config: self.config,
            mode: self.mode,
            anchor: self.anchor,
            cache: self.cache,
            packs: self.packs,
            registry: self.registry,
        }
    }

    pub fn config(mut self, config: Arc<ProxyConfig>) -> Self {
        self.config = config;
        self
    }

    /// Defaults to [`ForgeMode::Offline`].
    pub fn mode(mut self, mode: ForgeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the key client chains are validated against.
    /// Defaults to the well-known root key.
    ///
    /// 覆盖用于验证客户端证书链的密钥。默认为众所周知的根密钥。
    pub fn trust_anchor(mut self, anchor: PublicKey) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Defaults to [`OnlineChainCache::global`].
    pub fn chain_cache(mut self, cache: Arc<OnlineChainCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Enables pack capture.
    pub fn packs(mut self, packs: Arc<PackDownloader>) -> Self {
        self.packs = Some(packs);
        self
    }

    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }
}

impl<C: DownstreamConnector> HandshakeOrchestratorBuilder<Arc<dyn PacketSink>, C> {
    /// Builds the `HandshakeOrchestrator` and registers its client-facing leg.
    ///
    /// This method is only available when all required fields have been provided.
    ///
    /// 构建 `HandshakeOrchestrator` 并登记其面向客户端的链路。
    ///
    /// 此方法仅在提供了所有必需字段时可用。
    pub fn build(self) -> Result<HandshakeOrchestrator<C>> {
        if self.config.online_mode && matches!(self.mode, ForgeMode::Offline) {
            return Err(ProxyError::Config("online-mode needs an account session".into()));
        }
        let anchor = match self.anchor {
            Some(anchor) => anchor,
            None => TrustAnchor::well_known()?.public_key().clone(),
        };
        let key_pair = match &self.mode {
            ForgeMode::Offline => SessionKeyPair::generate(),
            ForgeMode::Online(account) => account.key_pair().clone(),
        };
        let registry = self.registry.unwrap_or_default();
        let session_id = registry.register(self.upstream.clone());
        let packs = if self.config.download_packs { self.packs } else { None };

        Ok(HandshakeOrchestrator {
            state: HandshakeState::AwaitingNetworkSettingsRequest,
            config: self.config,
            connector: self.connector,
            upstream: self.upstream,
            downstream: None,
            mode: self.mode,
            key_pair,
            anchor,
            cache: self.cache.unwrap_or_else(OnlineChainCache::global),
            packs,
            registry,
            session_id,
            close: CloseSignal::new(),
            client: None,
            forged: None,
            login_sent: false,
            upstream_encrypted: false,
        })
    }
}
