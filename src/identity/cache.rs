//! Process-wide cache of online chains, keyed by account and protocol version.
//!
//! Concurrent first requests for the same key wait on one computation instead of
//! forging in parallel. Once stored, an entry never changes.
//!
//! 进程级在线证书链缓存，以账户和协议版本为键。
//!
//! 对同一键的并发首次请求会等待同一次计算，而不是并行伪造。条目一旦存储便不再改变。

use crate::error::Result;
use crate::protocol::auth::ForgedChain;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::OnceCell;
use tracing::trace;

type CacheKey = (String, u32);

static GLOBAL: OnceLock<Arc<OnlineChainCache>> = OnceLock::new();

#[derive(Debug, Default)]
pub struct OnlineChainCache {
    entries: Mutex<HashMap<CacheKey, Arc<OnceCell<ForgedChain>>>>,
    hits: AtomicU64,
    computes: AtomicU64,
}

impl OnlineChainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The instance shared by every session of this process.
    pub fn global() -> Arc<OnlineChainCache> {
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Returns the cached chain for `(account_id, protocol_version)`, running
    /// `forge` if no caller has stored one yet. A failed `forge` stores nothing.
    ///
    /// 返回 `(account_id, protocol_version)` 对应的缓存链；若尚无调用者存储过，则运行 `forge`。
    /// `forge` 失败时不存储任何内容。
    pub async fn get_or_forge(
        &self,
        account_id: &str,
        protocol_version: u32,
        forge: impl FnOnce() -> Result<ForgedChain>,
    ) -> Result<ForgedChain> {
        let cell = {
            let mut entries = self.entries.lock();
            entries
                .entry((account_id.to_owned(), protocol_version))
                .or_default()
                .clone()
        };

        let computed = AtomicBool::new(false);
        let computed_ref = &computed;
        let computes = &self.computes;
        let chain = cell
            .get_or_try_init(move || async move {
                computed_ref.store(true, Ordering::Relaxed);
                computes.fetch_add(1, Ordering::Relaxed);
                forge()
            })
            .await?;

        if !computed.load(Ordering::Relaxed) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(account_id, protocol_version, "online chain cache hit");
        }
        Ok(chain.clone())
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn computes(&self) -> u64 {
        self.computes.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProxyError;

    #[tokio::test]
    async fn failed_forge_is_not_cached() {
        let cache = OnlineChainCache::new();
        let err = cache
            .get_or_forge("acct", 898, || Err(ProxyError::ForgeryFailure("boom".into())))
            .await;
        assert!(err.is_err());
        assert!(cache.is_empty());

        let chain = cache
            .get_or_forge("acct", 898, || Ok(ForgedChain::new(vec!["a.b.c".into()])))
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(cache.computes(), 2);
        assert_eq!(cache.hits(), 0);
    }

    #[tokio::test]
    async fn protocol_version_is_part_of_the_key() {
        let cache = OnlineChainCache::new();
        for version in [897, 898, 898] {
            cache
                .get_or_forge("acct", version, || Ok(ForgedChain::default()))
                .await
                .unwrap();
        }
        assert_eq!(cache.computes(), 2);
        assert_eq!(cache.hits(), 1);
    }
}
