//! Installs the process-wide `tracing` subscriber.
//! 安装进程级的 `tracing` 订阅者。

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use tracing_subscriber::EnvFilter;

/// Installs a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`.
///
/// Returns `Ok` when a subscriber is already installed, so tests and embedders
/// may call this more than once.
///
/// 安装按 `RUST_LOG` 过滤的 fmt 订阅者，未设置时回退到 `default_filter`。
///
/// 若订阅者已安装则返回 `Ok`，因此测试和嵌入方可以多次调用。
pub fn init(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)
            .map_err(|e| ProxyError::Config(format!("invalid log filter `{default_filter}`: {e}")))?,
    };

    // A second installation attempt only means someone got there first.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
    Ok(())
}

/// [`init`] with the configured `log-level` as the fallback filter.
pub fn init_from_config(config: &ProxyConfig) -> Result<()> {
    init(&config.log_level)
}
