//! Proxy configuration, read from a YAML document with kebab-case keys.
//!
//! Every field has a default, so an empty document yields a usable offline
//! configuration listening on the standard port.
//!
//! 代理配置，从使用 kebab-case 键的 YAML 文档读取。
//!
//! 每个字段都有默认值，因此空文档也能得到一个可用的离线配置。

use crate::error::{ProxyError, Result};
use crate::protocol::version;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 19132;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Self::new("0.0.0.0", DEFAULT_PORT)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProxyConfig {
    /// Where clients connect.
    pub proxy: Address,
    /// The real server the proxy relays to.
    pub destination: Address,
    /// Present an account-backed chain downstream instead of a self-signed one.
    pub online_mode: bool,
    /// Write the forged chain and the client skin claims into the session directory.
    pub save_auth_details: bool,
    pub download_packs: bool,
    /// Recompute and check the trailer of every decrypted frame.
    ///
    /// 重新计算并校验每个解密帧的尾部。
    pub validate_encryption: bool,
    /// Encrypt the client-facing leg as well.
    pub encrypt_upstream: bool,
    pub compression_threshold: u16,
    pub protocol_version: u32,
    pub data_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub pack_workers: usize,
    pub pack_shutdown_grace_secs: u64,
    pub log_level: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            proxy: Address::default(),
            destination: Address::new("127.0.0.1", DEFAULT_PORT),
            online_mode: false,
            save_auth_details: false,
            download_packs: true,
            validate_encryption: false,
            encrypt_upstream: false,
            compression_threshold: 1,
            protocol_version: version::CURRENT,
            data_dir: PathBuf::from("data"),
            sessions_dir: PathBuf::from("sessions"),
            pack_workers: default_pack_workers(),
            pack_shutdown_grace_secs: 60,
            log_level: "info".to_owned(),
        }
    }
}

fn default_pack_workers() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    (cpus / 2).max(2)
}

impl ProxyConfig {
    /// Reads and validates the configuration file at `path`.
    ///
    /// 读取并校验位于 `path` 的配置文件。
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ProxyError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        // An empty document deserializes as unit, not as an empty map.
        let config: Self = if text.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(text).map_err(|e| ProxyError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.pack_workers == 0 {
            return Err(ProxyError::Config("pack-workers must be at least 1".into()));
        }
        if self.destination.host.is_empty() {
            return Err(ProxyError::Config("destination.host must not be empty".into()));
        }
        if self.destination.port == 0 {
            return Err(ProxyError::Config("destination.port must not be 0".into()));
        }
        Ok(())
    }

    pub fn packs_dir(&self) -> PathBuf {
        self.data_dir.join("packs")
    }

    pub fn pack_shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.pack_shutdown_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = ProxyConfig::from_yaml("").unwrap();
        assert_eq!(config, ProxyConfig::default());
        assert!(!config.validate_encryption);
        assert!(config.pack_workers >= 2);
    }

    #[test]
    fn kebab_case_keys_override_defaults() {
        let config = ProxyConfig::from_yaml(
            "destination:\n  host: play.example.net\n  port: 19133\nonline-mode: true\ncompression-threshold: 256\nvalidate-encryption: true\n",
        )
        .unwrap();
        assert_eq!(config.destination, Address::new("play.example.net", 19133));
        assert!(config.online_mode);
        assert!(config.validate_encryption);
        assert_eq!(config.compression_threshold, 256);
        assert_eq!(config.proxy, Address::default());
    }

    #[test]
    fn zero_pack_workers_is_rejected() {
        assert!(matches!(
            ProxyConfig::from_yaml("pack-workers: 0\n"),
            Err(ProxyError::Config(_))
        ));
    }
}
