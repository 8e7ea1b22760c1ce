pub mod codec;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod logging;
pub mod pack;
pub mod protocol;
pub mod session;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
