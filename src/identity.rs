//! Identity chains: validating what the client presents and forging what the
//! destination receives.
//!
//! 身份链：验证客户端出示的内容，并伪造目标服务器接收的内容。

pub mod account;
pub mod anchor;
pub mod cache;
pub mod forger;
pub mod validator;

pub use account::{AccountSession, StaticAccount};
pub use anchor::TrustAnchor;
pub use cache::OnlineChainCache;
pub use validator::{ChainValidation, validate, validate_payload, verify_skin};
