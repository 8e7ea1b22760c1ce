//! Cryptographic building blocks: identity keys, signed tokens and the
//! transport cipher.
//! 密码学构件：身份密钥、签名令牌和传输密码。

pub mod keys;
pub mod signature;
pub mod trailer;
pub mod transport;

pub use keys::{PublicKey, SessionKey, SessionKeyPair};
pub use signature::SignedToken;
pub use transport::{CipherMode, SharedEncryptor, TransportCrypto};
