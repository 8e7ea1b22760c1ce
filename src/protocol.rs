//! Wire-level data shapes the handshake core consumes and produces.
//! 握手核心所消费和产生的线路级数据结构。

pub mod auth;
pub mod packet;
pub mod state;
pub mod version;
