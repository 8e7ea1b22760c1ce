//! Per-connection session handling: the handshake state machine and the seams
//! it uses to reach both legs of a proxied connection.
//!
//! 每个连接的会话处理：握手状态机，以及它访问代理连接两条链路所用的接口。

mod builder;
pub mod orchestrator;
pub mod persist;
pub mod registry;
pub mod sink;

pub use builder::{HandshakeOrchestratorBuilder, Missing};
pub use orchestrator::{ClientLogin, ForgeMode, HandshakeOrchestrator};
pub use registry::{ConnectionRegistry, SessionId};
pub use sink::{CloseSignal, DownstreamConnector, PacketSink};
