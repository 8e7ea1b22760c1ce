//! Defines the states of the per-connection handshake state machine.
//!
//! The machine only ever moves forward; any validation or forging failure jumps
//! straight to [`HandshakeState::Closed`].
//!
//! 定义每个连接握手状态机的各个状态。
//!
//! 状态机只会向前推进；任何验证或伪造失败都会直接跳转到 [`HandshakeState::Closed`]。

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandshakeState {
    /// Waiting for the client's network settings request.
    ///
    /// 等待客户端的网络设置请求。
    AwaitingNetworkSettingsRequest,
    /// Compression is negotiated; waiting for the login packet.
    ///
    /// 压缩已协商完毕；等待登录数据包。
    AwaitingLogin,
    /// Checking the client's certificate chain and skin token.
    ValidatingChain,
    /// The outbound connection to the destination is being opened.
    ConnectingDownstream,
    /// Building the server-facing chain and skin.
    ForgingHandshake,
    /// The forged login was sent; waiting for the destination to accept it.
    ///
    /// 已发送伪造的登录；等待目标服务器接受。
    AwaitingDownstreamAccept,
    /// Packet flow belongs to the external dispatch layer.
    ///
    /// 数据包流转交给外部分发层。
    Relaying,
    Closed,
}

impl HandshakeState {
    /// Whether the core stops driving transitions in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Relaying | HandshakeState::Closed)
    }

    /// Forward-only rule. `Closed` is reachable from anywhere except itself.
    pub fn can_advance_to(self, next: HandshakeState) -> bool {
        match next {
            HandshakeState::Closed => self != HandshakeState::Closed,
            _ => next > self && self != HandshakeState::Closed,
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_moves_are_allowed() {
        use HandshakeState::*;
        assert!(AwaitingNetworkSettingsRequest.can_advance_to(AwaitingLogin));
        assert!(AwaitingLogin.can_advance_to(ValidatingChain));
        assert!(AwaitingDownstreamAccept.can_advance_to(Relaying));
        assert!(!Relaying.can_advance_to(AwaitingLogin));
        assert!(!ValidatingChain.can_advance_to(ValidatingChain));
    }

    #[test]
    fn closed_is_reachable_once() {
        assert!(HandshakeState::Relaying.can_advance_to(HandshakeState::Closed));
        assert!(HandshakeState::AwaitingLogin.can_advance_to(HandshakeState::Closed));
        assert!(!HandshakeState::Closed.can_advance_to(HandshakeState::Closed));
        assert!(!HandshakeState::Closed.can_advance_to(HandshakeState::Relaying));
        assert!(HandshakeState::Closed.is_terminal());
    }
}
