//! Seams to the packet dispatch layer and the outbound transport.
//!
//! 与数据包分发层和出站传输之间的接口。

use crate::codec::CompressionAlgorithm;
use crate::config::Address;
use crate::crypto::keys::SessionKey;
use crate::error::Result;
use crate::protocol::packet::Packet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// One leg of a proxied connection, as seen by the handshake core.
///
/// 握手核心所见的代理连接的一条链路。
pub trait PacketSink: Send + Sync {
    /// Queues a packet behind anything already queued.
    fn send(&self, packet: Packet);

    /// Writes a packet ahead of the queue. Used for handshake packets whose
    /// ordering against compression or encryption changes matters.
    ///
    /// 越过队列直接写出数据包。用于与压缩或加密切换之间顺序敏感的握手数据包。
    fn send_immediately(&self, packet: Packet);

    fn set_compression(&self, algorithm: CompressionAlgorithm, threshold: u16);

    fn enable_encryption(&self, key: SessionKey) -> Result<()>;

    fn disconnect(&self, reason: &str);
}

/// Opens the server-facing leg.
pub trait DownstreamConnector: Send + Sync {
    fn connect(&self, destination: &Address) -> impl Future<Output = Result<Arc<dyn PacketSink>>> + Send;
}

/// Set once the client side goes away. Work in progress on the server-facing
/// leg checks it before committing.
///
/// 客户端一侧断开后置位。面向服务器一侧正在进行的工作在提交前会检查它。
#[derive(Debug, Default)]
pub struct CloseSignal {
    closed: AtomicBool,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Resolves once [`CloseSignal::close`] has been called.
    pub async fn closed(&self) {
        loop {
            // Registered before the flag check so a concurrent close cannot be missed.
            let notified = self.notify.notified();
            if self.is_closed() {
                return;
            }
            notified.await;
        }
    }
}
