//! Owns both legs of every proxied connection so they are torn down together.
//!
//! 持有每个代理连接的两条链路，以便将它们一起拆除。

use crate::session::sink::PacketSink;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub type SessionId = u64;

struct ConnectionPair {
    upstream: Arc<dyn PacketSink>,
    downstream: Option<Arc<dyn PacketSink>>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    pairs: Mutex<HashMap<SessionId, ConnectionPair>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, upstream: Arc<dyn PacketSink>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pairs.lock().insert(
            id,
            ConnectionPair {
                upstream,
                downstream: None,
            },
        );
        id
    }

    /// Links the server-facing leg. Returns `false` if the session is already gone.
    pub fn attach_downstream(&self, id: SessionId, downstream: Arc<dyn PacketSink>) -> bool {
        match self.pairs.lock().get_mut(&id) {
            Some(pair) => {
                pair.downstream = Some(downstream);
                true
            }
            None => false,
        }
    }

    pub fn downstream(&self, id: SessionId) -> Option<Arc<dyn PacketSink>> {
        self.pairs.lock().get(&id).and_then(|pair| pair.downstream.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.pairs.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pairs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Disconnects both legs with `reason` and forgets the session. Calling it
    /// again for the same id does nothing.
    ///
    /// 以 `reason` 断开两条链路并移除该会话。对同一 id 再次调用不会产生任何效果。
    pub fn teardown(&self, id: SessionId, reason: &str) {
        // Released before calling into the sinks.
        let pair = self.pairs.lock().remove(&id);
        let Some(pair) = pair else {
            return;
        };
        debug!(session = id, reason, "tearing down connection pair");
        pair.upstream.disconnect(reason);
        if let Some(downstream) = pair.downstream {
            downstream.disconnect(reason);
        }
    }
}
