//! In-memory relay for tests and single-process room simulation

use super::{Relay, Slot, async_trait};
use crate::{Error, NodeIndex, Result, RoomId};
use dashmap::DashMap;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

/// Poll interval used when a notification is missed
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// In-memory message relay shared by every node of a simulated room
///
/// Messages are stored per `(room, slot)` and never consumed, so every node
/// reads the same broadcasts. Clones share the same store.
#[derive(Debug)]
pub struct MemoryRelay {
    /// (room, slot) -> serialized broadcasts
    broadcasts: Arc<DashMap<(RoomId, Slot), Vec<Vec<u8>>>>,
    /// (room, slot, recipient) -> serialized direct messages
    directs: Arc<DashMap<(RoomId, Slot, NodeIndex), Vec<Vec<u8>>>>,
    /// Wakes waiting collectors
    notify: broadcast::Sender<()>,
    /// Per-collect limit; `None` waits forever like the protocol does
    timeout: Option<Duration>,
}

impl MemoryRelay {
    /// Relay whose collects block until the messages arrive
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1024);
        Self {
            broadcasts: Arc::new(DashMap::new()),
            directs: Arc::new(DashMap::new()),
            notify,
            timeout: None,
        }
    }

    /// Relay whose collects fail with [`Error::Timeout`] after `timeout_ms`
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout: Some(Duration::from_millis(timeout_ms)),
            ..Self::new()
        }
    }

    /// Drop every stored message
    pub fn clear(&self) {
        self.broadcasts.clear();
        self.directs.clear();
    }

    /// Number of broadcasts stored for a slot
    pub fn broadcast_count(&self, room: &RoomId, slot: Slot) -> usize {
        self.broadcasts
            .get(&(*room, slot))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Number of direct messages stored for a recipient
    pub fn direct_count(&self, room: &RoomId, slot: Slot, to: NodeIndex) -> usize {
        self.directs
            .get(&(*room, slot, to))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    async fn wait_for<K, T>(
        &self,
        store: &DashMap<K, Vec<Vec<u8>>>,
        key: K,
        count: usize,
        what: String,
    ) -> Result<Vec<T>>
    where
        K: std::hash::Hash + Eq,
        T: DeserializeOwned,
    {
        let mut rx = self.notify.subscribe();
        let deadline = self.timeout.map(|timeout| Instant::now() + timeout);

        loop {
            if let Some(messages) = store.get(&key) {
                if messages.len() >= count {
                    return messages
                        .iter()
                        .take(count)
                        .map(|bytes| deserialize(bytes))
                        .collect();
                }
            } else if count == 0 {
                return Ok(Vec::new());
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout(what));
                    }
                    POLL_INTERVAL.min(remaining)
                }
                None => POLL_INTERVAL,
            };

            tokio::select! {
                _ = rx.recv() => continue,
                _ = tokio::time::sleep(wait) => continue,
            }
        }
    }
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MemoryRelay {
    fn clone(&self) -> Self {
        Self {
            broadcasts: Arc::clone(&self.broadcasts),
            directs: Arc::clone(&self.directs),
            notify: self.notify.clone(),
            timeout: self.timeout,
        }
    }
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| Error::Serialization(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Deserialization(e.to_string()))
}

#[async_trait]
impl Relay for MemoryRelay {
    async fn broadcast<T: Serialize + Send + Sync>(
        &self,
        room: &RoomId,
        slot: Slot,
        message: &T,
    ) -> Result<()> {
        let bytes = serialize(message)?;
        self.broadcasts.entry((*room, slot)).or_default().push(bytes);

        let _ = self.notify.send(());
        Ok(())
    }

    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        room: &RoomId,
        slot: Slot,
        to: NodeIndex,
        message: &T,
    ) -> Result<()> {
        let bytes = serialize(message)?;
        self.directs
            .entry((*room, slot, to))
            .or_default()
            .push(bytes);

        let _ = self.notify.send(());
        Ok(())
    }

    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        count: usize,
    ) -> Result<Vec<T>> {
        self.wait_for(
            &self.broadcasts,
            (*room, slot),
            count,
            format!("{} broadcasts in slot {}", count, slot),
        )
        .await
    }

    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        me: NodeIndex,
        count: usize,
    ) -> Result<Vec<T>> {
        self.wait_for(
            &self.directs,
            (*room, slot, me),
            count,
            format!("{} direct messages to node {} in slot {}", count, me, slot),
        )
        .await
    }
}
