//! Pairwise request/reply mesh used for barriers and share exchange
//!
//! Node `i` requests from every node with a higher index and replies to
//! every node with a lower index, so it has `i - 1` reply peers and `n - i`
//! request peers. An exchange returns only once every node in the room has
//! reached it, which makes a payload-free exchange a full barrier.

use super::{Relay, Slot};
use crate::types::RoomConfig;
use crate::{Error, NodeIndex, Result};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// One leg of a pairwise exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub from: NodeIndex,
    pub payload: Option<T>,
}

/// A node's view of the pairwise mesh of its room
pub struct PairwiseMesh<'a, R: Relay> {
    relay: &'a R,
    room: &'a RoomConfig,
    me: NodeIndex,
}

impl<'a, R: Relay> PairwiseMesh<'a, R> {
    pub fn new(relay: &'a R, room: &'a RoomConfig, me: NodeIndex) -> Result<Self> {
        room.check_index(me)?;
        Ok(Self { relay, room, me })
    }

    /// This node's index
    pub fn me(&self) -> NodeIndex {
        self.me
    }

    /// Every other node, ascending
    pub fn peers(&self) -> Vec<NodeIndex> {
        self.room.peers(self.me).collect()
    }

    /// Nodes this node replies to
    pub fn reply_peers(&self) -> Vec<NodeIndex> {
        (1..self.me).collect()
    }

    /// Nodes this node sends requests to
    pub fn request_peers(&self) -> Vec<NodeIndex> {
        (self.me + 1..=self.room.room_size).collect()
    }

    /// Swap one payload with every peer
    ///
    /// `payload_for(peer)` is what this node sends to `peer`. The result maps
    /// every peer to the payload it sent back.
    pub async fn exchange<T, F>(
        &self,
        slot: Slot,
        payload_for: F,
    ) -> Result<BTreeMap<NodeIndex, Option<T>>>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: Fn(NodeIndex) -> Option<T>,
    {
        let room_id = &self.room.room_id;
        let reply_peers = self.reply_peers();
        let request_peers = self.request_peers();

        for &peer in &request_peers {
            let envelope = Envelope {
                from: self.me,
                payload: payload_for(peer),
            };
            self.relay
                .send_direct(room_id, slot, peer, &envelope)
                .await?;
        }

        let requests: Vec<Envelope<T>> = self
            .relay
            .collect_direct(room_id, slot, self.me, reply_peers.len())
            .await?;
        let mut received = self.check_senders(requests, &reply_peers, slot)?;

        for &peer in &reply_peers {
            let envelope = Envelope {
                from: self.me,
                payload: payload_for(peer),
            };
            self.relay
                .send_direct(room_id, slot.reply(), peer, &envelope)
                .await?;
        }

        let replies: Vec<Envelope<T>> = self
            .relay
            .collect_direct(room_id, slot.reply(), self.me, request_peers.len())
            .await?;
        received.append(&mut self.check_senders(replies, &request_peers, slot.reply())?);

        trace!(node = self.me, %slot, peers = received.len(), "Pairwise exchange complete");
        Ok(received)
    }

    /// Block until every node in the room reaches `slot`
    pub async fn barrier(&self, slot: Slot) -> Result<()> {
        self.exchange::<(), _>(slot, |_| None).await?;
        Ok(())
    }

    fn check_senders<T>(
        &self,
        envelopes: Vec<Envelope<T>>,
        expected: &[NodeIndex],
        slot: Slot,
    ) -> Result<BTreeMap<NodeIndex, Option<T>>> {
        let expected: BTreeSet<NodeIndex> = expected.iter().copied().collect();
        let mut received = BTreeMap::new();

        for envelope in envelopes {
            if !expected.contains(&envelope.from) {
                return Err(Error::Channel(format!(
                    "Node {} got an unexpected message from node {} in slot {}",
                    self.me, envelope.from, slot
                )));
            }
            if received.insert(envelope.from, envelope.payload).is_some() {
                return Err(Error::Channel(format!(
                    "Node {} got a duplicate message from node {} in slot {}",
                    self.me, envelope.from, slot
                )));
            }
        }

        if received.len() != expected.len() {
            return Err(Error::Channel(format!(
                "Node {} heard from {} of {} peers in slot {}",
                self.me,
                received.len(),
                expected.len(),
                slot
            )));
        }
        Ok(received)
    }
}
