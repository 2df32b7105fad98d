//! Room transport
//!
//! This module provides the communication layer a session runs on. The
//! `Relay` trait abstracts message passing between nodes so the protocol can
//! run over different transports (in-memory, sockets, a relay service). On
//! top of it sit the pairwise barrier mesh and the aggregation task.

use crate::{NodeIndex, Result, RoomId};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

pub use async_trait::async_trait;

pub mod aggregator;
pub mod memory;
pub mod mesh;

pub use aggregator::{Aggregator, AggregatorCommand, AggregatorHandle, RoundAggregate};
pub use memory::MemoryRelay;
pub use mesh::{Envelope, PairwiseMesh};

/// Exchange within one main-loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    /// Barrier at the top of every iteration
    Sync,
    /// Pairwise blinding share exchange
    KeyExchange,
    /// Pairwise exchange of the zero-sum key commitment openings
    MaskExchange,
    /// Broadcast of key commitments
    KeyCommitment,
    /// Barrier after the key commitments
    KeyCommitmentSync,
    /// Broadcast of message commitments
    MessageCommitment,
    /// Barrier after the message commitments
    MessageCommitmentSync,
    /// Broadcast of blinded message values
    Message,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Sync => "sync",
            Phase::KeyExchange => "key-exchange",
            Phase::MaskExchange => "mask-exchange",
            Phase::KeyCommitment => "key-commitment",
            Phase::KeyCommitmentSync => "key-commitment-sync",
            Phase::MessageCommitment => "message-commitment",
            Phase::MessageCommitmentSync => "message-commitment-sync",
            Phase::Message => "message",
        };
        f.write_str(name)
    }
}

/// Address of one exchange on the relay
///
/// `step` counts main-loop iterations, so a replayed round never reads
/// traffic left over from its earlier play. `reply` separates the two legs of
/// a pairwise request/reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot {
    pub step: u64,
    pub phase: Phase,
    pub reply: bool,
}

impl Slot {
    /// Request leg of `phase` in iteration `step`
    pub fn new(step: u64, phase: Phase) -> Self {
        Self {
            step,
            phase,
            reply: false,
        }
    }

    /// Reply leg of the same exchange
    pub fn reply(self) -> Self {
        Self {
            reply: true,
            ..self
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step, self.phase)?;
        if self.reply {
            f.write_str("/reply")?;
        }
        Ok(())
    }
}

/// Message relay trait for room communication
///
/// Implementations handle the transport of messages between the nodes of a
/// room. The relay is responsible for:
/// - Broadcasting messages to every node
/// - Sending direct (point-to-point) messages
/// - Collecting and delivering messages by slot
#[async_trait]
pub trait Relay: Send + Sync {
    /// Broadcast a message to every node in the room
    async fn broadcast<T: Serialize + Send + Sync>(
        &self,
        room: &RoomId,
        slot: Slot,
        message: &T,
    ) -> Result<()>;

    /// Send a direct message to node `to`
    async fn send_direct<T: Serialize + Send + Sync>(
        &self,
        room: &RoomId,
        slot: Slot,
        to: NodeIndex,
        message: &T,
    ) -> Result<()>;

    /// Collect broadcast messages for a slot
    ///
    /// Blocks until `count` messages have been received.
    async fn collect_broadcasts<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        count: usize,
    ) -> Result<Vec<T>>;

    /// Collect direct messages sent to node `me` in a slot
    ///
    /// Blocks until `count` messages have been received.
    async fn collect_direct<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        me: NodeIndex,
        count: usize,
    ) -> Result<Vec<T>>;
}

/// Extension trait for relay with timeout support
#[async_trait]
pub trait RelayExt: Relay {
    /// Collect broadcasts with timeout
    async fn collect_broadcasts_with_timeout<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        count: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<T>>;

    /// Collect direct messages with timeout
    async fn collect_direct_with_timeout<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        me: NodeIndex,
        count: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<T>>;
}

#[async_trait]
impl<R: Relay + ?Sized> RelayExt for R {
    async fn collect_broadcasts_with_timeout<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        count: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<T>> {
        tokio::time::timeout(timeout, self.collect_broadcasts(room, slot, count))
            .await
            .map_err(|_| crate::Error::Timeout(format!("broadcasts in slot {}", slot)))?
    }

    async fn collect_direct_with_timeout<T: DeserializeOwned + Send>(
        &self,
        room: &RoomId,
        slot: Slot,
        me: NodeIndex,
        count: usize,
        timeout: std::time::Duration,
    ) -> Result<Vec<T>> {
        tokio::time::timeout(timeout, self.collect_direct(room, slot, me, count))
            .await
            .map_err(|_| crate::Error::Timeout(format!("direct messages in slot {}", slot)))?
    }
}
