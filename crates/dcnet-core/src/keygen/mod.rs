//! Per-round blinding key generation
//!
//! Every real round each node needs a fresh scalar such that the scalars of
//! all nodes in the room sum to exactly zero. Two interchangeable strategies
//! produce them:
//! - [`SecretSharingKeys`]: split a random secret into shares for the peers
//! - [`DiffieHellmanKeys`]: agree on one shared value with every peer
//!
//! Both strategies exchange exactly one value with every peer over the
//! pairwise mesh, so the session only sees the [`BlindingKeyGenerator`]
//! contract: generate local shares, exchange them, read the round key.

mod diffie_hellman;
mod messages;
mod secret_sharing;

pub use diffie_hellman::{DiffieHellmanKeys, expand_shared_secret};
pub use messages::ShareMessage;
pub use secret_sharing::SecretSharingKeys;

use crate::types::{KeyStrategy, RoomConfig};
use crate::{Error, NodeIndex, Result};
use num_bigint::BigInt;
use rand::Rng;
use std::collections::BTreeMap;

#[cfg(feature = "runtime")]
use crate::mpc::{PairwiseMesh, Relay, Slot};
#[cfg(feature = "runtime")]
use tracing::debug;

/// Blinding key generator for one node, dispatching on the room's strategy
#[derive(Debug, Clone)]
pub enum BlindingKeyGenerator {
    /// Pairwise secret sharing
    SecretSharing(SecretSharingKeys),
    /// Pairwise Diffie-Hellman
    DiffieHellman(DiffieHellmanKeys),
}

impl BlindingKeyGenerator {
    /// Generator for `node` following `room.key_strategy`
    pub fn new(room: &RoomConfig, node: NodeIndex) -> Result<Self> {
        room.check_index(node)?;
        let peers: Vec<NodeIndex> = room.peers(node).collect();
        let bits = room.blinding_bits();

        Ok(match room.key_strategy {
            KeyStrategy::SecretSharing => {
                BlindingKeyGenerator::SecretSharing(SecretSharingKeys::new(node, peers, bits))
            }
            KeyStrategy::DiffieHellman => BlindingKeyGenerator::DiffieHellman(
                DiffieHellmanKeys::new(node, peers, room.group.clone(), bits),
            ),
        })
    }

    /// Strategy in use
    pub fn strategy(&self) -> KeyStrategy {
        match self {
            BlindingKeyGenerator::SecretSharing(_) => KeyStrategy::SecretSharing,
            BlindingKeyGenerator::DiffieHellman(_) => KeyStrategy::DiffieHellman,
        }
    }

    /// Fresh values owed to the other `n - 1` nodes, in ascending peer order
    pub fn generate_local_shares<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<BigInt> {
        match self {
            BlindingKeyGenerator::SecretSharing(keys) => keys.generate_local_shares(rng),
            BlindingKeyGenerator::DiffieHellman(keys) => keys.generate_local_shares(rng),
        }
    }

    /// Value owed to `peer` from the last [`Self::generate_local_shares`]
    pub fn local_share(&self, peer: NodeIndex) -> Result<BigInt> {
        let share = match self {
            BlindingKeyGenerator::SecretSharing(keys) => keys.local_share(peer).cloned(),
            BlindingKeyGenerator::DiffieHellman(keys) => keys.local_share(peer),
        };
        share.ok_or_else(|| Error::Internal(format!("No local share for node {}", peer)))
    }

    /// Feed the values received from every peer
    pub fn accept_shares(&mut self, received: BTreeMap<NodeIndex, BigInt>) -> Result<()> {
        match self {
            BlindingKeyGenerator::SecretSharing(keys) => keys.accept(received),
            BlindingKeyGenerator::DiffieHellman(keys) => keys.accept(received),
        }
    }

    /// This node's contribution; summed over the room it is zero
    pub fn round_key_value(&self) -> Result<BigInt> {
        match self {
            BlindingKeyGenerator::SecretSharing(keys) => keys.round_key_value(),
            BlindingKeyGenerator::DiffieHellman(keys) => keys.round_key_value(),
        }
    }

    /// Swap one value with every peer over the mesh and keep what comes back
    ///
    /// Blocks until all `n - 1` peers have answered.
    #[cfg(feature = "runtime")]
    pub async fn exchange_shares<R: Relay>(
        &mut self,
        mesh: &PairwiseMesh<'_, R>,
        slot: Slot,
    ) -> Result<Vec<BigInt>> {
        let me = mesh.me();
        let mut outgoing = BTreeMap::new();
        for peer in mesh.peers() {
            outgoing.insert(
                peer,
                ShareMessage {
                    from: me,
                    to: peer,
                    value: self.local_share(peer)?,
                },
            );
        }

        let incoming = mesh
            .exchange(slot, |peer| outgoing.get(&peer).cloned())
            .await?;

        let mut received = BTreeMap::new();
        for (peer, message) in incoming {
            let message = message.ok_or_else(|| {
                Error::Channel(format!("Node {} sent an empty share", peer))
            })?;
            if message.from != peer || message.to != me {
                return Err(Error::Channel(format!(
                    "Share routed {} -> {} arrived at node {} from slot of node {}",
                    message.from, message.to, me, peer
                )));
            }
            received.insert(peer, message.value);
        }

        debug!(node = me, peers = received.len(), %slot, "Blinding shares exchanged");

        let values = received.values().cloned().collect();
        self.accept_shares(received)?;
        Ok(values)
    }
}
