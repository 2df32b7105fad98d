//! Pairwise secret sharing of a random per-node secret

use crate::{Error, NodeIndex, Result};
use num_bigint::{BigInt, RandBigInt};
use num_traits::Zero;
use rand::Rng;
use std::collections::BTreeMap;

/// Round key material for the secret-sharing strategy
///
/// The node picks a secret `s`, splits it into one share per peer so that the
/// shares sum to `s`, and ends up with `Σ received − s`. Summed over the room
/// every share appears once as sent and once as received, so the keys cancel.
#[derive(Clone)]
pub struct SecretSharingKeys {
    node: NodeIndex,
    peers: Vec<NodeIndex>,
    bits: u64,
    secret: BigInt,
    local: BTreeMap<NodeIndex, BigInt>,
    received: BTreeMap<NodeIndex, BigInt>,
}

impl SecretSharingKeys {
    /// Key material for `node` with `bits`-bit shares
    pub fn new(node: NodeIndex, peers: Vec<NodeIndex>, bits: u64) -> Self {
        Self {
            node,
            peers,
            bits,
            secret: BigInt::zero(),
            local: BTreeMap::new(),
            received: BTreeMap::new(),
        }
    }

    /// Draw a fresh secret and split it across the peers
    pub fn generate_local_shares<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<BigInt> {
        self.secret = BigInt::from(rng.gen_biguint(self.bits));
        self.local.clear();
        self.received.clear();

        let mut remaining = self.secret.clone();
        let count = self.peers.len();
        for (position, peer) in self.peers.iter().enumerate() {
            let share = if position + 1 == count {
                remaining.clone()
            } else {
                BigInt::from(rng.gen_biguint(self.bits))
            };
            remaining -= &share;
            self.local.insert(*peer, share);
        }

        self.local.values().cloned().collect()
    }

    /// Share owed to `peer`
    pub fn local_share(&self, peer: NodeIndex) -> Option<&BigInt> {
        self.local.get(&peer)
    }

    /// Store the shares received from every peer
    pub fn accept(&mut self, received: BTreeMap<NodeIndex, BigInt>) -> Result<()> {
        if received.len() != self.peers.len() || !self.peers.iter().all(|p| received.contains_key(p))
        {
            return Err(Error::ProtocolViolation(format!(
                "Node {} expected shares from {:?}, got {:?}",
                self.node,
                self.peers,
                received.keys().collect::<Vec<_>>()
            )));
        }
        self.received = received;
        Ok(())
    }

    /// `Σ received − s`
    pub fn round_key_value(&self) -> Result<BigInt> {
        if self.local.is_empty() || self.received.len() != self.peers.len() {
            return Err(Error::Internal(
                "Round key requested before the share exchange completed".into(),
            ));
        }
        let received: BigInt = self.received.values().sum();
        Ok(received - &self.secret)
    }
}

impl std::fmt::Debug for SecretSharingKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretSharingKeys")
            .field("node", &self.node)
            .field("peers", &self.peers)
            .field("bits", &self.bits)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
