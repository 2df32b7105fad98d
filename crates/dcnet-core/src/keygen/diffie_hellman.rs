//! Pairwise Diffie-Hellman agreement on blinding values

use crate::group::GroupParams;
use crate::{Error, NodeIndex, Result};
use num_bigint::{BigInt, BigUint};
use num_traits::One;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const EXPANSION_LABEL: &[u8] = b"dcnet/blinding-expansion/v1";

/// Round key material for the Diffie-Hellman strategy
///
/// Each pair of nodes derives the same scalar from `g^(a·b)`. The lower
/// index adds it and the higher index subtracts it, so the room-wide sum is
/// zero.
#[derive(Clone)]
pub struct DiffieHellmanKeys {
    node: NodeIndex,
    peers: Vec<NodeIndex>,
    group: GroupParams,
    bits: u64,
    exponents: BTreeMap<NodeIndex, BigUint>,
    local: BTreeMap<NodeIndex, BigUint>,
    received: BTreeMap<NodeIndex, BigUint>,
}

impl DiffieHellmanKeys {
    /// Key material for `node`; derived scalars are `bits` long
    pub fn new(node: NodeIndex, peers: Vec<NodeIndex>, group: GroupParams, bits: u64) -> Self {
        Self {
            node,
            peers,
            group,
            bits,
            exponents: BTreeMap::new(),
            local: BTreeMap::new(),
            received: BTreeMap::new(),
        }
    }

    /// Pick one exponent per peer and return the half-keys `g^exp mod p`
    pub fn generate_local_shares<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<BigInt> {
        self.exponents.clear();
        self.local.clear();
        self.received.clear();

        for peer in &self.peers {
            let mut exponent = self.group.random_exponent(rng);
            while exponent < BigUint::one() {
                exponent = self.group.random_exponent(rng);
            }
            let half = self.group.pow_g(&exponent);
            self.exponents.insert(*peer, exponent);
            self.local.insert(*peer, half);
        }

        self.local.values().cloned().map(BigInt::from).collect()
    }

    /// Half-key sent to `peer`
    pub fn local_share(&self, peer: NodeIndex) -> Option<BigInt> {
        self.local.get(&peer).cloned().map(BigInt::from)
    }

    /// Store the half-keys received from every peer
    pub fn accept(&mut self, received: BTreeMap<NodeIndex, BigInt>) -> Result<()> {
        if received.len() != self.peers.len() {
            return Err(Error::ProtocolViolation(format!(
                "Node {} expected {} half-keys, got {}",
                self.node,
                self.peers.len(),
                received.len()
            )));
        }

        let mut halves = BTreeMap::new();
        for peer in &self.peers {
            let value = received.get(peer).ok_or_else(|| {
                Error::ProtocolViolation(format!("Missing half-key from node {}", peer))
            })?;
            let half = value
                .to_biguint()
                .filter(|half| self.group.contains(half))
                .ok_or_else(|| {
                    Error::VerificationFailed(format!(
                        "Half-key from node {} is not a subgroup element",
                        peer
                    ))
                })?;
            halves.insert(*peer, half);
        }

        self.received = halves;
        Ok(())
    }

    /// Signed sum of the scalars shared with every peer
    pub fn round_key_value(&self) -> Result<BigInt> {
        if self.exponents.is_empty() || self.received.len() != self.peers.len() {
            return Err(Error::Internal(
                "Round key requested before the half-key exchange completed".into(),
            ));
        }

        let mut key = BigInt::default();
        for (peer, half) in &self.received {
            let exponent = self
                .exponents
                .get(peer)
                .ok_or_else(|| Error::Internal(format!("No exponent for node {}", peer)))?;
            let shared = self.group.exp(half, exponent);
            let scalar = BigInt::from(expand_shared_secret(&shared, self.bits));

            if *peer < self.node {
                key -= scalar;
            } else {
                key += scalar;
            }
        }
        Ok(key)
    }
}

impl std::fmt::Debug for DiffieHellmanKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffieHellmanKeys")
            .field("node", &self.node)
            .field("peers", &self.peers)
            .field("bits", &self.bits)
            .field("exponents", &"[REDACTED]")
            .finish()
    }
}

/// Stretch a shared group element to a `bits`-bit scalar with SHA-256 in counter mode
pub fn expand_shared_secret(shared: &BigUint, bits: u64) -> BigUint {
    let input = shared.to_bytes_be();
    let bytes_needed = bits.div_ceil(8) as usize;

    let mut output = Vec::with_capacity(bytes_needed + 32);
    let mut counter: u32 = 0;
    while output.len() < bytes_needed {
        let mut hasher = Sha256::new();
        hasher.update(EXPANSION_LABEL);
        hasher.update(counter.to_be_bytes());
        hasher.update(&input);
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(bytes_needed);

    let excess = bytes_needed as u64 * 8 - bits;
    BigUint::from_bytes_be(&output) >> excess
}
