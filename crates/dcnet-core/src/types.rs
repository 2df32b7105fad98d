//! Core types for DC-net rooms
//!
//! This module defines the room-wide configuration handed out by the
//! directory service, node identifiers, and the serde helpers used to move
//! big integers over the wire as decimal strings.

use crate::group::GroupParams;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

/// 1-based index of a node within its room
pub type NodeIndex = usize;

/// Unique identifier for a room
pub type RoomId = [u8; 32];

/// Default maximum plaintext length in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 140;

/// Default number of random padding bytes appended to each plaintext
pub const DEFAULT_PAD_LENGTH: usize = 8;

/// Upper bound on `pad_length`
pub const MAX_PAD_LENGTH: usize = 64;

/// Strategy used to derive the per-round blinding keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyStrategy {
    /// Every node splits a random secret into shares for its peers
    #[default]
    SecretSharing,
    /// Every pair of nodes agrees on a shared value via Diffie-Hellman
    DiffieHellman,
}

impl fmt::Display for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::SecretSharing => write!(f, "secret-sharing"),
            KeyStrategy::DiffieHellman => write!(f, "diffie-hellman"),
        }
    }
}

impl std::str::FromStr for KeyStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "secret-sharing" | "ss" => Ok(KeyStrategy::SecretSharing),
            "diffie-hellman" | "dh" => Ok(KeyStrategy::DiffieHellman),
            other => Err(Error::InvalidConfig(format!(
                "Unknown key strategy: {}",
                other
            ))),
        }
    }
}

/// Serde helpers for `BigUint` as a decimal string
pub mod decimal {
    use num_bigint::BigUint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigUint, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        BigUint::parse_bytes(text.as_bytes(), 10)
            .ok_or_else(|| serde::de::Error::custom("Invalid decimal integer"))
    }
}

/// Serde helpers for `BigInt` as a signed decimal string
pub mod decimal_signed {
    use num_bigint::BigInt;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<BigInt, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        BigInt::parse_bytes(text.as_bytes(), 10)
            .ok_or_else(|| serde::de::Error::custom("Invalid decimal integer"))
    }
}

mod room_id_hex {
    use super::RoomId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(id: &RoomId, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(id))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<RoomId, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("Invalid room id length"))
    }
}

/// Room-wide parameters, immutable after the directory handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Room identifier, scopes all relay traffic
    #[serde(with = "room_id_hex")]
    pub room_id: RoomId,

    /// Number of nodes in the room
    pub room_size: usize,

    /// Node index to network address
    pub addresses: BTreeMap<NodeIndex, String>,

    /// Group parameters for commitments and Diffie-Hellman
    pub group: GroupParams,

    /// Maximum plaintext length in characters
    pub max_message_length: usize,

    /// Bytes of random padding per message
    pub pad_length: usize,

    /// Split collisions by comparing against the average instead of a coin flip
    ///
    /// Needs a nonzero `pad_length`: without padding two senders of the same
    /// plaintext always land on the same side and the split never ends.
    pub non_probabilistic_mode: bool,

    /// How blinding keys are generated
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

impl RoomConfig {
    /// Create a room of `room_size` nodes on loopback addresses
    pub fn local(room_size: usize, group: GroupParams) -> Self {
        let addresses = (1..=room_size)
            .map(|index| (index, format!("127.0.0.1:{}", 7000 + index)))
            .collect();

        Self {
            room_id: rand::random(),
            room_size,
            addresses,
            group,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            pad_length: DEFAULT_PAD_LENGTH,
            non_probabilistic_mode: false,
            key_strategy: KeyStrategy::default(),
        }
    }

    /// Set the room identifier
    pub fn with_room_id(mut self, room_id: RoomId) -> Self {
        self.room_id = room_id;
        self
    }

    /// Set the maximum plaintext length
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    /// Set the padding length
    pub fn with_pad_length(mut self, pad_length: usize) -> Self {
        self.pad_length = pad_length;
        self
    }

    /// Toggle deterministic collision splitting
    pub fn with_non_probabilistic_mode(mut self, enabled: bool) -> Self {
        self.non_probabilistic_mode = enabled;
        self
    }

    /// Select the blinding key strategy
    pub fn with_key_strategy(mut self, key_strategy: KeyStrategy) -> Self {
        self.key_strategy = key_strategy;
        self
    }

    /// Parse and validate a directory payload
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RoomConfig =
            serde_json::from_str(json).map_err(|e| Error::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a directory payload from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Serialize as a directory payload
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Modulus used to pack the sent bit: `n + 1`
    pub fn bit_modulus(&self) -> u64 {
        self.room_size as u64 + 1
    }

    /// Indices of every node except `me`, ascending
    pub fn peers(&self, me: NodeIndex) -> impl Iterator<Item = NodeIndex> + use<> {
        (1..=self.room_size).filter(move |&index| index != me)
    }

    /// Check that `index` belongs to this room
    pub fn check_index(&self, index: NodeIndex) -> Result<()> {
        if index == 0 || index > self.room_size {
            return Err(Error::InvalidNodeIndex(index));
        }
        Ok(())
    }

    /// Upper bound on the bit length of an unblinded message value
    pub fn message_bits(&self) -> u64 {
        // UTF-8 needs at most 4 bytes per character.
        let packed = 8 * (4 * self.max_message_length as u64 + self.pad_length as u64);
        let multiplier = 64 - self.bit_modulus().leading_zeros() as u64;
        packed + multiplier + 1
    }

    /// Bit length of blinding scalars, large enough to statistically hide a message
    pub fn blinding_bits(&self) -> u64 {
        self.group.p.bits().max(self.message_bits() + 128)
    }

    /// Validate all room invariants
    pub fn validate(&self) -> Result<()> {
        if self.room_size < 2 {
            return Err(Error::InvalidConfig(format!(
                "Room needs at least 2 nodes, got {}",
                self.room_size
            )));
        }

        if self.addresses.len() != self.room_size {
            return Err(Error::InvalidConfig(format!(
                "Expected {} addresses, got {}",
                self.room_size,
                self.addresses.len()
            )));
        }

        let mut seen = HashSet::new();
        for (index, address) in &self.addresses {
            self.check_index(*index)?;
            if !seen.insert(address.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "Duplicate address {} for node {}",
                    address, index
                )));
            }
        }

        if self.max_message_length == 0 {
            return Err(Error::InvalidConfig(
                "Maximum message length must be positive".into(),
            ));
        }

        if self.pad_length > MAX_PAD_LENGTH {
            return Err(Error::InvalidConfig(format!(
                "Pad length {} exceeds {}",
                self.pad_length, MAX_PAD_LENGTH
            )));
        }

        if self.non_probabilistic_mode && self.pad_length == 0 {
            return Err(Error::InvalidConfig(
                "Deterministic splitting needs a nonzero pad length".into(),
            ));
        }

        self.group.validate()
    }
}
