//! Session broadcast messages

use crate::NodeIndex;
use crate::commitment::Commitment;
use num_bigint::{BigInt, BigUint};
use serde::{Deserialize, Serialize};

/// What a [`CommitmentMessage`] commits to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentKind {
    /// The node's blinding key for the round
    Key,
    /// The node's blinded message value for the round
    Message,
}

/// A node's commitment for one real round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentMessage {
    pub node: NodeIndex,
    pub round: u64,
    pub kind: CommitmentKind,
    pub commitment: Commitment,
}

/// A node's contribution to a real round
///
/// Only the blinded value goes on the wire, never the plaintext, padding
/// or sent bit. The opening lets every node check the value against the
/// message commitment made earlier in the round. The key commitment's
/// opening never leaves the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBroadcast {
    pub node: NodeIndex,
    pub round: u64,
    #[serde(with = "crate::types::decimal_signed")]
    pub value: BigInt,
    /// Randomness of the message commitment
    #[serde(with = "crate::types::decimal")]
    pub message_opening: BigUint,
}
