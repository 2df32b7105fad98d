//! Blinding key exchange messages

use crate::NodeIndex;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

/// One share (or Diffie-Hellman half-key) owed by `from` to `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMessage {
    /// Sender's node index
    pub from: NodeIndex,
    /// Recipient's node index
    pub to: NodeIndex,
    /// Share value, decimal on the wire
    #[serde(with = "crate::types::decimal_signed")]
    pub value: BigInt,
}
