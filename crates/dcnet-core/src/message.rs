//! Numeric packing of plaintexts for DC-net rounds
//!
//! A plaintext is packed together with random padding and a "sent" bit:
//!
//! ```text
//! value = ((plain · 2^(8·pad_length) + pad) · (n + 1) + 1)
//! ```
//!
//! Summing the values of every node in a round then yields the number of
//! senders as `sum mod (n + 1)` and their combined padded payload as
//! `sum div (n + 1)`. Nodes with nothing to say contribute zero.

use crate::types::RoomConfig;
use crate::{Error, Result};
use num_bigint::{BigInt, BigUint, Sign};
use num_integer::Integer;
use num_traits::{One, Signed, Zero};
use rand::Rng;
use std::fmt;

/// Symbols used for random padding
pub const PAD_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A plaintext packed for transmission
#[derive(Clone, PartialEq, Eq)]
pub struct ProtocolMessage {
    /// Big-endian integer of the UTF-8 plaintext
    pub plain: BigUint,
    /// Big-endian integer of the padding characters
    pub pad: BigUint,
    /// 1 if there is something to send
    pub bit: u8,
    /// Packed value, blinded in place by [`ProtocolMessage::add_blinding_key`]
    pub value: BigInt,
}

impl ProtocolMessage {
    /// Pack `plaintext` with fresh padding from the thread RNG
    pub fn encode(plaintext: &str, room: &RoomConfig) -> Result<Self> {
        Self::encode_with_rng(plaintext, room, &mut rand::thread_rng())
    }

    /// Pack `plaintext` with padding drawn from `rng`
    pub fn encode_with_rng<R: Rng + ?Sized>(
        plaintext: &str,
        room: &RoomConfig,
        rng: &mut R,
    ) -> Result<Self> {
        let length = plaintext.chars().count();
        if length > room.max_message_length {
            return Err(Error::MessageTooLong {
                length,
                max: room.max_message_length,
            });
        }

        if plaintext.is_empty() {
            return Ok(Self::empty());
        }

        let plain = BigUint::from_bytes_be(plaintext.as_bytes());
        let pad_bytes: Vec<u8> = (0..room.pad_length)
            .map(|_| PAD_ALPHABET[rng.gen_range(0..PAD_ALPHABET.len())])
            .collect();
        let pad = BigUint::from_bytes_be(&pad_bytes);

        let payload = pack(&plain, &pad, room.pad_length);
        let value = BigInt::from(payload * room.bit_modulus() + 1u32);

        Ok(Self {
            plain,
            pad,
            bit: 1,
            value,
        })
    }

    /// The message of a node that sends nothing
    pub fn empty() -> Self {
        Self {
            plain: BigUint::zero(),
            pad: BigUint::zero(),
            bit: 0,
            value: BigInt::zero(),
        }
    }

    /// True if this node has nothing to send
    pub fn is_empty(&self) -> bool {
        self.bit == 0
    }

    /// Add a round's blinding key to the transmitted value
    pub fn add_blinding_key(&mut self, key: &BigInt) {
        self.value += key;
    }

    /// The padded plaintext `plain · 2^(8·pad_length) + pad` this node would see resolved
    pub fn payload(&self, room: &RoomConfig) -> BigInt {
        BigInt::from(pack(&self.plain, &self.pad, room.pad_length))
    }
}

impl fmt::Debug for ProtocolMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolMessage")
            .field("plain", &"[REDACTED]")
            .field("bit", &self.bit)
            .field("value_bits", &self.value.bits())
            .finish()
    }
}

fn pack(plain: &BigUint, pad: &BigUint, pad_length: usize) -> BigUint {
    (plain << (8 * pad_length)) + pad
}

/// Split a round aggregate into `(payload, sent_count)`
///
/// Fails on a negative aggregate, which honest blinding keys cannot produce.
pub fn decode_aggregate(sum: &BigInt, room: &RoomConfig) -> Result<(BigInt, u64)> {
    if sum.is_negative() {
        return Err(Error::ProtocolViolation(format!(
            "Negative round aggregate: {}",
            sum
        )));
    }

    let modulus = BigInt::from(room.bit_modulus());
    let (payload, sent) = sum.div_mod_floor(&modulus);
    let sent_count = sent
        .to_u64_digits()
        .1
        .first()
        .copied()
        .unwrap_or_default();

    Ok((payload, sent_count))
}

/// Recover the plaintext from a payload with exactly one sender
pub fn strip_padding(payload: &BigInt, room: &RoomConfig) -> Result<String> {
    let (sign, magnitude) = (payload.sign(), payload.magnitude());
    if sign == Sign::Minus {
        return Err(Error::Encoding("Negative payload".into()));
    }

    let plain = magnitude >> (8 * room.pad_length);
    if plain.is_zero() {
        return Ok(String::new());
    }

    let text = String::from_utf8(plain.to_bytes_be())?;
    Ok(text)
}

/// True if `payload` is at most the collision's average payload
pub fn at_most_average(own: &BigInt, payload: &BigInt, sent_count: u64) -> bool {
    if sent_count <= 1 {
        return own <= payload;
    }
    let average = payload / BigInt::from(sent_count);
    own <= &average
}

/// Exact packed value of a single sender, before blinding
pub fn sent_value(payload: &BigInt, room: &RoomConfig) -> BigInt {
    payload * BigInt::from(room.bit_modulus()) + BigInt::one()
}
