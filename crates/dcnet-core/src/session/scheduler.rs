//! Binary-tree collision resolution
//!
//! Rounds are numbered as nodes of a binary tree rooted at round 1. A
//! collision in round `r` splits its senders between the children `2r`
//! (played for real) and `2r + 1` (reconstructed as `sum(r) - sum(2r)`).
//! Children go to the back of the queue; a degenerate split sends its parent
//! to the front so it is retried before anything else.

use crate::message::{at_most_average, decode_aggregate, strip_padding};
use crate::types::RoomConfig;
use crate::{Error, Result};
use num_bigint::BigInt;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// How a round's aggregate is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundKind {
    /// Nodes exchange keys and broadcast
    Real,
    /// Computed from memorized sums, no network traffic
    Virtual,
}

impl RoundKind {
    /// Round 1 and every even round are real, other odd rounds are virtual
    pub fn of(round: u64) -> Self {
        if round == 1 || round % 2 == 0 {
            RoundKind::Real
        } else {
            RoundKind::Virtual
        }
    }
}

impl fmt::Display for RoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundKind::Real => f.write_str("real"),
            RoundKind::Virtual => f.write_str("virtual"),
        }
    }
}

/// What a round's aggregate meant for the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Resolution {
    /// Nobody sent anything in round 1
    Silent,
    /// Exactly one sender; `own` if it was this node
    Resolved { message: String, own: bool },
    /// The split degenerated, `parent` is replayed next
    Retry { parent: u64 },
    /// Collision persists; `choice` is this node's next round if it contends
    Split {
        children: (u64, u64),
        choice: Option<u64>,
    },
}

/// Per-session scheduling state
#[derive(Debug, Clone)]
pub struct RoundState {
    /// Round being played
    pub round: u64,
    /// Rounds still to play, front first
    pub pending: VecDeque<u64>,
    /// The only round this node may transmit in
    pub next_round_allowed_to_send: u64,
    /// This node's message has been resolved
    pub message_transmitted: bool,
    /// Every colliding message has been resolved
    pub finished: bool,
    /// Number of senders in round 1
    pub collision_size: u64,
    /// Messages resolved so far
    pub resolved_count: u64,
    /// Aggregate of every round played, for virtual reconstruction
    pub prior_sums: BTreeMap<u64, BigInt>,
}

impl Default for RoundState {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundState {
    /// Fresh state with round 1 scheduled
    pub fn new() -> Self {
        Self {
            round: 0,
            pending: VecDeque::from([1]),
            next_round_allowed_to_send: 1,
            message_transmitted: false,
            finished: false,
            collision_size: 0,
            resolved_count: 0,
            prior_sums: BTreeMap::new(),
        }
    }

    /// Pop the next round to play
    pub fn next_round(&mut self) -> Result<u64> {
        let round = self.pending.pop_front().ok_or_else(|| {
            Error::ProtocolViolation(format!(
                "No rounds left with {} of {} messages resolved",
                self.resolved_count, self.collision_size
            ))
        })?;
        self.round = round;
        Ok(round)
    }

    /// True if a node holding a message contends in the current round
    pub fn may_send(&self, has_message: bool) -> bool {
        has_message && !self.message_transmitted && self.next_round_allowed_to_send == self.round
    }

    /// Aggregate of virtual round `round`: `sum((r - 1) / 2) - sum(r - 1)`
    pub fn virtual_sum(&self, round: u64) -> Result<BigInt> {
        if RoundKind::of(round) != RoundKind::Virtual {
            return Err(Error::ProtocolViolation(format!(
                "Round {} is not virtual",
                round
            )));
        }
        let parent = self.prior_sum((round - 1) / 2)?;
        let sibling = self.prior_sum(round - 1)?;
        Ok(parent - sibling)
    }

    fn prior_sum(&self, round: u64) -> Result<&BigInt> {
        self.prior_sums.get(&round).ok_or_else(|| {
            Error::ProtocolViolation(format!("No memorized sum for round {}", round))
        })
    }

    /// Apply the current round's aggregate
    ///
    /// `own` is this node's padded plaintext if it contends in this round.
    pub fn resolve<R: Rng + ?Sized>(
        &mut self,
        sum: BigInt,
        own: Option<&BigInt>,
        room: &RoomConfig,
        rng: &mut R,
    ) -> Result<(Resolution, u64)> {
        let round = self.round;
        let (payload, sent_count) = decode_aggregate(&sum, room)?;

        if sent_count > room.room_size as u64 {
            return Err(Error::ProtocolViolation(format!(
                "Round {} reports {} senders in a room of {}",
                round, sent_count, room.room_size
            )));
        }

        let degenerate = round > 1 && self.prior_sums.get(&(round / 2)) == Some(&sum);
        self.prior_sums.insert(round, sum);

        if round == 1 {
            self.collision_size = sent_count;
            if sent_count == 0 {
                self.finished = true;
                return Ok((Resolution::Silent, sent_count));
            }
        } else if sent_count > self.collision_size {
            return Err(Error::ProtocolViolation(format!(
                "Round {} reports {} senders but only {} collided",
                round, sent_count, self.collision_size
            )));
        }

        let resolution = if sent_count == 1 {
            let message = strip_padding(&payload, room)?;
            let own = own == Some(&payload);
            if own {
                self.message_transmitted = true;
            }
            self.resolved_count += 1;
            if self.resolved_count >= self.collision_size {
                self.finished = true;
            }
            Resolution::Resolved { message, own }
        } else if sent_count == 0 || degenerate {
            self.retry_parent()
        } else {
            let left = round
                .checked_mul(2)
                .filter(|left| *left < u64::MAX)
                .ok_or_else(|| {
                    Error::ProtocolViolation(format!("Round index overflow after {}", round))
                })?;
            let right = left + 1;

            let choice = own.map(|own| {
                let goes_left = if room.non_probabilistic_mode {
                    at_most_average(own, &payload, sent_count)
                } else {
                    rng.gen_bool(0.5)
                };
                if goes_left { left } else { right }
            });
            if let Some(choice) = choice {
                self.next_round_allowed_to_send = choice;
            }

            self.pending.push_back(left);
            self.pending.push_back(right);
            Resolution::Split {
                children: (left, right),
                choice,
            }
        };

        Ok((resolution, sent_count))
    }

    fn retry_parent(&mut self) -> Resolution {
        let round = self.round;
        let parent = round / 2;
        let sibling = round ^ 1;

        self.pending.retain(|&pending| pending != sibling);
        self.pending.push_front(parent);
        if self.next_round_allowed_to_send == round || self.next_round_allowed_to_send == sibling {
            self.next_round_allowed_to_send = parent;
        }

        Resolution::Retry { parent }
    }
}
