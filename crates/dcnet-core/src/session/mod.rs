//! DC-net session state machine
//!
//! A session lets every node of a room submit at most one plaintext and
//! delivers every submitted plaintext to every node without revealing who
//! sent which. Each loop iteration:
//!
//! 1. Synchronizes the whole room on a barrier
//! 2. Stops if every colliding message has been resolved
//! 3. Plays the next scheduled round, real or virtual
//! 4. Decodes the aggregate and updates the schedule
//!
//! A real round runs four phases, each closed by a room-wide barrier:
//! blinding and mask share exchange, key commitments, message commitments,
//! and the blinded message broadcast whose sum the aggregation task delivers.
//!
//! The key commitment is opened by a second zero-sum value drawn alongside
//! the blinding key. That opening is never broadcast; the room only checks
//! that the product of all key commitments is 1.

mod messages;
mod scheduler;

pub use messages::{CommitmentKind, CommitmentMessage, MessageBroadcast};
pub use scheduler::{Resolution, RoundKind, RoundState};

use crate::commitment::{self, Commitment};
use crate::keygen::BlindingKeyGenerator;
use crate::message::ProtocolMessage;
use crate::mpc::{Aggregator, AggregatorHandle, PairwiseMesh, Phase, Relay, RoundAggregate, Slot};
use crate::types::RoomConfig;
use crate::{Error, NodeIndex, Result};
use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument};

/// Node-local session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Check every real round's openings against its commitments
    pub verify_commitments: bool,
    /// Seed for the node's RNG; each node derives its own stream from it
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            verify_commitments: true,
            seed: None,
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the run reproducible
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Exchange commitments without checking them
    pub fn without_commitment_verification(mut self) -> Self {
        self.verify_commitments = false;
        self
    }
}

/// One loop iteration as seen by a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub step: u64,
    pub round: u64,
    pub kind: RoundKind,
    #[serde(with = "crate::types::decimal_signed")]
    pub sum: BigInt,
    pub sent_count: u64,
    pub outcome: Resolution,
}

/// Result of a finished session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub node: NodeIndex,
    /// Resolved plaintexts in resolution order
    pub messages: Vec<String>,
    pub collision_size: u64,
    pub resolved_count: u64,
    pub real_rounds_played: u64,
    pub virtual_rounds_played: u64,
    pub transcript: Vec<RoundRecord>,
    #[serde(skip)]
    pub prior_sums: BTreeMap<u64, BigInt>,
    pub elapsed_ms: u128,
    pub started_at: DateTime<Utc>,
}

impl SessionReport {
    fn new(node: NodeIndex) -> Self {
        Self {
            node,
            messages: Vec::new(),
            collision_size: 0,
            resolved_count: 0,
            real_rounds_played: 0,
            virtual_rounds_played: 0,
            transcript: Vec::new(),
            prior_sums: BTreeMap::new(),
            elapsed_ms: 0,
            started_at: Utc::now(),
        }
    }
}

/// Drives one node through a session
pub struct SessionManager<R: Relay + 'static> {
    room: Arc<RoomConfig>,
    node: NodeIndex,
    relay: Arc<R>,
    options: SessionOptions,
}

/// Per-session resources of a running node
struct Participant<'a, R: Relay + 'static> {
    mesh: PairwiseMesh<'a, R>,
    keys: BlindingKeyGenerator,
    masks: BlindingKeyGenerator,
    aggregator: AggregatorHandle,
    rng: ChaCha20Rng,
    message: ProtocolMessage,
}

impl<R: Relay + 'static> SessionManager<R> {
    pub fn new(
        room: Arc<RoomConfig>,
        node: NodeIndex,
        relay: Arc<R>,
        options: SessionOptions,
    ) -> Result<Self> {
        room.validate()?;
        room.check_index(node)?;
        Ok(Self {
            room,
            node,
            relay,
            options,
        })
    }

    /// This node's index
    pub fn node(&self) -> NodeIndex {
        self.node
    }

    /// Run a session, submitting `plaintext` (empty to submit nothing)
    ///
    /// Returns once every colliding message is resolved. Any failure aborts
    /// the session with [`Error::Aborted`], which carries the elapsed time
    /// and the messages resolved so far.
    #[instrument(skip(self, plaintext), fields(node = self.node))]
    pub async fn run(&self, plaintext: &str) -> Result<SessionReport> {
        let started = Instant::now();
        let mut report = SessionReport::new(self.node);

        info!(
            node = self.node,
            room_size = self.room.room_size,
            strategy = %self.room.key_strategy,
            sending = !plaintext.is_empty(),
            "Starting DC-net session"
        );

        match self.drive(plaintext, &mut report).await {
            Ok(()) => {
                report.elapsed_ms = started.elapsed().as_millis();
                info!(
                    node = self.node,
                    resolved = report.resolved_count,
                    real_rounds = report.real_rounds_played,
                    virtual_rounds = report.virtual_rounds_played,
                    elapsed_ms = report.elapsed_ms as u64,
                    "Session finished"
                );
                Ok(report)
            }
            Err(e) => {
                let elapsed_ms = started.elapsed().as_millis();
                error!(
                    node = self.node,
                    elapsed_ms = elapsed_ms as u64,
                    resolved = report.messages.len(),
                    error = %e,
                    "Session aborted"
                );
                Err(Error::Aborted {
                    elapsed_ms,
                    resolved: report.messages,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn drive(&self, plaintext: &str, report: &mut SessionReport) -> Result<()> {
        let room = self.room.as_ref();
        let mut rng = self.rng();
        let message = ProtocolMessage::encode_with_rng(plaintext, room, &mut rng)?;
        let own_payload = message.payload(room);

        let mut participant = Participant {
            mesh: PairwiseMesh::new(self.relay.as_ref(), room, self.node)?,
            keys: BlindingKeyGenerator::new(room, self.node)?,
            masks: BlindingKeyGenerator::new(room, self.node)?,
            aggregator: Aggregator::spawn(Arc::clone(&self.relay), Arc::clone(&self.room)),
            rng,
            message,
        };
        let mut state = RoundState::new();
        let mut step: u64 = 0;

        loop {
            step += 1;
            participant
                .mesh
                .barrier(Slot::new(step, Phase::Sync))
                .await?;

            if state.finished {
                break;
            }

            let round = state.next_round()?;
            let kind = RoundKind::of(round);
            let sending = state.may_send(!participant.message.is_empty());

            let sum = match kind {
                RoundKind::Real => {
                    report.real_rounds_played += 1;
                    self.play_real_round(&mut participant, step, round, sending)
                        .await?
                }
                RoundKind::Virtual => {
                    report.virtual_rounds_played += 1;
                    state.virtual_sum(round)?
                }
            };

            let own = sending.then_some(&own_payload);
            let (outcome, sent_count) =
                state.resolve(sum.clone(), own, room, &mut participant.rng)?;

            match &outcome {
                Resolution::Resolved { message, own } => {
                    info!(node = self.node, round, own, message = %message, "Message resolved");
                    report.messages.push(message.clone());
                }
                Resolution::Silent => {
                    info!(node = self.node, "Nobody sent a message");
                }
                Resolution::Retry { parent } => {
                    debug!(node = self.node, round, parent, "Degenerate split, replaying parent");
                }
                Resolution::Split { choice, .. } => {
                    debug!(node = self.node, round, sent_count, ?choice, "Collision, splitting");
                }
            }

            report.transcript.push(RoundRecord {
                step,
                round,
                kind,
                sum,
                sent_count,
                outcome,
            });
        }

        participant.aggregator.finish().await?;

        report.collision_size = state.collision_size;
        report.resolved_count = state.resolved_count;
        report.prior_sums = state.prior_sums;
        Ok(())
    }

    async fn play_real_round(
        &self,
        participant: &mut Participant<'_, R>,
        step: u64,
        round: u64,
        sending: bool,
    ) -> Result<BigInt> {
        let room = self.room.as_ref();
        let group = &room.group;
        participant.aggregator.collect(step, round).await?;

        debug!(node = self.node, round, step, sending, "Real round: exchanging blinding shares");
        participant.keys.generate_local_shares(&mut participant.rng);
        participant
            .keys
            .exchange_shares(&participant.mesh, Slot::new(step, Phase::KeyExchange))
            .await?;
        let key = participant.keys.round_key_value()?;

        participant.masks.generate_local_shares(&mut participant.rng);
        participant
            .masks
            .exchange_shares(&participant.mesh, Slot::new(step, Phase::MaskExchange))
            .await?;
        let key_opening = group.reduce(&participant.masks.round_key_value()?);

        let key_commitment = commitment::commit_signed(group, &key, &key_opening);
        let key_commitments = self
            .exchange_commitment(step, round, CommitmentKind::Key, key_commitment)
            .await?;
        participant
            .mesh
            .barrier(Slot::new(step, Phase::KeyCommitmentSync))
            .await?;

        let mut outgoing = if sending {
            participant.message.clone()
        } else {
            ProtocolMessage::empty()
        };
        outgoing.add_blinding_key(&key);

        let (message_commitment, message_opening) =
            commitment::commit_random(group, &outgoing.value, &mut participant.rng);
        let message_commitments = self
            .exchange_commitment(step, round, CommitmentKind::Message, message_commitment)
            .await?;
        participant
            .mesh
            .barrier(Slot::new(step, Phase::MessageCommitmentSync))
            .await?;

        let broadcast = MessageBroadcast {
            node: self.node,
            round,
            value: outgoing.value,
            message_opening,
        };
        self.relay
            .broadcast(&room.room_id, Slot::new(step, Phase::Message), &broadcast)
            .await?;

        let aggregate = participant.aggregator.next_aggregate().await?;
        if aggregate.step != step || aggregate.round != round {
            return Err(Error::ProtocolViolation(format!(
                "Expected the aggregate of round {} (step {}), got round {} (step {})",
                round, step, aggregate.round, aggregate.step
            )));
        }

        if self.options.verify_commitments {
            self.verify_round(&aggregate, &key_commitments, &message_commitments)?;
        }

        Ok(aggregate.sum)
    }

    /// Broadcast this node's commitment and collect everyone's
    async fn exchange_commitment(
        &self,
        step: u64,
        round: u64,
        kind: CommitmentKind,
        commitment: Commitment,
    ) -> Result<BTreeMap<NodeIndex, Commitment>> {
        let room = self.room.as_ref();
        let phase = match kind {
            CommitmentKind::Key => Phase::KeyCommitment,
            CommitmentKind::Message => Phase::MessageCommitment,
        };
        let slot = Slot::new(step, phase);

        let outgoing = CommitmentMessage {
            node: self.node,
            round,
            kind,
            commitment,
        };
        self.relay.broadcast(&room.room_id, slot, &outgoing).await?;

        let incoming: Vec<CommitmentMessage> = self
            .relay
            .collect_broadcasts(&room.room_id, slot, room.room_size)
            .await?;

        let mut commitments = BTreeMap::new();
        for message in incoming {
            room.check_index(message.node)
                .map_err(|_| Error::Channel(format!("Commitment from unknown node {}", message.node)))?;
            if message.kind != kind || message.round != round {
                return Err(Error::Channel(format!(
                    "Node {} sent a {:?} commitment for round {} in slot {}",
                    message.node, message.kind, message.round, slot
                )));
            }
            if commitments.insert(message.node, message.commitment).is_some() {
                return Err(Error::Channel(format!(
                    "Node {} committed twice in slot {}",
                    message.node, slot
                )));
            }
        }
        Ok(commitments)
    }

    /// Check the revealed openings of a real round
    fn verify_round(
        &self,
        aggregate: &RoundAggregate,
        key_commitments: &BTreeMap<NodeIndex, Commitment>,
        message_commitments: &BTreeMap<NodeIndex, Commitment>,
    ) -> Result<()> {
        let group = &self.room.group;

        for broadcast in &aggregate.broadcasts {
            let committed = message_commitments.get(&broadcast.node).ok_or_else(|| {
                Error::VerificationFailed(format!(
                    "Node {} broadcast without a message commitment",
                    broadcast.node
                ))
            })?;
            if !commitment::verify(group, committed, &broadcast.value, &broadcast.message_opening)
            {
                return Err(Error::VerificationFailed(format!(
                    "Node {} broadcast does not match its commitment in round {}",
                    broadcast.node, aggregate.round
                )));
            }
        }

        if !commitment::cancels(group, key_commitments.values()) {
            return Err(Error::VerificationFailed(format!(
                "Blinding keys of round {} do not commit to zero",
                aggregate.round
            )));
        }

        debug!(node = self.node, round = aggregate.round, "Round commitments verified");
        Ok(())
    }

    fn rng(&self) -> ChaCha20Rng {
        match self.options.seed {
            Some(seed) => {
                let mut rng = ChaCha20Rng::seed_from_u64(seed);
                rng.set_stream(self.node as u64);
                rng
            }
            None => ChaCha20Rng::from_entropy(),
        }
    }
}
