//! Aggregation task
//!
//! Owns the receiving side of the message broadcast. The session tells it
//! which real round is starting; it waits for the `n` broadcasts of that
//! round, sums them, and hands the aggregate back over a single-consumer
//! channel. The session and the task share nothing else.

use super::{Phase, Relay, Slot};
use crate::session::MessageBroadcast;
use crate::types::RoomConfig;
use crate::{Error, NodeIndex, Result};
use num_bigint::BigInt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Rounds buffered between the task and the session
const CHANNEL_CAPACITY: usize = 8;

/// Instruction from the session to the aggregation task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorCommand {
    /// Sum the message broadcasts of real round `round`, played in iteration `step`
    Collect { step: u64, round: u64 },
    /// The session is over
    Finish,
}

/// Room-wide sum of one real round
#[derive(Debug, Clone)]
pub struct RoundAggregate {
    pub step: u64,
    pub round: u64,
    pub sum: BigInt,
    /// Every node's broadcast, sorted by node index
    pub broadcasts: Vec<MessageBroadcast>,
}

/// Spawns the aggregation task
pub struct Aggregator;

impl Aggregator {
    /// Start the task for `room` on `relay`
    pub fn spawn<R: Relay + 'static>(relay: Arc<R>, room: Arc<RoomConfig>) -> AggregatorHandle {
        let (commands, mut command_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (result_tx, results) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            while let Some(command) = command_rx.recv().await {
                let (step, round) = match command {
                    AggregatorCommand::Collect { step, round } => (step, round),
                    AggregatorCommand::Finish => break,
                };

                let outcome = collect_round(relay.as_ref(), &room, step, round).await;
                let failed = outcome.is_err();
                if let Err(e) = &outcome {
                    error!(step, round, error = %e, "Aggregation failed");
                }
                if result_tx.send(outcome).await.is_err() || failed {
                    break;
                }
            }
            debug!("Aggregator stopped");
        });

        AggregatorHandle {
            commands,
            results,
            task: Some(task),
        }
    }
}

async fn collect_round<R: Relay>(
    relay: &R,
    room: &RoomConfig,
    step: u64,
    round: u64,
) -> Result<RoundAggregate> {
    let slot = Slot::new(step, Phase::Message);
    let mut broadcasts: Vec<MessageBroadcast> = relay
        .collect_broadcasts(&room.room_id, slot, room.room_size)
        .await?;
    broadcasts.sort_by_key(|b| b.node);

    let senders: BTreeSet<NodeIndex> = broadcasts.iter().map(|b| b.node).collect();
    if senders.len() != room.room_size || !senders.iter().all(|&n| room.check_index(n).is_ok()) {
        return Err(Error::Channel(format!(
            "Round {} broadcasts came from nodes {:?}",
            round, senders
        )));
    }
    if let Some(stray) = broadcasts.iter().find(|b| b.round != round) {
        return Err(Error::Channel(format!(
            "Node {} broadcast for round {} during round {}",
            stray.node, stray.round, round
        )));
    }

    let sum: BigInt = broadcasts.iter().map(|b| &b.value).sum();
    debug!(step, round, "Round aggregate collected");

    Ok(RoundAggregate {
        step,
        round,
        sum,
        broadcasts,
    })
}

/// Session side of the aggregation task
pub struct AggregatorHandle {
    commands: mpsc::Sender<AggregatorCommand>,
    results: mpsc::Receiver<Result<RoundAggregate>>,
    task: Option<JoinHandle<()>>,
}

impl AggregatorHandle {
    /// Announce that real round `round` is being played in iteration `step`
    pub async fn collect(&self, step: u64, round: u64) -> Result<()> {
        self.commands
            .send(AggregatorCommand::Collect { step, round })
            .await
            .map_err(|_| Error::Channel("Aggregator stopped".into()))
    }

    /// Wait for the next round's aggregate
    pub async fn next_aggregate(&mut self) -> Result<RoundAggregate> {
        self.results
            .recv()
            .await
            .ok_or_else(|| Error::Channel("Aggregator closed its result channel".into()))?
    }

    /// Signal termination and wait for the task to exit
    pub async fn finish(mut self) -> Result<()> {
        // A task that already stopped on an error has dropped its receiver.
        let _ = self.commands.send(AggregatorCommand::Finish).await;
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| Error::Internal(format!("Aggregator task failed: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for AggregatorHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
