//! Protocol invariant tests
//!
//! Guarantees every session must keep regardless of who sends:
//! - Blinding keys of a round sum to zero across the room
//! - A virtual round's aggregate is exactly its parent's minus its sibling's
//! - A degenerate split replays its parent before anything else
//! - Every node resolves the same messages in the same order

use dcnet_core::session::{Resolution, RoundKind, RoundState, SessionManager, SessionOptions};
use dcnet_core::{
    BlindingKeyGenerator, GroupParams, KeyStrategy, MemoryRelay, RoomConfig, SessionReport,
};
use num_bigint::BigInt;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;
use std::sync::Arc;

fn room(n: usize) -> RoomConfig {
    let group = GroupParams::generate(32, 64, &mut rand::thread_rng()).unwrap();
    RoomConfig::local(n, group).with_pad_length(4)
}

async fn run_room(
    room: RoomConfig,
    plaintexts: &[&str],
    options: SessionOptions,
) -> Vec<SessionReport> {
    let room = Arc::new(room);
    let relay = Arc::new(MemoryRelay::with_timeout(30_000));

    let handles: Vec<_> = plaintexts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let manager =
                SessionManager::new(Arc::clone(&room), i + 1, Arc::clone(&relay), options)
                    .unwrap();
            let text = text.to_string();
            tokio::spawn(async move { manager.run(&text).await })
        })
        .collect();

    let mut reports = Vec::new();
    for handle in handles {
        reports.push(handle.await.unwrap().unwrap());
    }
    reports
}

/// Round keys for one fresh exchange without a relay
fn round_keys(room: &RoomConfig) -> Vec<BigInt> {
    let mut rng = rand::thread_rng();
    let mut generators: Vec<_> = (1..=room.room_size)
        .map(|node| BlindingKeyGenerator::new(room, node).unwrap())
        .collect();
    for generator in &mut generators {
        generator.generate_local_shares(&mut rng);
    }
    for me in 1..=room.room_size {
        let received = room
            .peers(me)
            .map(|peer| (peer, generators[peer - 1].local_share(me).unwrap()))
            .collect();
        generators[me - 1].accept_shares(received).unwrap();
    }
    generators
        .iter()
        .map(|generator| generator.round_key_value().unwrap())
        .collect()
}

// ============================================================================
// Key cancellation
// ============================================================================

/// INVARIANT: blinding keys cancel for every strategy and room size
#[test]
fn invariant_keys_sum_to_zero() {
    for strategy in [KeyStrategy::SecretSharing, KeyStrategy::DiffieHellman] {
        for n in 2..=6 {
            let room = room(n).with_key_strategy(strategy);
            for _ in 0..3 {
                let keys = round_keys(&room);
                let total: BigInt = keys.iter().sum();
                assert_eq!(total, BigInt::default(), "{} keys for n = {}", strategy, n);
            }
        }
    }
}

/// INVARIANT: no single key is zero, so no node broadcasts in the clear
#[test]
fn invariant_keys_are_nonzero() {
    for strategy in [KeyStrategy::SecretSharing, KeyStrategy::DiffieHellman] {
        let room = room(4).with_key_strategy(strategy);
        assert!(round_keys(&room).iter().all(|k| *k != BigInt::default()));
    }
}

// ============================================================================
// Virtual reconstruction
// ============================================================================

/// INVARIANT: sum(2k + 1) == sum(k) - sum(2k) in every finished session
#[tokio::test]
async fn invariant_virtual_sums_are_exact() {
    let room = room(5).with_non_probabilistic_mode(true);
    let reports = run_room(room, &["ant", "bee", "cat", "", "dog"], SessionOptions::new()).await;

    for report in &reports {
        assert!(report.virtual_rounds_played > 0);
        for (&round, sum) in &report.prior_sums {
            if RoundKind::of(round) == RoundKind::Virtual {
                let k = (round - 1) / 2;
                assert_eq!(*sum, &report.prior_sums[&k] - &report.prior_sums[&(2 * k)]);
            }
        }
        for record in &report.transcript {
            assert_eq!(record.sum, report.prior_sums[&record.round]);
        }
    }
}

/// INVARIANT: every node resolves the same messages in the same order
#[tokio::test]
async fn invariant_nodes_agree() {
    for seed in [1, 2, 3] {
        let reports = run_room(
            room(4),
            &["x", "y", "z", ""],
            SessionOptions::new().with_seed(seed),
        )
        .await;
        for report in &reports[1..] {
            assert_eq!(report.messages, reports[0].messages);
            assert_eq!(report.transcript.len(), reports[0].transcript.len());
            for (mine, theirs) in report.transcript.iter().zip(&reports[0].transcript) {
                assert_eq!(mine.round, theirs.round);
                assert_eq!(mine.sum, theirs.sum);
            }
        }
    }
}

// ============================================================================
// Degenerate retries
// ============================================================================

/// INVARIANT: a degenerate child puts its parent at the front and drops its sibling
#[test]
fn invariant_retry_replays_parent_first() {
    let room = room(3);
    let mut rng = ChaCha20Rng::seed_from_u64(11);

    for (round, parent, queue_after) in [
        (2u64, 1u64, vec![1u64, 8, 9]),
        (6, 3, vec![3, 8, 9]),
        (8, 4, vec![4]),
    ] {
        let mut state = RoundState::new();
        state.collision_size = 3;
        // Two senders, both of whom picked the same child.
        state.prior_sums.insert(parent, BigInt::from(12_346));
        state.pending = VecDeque::from([round, round + 1]);
        state.pending.extend(queue_after.iter().skip(1).copied());
        state.next_round_allowed_to_send = round + 1;

        state.next_round().unwrap();
        let (resolution, _) = state
            .resolve(BigInt::from(12_346), None, &room, &mut rng)
            .unwrap();

        assert_eq!(resolution, Resolution::Retry { parent });
        assert_eq!(state.pending, VecDeque::from(queue_after));
        assert_eq!(state.next_round_allowed_to_send, parent);
    }
}

/// INVARIANT: in a session, every retried parent is the very next round played
#[tokio::test]
async fn invariant_session_retries_are_immediate() {
    for seed in 0..4 {
        let reports = run_room(
            room(3),
            &["p", "q", "r"],
            SessionOptions::new().with_seed(seed),
        )
        .await;

        for report in &reports {
            let records = &report.transcript;
            for (i, record) in records.iter().enumerate() {
                if let Resolution::Retry { parent } = record.outcome {
                    assert_eq!(records[i + 1].round, parent);
                }
            }
        }
    }
}
