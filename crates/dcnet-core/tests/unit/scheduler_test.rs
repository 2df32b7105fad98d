//! Unit tests for collision resolution, driven for a whole room without a network

use dcnet_core::message::{ProtocolMessage, sent_value};
use dcnet_core::session::{Resolution, RoundKind, RoundState};
use dcnet_core::{Error, GroupParams, RoomConfig};
use num_bigint::BigInt;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::collections::VecDeque;

const MAX_STEPS: usize = 10_000;

fn room(n: usize, deterministic: bool) -> RoomConfig {
    let group = GroupParams::generate(32, 64, &mut rand::thread_rng()).unwrap();
    RoomConfig::local(n, group)
        .with_pad_length(4)
        .with_non_probabilistic_mode(deterministic)
}

/// Every node's view after running the scheduler to completion
struct Outcome {
    messages: Vec<Vec<String>>,
    rounds: Vec<u64>,
}

/// Play a room where node `i` submits `plaintexts[i - 1]`, summing real rounds directly
fn play_room(room: &RoomConfig, plaintexts: &[&str], seed: u64) -> Outcome {
    let n = room.room_size;
    let messages: Vec<ProtocolMessage> = plaintexts
        .iter()
        .map(|text| ProtocolMessage::encode(text, room).unwrap())
        .collect();
    let payloads: Vec<BigInt> = messages.iter().map(|m| m.payload(room)).collect();

    let mut states: Vec<RoundState> = (0..n).map(|_| RoundState::new()).collect();
    let mut rngs: Vec<ChaCha20Rng> = (0..n)
        .map(|node| {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            rng.set_stream(node as u64 + 1);
            rng
        })
        .collect();
    let mut resolved = vec![Vec::new(); n];
    let mut rounds = Vec::new();

    for _ in 0..MAX_STEPS {
        if states.iter().all(|state| state.finished) {
            return Outcome {
                messages: resolved,
                rounds,
            };
        }

        let round = states
            .iter_mut()
            .map(|state| state.next_round().unwrap())
            .reduce(|a, b| {
                assert_eq!(a, b, "nodes disagree on the schedule");
                a
            })
            .unwrap();
        rounds.push(round);

        let sending: Vec<bool> = (0..n)
            .map(|i| states[i].may_send(!messages[i].is_empty()))
            .collect();

        let sum: BigInt = match RoundKind::of(round) {
            RoundKind::Real => (0..n)
                .filter(|&i| sending[i])
                .map(|i| sent_value(&payloads[i], room))
                .sum(),
            RoundKind::Virtual => states[0].virtual_sum(round).unwrap(),
        };

        for i in 0..n {
            let own = sending[i].then_some(&payloads[i]);
            let (resolution, _) = states[i]
                .resolve(sum.clone(), own, room, &mut rngs[i])
                .unwrap();
            if let Resolution::Resolved { message, .. } = resolution {
                resolved[i].push(message);
            }
        }
    }
    panic!("room did not finish within {} steps", MAX_STEPS);
}

fn sorted(mut messages: Vec<String>) -> Vec<String> {
    messages.sort();
    messages
}

#[test]
fn test_single_sender_needs_one_round() {
    let room = room(3, true);
    let outcome = play_room(&room, &["", "hi", ""], 1);

    assert_eq!(outcome.rounds, vec![1]);
    for messages in outcome.messages {
        assert_eq!(messages, vec!["hi".to_string()]);
    }
}

#[test]
fn test_deterministic_mode_resolves_everything() {
    let room = room(5, true);
    let plaintexts = ["alpha", "bravo", "", "delta", "echo"];
    let outcome = play_room(&room, &plaintexts, 1);

    let expected = sorted(
        plaintexts
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect(),
    );
    for messages in &outcome.messages {
        assert_eq!(sorted(messages.clone()), expected);
    }
    // Every node saw the same resolution order.
    assert!(outcome.messages.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_probabilistic_mode_resolves_everything() {
    let room = room(4, false);
    let plaintexts = ["w", "x", "y", "z"];
    for seed in 0..8 {
        let outcome = play_room(&room, &plaintexts, seed);
        for messages in &outcome.messages {
            assert_eq!(sorted(messages.clone()), vec!["w", "x", "y", "z"]);
        }
    }
}

#[test]
fn test_equal_plaintexts_are_both_delivered() {
    let room = room(3, true);
    let outcome = play_room(&room, &["same", "same", ""], 4);
    for messages in outcome.messages {
        assert_eq!(messages, vec!["same".to_string(), "same".to_string()]);
    }
}

#[test]
fn test_virtual_rounds_follow_real_siblings() {
    let room = room(4, true);
    let outcome = play_room(&room, &["aaa", "mmm", "zzz", ""], 1);

    for (i, &round) in outcome.rounds.iter().enumerate() {
        if RoundKind::of(round) == RoundKind::Virtual {
            assert_eq!(outcome.rounds[i - 1], round - 1);
        }
    }
}

#[test]
fn test_retry_clears_sibling_and_keeps_queue() {
    let room = room(3, false);
    let mut state = RoundState::new();
    let mut rng = ChaCha20Rng::seed_from_u64(1);
    state.collision_size = 3;
    state.prior_sums.insert(2, BigInt::from(4000));
    state.pending = VecDeque::from([4, 5, 6, 7]);
    state.next_round_allowed_to_send = 5;

    state.next_round().unwrap();
    let (resolution, _) = state
        .resolve(BigInt::from(4000), None, &room, &mut rng)
        .unwrap();

    assert_eq!(resolution, Resolution::Retry { parent: 2 });
    assert_eq!(state.pending, VecDeque::from([2, 6, 7]));
    assert_eq!(state.next_round_allowed_to_send, 2);
}

#[test]
fn test_inconsistent_aggregates_are_violations() {
    let room = room(3, true);
    let mut rng = ChaCha20Rng::seed_from_u64(1);

    // More senders in a child than collided in round 1.
    let mut state = RoundState::new();
    state.collision_size = 1;
    state.pending = VecDeque::from([2]);
    state.next_round().unwrap();
    let too_many = BigInt::from(10 * room.bit_modulus() + 2);
    assert!(matches!(
        state.resolve(too_many, None, &room, &mut rng),
        Err(Error::ProtocolViolation(_))
    ));

    // A negative aggregate.
    let mut state = RoundState::new();
    state.next_round().unwrap();
    assert!(matches!(
        state.resolve(BigInt::from(-5), None, &room, &mut rng),
        Err(Error::ProtocolViolation(_))
    ));

    // Virtual sum without memorized parents.
    let state = RoundState::new();
    assert!(state.virtual_sum(3).is_err());
    assert!(state.virtual_sum(2).is_err());
}

#[test]
fn test_exhausted_schedule_is_an_error() {
    let mut state = RoundState::new();
    state.next_round().unwrap();
    assert!(matches!(
        state.next_round(),
        Err(Error::ProtocolViolation(_))
    ));
}
