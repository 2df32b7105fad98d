//! Fuzz tests for collision resolution
//!
//! Runs the tree search for whole rooms with arbitrary senders and split choices.

use dcnet_core::message::{ProtocolMessage, sent_value};
use dcnet_core::session::{Resolution, RoundKind, RoundState};
use dcnet_core::{GroupParams, RoomConfig};
use num_bigint::BigInt;
use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use std::sync::OnceLock;

const MAX_STEPS: usize = 20_000;

fn group() -> GroupParams {
    static GROUP: OnceLock<GroupParams> = OnceLock::new();
    GROUP
        .get_or_init(|| GroupParams::generate(32, 64, &mut rand::thread_rng()).unwrap())
        .clone()
}

/// Room size, deterministic flag, and which nodes send what
fn room_strategy() -> impl Strategy<Value = (RoomConfig, Vec<Option<String>>)> {
    (2usize..7, any::<bool>()).prop_flat_map(|(n, deterministic)| {
        let room = RoomConfig::local(n, group())
            .with_pad_length(3)
            .with_non_probabilistic_mode(deterministic);
        let texts = prop::collection::vec(prop::option::of("[a-z]{1,6}"), n);
        (Just(room), texts)
    })
}

/// Resolved messages per node, or the step at which the room stalled
fn play(
    room: &RoomConfig,
    texts: &[Option<String>],
    seed: u64,
) -> Result<Vec<Vec<String>>, usize> {
    let n = room.room_size;
    let payloads: Vec<Option<BigInt>> = texts
        .iter()
        .map(|t| {
            t.as_ref()
                .map(|text| ProtocolMessage::encode(text, room).unwrap().payload(room))
        })
        .collect();

    let mut states: Vec<RoundState> = (0..n).map(|_| RoundState::new()).collect();
    let mut rngs: Vec<ChaCha20Rng> = (0..n)
        .map(|i| {
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            rng.set_stream(i as u64 + 1);
            rng
        })
        .collect();
    let mut resolved = vec![Vec::new(); n];

    for step in 0..MAX_STEPS {
        if states.iter().all(|s| s.finished) {
            return Ok(resolved);
        }

        let mut round = 0;
        for state in &mut states {
            round = state.next_round().map_err(|_| step)?;
        }
        let sending: Vec<bool> = (0..n)
            .map(|i| states[i].may_send(payloads[i].is_some()))
            .collect();

        let sum: BigInt = match RoundKind::of(round) {
            RoundKind::Real => (0..n)
                .filter(|&i| sending[i])
                .filter_map(|i| payloads[i].as_ref())
                .map(|payload| sent_value(payload, room))
                .sum(),
            RoundKind::Virtual => states[0].virtual_sum(round).map_err(|_| step)?,
        };

        for i in 0..n {
            let own = if sending[i] { payloads[i].as_ref() } else { None };
            let (resolution, _) = states[i]
                .resolve(sum.clone(), own, room, &mut rngs[i])
                .map_err(|_| step)?;
            if let Resolution::Resolved { message, .. } = resolution {
                resolved[i].push(message);
            }
        }
    }
    Err(MAX_STEPS)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every submitted message reaches every node, in the same order
    #[test]
    fn every_message_resolves(
        (room, texts) in room_strategy(),
        seed in any::<u64>(),
    ) {
        let resolved = play(&room, &texts, seed);
        prop_assert!(resolved.is_ok(), "room stalled at step {:?}", resolved.as_ref().err());
        let resolved = resolved.unwrap();

        let mut expected: Vec<String> = texts.iter().flatten().cloned().collect();
        expected.sort();
        for messages in &resolved {
            prop_assert_eq!(messages, &resolved[0]);
            let mut got = messages.clone();
            got.sort();
            prop_assert_eq!(&got, &expected);
        }
    }

    /// Feeding arbitrary aggregates never panics the scheduler
    #[test]
    fn arbitrary_sums_never_panic(
        sums in prop::collection::vec(any::<i64>(), 1..40),
        deterministic in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let room = RoomConfig::local(4, group())
            .with_pad_length(2)
            .with_non_probabilistic_mode(deterministic);
        let mut state = RoundState::new();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);

        for raw in sums {
            if state.finished || state.next_round().is_err() {
                break;
            }
            if state.resolve(BigInt::from(raw), None, &room, &mut rng).is_err() {
                break;
            }
        }
    }
}
