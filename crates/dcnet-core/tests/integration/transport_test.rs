//! Integration tests for the relay, the pairwise mesh and the aggregation task

use dcnet_core::mpc::{Aggregator, MemoryRelay, PairwiseMesh, Phase, Relay, RelayExt, Slot};
use dcnet_core::session::MessageBroadcast;
use dcnet_core::{Error, GroupParams, RoomConfig};
use num_bigint::{BigInt, BigUint};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

fn room(n: usize) -> Arc<RoomConfig> {
    let group = GroupParams::generate(32, 64, &mut rand::thread_rng()).unwrap();
    Arc::new(RoomConfig::local(n, group))
}

#[tokio::test]
async fn test_pairwise_exchange_whole_room() {
    let room = room(5);
    let relay = Arc::new(MemoryRelay::with_timeout(10_000));
    let slot = Slot::new(1, Phase::KeyExchange);

    let handles: Vec<_> = (1..=room.room_size)
        .map(|me| {
            let room = Arc::clone(&room);
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let mesh = PairwiseMesh::new(relay.as_ref(), &room, me).unwrap();
                // Each node tells each peer the pair it belongs to.
                mesh.exchange(slot, |peer| Some(format!("{}->{}", me, peer)))
                    .await
                    .map(|received| (me, received))
            })
        })
        .collect();

    for handle in handles {
        let (me, received) = handle.await.unwrap().unwrap();
        assert_eq!(received.len(), 4);
        for (peer, payload) in received {
            assert_eq!(payload, Some(format!("{}->{}", peer, me)));
        }
    }
}

#[tokio::test]
async fn test_barrier_holds_until_last_node_arrives() {
    let room = room(3);
    let relay = Arc::new(MemoryRelay::with_timeout(10_000));
    let slot = Slot::new(1, Phase::Sync);

    let early: Vec<_> = (1..=2)
        .map(|me| {
            let room = Arc::clone(&room);
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let mesh = PairwiseMesh::new(relay.as_ref(), &room, me).unwrap();
                mesh.barrier(slot).await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(early.iter().all(|handle| !handle.is_finished()));

    let mesh = PairwiseMesh::new(relay.as_ref(), &room, 3).unwrap();
    mesh.barrier(slot).await.unwrap();
    for handle in early {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_steps_keep_replays_apart() {
    let room = room(2);
    let relay = MemoryRelay::with_timeout(1_000);

    relay
        .broadcast(&room.room_id, Slot::new(3, Phase::Message), &"first play")
        .await
        .unwrap();
    relay
        .broadcast(&room.room_id, Slot::new(7, Phase::Message), &"replay")
        .await
        .unwrap();

    let replay: Vec<String> = relay
        .collect_broadcasts(&room.room_id, Slot::new(7, Phase::Message), 1)
        .await
        .unwrap();
    assert_eq!(replay, vec!["replay".to_string()]);
    assert_eq!(relay.broadcast_count(&room.room_id, Slot::new(3, Phase::Message)), 1);
}

#[tokio::test]
async fn test_blocking_relay_with_external_timeout() {
    let room = room(2);
    let relay = MemoryRelay::new();

    let result: Result<Vec<String>, Error> = relay
        .collect_broadcasts_with_timeout(
            &room.room_id,
            Slot::new(1, Phase::KeyCommitment),
            1,
            Duration::from_millis(100),
        )
        .await;
    assert!(matches!(result, Err(Error::Timeout(_))));
}

#[tokio::test]
async fn test_aggregator_serves_rounds_in_order() {
    let room = room(2);
    let relay = Arc::new(MemoryRelay::with_timeout(5_000));
    let mut handle = Aggregator::spawn(Arc::clone(&relay), Arc::clone(&room));

    let mut expected = BTreeMap::new();
    for (step, round, values) in [(1u64, 1u64, [10i64, 21]), (2, 2, [-4, 9])] {
        handle.collect(step, round).await.unwrap();
        for (i, value) in values.into_iter().enumerate() {
            let broadcast = MessageBroadcast {
                node: i + 1,
                round,
                value: BigInt::from(value),
                message_opening: BigUint::default(),
            };
            relay
                .broadcast(&room.room_id, Slot::new(step, Phase::Message), &broadcast)
                .await
                .unwrap();
        }
        expected.insert(round, BigInt::from(values.iter().sum::<i64>()));
    }

    for round in [1, 2] {
        let aggregate = handle.next_aggregate().await.unwrap();
        assert_eq!(aggregate.round, round);
        assert_eq!(aggregate.sum, expected[&round]);
    }
    handle.finish().await.unwrap();
}

#[tokio::test]
async fn test_aggregator_rejects_stray_round() {
    let room = room(2);
    let relay = Arc::new(MemoryRelay::with_timeout(5_000));
    let mut handle = Aggregator::spawn(Arc::clone(&relay), Arc::clone(&room));
    let slot = Slot::new(5, Phase::Message);

    for (node, round) in [(1, 4u64), (2, 9u64)] {
        let broadcast = MessageBroadcast {
            node,
            round,
            value: BigInt::from(1),
            message_opening: BigUint::default(),
        };
        relay.broadcast(&room.room_id, slot, &broadcast).await.unwrap();
    }

    handle.collect(5, 4).await.unwrap();
    let result = handle.next_aggregate().await;
    assert!(matches!(result, Err(Error::Channel(_))));

    // The task stops after a failure; later requests see a closed channel.
    let result = handle.next_aggregate().await;
    assert!(matches!(result, Err(Error::Channel(_))));
}
