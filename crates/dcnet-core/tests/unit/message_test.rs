//! Unit tests for message packing

use dcnet_core::message::{
    PAD_ALPHABET, ProtocolMessage, at_most_average, decode_aggregate, sent_value, strip_padding,
};
use dcnet_core::{Error, GroupParams, RoomConfig};
use num_bigint::BigInt;
use num_traits::Zero;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

fn room(n: usize, pad_length: usize) -> RoomConfig {
    let group = GroupParams::generate(32, 64, &mut rand::thread_rng()).unwrap();
    RoomConfig::local(n, group).with_pad_length(pad_length)
}

#[test]
fn test_packing_layout() {
    let room = room(3, 4);
    let msg = ProtocolMessage::encode("hi", &room).unwrap();

    // "hi" = 0x6869, shifted past four pad bytes, times n + 1, plus the bit.
    let plain = BigInt::from(0x6869u32);
    let pad = BigInt::from(msg.pad.clone());
    let expected = ((plain << 32) + pad) * 4 + 1;
    assert_eq!(msg.value, expected);
}

#[test]
fn test_seeded_padding_is_reproducible() {
    let room = room(4, 8);
    let a = ProtocolMessage::encode_with_rng("same", &room, &mut ChaCha20Rng::seed_from_u64(5))
        .unwrap();
    let b = ProtocolMessage::encode_with_rng("same", &room, &mut ChaCha20Rng::seed_from_u64(5))
        .unwrap();
    let c = ProtocolMessage::encode_with_rng("same", &room, &mut ChaCha20Rng::seed_from_u64(6))
        .unwrap();

    assert_eq!(a, b);
    assert_ne!(a.value, c.value, "different pads keep equal plaintexts apart");
}

#[test]
fn test_zero_pad_length() {
    let room = room(2, 0);
    let msg = ProtocolMessage::encode("x", &room).unwrap();
    assert!(msg.pad.is_zero());

    let (payload, sent) = decode_aggregate(&msg.value, &room).unwrap();
    assert_eq!(sent, 1);
    assert_eq!(strip_padding(&payload, &room).unwrap(), "x");
}

#[test]
fn test_unicode_round_trip() {
    let room = room(5, 6);
    for text in ["héllo", "日本語", "🦀 crab", "a"] {
        let msg = ProtocolMessage::encode(text, &room).unwrap();
        let (payload, sent) = decode_aggregate(&msg.value, &room).unwrap();
        assert_eq!(sent, 1);
        assert_eq!(strip_padding(&payload, &room).unwrap(), text);
    }
}

#[test]
fn test_blinded_sum_still_decodes() {
    let room = room(3, 4);
    let mut a = ProtocolMessage::encode("left", &room).unwrap();
    let mut b = ProtocolMessage::empty();
    let mut c = ProtocolMessage::empty();

    let k1 = BigInt::from(987_654_321_u64);
    let k2 = BigInt::from(-123_456_789_i64);
    a.add_blinding_key(&k1);
    b.add_blinding_key(&k2);
    c.add_blinding_key(&-(&k1 + &k2));

    let sum = &a.value + &b.value + &c.value;
    let (payload, sent) = decode_aggregate(&sum, &room).unwrap();
    assert_eq!(sent, 1);
    assert_eq!(strip_padding(&payload, &room).unwrap(), "left");
}

#[test]
fn test_collision_payload_is_not_a_message() {
    let room = room(3, 4);
    let a = ProtocolMessage::encode("one", &room).unwrap();
    let b = ProtocolMessage::encode("two", &room).unwrap();

    let (payload, sent) = decode_aggregate(&(&a.value + &b.value), &room).unwrap();
    assert_eq!(sent, 2);
    assert_eq!(payload, a.payload(&room) + b.payload(&room));
}

#[test]
fn test_average_rule_separates_two_senders() {
    let room = room(3, 4);
    let a = ProtocolMessage::encode("apple", &room).unwrap();
    let b = ProtocolMessage::encode("zebra", &room).unwrap();
    let total = a.payload(&room) + b.payload(&room);

    let a_left = at_most_average(&a.payload(&room), &total, 2);
    let b_left = at_most_average(&b.payload(&room), &total, 2);
    assert_ne!(a_left, b_left);
    assert_eq!(sent_value(&a.payload(&room), &room), a.value);
}

#[test]
fn test_encoding_errors() {
    let room = room(3, 4).with_max_message_length(3);
    assert!(matches!(
        ProtocolMessage::encode("four", &room),
        Err(Error::MessageTooLong { length: 4, max: 3 })
    ));

    // A payload whose plaintext bytes are not UTF-8.
    let bad = BigInt::from(0xFFu32) << 32;
    assert!(matches!(
        strip_padding(&bad, &room),
        Err(Error::Encoding(_))
    ));
}

#[test]
fn test_pad_alphabet_is_printable() {
    assert_eq!(PAD_ALPHABET.len(), 64);
    assert!(PAD_ALPHABET.iter().all(|b| b.is_ascii_graphic()));
}
