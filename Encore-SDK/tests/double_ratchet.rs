//! Integration tests for the Encore SDK
//!
//! Full conversations between two parties built from key bundles:
//! handshake, message exchange, persistence of state, out-of-order
//! delivery and tampering.

use encore_sdk::crypto::Argon2Config;
use encore_sdk::ratchet::chain::{derive_message_key, derive_next_chain_key};
use encore_sdk::ratchet::{MessageHeader, MAX_SKIP};
use encore_sdk::{
    deserialize_state, generate_key_bundle, init_receiver_from_bundle, init_sender,
    serialize_state, CryptoError, EncryptedMessage, KeyBundle, RatchetState,
};

struct Party {
    bundle: KeyBundle,
    state: RatchetState,
}

fn alice_and_bob() -> (Party, Party) {
    let alice_bundle = generate_key_bundle().unwrap();
    let bob_bundle = generate_key_bundle().unwrap();
    let alice_state = init_sender(&alice_bundle, &bob_bundle.export_public(2)).unwrap();
    let bob_state = init_receiver_from_bundle(&bob_bundle, &alice_bundle.export_public(1)).unwrap();
    (
        Party { bundle: alice_bundle, state: alice_state },
        Party { bundle: bob_bundle, state: bob_state },
    )
}

fn send(party: &mut Party, text: &str) -> EncryptedMessage {
    let (next, message) = party.state.encrypt(text.as_bytes()).unwrap();
    party.state = next;
    message
}

fn receive(party: &mut Party, message: &EncryptedMessage) -> String {
    let (next, plaintext) = party.state.decrypt(message).unwrap();
    party.state = next;
    String::from_utf8(plaintext).unwrap()
}

/// Alice encrypts, her state survives a serialize/deserialize cycle,
/// and the restored state keeps counting where it left off.
#[test]
fn test_smoke_scenario_with_persisted_state() {
    let (mut alice, mut bob) = alice_and_bob();

    let first = send(&mut alice, "Hey Bob! 🤘");
    assert_eq!(first.message_number, 0);

    let blob = serialize_state(&alice.state).unwrap();
    let restored = deserialize_state(&blob).unwrap();
    assert_eq!(restored, alice.state);

    let (restored, second) = restored.encrypt(b"second").unwrap();
    assert_eq!(restored.sending_message_number, 2);
    assert_eq!(second.message_number, 1);

    // the encrypted header agrees with the cleartext copy
    let header = MessageHeader::decrypt(
        &second.encrypted_header,
        &second.header_iv,
        &restored.header_key,
    )
    .unwrap();
    assert_eq!(header.message_number, 1);

    assert_eq!(receive(&mut bob, &first), "Hey Bob! 🤘");
    assert_eq!(receive(&mut bob, &second), "second");
}

#[test]
fn test_long_conversation_with_alternating_senders() {
    let (mut alice, mut bob) = alice_and_bob();

    for round in 0..5 {
        for i in 0..3 {
            let text = format!("alice {round}/{i}");
            let message = send(&mut alice, &text);
            assert_eq!(receive(&mut bob, &message), text);
        }
        let text = format!("bob {round}");
        let message = send(&mut bob, &text);
        assert_eq!(receive(&mut alice, &message), text);

        // both counters restart after every DH ratchet step
        assert_eq!(alice.state.sending_message_number, 0);
        assert_eq!(alice.state.receiving_message_number, 1);
    }
    assert!(alice.state.skipped_message_keys.is_empty());
    assert!(bob.state.skipped_message_keys.is_empty());
}

#[test]
fn test_out_of_order_within_chain() {
    let (mut alice, mut bob) = alice_and_bob();
    let messages: Vec<_> = (0..5).map(|i| send(&mut alice, &format!("m{i}"))).collect();

    assert_eq!(receive(&mut bob, &messages[3]), "m3");
    assert_eq!(bob.state.skipped_message_keys.len(), 3);
    assert_eq!(receive(&mut bob, &messages[0]), "m0");
    assert_eq!(receive(&mut bob, &messages[4]), "m4");
    assert_eq!(receive(&mut bob, &messages[2]), "m2");
    assert_eq!(receive(&mut bob, &messages[1]), "m1");
    assert!(bob.state.skipped_message_keys.is_empty());
}

#[test]
fn test_out_of_order_across_ratchet_steps() {
    let (mut alice, mut bob) = alice_and_bob();

    let hello = send(&mut alice, "hello");
    assert_eq!(receive(&mut bob, &hello), "hello");
    let reply = send(&mut bob, "reply");
    assert_eq!(receive(&mut alice, &reply), "reply");

    // Alice's new chain: message 0 is delayed past a later reply from Bob
    let delayed = send(&mut alice, "delayed");
    let on_time = send(&mut alice, "on time");
    assert_eq!(receive(&mut bob, &on_time), "on time");

    let answer = send(&mut bob, "answer");
    assert_eq!(receive(&mut alice, &answer), "answer");
    let next_chain = send(&mut alice, "next chain");
    assert_eq!(next_chain.previous_chain_length, 2);
    assert_eq!(receive(&mut bob, &next_chain), "next chain");

    assert_eq!(receive(&mut bob, &delayed), "delayed");
}

#[test]
fn test_missing_tail_of_previous_chain_is_cached() {
    let (mut alice, mut bob) = alice_and_bob();

    let hello = send(&mut alice, "hello");
    receive(&mut bob, &hello);
    let reply = send(&mut bob, "reply");
    receive(&mut alice, &reply);

    let seen = send(&mut alice, "seen");
    let lost = send(&mut alice, "arrives late");
    receive(&mut bob, &seen);
    let reply = send(&mut bob, "bob again");
    receive(&mut alice, &reply);
    let fresh = send(&mut alice, "fresh chain");
    assert_eq!(fresh.previous_chain_length, 2);

    // the new chain announces a message of the old one Bob never saw
    assert_eq!(receive(&mut bob, &fresh), "fresh chain");
    assert_eq!(bob.state.skipped_message_keys.len(), 1);
    assert_eq!(receive(&mut bob, &lost), "arrives late");
    assert!(bob.state.skipped_message_keys.is_empty());
}

#[test]
fn test_skip_beyond_window_is_rejected() {
    let (mut alice, bob) = alice_and_bob();
    let mut last = None;
    for _ in 0..=MAX_SKIP + 1 {
        last = Some(send(&mut alice, "spam"));
    }
    let last = last.unwrap();
    assert_eq!(last.message_number, MAX_SKIP + 1);

    assert!(matches!(
        bob.state.decrypt(&last),
        Err(CryptoError::TooManySkipped { .. })
    ));
}

#[test]
fn test_tampering_is_detected() {
    let (mut alice, bob) = alice_and_bob();
    let message = send(&mut alice, "integrity");

    let mut body = message.clone();
    body.encrypted_message[0] ^= 0x01;
    let mut tag = message.clone();
    tag.auth_tag[15] ^= 0x01;
    let mut iv = message.clone();
    iv.message_iv[0] ^= 0x01;

    for tampered in [body, tag, iv] {
        assert!(matches!(
            bob.state.decrypt(&tampered),
            Err(CryptoError::Authentication)
        ));
    }

    let mut header = message.clone();
    header.encrypted_header[0] ^= 0x01;
    assert!(bob.state.decrypt(&header).is_err());

    // the untouched message still decrypts with the unchanged state
    assert_eq!(bob.state.decrypt(&message).unwrap().1, b"integrity");
}

#[test]
fn test_forward_secrecy_chain_is_one_way() {
    let (mut alice, _) = alice_and_bob();
    let before = alice.state.sending_chain_key;
    send(&mut alice, "advance");

    assert_eq!(alice.state.sending_chain_key, derive_next_chain_key(&before).unwrap());
    assert_ne!(alice.state.sending_chain_key, before);
    assert_ne!(derive_message_key(&before).unwrap(), derive_next_chain_key(&before).unwrap());
    let blob = serialize_state(&alice.state).unwrap();
    assert!(!blob.contains(&encore_sdk::crypto::b64_encode(&before)));
}

#[test]
fn test_session_rejects_forged_bundle() {
    let alice = generate_key_bundle().unwrap();
    let bob = generate_key_bundle().unwrap();
    let mallory = generate_key_bundle().unwrap();

    let mut forged = bob.export_public(2);
    forged.signed_pre_key_signature = mallory.export_public(3).signed_pre_key_signature;

    assert!(matches!(
        init_sender(&alice, &forged),
        Err(CryptoError::SignatureVerification)
    ));
}

#[test]
fn test_sealed_bundle_wrong_passphrase() {
    let (alice, _) = alice_and_bob();
    let cfg = Argon2Config { memory_kib: 256, iterations: 1, parallelism: 1 };
    let sealed = alice.bundle.seal("A", &cfg).unwrap();

    assert!(matches!(sealed.open("B", &cfg), Err(CryptoError::IncorrectPassword)));
    assert_eq!(sealed.open("A", &cfg).unwrap(), alice.bundle);
}
