/// Double Ratchet session transitions
///
/// Initialization, per-message encryption and decryption. Every function
/// takes the current `RatchetState` by reference and returns the next one;
/// on error the caller still holds the untouched input.
///
/// # References
/// - [Signal Double Ratchet Specification](https://signal.org/docs/specifications/doubleratchet/)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chain::{chain_step, derive_header_key, derive_next_header_key};
use super::dh_ratchet::{bootstrap_sending_chain, dh_ratchet_step, needs_ratchet_step};
use super::header::MessageHeader;
use super::state::RatchetState;
use super::symmetric_ratchet::{skip_message_keys, skipped_header_keys, take_skipped_key};
use crate::crypto::{
    aead_decrypt, aead_encrypt, b64_serde, generate_agreement_key_pair, generate_iv, keys_equal,
    CryptoError, IV_LEN, KEY_LEN, TAG_LEN,
};
use crate::x3dh::protocol::initiate_verified;
use crate::x3dh::{x3dh_respond, KeyBundle, MasterSecret, PublicKeyBundle};

/// Encrypted message with its encrypted header.
///
/// `sender_ratchet_key`, `message_number` and `previous_chain_length` are a
/// cleartext copy for the store; the encrypted header is authoritative.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EncryptedMessage {
    #[serde(with = "b64_serde::bytes")]
    pub encrypted_header: Vec<u8>,
    #[serde(with = "b64_serde::array")]
    pub header_iv: [u8; IV_LEN],
    #[serde(with = "b64_serde::bytes")]
    pub encrypted_message: Vec<u8>,
    #[serde(with = "b64_serde::array")]
    pub message_iv: [u8; IV_LEN],
    #[serde(with = "b64_serde::array")]
    pub auth_tag: [u8; TAG_LEN],
    #[serde(with = "b64_serde::array")]
    pub sender_ratchet_key: [u8; KEY_LEN],
    pub message_number: u32,
    pub previous_chain_length: u32,
}

impl EncryptedMessage {
    /// Associated data binding the encrypted header to the body.
    fn associated_data(&self) -> Vec<u8> {
        associated_data(&self.encrypted_header, &self.header_iv)
    }

    fn matches_header(&self, header: &MessageHeader) -> bool {
        keys_equal(&self.sender_ratchet_key, &header.sender_ratchet_key)
            && self.message_number == header.message_number
            && self.previous_chain_length == header.previous_chain_length
    }
}

fn associated_data(encrypted_header: &[u8], header_iv: &[u8; IV_LEN]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(encrypted_header.len() + IV_LEN);
    aad.extend_from_slice(encrypted_header);
    aad.extend_from_slice(header_iv);
    aad
}

/// Sender-side state from a handshake master secret.
///
/// # Arguments
/// * `master` - 64-byte handshake output
/// * `remote_public_key` - the peer's signed pre-key, first remote ratchet key
pub fn sender_state(
    master: &MasterSecret,
    remote_public_key: [u8; KEY_LEN],
) -> Result<RatchetState, CryptoError> {
    let root_key = master.root_key();
    Ok(RatchetState {
        root_key,
        sending_chain_key: master.chain_key(),
        sending_message_number: 0,
        receiving_chain_key: [0u8; KEY_LEN],
        receiving_message_number: 0,
        previous_chain_length: 0,
        dh_ratchet_key_pair: generate_agreement_key_pair()?,
        remote_public_key: Some(remote_public_key),
        header_key: derive_header_key(&root_key)?,
        receiving_header_key: None,
        next_header_key: derive_next_header_key(&root_key)?,
        skipped_message_keys: BTreeMap::new(),
    })
}

/// Receiver-side state from a handshake master secret.
///
/// The receiver cannot encrypt until its first message arrives.
pub fn init_receiver(master: &MasterSecret) -> Result<RatchetState, CryptoError> {
    let root_key = master.root_key();
    Ok(RatchetState {
        root_key,
        sending_chain_key: [0u8; KEY_LEN],
        sending_message_number: 0,
        receiving_chain_key: master.chain_key(),
        receiving_message_number: 0,
        previous_chain_length: 0,
        dh_ratchet_key_pair: generate_agreement_key_pair()?,
        remote_public_key: None,
        header_key: [0u8; KEY_LEN],
        receiving_header_key: Some(derive_header_key(&root_key)?),
        next_header_key: derive_next_header_key(&root_key)?,
        skipped_message_keys: BTreeMap::new(),
    })
}

/// Sender init: verifies the peer bundle, runs the handshake, seeds the state.
///
/// # Returns
/// * `Err(CryptoError::SignatureVerification)` - the peer pre-key is not trusted
pub fn init_sender(own: &KeyBundle, peer: &PublicKeyBundle) -> Result<RatchetState, CryptoError> {
    let peer_keys = peer.verify()?;
    debug!(peer = peer.user_id, "handshake initiated");
    let master = initiate_verified(own, &peer_keys)?;
    sender_state(&master, peer_keys.signed_pre_key)
}

/// Receiver init from the sender's public bundle.
pub fn init_receiver_from_bundle(
    own: &KeyBundle,
    peer: &PublicKeyBundle,
) -> Result<RatchetState, CryptoError> {
    let master = x3dh_respond(own, peer)?;
    init_receiver(&master)
}

impl RatchetState {
    /// Encrypts one message.
    ///
    /// # Returns
    /// * `Ok((RatchetState, EncryptedMessage))` - the next state and the message
    /// * `Err(CryptoError::InvalidState)` - no sending chain yet
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<(RatchetState, EncryptedMessage), CryptoError> {
        if !self.can_send() {
            return Err(CryptoError::InvalidState(
                "no sending chain yet, a message must be received first".into(),
            ));
        }
        let next_number = self
            .sending_message_number
            .checked_add(1)
            .ok_or_else(|| CryptoError::InvalidState("sending chain exhausted".into()))?;

        let (message_key, next_chain_key) = chain_step(&self.sending_chain_key)?;

        let header = MessageHeader {
            sender_ratchet_key: self.dh_ratchet_key_pair.public_key,
            message_number: self.sending_message_number,
            // length of our previous sending chain, not the receiving counter:
            // the peer caches that chain's missing keys up to this number
            previous_chain_length: self.previous_chain_length,
        };
        let (encrypted_header, header_iv) = header.encrypt(&self.header_key)?;

        let message_iv = generate_iv()?;
        let sealed = aead_encrypt(
            plaintext,
            &message_key,
            &message_iv,
            &associated_data(&encrypted_header, &header_iv),
        )?;

        let mut next = self.clone();
        next.sending_chain_key = next_chain_key;
        next.sending_message_number = next_number;

        debug!(message_number = header.message_number, "message encrypted");
        Ok((
            next,
            EncryptedMessage {
                encrypted_header,
                header_iv,
                encrypted_message: sealed.ciphertext,
                message_iv,
                auth_tag: sealed.auth_tag,
                sender_ratchet_key: header.sender_ratchet_key,
                message_number: header.message_number,
                previous_chain_length: header.previous_chain_length,
            },
        ))
    }

    /// Decrypts one message.
    ///
    /// Order: cached skipped keys, the current receiving chain, then the next
    /// chain (DH ratchet step). The returned state is only produced on success.
    ///
    /// # Returns
    /// * `Err(CryptoError::Decryption)` - no header key opens the header, or the header is inconsistent
    /// * `Err(CryptoError::Authentication)` - the body failed its tag check
    pub fn decrypt(&self, message: &EncryptedMessage) -> Result<(RatchetState, Vec<u8>), CryptoError> {
        if let Some(result) = self.decrypt_with_skipped_key(message)? {
            return Ok(result);
        }

        let (mut next, header) = self.advance_to_chain_of(message)?;

        if header.message_number < next.receiving_message_number {
            return Err(CryptoError::Decryption(
                "message already received or its key was discarded".into(),
            ));
        }
        skip_message_keys(&mut next, header.message_number)?;

        let (message_key, next_chain_key) = chain_step(&next.receiving_chain_key)?;
        let plaintext = aead_decrypt(
            &message.encrypted_message,
            &message.auth_tag,
            &message_key,
            &message.message_iv,
            &message.associated_data(),
        )?;
        next.receiving_chain_key = next_chain_key;
        next.receiving_message_number += 1;

        debug!(message_number = header.message_number, "message decrypted");
        Ok((next, plaintext))
    }

    fn decrypt_with_skipped_key(
        &self,
        message: &EncryptedMessage,
    ) -> Result<Option<(RatchetState, Vec<u8>)>, CryptoError> {
        for header_key in skipped_header_keys(self) {
            let Ok(header) =
                MessageHeader::decrypt(&message.encrypted_header, &message.header_iv, &header_key)
            else {
                continue;
            };
            let mut next = self.clone();
            let Some(message_key) = take_skipped_key(&mut next, &header_key, header.message_number)
            else {
                continue;
            };
            check_header(message, &header)?;

            let plaintext = aead_decrypt(
                &message.encrypted_message,
                &message.auth_tag,
                &message_key,
                &message.message_iv,
                &message.associated_data(),
            )?;
            debug!(message_number = header.message_number, "message decrypted from skipped key");
            return Ok(Some((next, plaintext)));
        }
        Ok(None)
    }

    /// Finds the chain the message belongs to and returns a working state
    /// positioned on it, together with the decrypted header.
    fn advance_to_chain_of(
        &self,
        message: &EncryptedMessage,
    ) -> Result<(RatchetState, MessageHeader), CryptoError> {
        if let Some(header) = self.receiving_header_key.and_then(|header_key| {
            MessageHeader::decrypt(&message.encrypted_header, &message.header_iv, &header_key).ok()
        }) {
            check_header(message, &header)?;
            return match self.remote_public_key {
                None => Ok((bootstrap_sending_chain(self, &header.sender_ratchet_key)?, header)),
                Some(_) if needs_ratchet_step(self, &header.sender_ratchet_key) => Err(
                    CryptoError::Decryption("ratchet key does not match the current chain".into()),
                ),
                Some(_) => Ok((self.clone(), header)),
            };
        }

        let header =
            MessageHeader::decrypt(&message.encrypted_header, &message.header_iv, &self.next_header_key)?;
        check_header(message, &header)?;
        if !self.can_send() || !needs_ratchet_step(self, &header.sender_ratchet_key) {
            return Err(CryptoError::Decryption("unexpected new chain".into()));
        }

        let mut current = self.clone();
        if current.receiving_header_key.is_some() {
            skip_message_keys(&mut current, header.previous_chain_length)?;
        }
        Ok((dh_ratchet_step(&current, &header.sender_ratchet_key)?, header))
    }
}

fn check_header(message: &EncryptedMessage, header: &MessageHeader) -> Result<(), CryptoError> {
    if message.matches_header(header) {
        Ok(())
    } else {
        Err(CryptoError::Decryption("header does not match message metadata".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x3dh::generate_key_bundle;

    fn session_pair() -> (RatchetState, RatchetState) {
        let alice = generate_key_bundle().unwrap();
        let bob = generate_key_bundle().unwrap();
        let alice_state = init_sender(&alice, &bob.export_public(2)).unwrap();
        let bob_state = init_receiver_from_bundle(&bob, &alice.export_public(1)).unwrap();
        (alice_state, bob_state)
    }

    #[test]
    fn test_first_message_roundtrip() {
        let (alice, bob) = session_pair();

        let (alice, message) = alice.encrypt(b"hello bob").unwrap();
        let (bob, plaintext) = bob.decrypt(&message).unwrap();

        assert_eq!(plaintext, b"hello bob");
        assert_eq!(alice.sending_message_number, 1);
        assert_eq!(bob.receiving_message_number, 1);
        assert!(bob.can_send());
    }

    #[test]
    fn test_init_sender_seeds_from_handshake() {
        let alice = generate_key_bundle().unwrap();
        let bob = generate_key_bundle().unwrap();
        let peer = bob.export_public(2);

        let state = init_sender(&alice, &peer).unwrap();
        let master = crate::x3dh::x3dh_initiate(&alice, &peer).unwrap();
        assert_eq!(state.root_key, master.root_key());
        assert_eq!(state.sending_chain_key, master.chain_key());
        assert_eq!(state.remote_public_key, Some(bob.signed_pre_key.public_key));

        let mut forged = peer.clone();
        forged.signed_pre_key = forged.ephemeral_key.clone();
        assert!(matches!(
            init_sender(&alice, &forged),
            Err(CryptoError::SignatureVerification)
        ));
    }

    #[test]
    fn test_receiver_cannot_send_first() {
        let (_, bob) = session_pair();
        assert!(matches!(bob.encrypt(b"too early"), Err(CryptoError::InvalidState(_))));
    }

    #[test]
    fn test_reply_triggers_dh_step() {
        let (alice, bob) = session_pair();
        let (alice, m1) = alice.encrypt(b"one").unwrap();
        let (alice, m2) = alice.encrypt(b"two").unwrap();
        let (bob, _) = bob.decrypt(&m1).unwrap();
        let (bob, _) = bob.decrypt(&m2).unwrap();

        let (bob, reply) = bob.encrypt(b"hi alice").unwrap();
        let root_before = alice.root_key;
        let (alice, plaintext) = alice.decrypt(&reply).unwrap();

        assert_eq!(plaintext, b"hi alice");
        assert_ne!(alice.root_key, root_before);
        assert_eq!(alice.sending_message_number, 0);
        assert_eq!(alice.receiving_message_number, 1);
        assert_eq!(alice.previous_chain_length, 2);

        let (_, back) = alice.encrypt(b"and back").unwrap();
        assert_eq!(back.previous_chain_length, 2);
        let (_, plaintext) = bob.decrypt(&back).unwrap();
        assert_eq!(plaintext, b"and back");
    }

    #[test]
    fn test_header_is_authoritative() {
        let (alice, bob) = session_pair();
        let (_, mut message) = alice.encrypt(b"x").unwrap();
        message.message_number = 5;

        assert!(matches!(bob.decrypt(&message), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_replay_is_rejected() {
        let (alice, bob) = session_pair();
        let (_, message) = alice.encrypt(b"once").unwrap();
        let (bob, _) = bob.decrypt(&message).unwrap();

        assert!(matches!(bob.decrypt(&message), Err(CryptoError::Decryption(_))));
    }

    #[test]
    fn test_failed_decrypt_leaves_state_untouched() {
        let (alice, bob) = session_pair();
        let (_, mut message) = alice.encrypt(b"x").unwrap();
        message.auth_tag[0] ^= 1;
        let before = bob.clone();

        assert!(matches!(bob.decrypt(&message), Err(CryptoError::Authentication)));
        assert_eq!(bob, before);
    }

    #[test]
    fn test_message_json_is_base64() {
        let (alice, _) = session_pair();
        let (_, message) = alice.encrypt(b"x").unwrap();
        let json = serde_json::to_value(&message).unwrap();

        assert!(json["encrypted_header"].is_string());
        assert_eq!(json["auth_tag"].as_str().unwrap().len(), 24);
        let back: EncryptedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }
}
