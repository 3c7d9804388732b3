/// DH Ratchet for Double Ratchet Protocol
///
/// A DH ratchet step runs when a header arrives under the next header key,
/// i.e. the peer has started a new sending chain with a new ratchet key.
/// It derives the matching receiving chain, then a fresh local key pair and
/// the new sending chain.

use tracing::debug;

use super::chain::{derive_next_header_key, kdf_root};
use super::state::RatchetState;
use crate::crypto::{diffie_hellman, generate_agreement_key_pair, keys_equal, CryptoError, KEY_LEN};

/// Checks whether `remote_key` differs from the ratchet key already known.
pub fn needs_ratchet_step(state: &RatchetState, remote_key: &[u8; KEY_LEN]) -> bool {
    match &state.remote_public_key {
        None => true,
        Some(current) => !keys_equal(current, remote_key),
    }
}

/// Full DH ratchet step.
///
/// ```text
/// (Root', RecvCK)  = KDF(Root,  DH(own, remote))
/// new own key pair
/// (Root'', SendCK) = KDF(Root', DH(new, remote))
/// ```
///
/// Counters reset to 0 and the previous sending chain length is kept for
/// the next outgoing header. Header keys shift by one chain.
pub fn dh_ratchet_step(
    state: &RatchetState,
    remote_key: &[u8; KEY_LEN],
) -> Result<RatchetState, CryptoError> {
    let mut next = state.clone();

    next.previous_chain_length = state.sending_message_number;
    next.sending_message_number = 0;
    next.receiving_message_number = 0;
    next.remote_public_key = Some(*remote_key);
    next.receiving_header_key = Some(state.next_header_key);

    let dh_receive = diffie_hellman(&state.dh_ratchet_key_pair.private_key, remote_key)?;
    let (root_key, receiving_chain_key) = kdf_root(&state.root_key, &dh_receive)?;
    next.receiving_chain_key = receiving_chain_key;
    next.header_key = derive_next_header_key(&root_key)?;

    next.dh_ratchet_key_pair = generate_agreement_key_pair()?;
    let dh_send = diffie_hellman(&next.dh_ratchet_key_pair.private_key, remote_key)?;
    let (root_key, sending_chain_key) = kdf_root(&root_key, &dh_send)?;
    next.root_key = root_key;
    next.sending_chain_key = sending_chain_key;
    next.next_header_key = derive_next_header_key(&root_key)?;

    debug!(previous_chain_length = next.previous_chain_length, "dh ratchet step");
    Ok(next)
}

/// First message on a receiver-initialized session.
///
/// The receiving chain is the one from the handshake, so only the sending
/// half of a step runs: adopt the sender's ratchet key and derive the first
/// sending chain from a fresh local key pair.
pub fn bootstrap_sending_chain(
    state: &RatchetState,
    remote_key: &[u8; KEY_LEN],
) -> Result<RatchetState, CryptoError> {
    if state.remote_public_key.is_some() {
        return Err(CryptoError::InvalidState("sending chain already established".into()));
    }
    let mut next = state.clone();

    next.remote_public_key = Some(*remote_key);
    next.header_key = derive_next_header_key(&state.root_key)?;

    next.dh_ratchet_key_pair = generate_agreement_key_pair()?;
    let dh_send = diffie_hellman(&next.dh_ratchet_key_pair.private_key, remote_key)?;
    let (root_key, sending_chain_key) = kdf_root(&state.root_key, &dh_send)?;
    next.root_key = root_key;
    next.sending_chain_key = sending_chain_key;
    next.sending_message_number = 0;
    next.next_header_key = derive_next_header_key(&root_key)?;

    debug!("sending chain bootstrapped from first received message");
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use std::collections::BTreeMap;

    fn state_with(key_pair: KeyPair, remote: Option<[u8; 32]>) -> RatchetState {
        RatchetState {
            root_key: [42u8; 32],
            sending_chain_key: [1u8; 32],
            sending_message_number: 4,
            receiving_chain_key: [2u8; 32],
            receiving_message_number: 9,
            previous_chain_length: 0,
            dh_ratchet_key_pair: key_pair,
            remote_public_key: remote,
            header_key: [3u8; 32],
            receiving_header_key: Some([4u8; 32]),
            next_header_key: [5u8; 32],
            skipped_message_keys: BTreeMap::new(),
        }
    }

    #[test]
    fn test_step_resets_counters_and_changes_root() {
        let local = generate_agreement_key_pair().unwrap();
        let remote = generate_agreement_key_pair().unwrap();
        let state = state_with(local, Some([7u8; 32]));

        let next = dh_ratchet_step(&state, &remote.public_key).unwrap();

        assert_eq!(next.sending_message_number, 0);
        assert_eq!(next.receiving_message_number, 0);
        assert_eq!(next.previous_chain_length, 4);
        assert_ne!(next.root_key, state.root_key);
        assert_ne!(next.dh_ratchet_key_pair, state.dh_ratchet_key_pair);
        assert_eq!(next.receiving_header_key, Some(state.next_header_key));
        assert_eq!(next.remote_public_key, Some(remote.public_key));
        // input untouched
        assert_eq!(state.sending_message_number, 4);
    }

    #[test]
    fn test_both_sides_derive_matching_chains() {
        let alice_key = generate_agreement_key_pair().unwrap();
        let bob_key = generate_agreement_key_pair().unwrap();
        let bob = state_with(bob_key.clone(), Some([7u8; 32]));

        // Bob takes a step on Alice's key and starts a new sending chain
        let bob_next = dh_ratchet_step(&bob, &alice_key.public_key).unwrap();

        // Alice sits at the root Bob reached after his receive half
        let dh = diffie_hellman(&bob_key.private_key, &alice_key.public_key).unwrap();
        let (shared_root, _) = kdf_root(&bob.root_key, &dh).unwrap();
        let mut alice = state_with(alice_key, Some(bob_key.public_key));
        alice.root_key = shared_root;
        alice.next_header_key = bob_next.header_key;

        let alice_next =
            dh_ratchet_step(&alice, &bob_next.dh_ratchet_key_pair.public_key).unwrap();

        assert_eq!(alice_next.receiving_chain_key, bob_next.sending_chain_key);
        assert_eq!(alice_next.receiving_header_key, Some(bob_next.header_key));
        assert_eq!(alice_next.header_key, bob_next.next_header_key);
    }

    #[test]
    fn test_bootstrap_only_once() {
        let local = generate_agreement_key_pair().unwrap();
        let remote = generate_agreement_key_pair().unwrap();
        let mut state = state_with(local, None);
        state.sending_message_number = 0;

        let next = bootstrap_sending_chain(&state, &remote.public_key).unwrap();
        assert_eq!(next.receiving_chain_key, state.receiving_chain_key);
        assert_eq!(next.receiving_message_number, state.receiving_message_number);
        assert_ne!(next.root_key, state.root_key);
        assert!(next.can_send());

        assert!(matches!(
            bootstrap_sending_chain(&next, &remote.public_key),
            Err(CryptoError::InvalidState(_))
        ));
    }

    #[test]
    fn test_needs_ratchet_step() {
        let local = generate_agreement_key_pair().unwrap();
        let state = state_with(local.clone(), Some([7u8; 32]));

        assert!(!needs_ratchet_step(&state, &[7u8; 32]));
        assert!(needs_ratchet_step(&state, &[8u8; 32]));
        assert!(needs_ratchet_step(&state_with(local, None), &[7u8; 32]));
    }
}
