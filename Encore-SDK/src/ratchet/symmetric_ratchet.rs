/// Symmetric Ratchet: skipped message keys
///
/// When a message arrives ahead of its predecessors, the receiving chain is
/// walked forward and the keys of the missing messages are cached, indexed by
/// the header key of their chain and their message number.

use tracing::debug;

use super::chain::chain_step;
use super::state::{skipped_key_id, RatchetState, SkippedMessageKey};
use crate::crypto::{CryptoError, KEY_LEN};

/// Maximum number of keys a single message may skip over.
pub const MAX_SKIP: u32 = 1000;

/// Maximum number of skipped keys kept in a state across all chains.
pub const MAX_SKIPPED_KEYS: usize = 1000;

/// Advances the receiving chain of `state` up to `until`, caching every
/// message key on the way under the current receiving header key.
///
/// Does nothing when `until` is not ahead of the chain.
pub(crate) fn skip_message_keys(state: &mut RatchetState, until: u32) -> Result<(), CryptoError> {
    if until <= state.receiving_message_number {
        return Ok(());
    }
    let requested = until - state.receiving_message_number;
    if requested > MAX_SKIP {
        return Err(CryptoError::TooManySkipped { max: MAX_SKIP, requested });
    }
    let Some(header_key) = state.receiving_header_key else {
        return Err(CryptoError::InvalidState("no receiving chain to skip".into()));
    };

    let mut sequence = next_sequence(state);
    while state.receiving_message_number < until {
        let (message_key, next_chain_key) = chain_step(&state.receiving_chain_key)?;
        state.skipped_message_keys.insert(
            skipped_key_id(&header_key, state.receiving_message_number),
            SkippedMessageKey {
                header_key,
                message_number: state.receiving_message_number,
                message_key,
                sequence,
            },
        );
        state.receiving_chain_key = next_chain_key;
        state.receiving_message_number += 1;
        sequence += 1;
    }
    evict_oldest(state);

    debug!(
        skipped = requested,
        cached = state.skipped_message_keys.len(),
        "cached skipped message keys"
    );
    Ok(())
}

/// Removes and returns the cached key for `(header_key, message_number)`.
pub(crate) fn take_skipped_key(
    state: &mut RatchetState,
    header_key: &[u8; KEY_LEN],
    message_number: u32,
) -> Option<[u8; KEY_LEN]> {
    state
        .skipped_message_keys
        .remove(&skipped_key_id(header_key, message_number))
        .map(|skipped| skipped.message_key)
}

/// Distinct header keys that have cached message keys, oldest first.
pub(crate) fn skipped_header_keys(state: &RatchetState) -> Vec<[u8; KEY_LEN]> {
    let mut entries: Vec<&SkippedMessageKey> = state.skipped_message_keys.values().collect();
    entries.sort_by_key(|skipped| skipped.sequence);

    let mut header_keys: Vec<[u8; KEY_LEN]> = Vec::new();
    for skipped in entries {
        if !header_keys.contains(&skipped.header_key) {
            header_keys.push(skipped.header_key);
        }
    }
    header_keys
}

fn next_sequence(state: &RatchetState) -> u64 {
    state
        .skipped_message_keys
        .values()
        .map(|skipped| skipped.sequence + 1)
        .max()
        .unwrap_or(0)
}

fn evict_oldest(state: &mut RatchetState) {
    let overflow = state.skipped_message_keys.len().saturating_sub(MAX_SKIPPED_KEYS);
    if overflow == 0 {
        return;
    }
    let mut by_age: Vec<(u64, String)> = state
        .skipped_message_keys
        .iter()
        .map(|(id, skipped)| (skipped.sequence, id.clone()))
        .collect();
    by_age.sort();
    for (_, id) in by_age.into_iter().take(overflow) {
        state.skipped_message_keys.remove(&id);
    }
    debug!(evicted = overflow, "evicted oldest skipped message keys");
}
