/// Ratchet State
///
/// An immutable value: every transition in this module tree takes `&RatchetState`
/// and returns a new one. Callers persist the returned state and drop the old.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{b64_decode_array, b64_encode, CryptoError, KeyPair, KEY_LEN};

/// A cached message key for a message that has not arrived yet.
#[derive(Clone, PartialEq, Eq)]
pub struct SkippedMessageKey {
    pub header_key: [u8; KEY_LEN],
    pub message_number: u32,
    pub message_key: [u8; KEY_LEN],
    /// Insertion order, used to evict the oldest entry first.
    pub sequence: u64,
}

impl Drop for SkippedMessageKey {
    fn drop(&mut self) {
        self.message_key.zeroize();
    }
}

impl std::fmt::Debug for SkippedMessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedMessageKey")
            .field("message_number", &self.message_number)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

/// Cache id of a skipped key: `"{base64(header_key)}:{message_number}"`.
pub fn skipped_key_id(header_key: &[u8; KEY_LEN], message_number: u32) -> String {
    format!("{}:{}", b64_encode(header_key), message_number)
}

#[derive(Clone, PartialEq, Eq)]
pub struct RatchetState {
    pub root_key: [u8; KEY_LEN],
    pub sending_chain_key: [u8; KEY_LEN],
    pub sending_message_number: u32,
    pub receiving_chain_key: [u8; KEY_LEN],
    pub receiving_message_number: u32,
    /// Length of the previous sending chain, announced in every header.
    pub previous_chain_length: u32,
    pub dh_ratchet_key_pair: KeyPair,
    /// Peer ratchet key. `None` until a receiver-side session gets its first message.
    pub remote_public_key: Option<[u8; KEY_LEN]>,
    /// Key for encrypting our own headers.
    pub header_key: [u8; KEY_LEN],
    /// Key of the peer's current sending chain.
    pub receiving_header_key: Option<[u8; KEY_LEN]>,
    /// Key the peer's next sending chain will use.
    pub next_header_key: [u8; KEY_LEN],
    pub skipped_message_keys: BTreeMap<String, SkippedMessageKey>,
}

impl RatchetState {
    /// The sending chain exists once the peer's ratchet key is known.
    pub fn can_send(&self) -> bool {
        self.remote_public_key.is_some()
    }
}

impl Drop for RatchetState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.sending_chain_key.zeroize();
        self.receiving_chain_key.zeroize();
        self.header_key.zeroize();
        self.next_header_key.zeroize();
        if let Some(key) = self.receiving_header_key.as_mut() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for RatchetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetState")
            .field("sending_message_number", &self.sending_message_number)
            .field("receiving_message_number", &self.receiving_message_number)
            .field("previous_chain_length", &self.previous_chain_length)
            .field("dh_ratchet_key_pair", &self.dh_ratchet_key_pair)
            .field("remote_public_key", &self.remote_public_key.map(|k| b64_encode(&k)))
            .field("skipped_message_keys", &self.skipped_message_keys.len())
            .finish_non_exhaustive()
    }
}

/// Serializable Ratchet State, every key as Base64
#[derive(Clone, Serialize, Deserialize)]
pub struct RatchetStateSnapshot {
    pub root_key: String,
    pub sending_chain_key: String,
    pub sending_message_number: u32,
    pub receiving_chain_key: String,
    pub receiving_message_number: u32,
    pub previous_chain_length: u32,
    pub dh_public_key: String,
    pub dh_private_key: String,
    pub remote_public_key: Option<String>,
    pub header_key: String,
    pub receiving_header_key: Option<String>,
    pub next_header_key: String,
    #[serde(default)]
    pub skipped_message_keys: BTreeMap<String, SkippedMessageKeySnapshot>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SkippedMessageKeySnapshot {
    pub header_key: String,
    pub message_number: u32,
    pub message_key: String,
    pub sequence: u64,
}

impl RatchetState {
    /// Snapshot for storage, every key Base64-encoded.
    pub fn to_snapshot(&self) -> RatchetStateSnapshot {
        RatchetStateSnapshot {
            root_key: b64_encode(&self.root_key),
            sending_chain_key: b64_encode(&self.sending_chain_key),
            sending_message_number: self.sending_message_number,
            receiving_chain_key: b64_encode(&self.receiving_chain_key),
            receiving_message_number: self.receiving_message_number,
            previous_chain_length: self.previous_chain_length,
            dh_public_key: b64_encode(&self.dh_ratchet_key_pair.public_key),
            dh_private_key: b64_encode(&self.dh_ratchet_key_pair.private_key),
            remote_public_key: self.remote_public_key.map(|k| b64_encode(&k)),
            header_key: b64_encode(&self.header_key),
            receiving_header_key: self.receiving_header_key.map(|k| b64_encode(&k)),
            next_header_key: b64_encode(&self.next_header_key),
            skipped_message_keys: self
                .skipped_message_keys
                .iter()
                .map(|(id, skipped)| {
                    (
                        id.clone(),
                        SkippedMessageKeySnapshot {
                            header_key: b64_encode(&skipped.header_key),
                            message_number: skipped.message_number,
                            message_key: b64_encode(&skipped.message_key),
                            sequence: skipped.sequence,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Restores a state from its snapshot. Any malformed key is an error.
    pub fn from_snapshot(snapshot: &RatchetStateSnapshot) -> Result<Self, CryptoError> {
        let mut skipped_message_keys = BTreeMap::new();
        for (id, skipped) in &snapshot.skipped_message_keys {
            skipped_message_keys.insert(
                id.clone(),
                SkippedMessageKey {
                    header_key: b64_decode_array(&skipped.header_key)?,
                    message_number: skipped.message_number,
                    message_key: b64_decode_array(&skipped.message_key)?,
                    sequence: skipped.sequence,
                },
            );
        }

        Ok(Self {
            root_key: b64_decode_array(&snapshot.root_key)?,
            sending_chain_key: b64_decode_array(&snapshot.sending_chain_key)?,
            sending_message_number: snapshot.sending_message_number,
            receiving_chain_key: b64_decode_array(&snapshot.receiving_chain_key)?,
            receiving_message_number: snapshot.receiving_message_number,
            previous_chain_length: snapshot.previous_chain_length,
            dh_ratchet_key_pair: KeyPair {
                private_key: b64_decode_array(&snapshot.dh_private_key)?,
                public_key: b64_decode_array(&snapshot.dh_public_key)?,
            },
            remote_public_key: snapshot
                .remote_public_key
                .as_deref()
                .map(b64_decode_array::<KEY_LEN>)
                .transpose()?,
            header_key: b64_decode_array(&snapshot.header_key)?,
            receiving_header_key: snapshot
                .receiving_header_key
                .as_deref()
                .map(b64_decode_array::<KEY_LEN>)
                .transpose()?,
            next_header_key: b64_decode_array(&snapshot.next_header_key)?,
            skipped_message_keys,
        })
    }
}

/// Serializes a state to JSON. The output contains private key material and
/// must be sealed before it leaves the process.
pub fn serialize_state(state: &RatchetState) -> Result<String, CryptoError> {
    Ok(serde_json::to_string(&state.to_snapshot())?)
}

pub fn deserialize_state(blob: &str) -> Result<RatchetState, CryptoError> {
    let snapshot: RatchetStateSnapshot = serde_json::from_str(blob)?;
    RatchetState::from_snapshot(&snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> RatchetState {
        let mut skipped_message_keys = BTreeMap::new();
        skipped_message_keys.insert(
            skipped_key_id(&[8u8; 32], 4),
            SkippedMessageKey {
                header_key: [8u8; 32],
                message_number: 4,
                message_key: [9u8; 32],
                sequence: 11,
            },
        );
        RatchetState {
            root_key: [1u8; 32],
            sending_chain_key: [2u8; 32],
            sending_message_number: 3,
            receiving_chain_key: [4u8; 32],
            receiving_message_number: 5,
            previous_chain_length: 6,
            dh_ratchet_key_pair: KeyPair { private_key: [7u8; 32], public_key: [10u8; 32] },
            remote_public_key: Some([12u8; 32]),
            header_key: [13u8; 32],
            receiving_header_key: None,
            next_header_key: [14u8; 32],
            skipped_message_keys,
        }
    }

    #[test]
    fn test_state_roundtrip_keeps_every_field() {
        let state = sample_state();
        let restored = deserialize_state(&serialize_state(&state).unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.skipped_message_keys.len(), 1);
    }

    #[test]
    fn test_deserialize_rejects_short_key() {
        let mut snapshot = sample_state().to_snapshot();
        snapshot.root_key = b64_encode(&[1u8; 16]);
        let blob = serde_json::to_string(&snapshot).unwrap();

        assert!(matches!(deserialize_state(&blob), Err(CryptoError::InvalidKeyLen(_))));
    }

    #[test]
    fn test_debug_does_not_leak_keys() {
        let state = sample_state();
        let printed = format!("{state:?}");
        assert!(!printed.contains(&b64_encode(&state.root_key)));
        assert!(!printed.contains(&b64_encode(&state.dh_ratchet_key_pair.private_key)));
    }

    #[test]
    fn test_skipped_key_id_format() {
        let id = skipped_key_id(&[0u8; 32], 17);
        assert!(id.ends_with(":17"));
        assert!(id.starts_with("AAAA"));
    }
}
