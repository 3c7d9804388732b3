/// Chain and Root Key derivation for the Double Ratchet
///
/// Every derivation is HKDF-SHA256 with its own info label:
///
/// ```text
/// MessageKey   = HKDF(ChainKey, info = "message")
/// NextChainKey = HKDF(ChainKey, info = "chain")
/// (Root', CK)  = HKDF(DH, salt = Root, info = "ratchet")
/// HeaderKey    = HKDF(Root, info = "header" | "next")
/// ```

use crate::crypto::{derive_key, derive_key_32, CryptoError, KEY_LEN};
use zeroize::Zeroizing;

pub const MESSAGE_KEY_INFO: &[u8] = b"message";
pub const CHAIN_KEY_INFO: &[u8] = b"chain";
pub const HEADER_KEY_INFO: &[u8] = b"header";
pub const NEXT_HEADER_KEY_INFO: &[u8] = b"next";
pub const ROOT_KEY_INFO: &[u8] = b"ratchet";

/// Message Key for exactly one message.
pub fn derive_message_key(chain_key: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    derive_key_32(chain_key, None, MESSAGE_KEY_INFO)
}

/// Next Chain Key. One-way: the previous chain key cannot be recovered from it.
pub fn derive_next_chain_key(chain_key: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    derive_key_32(chain_key, None, CHAIN_KEY_INFO)
}

/// ChainKey → (MessageKey, NextChainKey)
pub fn chain_step(
    chain_key: &[u8; KEY_LEN],
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), CryptoError> {
    Ok((derive_message_key(chain_key)?, derive_next_chain_key(chain_key)?))
}

/// KDF: Root Key + DH Output → New Root Key + Chain Key
pub fn kdf_root(
    root_key: &[u8; KEY_LEN],
    dh_output: &[u8; KEY_LEN],
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), CryptoError> {
    let okm = Zeroizing::new(derive_key(dh_output, Some(root_key), ROOT_KEY_INFO, KEY_LEN * 2)?);
    let mut new_root = [0u8; KEY_LEN];
    let mut chain_key = [0u8; KEY_LEN];
    new_root.copy_from_slice(&okm[..KEY_LEN]);
    chain_key.copy_from_slice(&okm[KEY_LEN..]);
    Ok((new_root, chain_key))
}

/// Header key of the first chain, derived from the handshake root.
pub fn derive_header_key(root_key: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    derive_key_32(root_key, None, HEADER_KEY_INFO)
}

/// Header key of the chain that a given root key will seed next.
pub fn derive_next_header_key(root_key: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN], CryptoError> {
    derive_key_32(root_key, None, NEXT_HEADER_KEY_INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_step_separates_message_and_chain_keys() {
        for seed in [0u8, 1, 42, 255] {
            let chain_key = [seed; 32];
            let (message_key, next) = chain_step(&chain_key).unwrap();

            assert_ne!(message_key, next);
            assert_ne!(next, chain_key);
        }
    }

    #[test]
    fn test_chain_keys_never_repeat() {
        let mut chain_key = [1u8; 32];
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let (message_key, next) = chain_step(&chain_key).unwrap();
            assert!(seen.insert(message_key));
            assert!(seen.insert(next));
            chain_key = next;
        }
    }

    #[test]
    fn test_root_key_kdf() {
        let root_key = [1u8; 32];
        let (new_root, chain_key) = kdf_root(&root_key, &[2u8; 32]).unwrap();

        assert_ne!(root_key, new_root);
        assert_ne!(new_root, chain_key);
        assert_ne!(kdf_root(&root_key, &[3u8; 32]).unwrap().0, new_root);
    }

    #[test]
    fn test_all_labels_are_distinct() {
        let labels = [
            MESSAGE_KEY_INFO,
            CHAIN_KEY_INFO,
            HEADER_KEY_INFO,
            NEXT_HEADER_KEY_INFO,
            ROOT_KEY_INFO,
        ];
        let ikm = [9u8; 32];
        let outputs: std::collections::HashSet<_> = labels
            .iter()
            .map(|info| derive_key_32(&ikm, None, info).unwrap())
            .collect();
        assert_eq!(outputs.len(), labels.len());
        assert_ne!(derive_header_key(&ikm).unwrap(), derive_next_header_key(&ikm).unwrap());
    }
}
