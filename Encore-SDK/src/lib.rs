pub mod crypto;
pub mod ratchet;
pub mod x3dh;

// Re-export of the main types for convenience
pub use crypto::{
    aead_decrypt, aead_encrypt, cbc_decrypt, cbc_encrypt, derive_key, diffie_hellman,
    generate_agreement_key_pair, generate_signing_key_pair, keys_equal, sign,
    unwrap_with_passphrase, verify_signature, wrap_with_passphrase,
};

pub use crypto::types::{AeadCiphertext, Argon2Config, CryptoError, KeyPair};

pub use ratchet::{
    deserialize_state, init_receiver, init_receiver_from_bundle, init_sender, serialize_state,
    EncryptedMessage, RatchetState,
};

pub use x3dh::{
    export_public_bundle, generate_key_bundle, KeyBundle, MasterSecret, PublicKeyBundle,
    SealedKeyBundle,
};
