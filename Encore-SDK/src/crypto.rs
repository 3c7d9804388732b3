use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

#[path = "mod.rs"]
pub mod types;
pub use types::{
    AeadCiphertext, Argon2Config, CryptoError, KeyPair, IV_LEN, KEY_LEN, SALT_LEN,
    SIGNATURE_LEN, TAG_LEN,
};

/// AES-256-GCM with the 16-byte IV used throughout the protocol.
type Aes256Gcm16 = AesGcm<Aes256, U16>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Separator between the parts of a passphrase-wrapped blob.
const WRAP_SEPARATOR: char = '|';

// Helpers for base64
pub fn b64_encode(data: &[u8]) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>, CryptoError> {
    Ok(general_purpose::STANDARD.decode(s)?)
}

/// Decodes base64 into a fixed-size array, rejecting any other length.
pub fn b64_decode_array<const N: usize>(s: &str) -> Result<[u8; N], CryptoError> {
    let bytes = b64_decode(s)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLen(format!("expected {N} bytes, got {len}")))
}

pub fn random_bytes<const N: usize>() -> Result<[u8; N], CryptoError> {
    let mut out = [0u8; N];
    getrandom::getrandom(&mut out).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(out)
}

pub fn generate_iv() -> Result<[u8; IV_LEN], CryptoError> {
    random_bytes()
}

/// Generates an Ed25519 key pair (32-byte seed, 32-byte verifying key).
pub fn generate_signing_key_pair() -> Result<KeyPair, CryptoError> {
    let seed = Zeroizing::new(random_bytes::<KEY_LEN>()?);
    Ok(KeyPair {
        public_key: signing_public_key(&seed),
        private_key: *seed,
    })
}

/// Generates an X25519 key pair for ECDH.
pub fn generate_agreement_key_pair() -> Result<KeyPair, CryptoError> {
    let sk_bytes = Zeroizing::new(random_bytes::<KEY_LEN>()?);
    Ok(KeyPair {
        public_key: agreement_public_key(&sk_bytes),
        private_key: *sk_bytes,
    })
}

pub fn signing_public_key(private_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    SigningKey::from_bytes(private_key).verifying_key().to_bytes()
}

pub fn agreement_public_key(private_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let sk = StaticSecret::from(*private_key);
    X25519PublicKey::from(&sk).to_bytes()
}

/// X25519 agreement. Rejects low-order peer keys (all-zero shared secret).
pub fn diffie_hellman(
    private_key: &[u8; KEY_LEN],
    public_key: &[u8; KEY_LEN],
) -> Result<[u8; KEY_LEN], CryptoError> {
    let sk = StaticSecret::from(*private_key);
    let shared = sk.diffie_hellman(&X25519PublicKey::from(*public_key));
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("non-contributory X25519 public key".into()));
    }
    Ok(shared.to_bytes())
}

pub fn sign(private_key: &[u8; KEY_LEN], message: &[u8]) -> [u8; SIGNATURE_LEN] {
    SigningKey::from_bytes(private_key).sign(message).to_bytes()
}

pub fn verify_signature(
    public_key: &[u8; KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<(), CryptoError> {
    let vk = VerifyingKey::from_bytes(public_key)
        .map_err(|_| CryptoError::SignatureVerification)?;
    vk.verify_strict(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::SignatureVerification)
}

/// HKDF-SHA256. `salt = None` means the RFC 5869 default (hash-length zeros).
pub fn derive_key(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
    output_length: usize,
) -> Result<Vec<u8>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut okm = vec![0u8; output_length];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(okm)
}

/// `derive_key` with a fixed 32-byte output.
pub fn derive_key_32(
    input_key_material: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<[u8; KEY_LEN], CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, input_key_material);
    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::Kdf(e.to_string()))?;
    Ok(okm)
}

/// AES-256-GCM encryption, tag returned separately from the ciphertext.
pub fn aead_encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    aad: &[u8],
) -> Result<AeadCiphertext, CryptoError> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLen("aead key".into()))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(iv), aad, &mut buffer)
        .map_err(|_| CryptoError::Authentication)?;
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(&tag);
    Ok(AeadCiphertext { ciphertext: buffer, auth_tag })
}

/// AES-256-GCM decryption. Fails closed: any tag mismatch yields
/// `CryptoError::Authentication` and the working buffer is dropped.
pub fn aead_decrypt(
    ciphertext: &[u8],
    auth_tag: &[u8; TAG_LEN],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm16::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLen("aead key".into()))?;
    let mut buffer = Zeroizing::new(ciphertext.to_vec());
    cipher
        .decrypt_in_place_detached(
            Nonce::<U16>::from_slice(iv),
            aad,
            &mut buffer,
            Tag::from_slice(auth_tag),
        )
        .map_err(|_| CryptoError::Authentication)?;
    Ok(buffer.to_vec())
}

/// AES-256-CBC with PKCS#7 padding. Confidentiality only.
pub fn cbc_encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLen("cbc key/iv".into()))?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn cbc_decrypt(
    ciphertext: &[u8],
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let dec = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| CryptoError::InvalidKeyLen("cbc key/iv".into()))?;
    dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::Decryption("bad padding".into()))
}

/// Constant-time byte comparison. Different lengths compare unequal.
pub fn keys_equal(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Derives a 32-byte wrapping key from a passphrase with Argon2id.
pub fn derive_key_from_passphrase(
    passphrase: &str,
    salt: &[u8],
    config: &Argon2Config,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let params = Params::new(
        config.memory_kib,
        config.iterations,
        config.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| CryptoError::Argon2(e.to_string()))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut())
        .map_err(|e| CryptoError::Argon2(e.to_string()))?;
    Ok(key)
}

/// Wraps `data` under a passphrase: `base64(salt)|base64(iv)|base64(ciphertext||tag)`.
pub fn wrap_with_passphrase(
    data: &[u8],
    passphrase: &str,
    config: &Argon2Config,
) -> Result<String, CryptoError> {
    let salt = random_bytes::<SALT_LEN>()?;
    let iv = generate_iv()?;
    let key = derive_key_from_passphrase(passphrase, &salt, config)?;
    let sealed = aead_encrypt(data, &key, &iv, &salt)?;
    let mut body = sealed.ciphertext;
    body.extend_from_slice(&sealed.auth_tag);
    Ok(format!(
        "{}{sep}{}{sep}{}",
        b64_encode(&salt),
        b64_encode(&iv),
        b64_encode(&body),
        sep = WRAP_SEPARATOR
    ))
}

/// Reverses `wrap_with_passphrase`. A wrong passphrase is reported as
/// `CryptoError::IncorrectPassword` and never yields bytes.
pub fn unwrap_with_passphrase(
    blob: &str,
    passphrase: &str,
    config: &Argon2Config,
) -> Result<Vec<u8>, CryptoError> {
    let mut parts = blob.split(WRAP_SEPARATOR);
    let (Some(salt), Some(iv), Some(body), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CryptoError::Decryption("malformed wrapped blob".into()));
    };
    let salt = b64_decode_array::<SALT_LEN>(salt)?;
    let iv = b64_decode_array::<IV_LEN>(iv)?;
    let body = b64_decode(body)?;
    if body.len() < TAG_LEN {
        return Err(CryptoError::Decryption("wrapped blob too short".into()));
    }
    let (ciphertext, tag) = body.split_at(body.len() - TAG_LEN);
    let mut auth_tag = [0u8; TAG_LEN];
    auth_tag.copy_from_slice(tag);

    let key = derive_key_from_passphrase(passphrase, &salt, config)?;
    aead_decrypt(ciphertext, &auth_tag, &key, &iv, &salt).map_err(|e| match e {
        CryptoError::Authentication => CryptoError::IncorrectPassword,
        other => other,
    })
}

/// Serde adapters: raw bytes inside, base64 strings on the wire.
pub mod b64_serde {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub mod bytes {
        use super::*;

        pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
            s.serialize_str(&crate::crypto::b64_encode(bytes))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
            let s = String::deserialize(d)?;
            crate::crypto::b64_decode(&s).map_err(D::Error::custom)
        }
    }

    pub mod array {
        use super::*;

        pub fn serialize<S: Serializer, const N: usize>(
            bytes: &[u8; N],
            s: S,
        ) -> Result<S::Ok, S::Error> {
            s.serialize_str(&crate::crypto::b64_encode(bytes))
        }

        pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
            d: D,
        ) -> Result<[u8; N], D::Error> {
            let s = String::deserialize(d)?;
            crate::crypto::b64_decode_array::<N>(&s).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn cheap_argon2() -> Argon2Config {
        Argon2Config { memory_kib: 256, iterations: 1, parallelism: 1 }
    }

    #[test]
    fn test_generated_public_keys_match_private_keys() {
        let signing = generate_signing_key_pair().unwrap();
        assert_eq!(signing.public_key, signing_public_key(&signing.private_key));

        let agreement = generate_agreement_key_pair().unwrap();
        assert_eq!(agreement.public_key, agreement_public_key(&agreement.private_key));
        assert_ne!(signing.private_key, agreement.private_key);
    }

    #[test]
    fn test_diffie_hellman_agrees() {
        let a = generate_agreement_key_pair().unwrap();
        let b = generate_agreement_key_pair().unwrap();
        let ab = diffie_hellman(&a.private_key, &b.public_key).unwrap();
        let ba = diffie_hellman(&b.private_key, &a.public_key).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_diffie_hellman_rejects_low_order_key() {
        let a = generate_agreement_key_pair().unwrap();
        let result = diffie_hellman(&a.private_key, &[0u8; KEY_LEN]);
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = generate_signing_key_pair().unwrap();
        let sig = sign(&kp.private_key, b"pre-key");
        assert!(verify_signature(&kp.public_key, b"pre-key", &sig).is_ok());

        let mut bad = sig;
        bad[0] ^= 0x01;
        assert!(matches!(
            verify_signature(&kp.public_key, b"pre-key", &bad),
            Err(CryptoError::SignatureVerification)
        ));
        assert!(verify_signature(&kp.public_key, b"other", &sig).is_err());
    }

    #[test]
    fn test_derive_key_is_deterministic_and_label_separated() {
        let ikm = [7u8; 32];
        let a = derive_key(&ikm, None, b"message", 32).unwrap();
        let b = derive_key(&ikm, None, b"message", 32).unwrap();
        let c = derive_key(&ikm, None, b"chain", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(derive_key(&ikm, Some(&[0u8; 32]), b"", 64).unwrap().len(), 64);
        assert_eq!(derive_key_32(&ikm, None, b"message").unwrap().to_vec(), a);
    }

    #[test]
    fn test_aead_roundtrip_and_tamper() {
        let key = [3u8; 32];
        let iv = generate_iv().unwrap();
        let sealed = aead_encrypt(b"setlist", &key, &iv, b"ad").unwrap();
        assert_eq!(aead_decrypt(&sealed.ciphertext, &sealed.auth_tag, &key, &iv, b"ad").unwrap(), b"setlist");

        let mut ct = sealed.ciphertext.clone();
        ct[0] ^= 0x80;
        assert!(matches!(
            aead_decrypt(&ct, &sealed.auth_tag, &key, &iv, b"ad"),
            Err(CryptoError::Authentication)
        ));
        assert!(matches!(
            aead_decrypt(&sealed.ciphertext, &sealed.auth_tag, &key, &iv, b"other ad"),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn test_cbc_roundtrip() {
        let key = [9u8; 32];
        let iv = [1u8; 16];
        let ct = cbc_encrypt(b"{\"n\":1}", &key, &iv).unwrap();
        assert_eq!(ct.len() % 16, 0);
        assert_eq!(cbc_decrypt(&ct, &key, &iv).unwrap(), b"{\"n\":1}");
    }

    #[test]
    fn test_keys_equal() {
        assert!(keys_equal(&[1, 2, 3], &[1, 2, 3]));
        assert!(!keys_equal(&[1, 2, 3], &[1, 2, 4]));
        assert!(!keys_equal(&[1, 2, 3], &[1, 2]));
    }

    #[test]
    fn test_wrap_roundtrip_and_format() {
        let cfg = cheap_argon2();
        let blob = wrap_with_passphrase(b"private key bytes", "A", &cfg).unwrap();
        assert_eq!(blob.split('|').count(), 3);
        assert_eq!(unwrap_with_passphrase(&blob, "A", &cfg).unwrap(), b"private key bytes");
    }

    #[test]
    fn test_unwrap_wrong_passphrase_fails_deterministically() {
        let cfg = cheap_argon2();
        let blob = wrap_with_passphrase(&[42u8; 32], "A", &cfg).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                unwrap_with_passphrase(&blob, "B", &cfg),
                Err(CryptoError::IncorrectPassword)
            ));
        }
    }

    #[test]
    fn test_unwrap_malformed_blob() {
        let cfg = cheap_argon2();
        assert!(matches!(
            unwrap_with_passphrase("only|two", "A", &cfg),
            Err(CryptoError::Decryption(_))
        ));
    }
}
