/// 4-DH Handshake
///
/// Both parties derive the same 64-byte master secret from their own full
/// bundle and the peer's public bundle. The initiator uses the peer's signed
/// pre-key; the responder mirrors every exchange with roles swapped.

use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::{derive_key, diffie_hellman, CryptoError, KEY_LEN};
use crate::x3dh::bundle::{PublicKeyBundle, VerifiedPublicKeys};
use crate::x3dh::identity::KeyBundle;

/// Length of the handshake output: root key followed by the first chain key.
pub const MASTER_SECRET_LEN: usize = 64;

/// Shared secret computed by the handshake.
///
/// # Fields
/// * `bytes` - root key (first 32 bytes) || chain key (last 32 bytes)
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret {
    bytes: [u8; MASTER_SECRET_LEN],
}

impl MasterSecret {
    pub fn new(bytes: [u8; MASTER_SECRET_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; MASTER_SECRET_LEN] {
        &self.bytes
    }

    pub fn root_key(&self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&self.bytes[..KEY_LEN]);
        out
    }

    pub fn chain_key(&self) -> [u8; KEY_LEN] {
        let mut out = [0u8; KEY_LEN];
        out.copy_from_slice(&self.bytes[KEY_LEN..]);
        out
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

/// Initiator side.
///
/// # Formula
/// ```text
/// SK = HKDF(salt = 0^32, info = "",
///   DH(IK_A, SPK_B) ||
///   DH(EK_A, IK_B) ||
///   DH(EK_A, SPK_B) ||
///   DH(EK_A, EK_B)
/// )
/// ```
///
/// # Returns
/// * `Ok(MasterSecret)` - the shared secret
/// * `Err(CryptoError::SignatureVerification)` - the peer pre-key is not signed by its identity
pub fn x3dh_initiate(own: &KeyBundle, peer: &PublicKeyBundle) -> Result<MasterSecret, CryptoError> {
    let peer_keys = peer.verify()?;
    debug!(peer = peer.user_id, "handshake initiated");
    initiate_verified(own, &peer_keys)
}

/// Initiator side over keys that already passed `PublicKeyBundle::verify`.
pub(crate) fn initiate_verified(
    own: &KeyBundle,
    peer_keys: &VerifiedPublicKeys,
) -> Result<MasterSecret, CryptoError> {
    let dh1 = diffie_hellman(&own.identity_agreement.private_key, &peer_keys.signed_pre_key)?;
    let dh2 = diffie_hellman(&own.ephemeral.private_key, &peer_keys.identity_agreement_key)?;
    let dh3 = diffie_hellman(&own.ephemeral.private_key, &peer_keys.signed_pre_key)?;
    let dh4 = diffie_hellman(&own.ephemeral.private_key, &peer_keys.ephemeral_key)?;
    kdf_master_secret([dh1, dh2, dh3, dh4])
}

/// Responder side. Mirrors `x3dh_initiate` with roles swapped.
///
/// # Formula
/// ```text
/// SK = HKDF(salt = 0^32, info = "",
///   DH(SPK_B, IK_A) ||
///   DH(IK_B, EK_A) ||
///   DH(SPK_B, EK_A) ||
///   DH(EK_B, EK_A)
/// )
/// ```
pub fn x3dh_respond(own: &KeyBundle, peer: &PublicKeyBundle) -> Result<MasterSecret, CryptoError> {
    let peer_keys = peer.verify()?;

    let dh1 = diffie_hellman(&own.signed_pre_key.private_key, &peer_keys.identity_agreement_key)?;
    let dh2 = diffie_hellman(&own.identity_agreement.private_key, &peer_keys.ephemeral_key)?;
    let dh3 = diffie_hellman(&own.signed_pre_key.private_key, &peer_keys.ephemeral_key)?;
    let dh4 = diffie_hellman(&own.ephemeral.private_key, &peer_keys.ephemeral_key)?;

    debug!(peer = peer.user_id, "handshake answered");
    kdf_master_secret([dh1, dh2, dh3, dh4])
}

fn kdf_master_secret(dh_outputs: [[u8; KEY_LEN]; 4]) -> Result<MasterSecret, CryptoError> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(KEY_LEN * 4));
    for mut dh in dh_outputs {
        ikm.extend_from_slice(&dh);
        dh.zeroize();
    }

    let okm = Zeroizing::new(derive_key(&ikm, Some(&[0u8; KEY_LEN]), b"", MASTER_SECRET_LEN)?);
    let mut bytes = [0u8; MASTER_SECRET_LEN];
    bytes.copy_from_slice(&okm);
    Ok(MasterSecret { bytes })
}
