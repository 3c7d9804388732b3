/// Key Bundles and the 4-DH handshake
///
/// This module generates per-user key bundles, exchanges their public half,
/// seals the private half under a passphrase, and runs the handshake that
/// seeds a ratchet session.
///
/// # References
/// - [Signal X3DH Specification](https://signal.org/docs/specifications/x3dh/)

pub mod identity;
pub mod bundle;
pub mod protocol;

pub use identity::{export_public_bundle, generate_key_bundle, KeyBundle, DEFAULT_VALIDITY_DAYS};
pub use bundle::{PublicKeyBundle, SealedKeyBundle, VerifiedPublicKeys};
pub use protocol::{x3dh_initiate, x3dh_respond, MasterSecret, MASTER_SECRET_LEN};
