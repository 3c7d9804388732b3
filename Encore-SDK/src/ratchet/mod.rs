/// Double Ratchet Protocol Implementation
///
/// The Double Ratchet provides:
/// - Forward Secrecy: past message keys cannot be derived from current state
/// - Post-Compromise Security: a DH ratchet step heals a compromised state
/// - Out-of-order message decryption within a bounded skip window
/// - Encrypted headers: counters and ratchet keys travel encrypted
///
/// `RatchetState` is a plain value. Transitions return a new state and
/// never modify their input.
///
/// # References
/// - [Signal Double Ratchet Specification](https://signal.org/docs/specifications/doubleratchet/)

pub mod chain;
pub mod dh_ratchet;
pub mod header;
pub mod session;
pub mod state;
pub mod symmetric_ratchet;

pub use dh_ratchet::{dh_ratchet_step, needs_ratchet_step};
pub use header::MessageHeader;
pub use session::{init_receiver, init_receiver_from_bundle, init_sender, sender_state, EncryptedMessage};
pub use state::{deserialize_state, serialize_state, RatchetState};
pub use symmetric_ratchet::{MAX_SKIP, MAX_SKIPPED_KEYS};
