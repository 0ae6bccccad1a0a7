//! One-time-password engine guarding remote commands.
//!
//! - Stateless RFC 6238 generation from the stored base32 secret
//! - Sliding acceptance window of the last `max_otps_to_accept` codes
//! - Replay protection through a persisted, most-recent-first history

pub mod manager;
pub mod store;

pub use manager::{OtpManager, OtpValidationError};
pub use store::{
    decode_recent_passwords, encode_recent_passwords, MemorySecretStore, OtpSecretStore,
};
