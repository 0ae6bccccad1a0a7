//! Secret storage capability for the OTP engine.

use crate::StoreError;
use std::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Secure storage for the token secret, its label, and the accepted-password history.
///
/// Getters return `None`/empty when the value is absent or unreadable; setters
/// surface backend failures so the OTP engine can refuse to accept a code it
/// could not record.
pub trait OtpSecretStore: Send + Sync {
    fn token_secret_key(&self) -> Option<String>;
    fn set_token_secret_key(&self, key: Option<&str>) -> Result<(), StoreError>;

    fn token_secret_key_name(&self) -> Option<String>;
    fn set_token_secret_key_name(&self, name: Option<&str>) -> Result<(), StoreError>;

    /// Most-recent-first.
    fn recent_accepted_passwords(&self) -> Vec<String>;
    fn set_recent_accepted_passwords(&self, passwords: &[String]) -> Result<(), StoreError>;
}

/// Encoding for backends that hold a single string per item (keychain style).
pub fn encode_recent_passwords(passwords: &[String]) -> String {
    passwords.join(",")
}

pub fn decode_recent_passwords(encoded: &str) -> Vec<String> {
    encoded
        .split(',')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Default, Zeroize, ZeroizeOnDrop)]
struct SecretState {
    secret_key: Option<String>,
    key_name: Option<String>,
    recent_passwords: Vec<String>,
}

/// Process-local secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    state: Mutex<SecretState>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with an existing secret and label.
    pub fn with_secret(secret_key: &str, key_name: &str) -> Self {
        Self {
            state: Mutex::new(SecretState {
                secret_key: Some(secret_key.to_string()),
                key_name: Some(key_name.to_string()),
                recent_passwords: Vec::new(),
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SecretState) -> T) -> Result<T, StoreError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory secret store".to_string()))?;
        Ok(f(&mut state))
    }
}

impl OtpSecretStore for MemorySecretStore {
    fn token_secret_key(&self) -> Option<String> {
        self.with_state(|s| s.secret_key.clone()).ok().flatten()
    }

    fn set_token_secret_key(&self, key: Option<&str>) -> Result<(), StoreError> {
        self.with_state(|s| {
            s.secret_key.zeroize();
            s.secret_key = key.map(str::to_string);
        })
    }

    fn token_secret_key_name(&self) -> Option<String> {
        self.with_state(|s| s.key_name.clone()).ok().flatten()
    }

    fn set_token_secret_key_name(&self, name: Option<&str>) -> Result<(), StoreError> {
        self.with_state(|s| s.key_name = name.map(str::to_string))
    }

    fn recent_accepted_passwords(&self) -> Vec<String> {
        self.with_state(|s| s.recent_passwords.clone())
            .unwrap_or_default()
    }

    fn set_recent_accepted_passwords(&self, passwords: &[String]) -> Result<(), StoreError> {
        self.with_state(|s| s.recent_passwords = passwords.to_vec())
    }
}
