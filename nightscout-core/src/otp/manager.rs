//! OTP engine: current codes, sliding acceptance window, and replay protection.

use crate::clock::Clock;
use crate::config::OtpConfig;
use crate::otp::store::OtpSecretStore;
use crate::totp::{generate_secret_key, generate_totp_code, key_name_for, otpauth_url};
use crate::{NightscoutError, Result, StoreError};
use chrono::Duration;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Reasons a candidate password is refused.
#[derive(Error, Debug)]
pub enum OtpValidationError {
    #[error("OTP code has an invalid format: {otp}")]
    InvalidFormat { otp: String },

    #[error("OTP code is expired.")]
    Expired,

    #[error("OTP code was previously used")]
    PreviouslyUsed,

    #[error("OTP codes could not be generated.")]
    CodeGeneratorFailed,

    #[error("OTP code could not be recorded: {0}")]
    Store(#[from] StoreError),
}

/// Generates and validates time-stepped codes bound to the stored secret.
///
/// Every read-modify-write of the secret store goes through `access`, so two
/// concurrent validations of the same code cannot both succeed.
pub struct OtpManager {
    store: Arc<dyn OtpSecretStore>,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
    access: Mutex<()>,
}

impl OtpManager {
    /// Create a manager, provisioning a new secret if the store has none.
    pub fn new(store: Arc<dyn OtpSecretStore>, clock: Arc<dyn Clock>, config: OtpConfig) -> Self {
        let manager = Self {
            store,
            clock,
            config,
            access: Mutex::new(()),
        };

        if manager.store.token_secret_key().is_none()
            || manager.store.token_secret_key_name().is_none()
        {
            if let Err(e) = manager.reset_secret_key() {
                tracing::error!("Could not provision OTP secret: {}", e);
            }
        }

        manager
    }

    pub fn config(&self) -> &OtpConfig {
        &self.config
    }

    /// Accept `candidate` at most once while it is inside the acceptance window.
    pub fn validate_otp(&self, candidate: &str) -> std::result::Result<(), OtpValidationError> {
        if candidate.chars().count() != self.config.digits as usize {
            return Err(OtpValidationError::InvalidFormat {
                otp: candidate.to_string(),
            });
        }

        let _guard = self
            .access
            .lock()
            .map_err(|_| StoreError::LockPoisoned("otp manager".to_string()))?;

        let window = self
            .last_passwords_ascending(self.config.max_otps_to_accept)
            .map_err(|e| {
                tracing::warn!("OTP window generation failed: {}", e);
                OtpValidationError::CodeGeneratorFailed
            })?;

        if !window.iter().any(|otp| otp == candidate) {
            return Err(OtpValidationError::Expired);
        }

        let mut recent = self.store.recent_accepted_passwords();
        if recent.iter().any(|otp| otp == candidate) {
            return Err(OtpValidationError::PreviouslyUsed);
        }

        recent.insert(0, candidate.to_string());
        recent.truncate(self.config.max_otps_to_accept);
        self.store.set_recent_accepted_passwords(&recent)?;

        Ok(())
    }

    /// Replace the secret and its label, invalidating every previously valid code.
    ///
    /// The accepted-password history is cleared as well.
    pub fn reset_secret_key(&self) -> std::result::Result<(), StoreError> {
        let _guard = self
            .access
            .lock()
            .map_err(|_| StoreError::LockPoisoned("otp manager".to_string()))?;

        let secret_key = generate_secret_key();
        let key_name = key_name_for(self.clock.now());

        self.store.set_token_secret_key(Some(&secret_key))?;
        self.store.set_token_secret_key_name(Some(&key_name))?;
        self.store.set_recent_accepted_passwords(&[])?;

        tracing::info!("OTP secret key reset (key name {})", key_name);
        Ok(())
    }

    /// `count` consecutive codes ending at "now", oldest first.
    pub fn last_passwords_ascending(&self, count: usize) -> Result<Vec<String>> {
        let secret_key = self
            .store
            .token_secret_key()
            .ok_or(NightscoutError::Store(StoreError::NotConfigured))?;

        let now = self.clock.now();
        let period = Duration::seconds(self.config.period_secs as i64);

        (0..count)
            .map(|index| {
                let steps_back = (count - 1 - index) as i32;
                let at = now - period * steps_back;
                generate_totp_code(
                    &secret_key,
                    self.config.algorithm,
                    self.config.digits,
                    self.config.period_secs,
                    at.timestamp(),
                )
            })
            .collect()
    }

    pub fn current_password(&self) -> Result<String> {
        self.last_passwords_ascending(1)?
            .pop()
            .ok_or_else(|| NightscoutError::InvalidInput("No OTP generated".to_string()))
    }

    pub fn token_name(&self) -> Option<String> {
        self.store.token_secret_key_name()
    }

    /// Provisioning URL for enrolling the secret in an authenticator app.
    pub fn otp_url(&self) -> Option<String> {
        let secret_key = self.store.token_secret_key()?;
        let key_name = self.store.token_secret_key_name()?;
        Some(otpauth_url(&key_name, &secret_key, &self.config))
    }
}
