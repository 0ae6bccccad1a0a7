//! Independent checks a remote command must pass before dispatch.
//!
//! Each validator owns its own immutable inputs, so results never depend on
//! the order the command runs them in.

use crate::clock::Clock;
use crate::otp::OtpManager;
use crate::remote::RemoteCommandError;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait RemoteCommandValidator: Send + Sync {
    fn validate(&self) -> Result<(), RemoteCommandError>;
}

/// Rejects commands whose `expiration` lies in the past. No-op when absent.
pub struct ExpirationValidator {
    expiration: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
}

impl ExpirationValidator {
    pub fn new(expiration: Option<DateTime<Utc>>, clock: Arc<dyn Clock>) -> Self {
        Self { expiration, clock }
    }
}

impl RemoteCommandValidator for ExpirationValidator {
    fn validate(&self) -> Result<(), RemoteCommandError> {
        let Some(expiration) = self.expiration else {
            return Ok(());
        };

        if self.clock.now() > expiration {
            return Err(RemoteCommandError::ExpiredNotification);
        }
        Ok(())
    }
}

/// Requires an OTP and checks it against the OTP engine.
pub struct OtpValidator {
    otp: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    otp_manager: Arc<OtpManager>,
}

impl OtpValidator {
    pub fn new(
        otp: Option<String>,
        sent_at: Option<DateTime<Utc>>,
        otp_manager: Arc<OtpManager>,
    ) -> Self {
        Self {
            otp,
            sent_at,
            otp_manager,
        }
    }
}

impl RemoteCommandValidator for OtpValidator {
    fn validate(&self) -> Result<(), RemoteCommandError> {
        let otp = self.otp.as_deref().ok_or(RemoteCommandError::MissingOtp)?;

        tracing::debug!(sent_at = ?self.sent_at, "Validating remote command OTP");
        self.otp_manager.validate_otp(otp)?;
        Ok(())
    }
}
