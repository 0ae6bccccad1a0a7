//! Service configuration loaded from TOML.

use crate::totp::TotpAlgorithm;
use crate::{NightscoutError, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default TOTP step, in seconds.
pub const DEFAULT_TOKEN_PERIOD_SECS: u32 = 30;

/// Default number of consecutive codes (current included) accepted by validation.
pub const DEFAULT_MAX_OTPS_TO_ACCEPT: usize = 2;

/// Top-level configuration for the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub otp: OtpConfig,
    pub upload: UploadConfig,
}

impl ServiceConfig {
    /// Load configuration from a TOML file. Missing sections fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            NightscoutError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| NightscoutError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(6..=8).contains(&self.otp.digits) {
            return Err(NightscoutError::Config(
                "otp.digits must be between 6 and 8".to_string(),
            ));
        }
        if self.otp.period_secs == 0 {
            return Err(NightscoutError::Config(
                "otp.period_secs must be greater than 0".to_string(),
            ));
        }
        if self.otp.max_otps_to_accept == 0 {
            return Err(NightscoutError::Config(
                "otp.max_otps_to_accept must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Algorithm parameters for the OTP engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    pub algorithm: TotpAlgorithm,
    pub digits: u8,
    pub period_secs: u32,
    /// Size of the acceptance window and of the accepted-password history.
    pub max_otps_to_accept: usize,
    pub issuer: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            algorithm: TotpAlgorithm::Sha1,
            digits: 6,
            period_secs: DEFAULT_TOKEN_PERIOD_SECS,
            max_otps_to_accept: DEFAULT_MAX_OTPS_TO_ACCEPT,
            issuer: "Loop".to_string(),
        }
    }
}

/// Upload reconciliation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// `enteredBy` / `device` value stamped on uploaded records.
    pub entered_by: String,
    pub object_id_cache_retention_hours: i64,
    pub limits: UploadLimits,
}

impl UploadConfig {
    pub fn object_id_cache_retention(&self) -> Duration {
        Duration::hours(self.object_id_cache_retention_hours)
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            entered_by: "loop://Loop".to_string(),
            object_id_cache_retention_hours: 24,
            limits: UploadLimits::default(),
        }
    }
}

/// Maximum records per reconciliation call, per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub carbs: usize,
    pub doses: usize,
    pub glucose: usize,
    pub device_status: usize,
    pub settings: usize,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            carbs: 1000,
            doses: 1000,
            glucose: 1000,
            device_status: 50,
            settings: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServiceConfig::default();
        assert_eq!(config.otp.algorithm, TotpAlgorithm::Sha1);
        assert_eq!(config.otp.digits, 6);
        assert_eq!(config.otp.period_secs, 30);
        assert_eq!(config.otp.max_otps_to_accept, 2);
        assert_eq!(config.otp.issuer, "Loop");
        assert_eq!(config.upload.object_id_cache_retention(), Duration::hours(24));
        assert_eq!(config.upload.limits.device_status, 50);
        assert_eq!(config.upload.entered_by, "loop://Loop");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ServiceConfig::from_toml(
            r#"
            [otp]
            period_secs = 60
            algorithm = "SHA256"

            [upload.limits]
            carbs = 200
            "#,
        )
        .unwrap();

        assert_eq!(config.otp.period_secs, 60);
        assert_eq!(config.otp.algorithm, TotpAlgorithm::Sha256);
        assert_eq!(config.otp.digits, 6);
        assert_eq!(config.upload.limits.carbs, 200);
        assert_eq!(config.upload.limits.doses, 1000);
        assert_eq!(config.upload.object_id_cache_retention_hours, 24);
    }

    #[test]
    fn rejects_invalid_otp_settings() {
        assert!(ServiceConfig::from_toml("[otp]\ndigits = 4").is_err());
        assert!(ServiceConfig::from_toml("[otp]\nperiod_secs = 0").is_err());
        assert!(ServiceConfig::from_toml("[otp]\nmax_otps_to_accept = 0").is_err());
    }
}
