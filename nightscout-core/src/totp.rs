//! TOTP (RFC 6238) code generation and provisioning URLs.

use crate::config::OtpConfig;
use crate::{NightscoutError, Result};
use chrono::{DateTime, Utc};
use data_encoding::{BASE32, BASE32_NOPAD};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::str::FromStr;

/// Alphabet used for generated secret keys (RFC 4648 base32).
pub const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Length of generated secret keys, in base32 characters (20 secret bytes).
pub const SECRET_KEY_LENGTH: usize = 32;

/// Supported TOTP HMAC algorithms.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TotpAlgorithm {
    #[default]
    #[serde(rename = "SHA1", alias = "sha1")]
    Sha1,
    #[serde(rename = "SHA256", alias = "sha256")]
    Sha256,
    #[serde(rename = "SHA512", alias = "sha512")]
    Sha512,
}

impl TotpAlgorithm {
    /// Name used in the `algorithm` query item of provisioning URLs.
    pub fn as_url_component(self) -> &'static str {
        match self {
            TotpAlgorithm::Sha1 => "SHA1",
            TotpAlgorithm::Sha256 => "SHA256",
            TotpAlgorithm::Sha512 => "SHA512",
        }
    }
}

impl std::fmt::Display for TotpAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_url_component())
    }
}

impl FromStr for TotpAlgorithm {
    type Err = NightscoutError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        let name = value.trim();
        [
            TotpAlgorithm::Sha1,
            TotpAlgorithm::Sha256,
            TotpAlgorithm::Sha512,
        ]
        .into_iter()
        .find(|algorithm| algorithm.as_url_component().eq_ignore_ascii_case(name))
        .ok_or_else(|| NightscoutError::InvalidInput(format!("unknown OTP algorithm: {}", name)))
    }
}

/// Code for the time step containing `timestamp` (unix seconds).
pub fn generate_totp_code(
    secret_base32: &str,
    algorithm: TotpAlgorithm,
    digits: u8,
    period: u32,
    timestamp: i64,
) -> Result<String> {
    if !(6..=8).contains(&digits) || period == 0 {
        return Err(NightscoutError::InvalidInput(format!(
            "OTP parameters out of range: {} digits, {} s period",
            digits, period
        )));
    }

    let key = decode_secret(secret_base32)?;
    let step = u64::try_from(timestamp).unwrap_or(0) / u64::from(period);

    let digest = match algorithm {
        TotpAlgorithm::Sha1 => hmac_digest::<Hmac<Sha1>>(&key, step)?,
        TotpAlgorithm::Sha256 => hmac_digest::<Hmac<Sha256>>(&key, step)?,
        TotpAlgorithm::Sha512 => hmac_digest::<Hmac<Sha512>>(&key, step)?,
    };

    truncate(&digest, digits)
}

fn hmac_digest<M: Mac + KeyInit>(key: &[u8], step: u64) -> Result<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| NightscoutError::InvalidInput("OTP secret has an unusable length".to_string()))?;
    mac.update(&step.to_be_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

/// RFC 4226 dynamic truncation down to `digits` decimal digits.
fn truncate(digest: &[u8], digits: u8) -> Result<String> {
    let offset = digest.last().map_or(0, |byte| (byte & 0x0f) as usize);
    let window: [u8; 4] = digest
        .get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| {
            NightscoutError::InvalidInput("HMAC digest too short to truncate".to_string())
        })?;

    let value = u32::from_be_bytes(window) & 0x7fff_ffff;
    let code = value % 10u32.pow(u32::from(digits));
    Ok(format!("{:0width$}", code, width = digits as usize))
}

/// Decode a base32 secret. Case, padding, whitespace and dashes are ignored.
pub fn decode_secret(secret_base32: &str) -> Result<Vec<u8>> {
    let cleaned: String = secret_base32
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    let key = match BASE32_NOPAD.decode(cleaned.as_bytes()) {
        Ok(key) => key,
        Err(_) => BASE32.decode(cleaned.as_bytes()).map_err(|e| {
            NightscoutError::InvalidInput(format!("OTP secret is not base32: {}", e))
        })?,
    };

    if key.is_empty() {
        return Err(NightscoutError::InvalidInput("OTP secret is empty".to_string()));
    }
    Ok(key)
}

/// Generate a fresh random secret key from the base32 alphabet.
pub fn generate_secret_key() -> String {
    let mut rng = OsRng;
    (0..SECRET_KEY_LENGTH)
        .map(|_| BASE32_ALPHABET[rng.gen_range(0..BASE32_ALPHABET.len())] as char)
        .collect()
}

/// Token label for a key created at `created`: milliseconds since epoch, rounded.
pub fn key_name_for(created: DateTime<Utc>) -> String {
    let sub_millis_nanos = created.timestamp_subsec_nanos() % 1_000_000;
    let millis = created.timestamp_millis() + i64::from(sub_millis_nanos >= 500_000);
    millis.to_string()
}

/// Build an `otpauth://totp/...` provisioning URL for QR display.
pub fn otpauth_url(name: &str, secret_base32: &str, config: &OtpConfig) -> String {
    format!(
        "otpauth://totp/{}?algorithm={}&digits={}&issuer={}&period={}&secret={}",
        percent_encode(name),
        config.algorithm.as_url_component(),
        config.digits,
        percent_encode(&config.issuer),
        config.period_secs,
        percent_encode(secret_base32),
    )
}

fn percent_encode(input: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => {
                out.push('%');
                out.push(HEX[(other >> 4) as usize] as char);
                out.push(HEX[(other & 0x0f) as usize] as char);
            }
        }
    }
    out
}
