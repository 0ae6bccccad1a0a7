//! Nightscout Remote Data Service Core Library
//!
//! This library provides the non-UI core of the Nightscout remote data
//! service: the OTP engine guarding remote commands, the remote command
//! pipeline that turns push payloads into typed actions, and the upload
//! reconciliation layer that tracks remote object ids for local records.

pub mod clock;
pub mod config;
pub mod file_store;
pub mod otp;
pub mod platform;
pub mod remote;
pub mod service;
pub mod totp;
pub mod upload;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{OtpConfig, ServiceConfig, UploadConfig, UploadLimits};
pub use file_store::FileStore;
pub use otp::{MemorySecretStore, OtpManager, OtpSecretStore, OtpValidationError};
pub use remote::{
    CommandStage, RemoteAction, RemoteCommand, RemoteCommandDelegate, RemoteCommandError,
    RemoteCommandSource,
};
pub use service::{
    CredentialStore, Credentials, MemoryCredentialStore, NightscoutService, ServiceDependencies,
    TransportFactory,
};
pub use totp::TotpAlgorithm;
pub use upload::{
    NightscoutTransport, ObjectIdCache, SharedObjectIdCache, TransportError, UploadReconciler,
};

use thiserror::Error;

/// Result type for Nightscout service operations
pub type Result<T> = std::result::Result<T, NightscoutError>;

/// Errors raised by persistent stores (secret store, credential store, state files)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not configured")]
    NotConfigured,

    #[error("Store lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// General error type for Nightscout service operations
#[derive(Error, Debug)]
pub enum NightscoutError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("OTP validation failed: {0}")]
    Otp(#[from] OtpValidationError),

    #[error("Remote command error: {0}")]
    RemoteCommand(#[from] RemoteCommandError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Service is not configured")]
    NotConfigured,

    #[error("{category} batch of {len} records exceeds the limit of {limit}")]
    BatchTooLarge {
        category: &'static str,
        len: usize,
        limit: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
