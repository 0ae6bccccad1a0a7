//! Remote command pipeline
//!
//! Inbound push payloads are matched to a known notification shape, bundled
//! with their validators (expiration, OTP), and handed to a host delegate:
//! `Received -> Parsed -> Validated -> Dispatched`, or rejected and reported.

pub mod action;
pub mod command;
pub mod notification;
pub mod source;
pub mod validators;

pub use action::{BolusAction, CarbAction, OverrideAction, OverrideCancelAction, RemoteAction};
pub use command::RemoteCommand;
pub use notification::{NotificationPayload, RemoteNotification};
pub use source::{CommandStage, RemoteCommandDelegate, RemoteCommandSource};
pub use validators::{ExpirationValidator, OtpValidator, RemoteCommandValidator};

use crate::otp::OtpValidationError;
use thiserror::Error;

/// Reasons a remote notification is not carried out.
#[derive(Error, Debug)]
pub enum RemoteCommandError {
    #[error("Unhandled notification")]
    UnhandledNotification,

    #[error("Unsupported notification version: {0}")]
    UnsupportedVersion(String),

    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Expired")]
    ExpiredNotification,

    #[error("Missing OTP")]
    MissingOtp,

    #[error(transparent)]
    Otp(#[from] OtpValidationError),

    #[error("Action failed: {0}")]
    ActionFailed(String),
}
