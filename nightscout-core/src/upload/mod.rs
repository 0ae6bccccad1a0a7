//! Upload reconciliation: local change-sets against a Nightscout site.
//!
//! Each category is pushed through an injected [`NightscoutTransport`].
//! Remote object ids handed back on create are remembered in the
//! [`ObjectIdCache`] so later updates and deletes can address the same
//! remote record.

pub mod cache;
#[cfg(feature = "http")]
pub mod client;
pub mod models;
pub mod reconciler;
pub mod transport;


pub use cache::{ObjectIdCache, ObjectIdCacheEntry, SharedObjectIdCache};
#[cfg(feature = "http")]
pub use client::NightscoutClient;
pub use models::{
    DeviceStatus, DoseEntry, DoseType, GlucoseEntry, GlucoseTrend, ProfileSet,
    StoredGlucoseSample, SyncCarbObject, Treatment, TreatmentEventType,
};
pub use reconciler::UploadReconciler;
pub use transport::NightscoutTransport;

use thiserror::Error;

/// Failures reported by a transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Server responded with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}
