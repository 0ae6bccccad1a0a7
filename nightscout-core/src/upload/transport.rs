//! Remote store abstraction used by the reconciler.

use crate::upload::models::{DeviceStatus, GlucoseEntry, ProfileSet, Treatment};
use crate::upload::TransportError;
use async_trait::async_trait;

/// Calls against a Nightscout site. Timeouts and retries belong to the implementation.
#[async_trait]
pub trait NightscoutTransport: Send + Sync {
    /// Check that the site is reachable and accepts the configured secret.
    async fn check_auth(&self) -> Result<(), TransportError>;

    /// Bulk create. Must return one object id per treatment, in input order.
    async fn create_treatments(
        &self,
        treatments: &[Treatment],
    ) -> Result<Vec<String>, TransportError>;

    /// Treatments carry their remote `_id`.
    async fn update_treatments(&self, treatments: &[Treatment]) -> Result<(), TransportError>;

    async fn delete_treatments_by_object_id(
        &self,
        object_ids: &[String],
    ) -> Result<(), TransportError>;

    async fn upload_entries(&self, entries: &[GlucoseEntry]) -> Result<(), TransportError>;

    async fn upload_device_status(&self, statuses: &[DeviceStatus]) -> Result<(), TransportError>;

    async fn upload_profiles(&self, profiles: &[ProfileSet]) -> Result<(), TransportError>;
}
