//! Per-category reconciliation of local change-sets against the remote store.

use crate::clock::Clock;
use crate::config::UploadConfig;
use crate::upload::cache::SharedObjectIdCache;
use crate::upload::models::{
    DeviceStatus, DoseEntry, ProfileSet, StoredGlucoseSample, SyncCarbObject, Treatment,
};
use crate::upload::transport::NightscoutTransport;
use crate::upload::TransportError;
use crate::{NightscoutError, Result, StoreError};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// Minimum gap between two phone-only device status uploads.
const UPLOADER_ONLY_STATUS_INTERVAL_SECS: i64 = 5 * 60;

/// When settings and device status last went out. Kept in memory only.
#[derive(Debug, Default)]
struct UploadMarks {
    last_settings_upload: Option<DateTime<Utc>>,
    last_device_status_upload: Option<DateTime<Utc>>,
}

/// Drives uploads for every category through one transport.
///
/// Each `upload_*` call returns `true` when it had records to send. That is
/// not a confirmation the remote side stored them.
pub struct UploadReconciler {
    transport: Arc<dyn NightscoutTransport>,
    cache: SharedObjectIdCache,
    clock: Arc<dyn Clock>,
    config: UploadConfig,
    marks: Mutex<UploadMarks>,
}

fn ensure_within_limit(category: &'static str, len: usize, limit: usize) -> Result<()> {
    if len > limit {
        return Err(NightscoutError::BatchTooLarge {
            category,
            len,
            limit,
        });
    }
    Ok(())
}

impl UploadReconciler {
    pub fn new(
        transport: Arc<dyn NightscoutTransport>,
        cache: SharedObjectIdCache,
        clock: Arc<dyn Clock>,
        config: UploadConfig,
    ) -> Self {
        Self {
            transport,
            cache,
            clock,
            config,
            marks: Mutex::new(UploadMarks::default()),
        }
    }

    pub fn object_id_cache(&self) -> &SharedObjectIdCache {
        &self.cache
    }

    fn marks(&self) -> Result<MutexGuard<'_, UploadMarks>> {
        self.marks
            .lock()
            .map_err(|_| StoreError::LockPoisoned("upload marks".to_string()).into())
    }

    /// Create, then update, then delete. The first failing stage ends the call;
    /// earlier stages are not rolled back.
    pub async fn upload_carb_data(
        &self,
        created: &[SyncCarbObject],
        updated: &[SyncCarbObject],
        deleted: &[SyncCarbObject],
    ) -> Result<bool> {
        ensure_within_limit(
            "carb",
            created.len() + updated.len() + deleted.len(),
            self.config.limits.carbs,
        )?;

        let created_any = self.create_carb_data(created).await?;
        let updated_any = self.update_carb_data(updated).await?;
        let deleted_any = self.delete_carb_data(deleted).await?;

        self.purge_object_id_cache()?;

        Ok(created_any || updated_any || deleted_any)
    }

    async fn create_carb_data(&self, created: &[SyncCarbObject]) -> Result<bool> {
        if created.is_empty() {
            return Ok(false);
        }

        let treatments: Vec<Treatment> = created
            .iter()
            .filter_map(|carb| carb.treatment(&self.config.entered_by, None))
            .collect();
        let skipped = created.len() - treatments.len();
        if skipped > 0 {
            tracing::warn!(skipped, "Carb entries without an identifier were not uploaded");
        }

        self.create_treatments("carb", &treatments).await?;
        Ok(true)
    }

    async fn update_carb_data(&self, updated: &[SyncCarbObject]) -> Result<bool> {
        if updated.is_empty() {
            return Ok(false);
        }

        let mut treatments = Vec::with_capacity(updated.len());
        for carb in updated {
            let Some(identifier) = carb.nightscout_identifier() else {
                continue;
            };
            match self.cache.find_object_id(&identifier)? {
                Some(object_id) => {
                    if let Some(treatment) = carb.treatment(&self.config.entered_by, Some(object_id))
                    {
                        treatments.push(treatment);
                    }
                }
                None => tracing::debug!("No remote id cached for updated carb entry, skipping"),
            }
        }

        tracing::debug!(count = treatments.len(), "Updating carb treatments");
        self.transport.update_treatments(&treatments).await?;
        Ok(true)
    }

    async fn delete_carb_data(&self, deleted: &[SyncCarbObject]) -> Result<bool> {
        if deleted.is_empty() {
            return Ok(false);
        }

        let mut object_ids = Vec::with_capacity(deleted.len());
        for carb in deleted {
            let Some(identifier) = carb.nightscout_identifier() else {
                continue;
            };
            match self.cache.find_object_id(&identifier)? {
                Some(object_id) => object_ids.push(object_id),
                None => tracing::debug!("No remote id cached for deleted carb entry, skipping"),
            }
        }

        tracing::debug!(count = object_ids.len(), "Deleting carb treatments");
        self.transport
            .delete_treatments_by_object_id(&object_ids)
            .await?;
        Ok(true)
    }

    /// Doses are create-only. Returned ids are cached by dose sync identifier.
    pub async fn upload_dose_data(&self, created: &[DoseEntry]) -> Result<bool> {
        ensure_within_limit("dose", created.len(), self.config.limits.doses)?;
        if created.is_empty() {
            return Ok(false);
        }

        let treatments: Vec<Treatment> = created
            .iter()
            .filter_map(|dose| dose.treatment(&self.config.entered_by))
            .collect();

        self.create_treatments("dose", &treatments).await?;
        Ok(true)
    }

    pub async fn upload_glucose_data(&self, samples: &[StoredGlucoseSample]) -> Result<bool> {
        ensure_within_limit("glucose", samples.len(), self.config.limits.glucose)?;
        if samples.is_empty() {
            return Ok(false);
        }

        let entries: Vec<_> = samples
            .iter()
            .map(|sample| sample.glucose_entry(&self.config.entered_by))
            .collect();

        tracing::debug!(count = entries.len(), "Uploading glucose entries");
        self.transport.upload_entries(&entries).await?;
        Ok(true)
    }

    /// Phone-only statuses are dropped when any status went out less than
    /// five minutes ago. Statuses carrying pump or loop data always go.
    pub async fn upload_device_status(&self, statuses: &[DeviceStatus]) -> Result<bool> {
        ensure_within_limit(
            "device status",
            statuses.len(),
            self.config.limits.device_status,
        )?;
        if statuses.is_empty() {
            return Ok(false);
        }

        let now = self.clock.now();
        let interval = Duration::seconds(UPLOADER_ONLY_STATUS_INTERVAL_SECS);
        let recent = self
            .marks()?
            .last_device_status_upload
            .is_some_and(|last| now - last < interval);
        let to_send: Vec<DeviceStatus> = statuses
            .iter()
            .filter(|status| !(recent && status.is_uploader_only()))
            .cloned()
            .collect();

        if to_send.is_empty() {
            tracing::debug!("Uploader-only device status throttled");
            return Ok(false);
        }

        tracing::debug!(count = to_send.len(), "Uploading device status");
        self.transport.upload_device_status(&to_send).await?;
        self.marks()?.last_device_status_upload = Some(now);
        Ok(true)
    }

    /// Incomplete profile sets are skipped, not failed. Nothing is sent unless
    /// `last_updated` is newer than the previous settings upload.
    pub async fn upload_settings(
        &self,
        settings: &[ProfileSet],
        last_updated: DateTime<Utc>,
    ) -> Result<bool> {
        ensure_within_limit("settings", settings.len(), self.config.limits.settings)?;
        if settings.is_empty() {
            return Ok(false);
        }

        let last_upload = self.marks()?.last_settings_upload;
        if last_upload.is_some_and(|last| last_updated <= last) {
            tracing::debug!("Settings unchanged since last upload");
            return Ok(false);
        }

        let complete: Vec<ProfileSet> = settings
            .iter()
            .filter(|profile| profile.is_complete())
            .cloned()
            .collect();
        if complete.len() < settings.len() {
            tracing::info!(
                skipped = settings.len() - complete.len(),
                "Not uploading settings with incomplete profile configuration"
            );
        }

        let started = self.clock.now();
        self.transport.upload_profiles(&complete).await?;
        self.marks()?.last_settings_upload = Some(started);
        Ok(true)
    }

    /// Bulk-create and cache the returned ids by position.
    async fn create_treatments(&self, category: &str, treatments: &[Treatment]) -> Result<()> {
        tracing::debug!(category, count = treatments.len(), "Creating treatments");
        let object_ids = self.transport.create_treatments(treatments).await?;

        if object_ids.len() != treatments.len() {
            return Err(TransportError::InvalidResponse(format!(
                "expected {} object ids for {} treatments, got {}",
                treatments.len(),
                category,
                object_ids.len()
            ))
            .into());
        }

        let pairs = treatments
            .iter()
            .zip(object_ids)
            .filter_map(|(treatment, object_id)| {
                treatment
                    .sync_identifier
                    .clone()
                    .map(|identifier| (identifier, object_id))
            });
        self.cache.add_all(pairs, self.clock.now())?;
        Ok(())
    }

    pub fn purge_object_id_cache(&self) -> Result<usize> {
        let purged = self
            .cache
            .purge(self.clock.now(), self.config.object_id_cache_retention())?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired object ids");
        }
        Ok(purged)
    }
}
