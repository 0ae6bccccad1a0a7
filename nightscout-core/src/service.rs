//! Service facade: credentials, transport lifecycle, uploads and persisted state.

use crate::clock::Clock;
use crate::config::ServiceConfig;
use crate::otp::{OtpManager, OtpSecretStore};
use crate::remote::{RemoteCommandDelegate, RemoteCommandSource};
use crate::upload::{
    DeviceStatus, DoseEntry, NightscoutTransport, ObjectIdCache, ProfileSet,
    SharedObjectIdCache, StoredGlucoseSample, SyncCarbObject, TransportError, UploadReconciler,
};
use crate::{NightscoutError, Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};
use zeroize::{Zeroize, ZeroizeOnDrop};

const OBJECT_ID_CACHE_KEY: &str = "objectIdCache";

/// Connection settings for a Nightscout site.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub site_url: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(site_url: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            site_url: site_url.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("site_url", &self.site_url)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Persistence for connection settings.
pub trait CredentialStore: Send + Sync {
    /// Fails with [`StoreError::NotConfigured`] when nothing is stored.
    fn get_credentials(&self) -> std::result::Result<Credentials, StoreError>;
    fn set_credentials(&self, credentials: Option<&Credentials>)
        -> std::result::Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    credentials: Mutex<Option<Credentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get_credentials(&self) -> std::result::Result<Credentials, StoreError> {
        self.credentials
            .lock()
            .map_err(|_| StoreError::LockPoisoned("credentials".to_string()))?
            .clone()
            .ok_or(StoreError::NotConfigured)
    }

    fn set_credentials(
        &self,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<(), StoreError> {
        *self
            .credentials
            .lock()
            .map_err(|_| StoreError::LockPoisoned("credentials".to_string()))? =
            credentials.cloned();
        Ok(())
    }
}

/// Builds a transport for a set of credentials.
pub type TransportFactory = Arc<
    dyn Fn(&Credentials) -> std::result::Result<Arc<dyn NightscoutTransport>, TransportError>
        + Send
        + Sync,
>;

#[cfg(feature = "http")]
fn http_transport(
    credentials: &Credentials,
) -> std::result::Result<Arc<dyn NightscoutTransport>, TransportError> {
    let client =
        crate::upload::NightscoutClient::new(&credentials.site_url, &credentials.api_secret)?;
    Ok(Arc::new(client))
}

/// Factory producing the `reqwest` client.
#[cfg(feature = "http")]
pub fn http_transport_factory() -> TransportFactory {
    Arc::new(http_transport)
}

/// Collaborators injected into [`NightscoutService`].
pub struct ServiceDependencies {
    pub credential_store: Arc<dyn CredentialStore>,
    pub secret_store: Arc<dyn OtpSecretStore>,
    pub transport_factory: TransportFactory,
    pub clock: Arc<dyn Clock>,
}

struct Session {
    credentials: Credentials,
    transport: Arc<dyn NightscoutTransport>,
    reconciler: Arc<UploadReconciler>,
}

/// Entry point for a host: owns the OTP engine, the object id cache, and
/// the transport for the configured site.
///
/// Without credentials every upload is a successful no-op.
pub struct NightscoutService {
    config: ServiceConfig,
    credential_store: Arc<dyn CredentialStore>,
    transport_factory: TransportFactory,
    clock: Arc<dyn Clock>,
    otp_manager: Arc<OtpManager>,
    object_id_cache: SharedObjectIdCache,
    session: RwLock<Option<Session>>,
}

impl NightscoutService {
    pub fn new(config: ServiceConfig, deps: ServiceDependencies) -> Self {
        Self::with_cache(config, deps, ObjectIdCache::new())
    }

    /// Restore a service from the blob produced by [`NightscoutService::raw_state`].
    pub fn from_raw_state(
        config: ServiceConfig,
        deps: ServiceDependencies,
        raw_state: &Value,
    ) -> Result<Self> {
        let cache = match raw_state.get(OBJECT_ID_CACHE_KEY) {
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| StoreError::Serialization(format!("object id cache: {}", e)))?,
            None => ObjectIdCache::new(),
        };
        Ok(Self::with_cache(config, deps, cache))
    }

    fn with_cache(config: ServiceConfig, deps: ServiceDependencies, cache: ObjectIdCache) -> Self {
        let otp_manager = Arc::new(OtpManager::new(
            deps.secret_store,
            deps.clock.clone(),
            config.otp.clone(),
        ));

        let service = Self {
            config,
            credential_store: deps.credential_store,
            transport_factory: deps.transport_factory,
            clock: deps.clock,
            otp_manager,
            object_id_cache: SharedObjectIdCache::new(cache),
            session: RwLock::new(None),
        };

        match service.credential_store.get_credentials() {
            Ok(credentials) => match service.open_session(credentials) {
                Ok(session) => {
                    if let Ok(mut slot) = service.session.write() {
                        *slot = Some(session);
                    }
                }
                Err(e) => tracing::warn!("Could not create Nightscout transport: {}", e),
            },
            Err(StoreError::NotConfigured) => {
                tracing::debug!("Nightscout credentials not configured")
            }
            Err(e) => tracing::warn!("Could not load Nightscout credentials: {}", e),
        }

        service
    }

    fn open_session(&self, credentials: Credentials) -> Result<Session> {
        let transport = (self.transport_factory)(&credentials)?;
        let reconciler = Arc::new(UploadReconciler::new(
            transport.clone(),
            self.object_id_cache.clone(),
            self.clock.clone(),
            self.config.upload.clone(),
        ));
        Ok(Session {
            credentials,
            transport,
            reconciler,
        })
    }

    fn set_session(&self, session: Option<Session>) -> Result<()> {
        *self
            .session
            .write()
            .map_err(|_| StoreError::LockPoisoned("service session".to_string()))? = session;
        Ok(())
    }

    fn current<T>(&self, f: impl FnOnce(&Session) -> T) -> Result<Option<T>> {
        let session = self
            .session
            .read()
            .map_err(|_| StoreError::LockPoisoned("service session".to_string()))?;
        Ok(session.as_ref().map(f))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn otp_manager(&self) -> &Arc<OtpManager> {
        &self.otp_manager
    }

    pub fn has_configuration(&self) -> bool {
        matches!(self.current(|_| ()), Ok(Some(())))
    }

    pub fn credentials(&self) -> Result<Option<Credentials>> {
        self.current(|session| session.credentials.clone())
    }

    /// Persist new credentials and switch uploads to them.
    pub fn complete_create(&self, credentials: Credentials) -> Result<()> {
        let session = self.open_session(credentials)?;
        self.credential_store
            .set_credentials(Some(&session.credentials))?;
        self.set_session(Some(session))?;
        tracing::info!("Nightscout service configured");
        Ok(())
    }

    pub fn complete_update(&self, credentials: Credentials) -> Result<()> {
        let session = self.open_session(credentials)?;
        self.credential_store
            .set_credentials(Some(&session.credentials))?;
        self.set_session(Some(session))?;
        tracing::info!("Nightscout service updated");
        Ok(())
    }

    /// Forget the stored credentials. Uploads become no-ops.
    pub fn complete_delete(&self) -> Result<()> {
        self.credential_store.set_credentials(None)?;
        self.set_session(None)?;
        tracing::info!("Nightscout service deleted");
        Ok(())
    }

    /// Ask the site to authenticate the configured secret.
    pub async fn verify_configuration(&self) -> Result<()> {
        let transport = self
            .current(|session| session.transport.clone())?
            .ok_or(NightscoutError::NotConfigured)?;
        transport.check_auth().await?;
        Ok(())
    }

    /// State for the host to persist; restore with [`NightscoutService::from_raw_state`].
    pub fn raw_state(&self) -> Result<Value> {
        let cache = self.object_id_cache.snapshot()?;
        let cache = serde_json::to_value(&cache)
            .map_err(|e| StoreError::Serialization(format!("object id cache: {}", e)))?;

        let mut state = serde_json::Map::new();
        state.insert(OBJECT_ID_CACHE_KEY.to_string(), cache);
        Ok(Value::Object(state))
    }

    pub fn remote_command_source(
        &self,
        delegate: Arc<dyn RemoteCommandDelegate>,
    ) -> RemoteCommandSource {
        RemoteCommandSource::new(self.otp_manager.clone(), self.clock.clone(), delegate)
    }

    fn reconciler(&self) -> Result<Option<Arc<UploadReconciler>>> {
        let reconciler = self.current(|session| session.reconciler.clone())?;
        if reconciler.is_none() {
            tracing::debug!("Skipping upload, service not configured");
        }
        Ok(reconciler)
    }

    pub async fn upload_carb_data(
        &self,
        created: &[SyncCarbObject],
        updated: &[SyncCarbObject],
        deleted: &[SyncCarbObject],
    ) -> Result<bool> {
        match self.reconciler()? {
            Some(reconciler) => reconciler.upload_carb_data(created, updated, deleted).await,
            None => Ok(false),
        }
    }

    pub async fn upload_dose_data(&self, created: &[DoseEntry]) -> Result<bool> {
        match self.reconciler()? {
            Some(reconciler) => reconciler.upload_dose_data(created).await,
            None => Ok(false),
        }
    }

    pub async fn upload_glucose_data(&self, samples: &[StoredGlucoseSample]) -> Result<bool> {
        match self.reconciler()? {
            Some(reconciler) => reconciler.upload_glucose_data(samples).await,
            None => Ok(false),
        }
    }

    pub async fn upload_device_status(&self, statuses: &[DeviceStatus]) -> Result<bool> {
        match self.reconciler()? {
            Some(reconciler) => reconciler.upload_device_status(statuses).await,
            None => Ok(false),
        }
    }

    pub async fn upload_settings(
        &self,
        settings: &[ProfileSet],
        last_updated: DateTime<Utc>,
    ) -> Result<bool> {
        match self.reconciler()? {
            Some(reconciler) => reconciler.upload_settings(settings, last_updated).await,
            None => Ok(false),
        }
    }
}
