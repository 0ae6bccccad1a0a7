//! Single-file JSON store for credentials, the OTP secret and service state.

use crate::otp::OtpSecretStore;
use crate::service::{CredentialStore, Credentials};
use crate::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use zeroize::{Zeroize, ZeroizeOnDrop};

#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
struct StoreDocument {
    #[serde(default)]
    site_url: Option<String>,
    #[serde(default)]
    api_secret: Option<String>,
    #[serde(default)]
    otp_secret_key: Option<String>,
    #[serde(default)]
    otp_key_name: Option<String>,
    #[serde(default)]
    recent_accepted_passwords: Vec<String>,
    #[zeroize(skip)]
    #[serde(default)]
    service_state: Option<Value>,
}

/// JSON file backing both [`CredentialStore`] and [`OtpSecretStore`].
///
/// Every change is written to a sibling temp file and renamed over the
/// original before the in-memory copy is updated, so a failed write leaves
/// both unchanged.
pub struct FileStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl FileStore {
    /// Open `path`, starting empty if it does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let document = if path.exists() {
            let content = std::fs::read(&path)?;
            serde_json::from_slice(&content)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e)))?
        } else {
            tracing::debug!(path = %path.display(), "State file not found, starting empty");
            StoreDocument::default()
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreDocument>, StoreError> {
        self.document
            .lock()
            .map_err(|_| StoreError::LockPoisoned("file store".to_string()))
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> Option<T> {
        match self.lock() {
            Ok(document) => Some(f(&document)),
            Err(e) => {
                tracing::error!("Could not read file store: {}", e);
                None
            }
        }
    }

    fn update(&self, f: impl FnOnce(&mut StoreDocument)) -> Result<(), StoreError> {
        let mut document = self.lock()?;
        let mut next = document.clone();
        f(&mut next);
        self.write(&next)?;
        *document = next;
        Ok(())
    }

    fn write(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_vec_pretty(document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Host state blob, see `NightscoutService::raw_state`.
    pub fn service_state(&self) -> Option<Value> {
        self.read(|document| document.service_state.clone()).flatten()
    }

    pub fn set_service_state(&self, state: Option<Value>) -> Result<(), StoreError> {
        self.update(|document| document.service_state = state)
    }
}

impl CredentialStore for FileStore {
    fn get_credentials(&self) -> Result<Credentials, StoreError> {
        let document = self.lock()?;
        match (&document.site_url, &document.api_secret) {
            (Some(site_url), Some(api_secret)) => {
                Ok(Credentials::new(site_url.clone(), api_secret.clone()))
            }
            _ => Err(StoreError::NotConfigured),
        }
    }

    fn set_credentials(&self, credentials: Option<&Credentials>) -> Result<(), StoreError> {
        self.update(|document| {
            document.site_url = credentials.map(|c| c.site_url.clone());
            document.api_secret = credentials.map(|c| c.api_secret.clone());
        })
    }
}

impl OtpSecretStore for FileStore {
    fn token_secret_key(&self) -> Option<String> {
        self.read(|document| document.otp_secret_key.clone())
            .flatten()
    }

    fn set_token_secret_key(&self, key: Option<&str>) -> Result<(), StoreError> {
        self.update(|document| document.otp_secret_key = key.map(str::to_string))
    }

    fn token_secret_key_name(&self) -> Option<String> {
        self.read(|document| document.otp_key_name.clone()).flatten()
    }

    fn set_token_secret_key_name(&self, name: Option<&str>) -> Result<(), StoreError> {
        self.update(|document| document.otp_key_name = name.map(str::to_string))
    }

    fn recent_accepted_passwords(&self) -> Vec<String> {
        self.read(|document| document.recent_accepted_passwords.clone())
            .unwrap_or_default()
    }

    fn set_recent_accepted_passwords(&self, passwords: &[String]) -> Result<(), StoreError> {
        self.update(|document| document.recent_accepted_passwords = passwords.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_test_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join("nightscout_test_file_store")
            .join(uuid::Uuid::new_v4().to_string());
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = make_test_dir();
        let store = FileStore::open(dir.join("state.json")).unwrap();

        assert!(store.token_secret_key().is_none());
        assert!(store.recent_accepted_passwords().is_empty());
        assert!(matches!(
            store.get_credentials(),
            Err(StoreError::NotConfigured)
        ));
        assert!(!store.path().exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = make_test_dir();
        let path = dir.join("nested").join("state.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set_token_secret_key(Some("SECRET")).unwrap();
            store.set_token_secret_key_name(Some("1700000000000")).unwrap();
            store
                .set_recent_accepted_passwords(&["111111".to_string(), "222222".to_string()])
                .unwrap();
            store
                .set_credentials(Some(&Credentials::new("https://ns.example.com", "secret")))
                .unwrap();
            store
                .set_service_state(Some(json!({ "objectIdCache": {} })))
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.token_secret_key().as_deref(), Some("SECRET"));
        assert_eq!(
            store.token_secret_key_name().as_deref(),
            Some("1700000000000")
        );
        assert_eq!(store.recent_accepted_passwords(), vec!["111111", "222222"]);
        assert_eq!(
            store.get_credentials().unwrap().site_url,
            "https://ns.example.com"
        );
        assert_eq!(
            store.service_state(),
            Some(json!({ "objectIdCache": {} }))
        );
        assert!(!path.with_extension("json.tmp").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clearing_credentials() {
        let dir = make_test_dir();
        let store = FileStore::open(dir.join("state.json")).unwrap();
        store
            .set_credentials(Some(&Credentials::new("https://ns.example.com", "secret")))
            .unwrap();
        store.set_credentials(None).unwrap();
        assert!(matches!(
            store.get_credentials(),
            Err(StoreError::NotConfigured)
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = make_test_dir();
        let path = dir.join("state.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StoreError::Serialization(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
