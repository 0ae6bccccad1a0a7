//! HTTP transport for the Nightscout REST v1 API.

use crate::upload::models::{DeviceStatus, GlucoseEntry, ProfileSet, Treatment};
use crate::upload::transport::NightscoutTransport;
use crate::upload::TransportError;
use async_trait::async_trait;
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

/// Nightscout authenticates v1 requests with the SHA-1 of the API secret.
pub fn hash_api_secret(api_secret: &str) -> String {
    HEXLOWER.encode(&Sha1::digest(api_secret.as_bytes()))
}

#[derive(Deserialize)]
struct CreatedObject {
    #[serde(rename = "_id")]
    id: String,
}

/// `reqwest`-backed [`NightscoutTransport`].
pub struct NightscoutClient {
    client: reqwest::Client,
    site_url: String,
    api_secret_hash: Zeroizing<String>,
}

impl NightscoutClient {
    pub fn new(site_url: &str, api_secret: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            site_url: site_url.trim_end_matches('/').to_string(),
            api_secret_hash: Zeroizing::new(hash_api_secret(api_secret)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.site_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, TransportError> {
        let response = request
            .header("api-secret", self.api_secret_hash.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(path, "POST");
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Vec<u8>, TransportError> {
        tracing::debug!(path, "PUT");
        self.send(self.client.put(self.url(path)).json(body)).await
    }
}

#[async_trait]
impl NightscoutTransport for NightscoutClient {
    async fn check_auth(&self) -> Result<(), TransportError> {
        let path = "/api/v1/experiments/test";
        self.send(self.client.get(self.url(path))).await?;
        Ok(())
    }

    async fn create_treatments(
        &self,
        treatments: &[Treatment],
    ) -> Result<Vec<String>, TransportError> {
        if treatments.is_empty() {
            return Ok(Vec::new());
        }

        let response = self.post_json("/api/v1/treatments.json", treatments).await?;
        let created: Vec<CreatedObject> = serde_json::from_slice(&response).map_err(|e| {
            TransportError::InvalidResponse(format!("Invalid treatments response: {}", e))
        })?;
        Ok(created.into_iter().map(|object| object.id).collect())
    }

    async fn update_treatments(&self, treatments: &[Treatment]) -> Result<(), TransportError> {
        // v1 PUT replaces a single document, matched by `_id`.
        for treatment in treatments {
            self.put_json("/api/v1/treatments.json", treatment).await?;
        }
        Ok(())
    }

    async fn delete_treatments_by_object_id(
        &self,
        object_ids: &[String],
    ) -> Result<(), TransportError> {
        for object_id in object_ids {
            let path = format!("/api/v1/treatments/{}", object_id);
            tracing::debug!(path = %path, "DELETE");
            self.send(self.client.delete(self.url(&path))).await?;
        }
        Ok(())
    }

    async fn upload_entries(&self, entries: &[GlucoseEntry]) -> Result<(), TransportError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.post_json("/api/v1/entries.json", entries).await?;
        Ok(())
    }

    async fn upload_device_status(&self, statuses: &[DeviceStatus]) -> Result<(), TransportError> {
        if statuses.is_empty() {
            return Ok(());
        }
        self.post_json("/api/v1/devicestatus.json", statuses).await?;
        Ok(())
    }

    async fn upload_profiles(&self, profiles: &[ProfileSet]) -> Result<(), TransportError> {
        for profile in profiles {
            self.post_json("/api/v1/profile.json", profile).await?;
        }
        Ok(())
    }
}
