//! Content-Addressed Store Client
//!
//! The pipeline depends only on this trait: `put` returns an opaque
//! content identifier, `write_namespace` mirrors the artifact under a
//! store-side logical path. Retries are owned by the pipeline, not the
//! client.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store protocol error: {0}")]
    Protocol(String),
}

pub trait ContentStore {
    /// Upload bytes, returning the store's content identifier.
    fn put(&self, filename: &str, bytes: &[u8]) -> Result<String, StoreError>;

    /// Mirror bytes under a logical path in the store's namespace.
    fn write_namespace(&self, logical_path: &str, bytes: &[u8]) -> Result<(), StoreError>;
}

/// Blocking HTTP client against a local IPFS-style node API.
pub struct HttpContentStore {
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl HttpContentStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    fn upload_form(filename: &str, bytes: &[u8]) -> reqwest::blocking::multipart::Form {
        let part = reqwest::blocking::multipart::Part::bytes(bytes.to_vec())
            .file_name(filename.to_string());
        reqwest::blocking::multipart::Form::new().part("file", part)
    }
}

impl ContentStore for HttpContentStore {
    fn put(&self, filename: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let response = self
            .client
            .post(format!("{}/api/v0/add", self.base_url))
            .multipart(Self::upload_form(filename, bytes))
            .send()?
            .error_for_status()?;
        let parsed: AddResponse = response
            .json()
            .map_err(|e| StoreError::Protocol(format!("malformed add response: {e}")))?;
        Ok(parsed.hash)
    }

    fn write_namespace(&self, logical_path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.client
            .post(format!("{}/api/v0/files/write", self.base_url))
            .query(&[
                ("arg", logical_path),
                ("create", "true"),
                ("parents", "true"),
            ])
            .multipart(Self::upload_form("data", bytes))
            .send()?
            .error_for_status()?;
        Ok(())
    }
}
