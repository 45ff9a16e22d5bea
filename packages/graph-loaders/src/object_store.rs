//! Object-store collaborator (§2 "Object store", §6 "Object store").
//!
//! The real backend (S3-shaped bucket) is out of scope (§1); this trait is
//! the seam the rest of the pipeline codes against, grounded in the
//! `CrawlerStorage` trait shape from `intelligent-crawler` (async-trait,
//! associated `Error`, explicit key-based operations).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("object store I/O error: {0}")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, ObjectStoreError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// HEAD: size in bytes, without fetching the body.
    async fn head(&self, key: &str) -> Result<u64>;

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn put(&self, dir: &str, base_name: &str, bytes: Vec<u8>) -> Result<String>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Joins a directory and a base file name the way `put` keys objects
/// (§4.2: "write clean text to the object store as `<dir>/<basename>.txt`").
pub fn text_key(dir: &str, base_name: &str) -> String {
    format!("{}/{}.txt", dir.trim_end_matches('/'), base_name)
}

/// Excel sheet output key (§4.2: "one file per sheet named
/// `<basename>_<sheet>.txt`").
pub fn sheet_text_key(dir: &str, base_name: &str, sheet_name: &str) -> String {
    format!(
        "{}/{}_{}.txt",
        dir.trim_end_matches('/'),
        base_name,
        sheet_name
    )
}

/// An in-memory object store, useful for tests and for the single-process
/// deployment shape; real deployments swap this for an S3-backed impl
/// without changing any caller.
#[derive(Default, Clone)]
pub struct InMemoryObjectStore {
    objects: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn head(&self, key: &str) -> Result<u64> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|v| v.len() as u64)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn put(&self, dir: &str, base_name: &str, bytes: Vec<u8>) -> Result<String> {
        let key = text_key(dir, base_name);
        self.objects.write().await.insert(key.clone(), bytes);
        Ok(key)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().await.remove(key);
        Ok(())
    }
}
