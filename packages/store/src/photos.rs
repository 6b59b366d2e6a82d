//! # Photo upload pipeline
//!
//! Turns a local image reference (a picker URI, a file path or a remote URL)
//! into a public URL in object storage:
//!
//! 1. read the bytes through a [`ResourceFetcher`];
//! 2. take the content type from the fetch, else `image/jpeg`;
//! 3. take the extension from the URI, else from the content type, else `jpg`;
//! 4. upload under `{owner}/{timestamp_millis}-{random}.{ext}`;
//! 5. return the public URL of that key.
//!
//! A failure in step 1 is [`Error::PhotoRead`]; a rejection in step 4 is
//! [`Error::PhotoUpload`].

use std::future::Future;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::backend::ObjectStorage;
use crate::error::{Error, Result};

pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Raw bytes of a local resource and the content type it was served with.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchedResource {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Reads the bytes behind a local or remote URI.
pub trait ResourceFetcher {
    fn fetch(&self, uri: &str) -> impl Future<Output = std::result::Result<FetchedResource, String>>;
}

/// Extension after the final dot anywhere in the URI: 2 to 4 ASCII alphanumerics,
/// query string ignored, lowercased. A bare host such as `https://host.io` yields `io`.
pub fn extension_from_uri(uri: &str) -> Option<String> {
    let clean = uri.split('?').next().unwrap_or_default();
    let (_, ext) = clean.rsplit_once('.')?;
    let valid = (2..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Extension for the stored object.
pub fn extension_for(uri: &str, content_type: &str) -> String {
    if let Some(ext) = extension_from_uri(uri) {
        return ext;
    }
    content_type
        .split(';')
        .next()
        .and_then(|mime| mime.rsplit('/').next())
        .map(str::trim)
        .filter(|sub| !sub.is_empty())
        .unwrap_or("jpg")
        .to_string()
}

/// Content type for a file extension, used when reading from disk.
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

pub fn storage_key(owner: &str, timestamp_millis: i64, random: &str, ext: &str) -> String {
    format!("{owner}/{timestamp_millis}-{random}.{ext}")
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}

/// Uploads photos into one storage bucket.
#[derive(Clone, Debug)]
pub struct PhotoUploader<S, F> {
    storage: S,
    fetcher: F,
    bucket: String,
}

impl<S: ObjectStorage, F: ResourceFetcher> PhotoUploader<S, F> {
    pub fn new(storage: S, fetcher: F, bucket: impl Into<String>) -> Self {
        Self {
            storage,
            fetcher,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload the resource at `local_uri` under `owner_segment/` and return its public URL.
    pub async fn upload(&self, local_uri: &str, owner_segment: &str) -> Result<String> {
        let resource = self.fetcher.fetch(local_uri).await.map_err(|e| {
            tracing::error!(uri = local_uri, error = %e, "failed to read photo");
            Error::PhotoRead(e)
        })?;

        let content_type = resource
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        let ext = extension_for(local_uri, &content_type);
        let key = storage_key(
            owner_segment,
            chrono::Utc::now().timestamp_millis(),
            &random_suffix(),
            &ext,
        );

        self.storage
            .upload(&self.bucket, &key, resource.bytes, &content_type)
            .await
            .map_err(|e| {
                tracing::error!(key = %key, error = %e, "photo upload rejected");
                Error::PhotoUpload(e.user_message())
            })?;

        tracing::debug!(key = %key, "photo uploaded");
        self.storage.public_url(&self.bucket, &key)
    }
}
