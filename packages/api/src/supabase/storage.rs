//! Object storage for note photos.

use reqwest::Method;
use store::{ObjectStorage, Result};

use super::{send, SupabaseBackend};

/// Percent-encode each path segment of a key, keeping the `/` separators.
fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment))
        .collect::<Vec<_>>()
        .join("/")
}

impl ObjectStorage for SupabaseBackend {
    async fn upload(&self, bucket: &str, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        let path = format!("/storage/v1/object/{bucket}/{}", encode_key(key));
        let request = self
            .request(Method::POST, &path)?
            .header("Content-Type", content_type)
            .header("x-upsert", "false")
            .body(bytes);
        send(request, "upload").await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, key: &str) -> Result<String> {
        let credentials = self.credentials()?;
        Ok(format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            credentials.url,
            encode_key(key)
        ))
    }
}
