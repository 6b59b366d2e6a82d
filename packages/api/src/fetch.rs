//! Reading picked photos: `http(s)` URLs over the network, `file://` URIs and
//! plain paths from disk.

use std::path::PathBuf;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use store::photos::{content_type_for_extension, extension_from_uri};
use store::{FetchedResource, ResourceFetcher};

#[derive(Clone, Debug, Default)]
pub struct LocalResourceFetcher {
    http: Client,
}

/// Where a URI points.
#[derive(Debug, PartialEq)]
enum Location {
    Remote(String),
    Disk(PathBuf),
}

fn locate(uri: &str) -> Result<Location, String> {
    match Url::parse(uri) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Location::Remote(uri.to_string())),
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map(Location::Disk)
            .map_err(|_| format!("{uri}: not a local file")),
        _ => Ok(Location::Disk(PathBuf::from(uri))),
    }
}

impl LocalResourceFetcher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResourceFetcher for LocalResourceFetcher {
    async fn fetch(&self, uri: &str) -> Result<FetchedResource, String> {
        match locate(uri)? {
            Location::Remote(url) => {
                let response = self
                    .http
                    .get(&url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| e.to_string())?;
                let content_type = response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(String::from);
                let bytes = response.bytes().await.map_err(|e| e.to_string())?;
                Ok(FetchedResource {
                    bytes: bytes.to_vec(),
                    content_type,
                })
            }
            Location::Disk(path) => {
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| format!("{}: {}", path.display(), e))?;
                let content_type = extension_from_uri(uri)
                    .and_then(|ext| content_type_for_extension(&ext))
                    .map(String::from);
                Ok(FetchedResource { bytes, content_type })
            }
        }
    }
}
