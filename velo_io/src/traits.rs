//! Mockable I/O seams: HTTP and filesystem access behind traits, so the
//! install pipeline can be exercised in tests without a real network or
//! disk. Grounded in the teacher's `traits.rs`.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::path::Path;
use velo_core::Error;

/// A response body as it arrives off the wire: the declared content length
/// (if the server sent one) and a stream of chunks, so a caller can hash
/// and write each chunk to disk as it's read instead of buffering the
/// whole body in memory first (spec §4.5: "HTTP GET with streaming to
/// dest_path").
pub struct DownloadStream {
    pub total_bytes: Option<u64>,
    pub body: BoxStream<'static, Result<Vec<u8>, Error>>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get_stream(&self, url: &str) -> Result<DownloadStream, Error>;
}

#[cfg_attr(test, mockall::automock)]
pub trait FileSystem: Send + Sync {
    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>>;
    fn create_dir_all(&self, path: &Path) -> std::io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;
}

pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("velo/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(10)
            .build()
            .expect("reqwest client configuration is valid");
        ReqwestHttpClient { client }
    }

    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        ReqwestHttpClient::new()
    }
}

/// Maps a non-success HTTP status per spec §4.5: 401/403/404 at the blob
/// endpoint are terminal (`BottleNotAccessible`, never retried); anything
/// else (5xx, 429, ...) is a transient transport failure the registry
/// client's retry loop can still recover from.
fn map_status_error(url: &str, status: reqwest::StatusCode) -> Error {
    match status.as_u16() {
        401 | 403 | 404 => Error::BottleNotAccessible {
            url: url.to_string(),
            reason: format!("HTTP {status}"),
        },
        _ => Error::DownloadFailed {
            name: url.to_string(),
            cause: format!("HTTP {status}"),
        },
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_stream(&self, url: &str) -> Result<DownloadStream, Error> {
        let response = self.client.get(url).send().await.map_err(|e| Error::DownloadFailed {
            name: url.to_string(),
            cause: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(map_status_error(url, response.status()));
        }

        let total_bytes = response.content_length();
        let url = url.to_string();
        let body = response.bytes_stream().map(move |chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(|e| Error::DownloadFailed {
                name: url.clone(),
                cause: format!("failed to read chunk: {e}"),
            })
        });

        Ok(DownloadStream { total_bytes, body: Box::pin(body) })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn write(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        std::fs::write(path, contents)
    }

    fn read(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        if path.exists() {
            std::fs::remove_dir_all(path)
        } else {
            Ok(())
        }
    }
}
