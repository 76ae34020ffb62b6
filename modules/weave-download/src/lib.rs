//! File downloader: scoped to a single sync job, streams
//! remote file bodies to a job-local temp directory and sets
//! `entity.file.local_path`. Uses the same semaphore/retry-with-backoff
//! shape as other bounded-concurrency fetchers in this workspace,
//! generalized from "fetch a page" to "stream a file to disk."
//!
//! A `Downloader` owns no process-wide state: it is constructed per sync
//! job with a `sync_job_id`-scoped temp directory and dropped (along with
//! its directory) at the end of that job via `cleanup_sync_directory`.

mod error;

pub use error::{DownloadError, Result};

use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use weave_types::Entity;

/// Probe (HEAD) timeout.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
/// Connect timeout for the streaming GET.
const DOWNLOAD_CONNECT_TIMEOUT: Duration = Duration::from_secs(180);
/// Read timeout for the streaming GET.
const DOWNLOAD_READ_TIMEOUT: Duration = Duration::from_secs(540);

/// Hard size cap: files larger than this are skipped, not downloaded.
pub const MAX_FILE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

const MAX_ATTEMPTS: u32 = 10;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Extensions the pipeline knows how to convert downstream;
/// anything else is rejected before a byte is fetched.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "html", "htm", "xlsx", "csv", "json", "xml", "txt", "md", "yaml", "yml", "toml", "pdf",
    "docx", "pptx", "png", "jpg", "jpeg", "gif", "webp",
];

/// Reason a file was skipped rather than downloaded, reported to the
/// pipeline so it can increment the skipped counter with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedExtension,
    TooLarge { size: u64 },
}

pub enum DownloadOutcome {
    Downloaded { local_path: PathBuf, size: u64 },
    Skipped(SkipReason),
}

/// Streams an HTTP response down to disk on behalf of one sync job.
pub struct Downloader {
    client: reqwest::Client,
    probe_client: reqwest::Client,
    job_dir: PathBuf,
}

impl Downloader {
    /// `tmp_root` is the shared temp area (e.g. `/tmp`); the downloader
    /// creates and owns `{tmp_root}/processing/{sync_job_id}/`.
    pub async fn new(tmp_root: &Path, sync_job_id: impl std::fmt::Display) -> Result<Self> {
        let job_dir = tmp_root.join("processing").join(sync_job_id.to_string());
        tokio::fs::create_dir_all(&job_dir).await?;
        let client = reqwest::Client::builder()
            .connect_timeout(DOWNLOAD_CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_READ_TIMEOUT)
            .build()?;
        let probe_client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            probe_client,
            job_dir,
        })
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    fn extension_of(url: &str) -> Option<String> {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.path_segments().and_then(|mut s| s.next_back().map(str::to_string)))
            .or_else(|| Some(url.to_string()))
            .and_then(|name| Path::new(&name).extension().map(|e| e.to_string_lossy().to_lowercase()))
    }

    /// Pre-signed URLs (S3-style) carry their own auth in the query
    /// string; attaching a bearer header on top confuses some signers.
    fn is_presigned(url: &str) -> bool {
        url.contains("X-Amz-Algorithm")
    }

    /// Downloads `entity`'s file body (extension check, size probe,
    /// streamed GET, retry-on-429), setting
    /// `entity.file.local_path` on success. `access_token` is only
    /// attached when the URL is not pre-signed.
    pub async fn download_from_url(&self, entity: &mut Entity, url: &str, access_token: Option<&str>) -> Result<DownloadOutcome> {
        let extension = Self::extension_of(url);
        match &extension {
            Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => {}
            _ => return Ok(DownloadOutcome::Skipped(SkipReason::UnsupportedExtension)),
        }
        let extension = extension.unwrap();

        if let Some(size) = self.probe_size(url, access_token).await {
            if size > MAX_FILE_SIZE_BYTES {
                return Ok(DownloadOutcome::Skipped(SkipReason::TooLarge { size }));
            }
        }

        let dest = self.job_dir.join(format!("{}.{extension}", sanitize_filename(&entity.entity_id)));
        match self.stream_with_retries(url, access_token, &dest).await {
            Ok(size) => {
                let file = entity.file.get_or_insert_with(Default::default);
                file.local_path = Some(dest.clone());
                file.size = Some(size);
                Ok(DownloadOutcome::Downloaded { local_path: dest, size })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dest).await;
                Err(e)
            }
        }
    }

    /// Explicit-extension API for bytes already in memory: raises rather than skips, since the caller chose
    /// the filename deliberately.
    pub async fn save_bytes(&self, entity: &mut Entity, content: Bytes, filename_with_extension: &str) -> Result<PathBuf> {
        let extension = Path::new(filename_with_extension)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .ok_or_else(|| DownloadError::MissingExtension(filename_with_extension.to_string()))?;
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(DownloadError::UnsupportedExtension(Some(extension)));
        }
        if content.len() as u64 > MAX_FILE_SIZE_BYTES {
            return Err(DownloadError::TooLarge {
                size: content.len() as u64,
                limit: MAX_FILE_SIZE_BYTES,
            });
        }
        let dest = self.job_dir.join(sanitize_filename(filename_with_extension));
        tokio::fs::write(&dest, &content).await?;
        let file = entity.file.get_or_insert_with(Default::default);
        file.local_path = Some(dest.clone());
        file.size = Some(content.len() as u64);
        Ok(dest)
    }

    /// Best-effort recursive delete of the job's temp directory, called
    /// from the orchestrator's terminal cleanup path regardless of job
    /// outcome.
    pub async fn cleanup_sync_directory(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.job_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(dir = %self.job_dir.display(), error = %e, "failed to clean up sync temp directory");
            }
        }
    }

    async fn probe_size(&self, url: &str, access_token: Option<&str>) -> Option<u64> {
        let mut req = self.probe_client.head(url);
        if !Self::is_presigned(url) {
            if let Some(token) = access_token {
                req = req.bearer_auth(token);
            }
        }
        match req.send().await {
            Ok(resp) if resp.status().is_success() => resp.content_length(),
            // Servers that don't support HEAD are tolerated: no size check, the
            // streaming GET below still enforces the cap as bytes arrive.
            _ => None,
        }
    }

    async fn stream_with_retries(&self, url: &str, access_token: Option<&str>, dest: &Path) -> Result<u64> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.stream_once(url, access_token, dest).await {
                Ok(size) => return Ok(size),
                Err(DownloadError::Http(e)) if e.status().map(|s| s.as_u16()) == Some(429) && attempt < MAX_ATTEMPTS => {
                    let backoff = RETRY_BASE * 2u32.pow(attempt.min(8));
                    let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                    debug!(url, attempt, "download rate-limited, retrying after backoff");
                    tokio::time::sleep(backoff + jitter).await;
                }
                Err(e) => return Err(DownloadError::RetriesExhausted {
                    url: url.to_string(),
                    detail: e.to_string(),
                }),
            }
        }
    }

    async fn stream_once(&self, url: &str, access_token: Option<&str>, dest: &Path) -> Result<u64> {
        let mut req = self.client.get(url);
        if !Self::is_presigned(url) {
            if let Some(token) = access_token {
                req = req.bearer_auth(token);
            }
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(resp.error_for_status().unwrap_err().into());
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = resp.bytes_stream();
        let mut total: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            total += chunk.len() as u64;
            if total > MAX_FILE_SIZE_BYTES {
                drop(file);
                let _ = tokio::fs::remove_file(dest).await;
                return Err(DownloadError::TooLarge {
                    size: total,
                    limit: MAX_FILE_SIZE_BYTES,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(total)
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::entity::{DeletionAttributes, DeletionStatus};
    use weave_types::EntityKind;

    fn deletion_entity() -> Entity {
        let mut e = Entity::new("file-1", "google_drive", EntityKind::Deletion);
        e.deletion = Some(DeletionAttributes { deletion_status: DeletionStatus::Deleted });
        e
    }

    #[tokio::test]
    async fn rejects_unsupported_extension_without_a_network_call() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = Downloader::new(tmp.path(), "job-1").await.unwrap();
        let mut entity = deletion_entity();
        let outcome = dl
            .download_from_url(&mut entity, "https://example.com/file.exe", None)
            .await
            .unwrap();
        assert!(matches!(outcome, DownloadOutcome::Skipped(SkipReason::UnsupportedExtension)));
    }

    #[tokio::test]
    async fn save_bytes_rejects_missing_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = Downloader::new(tmp.path(), "job-2").await.unwrap();
        let mut entity = deletion_entity();
        let err = dl.save_bytes(&mut entity, Bytes::from_static(b"hi"), "no-extension").await.unwrap_err();
        assert!(matches!(err, DownloadError::MissingExtension(_)));
    }

    #[tokio::test]
    async fn save_bytes_sets_local_path_on_success() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = Downloader::new(tmp.path(), "job-3").await.unwrap();
        let mut entity = deletion_entity();
        let path = dl.save_bytes(&mut entity, Bytes::from_static(b"hello"), "notes.txt").await.unwrap();
        assert!(path.exists());
        assert_eq!(entity.file.as_ref().unwrap().local_path.as_ref().unwrap(), &path);
    }

    #[tokio::test]
    async fn cleanup_removes_job_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = Downloader::new(tmp.path(), "job-4").await.unwrap();
        let mut entity = deletion_entity();
        dl.save_bytes(&mut entity, Bytes::from_static(b"hi"), "a.txt").await.unwrap();
        dl.cleanup_sync_directory().await;
        assert!(!dl.job_dir().exists());
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_when_directory_already_gone() {
        let tmp = tempfile::tempdir().unwrap();
        let dl = Downloader::new(tmp.path(), "job-5").await.unwrap();
        dl.cleanup_sync_directory().await;
        dl.cleanup_sync_directory().await;
    }
}
