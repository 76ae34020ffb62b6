//! Google Drive driver. Uses the Drive `changes` API's page
//! token for incremental runs, plus a per-file checksum (`md5Checksum`)
//! map because Drive reports metadata-only changes (renames, permission
//! changes) through the same feed as content changes — the checksum map
//! lets the pipeline's hash-based dedup do the real work of deciding
//! whether content actually changed.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{EntityKind, GoogleDriveFileFields};
use weave_types::{ConnectionId, Cursor, Entity, FileAttributes};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const API_BASE: &str = "https://www.googleapis.com/drive/v3";

#[derive(Debug, Deserialize)]
struct StartPageTokenResponse {
    #[serde(rename = "startPageToken")]
    start_page_token: String,
}

#[derive(Debug, Deserialize)]
struct ChangesResponse {
    changes: Vec<Change>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "newStartPageToken")]
    new_start_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(rename = "fileId")]
    file_id: String,
    removed: bool,
    file: Option<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    name: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    #[serde(rename = "md5Checksum")]
    md5_checksum: Option<String>,
    size: Option<String>,
    #[serde(rename = "webContentLink")]
    web_content_link: Option<String>,
}

struct Inner {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    rate_limiter: Option<Arc<SourceRateLimiter>>,
    connection_id: ConnectionId,
    refresh_token: String,
}

impl Inner {
    async fn token(&self) -> Result<String> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.check_and_record().await.map_err(SourceError::Token)?;
        }
        self.tokens
            .get_token(self.connection_id, &self.refresh_token)
            .await
            .map_err(SourceError::Token)
    }
}

pub struct GoogleDriveDriver {
    inner: Arc<Inner>,
}

impl GoogleDriveDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                tokens,
                rate_limiter,
                connection_id,
                refresh_token,
            }),
        }
    }
}

#[async_trait]
impl SourceDriver for GoogleDriveDriver {
    fn short_name(&self) -> &'static str {
        "google_drive"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let (page_token, checksums) = match cursor {
            Some(Cursor::GoogleDriveChanges { page_token, checksums }) => (Some(page_token), checksums),
            _ => (None, BTreeMap::new()),
        };
        let inner = self.inner.clone();
        stream_from_future(async move {
            let mut page_token = match page_token {
                Some(t) => t,
                None => {
                    let token = match inner.token().await {
                        Ok(t) => t,
                        Err(e) => return vec![Err(e)],
                    };
                    let url = format!("{API_BASE}/changes/startPageToken");
                    let resp = match inner.client.get(&url).bearer_auth(token).send().await {
                        Ok(r) => r,
                        Err(e) => return vec![Err(e.into())],
                    };
                    match resp.json::<StartPageTokenResponse>().await {
                        Ok(r) => r.start_page_token,
                        Err(e) => return vec![Err(e.into())],
                    }
                }
            };

            let mut events = Vec::new();
            let mut checksums = checksums;
            let mut final_token = page_token.clone();

            loop {
                let token = match inner.token().await {
                    Ok(t) => t,
                    Err(e) => return vec![Err(e)],
                };
                let url = format!(
                    "{API_BASE}/changes?pageToken={page_token}&fields=nextPageToken,newStartPageToken,changes(fileId,removed,file(name,mimeType,md5Checksum,size,webContentLink))"
                );
                let resp = match inner.client.get(&url).bearer_auth(token).send().await {
                    Ok(r) => r,
                    Err(e) => return vec![Err(e.into())],
                };
                let page: ChangesResponse = match resp.json().await {
                    Ok(p) => p,
                    Err(e) => return vec![Err(e.into())],
                };

                for change in page.changes {
                    if change.removed {
                        checksums.remove(&change.file_id);
                        events.push(Ok(SourceEvent::Deletion(change.file_id)));
                        continue;
                    }
                    let Some(file) = change.file else { continue };
                    let unchanged = file
                        .md5_checksum
                        .as_ref()
                        .is_some_and(|sum| checksums.get(&change.file_id) == Some(sum));
                    if unchanged {
                        continue;
                    }
                    if let Some(sum) = &file.md5_checksum {
                        checksums.insert(change.file_id.clone(), sum.clone());
                    }
                    let fields = GoogleDriveFileFields {
                        file_id: change.file_id.clone(),
                        checksum: file.md5_checksum,
                    };
                    let mut entity = Entity::new(change.file_id, "google_drive", EntityKind::GoogleDriveFile(fields));
                    entity.name = file.name;
                    entity.file = Some(FileAttributes {
                        url: file.web_content_link,
                        size: file.size.and_then(|s| s.parse().ok()),
                        mime_type: file.mime_type,
                        local_path: None,
                    });
                    events.push(Ok(SourceEvent::Entity(entity)));
                }

                if let Some(new_start) = page.new_start_page_token {
                    final_token = new_start;
                    break;
                }
                match page.next_page_token {
                    Some(next) => page_token = next,
                    None => break,
                }
            }

            events.push(Ok(SourceEvent::CursorUpdate(Cursor::GoogleDriveChanges {
                page_token: final_token,
                checksums,
            })));
            events
        })
    }
}
