//! Outlook mail driver. One delta query per mail folder —
//! each folder's `@odata.deltaLink` is independent, so the cursor is a
//! map of folder id to its last delta link (spec's
//! `Cursor::OutlookFolderDeltaLinks`). A cold cursor starts every folder
//! at `/messages/delta` with no link.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{EntityKind, OutlookMailMessageFields};
use weave_types::{ConnectionId, Cursor, Entity};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

#[derive(Debug, Deserialize)]
struct DeltaResponse {
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    subject: Option<String>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    from: Option<GraphFrom>,
    #[serde(rename = "hasAttachments")]
    has_attachments: Option<bool>,
    #[serde(rename = "@removed")]
    removed: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphFrom {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}
#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    address: Option<String>,
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

    async fn sync_folder(&self, folder_id: &str, delta_link: Option<&str>) -> Result<(Vec<SourceEvent>, String)> {
        let mut events = Vec::new();
        let mut url = delta_link
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("{GRAPH_BASE}/me/mailFolders/{folder_id}/messages/delta"));
        let mut last_delta_link = delta_link.map(|s| s.to_string());

        loop {
            let token = self.token().await?;
            let resp = self.client.get(&url).bearer_auth(token).send().await?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(SourceError::UnexpectedResponse {
                    source: "outlook",
                    detail: format!("{status}: {body}"),
                });
            }
            let page: DeltaResponse = resp.json().await?;

            for msg in page.value {
                if msg.removed.is_some() {
                    events.push(SourceEvent::Deletion(msg.id));
                    continue;
                }
                let fields = OutlookMailMessageFields {
                    message_id: msg.id.clone(),
                    subject: msg.subject.clone().unwrap_or_default(),
                    body_preview: msg.body_preview.unwrap_or_default(),
                    from_address: msg.from.and_then(|f| f.email_address.address),
                    folder_id: folder_id.to_string(),
                    has_attachments: msg.has_attachments.unwrap_or(false),
                };
                let mut entity = Entity::new(msg.id, "outlook", EntityKind::OutlookMailMessage(fields));
                entity.name = msg.subject;
                events.push(SourceEvent::Entity(entity));
            }

            if let Some(delta) = page.delta_link {
                last_delta_link = Some(delta);
                break;
            }
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }

        Ok((events, last_delta_link.unwrap_or(url)))
    }
}

pub struct OutlookMailDriver {
    inner: Arc<Inner>,
    folder_ids: Vec<String>,
}

impl OutlookMailDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
        folder_ids: Vec<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                tokens,
                rate_limiter,
                connection_id,
                refresh_token,
            }),
            folder_ids,
        }
    }
}

#[async_trait]
impl SourceDriver for OutlookMailDriver {
    fn short_name(&self) -> &'static str {
        "outlook_mail"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let delta_links = match cursor {
            Some(Cursor::OutlookFolderDeltaLinks(map)) => map,
            _ => BTreeMap::new(),
        };
        let inner = self.inner.clone();
        let folder_ids = self.folder_ids.clone();
        stream_from_future(async move {
            let mut events = Vec::new();
            let mut next_links = delta_links.clone();
            for folder_id in &folder_ids {
                let existing = delta_links.get(folder_id).map(|s| s.as_str());
                match inner.sync_folder(folder_id, existing).await {
                    Ok((folder_events, new_link)) => {
                        events.extend(folder_events.into_iter().map(Ok));
                        next_links.insert(folder_id.clone(), new_link);
                    }
                    Err(e) => return vec![Err(e)],
                }
            }
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::OutlookFolderDeltaLinks(next_links))));
            events
        })
    }
}
