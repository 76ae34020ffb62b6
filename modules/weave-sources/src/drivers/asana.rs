//! Asana driver. Paginates `GET /tasks` and `GET /projects`
//! per workspace with `limit`/`offset`, keyed off a `modified_since`
//! filter stored per-resource in `Cursor::LastModified`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use serde::Deserialize;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{AsanaProjectFields, AsanaTaskFields, EntityKind};
use weave_types::{ConnectionId, Cursor, Entity};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const BASE_URL: &str = "https://app.asana.com/api/1.0";
const PAGE_SIZE: u32 = 100;

pub struct AsanaDriver {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    rate_limiter: Option<Arc<SourceRateLimiter>>,
    connection_id: ConnectionId,
    refresh_token: String,
    workspace_gid: String,
}

impl AsanaDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
        workspace_gid: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            rate_limiter,
            connection_id,
            refresh_token,
            workspace_gid,
        }
    }

    async fn authed_get<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        if let Some(limiter) = &self.rate_limiter {
            limiter
                .check_and_record()
                .await
                .map_err(SourceError::Token)?;
        }
        let token = self
            .tokens
            .get_token(self.connection_id, &self.refresh_token)
            .await
            .map_err(SourceError::Token)?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::UnexpectedResponse {
                source: "asana",
                detail: format!("{status}: {body}"),
            });
        }
        Ok(resp.json().await?)
    }

    async fn fetch_projects(&self, modified_since: Option<&str>) -> Result<Vec<SourceEvent>> {
        let mut events = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut url = format!(
                "{BASE_URL}/projects?workspace={}&limit={PAGE_SIZE}&opt_fields=gid,name,notes,current_status.title,archived,permalink_url,workspace.name",
                self.workspace_gid
            );
            if let Some(since) = modified_since {
                url.push_str(&format!("&modified_since={since}"));
            }
            if let Some(o) = &offset {
                url.push_str(&format!("&offset={o}"));
            }

            let page: AsanaPage<AsanaProject> = self.authed_get(&url).await?;
            for p in page.data {
                let fields = AsanaProjectFields {
                    gid: p.gid.clone(),
                    name: p.name.clone(),
                    workspace_name: p.workspace.map(|w| w.name).unwrap_or_default(),
                    notes: p.notes,
                    current_status: p.current_status.map(|s| s.title),
                    archived: p.archived,
                    permalink_url: p.permalink_url,
                };
                let mut entity = Entity::new(p.gid, "asana", EntityKind::AsanaProject(fields));
                entity.name = Some(p.name);
                events.push(Ok(SourceEvent::Entity(entity)));
            }
            match page.next_page.and_then(|n| n.offset) {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(events)
    }

    async fn fetch_tasks(&self, project_modified_since: &BTreeMap<String, String>) -> Result<Vec<SourceEvent>> {
        let mut events = Vec::new();
        let since = project_modified_since.get("task").cloned();
        let mut offset: Option<String> = None;
        loop {
            let mut url = format!(
                "{BASE_URL}/tasks?workspace={}&limit={PAGE_SIZE}&opt_fields=gid,name,notes,completed,assignee.name,projects,due_on,permalink_url",
                self.workspace_gid
            );
            if let Some(since) = &since {
                url.push_str(&format!("&modified_since={since}"));
            }
            if let Some(o) = &offset {
                url.push_str(&format!("&offset={o}"));
            }

            let page: AsanaPage<AsanaTask> = self.authed_get(&url).await?;
            for t in page.data {
                let project_gid = t.projects.first().map(|p| p.gid.clone()).unwrap_or_default();
                let fields = AsanaTaskFields {
                    gid: t.gid.clone(),
                    name: t.name.clone(),
                    notes: t.notes,
                    completed: t.completed,
                    assignee_name: t.assignee.map(|a| a.name),
                    project_gid: project_gid.clone(),
                    due_on: t.due_on,
                    permalink_url: t.permalink_url,
                };
                let mut entity = Entity::new(t.gid, "asana", EntityKind::AsanaTask(fields));
                entity.name = Some(t.name);
                if !project_gid.is_empty() {
                    entity.breadcrumbs.push(weave_types::Breadcrumb {
                        entity_id: project_gid,
                        name: None,
                        entity_type: Some("asana_project".to_string()),
                    });
                }
                events.push(Ok(SourceEvent::Entity(entity)));
            }
            match page.next_page.and_then(|n| n.offset) {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl SourceDriver for AsanaDriver {
    fn short_name(&self) -> &'static str {
        "asana"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let modified_since = match &cursor {
            Some(Cursor::LastModified(map)) => map.clone(),
            _ => BTreeMap::new(),
        };
        let this = self.clone_handle();
        stream_from_future(async move {
            let mut events = match this.fetch_projects(modified_since.get("project").map(|s| s.as_str())).await {
                Ok(e) => e,
                Err(e) => return vec![Err(e)],
            };
            match this.fetch_tasks(&modified_since).await {
                Ok(e) => events.extend(e),
                Err(e) => return vec![Err(e)],
            }

            let now = Utc::now().to_rfc3339();
            let mut next_cursor = modified_since;
            next_cursor.insert("project".to_string(), now.clone());
            next_cursor.insert("task".to_string(), now);
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::LastModified(next_cursor))));
            events
        })
    }
}

impl AsanaDriver {
    /// Cheap clone for moving into the boxed future — all fields are
    /// either `Arc`/`Clone` already or plain owned strings.
    fn clone_handle(&self) -> Arc<Self> {
        Arc::new(Self {
            client: self.client.clone(),
            tokens: self.tokens.clone(),
            rate_limiter: self.rate_limiter.clone(),
            connection_id: self.connection_id,
            refresh_token: self.refresh_token.clone(),
            workspace_gid: self.workspace_gid.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AsanaPage<T> {
    data: Vec<T>,
    next_page: Option<AsanaNextPage>,
}

#[derive(Debug, Deserialize)]
struct AsanaNextPage {
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsanaProject {
    gid: String,
    name: String,
    notes: Option<String>,
    current_status: Option<AsanaStatus>,
    archived: bool,
    permalink_url: Option<String>,
    workspace: Option<AsanaWorkspaceRef>,
}

#[derive(Debug, Deserialize)]
struct AsanaStatus {
    title: String,
}

#[derive(Debug, Deserialize)]
struct AsanaWorkspaceRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AsanaTask {
    gid: String,
    name: String,
    notes: Option<String>,
    completed: bool,
    assignee: Option<AsanaAssignee>,
    projects: Vec<AsanaProjectRef>,
    due_on: Option<String>,
    permalink_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AsanaAssignee {
    name: String,
}

#[derive(Debug, Deserialize)]
struct AsanaProjectRef {
    gid: String,
}
