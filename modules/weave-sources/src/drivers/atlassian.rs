//! Jira and Confluence share an OAuth app and the same "accessible
//! resources" cloud-id exchange: before any API call, the
//! driver resolves its `cloud_id` via
//! `GET https://api.atlassian.com/oauth/token/accessible-resources`,
//! then addresses the product API at
//! `https://api.atlassian.com/ex/{jira|confluence}/{cloud_id}/...`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use serde::Deserialize;
use tokio::sync::OnceCell;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{ConfluencePageFields, EntityKind, JiraIssueFields};
use weave_types::{ConnectionId, Cursor, Entity};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const ACCESSIBLE_RESOURCES_URL: &str = "https://api.atlassian.com/oauth/token/accessible-resources";

#[derive(Debug, Deserialize, Clone)]
struct AccessibleResource {
    id: String,
}

/// Shared plumbing used by both `JiraDriver` and `ConfluenceDriver`:
/// token acquisition, rate limiting, and the cloud-id resolution that is
/// cached for the lifetime of the driver (it doesn't change mid-sync).
pub(crate) struct AtlassianClient {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    rate_limiter: Option<Arc<SourceRateLimiter>>,
    connection_id: ConnectionId,
    refresh_token: String,
    cloud_id: OnceCell<String>,
}

impl AtlassianClient {
    pub(crate) fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            tokens,
            rate_limiter,
            connection_id,
            refresh_token,
            cloud_id: OnceCell::new(),
        }
    }

    async fn token(&self) -> Result<String> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.check_and_record().await.map_err(SourceError::Token)?;
        }
        self.tokens
            .get_token(self.connection_id, &self.refresh_token)
            .await
            .map_err(SourceError::Token)
    }

    pub(crate) async fn cloud_id(&self) -> Result<String> {
        self.cloud_id
            .get_or_try_init(|| async {
                let token = self.token().await?;
                let resp = self
                    .client
                    .get(ACCESSIBLE_RESOURCES_URL)
                    .bearer_auth(token)
                    .send()
                    .await?;
                let resources: Vec<AccessibleResource> = resp.json().await?;
                resources
                    .into_iter()
                    .next()
                    .map(|r| r.id)
                    .ok_or_else(|| SourceError::Fatal("no accessible Atlassian sites for this connection".to_string()))
            })
            .await
            .map(|s| s.clone())
    }

    pub(crate) async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let token = self.token().await?;
        let resp = self.client.get(url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::UnexpectedResponse {
                source: "atlassian",
                detail: format!("{status}: {body}"),
            });
        }
        Ok(resp.json().await?)
    }
}

pub struct JiraDriver {
    client: Arc<AtlassianClient>,
    project_key: String,
}

impl JiraDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
        project_key: String,
    ) -> Self {
        Self {
            client: Arc::new(AtlassianClient::new(tokens, rate_limiter, connection_id, refresh_token)),
            project_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JiraSearchResponse {
    issues: Vec<JiraIssue>,
    #[serde(rename = "startAt")]
    start_at: u32,
    #[serde(rename = "maxResults")]
    max_results: u32,
    total: u32,
}

#[derive(Debug, Deserialize)]
struct JiraIssue {
    key: String,
    fields: JiraFields,
}

#[derive(Debug, Deserialize)]
struct JiraFields {
    summary: String,
    description: Option<String>,
    status: JiraStatus,
    issuetype: JiraIssueType,
    assignee: Option<JiraAssignee>,
}

#[derive(Debug, Deserialize)]
struct JiraStatus {
    name: String,
}
#[derive(Debug, Deserialize)]
struct JiraIssueType {
    name: String,
}
#[derive(Debug, Deserialize)]
struct JiraAssignee {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[async_trait]
impl SourceDriver for JiraDriver {
    fn short_name(&self) -> &'static str {
        "jira"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let updated_since = match &cursor {
            Some(Cursor::LastModified(map)) => map.get("issue").cloned(),
            _ => None,
        };
        let client = self.client.clone();
        let project_key = self.project_key.clone();
        stream_from_future(async move {
            let mut events = Vec::new();
            let mut start_at = 0u32;
            let jql = match &updated_since {
                Some(ts) => format!("project={project_key} AND updated >= \"{ts}\" ORDER BY updated ASC"),
                None => format!("project={project_key} ORDER BY updated ASC"),
            };
            let cloud_id = match client.cloud_id().await {
                Ok(id) => id,
                Err(e) => return vec![Err(e)],
            };
            loop {
                let url = format!(
                    "https://api.atlassian.com/ex/jira/{cloud_id}/rest/api/3/search?jql={}&startAt={start_at}&maxResults=100",
                    urlencoding_lite(&jql)
                );
                let page: JiraSearchResponse = match client.get_json(&url).await {
                    Ok(p) => p,
                    Err(e) => return vec![Err(e)],
                };
                let returned = page.issues.len() as u32;
                for issue in page.issues {
                    let fields = JiraIssueFields {
                        key: issue.key.clone(),
                        summary: issue.fields.summary.clone(),
                        description: issue.fields.description,
                        status: issue.fields.status.name,
                        issue_type: issue.fields.issuetype.name,
                        assignee_name: issue.fields.assignee.map(|a| a.display_name),
                        cloud_id: cloud_id.clone(),
                    };
                    let mut entity = Entity::new(issue.key, "jira", EntityKind::JiraIssue(fields));
                    entity.name = Some(issue.fields.summary);
                    events.push(Ok(SourceEvent::Entity(entity)));
                }
                start_at = page.start_at + returned.max(page.max_results.min(1));
                if start_at >= page.total || returned == 0 {
                    break;
                }
            }
            let mut next = match cursor {
                Some(Cursor::LastModified(map)) => map,
                _ => Default::default(),
            };
            next.insert("issue".to_string(), Utc::now().to_rfc3339());
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::LastModified(next))));
            events
        })
    }
}

pub struct ConfluenceDriver {
    client: Arc<AtlassianClient>,
    space_key: String,
}

impl ConfluenceDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
        space_key: String,
    ) -> Self {
        Self {
            client: Arc::new(AtlassianClient::new(tokens, rate_limiter, connection_id, refresh_token)),
            space_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfluenceSearchResponse {
    results: Vec<ConfluencePage>,
    #[serde(rename = "_links")]
    links: ConfluenceLinks,
}

#[derive(Debug, Deserialize)]
struct ConfluenceLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfluencePage {
    id: String,
    title: String,
    body: Option<ConfluenceBody>,
    version: ConfluenceVersion,
}

#[derive(Debug, Deserialize)]
struct ConfluenceBody {
    storage: Option<ConfluenceStorage>,
}
#[derive(Debug, Deserialize)]
struct ConfluenceStorage {
    value: String,
}
#[derive(Debug, Deserialize)]
struct ConfluenceVersion {
    number: u32,
}

#[async_trait]
impl SourceDriver for ConfluenceDriver {
    fn short_name(&self) -> &'static str {
        "confluence"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let client = self.client.clone();
        let space_key = self.space_key.clone();
        stream_from_future(async move {
            let mut events = Vec::new();
            let cloud_id = match client.cloud_id().await {
                Ok(id) => id,
                Err(e) => return vec![Err(e)],
            };
            let mut url = Some(format!(
                "https://api.atlassian.com/ex/confluence/{cloud_id}/wiki/rest/api/content?spaceKey={space_key}&expand=body.storage,version&limit=50"
            ));
            while let Some(current) = url {
                let page: ConfluenceSearchResponse = match client.get_json(&current).await {
                    Ok(p) => p,
                    Err(e) => return vec![Err(e)],
                };
                for p in page.results {
                    let fields = ConfluencePageFields {
                        id: p.id.clone(),
                        title: p.title.clone(),
                        body_html: p.body.and_then(|b| b.storage).map(|s| s.value),
                        space_key: space_key.clone(),
                        version: p.version.number,
                        cloud_id: cloud_id.clone(),
                    };
                    let mut entity = Entity::new(p.id, "confluence", EntityKind::ConfluencePage(fields));
                    entity.name = Some(p.title);
                    events.push(Ok(SourceEvent::Entity(entity)));
                }
                url = page
                    .links
                    .next
                    .map(|path| format!("https://api.atlassian.com{path}"));
            }
            let mut next = match cursor {
                Some(Cursor::LastModified(map)) => map,
                _ => Default::default(),
            };
            next.insert("page".to_string(), Utc::now().to_rfc3339());
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::LastModified(next))));
            events
        })
    }
}

/// Minimal percent-encoding for JQL query strings; avoids pulling in
/// `url::form_urlencoded` for what is just spaces and quotes here.
fn urlencoding_lite(s: &str) -> String {
    s.replace(' ', "%20").replace('"', "%22")
}
