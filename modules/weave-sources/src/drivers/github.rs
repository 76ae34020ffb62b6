//! GitHub driver: directory and code-file entities from a
//! single repo's default branch. Uses the last-seen push timestamp
//! (`Cursor::GithubPushTimestamp`) to short-circuit a full tree walk when
//! nothing has been pushed since — GitHub's tree API has no native
//! incremental mode, so the cheapest "nothing changed" check is comparing
//! `repo.pushed_at`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Deserialize;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{EntityKind, GithubCodeFileFields, GithubDirectoryFields};
use weave_types::{ConnectionId, Cursor, Entity};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct RepoInfo {
    #[serde(rename = "default_branch")]
    default_branch: String,
    #[serde(rename = "pushed_at")]
    pushed_at: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    entry_type: String,
    sha: String,
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

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T> {
        let token = self.token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .header("User-Agent", "weave-sync-engine")
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::UnexpectedResponse {
                source: "github",
                detail: format!("{status}: {body}"),
            });
        }
        Ok(resp.json().await?)
    }
}

pub struct GithubDriver {
    inner: Arc<Inner>,
    repo_owner: String,
    repo_name: String,
}

/// Languages resolved from file extension, matching the subset the code
/// chunker actually has grammars for; everything else is
/// still yielded as a `GithubCodeFileFields` entity with `language: None`
/// and chunked as plain text downstream.
fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    Some(match ext {
        "rs" => "rust",
        "py" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        _ => return None,
    })
}

impl GithubDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
        repo_owner: String,
        repo_name: String,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: reqwest::Client::new(),
                tokens,
                rate_limiter,
                connection_id,
                refresh_token,
            }),
            repo_owner,
            repo_name,
        }
    }
}

#[async_trait]
impl SourceDriver for GithubDriver {
    fn short_name(&self) -> &'static str {
        "github"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let last_push = match &cursor {
            Some(Cursor::GithubPushTimestamp(ts)) => Some(ts.clone()),
            _ => None,
        };
        let inner = self.inner.clone();
        let owner = self.repo_owner.clone();
        let repo = self.repo_name.clone();
        stream_from_future(async move {
            let repo_info: RepoInfo = match inner.get_json(&format!("{API_BASE}/repos/{owner}/{repo}")).await {
                Ok(r) => r,
                Err(e) => return vec![Err(e)],
            };

            if last_push.as_deref() == Some(repo_info.pushed_at.as_str()) {
                return vec![Ok(SourceEvent::CursorUpdate(Cursor::GithubPushTimestamp(
                    repo_info.pushed_at,
                )))];
            }

            let tree_url = format!(
                "{API_BASE}/repos/{owner}/{repo}/git/trees/{}?recursive=1",
                repo_info.default_branch
            );
            let tree: TreeResponse = match inner.get_json(&tree_url).await {
                Ok(t) => t,
                Err(e) => return vec![Err(e)],
            };

            let mut events = Vec::new();
            for entry in tree.tree {
                let entity = match entry.entry_type.as_str() {
                    "tree" => {
                        let fields = GithubDirectoryFields { path: entry.path.clone() };
                        let mut e = Entity::new(
                            format!("{owner}/{repo}:{}", entry.path),
                            "github",
                            EntityKind::GithubDirectory(fields),
                        );
                        e.name = Some(entry.path);
                        e
                    }
                    "blob" => {
                        let language = language_for_path(&entry.path).map(|s| s.to_string());
                        let fields = GithubCodeFileFields {
                            path: entry.path.clone(),
                            sha: entry.sha,
                        };
                        let mut e = Entity::new(
                            format!("{owner}/{repo}:{}", entry.path),
                            "github",
                            EntityKind::GithubCodeFile(fields),
                        );
                        e.code = Some(weave_types::CodeFileAttributes {
                            repo_owner: owner.clone(),
                            path_in_repo: entry.path.clone(),
                            language,
                            commit_id: None,
                        });
                        e.name = Some(entry.path);
                        e
                    }
                    _ => continue,
                };
                events.push(Ok(SourceEvent::Entity(entity)));
            }

            events.push(Ok(SourceEvent::CursorUpdate(Cursor::GithubPushTimestamp(
                repo_info.pushed_at,
            ))));
            events
        })
    }
}
