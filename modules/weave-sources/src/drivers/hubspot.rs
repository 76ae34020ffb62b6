//! HubSpot driver. HubSpot objects are schema-free at the API
//! level: the full property schema for an object type is fetched once and
//! cached for the driver's lifetime, and every object's `properties` map
//! is filtered down to non-null, non-empty values before being yielded.
//! Paginates via `POST /crm/v3/objects/{type}/search` with cursor-based
//! `after` tokens, filtered by `hs_lastmodifieddate` for incremental runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::OnceCell;

use weave_ratelimit::SourceRateLimiter;
use weave_tokens::TokenManager;
use weave_types::entity::{EntityKind, HubspotContactFields};
use weave_types::{ConnectionId, Cursor, Entity};

use crate::{stream_from_future, Result, SourceDriver, SourceError, SourceEvent};

const OBJECT_TYPE: &str = "contacts";

#[derive(Debug, Deserialize)]
struct PropertySchema {
    results: Vec<PropertyDef>,
}
#[derive(Debug, Deserialize)]
struct PropertyDef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<HubspotObject>,
    paging: Option<Paging>,
}
#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextLink>,
}
#[derive(Debug, Deserialize)]
struct NextLink {
    after: String,
}
#[derive(Debug, Deserialize)]
struct HubspotObject {
    id: String,
    properties: BTreeMap<String, Option<String>>,
}

struct Inner {
    client: reqwest::Client,
    tokens: Arc<TokenManager>,
    rate_limiter: Option<Arc<SourceRateLimiter>>,
    connection_id: ConnectionId,
    refresh_token: String,
    property_names: OnceCell<Vec<String>>,
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

    async fn property_names(&self) -> Result<Vec<String>> {
        self.property_names
            .get_or_try_init(|| async {
                let token = self.token().await?;
                let url = format!("https://api.hubapi.com/crm/v3/properties/{OBJECT_TYPE}");
                let resp = self.client.get(&url).bearer_auth(token).send().await?;
                let schema: PropertySchema = resp.json().await?;
                Ok::<_, SourceError>(schema.results.into_iter().map(|p| p.name).collect())
            })
            .await
            .map(|p| p.clone())
    }
}

/// Cheaply cloneable handle so the stream future can own a `'static`
/// reference to the connection state instead of borrowing `&self`.
pub struct HubspotDriver(Arc<Inner>);

impl HubspotDriver {
    pub fn new(
        tokens: Arc<TokenManager>,
        rate_limiter: Option<Arc<SourceRateLimiter>>,
        connection_id: ConnectionId,
        refresh_token: String,
    ) -> Self {
        Self(Arc::new(Inner {
            client: reqwest::Client::new(),
            tokens,
            rate_limiter,
            connection_id,
            refresh_token,
            property_names: OnceCell::new(),
        }))
    }
}

#[async_trait]
impl SourceDriver for HubspotDriver {
    fn short_name(&self) -> &'static str {
        "hubspot"
    }

    fn stream_entities(&self, cursor: Option<Cursor>) -> BoxStream<'_, Result<SourceEvent>> {
        let since = match &cursor {
            Some(Cursor::LastModified(map)) => map.get(OBJECT_TYPE).cloned(),
            _ => None,
        };
        let inner = self.0.clone();
        stream_from_future(async move {
            let properties = match inner.property_names().await {
                Ok(p) => p,
                Err(e) => return vec![Err(e)],
            };

            let mut events = Vec::new();
            let mut after: Option<String> = None;
            loop {
                let token = match inner.token().await {
                    Ok(t) => t,
                    Err(e) => return vec![Err(e)],
                };
                let mut body = json!({
                    "properties": properties,
                    "limit": 100,
                });
                if let Some(a) = &after {
                    body["after"] = json!(a);
                }
                if let Some(ts) = &since {
                    body["filterGroups"] = json!([{
                        "filters": [{
                            "propertyName": "hs_lastmodifieddate",
                            "operator": "GTE",
                            "value": ts,
                        }]
                    }]);
                }

                let url = format!("https://api.hubapi.com/crm/v3/objects/{OBJECT_TYPE}/search");
                let resp = match inner.client.post(&url).bearer_auth(token).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => return vec![Err(e.into())],
                };
                let page: SearchResponse = match resp.json().await {
                    Ok(p) => p,
                    Err(e) => return vec![Err(e.into())],
                };

                for obj in page.results {
                    let filtered: BTreeMap<String, String> = obj
                        .properties
                        .into_iter()
                        .filter_map(|(k, v)| v.filter(|s| !s.is_empty()).map(|v| (k, v)))
                        .collect();
                    let name = filtered.get("firstname").cloned().or_else(|| filtered.get("email").cloned());
                    let fields = HubspotContactFields {
                        hs_object_id: obj.id.clone(),
                        properties: filtered,
                    };
                    let mut entity = Entity::new(obj.id, "hubspot", EntityKind::HubspotContact(fields));
                    entity.name = name;
                    events.push(Ok(SourceEvent::Entity(entity)));
                }

                match page.paging.and_then(|p| p.next) {
                    Some(next) => after = Some(next.after),
                    None => break,
                }
            }

            let mut next_cursor = match cursor {
                Some(Cursor::LastModified(map)) => map,
                _ => Default::default(),
            };
            next_cursor.insert(OBJECT_TYPE.to_string(), Utc::now().to_rfc3339());
            events.push(Ok(SourceEvent::CursorUpdate(Cursor::LastModified(next_cursor))));
            events
        })
    }
}
