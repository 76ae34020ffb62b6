//! Source registration metadata.
//!
//! The original stores this as a decorator on each `Source` subclass
//! (`@source(...)`) plus a DB-mirrored row. There's no single runtime
//! "decorator" concept in Rust, so this crate keeps the same information
//! in one static table instead: a `SourceMetadata` per driver, looked up
//! by `short_name`. `weave-ratelimit` reads `rate_limit_level` off this
//! table (via the caller, not directly — this crate doesn't depend on
//! `weave-ratelimit`) to decide whether a driver gets a `SourceRateLimiter`
//! at all.

use std::collections::HashMap;
use std::sync::OnceLock;

/// How a source authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    ApiKeyHeader,
    OAuthBrowser,
    OAuthToken,
    AuthProvider,
}

/// OAuth token lifecycle semantics: whether a source ever
/// issues refresh tokens, and if so, whether the provider rotates the
/// refresh token itself on every exchange (spec: "Non-rotating providers
/// reuse the existing refresh token; rotating providers replace it
/// atomically").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthSemantics {
    NoRefresh,
    WithRefresh,
    WithRotatingRefresh,
}

/// Which scope a source's outbound-call rate limit applies at (spec
/// §4.2). `None` means calls to this source are never gated by
/// `weave-ratelimit` — the driver runs unthrottled except for its own
/// 429/backoff handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitLevel {
    Org,
    Connection,
    None,
}

/// Static facts about one source connector, independent of any particular
/// connection or organization. Analogous to the original's per-source
/// `@source(...)` decorator plus its config-schema class.
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub name: &'static str,
    pub short_name: &'static str,
    pub auth_methods: &'static [AuthMethod],
    pub oauth_semantics: OAuthSemantics,
    pub labels: &'static [&'static str],
    pub supports_continuous: bool,
    pub rate_limit_level: RateLimitLevel,
}

fn table() -> &'static HashMap<&'static str, SourceMetadata> {
    static TABLE: OnceLock<HashMap<&'static str, SourceMetadata>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries = [
            SourceMetadata {
                name: "Asana",
                short_name: "asana",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRefresh,
                labels: &["Project Management"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "Jira",
                short_name: "jira",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRefresh,
                labels: &["Project Management", "Issue Tracking"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "Confluence",
                short_name: "confluence",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRefresh,
                labels: &["Knowledge Base"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "HubSpot",
                short_name: "hubspot",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRefresh,
                labels: &["CRM"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Org,
            },
            SourceMetadata {
                name: "Outlook Mail",
                short_name: "outlook_mail",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRefresh,
                labels: &["Communication", "Email"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "GitHub",
                short_name: "github",
                auth_methods: &[AuthMethod::OAuthToken, AuthMethod::ApiKeyHeader],
                oauth_semantics: OAuthSemantics::NoRefresh,
                labels: &["Code", "Version Control"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "Google Drive",
                short_name: "google_drive",
                auth_methods: &[AuthMethod::OAuthBrowser],
                oauth_semantics: OAuthSemantics::WithRotatingRefresh,
                labels: &["File Storage"],
                supports_continuous: true,
                rate_limit_level: RateLimitLevel::Connection,
            },
            SourceMetadata {
                name: "PostgreSQL",
                short_name: "postgresql",
                auth_methods: &[AuthMethod::AuthProvider],
                oauth_semantics: OAuthSemantics::NoRefresh,
                labels: &["Database"],
                supports_continuous: false,
                rate_limit_level: RateLimitLevel::None,
            },
        ];
        entries.into_iter().map(|m| (m.short_name, m)).collect()
    })
}

/// Looks up a driver's registration metadata by `short_name`. Returns
/// `None` for an unregistered source short name (a composition-root bug,
/// not a data error — callers should treat a miss as "this source isn't
/// wired up" rather than a per-sync failure).
pub fn lookup(short_name: &str) -> Option<&'static SourceMetadata> {
    table().get(short_name)
}

/// All registered sources, in registration order.
pub fn all() -> impl Iterator<Item = &'static SourceMetadata> {
    table().values()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asana_is_connection_scoped_with_refresh() {
        let meta = lookup("asana").unwrap();
        assert_eq!(meta.rate_limit_level, RateLimitLevel::Connection);
        assert_eq!(meta.oauth_semantics, OAuthSemantics::WithRefresh);
    }

    #[test]
    fn hubspot_is_org_scoped() {
        assert_eq!(lookup("hubspot").unwrap().rate_limit_level, RateLimitLevel::Org);
    }

    #[test]
    fn google_drive_rotates_refresh_tokens() {
        assert_eq!(
            lookup("google_drive").unwrap().oauth_semantics,
            OAuthSemantics::WithRotatingRefresh
        );
    }

    #[test]
    fn postgres_is_unregistered_for_rate_limiting() {
        assert_eq!(lookup("postgresql").unwrap().rate_limit_level, RateLimitLevel::None);
    }

    #[test]
    fn unknown_source_is_a_miss() {
        assert!(lookup("not_a_real_source").is_none());
    }
}
