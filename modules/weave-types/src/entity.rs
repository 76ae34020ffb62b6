//! The entity model.
//!
//! Every source driver yields `Entity` values. `Entity` is a header struct
//! (`entity_id`, `breadcrumbs`, `system_metadata`, plus the optional
//! FileEntity/CodeFileEntity/DeletionEntity/PolymorphicEntity extension
//! structs) wrapping an `EntityKind`, which is the tagged union of
//! per-source-resource payloads. Concrete variants carry strongly-typed
//! native fields; schema-free sources (HubSpot, Postgres) fall back to a
//! `properties` map.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::ids::{SyncId, SyncJobId};

/// An ancestor reference giving hierarchical context at search time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub entity_id: String,
    pub name: Option<String>,
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Vector {
    Dense(Vec<f32>),
    Sparse(SparseVector),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

/// Progressively filled as the entity moves through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemMetadata {
    pub source_name: String,
    pub sync_id: Option<SyncId>,
    pub sync_job_id: Option<SyncJobId>,
    pub entity_type: String,
    /// Content hash used for change detection; set by the pipeline's
    /// hashing stage, not by the driver.
    pub hash: Option<String>,
    /// Set when an entity is fanned out into chunks (Qdrant content processor).
    pub chunk_index: Option<u32>,
    pub original_entity_id: Option<String>,
    pub vectors: Vec<Vector>,
    /// Vespa content processor only: one text per chunk, kept 1:1 alongside
    /// `vectors` inside the single document.
    pub chunk_texts: Vec<String>,
    pub db_entity_id: Option<uuid::Uuid>,
    pub db_created_at: Option<DateTime<Utc>>,
    pub db_updated_at: Option<DateTime<Utc>>,
}

/// FileEntity extension.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileAttributes {
    pub url: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub local_path: Option<PathBuf>,
}

/// CodeFileEntity extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeFileAttributes {
    pub repo_owner: String,
    pub path_in_repo: String,
    pub language: Option<String>,
    pub commit_id: Option<String>,
}

/// DeletionEntity extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionStatus {
    Deleted,
    Removed,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionAttributes {
    pub deletion_status: DeletionStatus,
}

/// PolymorphicEntity extension (schema-free table-driven sources).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolymorphicAttributes {
    pub table_name: String,
    pub schema_name: String,
    pub primary_key_columns: Vec<String>,
}

/// One logical record extracted from a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: String,
    pub breadcrumbs: Vec<Breadcrumb>,
    pub name: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Set by the text builder; required before embedding.
    pub textual_representation: Option<String>,
    pub system_metadata: SystemMetadata,
    pub file: Option<FileAttributes>,
    pub code: Option<CodeFileAttributes>,
    pub deletion: Option<DeletionAttributes>,
    pub polymorphic: Option<PolymorphicAttributes>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(entity_id: impl Into<String>, source_name: impl Into<String>, kind: EntityKind) -> Self {
        let entity_type = kind.entity_type_name().to_string();
        Self {
            entity_id: entity_id.into(),
            breadcrumbs: Vec::new(),
            name: None,
            created_at: None,
            updated_at: None,
            textual_representation: None,
            system_metadata: SystemMetadata {
                source_name: source_name.into(),
                entity_type,
                ..Default::default()
            },
            file: None,
            code: None,
            deletion: None,
            polymorphic: None,
            kind,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self.kind, EntityKind::Deletion) || self.deletion.is_some()
    }

    pub fn is_file(&self) -> bool {
        self.file.is_some()
    }

    /// Fields flagged `embeddable=True`, in declaration order, prefixed
    /// with the field name — consumed by the text builder for non-file
    /// entities.
    pub fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        self.kind.embeddable_fields()
    }

    /// Field names flagged `unhashable=True` — excluded from the content
    /// hash.
    pub fn unhashable_fields(&self) -> &'static [&'static str] {
        self.kind.unhashable_fields()
    }
}

/// Per-source-resource payload. One variant per (source, resource kind)
/// pair actually implemented; schema-free sources carry a `properties` map
/// instead of native fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EntityKind {
    AsanaTask(AsanaTaskFields),
    AsanaProject(AsanaProjectFields),
    JiraIssue(JiraIssueFields),
    ConfluencePage(ConfluencePageFields),
    HubspotContact(HubspotContactFields),
    OutlookMailMessage(OutlookMailMessageFields),
    GithubCodeFile(GithubCodeFileFields),
    GithubDirectory(GithubDirectoryFields),
    GoogleDriveFile(GoogleDriveFileFields),
    PostgresRow(PostgresRowFields),
    Deletion,
}

impl EntityKind {
    pub fn entity_type_name(&self) -> &'static str {
        match self {
            EntityKind::AsanaTask(_) => "asana_task",
            EntityKind::AsanaProject(_) => "asana_project",
            EntityKind::JiraIssue(_) => "jira_issue",
            EntityKind::ConfluencePage(_) => "confluence_page",
            EntityKind::HubspotContact(_) => "hubspot_contact",
            EntityKind::OutlookMailMessage(_) => "outlook_mail_message",
            EntityKind::GithubCodeFile(_) => "github_code_file",
            EntityKind::GithubDirectory(_) => "github_directory",
            EntityKind::GoogleDriveFile(_) => "google_drive_file",
            EntityKind::PostgresRow(_) => "postgres_row",
            EntityKind::Deletion => "deletion",
        }
    }

    pub fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        match self {
            EntityKind::AsanaTask(f) => f.embeddable_fields(),
            EntityKind::AsanaProject(f) => f.embeddable_fields(),
            EntityKind::JiraIssue(f) => f.embeddable_fields(),
            EntityKind::ConfluencePage(f) => f.embeddable_fields(),
            EntityKind::HubspotContact(f) => f.embeddable_fields(),
            EntityKind::OutlookMailMessage(f) => f.embeddable_fields(),
            EntityKind::GithubCodeFile(f) => f.embeddable_fields(),
            EntityKind::GithubDirectory(f) => f.embeddable_fields(),
            EntityKind::GoogleDriveFile(f) => f.embeddable_fields(),
            EntityKind::PostgresRow(f) => f.embeddable_fields(),
            EntityKind::Deletion => Vec::new(),
        }
    }

    pub fn unhashable_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::AsanaTask(_) => AsanaTaskFields::UNHASHABLE,
            EntityKind::AsanaProject(_) => AsanaProjectFields::UNHASHABLE,
            EntityKind::JiraIssue(_) => JiraIssueFields::UNHASHABLE,
            EntityKind::ConfluencePage(_) => ConfluencePageFields::UNHASHABLE,
            EntityKind::HubspotContact(_) => HubspotContactFields::UNHASHABLE,
            EntityKind::OutlookMailMessage(_) => OutlookMailMessageFields::UNHASHABLE,
            EntityKind::GithubCodeFile(_) => GithubCodeFileFields::UNHASHABLE,
            EntityKind::GithubDirectory(_) => GithubDirectoryFields::UNHASHABLE,
            EntityKind::GoogleDriveFile(_) => GoogleDriveFileFields::UNHASHABLE,
            EntityKind::PostgresRow(_) => PostgresRowFields::UNHASHABLE,
            EntityKind::Deletion => &[],
        }
    }
}

/// Implemented by each `*Fields` struct so the text builder (embeddable
/// fields) and hasher (unhashable fields) can stay declarative instead of
/// hand-writing a match arm per field per entity type.
pub trait SourceFields {
    const UNHASHABLE: &'static [&'static str];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)>;
}

macro_rules! impl_no_embeddable {
    ($ty:ty) => {
        impl SourceFields for $ty {
            const UNHASHABLE: &'static [&'static str] = &[];
            fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
                Vec::new()
            }
        }
    };
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsanaTaskFields {
    pub gid: String,
    pub name: String,
    pub notes: Option<String>,
    pub completed: bool,
    pub assignee_name: Option<String>,
    pub project_gid: String,
    pub due_on: Option<String>,
    /// URL to open the task in Asana; volatile across re-parenting, so excluded from the hash.
    pub permalink_url: Option<String>,
}

impl SourceFields for AsanaTaskFields {
    const UNHASHABLE: &'static [&'static str] = &["permalink_url"];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("name".to_string(), self.name.clone())];
        if let Some(notes) = &self.notes {
            out.push(("notes".to_string(), notes.clone()));
        }
        if let Some(a) = &self.assignee_name {
            out.push(("assignee_name".to_string(), a.clone()));
        }
        out.into_iter().map(|(k, v)| (leak_field_name(k), v)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsanaProjectFields {
    pub gid: String,
    pub name: String,
    pub workspace_name: String,
    pub notes: Option<String>,
    pub current_status: Option<String>,
    pub archived: bool,
    pub permalink_url: Option<String>,
}

impl SourceFields for AsanaProjectFields {
    const UNHASHABLE: &'static [&'static str] = &["permalink_url"];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("name".to_string(), self.name.clone()),
            ("workspace_name".to_string(), self.workspace_name.clone()),
        ];
        if let Some(n) = &self.notes {
            out.push(("notes".to_string(), n.clone()));
        }
        if let Some(s) = &self.current_status {
            out.push(("current_status".to_string(), s.clone()));
        }
        out.into_iter().map(|(k, v)| (leak_field_name(k), v)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JiraIssueFields {
    pub key: String,
    pub summary: String,
    pub description: Option<String>,
    pub status: String,
    pub issue_type: String,
    pub assignee_name: Option<String>,
    pub cloud_id: String,
}

impl SourceFields for JiraIssueFields {
    const UNHASHABLE: &'static [&'static str] = &[];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("summary".to_string(), self.summary.clone()),
            ("status".to_string(), self.status.clone()),
        ];
        if let Some(d) = &self.description {
            out.push(("description".to_string(), d.clone()));
        }
        out.into_iter().map(|(k, v)| (leak_field_name(k), v)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfluencePageFields {
    pub id: String,
    pub title: String,
    pub body_html: Option<String>,
    pub space_key: String,
    pub version: u32,
    pub cloud_id: String,
}

impl SourceFields for ConfluencePageFields {
    const UNHASHABLE: &'static [&'static str] = &[];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("title".to_string(), self.title.clone())];
        if let Some(b) = &self.body_html {
            out.push(("body_html".to_string(), b.clone()));
        }
        out.into_iter().map(|(k, v)| (leak_field_name(k), v)).collect()
    }
}

/// HubSpot is schema-free at the API level — the full property schema is
/// fetched and cached per object type, and nulls/empties are stripped
/// before the entity is yielded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubspotContactFields {
    pub hs_object_id: String,
    pub properties: BTreeMap<String, String>,
}

impl SourceFields for HubspotContactFields {
    const UNHASHABLE: &'static [&'static str] = &["hs_lastmodifieddate"];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        self.properties
            .iter()
            .map(|(k, v)| (leak_field_name(k.clone()), v.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlookMailMessageFields {
    pub message_id: String,
    pub subject: String,
    pub body_preview: String,
    pub from_address: Option<String>,
    pub folder_id: String,
    pub has_attachments: bool,
}

impl SourceFields for OutlookMailMessageFields {
    const UNHASHABLE: &'static [&'static str] = &[];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (leak_field_name("subject".to_string()), self.subject.clone()),
            (leak_field_name("body_preview".to_string()), self.body_preview.clone()),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubCodeFileFields {
    pub path: String,
    pub sha: String,
}
impl_no_embeddable!(GithubCodeFileFields);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubDirectoryFields {
    pub path: String,
}
impl_no_embeddable!(GithubDirectoryFields);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleDriveFileFields {
    pub file_id: String,
    pub checksum: Option<String>,
}
impl_no_embeddable!(GoogleDriveFileFields);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresRowFields {
    pub row: BTreeMap<String, String>,
}

impl SourceFields for PostgresRowFields {
    const UNHASHABLE: &'static [&'static str] = &[];
    fn embeddable_fields(&self) -> Vec<(&'static str, String)> {
        self.row
            .iter()
            .map(|(k, v)| (leak_field_name(k.clone()), v.clone()))
            .collect()
    }
}

/// Field names are reported as `&'static str` for cheap downstream
/// comparisons against `schema::FieldFlags` tables; schema-free sources
/// (HubSpot, Postgres) only know their field names at runtime. Rather
/// than leaking a fresh string per call — which would leak once per
/// entity in a long-lived `weave-worker` process, not once per schema —
/// names are interned in a process-wide table keyed by field name, so
/// each distinct name is leaked at most once.
fn leak_field_name(name: String) -> &'static str {
    static INTERNED: OnceLock<DashMap<String, &'static str>> = OnceLock::new();
    let table = INTERNED.get_or_init(DashMap::new);
    if let Some(existing) = table.get(&name) {
        return *existing;
    }
    let leaked: &'static str = Box::leak(name.clone().into_boxed_str());
    table.insert(name, leaked);
    leaked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asana_task_excludes_permalink_from_hash() {
        let fields = AsanaTaskFields {
            gid: "1".into(),
            name: "Ship it".into(),
            notes: Some("notes".into()),
            completed: false,
            assignee_name: None,
            project_gid: "p1".into(),
            due_on: None,
            permalink_url: Some("https://app.asana.com/0/1/1".into()),
        };
        assert!(AsanaTaskFields::UNHASHABLE.contains(&"permalink_url"));
        let embeddable = fields.embeddable_fields();
        assert!(embeddable.iter().any(|(k, _)| *k == "name"));
    }

    #[test]
    fn entity_type_name_is_stable() {
        let e = Entity::new(
            "1",
            "asana",
            EntityKind::AsanaProject(AsanaProjectFields {
                gid: "1".into(),
                name: "Proj".into(),
                workspace_name: "WS".into(),
                notes: None,
                current_status: None,
                archived: false,
                permalink_url: None,
            }),
        );
        assert_eq!(e.system_metadata.entity_type, "asana_project");
    }
}
