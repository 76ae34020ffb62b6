//! Text builder / converters: turns a downloaded file, or
//! a non-file entity's embeddable fields, into the markdown
//! `textual_representation` the chunker consumes.

mod converters;
pub mod error;
mod ocr;

pub use error::{Result, TextError};
pub use ocr::{MistralOcrAdapter, NoopOcrAdapter, OcrAdapter};

use std::path::Path;

use tracing::warn;
use weave_types::Entity;

pub struct TextBuilder {
    ocr: Box<dyn OcrAdapter>,
}

impl TextBuilder {
    pub fn new(ocr: Box<dyn OcrAdapter>) -> Self {
        Self { ocr }
    }

    /// Builds `entity.textual_representation`. A failed conversion sets
    /// the text to `None` rather than propagating — the pipeline treats
    /// a `None` text as "drop before the embedding stage",
    /// not as an `EntityProcessingError` on its own. JSON's invalid-syntax
    /// case is the one conversion failure the spec calls out as a hard
    /// `EntityProcessingError`; callers distinguish it via `build_text`'s
    /// `Result` before falling back to `None`.
    pub async fn build(&self, entity: &mut Entity) {
        match self.build_text(entity).await {
            Ok(text) => entity.textual_representation = text,
            Err(e) => {
                warn!(entity_id = %entity.entity_id, error = %e, "text conversion failed, dropping text");
                entity.textual_representation = None;
            }
        }
    }

    /// Same as `build`, but surfaces the error instead of swallowing it —
    /// used by the pipeline to distinguish JSON's `EntityProcessingError`
    /// from an ordinary "conversion produced nothing" outcome.
    pub async fn build_text(&self, entity: &Entity) -> Result<Option<String>> {
        if let Some(file) = &entity.file {
            let Some(local_path) = &file.local_path else {
                return Ok(None);
            };
            let bytes = tokio::fs::read(local_path)
                .await
                .map_err(|e| TextError::Io { path: local_path.display().to_string(), source: e })?;
            let extension = local_path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let text = self.convert_file(&bytes, &extension, file.mime_type.as_deref(), file.url.as_deref()).await?;
            return Ok(Some(text));
        }

        Ok(Some(Self::build_from_fields(entity)))
    }

    async fn convert_file(&self, bytes: &[u8], extension: &str, mime_type: Option<&str>, source_url: Option<&str>) -> Result<String> {
        match extension {
            "html" | "htm" => converters::html_to_markdown(bytes, source_url),
            "xlsx" => converters::xlsx_to_markdown(bytes),
            "docx" => converters::docx_to_markdown(bytes),
            "csv" => converters::csv_to_markdown(bytes),
            "json" => converters::json_to_markdown(bytes),
            "xml" => Ok(converters::xml_to_markdown(bytes)),
            "txt" | "md" => Ok(converters::plain_text(bytes)),
            "yaml" | "yml" => Ok(converters::fenced(bytes, "yaml")),
            "toml" => Ok(converters::fenced(bytes, "toml")),
            "pdf" | "pptx" | "png" | "jpg" | "jpeg" | "gif" | "webp" => {
                let mime = mime_type.map(str::to_string).unwrap_or_else(|| guess_mime(extension).to_string());
                converters::ocr_to_markdown(self.ocr.as_ref(), bytes, &mime).await
            }
            other => Err(TextError::UnsupportedExtension(Some(other.to_string()))),
        }
    }

    /// For non-file entities: concatenate the values of fields flagged
    /// `embeddable=True` in declaration order, each prefixed with its
    /// field name.
    fn build_from_fields(entity: &Entity) -> String {
        entity
            .embeddable_fields()
            .into_iter()
            .map(|(field, value)| format!("{field}: {value}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn guess_mime(extension: &str) -> &'static str {
    match extension {
        "pdf" => "application/pdf",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[allow(dead_code)]
fn normalize_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_types::entity::AsanaTaskFields;
    use weave_types::EntityKind;

    fn builder() -> TextBuilder {
        TextBuilder::new(Box::new(NoopOcrAdapter))
    }

    #[tokio::test]
    async fn non_file_entity_concatenates_embeddable_fields() {
        let fields = AsanaTaskFields {
            gid: "1".into(),
            name: "Ship it".into(),
            notes: Some("write the release notes".into()),
            completed: false,
            assignee_name: None,
            project_gid: "p1".into(),
            due_on: None,
            permalink_url: None,
        };
        let entity = Entity::new("1", "asana", EntityKind::AsanaTask(fields));
        let text = builder().build_text(&entity).await.unwrap().unwrap();
        assert!(text.contains("name: Ship it"));
        assert!(text.contains("notes: write the release notes"));
    }

    #[tokio::test]
    async fn csv_renders_as_markdown_table() {
        let md = converters::csv_to_markdown(b"a,b\n1,2\n3,4").unwrap();
        assert!(md.starts_with("| a | b |"));
        assert!(md.contains("| 1 | 2 |"));
    }

    #[tokio::test]
    async fn invalid_json_is_an_error_not_a_silent_none() {
        let err = converters::json_to_markdown(b"{not valid json").unwrap_err();
        assert!(matches!(err, TextError::InvalidJson { .. }));
    }

    #[tokio::test]
    async fn plain_text_passes_through_unchanged() {
        assert_eq!(converters::plain_text(b"hello world"), "hello world");
    }

    #[tokio::test]
    async fn file_entity_with_missing_local_path_yields_no_text() {
        let mut entity = Entity::new("f1", "google_drive", EntityKind::GoogleDriveFile(
            weave_types::entity::GoogleDriveFileFields { file_id: "f1".into(), checksum: None },
        ));
        entity.file = Some(weave_types::entity::FileAttributes::default());
        let text = builder().build_text(&entity).await.unwrap();
        assert!(text.is_none());
    }
}
