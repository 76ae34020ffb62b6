//! Shared chunk-selection logic: code entities go through the AST-aware
//! chunker, everything else through the semantic chunker.

use weave_chunk::{Chunk, CodeChunker, CodeLanguage, SemanticChunker};
use weave_types::entity::Entity;

use crate::error::Result;

/// Returns `None` when a `CodeFileEntity`'s language has no tree-sitter
/// grammar — the caller must skip the entity entirely rather than emit an
/// unchunked blob.
pub async fn chunk_entity(
    entity: &Entity,
    semantic: &SemanticChunker,
    code: &CodeChunker,
) -> Result<Option<Vec<Chunk>>> {
    let text = match &entity.textual_representation {
        Some(t) if !t.trim().is_empty() => t,
        _ => return Ok(Some(Vec::new())),
    };

    if let Some(code_attrs) = &entity.code {
        let language = CodeLanguage::detect(&code_attrs.path_in_repo, text);
        return match language {
            Some(lang) => Ok(Some(code.chunk(text, lang)?)),
            None => Ok(None),
        };
    }

    Ok(Some(semantic.chunk_one(text).await?))
}
