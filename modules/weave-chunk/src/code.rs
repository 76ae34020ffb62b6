//! AST-aware code chunker. Parses a file with
//! `tree-sitter` and groups consecutive top-level items (functions,
//! impls, classes...) into chunks bounded by a token budget, splitting
//! oversized single items recursively by their children.
//!
//! Languages `tree-sitter` doesn't cover here cause the caller to
//! **skip** the entity rather than fail the job.

use tree_sitter::{Language, Node, Parser};

use crate::error::{ChunkError, Result};
use crate::Chunk;

/// Rough token budget per code chunk — counted in characters/4 rather
/// than a real tokenizer pass, since code chunking only needs an
/// approximate split boundary; the embedder's own batching is what
/// enforces the hard token ceiling.
const TARGET_CHARS_PER_CHUNK: usize = 6000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeLanguage {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
}

impl CodeLanguage {
    /// Lightweight content classifier: extension first (the common
    /// case), falling back to a shebang sniff for extensionless scripts.
    pub fn detect(path: &str, content: &str) -> Option<Self> {
        let ext = std::path::Path::new(path)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase());
        match ext.as_deref() {
            Some("rs") => Some(Self::Rust),
            Some("py") => Some(Self::Python),
            Some("js" | "jsx" | "mjs") => Some(Self::JavaScript),
            Some("ts" | "tsx") => Some(Self::TypeScript),
            Some("go") => Some(Self::Go),
            Some("java") => Some(Self::Java),
            Some("c" | "h") => Some(Self::C),
            Some("cc" | "cpp" | "cxx" | "hpp") => Some(Self::Cpp),
            _ if content.starts_with("#!") && content.contains("python") => Some(Self::Python),
            _ => None,
        }
    }

    fn grammar(self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

pub struct CodeChunker;

impl CodeChunker {
    pub fn new() -> Self {
        Self
    }

    /// Returns `None` when `language` has no tree-sitter grammar
    /// registered above — the caller treats that as "skip this entity",
    /// not a chunking failure.
    pub fn chunk(&self, source: &str, language: CodeLanguage) -> Result<Vec<Chunk>> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .map_err(|e| ChunkError::ParseFailed(e.to_string()))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| ChunkError::ParseFailed(format!("{language:?}")))?;

        let root = tree.root_node();
        let mut chunks = Vec::new();
        let mut cursor = root.walk();
        let mut group_start: Option<usize> = None;
        let mut group_end = 0usize;

        for child in root.children(&mut cursor) {
            let child_len = child.end_byte() - child.start_byte();
            if child_len > TARGET_CHARS_PER_CHUNK {
                if let Some(start) = group_start.take() {
                    chunks.push(make_chunk(source, start, group_end));
                }
                chunks.extend(self.split_oversized_node(source, child));
                continue;
            }

            match group_start {
                None => {
                    group_start = Some(child.start_byte());
                    group_end = child.end_byte();
                }
                Some(start) => {
                    if child.end_byte() - start > TARGET_CHARS_PER_CHUNK {
                        chunks.push(make_chunk(source, start, group_end));
                        group_start = Some(child.start_byte());
                        group_end = child.end_byte();
                    } else {
                        group_end = child.end_byte();
                    }
                }
            }
        }
        if let Some(start) = group_start {
            chunks.push(make_chunk(source, start, group_end));
        }

        if chunks.is_empty() && !source.trim().is_empty() {
            chunks.push(make_chunk(source, 0, source.len()));
        }
        Ok(chunks)
    }

    /// A single top-level node (e.g. one giant function) still over
    /// budget: recurse into its children rather than emitting one
    /// unbounded chunk.
    fn split_oversized_node<'a>(&self, source: &str, node: Node<'a>) -> Vec<Chunk> {
        let mut cursor = node.walk();
        let children: Vec<Node> = node.children(&mut cursor).collect();
        if children.is_empty() {
            return vec![make_chunk(source, node.start_byte(), node.end_byte())];
        }
        let mut out = Vec::new();
        let mut start = node.start_byte();
        let mut end = start;
        for child in children {
            if child.end_byte() - start > TARGET_CHARS_PER_CHUNK && end > start {
                out.push(make_chunk(source, start, end));
                start = child.start_byte();
            }
            end = child.end_byte();
        }
        out.push(make_chunk(source, start, end));
        out
    }
}

fn make_chunk(source: &str, start: usize, end: usize) -> Chunk {
    let text = source[start..end].to_string();
    Chunk {
        token_count: text.len() / 4 + 1,
        text,
        start_index: start,
        end_index: end,
    }
}

impl Default for CodeChunker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rust_by_extension() {
        assert_eq!(CodeLanguage::detect("src/main.rs", ""), Some(CodeLanguage::Rust));
    }

    #[test]
    fn unsupported_extension_yields_none() {
        assert_eq!(CodeLanguage::detect("notes.txt", "plain text"), None);
    }

    #[test]
    fn chunks_a_small_rust_file_into_at_least_one_chunk() {
        let source = "fn a() {}\nfn b() {}\n";
        let chunks = CodeChunker::new().chunk(source, CodeLanguage::Rust).unwrap();
        assert!(!chunks.is_empty());
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert!(joined.contains("fn a"));
        assert!(joined.contains("fn b"));
    }
}
