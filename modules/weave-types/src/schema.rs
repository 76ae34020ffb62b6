//! Static field-schema descriptions, independent of any single entity
//! instance. Destinations use this to decide which payload fields need a
//! keyword index before a sync's first write.

use serde::{Deserialize, Serialize};

/// How a field should be indexed at the destination, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Keyword,
    Integer,
    Bool,
    None,
}

/// Describes one field that destinations may want indexed for filtering,
/// independent of the field's role in hashing/embedding (that lives on
/// `entity::SourceFields`, which is keyed per-instance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFlags {
    pub name: &'static str,
    pub index: IndexKind,
}

/// Fields every entity payload carries regardless of source, and the
/// index every destination implementation must ensure exists before the
/// first upsert of a sync.
pub const COMMON_INDEXED_FIELDS: &[FieldFlags] = &[
    FieldFlags {
        name: "sync_id",
        index: IndexKind::Keyword,
    },
    FieldFlags {
        name: "entity_type",
        index: IndexKind::Keyword,
    },
    FieldFlags {
        name: "original_entity_id",
        index: IndexKind::Keyword,
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_fields_are_all_keyword() {
        assert!(COMMON_INDEXED_FIELDS
            .iter()
            .all(|f| f.index == IndexKind::Keyword));
    }
}
