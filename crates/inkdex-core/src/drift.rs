//! Drift classification between the canonical store and the search index.
//!
//! [`classify_drift`] is the pure half of reconciliation: given what each
//! side holds (id, version, delisted flag, content), it returns one [`DriftRecord`]
//! per entity whose two sides disagree. Repairing is the sync engine's job.
//!
//! | Store | Index | Classification |
//! |-------|-------|----------------|
//! | present | absent | `missing_in_index` |
//! | absent | present | `orphan_in_index` |
//! | version `v` | version `< v` | `stale_in_index` |
//! | version `v` | version `> v` | `missing_in_store` |
//! | `v`, not delisted | `v`, delisted | `missing_in_store` (index-authored delisting) |
//! | `v`, delisted | `v`, not delisted | `stale_in_index` |
//! | `v`, projects to content `c` | `v`, content `≠ c` | `stale_in_index` |
//!
//! Content is compared only when both sides carry it (see
//! [`content_fingerprint`](crate::project::content_fingerprint)). An artist
//! document projected before its studio existed has the right version but
//! the wrong city; content is what tells it apart.

use std::collections::BTreeMap;

use crate::models::{DriftClass, DriftRecord, EntityType};

/// What one side holds for an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEntry {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub version: u64,
    pub delisted: bool,
    /// Fingerprint of the projected document, when known.
    pub content: Option<String>,
}

pub fn classify_drift(store: &[SideEntry], index: &[SideEntry]) -> Vec<DriftRecord> {
    let mut sides: BTreeMap<(EntityType, &str), (Option<&SideEntry>, Option<&SideEntry>)> =
        BTreeMap::new();
    for s in store {
        sides.entry((s.entity_type, s.entity_id.as_str())).or_default().0 = Some(s);
    }
    for i in index {
        sides.entry((i.entity_type, i.entity_id.as_str())).or_default().1 = Some(i);
    }

    sides
        .into_iter()
        .filter_map(|((entity_type, entity_id), pair)| {
            let classification = classify_pair(pair)?;
            Some(DriftRecord {
                entity_type,
                entity_id: entity_id.to_string(),
                store_version: pair.0.map(|s| s.version),
                index_version: pair.1.map(|i| i.version),
                classification,
            })
        })
        .collect()
}

fn classify_pair(pair: (Option<&SideEntry>, Option<&SideEntry>)) -> Option<DriftClass> {
    match pair {
        (Some(_), None) => Some(DriftClass::MissingInIndex),
        (None, Some(_)) => Some(DriftClass::OrphanInIndex),
        (Some(s), Some(i)) if i.version < s.version => Some(DriftClass::StaleInIndex),
        (Some(s), Some(i)) if i.version > s.version => Some(DriftClass::MissingInStore),
        (Some(s), Some(i)) if i.delisted && !s.delisted => Some(DriftClass::MissingInStore),
        (Some(s), Some(i)) if s.delisted && !i.delisted => Some(DriftClass::StaleInIndex),
        (Some(s), Some(i)) if content_differs(s, i) => Some(DriftClass::StaleInIndex),
        _ => None,
    }
}

fn content_differs(store: &SideEntry, index: &SideEntry) -> bool {
    matches!((&store.content, &index.content), (Some(a), Some(b)) if a != b)
}
