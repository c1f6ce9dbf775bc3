//! Cross-source candidate deduplication.
//!
//! Studios frequently link the same guest or resident artist, so one run's
//! candidate set overlaps heavily. [`deduplicate`] keeps exactly one
//! candidate per normalized portfolio URL:
//!
//! - the first-seen candidate keeps its `candidate_id` and `source_id`, which
//!   makes its studio the artist's `source_studio_id`;
//! - the display-name hint is the longest non-empty hint among all
//!   duplicates (first seen wins a tie);
//! - output order is first-appearance order.
//!
//! Pure function; never fails.

use std::collections::HashMap;

use crate::models::ProfileCandidate;
use crate::normalize::{canonical_portfolio_url, normalize_portfolio_url};

/// Result of one deduplication pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub unique: Vec<ProfileCandidate>,
    pub duplicates_dropped: usize,
}

pub fn deduplicate(candidates: Vec<ProfileCandidate>) -> DedupOutcome {
    let total = candidates.len();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ProfileCandidate> = Vec::new();

    for mut candidate in candidates {
        let key = dedup_key(&candidate.portfolio_url);
        let hint = clean_hint(candidate.display_name_hint.take());

        match index.get(&key) {
            Some(&pos) => {
                let kept = &mut unique[pos];
                if longer_hint(hint.as_deref(), kept.display_name_hint.as_deref()) {
                    kept.display_name_hint = hint;
                }
            }
            None => {
                if normalize_portfolio_url(&candidate.portfolio_url).is_some() {
                    candidate.portfolio_url = canonical_portfolio_url(&key);
                }
                candidate.display_name_hint = hint;
                index.insert(key, unique.len());
                unique.push(candidate);
            }
        }
    }

    let duplicates_dropped = total - unique.len();
    DedupOutcome {
        unique,
        duplicates_dropped,
    }
}

/// Normalized URL, or the case-folded raw text when the URL does not parse.
fn dedup_key(url: &str) -> String {
    normalize_portfolio_url(url).unwrap_or_else(|| url.trim().to_lowercase())
}

fn clean_hint(hint: Option<String>) -> Option<String> {
    hint.map(|h| h.trim().to_string()).filter(|h| !h.is_empty())
}

fn longer_hint(candidate: Option<&str>, current: Option<&str>) -> bool {
    match (candidate, current) {
        (Some(c), Some(k)) => c.chars().count() > k.chars().count(),
        (Some(_), None) => true,
        _ => false,
    }
}
