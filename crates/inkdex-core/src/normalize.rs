//! Portfolio URL normalization and deterministic id derivation.
//!
//! Every identity in the pipeline hangs off the normalized portfolio URL:
//! the deduplication key, the `artist_id`, and the `candidate_id`. Two URLs
//! that differ only by scheme, `www.`, letter case, trailing slashes, query
//! string, or fragment normalize to the same key.
//!
//! ```rust
//! use inkdex_core::normalize::{artist_id, normalize_portfolio_url};
//!
//! let a = normalize_portfolio_url("https://www.Instagram.com/InkByMara/?hl=en").unwrap();
//! let b = normalize_portfolio_url("instagram.com/inkbymara").unwrap();
//! assert_eq!(a, "instagram.com/inkbymara");
//! assert_eq!(artist_id(&a), artist_id(&b));
//! ```

use uuid::Uuid;

/// Namespace for artist ids. Changing it re-keys every artist in the store.
const ARTIST_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_0c3e_52d4_4a0b_9c1e_7f2a_d8e4_1b90);

/// Namespace for per-run candidate ids.
const CANDIDATE_NAMESPACE: Uuid = Uuid::from_u128(0x2e0a_94b7_1c6f_4d85_a3b2_5e9c_0f17_c6d4);

/// Normalize a portfolio URL into its dedup key (`host/path`, lowercase).
///
/// Returns `None` when nothing host-like remains after stripping.
pub fn normalize_portfolio_url(raw: &str) -> Option<String> {
    let mut s = raw.trim().to_lowercase();

    for prefix in ["https://", "http://", "//"] {
        if let Some(rest) = s.strip_prefix(prefix) {
            s = rest.to_string();
            break;
        }
    }

    if let Some(cut) = s.find(['?', '#']) {
        s.truncate(cut);
    }

    // Drop any userinfo before the host.
    let (host_part, path_part) = match s.find('/') {
        Some(i) => (&s[..i], &s[i..]),
        None => (s.as_str(), ""),
    };
    let host = host_part.rsplit('@').next().unwrap_or(host_part);
    let host = host.strip_prefix("www.").unwrap_or(host);
    let host = host.strip_suffix(":443").unwrap_or(host);
    let host = host.strip_suffix(":80").unwrap_or(host);

    if host.is_empty() || !host.contains('.') || host.contains(char::is_whitespace) {
        return None;
    }

    let path: String = path_part
        .split('/')
        .filter(|seg| !seg.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    if path.is_empty() {
        Some(host.to_string())
    } else {
        Some(format!("{}/{}", host, path))
    }
}

/// The URL stored on records for a normalized key.
pub fn canonical_portfolio_url(normalized: &str) -> String {
    format!("https://{}", normalized)
}

/// Host part of a normalized key.
pub fn host_of(normalized: &str) -> &str {
    normalized.split('/').next().unwrap_or(normalized)
}

/// The account handle of a normalized key: its first path segment, without
/// a leading `@`.
pub fn handle_of(normalized: &str) -> Option<String> {
    let seg = normalized.split('/').nth(1)?;
    let handle = seg.trim_start_matches('@');
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

/// Deterministic artist id for a normalized portfolio key.
pub fn artist_id(normalized: &str) -> String {
    Uuid::new_v5(&ARTIST_NAMESPACE, normalized.as_bytes()).to_string()
}

/// Deterministic candidate id, so identical markup yields identical output.
pub fn candidate_id(source_id: &str, normalized: &str) -> String {
    let name = format!("{}\n{}", source_id, normalized);
    Uuid::new_v5(&CANDIDATE_NAMESPACE, name.as_bytes()).to_string()
}

/// Lowercase slug used in composite index keys (`"New York"` → `"new-york"`).
pub fn slug(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut dash = false;
    for c in s.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
