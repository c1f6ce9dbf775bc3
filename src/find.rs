//! Index lookups by city and style (`inkdex find`).
//!
//! Reads only the search index, through the composite keys written by the
//! projection. Delisted documents are hidden unless asked for.

use anyhow::Result;
use inkdex_core::models::EntityType;
use inkdex_core::store::{DocumentFilter, SearchIndex};
use inkdex_core::styles::{detect_styles, is_known_style};
use tracing::warn;

use crate::config::Config;
use crate::db;

pub struct FindArgs {
    pub style: Option<String>,
    pub city: Option<String>,
    pub entity_type: Option<EntityType>,
    pub include_delisted: bool,
    pub limit: usize,
    pub json: bool,
}

/// Map user input to a canonical style name. Spelling variants such as
/// "fine line" resolve through the tagger; anything else is lowercased.
pub fn canonical_style(input: &str) -> String {
    let lowered = input.trim().to_lowercase();
    if is_known_style(&lowered) {
        return lowered;
    }
    match detect_styles(&lowered).into_iter().next() {
        Some(style) => style,
        None => {
            warn!(style = %lowered, "not a known style; the lookup will likely be empty");
            lowered
        }
    }
}

pub fn filter_for(args: &FindArgs) -> DocumentFilter {
    DocumentFilter {
        entity_type: args.entity_type,
        city: args.city.clone(),
        style: args.style.as_deref().map(canonical_style),
        include_delisted: args.include_delisted,
        limit: Some(args.limit),
    }
}

pub async fn run_find(config: &Config, args: &FindArgs) -> Result<()> {
    let index = db::open_index(config).await?;
    let docs = index.find(&filter_for(args)).await?;
    index.pool().close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&docs)?);
        return Ok(());
    }
    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, doc) in docs.iter().enumerate() {
        println!(
            "{}. {} / {}{}",
            i + 1,
            doc.entity_type,
            doc.title,
            if doc.delisted { " [delisted]" } else { "" }
        );
        println!("    city: {}", doc.city.as_deref().unwrap_or("unknown"));
        if !doc.styles.is_empty() {
            println!("    styles: {}", doc.styles.join(", "));
        }
        println!("    url: {}", doc.url);
        println!("    id: {}", doc.doc_id);
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_is_lowercased_for_key_lookup() {
        let f = filter_for(&FindArgs {
            style: Some(" Blackwork ".into()),
            city: Some("Austin".into()),
            entity_type: None,
            include_delisted: false,
            limit: 5,
            json: false,
        });
        assert_eq!(f.style.as_deref(), Some("blackwork"));
        assert_eq!(f.limit, Some(5));
    }

    #[test]
    fn style_variants_resolve_to_canonical_names() {
        assert_eq!(canonical_style("Fine Line"), "fineline");
        assert_eq!(canonical_style("neo_traditional"), "neo_traditional");
        assert_eq!(canonical_style("watercolor"), "watercolour");
        assert_eq!(canonical_style("cubism"), "cubism");
    }
}
