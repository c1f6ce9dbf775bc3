//! Tattoo style vocabulary and keyword tagging.
//!
//! Styles are derived from free text (bio, display name) by matching whole
//! words against a fixed vocabulary of 22 canonical styles plus common
//! spellings. Output is in vocabulary order, without duplicates, so the
//! same text always yields the same `styles[]`.

struct StyleRule {
    style: &'static str,
    phrases: &'static [&'static str],
    /// Words that, immediately preceding a phrase, cancel the match
    /// ("neo traditional" is not "traditional").
    not_after: &'static [&'static str],
}

const RULES: &[StyleRule] = &[
    StyleRule { style: "old_school", phrases: &["old school", "oldschool"], not_after: &[] },
    StyleRule { style: "traditional", phrases: &["traditional", "trad"], not_after: &["neo", "neotraditional"] },
    StyleRule { style: "new_school", phrases: &["new school", "newschool"], not_after: &[] },
    StyleRule { style: "neo_traditional", phrases: &["neo traditional", "neotraditional", "neo trad", "neotrad"], not_after: &[] },
    StyleRule { style: "tribal", phrases: &["tribal", "polynesian"], not_after: &[] },
    StyleRule { style: "blackwork", phrases: &["blackwork", "black work"], not_after: &[] },
    StyleRule { style: "dotwork", phrases: &["dotwork", "dot work", "stipple", "stippling"], not_after: &[] },
    StyleRule { style: "geometric", phrases: &["geometric", "geometry", "sacred geometry"], not_after: &[] },
    StyleRule { style: "japanese", phrases: &["japanese", "irezumi"], not_after: &[] },
    StyleRule { style: "lettering", phrases: &["lettering", "script"], not_after: &[] },
    StyleRule { style: "biomechanical", phrases: &["biomechanical", "biomech", "bio mechanical"], not_after: &[] },
    StyleRule { style: "watercolour", phrases: &["watercolour", "watercolor"], not_after: &[] },
    StyleRule { style: "floral", phrases: &["floral", "botanical", "flowers"], not_after: &[] },
    StyleRule { style: "fineline", phrases: &["fineline", "fine line", "single needle"], not_after: &[] },
    StyleRule { style: "realism", phrases: &["realism", "realistic", "photorealism"], not_after: &[] },
    StyleRule { style: "minimalist", phrases: &["minimalist", "minimal", "minimalism"], not_after: &[] },
    StyleRule { style: "surrealism", phrases: &["surrealism", "surreal", "surrealist"], not_after: &[] },
    StyleRule { style: "portrait", phrases: &["portrait", "portraits", "portraiture"], not_after: &[] },
    StyleRule { style: "sketch", phrases: &["sketch", "sketchy", "sketchwork"], not_after: &[] },
    StyleRule { style: "illustrative", phrases: &["illustrative", "illustration"], not_after: &[] },
    StyleRule { style: "ornamental", phrases: &["ornamental", "ornament", "mandala"], not_after: &[] },
    StyleRule { style: "trash_polka", phrases: &["trash polka", "trashpolka"], not_after: &[] },
];

/// Canonical style names, in vocabulary order.
pub fn vocabulary() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|r| r.style)
}

/// Whether `style` is one of the canonical names.
pub fn is_known_style(style: &str) -> bool {
    RULES.iter().any(|r| r.style == style)
}

/// Tag free text with canonical styles.
pub fn detect_styles(text: &str) -> Vec<String> {
    let words = tokenize(text);
    if words.is_empty() {
        return Vec::new();
    }

    RULES
        .iter()
        .filter(|rule| rule.phrases.iter().any(|p| phrase_matches(&words, p, rule.not_after)))
        .map(|rule| rule.style.to_string())
        .collect()
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn phrase_matches(words: &[String], phrase: &str, not_after: &[&str]) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    if needle.len() > words.len() {
        return false;
    }
    (0..=words.len() - needle.len()).any(|start| {
        let hit = needle
            .iter()
            .enumerate()
            .all(|(i, w)| words[start + i] == *w);
        let blocked = start > 0 && not_after.contains(&words[start - 1].as_str());
        hit && !blocked
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_has_twenty_two_styles() {
        assert_eq!(vocabulary().count(), 22);
        assert!(is_known_style("trash_polka"));
        assert!(!is_known_style("cubism"));
    }

    #[test]
    fn detects_spelling_variants() {
        let styles = detect_styles("Fine line & black-work specialist. Watercolor on request!");
        assert_eq!(styles, vec!["blackwork", "watercolour", "fineline"]);
    }

    #[test]
    fn neo_traditional_does_not_imply_traditional() {
        assert_eq!(detect_styles("Neo-Traditional artist"), vec!["neo_traditional"]);
        assert_eq!(
            detect_styles("traditional and neo trad flash"),
            vec!["traditional", "neo_traditional"]
        );
    }

    #[test]
    fn whole_words_only() {
        // "surrealism" must not also tag "realism".
        assert_eq!(detect_styles("surrealism"), vec!["surrealism"]);
        assert!(detect_styles("scripture").is_empty());
    }

    #[test]
    fn empty_text_has_no_styles() {
        assert!(detect_styles("").is_empty());
        assert!(detect_styles("!!! ...").is_empty());
    }

    #[test]
    fn output_is_deduplicated_and_ordered() {
        let styles = detect_styles("japanese irezumi, Japanese sleeves, old school");
        assert_eq!(styles, vec!["old_school", "japanese"]);
    }
}
