//! `{{field}}` placeholder scanning

use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid pattern");
}

/// A placeholder occurrence in a piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderMatch {
    /// Byte range of the whole token, braces included
    pub range: Range<usize>,
    /// Field name with surrounding whitespace removed
    pub name: String,
}

/// Find placeholders in order; `{{ }}` and unterminated braces are not placeholders
pub fn find_placeholders(text: &str) -> Vec<PlaceholderMatch> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim();
            if name.is_empty() {
                return None;
            }
            Some(PlaceholderMatch {
                range: whole.range(),
                name: name.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(text: &str) -> Vec<String> {
        find_placeholders(text).into_iter().map(|m| m.name).collect()
    }

    #[test]
    fn test_finds_names_in_order() {
        assert_eq!(
            names("Batch {{Batch}} lot {{ Lot }} qty {{Qty}}"),
            vec!["Batch", "Lot", "Qty"]
        );
    }

    #[test]
    fn test_ranges_cover_braces() {
        let text = "x{{ Batch No }}y";
        let found = find_placeholders(text);
        assert_eq!(found.len(), 1);
        assert_eq!(&text[found[0].range.clone()], "{{ Batch No }}");
        assert_eq!(found[0].name, "Batch No");
    }

    #[test]
    fn test_ignores_non_placeholders() {
        assert!(names("{{}} {{ }} {{open {single} }}").is_empty());
        assert!(names("plain text").is_empty());
    }

    #[test]
    fn test_nested_opening_braces_take_innermost() {
        assert_eq!(names("{{{{Batch}}"), vec!["Batch"]);
    }
}
