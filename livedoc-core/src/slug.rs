//! Heading anchor generation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

static HYPHEN_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").expect("valid hyphen regex"));

/// Convert heading text to the anchor id it renders with
///
/// # Examples
///
/// ```
/// use livedoc_core::slugify;
///
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("Rust & Safety"), "rust-safety");
/// ```
pub fn slugify(input: &str) -> String {
    let lowercased = input.to_lowercase();

    let cleaned = lowercased
        .graphemes(true)
        .filter_map(|g| match g {
            " " | "_" | "\t" | "\n" => Some("-"),
            _ => {
                let c = g.chars().next()?;
                (c.is_alphanumeric() || c == '-').then_some(g)
            }
        })
        .collect::<String>();

    HYPHEN_RUNS
        .replace_all(&cleaned, "-")
        .trim_matches('-')
        .to_string()
}

/// Hands out unique anchors for headings in document order
///
/// A repeated title gets `-1`, `-2`, ... appended.
#[derive(Debug, Default)]
pub struct AnchorAllocator {
    seen: HashMap<String, usize>,
}

impl AnchorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, title: &str) -> String {
        let base = slugify(title);
        let count = self.seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base
        } else {
            format!("{base}-{count}")
        };
        *count += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_slugify() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("Node.js Tips"), "nodejs-tips");
        assert_eq!(slugify("What's new?"), "whats-new");
    }

    #[test]
    fn test_unicode() {
        assert_eq!(slugify("Café"), "café");
    }

    #[test]
    fn test_whitespace_and_underscores() {
        assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
        assert_eq!(slugify("rust_lang_basics"), "rust-lang-basics");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_duplicate_titles_get_suffixes() {
        let mut anchors = AnchorAllocator::new();
        assert_eq!(anchors.allocate("Setup"), "setup");
        assert_eq!(anchors.allocate("Setup"), "setup-1");
        assert_eq!(anchors.allocate("Other"), "other");
        assert_eq!(anchors.allocate("Setup"), "setup-2");
    }
}
