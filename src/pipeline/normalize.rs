//! Cell text normalization (spec §4.2 step 4): trim whitespace, collapse
//! runs of spaces, strip invisible characters, and produce a lowercased
//! shadow used only for matching.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Characters that carry no visible content and should be dropped entirely
/// rather than collapsed into a space (zero-width space, BOM/zero-width
/// no-break space, soft hyphen).
const INVISIBLE_CHARS: &[char] = &['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}'];

/// Returns `(display_text, normalized_text)`: the cleaned-up text, and its
/// lowercased shadow used only for matching (spec §4.2, §3 `match`
/// invariant).
pub fn normalize_cell(raw: &str) -> (String, String) {
    let without_invisible: String =
        raw.chars().filter(|c| !INVISIBLE_CHARS.contains(c) && (!c.is_control() || c.is_whitespace())).collect();
    let collapsed = WHITESPACE_RUN.replace_all(&without_invisible, " ");
    let display = collapsed.trim().to_string();
    let normalized = display.to_lowercase();
    (display, normalized)
}

/// Grapheme-cluster length, used for subject-column election (spec §4.2
/// step 3: "highest mean cell length").
pub fn grapheme_len(text: &str) -> usize {
    text.graphemes(true).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_trims() {
        let (display, normalized) = normalize_cell("  Zooey   Deschanel \n");
        assert_eq!(display, "Zooey Deschanel");
        assert_eq!(normalized, "zooey deschanel");
    }

    #[test]
    fn strips_invisible_characters() {
        let (display, _) = normalize_cell("Los\u{200B} Angeles");
        assert_eq!(display, "Los Angeles");
    }

    #[test]
    fn grapheme_len_counts_visible_characters() {
        assert_eq!(grapheme_len("United States"), 13);
    }
}
