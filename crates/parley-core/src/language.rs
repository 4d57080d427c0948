//! Lexical language heuristic: English vs Roman Urdu.
//!
//! Counts Roman Urdu marker words and the share of plain alphabetic tokens
//! that are not Roman Urdu vocabulary. Never fails; every input maps to one
//! of the two labels.

use crate::types::Language;

/// Inputs with at most this many tokens use the short-input thresholds.
const SHORT_INPUT_TOKENS: usize = 4;

/// Marker count at or above which the input is Roman Urdu.
const MARKER_THRESHOLD: usize = 2;

/// Alphabetic ratio above which short input is English.
const SHORT_ALPHA_RATIO: f64 = 0.5;

/// Roman Urdu marker words.
const ROMAN_URDU_MARKERS: &[&str] = &[
    "aap", "hai", "hay", "hain", "kar", "main", "yeh", "woh", "kya", "kyun", "kab", "kahan",
    "kaisa", "kitna", "mera", "tera", "hamara", "tumhara", "unka", "iska", "uska", "nahi",
    "nahin", "bilkul", "bohot", "bahut", "thoda", "zyada", "paani", "pani", "khana", "ghar",
    "kaam", "waqt", "saal", "mahina", "din", "raat", "subah", "sham", "achha", "acha", "bura",
    "sundar", "khoobsurat", "mushkil", "aasan", "shukriya", "maaf", "ji", "han", "haan", "ka",
    "ki", "ke", "ko", "hal", "theek", "kaise", "salam", "salaam", "assalam", "walaikum",
];

/// Token counts behind a classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LanguageScore {
    /// Number of whitespace-separated tokens.
    pub total: usize,
    /// Tokens found in the Roman Urdu marker lexicon.
    pub markers: usize,
    /// Purely alphabetic ASCII tokens outside the marker lexicon.
    pub alphabetic: usize,
}

impl LanguageScore {
    /// Share of tokens that look like English words.
    pub fn alphabetic_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.alphabetic as f64 / self.total as f64
    }

    /// Apply the decision policy.
    pub fn decide(&self) -> Language {
        if self.markers >= MARKER_THRESHOLD {
            return Language::RomanUrdu;
        }
        if self.total <= SHORT_INPUT_TOKENS {
            if self.alphabetic_ratio() > SHORT_ALPHA_RATIO {
                Language::English
            } else {
                Language::RomanUrdu
            }
        } else {
            // Longer input without enough markers is English whatever the ratio.
            Language::English
        }
    }
}

/// Tokenize and count markers and alphabetic tokens.
pub fn score(text: &str) -> LanguageScore {
    let mut total = 0;
    let mut markers = 0;
    let mut alphabetic = 0;

    for raw in text.split_whitespace() {
        let token = raw
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if token.is_empty() {
            continue;
        }
        total += 1;
        if is_marker(&token) {
            markers += 1;
        } else if token.chars().all(|c| c.is_ascii_lowercase()) {
            alphabetic += 1;
        }
    }

    LanguageScore {
        total,
        markers,
        alphabetic,
    }
}

/// Classify `text` as English or Roman Urdu.
pub fn classify(text: &str) -> Language {
    score(text).decide()
}

fn is_marker(token: &str) -> bool {
    ROMAN_URDU_MARKERS.contains(&token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_greeting_takes_default_branch() {
        let s = score("salam");
        assert_eq!(s.total, 1);
        assert_eq!(s.markers, 1);
        assert_eq!(s.alphabetic, 0);
        assert_eq!(classify("salam"), Language::RomanUrdu);
    }

    #[test]
    fn test_short_roman_urdu_question() {
        let s = score("kya hal hai aap ka");
        assert!(s.markers >= 2);
        assert_eq!(classify("kya hal hai aap ka"), Language::RomanUrdu);
    }

    #[test]
    fn test_english_question() {
        let s = score("What are your insurance plans");
        assert_eq!(s.total, 5);
        assert_eq!(s.markers, 0);
        assert_eq!(s.alphabetic, 5);
        assert_eq!(classify("What are your insurance plans"), Language::English);
    }

    #[test]
    fn test_punctuation_is_stripped_from_token_edges() {
        let s = score("What are your insurance plans?");
        assert_eq!(s.alphabetic, 5);
        assert_eq!(classify("Hello, there!"), Language::English);
    }

    #[test]
    fn test_short_input_numeric_defaults_to_roman_urdu() {
        // No alphabetic tokens, no markers: short default branch.
        assert_eq!(classify("123 456"), Language::RomanUrdu);
    }

    #[test]
    fn test_long_input_numeric_defaults_to_english() {
        assert_eq!(classify("1 2 3 4 5 6"), Language::English);
    }

    #[test]
    fn test_single_marker_in_long_english_sentence() {
        // One marker is below the threshold.
        let text = "Please tell me about the main insurance plan";
        assert_eq!(score(text).markers, 1);
        assert_eq!(classify(text), Language::English);
    }

    #[test]
    fn test_mixed_long_sentence_with_two_markers() {
        let text = "mujhe doctor ki appointment chahiye kya ye possible hai";
        assert_eq!(classify(text), Language::RomanUrdu);
    }

    #[test]
    fn test_empty_input_never_panics() {
        let s = score("");
        assert_eq!(s.total, 0);
        assert_eq!(s.alphabetic_ratio(), 0.0);
        assert_eq!(classify(""), Language::RomanUrdu);
        assert_eq!(classify("   \t\n"), Language::RomanUrdu);
    }

    #[test]
    fn test_non_ascii_tokens_are_not_alphabetic() {
        let s = score("سلام دوست");
        assert_eq!(s.total, 2);
        assert_eq!(s.alphabetic, 0);
        assert_eq!(classify("سلام دوست"), Language::RomanUrdu);
    }

    #[test]
    fn test_short_ratio_boundary() {
        // 2 of 4 alphabetic = 0.5, not strictly greater.
        assert_eq!(classify("hello world 12 34"), Language::RomanUrdu);
        // 3 of 4 = 0.75.
        assert_eq!(classify("hello big world 12"), Language::English);
    }

    #[test]
    fn test_case_insensitive_markers() {
        assert_eq!(score("KYA Hai").markers, 2);
    }
}
