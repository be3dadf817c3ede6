//! Semantic type recognizer (§4.2).
//!
//! A prioritized rule table, not a subclass hierarchy: custom rules are data
//! (name, matcher, confidence) fed into a [`RecognizerBuilder`] that produces
//! an immutable [`Recognizer`]. This is the Rust shape of the Python
//! source's "subclass `SemanticTypeRecognizer` to add patterns" extension
//! point (§9, `original_source/examples/04_custom_semantic_types.py`).

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::token::{Token, TypeTag};

/// Default confidence threshold τ below which a token falls back to `UNKNOWN`.
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SemanticType {
    Timestamp,
    Ipv4,
    Ipv6,
    Severity,
    Url,
    Path,
    Uuid,
    HexId,
    NumericId,
    Duration,
    ByteCount,
    UserId,
    Unknown,
    /// A caller-registered custom type, addressed by index into the
    /// recognizer's custom-rule table rather than by name, so `SemanticType`
    /// stays `Copy`.
    Custom(u16),
}

/// Where a custom rule is spliced relative to the built-in table (§9 Open
/// Questions: "Priority::Before/After the built-ins").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Before,
    After,
}

pub struct CustomRule {
    pub name: String,
    pub pattern: Regex,
    pub confidence: f64,
    pub priority: Priority,
}

static SEVERITY_WORDS: &[&str] = &[
    "TRACE", "DEBUG", "INFO", "NOTICE", "WARN", "WARNING", "ERROR", "ERR", "FATAL", "CRITICAL",
    "EMERG", "ALERT",
];

static DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+(\.\d+)?(ns|us|µs|ms|s|m|h)$").unwrap());
static BYTE_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\d+(\.\d+)?(b|kb|mb|gb|tb|kib|mib|gib)$").unwrap());
static USER_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(uid|u)[-_]?\d+$").unwrap());

/// Immutable, ordered rule table. Construct via [`RecognizerBuilder`].
pub struct Recognizer {
    before: Vec<CustomRule>,
    after: Vec<CustomRule>,
    threshold: f64,
}

impl Default for Recognizer {
    fn default() -> Self {
        RecognizerBuilder::new().build()
    }
}

#[derive(Default)]
pub struct RecognizerBuilder {
    before: Vec<CustomRule>,
    after: Vec<CustomRule>,
    threshold: Option<f64>,
}

impl RecognizerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_custom_rule(
        mut self,
        name: impl Into<String>,
        pattern: Regex,
        confidence: f64,
        priority: Priority,
    ) -> Self {
        let rule = CustomRule {
            name: name.into(),
            pattern,
            confidence,
            priority,
        };
        match priority {
            Priority::Before => self.before.push(rule),
            Priority::After => self.after.push(rule),
        }
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    pub fn build(self) -> Recognizer {
        Recognizer {
            before: self.before,
            after: self.after,
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
        }
    }
}

impl Recognizer {
    /// Name of a custom semantic type, for display purposes. Panics if the
    /// index is out of range; callers only ever see indices this recognizer
    /// produced.
    pub fn custom_name(&self, index: u16) -> &str {
        let idx = index as usize;
        if idx < self.before.len() {
            &self.before[idx].name
        } else {
            &self.after[idx - self.before.len()].name
        }
    }

    /// Classifies one token. Never fails; falls back to `Unknown` (§4.2
    /// failure semantics).
    pub fn recognize(&self, token: &Token) -> (SemanticType, f64) {
        for (i, rule) in self.before.iter().enumerate() {
            if rule.confidence >= self.threshold && rule.pattern.is_match(&token.raw) {
                return (SemanticType::Custom(i as u16), rule.confidence);
            }
        }

        if let Some(hit) = self.recognize_builtin(token) {
            if hit.1 >= self.threshold {
                return hit;
            }
        }

        for (i, rule) in self.after.iter().enumerate() {
            if rule.confidence >= self.threshold && rule.pattern.is_match(&token.raw) {
                return (
                    SemanticType::Custom((self.before.len() + i) as u16),
                    rule.confidence,
                );
            }
        }

        (SemanticType::Unknown, 0.0)
    }

    fn recognize_builtin(&self, token: &Token) -> Option<(SemanticType, f64)> {
        if token.tag == TypeTag::Timestamp {
            return Some((SemanticType::Timestamp, 0.95));
        }
        if token.tag == TypeTag::Ipv4 {
            return Some((SemanticType::Ipv4, 0.95));
        }
        if token.tag == TypeTag::Ipv6 {
            return Some((SemanticType::Ipv6, 0.95));
        }
        if token.tag == TypeTag::Uuid {
            return Some((SemanticType::Uuid, 0.95));
        }
        if token.tag == TypeTag::Url {
            return Some((SemanticType::Url, 0.95));
        }
        if token.tag == TypeTag::Path {
            return Some((SemanticType::Path, 0.95));
        }
        if token.tag == TypeTag::Hex {
            return Some((SemanticType::HexId, 0.95));
        }

        let upper: Cow<str> = if token.raw.chars().all(|c| c.is_ascii()) {
            Cow::Owned(token.raw.to_ascii_uppercase())
        } else {
            Cow::Borrowed(&token.raw)
        };
        if SEVERITY_WORDS.contains(&upper.as_ref()) {
            return Some((SemanticType::Severity, 0.95));
        }

        if token.tag == TypeTag::Integer {
            return Some((SemanticType::NumericId, 0.8));
        }

        if DURATION_RE.is_match(&token.raw) {
            return Some((SemanticType::Duration, 0.85));
        }
        if BYTE_COUNT_RE.is_match(&token.raw) {
            return Some((SemanticType::ByteCount, 0.85));
        }
        if USER_ID_RE.is_match(&token.raw) {
            return Some((SemanticType::UserId, 0.85));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex_str;

    fn recognize_word(r: &Recognizer, word: &str) -> SemanticType {
        let tokens = lex_str(word);
        r.recognize(&tokens[0]).0
    }

    #[test]
    fn severity_case_insensitive() {
        let r = Recognizer::default();
        assert_eq!(recognize_word(&r, "error"), SemanticType::Severity);
        assert_eq!(recognize_word(&r, "WARN"), SemanticType::Severity);
    }

    #[test]
    fn lexical_classes_promoted_with_high_confidence() {
        let r = Recognizer::default();
        let tokens = lex_str("10.0.0.1");
        let (ty, conf) = r.recognize(&tokens[0]);
        assert_eq!(ty, SemanticType::Ipv4);
        assert!(conf >= 0.9);
    }

    #[test]
    fn unknown_falls_back_cleanly() {
        let r = Recognizer::default();
        assert_eq!(recognize_word(&r, "hello"), SemanticType::Unknown);
    }

    #[test]
    fn custom_rule_wins_before_builtins() {
        let r = RecognizerBuilder::new()
            .with_custom_rule(
                "ORDER_ID",
                Regex::new(r"^ORDER-\d+$").unwrap(),
                0.95,
                Priority::Before,
            )
            .build();
        assert_eq!(
            recognize_word(&r, "ORDER-12345"),
            SemanticType::Custom(0)
        );
    }

    #[test]
    fn custom_rule_after_does_not_shadow_builtin() {
        let r = RecognizerBuilder::new()
            .with_custom_rule(
                "LOOSE_NUMBER",
                Regex::new(r"^\d+$").unwrap(),
                0.99,
                Priority::After,
            )
            .build();
        // Integer is already classified NumericId by the builtin table,
        // so the "after" rule never gets a chance.
        assert_eq!(recognize_word(&r, "42"), SemanticType::NumericId);
    }

    #[test]
    fn duration_and_byte_count() {
        let r = Recognizer::default();
        assert_eq!(recognize_word(&r, "250ms"), SemanticType::Duration);
        assert_eq!(recognize_word(&r, "4.5MB"), SemanticType::ByteCount);
    }
}
