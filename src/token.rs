//! Typed lexemes produced by the lexer (§3, §4.1).
//!
//! A [`Token`] is produced once per line and never mutated after emission.

use serde::{Deserialize, Serialize};

/// Lexical class assigned by the finite-state lexer, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TypeTag {
    Timestamp,
    Ipv6,
    Ipv4,
    Uuid,
    Url,
    Path,
    Hex,
    Float,
    Integer,
    QuotedString,
    Bracketed,
    Severity,
    Word,
    Punctuation,
    Whitespace,
    Other,
}

impl TypeTag {
    /// Whether this lexical class is ever assigned `UNKNOWN` semantic type with
    /// high confidence by the built-in recognizer table (§4.2).
    pub fn is_structured(self) -> bool {
        !matches!(self, TypeTag::Word | TypeTag::Other | TypeTag::Punctuation)
    }
}

/// A single typed lexeme. `raw` is the exact byte span from the source line,
/// already lossily re-decoded to UTF-8 (invalid sequences become U+FFFD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub tag: TypeTag,
    pub raw: String,
    /// Byte offset of this token within its originating line, for diagnostics only.
    pub start: usize,
}

impl Token {
    pub fn new(tag: TypeTag, raw: impl Into<String>, start: usize) -> Self {
        Token {
            tag,
            raw: raw.into(),
            start,
        }
    }

    #[inline]
    pub fn is_whitespace(&self) -> bool {
        self.tag == TypeTag::Whitespace
    }
}

/// A fully tokenized log line together with its ingestion-order identity.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub log_id: u64,
    pub tokens: Vec<Token>,
    /// Set when the line was cut short by `max_line_bytes` (§4.1, §8 boundary behaviors).
    pub truncated: bool,
}
