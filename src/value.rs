//! Runtime value type for decoded variable columns (§3 "Column").
//!
//! Mirrors the tagged-variant shape used throughout this codebase for
//! `Token`/`SemanticType`: dispatch on the tag, never on a class hierarchy.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A decoded column value. Every codec in [`crate::column`] produces and
/// consumes `Value`s of a single variant per column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    I64(i64),
    F64(f64),
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    Bytes(Vec<u8>),
    Null,
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Ipv4(_) => "ipv4",
            Value::Ipv6(_) => "ipv6",
            Value::Bytes(_) => "bytes",
            Value::Null => "null",
        }
    }

    /// Best-effort rendering used during line reconstruction (§4.6 materialize)
    /// and in formatted query output. Every variant round-trips to the literal
    /// text that was tokenized, except `Bytes`/`Null` which never appear there.
    pub fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::I64(i) => i.to_string(),
            Value::F64(f) => f.to_string(),
            Value::Ipv4(octets) => octets
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join("."),
            Value::Ipv6(segments) => {
                let mut groups = [0u16; 8];
                for (i, g) in groups.iter_mut().enumerate() {
                    *g = u16::from_be_bytes([segments[i * 2], segments[i * 2 + 1]]);
                }
                groups
                    .iter()
                    .map(|g| format!("{g:x}"))
                    .collect::<Vec<_>>()
                    .join(":")
            }
            Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Value::Null => String::new(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
