//! Hand-rolled finite-state lexer (§4.1).
//!
//! Regex-per-class backtracks badly on long lines with many potential
//! matches; a single combined scan is linear in input length and dominates
//! overall compression throughput, so classification is done with direct
//! byte/char inspection rather than a `Regex` per lexical class.

use crate::token::{Token, TypeTag};

pub const DEFAULT_MAX_LINE_BYTES: usize = 65_536;

/// Tokenizes one raw line. Never fails: malformed UTF-8 is recovered with
/// `String::from_utf8_lossy` before classification begins, and `truncated`
/// reports whether `max_line_bytes` cut the line short (§4.1, §8).
pub fn lex(raw: &[u8], max_line_bytes: usize) -> (Vec<Token>, bool) {
    let truncated = raw.len() > max_line_bytes;
    let bytes = if truncated { &raw[..max_line_bytes] } else { raw };
    let line = String::from_utf8_lossy(bytes);
    (lex_str(&line), truncated)
}

/// Tokenizes an already-decoded line. Exposed separately so callers that
/// already have valid UTF-8 (the common case) skip the lossy round trip.
pub fn lex_str(line: &str) -> Vec<Token> {
    let chars: Vec<char> = line.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut byte_offset = 0usize;

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            let start = i;
            let start_byte = byte_offset;
            while i < chars.len() && chars[i].is_whitespace() {
                byte_offset += chars[i].len_utf8();
                i += 1;
            }
            tokens.push(Token::new(
                TypeTag::Whitespace,
                chars[start..i].iter().collect::<String>(),
                start_byte,
            ));
            continue;
        }

        if let Some((tag, len)) = match_bracketed_or_quoted(&chars, i) {
            push_span(&mut tokens, &chars, i, len, tag, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_timestamp(&chars, i) {
            push_span(
                &mut tokens,
                &chars,
                i,
                len,
                TypeTag::Timestamp,
                byte_offset,
            );
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_ipv6(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Ipv6, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_ipv4(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Ipv4, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_uuid(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Uuid, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_url(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Url, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_path(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Path, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some(len) = match_hex(&chars, i) {
            push_span(&mut tokens, &chars, i, len, TypeTag::Hex, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if let Some((tag, len)) = match_number(&chars, i) {
            push_span(&mut tokens, &chars, i, len, tag, byte_offset);
            byte_offset += chars[i..i + len].iter().map(|c| c.len_utf8()).sum::<usize>();
            i += len;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            let start_byte = byte_offset;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                byte_offset += chars[i].len_utf8();
                i += 1;
            }
            tokens.push(Token::new(
                TypeTag::Word,
                chars[start..i].iter().collect::<String>(),
                start_byte,
            ));
            continue;
        }

        // Multi-character punctuation: "::" and "->" form a single token.
        if c == ':' && chars.get(i + 1) == Some(&':') {
            tokens.push(Token::new(TypeTag::Punctuation, "::", byte_offset));
            byte_offset += 2;
            i += 2;
            continue;
        }
        if c == '-' && chars.get(i + 1) == Some(&'>') {
            tokens.push(Token::new(TypeTag::Punctuation, "->", byte_offset));
            byte_offset += 2;
            i += 2;
            continue;
        }

        if c.is_ascii_punctuation() {
            tokens.push(Token::new(TypeTag::Punctuation, c.to_string(), byte_offset));
            byte_offset += c.len_utf8();
            i += 1;
            continue;
        }

        tokens.push(Token::new(TypeTag::Other, c.to_string(), byte_offset));
        byte_offset += c.len_utf8();
        i += 1;
    }

    tokens
}

fn push_span(
    tokens: &mut Vec<Token>,
    chars: &[char],
    start: usize,
    len: usize,
    tag: TypeTag,
    byte_offset: usize,
) {
    tokens.push(Token::new(
        tag,
        chars[start..start + len].iter().collect::<String>(),
        byte_offset,
    ));
}

/// Bracketed tokens `[...]`/`{...}` and quoted strings `"..."`/`'...'`.
/// Bracketed ISO-8601 timestamps are handled by [`match_timestamp`] first
/// since timestamp has higher priority than the generic bracketed class.
fn match_bracketed_or_quoted(chars: &[char], i: usize) -> Option<(TypeTag, usize)> {
    let open = chars[i];
    let (close, tag) = match open {
        '"' => ('"', TypeTag::QuotedString),
        '\'' => ('\'', TypeTag::QuotedString),
        _ => return None,
    };
    let mut j = i + 1;
    while j < chars.len() && chars[j] != close {
        j += 1;
    }
    if j < chars.len() {
        Some((tag, j + 1 - i))
    } else {
        None
    }
}

/// `[YYYY-MM-DD HH:MM:SS[.ms]]` or bare `YYYY-MM-DD HH:MM:SS[.ms]`, with or
/// without an ISO-8601 `T` separator and trailing `Z`/offset.
fn match_timestamp(chars: &[char], i: usize) -> Option<usize> {
    let bracketed = chars[i] == '[';
    let start = if bracketed { i + 1 } else { i };
    let mut j = start;

    let digits = |chars: &[char], from: usize, n: usize| -> bool {
        chars.get(from..from + n).is_some_and(|s| s.iter().all(|c| c.is_ascii_digit()))
    };

    if !digits(chars, j, 4) {
        return None;
    }
    j += 4;
    if chars.get(j) != Some(&'-') {
        return None;
    }
    j += 1;
    if !digits(chars, j, 2) {
        return None;
    }
    j += 2;
    if chars.get(j) != Some(&'-') {
        return None;
    }
    j += 1;
    if !digits(chars, j, 2) {
        return None;
    }
    j += 2;

    if matches!(chars.get(j), Some(' ') | Some('T')) && digits(chars, j + 1, 2) {
        j += 1;
        j += 2;
        if chars.get(j) == Some(&':') && digits(chars, j + 1, 2) {
            j += 1;
            j += 2;
            if chars.get(j) == Some(&':') && digits(chars, j + 1, 2) {
                j += 1;
                j += 2;
                if chars.get(j) == Some(&'.') {
                    let mut k = j + 1;
                    while chars.get(k).is_some_and(|c| c.is_ascii_digit()) {
                        k += 1;
                    }
                    if k > j + 1 {
                        j = k;
                    }
                }
                if chars.get(j) == Some(&'Z') {
                    j += 1;
                } else if matches!(chars.get(j), Some('+') | Some('-')) && digits(chars, j + 1, 2)
                {
                    j += 3;
                    if chars.get(j) == Some(&':') {
                        j += 1;
                    }
                    if digits(chars, j, 2) {
                        j += 2;
                    }
                }
            }
        }
    }

    if bracketed {
        if chars.get(j) == Some(&']') {
            Some(j + 1 - i)
        } else {
            None
        }
    } else {
        Some(j - i)
    }
}

fn match_ipv4(chars: &[char], i: usize) -> Option<usize> {
    let mut j = i;
    for octet in 0..4 {
        if octet > 0 {
            if chars.get(j) != Some(&'.') {
                return None;
            }
            j += 1;
        }
        let start = j;
        while chars.get(j).is_some_and(|c| c.is_ascii_digit()) && j - start < 3 {
            j += 1;
        }
        if j == start {
            return None;
        }
        let value: u32 = chars[start..j].iter().collect::<String>().parse().ok()?;
        if value > 255 {
            return None;
        }
    }
    // Reject a trailing `.` that would make this an invalid partial match.
    if chars.get(j) == Some(&'.') {
        return None;
    }
    Some(j - i)
}

fn match_ipv6(chars: &[char], i: usize) -> Option<usize> {
    let mut j = i;
    let mut groups = 0usize;
    let mut saw_double_colon = false;
    let is_hex_run = |chars: &[char], from: usize| -> usize {
        let mut k = from;
        while chars.get(k).is_some_and(|c| c.is_ascii_hexdigit()) && k - from < 4 {
            k += 1;
        }
        k - from
    };

    if chars.get(j) == Some(&':') && chars.get(j + 1) == Some(&':') {
        saw_double_colon = true;
        j += 2;
    }

    loop {
        let run = is_hex_run(chars, j);
        if run == 0 {
            break;
        }
        j += run;
        groups += 1;
        if chars.get(j) == Some(&':') {
            if chars.get(j + 1) == Some(&':') {
                if saw_double_colon {
                    break;
                }
                saw_double_colon = true;
                j += 2;
            } else {
                j += 1;
            }
        } else {
            break;
        }
    }

    let min_groups = if saw_double_colon { 1 } else { 8 };
    if groups >= min_groups && (groups > 1 || saw_double_colon) && j - i > 2 {
        Some(j - i)
    } else {
        None
    }
}

fn match_uuid(chars: &[char], i: usize) -> Option<usize> {
    let groups = [8, 4, 4, 4, 12];
    let mut j = i;
    for (idx, &len) in groups.iter().enumerate() {
        if idx > 0 {
            if chars.get(j) != Some(&'-') {
                return None;
            }
            j += 1;
        }
        for _ in 0..len {
            if !chars.get(j).is_some_and(|c| c.is_ascii_hexdigit()) {
                return None;
            }
            j += 1;
        }
    }
    Some(j - i)
}

fn match_url(chars: &[char], i: usize) -> Option<usize> {
    const SCHEMES: &[&str] = &["http://", "https://", "ftp://", "ws://", "wss://"];
    let rest: String = chars[i..].iter().collect();
    let scheme = SCHEMES.iter().find(|s| rest.starts_with(*s))?;
    let mut j = i + scheme.chars().count();
    while chars.get(j).is_some_and(|c| {
        !c.is_whitespace() && !matches!(c, '"' | '\'' | ']' | '}' | '>' | ',')
    }) {
        j += 1;
    }
    Some(j - i)
}

/// Unix-style absolute path: `/segment/segment...` with at least one `/`
/// and no whitespace. Windows drive paths are out of scope for §4.1.
fn match_path(chars: &[char], i: usize) -> Option<usize> {
    if chars.get(i) != Some(&'/') {
        return None;
    }
    let mut j = i + 1;
    let mut slashes = 1;
    while chars.get(j).is_some_and(|c| {
        !c.is_whitespace() && !matches!(c, '"' | '\'' | ']' | '}' | ',' | ':')
    }) {
        if chars[j] == '/' {
            slashes += 1;
        }
        j += 1;
    }
    if slashes >= 1 && j - i > 1 {
        Some(j - i)
    } else {
        None
    }
}

/// `0x`-prefixed hex, or a pure hex run of at least 8 characters that also
/// contains an a-f digit (otherwise it would just be an `Integer`).
fn match_hex(chars: &[char], i: usize) -> Option<usize> {
    if chars.get(i) == Some(&'0') && matches!(chars.get(i + 1), Some('x') | Some('X')) {
        let mut j = i + 2;
        while chars.get(j).is_some_and(|c| c.is_ascii_hexdigit()) {
            j += 1;
        }
        if j > i + 2 {
            return Some(j - i);
        }
        return None;
    }

    let mut j = i;
    let mut has_alpha = false;
    while chars.get(j).is_some_and(|c| c.is_ascii_hexdigit()) {
        if chars[j].is_ascii_alphabetic() {
            has_alpha = true;
        }
        j += 1;
    }
    if j - i >= 8 && has_alpha {
        Some(j - i)
    } else {
        None
    }
}

fn match_number(chars: &[char], i: usize) -> Option<(TypeTag, usize)> {
    let mut j = i;
    if matches!(chars.get(j), Some('-') | Some('+')) {
        j += 1;
    }
    let digit_start = j;
    while chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
        j += 1;
    }
    if j == digit_start {
        return None;
    }

    let mut is_float = false;
    if chars.get(j) == Some(&'.') && chars.get(j + 1).is_some_and(|c| c.is_ascii_digit()) {
        is_float = true;
        j += 1;
        while chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
            j += 1;
        }
    }
    if matches!(chars.get(j), Some('e') | Some('E')) {
        let mut k = j + 1;
        if matches!(chars.get(k), Some('-') | Some('+')) {
            k += 1;
        }
        if chars.get(k).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            j = k;
            while chars.get(j).is_some_and(|c| c.is_ascii_digit()) {
                j += 1;
            }
        }
    }

    let tag = if is_float {
        TypeTag::Float
    } else {
        TypeTag::Integer
    };
    Some((tag, j - i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(line: &str) -> Vec<TypeTag> {
        lex_str(line).into_iter().map(|t| t.tag).collect()
    }

    #[test]
    fn classifies_bracketed_timestamp() {
        let tokens = lex_str("[2024-01-01 00:00:00] INFO ready");
        assert_eq!(tokens[0].tag, TypeTag::Timestamp);
        assert_eq!(tokens[0].raw, "[2024-01-01 00:00:00]");
    }

    #[test]
    fn classifies_ipv4_before_word() {
        let tokens = lex_str("from 10.0.0.1 connected");
        assert_eq!(tokens[2].tag, TypeTag::Ipv4);
        assert_eq!(tokens[2].raw, "10.0.0.1");
    }

    #[test]
    fn classifies_ipv6() {
        let tokens = lex_str("src 2001:db8::1 ok");
        assert_eq!(tokens[2].tag, TypeTag::Ipv6);
    }

    #[test]
    fn classifies_uuid() {
        let tokens = lex_str("req 550e8400-e29b-41d4-a716-446655440000 done");
        assert_eq!(tokens[2].tag, TypeTag::Uuid);
    }

    #[test]
    fn classifies_url() {
        let tokens = lex_str("GET https://example.com/a/b?x=1 200");
        assert_eq!(tokens[2].tag, TypeTag::Url);
    }

    #[test]
    fn classifies_path_over_word() {
        let tokens = lex_str("open /var/log/app.log failed");
        assert_eq!(tokens[2].tag, TypeTag::Path);
    }

    #[test]
    fn classifies_hex_and_pure_hex_id() {
        let tokens = lex_str("addr 0xDEADBEEF token deadbeef01");
        assert_eq!(tokens[2].tag, TypeTag::Hex);
        assert_eq!(tokens[6].tag, TypeTag::Hex);
    }

    #[test]
    fn classifies_float_and_integer() {
        assert_eq!(tags("latency 12.5 id 42"), vec![
            TypeTag::Word,
            TypeTag::Whitespace,
            TypeTag::Float,
            TypeTag::Whitespace,
            TypeTag::Word,
            TypeTag::Whitespace,
            TypeTag::Integer,
        ]);
    }

    #[test]
    fn quoted_string_and_multichar_punctuation() {
        let tokens = lex_str(r#"msg="hello world" next::step"#);
        assert!(tokens.iter().any(|t| t.tag == TypeTag::QuotedString));
        assert!(tokens
            .iter()
            .any(|t| t.tag == TypeTag::Punctuation && t.raw == "::"));
    }

    #[test]
    fn whitespace_runs_collapse() {
        let tokens = lex_str("a    b");
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1].tag, TypeTag::Whitespace);
        assert_eq!(tokens[1].raw, "    ");
    }

    #[test]
    fn truncates_overlong_lines() {
        let line = "a".repeat(100);
        let (tokens, truncated) = lex(line.as_bytes(), 10);
        assert!(truncated);
        assert_eq!(tokens[0].raw.len(), 10);
    }

    #[test]
    fn lossy_utf8_recovery() {
        let bytes = [b'a', 0xFF, b'b'];
        let (tokens, truncated) = lex(&bytes, DEFAULT_MAX_LINE_BYTES);
        assert!(!truncated);
        assert!(tokens.iter().any(|t| t.raw.contains('\u{FFFD}')));
    }

    #[test]
    fn idempotent_on_same_input() {
        let line = "[2024-01-01 00:00:00] ERROR user=alice id=3 at /srv/app";
        assert_eq!(lex_str(line), lex_str(line));
    }
}
