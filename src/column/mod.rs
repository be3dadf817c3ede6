//! Columnar encoder/decoder (§4.4).
//!
//! One codec per semantic type, chosen from a small closed set rather than
//! a general-purpose compressor per column: the column only ever holds
//! values already bucketed by the mined template's variable slots, so the
//! codec can assume a narrow, known shape (§4.4 "Why columns get a codec
//! each instead of one generic compressor").

pub mod varint;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::EncodeError;
use crate::semantic::SemanticType;
use crate::value::Value;
use varint::{read_uvarint, write_uvarint, zigzag_decode, zigzag_encode};

/// First-seen-order string interning table. Code `0` is reserved so that a
/// missing/unseen entry can never collide with a real code (§4.4 "Dictionary").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dictionary {
    entries: Vec<String>,
}

impl Dictionary {
    fn intern(&mut self, seen: &mut HashMap<String, u32>, value: &str) -> u32 {
        if let Some(&code) = seen.get(value) {
            return code;
        }
        self.entries.push(value.to_string());
        let code = self.entries.len() as u32; // 1-based; 0 stays reserved.
        seen.insert(value.to_string(), code);
        code
    }

    pub fn get(&self, code: u32) -> Option<&str> {
        if code == 0 {
            return None;
        }
        self.entries.get(code as usize - 1).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Codec {
    /// Zigzag-delta-encoded varint stream, for monotone-ish i64 data
    /// (numeric/duration/byte-count ids).
    DeltaVarint,
    /// Like `DeltaVarint`, but for `Timestamp` columns: every row shares a
    /// single textual format (bracketed or not, `T`/space separator,
    /// fractional-digit count), detected from the first row and verified
    /// against the rest, so exact text can be rebuilt from the millis alone.
    TimestampDeltaVarint(TimestampFormat),
    Ipv4Fixed,
    Ipv6Fixed,
    /// Dictionary-coded: one uvarint code per row, strings in a side table.
    Dictionary,
    RawF64,
    /// Length-prefixed raw UTF-8, for high-cardinality free text.
    LengthPrefixedUtf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampFormat {
    pub bracketed: bool,
    pub use_t_separator: bool,
    pub fractional_digits: u8,
}

fn render_timestamp(millis: i64, fmt: TimestampFormat) -> String {
    let text = format_timestamp_millis(millis, fmt.use_t_separator, fmt.fractional_digits);
    if fmt.bracketed {
        format!("[{text}]")
    } else {
        text
    }
}

/// Detects the `(bracketed, use_t_separator, fractional_digits)` that makes
/// `render_timestamp(parse_timestamp_millis(raw).unwrap(), fmt) == raw`, by
/// trying every combination the lexer/parser pair can produce. `None` if no
/// combination round-trips, meaning this value needs a text-preserving codec.
fn detect_timestamp_format(raw: &str, millis: i64) -> Option<TimestampFormat> {
    for bracketed in [true, false] {
        for use_t_separator in [true, false] {
            for fractional_digits in [0u8, 1, 2, 3] {
                let fmt = TimestampFormat {
                    bracketed,
                    use_t_separator,
                    fractional_digits,
                };
                if render_timestamp(millis, fmt) == raw {
                    return Some(fmt);
                }
            }
        }
    }
    None
}

/// An encoded column ready to be placed in a container's column-block
/// section (§4.5). Carries its own dictionary inline; the container format
/// is free to deduplicate identical dictionaries across columns later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedColumn {
    pub column_id: u32,
    pub semantic_type: SemanticType,
    pub codec: Codec,
    pub row_count: usize,
    pub dictionary: Option<Dictionary>,
    pub bytes: Vec<u8>,
    /// Inclusive min/max of the underlying `i64` values, for range-filterable
    /// codecs (`DeltaVarint`, `TimestampDeltaVarint`). `None` for every other
    /// codec (§4.4 block descriptor, §4.5 per-column timestamp min/max).
    pub min_max: Option<(i64, i64)>,
}

/// Cardinality ratio above which a would-be dictionary column instead falls
/// back to raw length-prefixed text: a dictionary only pays for itself when
/// it meaningfully collapses repeats (§4.4 "Dictionary" sizing note).
const DICTIONARY_MAX_RATIO: f64 = 0.5;

fn parses_as_i64(values: &[String]) -> bool {
    !values.is_empty() && values.iter().all(|v| v.parse::<i64>().is_ok())
}

fn parses_as_f64(values: &[String]) -> bool {
    !values.is_empty() && values.iter().all(|v| v.parse::<f64>().is_ok())
}

/// Whether every value both parses as IPv4 and renders back to its exact
/// source text: `Value::render` always emits plain dotted-decimal, so a
/// non-canonical form like a leading-zero octet (`010.0.0.1`) fails this and
/// falls back to a text-preserving codec rather than silently losing its
/// original spelling (mirrors `uniform_timestamp_format`'s guard).
fn ipv4_fixed_round_trips(values: &[String]) -> bool {
    !values.is_empty()
        && values
            .iter()
            .all(|v| matches!(parse_ipv4(v), Some(octets) if Value::Ipv4(octets).render() == *v))
}

/// Same guard as [`ipv4_fixed_round_trips`], for IPv6: `Value::render`
/// always emits the fully-expanded, non-`::`-compressed form, so any
/// `::`-compressed or otherwise non-canonical address must not pick
/// `Ipv6Fixed`.
fn ipv6_fixed_round_trips(values: &[String]) -> bool {
    !values.is_empty()
        && values
            .iter()
            .all(|v| matches!(parse_ipv6(v), Some(octets) if Value::Ipv6(octets).render() == *v))
}

fn parse_ipv4(s: &str) -> Option<[u8; 4]> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for octet in octets.iter_mut() {
        *octet = parts.next()?.parse::<u8>().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(octets)
}

fn parse_ipv6(s: &str) -> Option<[u8; 16]> {
    let addr: std::net::Ipv6Addr = s.parse().ok()?;
    Some(addr.octets())
}

/// Minimal RFC 3339-ish timestamp parser: `YYYY-MM-DD[T ]HH:MM:SS[.fff][Z|+HH:MM]`.
/// Returns milliseconds since the Unix epoch. Falls back gracefully (`None`)
/// on anything it doesn't recognize so the caller can pick a different codec
/// rather than fail the whole compression pass (§4.4 failure semantics).
pub fn parse_timestamp_millis(raw: &str) -> Option<i64> {
    let s = raw.trim_matches(|c| c == '[' || c == ']');
    let bytes = s.as_bytes();
    if bytes.len() < 19 {
        return None;
    }
    let year: i64 = s.get(0..4)?.parse().ok()?;
    let month: u32 = s.get(5..7)?.parse().ok()?;
    let day: u32 = s.get(8..10)?.parse().ok()?;
    let hour: i64 = s.get(11..13)?.parse().ok()?;
    let minute: i64 = s.get(14..16)?.parse().ok()?;
    let second: i64 = s.get(17..19)?.parse().ok()?;

    let mut millis_frac: i64 = 0;
    let mut rest = &s[19..];
    if let Some(stripped) = rest.strip_prefix('.') {
        let digits: String = stripped.chars().take_while(|c| c.is_ascii_digit()).collect();
        if !digits.is_empty() {
            let padded = format!("{:0<3}", &digits[..digits.len().min(3)]);
            millis_frac = padded.parse().ok()?;
        }
        rest = &stripped[digits.len()..];
    }

    // Offsets other than Z are rare in log output and not needed for this
    // codec's ordering guarantees; treat any trailing text as UTC.
    let _ = rest;

    let days = days_from_civil(year, month, day)?;
    let seconds = days * 86_400 + hour * 3600 + minute * 60 + second;
    Some(seconds * 1000 + millis_frac)
}

/// Howard Hinnant's `days_from_civil`, adapted for `i64`.
fn days_from_civil(y: i64, m: u32, d: u32) -> Option<i64> {
    if !(1..=12).contains(&m) || !(1..=31).contains(&d) {
        return None;
    }
    let y = if m <= 2 { y - 1 } else { y };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as i64;
    let mp = (m as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + d as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    Some(era * 146_097 + doe - 719_468)
}

/// Detects a single `TimestampFormat` shared by every value, if one exists.
fn uniform_timestamp_format(values: &[String]) -> Option<TimestampFormat> {
    let mut millis_cache = Vec::with_capacity(values.len());
    for v in values {
        millis_cache.push(parse_timestamp_millis(v)?);
    }
    let fmt = detect_timestamp_format(&values[0], millis_cache[0])?;
    for (v, millis) in values.iter().zip(millis_cache.iter()) {
        if render_timestamp(*millis, fmt) != *v {
            return None;
        }
    }
    Some(fmt)
}

fn choose_codec(semantic_type: SemanticType, values: &[String]) -> Codec {
    if semantic_type == SemanticType::Timestamp {
        if let Some(fmt) = uniform_timestamp_format(values) {
            return Codec::TimestampDeltaVarint(fmt);
        }
    }

    match semantic_type {
        SemanticType::Ipv4 if ipv4_fixed_round_trips(values) => Codec::Ipv4Fixed,
        SemanticType::Ipv6 if ipv6_fixed_round_trips(values) => Codec::Ipv6Fixed,
        SemanticType::NumericId | SemanticType::Duration | SemanticType::ByteCount
            if parses_as_i64(values) =>
        {
            Codec::DeltaVarint
        }
        _ if parses_as_f64(values) && !parses_as_i64(values) => Codec::RawF64,
        SemanticType::Severity | SemanticType::UserId | SemanticType::Custom(_) => {
            Codec::Dictionary
        }
        _ => {
            let distinct = values.iter().collect::<std::collections::HashSet<_>>().len();
            if (distinct as f64) <= DICTIONARY_MAX_RATIO * values.len() as f64 {
                Codec::Dictionary
            } else {
                Codec::LengthPrefixedUtf8
            }
        }
    }
}

/// Encodes one column's worth of raw token text. `values` are in row order
/// (i.e. in the template's match order, which is log-id order).
pub fn encode_column(
    column_id: u32,
    semantic_type: SemanticType,
    values: &[String],
) -> Result<EncodedColumn, EncodeError> {
    let codec = choose_codec(semantic_type, values);
    let row_count = values.len();

    let (bytes, dictionary, min_max) = match codec {
        Codec::DeltaVarint => {
            let mut out = Vec::new();
            let mut prev: i64 = 0;
            let mut min = i64::MAX;
            let mut max = i64::MIN;
            for v in values {
                let n = v.parse::<i64>().map_err(|_| EncodeError::TypeMismatch {
                    codec: "delta_varint",
                    value: v.clone(),
                })?;
                min = min.min(n);
                max = max.max(n);
                let delta = n.wrapping_sub(prev);
                write_uvarint(&mut out, zigzag_encode(delta));
                prev = n;
            }
            (out, None, Some((min, max)))
        }
        Codec::TimestampDeltaVarint(_) => {
            let mut out = Vec::new();
            let mut prev: i64 = 0;
            let mut min = i64::MAX;
            let mut max = i64::MIN;
            for v in values {
                let n = parse_timestamp_millis(v).ok_or(EncodeError::TypeMismatch {
                    codec: "timestamp_delta_varint",
                    value: v.clone(),
                })?;
                min = min.min(n);
                max = max.max(n);
                let delta = n.wrapping_sub(prev);
                write_uvarint(&mut out, zigzag_encode(delta));
                prev = n;
            }
            (out, None, Some((min, max)))
        }
        Codec::Ipv4Fixed => {
            let mut out = Vec::with_capacity(row_count * 4);
            for v in values {
                let octets = parse_ipv4(v).ok_or(EncodeError::TypeMismatch {
                    codec: "ipv4_fixed",
                    value: v.clone(),
                })?;
                out.extend_from_slice(&octets);
            }
            (out, None, None)
        }
        Codec::Ipv6Fixed => {
            let mut out = Vec::with_capacity(row_count * 16);
            for v in values {
                let octets = parse_ipv6(v).ok_or(EncodeError::TypeMismatch {
                    codec: "ipv6_fixed",
                    value: v.clone(),
                })?;
                out.extend_from_slice(&octets);
            }
            (out, None, None)
        }
        Codec::RawF64 => {
            let mut out = Vec::with_capacity(row_count * 8);
            for v in values {
                let f: f64 = v.parse().map_err(|_| EncodeError::TypeMismatch {
                    codec: "raw_f64",
                    value: v.clone(),
                })?;
                out.extend_from_slice(&f.to_le_bytes());
            }
            (out, None, None)
        }
        Codec::Dictionary => {
            let mut dict = Dictionary::default();
            let mut seen = HashMap::new();
            let mut out = Vec::new();
            for v in values {
                let code = dict.intern(&mut seen, v);
                write_uvarint(&mut out, code as u64);
            }
            (out, Some(dict), None)
        }
        Codec::LengthPrefixedUtf8 => {
            let mut out = Vec::new();
            for v in values {
                write_uvarint(&mut out, v.len() as u64);
                out.extend_from_slice(v.as_bytes());
            }
            (out, None, None)
        }
    };

    Ok(EncodedColumn {
        column_id,
        semantic_type,
        codec,
        row_count,
        dictionary,
        bytes,
        min_max,
    })
}

/// Decodes a column back into row-ordered [`Value`]s. Must be the exact
/// inverse of [`encode_column`] (§8 invariant 4, round-trip equality).
pub fn decode_column(column: &EncodedColumn) -> Result<Vec<Value>, EncodeError> {
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(column.row_count);

    match column.codec {
        Codec::DeltaVarint => {
            let mut prev: i64 = 0;
            for _ in 0..column.row_count {
                let z = read_uvarint(&column.bytes, &mut pos)
                    .ok_or(EncodeError::RoundTripMismatch("delta_varint"))?;
                let n = prev.wrapping_add(zigzag_decode(z));
                prev = n;
                out.push(Value::I64(n));
            }
        }
        Codec::TimestampDeltaVarint(_) => {
            let mut prev: i64 = 0;
            for _ in 0..column.row_count {
                let z = read_uvarint(&column.bytes, &mut pos)
                    .ok_or(EncodeError::RoundTripMismatch("timestamp_delta_varint"))?;
                let n = prev.wrapping_add(zigzag_decode(z));
                prev = n;
                out.push(Value::I64(n));
            }
        }
        Codec::Ipv4Fixed => {
            for _ in 0..column.row_count {
                let chunk = column
                    .bytes
                    .get(pos..pos + 4)
                    .ok_or(EncodeError::RoundTripMismatch("ipv4_fixed"))?;
                out.push(Value::Ipv4([chunk[0], chunk[1], chunk[2], chunk[3]]));
                pos += 4;
            }
        }
        Codec::Ipv6Fixed => {
            for _ in 0..column.row_count {
                let chunk = column
                    .bytes
                    .get(pos..pos + 16)
                    .ok_or(EncodeError::RoundTripMismatch("ipv6_fixed"))?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(chunk);
                out.push(Value::Ipv6(octets));
                pos += 16;
            }
        }
        Codec::RawF64 => {
            for _ in 0..column.row_count {
                let chunk = column
                    .bytes
                    .get(pos..pos + 8)
                    .ok_or(EncodeError::RoundTripMismatch("raw_f64"))?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                out.push(Value::F64(f64::from_le_bytes(buf)));
                pos += 8;
            }
        }
        Codec::Dictionary => {
            let dict = column
                .dictionary
                .as_ref()
                .ok_or(EncodeError::RoundTripMismatch("dictionary"))?;
            for _ in 0..column.row_count {
                let code = read_uvarint(&column.bytes, &mut pos)
                    .ok_or(EncodeError::RoundTripMismatch("dictionary"))?;
                let s = dict
                    .get(code as u32)
                    .ok_or(EncodeError::RoundTripMismatch("dictionary"))?;
                out.push(Value::Str(s.to_string()));
            }
        }
        Codec::LengthPrefixedUtf8 => {
            for _ in 0..column.row_count {
                let len = read_uvarint(&column.bytes, &mut pos)
                    .ok_or(EncodeError::RoundTripMismatch("length_prefixed_utf8"))?
                    as usize;
                let chunk = column
                    .bytes
                    .get(pos..pos + len)
                    .ok_or(EncodeError::RoundTripMismatch("length_prefixed_utf8"))?;
                let s = String::from_utf8_lossy(chunk).into_owned();
                out.push(Value::Str(s));
                pos += len;
            }
        }
    }

    Ok(out)
}

/// Renders a decoded value back to the literal text form the lexer would
/// have produced (§4.6 materialize), for codecs that reduce to typed
/// values rather than preserving the exact source string. Needs the
/// column's codec (not just its semantic type) because `Timestamp` columns
/// carry the format descriptor that makes reconstruction exact.
pub fn render_for_reconstruction(codec: &Codec, value: &Value) -> String {
    match (codec, value) {
        (Codec::TimestampDeltaVarint(fmt), Value::I64(millis)) => render_timestamp(*millis, *fmt),
        _ => value.render(),
    }
}

fn format_timestamp_millis(millis: i64, use_t_separator: bool, fractional_digits: u8) -> String {
    let (days, rem_ms) = {
        let total_seconds = millis.div_euclid(1000);
        let ms = millis.rem_euclid(1000);
        (total_seconds.div_euclid(86_400), total_seconds.rem_euclid(86_400) * 1000 + ms)
    };
    let (y, m, d) = civil_from_days(days);
    let hour = rem_ms / 3_600_000;
    let minute = (rem_ms / 60_000) % 60;
    let second = (rem_ms / 1000) % 60;
    let sep = if use_t_separator { 'T' } else { ' ' };
    let mut out = format!("{y:04}-{m:02}-{d:02}{sep}{hour:02}:{minute:02}:{second:02}");
    if fractional_digits > 0 {
        let ms = rem_ms % 1000;
        let frac = format!("{ms:03}");
        out.push('.');
        out.push_str(&frac[..fractional_digits as usize]);
    }
    out.push('Z');
    out
}

/// Inverse of [`days_from_civil`], also after Hinnant.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
