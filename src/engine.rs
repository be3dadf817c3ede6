//! Top-level pipeline (§5): wires the lexer, recognizer, template miner,
//! column encoder and container writer together behind the public API the
//! CLI (and any embedder) calls.
//!
//! Stages that are genuinely independent per item run on rayon's global
//! pool (§5 expansion); template mining stays single-threaded because its
//! bucket-splitting is inherently sequential within a bucket and the whole
//! pass is already linear in input size.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use rayon::prelude::*;

use crate::column::{self, EncodedColumn};
use crate::config::CompressOptions;
use crate::container::{self, Container};
use crate::error::{IngestError, LogPressError};
use crate::query::{self, Predicate};
use crate::semantic::Recognizer;
use crate::stats::Stats;
use crate::template::{self, Slot, Template};
use crate::token::LogLine;
use crate::value::Value;

/// A human-readable view of one mined template, for the `inspect` CLI verb
/// and for embedders that want schemas without a query engine (§4.6
/// "extract_schemas").
#[derive(Debug, Clone)]
pub struct TemplateSchema {
    pub template_id: u32,
    pub pattern: String,
    pub match_count: u64,
    pub is_synthetic: bool,
}

/// Splits raw input into lines, tolerating both `\n` and `\r\n`. Lines are
/// never required to be valid UTF-8; the lexer handles lossy recovery.
///
/// A trailing `\n` (the common case for any file written with a text editor)
/// produces one spurious empty element from `slice::split`; blank lines are
/// dropped by the caller rather than handled here, since the split itself
/// can't tell a real trailing newline from a deliberate blank line.
fn split_lines(input: &[u8]) -> Vec<&[u8]> {
    input
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .collect()
}

/// A line with no non-whitespace bytes. Blank lines (including the phantom
/// element a trailing newline produces) never reach the miner and never
/// consume a log id.
fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Splits `raw` into lines and drops blank ones, returning the surviving
/// lines in order (dense log ids are assigned by the caller) plus the count
/// skipped.
fn non_blank_lines(raw: &[u8]) -> (Vec<&[u8]>, u64) {
    let mut skipped = 0u64;
    let kept = split_lines(raw)
        .into_iter()
        .filter(|line| {
            if is_blank(line) {
                skipped += 1;
                false
            } else {
                true
            }
        })
        .collect();
    (kept, skipped)
}

/// Compresses `input` into a container at `output_path` (§6 "compress_file").
pub fn compress_file(
    input_path: &Path,
    output_path: &Path,
    options: &CompressOptions,
    cancel: &AtomicBool,
) -> Result<Stats, LogPressError> {
    let start = Instant::now();
    let raw = fs::read(input_path).map_err(IngestError::Io)?;
    let original_bytes = raw.len() as u64;

    let recognizer = options.build_recognizer()?;
    let (templates, log_template_ids, columns, mut stats) =
        compress_bytes(&raw, options, &recognizer, cancel)?;

    if cancel.load(Ordering::Relaxed) {
        return Err(LogPressError::Cancelled);
    }

    container::write_container(
        output_path,
        templates,
        log_template_ids,
        columns,
        options.entropy_level,
    )?;

    stats.original_bytes = original_bytes;
    stats.compressed_bytes = fs::metadata(output_path).map_err(IngestError::Io)?.len();
    stats.elapsed_ms = start.elapsed().as_millis() as u64;

    Ok(stats)
}

/// Compresses an in-memory sequence of lines into artifact bytes, without
/// touching the filesystem (§6 "compress"). `compress_file` is the
/// disk-backed convenience wrapper most callers want; this is for
/// embedders that already hold their lines in memory (or want to place the
/// artifact somewhere other than a plain file).
pub fn compress(
    lines: impl Iterator<Item = String>,
    options: &CompressOptions,
    cancel: &AtomicBool,
) -> Result<(Vec<u8>, Stats), LogPressError> {
    let start = Instant::now();
    let raw = lines.collect::<Vec<_>>().join("\n").into_bytes();
    let original_bytes = raw.len() as u64;

    let recognizer = options.build_recognizer()?;
    let (templates, log_template_ids, columns, mut stats) =
        compress_bytes(&raw, options, &recognizer, cancel)?;

    if cancel.load(Ordering::Relaxed) {
        return Err(LogPressError::Cancelled);
    }

    let bytes =
        container::build_artifact_bytes(templates, log_template_ids, columns, options.entropy_level)?;

    stats.original_bytes = original_bytes;
    stats.compressed_bytes = bytes.len() as u64;
    stats.elapsed_ms = start.elapsed().as_millis() as u64;

    Ok((bytes, stats))
}

fn compress_bytes(
    raw: &[u8],
    options: &CompressOptions,
    recognizer: &Recognizer,
    cancel: &AtomicBool,
) -> Result<(Vec<Template>, Vec<u32>, Vec<Vec<EncodedColumn>>, Stats), LogPressError> {
    let (lines, skipped_lines) = non_blank_lines(raw);

    if cancel.load(Ordering::Relaxed) {
        return Err(LogPressError::Cancelled);
    }

    // Lexing is embarrassingly parallel: each line is independent.
    let log_lines: Vec<LogLine> = lines
        .par_iter()
        .enumerate()
        .map(|(i, raw_line)| {
            let (tokens, truncated) = crate::lexer::lex(raw_line, options.max_line_bytes);
            LogLine {
                log_id: i as u64,
                tokens,
                truncated,
            }
        })
        .collect();

    let truncated_lines = log_lines.iter().filter(|l| l.truncated).count() as u64;

    if cancel.load(Ordering::Relaxed) {
        return Err(LogPressError::Cancelled);
    }

    let (templates, assignments) = template::mine(&log_lines, options.min_support, recognizer);

    if cancel.load(Ordering::Relaxed) {
        return Err(LogPressError::Cancelled);
    }

    let mut log_template_ids = vec![0u32; log_lines.len()];
    for a in &assignments {
        log_template_ids[a.log_id as usize] = a.template_id;
    }

    // Group each template's row values by column id, in ascending log-id
    // order, then encode every column independently in parallel.
    let mut per_template_raw: Vec<Vec<Vec<String>>> = templates
        .iter()
        .map(|t| vec![Vec::new(); t.variable_column_ids().count()])
        .collect();

    for a in &assignments {
        // `a.values` holds one entry per variable slot, already in slot
        // order (see `template::extract_values`), so the value's own index
        // is its column index within this template.
        let columns = &mut per_template_raw[a.template_id as usize];
        for (column_idx, value) in a.values.iter().enumerate() {
            columns[column_idx].push(value_to_raw(value));
        }
    }

    let columns: Vec<Vec<EncodedColumn>> = templates
        .par_iter()
        .zip(per_template_raw.par_iter())
        .map(|(template, raw_columns)| {
            let column_ids: Vec<u32> = template.variable_column_ids().collect();
            column_ids
                .par_iter()
                .zip(raw_columns.par_iter())
                .map(|(&column_id, values)| {
                    let semantic_type = template
                        .slots
                        .iter()
                        .find_map(|s| match s {
                            Slot::Variable { semantic_type, column_id: c } if *c == column_id => {
                                Some(*semantic_type)
                            }
                            _ => None,
                        })
                        .expect("column_id originates from this template's slots");
                    column::encode_column(column_id, semantic_type, values)
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let stats = Stats {
        original_bytes: 0,
        compressed_bytes: 0,
        log_count: log_lines.len() as u64,
        template_count: templates.len() as u64,
        synthetic_template_count: templates.iter().filter(|t| t.is_synthetic).count() as u64,
        skipped_lines,
        truncated_lines,
        elapsed_ms: 0,
    };

    Ok((templates, log_template_ids, columns, stats))
}

fn value_to_raw(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.render(),
    }
}

/// Opens a compressed artifact for querying (§4.6 "open").
pub fn open(path: &Path) -> Result<Container, LogPressError> {
    Ok(container::open_container(path)?)
}

/// Runs a predicate and materializes matching lines, optionally capped at
/// `limit` results (§6 "query(handle, predicate, limit?)").
pub fn query_lines(
    container: &Container,
    predicate: &Predicate,
    limit: Option<usize>,
) -> Result<Vec<(u64, String)>, LogPressError> {
    let mut ids = query::query(container, predicate)?;
    if let Some(n) = limit {
        ids.truncate(n);
    }
    Ok(query::materialize(container, &ids)?)
}

/// Counts matching logs without materializing them (§4.6 "count").
pub fn count(container: &Container, predicate: &Predicate) -> Result<usize, LogPressError> {
    Ok(query::count(container, predicate)?)
}

/// Renders every template's skeleton as `literal text {semantic_type}
/// literal text` for display (§4.6 "extract_schemas").
pub fn extract_schemas(container: &Container) -> Vec<TemplateSchema> {
    container
        .templates()
        .iter()
        .map(|t| TemplateSchema {
            template_id: t.template_id,
            pattern: render_schema(t),
            match_count: t.match_count,
            is_synthetic: t.is_synthetic,
        })
        .collect()
}

/// Mines templates from in-memory lines without encoding columns or writing
/// a container (§6 "extract_schemas(lines, min_support)") — for callers that
/// only want to see the shapes a corpus would compress into.
pub fn extract_schemas_from_lines(
    lines: impl Iterator<Item = String>,
    options: &CompressOptions,
) -> Result<Vec<TemplateSchema>, LogPressError> {
    let raw = lines.collect::<Vec<_>>().join("\n").into_bytes();
    let (split, _skipped) = non_blank_lines(&raw);
    let log_lines: Vec<LogLine> = split
        .par_iter()
        .enumerate()
        .map(|(i, raw_line)| {
            let (tokens, truncated) = crate::lexer::lex(raw_line, options.max_line_bytes);
            LogLine {
                log_id: i as u64,
                tokens,
                truncated,
            }
        })
        .collect();

    let recognizer = options.build_recognizer()?;
    let (templates, _assignments) = template::mine(&log_lines, options.min_support, &recognizer);

    Ok(templates
        .iter()
        .map(|t| TemplateSchema {
            template_id: t.template_id,
            pattern: render_schema(t),
            match_count: t.match_count,
            is_synthetic: t.is_synthetic,
        })
        .collect())
}

fn render_schema(template: &Template) -> String {
    let mut out = String::new();
    for slot in &template.slots {
        match slot {
            Slot::Literal { text, .. } => out.push_str(text),
            Slot::Variable { semantic_type, .. } => {
                out.push('{');
                out.push_str(&format!("{semantic_type:?}"));
                out.push('}');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use tempfile::tempdir;

    #[test]
    fn compress_then_open_round_trips_lines() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input.log");
        let output_path = dir.path().join("out.lpr");

        let lines = "[2024-01-01T00:00:00Z] INFO user=alice id=1\n\
                     [2024-01-01T00:00:01Z] INFO user=bob id=2\n\
                     [2024-01-01T00:00:02Z] INFO user=carol id=3\n\
                     [2024-01-01T00:00:03Z] ERROR disk full on /dev/sda1\n";
        fs::write(&input_path, lines).unwrap();

        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let cancel = AtomicBool::new(false);
        let stats = compress_file(&input_path, &output_path, &options, &cancel).unwrap();
        assert_eq!(stats.log_count, 4);

        let container = open(&output_path).unwrap();
        let rendered = query_lines(&container, &Predicate::TemplateId(0), None).unwrap();
        assert!(!rendered.is_empty());
    }

    #[test]
    fn cancellation_before_start_short_circuits() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input.log");
        let output_path = dir.path().join("out.lpr");
        fs::write(&input_path, "hello\n").unwrap();

        let options = CompressOptions::default();
        let cancel = AtomicBool::new(true);
        let result = compress_file(&input_path, &output_path, &options, &cancel);
        assert!(matches!(result, Err(LogPressError::Cancelled)));
    }

    #[test]
    fn compress_in_memory_round_trips_through_query() {
        let lines = vec![
            "user=alice logged in".to_string(),
            "user=bob logged in".to_string(),
            "user=carol logged in".to_string(),
        ];
        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let cancel = AtomicBool::new(false);
        let (bytes, stats) = compress(lines.clone().into_iter(), &options, &cancel).unwrap();
        assert_eq!(stats.log_count, 3);
        assert!(!bytes.is_empty());

        let dir = tempdir().unwrap();
        let path = dir.path().join("in_memory.lpr");
        fs::write(&path, &bytes).unwrap();
        let container = open(&path).unwrap();
        let rendered = query_lines(&container, &Predicate::TemplateId(0), None).unwrap();
        assert_eq!(rendered.len(), 3);
    }

    #[test]
    fn query_lines_respects_limit() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input.log");
        let output_path = dir.path().join("out.lpr");
        fs::write(&input_path, "a 1\na 2\na 3\na 4\n").unwrap();

        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let cancel = AtomicBool::new(false);
        compress_file(&input_path, &output_path, &options, &cancel).unwrap();
        let container = open(&output_path).unwrap();
        let rendered = query_lines(&container, &Predicate::TemplateId(0), Some(2)).unwrap();
        assert_eq!(rendered.len(), 2);
    }

    #[test]
    fn extract_schemas_from_lines_mines_without_writing_a_container() {
        let lines = vec![
            "user=alice logged in".to_string(),
            "user=bob logged in".to_string(),
            "user=carol logged in".to_string(),
        ];
        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let schemas = extract_schemas_from_lines(lines.into_iter(), &options).unwrap();
        assert!(schemas.iter().any(|s| s.pattern.contains('{')));
    }

    #[test]
    fn blank_lines_are_skipped_and_never_assigned_a_log_id() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input.log");
        let output_path = dir.path().join("out.lpr");
        // A blank interior line and a trailing newline both produce an empty
        // element from a naive `\n` split; both must be skipped rather than
        // counted as logs.
        fs::write(&input_path, "a 1\na 2\n\n   \na 3\n").unwrap();

        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let cancel = AtomicBool::new(false);
        let stats = compress_file(&input_path, &output_path, &options, &cancel).unwrap();
        assert_eq!(stats.log_count, 3);
        assert_eq!(stats.skipped_lines, 2);

        let container = open(&output_path).unwrap();
        let all_ids: Vec<u64> = (0..container.log_count).collect();
        let rendered = query::materialize(&container, &all_ids).unwrap();
        assert_eq!(
            rendered.into_iter().map(|(_, l)| l).collect::<Vec<_>>(),
            vec!["a 1", "a 2", "a 3"]
        );
    }

    #[test]
    fn extract_schemas_renders_literal_and_variable_parts() {
        let dir = tempdir().unwrap();
        let input_path = dir.path().join("input.log");
        let output_path = dir.path().join("out.lpr");
        fs::write(
            &input_path,
            "user=alice logged in\nuser=bob logged in\nuser=carol logged in\n",
        )
        .unwrap();

        let options = CompressOptions {
            min_support: 2,
            ..CompressOptions::default()
        };
        let cancel = AtomicBool::new(false);
        compress_file(&input_path, &output_path, &options, &cancel).unwrap();
        let container = open(&output_path).unwrap();
        let schemas = extract_schemas(&container);
        assert!(schemas.iter().any(|s| s.pattern.contains('{')));
    }
}
