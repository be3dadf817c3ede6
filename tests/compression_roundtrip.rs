//! Cross-module invariants (§8): every log line must reconstruct, every
//! log id must belong to exactly one template, and query/count must agree.

use std::fs;
use std::sync::atomic::AtomicBool;

use logpress::config::CompressOptions;
use logpress::engine;
use logpress::query::Predicate;
use logpress::semantic::SemanticType;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn compress_sample(text: &str, min_support: usize) -> (tempfile::TempDir, logpress::container::Container) {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.log");
    let output = dir.path().join("out.lpr");
    fs::write(&input, text).unwrap();

    let options = CompressOptions {
        min_support,
        ..CompressOptions::default()
    };
    let cancel = AtomicBool::new(false);
    engine::compress_file(&input, &output, &options, &cancel).unwrap();
    let container = engine::open(&output).unwrap();
    (dir, container)
}

#[test]
fn every_line_reconstructs_from_the_container() {
    let lines = vec![
        "[2024-01-01T00:00:00Z] INFO user=alice action=login",
        "[2024-01-01T00:00:01Z] INFO user=bob action=login",
        "[2024-01-01T00:00:02Z] INFO user=carol action=login",
        "[2024-01-01T00:00:03Z] ERROR user=alice action=timeout",
        "[2024-01-01T00:00:04Z] ERROR user=bob action=timeout",
    ];
    let text = lines.join("\n") + "\n";
    let (_dir, container) = compress_sample(&text, 2);

    let all_ids: Vec<u64> = (0..container.log_count).collect();
    let rendered = logpress::query::materialize(&container, &all_ids).unwrap();

    assert_eq!(rendered.len(), lines.len());
    for (expected, (_, actual)) in lines.iter().zip(rendered.iter()) {
        assert_eq!(actual, expected);
    }
}

#[test]
fn every_log_id_belongs_to_exactly_one_template() {
    let text = "a 1\nb 2\nc 3\na 4\nb 5\nc 6\n".to_string();
    let (_dir, container) = compress_sample(&text, 2);

    let mut seen = std::collections::HashSet::new();
    for id in 0..container.log_count {
        assert!(container.template_id_for_log(id).is_some());
        assert!(seen.insert(id), "log id {id} assigned twice");
    }
    assert_eq!(seen.len(), container.log_count as usize);
}

#[test]
fn count_matches_query_result_length() {
    let text = "INFO user=alice\nINFO user=bob\nERROR user=alice\nERROR user=bob\nINFO user=alice\n"
        .to_string();
    let (_dir, container) = compress_sample(&text, 2);

    let predicate = Predicate::FieldIn {
        semantic_type: SemanticType::Severity,
        values: vec!["ERROR".to_string()],
    };
    let via_query = logpress::query::query(&container, &predicate).unwrap();
    let via_count = logpress::query::count(&container, &predicate).unwrap();
    assert_eq!(via_query.len(), via_count);
}

#[test]
fn empty_input_produces_an_empty_but_valid_container() {
    let (_dir, container) = compress_sample("", 2);
    assert_eq!(container.log_count, 0);
    assert!(container.templates().is_empty());
}

#[test]
fn overlong_line_is_truncated_not_rejected() {
    let huge = "x".repeat(200_000);
    let text = format!("{huge}\n");
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.log");
    let output = dir.path().join("out.lpr");
    fs::write(&input, &text).unwrap();

    let options = CompressOptions {
        min_support: 1,
        max_line_bytes: 1024,
        ..CompressOptions::default()
    };
    let cancel = AtomicBool::new(false);
    let stats = engine::compress_file(&input, &output, &options, &cancel).unwrap();
    assert_eq!(stats.truncated_lines, 1);

    let container = engine::open(&output).unwrap();
    let rendered = logpress::query::materialize(&container, &[0]).unwrap();
    assert_eq!(rendered.len(), 1);
    assert!(rendered[0].1.len() <= 1024);
}

#[test]
fn cancellation_flag_aborts_before_writing_output() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.log");
    let output = dir.path().join("out.lpr");
    fs::write(&input, "hello\nworld\n").unwrap();

    let options = CompressOptions::default();
    let cancel = AtomicBool::new(true);
    let result = engine::compress_file(&input, &output, &options, &cancel);
    assert!(result.is_err());
    assert!(!output.exists());
}
