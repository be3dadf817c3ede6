//! Template miner (§4.3).
//!
//! Two-phase clustering: bucket logs by shape (arity + coarse lexical tag
//! multiset), then within each bucket infer which positions are variable by
//! counting distinct values. This is O(N · arity) and avoids the all-pairs
//! edit-distance cost of Drain/LogMine-style approaches while matching their
//! accuracy on common corpora (§4.3 "Why this shape").

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::semantic::{Recognizer, SemanticType};
use crate::token::{LogLine, Token, TypeTag};
use crate::value::Value;

pub type TemplateId = u32;
pub type ColumnId = u32;

/// Default minimum group size for a real (non-synthetic) template (§4.3, glossary).
pub const DEFAULT_MIN_SUPPORT: usize = 3;

/// Threshold `V` in the variable-inference rule (§4.3 2.a).
const VARIABLE_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Slot {
    Literal { text: String, tag: TypeTag },
    Variable { semantic_type: SemanticType, column_id: ColumnId },
}

/// An immutable template (§3 "Template"). Templates never change after
/// [`mine`] returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub slots: Vec<Slot>,
    pub match_count: u64,
    pub example_log_id: u64,
    pub is_synthetic: bool,
}

impl Template {
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn variable_column_ids(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.slots.iter().filter_map(|s| match s {
            Slot::Variable { column_id, .. } => Some(*column_id),
            Slot::Literal { .. } => None,
        })
    }
}

/// Per-line assignment: which template matched, and the ordered values
/// pulled from its variable slots.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub log_id: u64,
    pub template_id: TemplateId,
    pub values: Vec<Value>,
}

struct LineRef<'a> {
    log_id: u64,
    tokens: &'a [Token],
}

/// Coarse bucket key: arity plus the multiset of lexical tags, so that e.g.
/// `"INFO user=alice"` and `"ERROR user=bob"` (same shape, different
/// severity word) land in the same bucket while a differently-shaped line
/// does not.
fn bucket_key(tokens: &[Token]) -> (usize, Vec<(TypeTag, u16)>) {
    let mut counts: HashMap<TypeTag, u16> = HashMap::new();
    for t in tokens {
        *counts.entry(t.tag).or_insert(0) += 1;
    }
    let mut tags: Vec<_> = counts.into_iter().collect();
    tags.sort_by_key(|(tag, _)| *tag);
    (tokens.len(), tags)
}

/// Mines templates and per-line assignments from `lines` (§4.3 contract).
/// Deterministic: log-id order drives every tie-break, so repeat runs on
/// the same input produce identical template ids and assignments.
pub fn mine(
    lines: &[LogLine],
    min_support: usize,
    recognizer: &Recognizer,
) -> (Vec<Template>, Vec<Assignment>) {
    let mut buckets: HashMap<(usize, Vec<(TypeTag, u16)>), Vec<LineRef>> = HashMap::new();
    for line in lines {
        buckets
            .entry(bucket_key(&line.tokens))
            .or_default()
            .push(LineRef {
                log_id: line.log_id,
                tokens: &line.tokens,
            });
    }

    // Process buckets in first-log-id order so template ids are assigned
    // deterministically by first appearance (§4.3 contract, §5 ordering).
    let mut bucket_list: Vec<_> = buckets.into_values().collect();
    for bucket in &mut bucket_list {
        bucket.sort_by_key(|l| l.log_id);
    }
    bucket_list.sort_by_key(|b| b[0].log_id);

    let mut groups: Vec<Vec<LineRef>> = Vec::new();
    let mut orphans: Vec<LineRef> = Vec::new();

    for bucket in bucket_list {
        split_bucket(bucket, min_support, &mut groups, &mut orphans);
    }
    orphans.sort_by_key(|l| l.log_id);

    let mut raw_templates: Vec<(Template, Vec<LineRef>)> = Vec::new();
    let mut next_column_id: ColumnId = 0;

    for group in groups {
        let (template, column_start) = build_template(&group, recognizer, next_column_id, false);
        next_column_id = column_start;
        raw_templates.push((template, group));
    }

    if !orphans.is_empty() {
        for line in orphans {
            let single = vec![line];
            let (template, column_start) =
                build_template(&single, recognizer, next_column_id, true);
            next_column_id = column_start;
            raw_templates.push((template, single));
        }
    }

    // Canonicalize: merge templates whose literal skeleton + variable
    // position set coincide across buckets (§4.3 "Template identity").
    let merged = canonicalize(raw_templates);

    assign_dense_ids(merged)
}

/// Recursively splits a bucket until every resulting group either converges
/// (all lines agree once variable positions are masked) or falls below
/// `min_support`, in which case its lines become orphans (§4.3 step 3).
fn split_bucket<'a>(
    lines: Vec<LineRef<'a>>,
    min_support: usize,
    groups: &mut Vec<Vec<LineRef<'a>>>,
    orphans: &mut Vec<LineRef<'a>>,
) {
    if lines.len() < min_support {
        orphans.extend(lines);
        return;
    }

    let arity = lines[0].tokens.len();
    let variable = variable_positions(&lines);

    // Partition by the literal-slot signature: lines with identical values
    // at every literal position converge to the same template.
    let mut partitions: HashMap<Vec<&str>, Vec<LineRef<'a>>> = HashMap::new();
    for line in lines {
        let sig: Vec<&str> = (0..arity)
            .filter(|p| !variable[*p])
            .map(|p| line.tokens[p].raw.as_str())
            .collect();
        partitions.entry(sig).or_default().push(line);
    }

    if partitions.len() == 1 {
        groups.push(partitions.into_values().next().unwrap());
        return;
    }

    for (_, part) in partitions {
        if part.len() >= min_support {
            split_bucket(part, min_support, groups, orphans);
        } else {
            orphans.extend(part);
        }
    }
}

/// For each token position in a group of same-arity lines, decides variable
/// vs literal per the two-part rule in §4.3 step 2.
fn variable_positions(lines: &[LineRef]) -> Vec<bool> {
    let arity = lines[0].tokens.len();
    let bucket_size = lines.len();
    let mut variable = vec![false; arity];

    for pos in 0..arity {
        let mut distinct: HashMap<&str, usize> = HashMap::new();
        for line in lines {
            *distinct.entry(line.tokens[pos].raw.as_str()).or_insert(0) += 1;
        }
        let distinct_count = distinct.len();
        let is_unknown_semantic = lines[0].tokens[pos].tag.is_structured();

        let rule_a = distinct_count > VARIABLE_THRESHOLD && is_unknown_semantic;
        let rule_b =
            distinct_count > std::cmp::max(VARIABLE_THRESHOLD, (bucket_size as f64 * 0.5) as usize);
        variable[pos] = rule_a || rule_b;
    }

    variable
}

/// Builds one template (real or synthetic) from a converged group of lines.
/// Returns the template plus the next free column id.
fn build_template(
    group: &[LineRef],
    recognizer: &Recognizer,
    next_column_id: ColumnId,
    synthetic: bool,
) -> (Template, ColumnId) {
    let example = group.iter().min_by_key(|l| l.log_id).unwrap();
    let arity = example.tokens.len();
    let match_count = group.len() as u64;
    let example_log_id = example.log_id;

    let mut column_id = next_column_id;
    let mut slots = Vec::with_capacity(arity);

    if synthetic {
        // One variable slot per token, semantic type from the recognizer on
        // the example line; this keeps reconstruction exact while still
        // letting the column encoder pick a reasonable codec per position.
        for tok in example.tokens {
            let (semantic_type, _) = recognizer.recognize(tok);
            slots.push(Slot::Variable {
                semantic_type,
                column_id,
            });
            column_id += 1;
        }
        return (
            Template {
                template_id: 0,
                slots,
                match_count,
                example_log_id,
                is_synthetic: true,
            },
            column_id,
        );
    }

    let variable = variable_positions(group);
    for pos in 0..arity {
        if variable[pos] {
            let (semantic_type, _) = recognizer.recognize(&example.tokens[pos]);
            slots.push(Slot::Variable {
                semantic_type,
                column_id,
            });
            column_id += 1;
        } else {
            let majority = majority_value(group, pos);
            slots.push(Slot::Literal {
                text: majority.to_string(),
                tag: example.tokens[pos].tag,
            });
        }
    }

    (
        Template {
            template_id: 0,
            slots,
            match_count,
            example_log_id,
            is_synthetic: false,
        },
        column_id,
    )
}

/// Majority value at a literal position, ties broken by first occurrence in
/// log-id order (§4.3 step 2).
fn majority_value<'a>(group: &'a [LineRef], pos: usize) -> &'a str {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut first_seen: HashMap<&str, u64> = HashMap::new();
    for line in group {
        *counts.entry(line.tokens[pos].raw.as_str()).or_insert(0) += 1;
        first_seen
            .entry(line.tokens[pos].raw.as_str())
            .or_insert(line.log_id);
    }
    counts
        .into_iter()
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then(first_seen[b.0].cmp(&first_seen[a.0]))
        })
        .map(|(value, _)| value)
        .unwrap()
}

/// Canonical key identifying a template's shape, independent of which
/// bucket produced it.
fn canonical_key(template: &Template) -> String {
    template
        .slots
        .iter()
        .map(|s| match s {
            Slot::Literal { text, .. } => format!("L:{text}"),
            Slot::Variable { .. } => "V".to_string(),
        })
        .collect::<Vec<_>>()
        .join("\u{1}")
}

fn canonicalize(raw: Vec<(Template, Vec<LineRef>)>) -> Vec<(Template, Vec<LineRef>)> {
    let mut by_key: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<(Template, Vec<LineRef>)> = Vec::new();

    for (template, lines) in raw {
        let key = canonical_key(&template);
        if let Some(&idx) = by_key.get(&key) {
            let (existing, existing_lines): &mut (Template, Vec<LineRef>) = &mut merged[idx];
            existing.match_count += template.match_count;
            existing.example_log_id = existing.example_log_id.min(template.example_log_id);
            existing_lines.extend(lines);
        } else {
            by_key.insert(key, merged.len());
            merged.push((template, lines));
        }
    }

    merged
}

/// Assigns final dense template ids in order of first-member log-id
/// (§3 "assigned on first discovery", §5 ordering guarantees), and builds
/// the per-line assignment vector sorted back into log-id order.
fn assign_dense_ids(mut merged: Vec<(Template, Vec<LineRef>)>) -> (Vec<Template>, Vec<Assignment>) {
    merged.sort_by_key(|(t, _)| t.example_log_id);

    let mut templates = Vec::with_capacity(merged.len());
    let mut assignments = Vec::new();

    for (id, (mut template, lines)) in merged.into_iter().enumerate() {
        template.template_id = id as TemplateId;
        for line in &lines {
            let values = extract_values(&template, line.tokens);
            assignments.push(Assignment {
                log_id: line.log_id,
                template_id: template.template_id,
                values,
            });
        }
        templates.push(template);
    }

    assignments.sort_by_key(|a| a.log_id);
    (templates, assignments)
}

fn extract_values(template: &Template, tokens: &[Token]) -> Vec<Value> {
    template
        .slots
        .iter()
        .enumerate()
        .filter_map(|(pos, slot)| match slot {
            Slot::Variable { .. } => Some(Value::Str(tokens[pos].raw.clone())),
            Slot::Literal { .. } => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex_str;
    use crate::semantic::Recognizer;

    fn lines_from(strs: &[&str]) -> Vec<LogLine> {
        strs.iter()
            .enumerate()
            .map(|(i, s)| LogLine {
                log_id: i as u64,
                tokens: lex_str(s),
                truncated: false,
            })
            .collect()
    }

    #[test]
    fn all_identical_lines_one_template_no_variables() {
        let lines = lines_from(&["hello world"; 5]);
        let recognizer = Recognizer::default();
        let (templates, assignments) = mine(&lines, 3, &recognizer);
        assert_eq!(templates.len(), 1);
        assert!(!templates[0].is_synthetic);
        assert_eq!(templates[0].variable_column_ids().count(), 0);
        assert_eq!(assignments.len(), 5);
    }

    #[test]
    fn single_line_is_synthetic() {
        let lines = lines_from(&["x"]);
        let recognizer = Recognizer::default();
        let (templates, assignments) = mine(&lines, 3, &recognizer);
        assert_eq!(templates.len(), 1);
        assert!(templates[0].is_synthetic);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].template_id, 0);
    }

    #[test]
    fn disagreeing_literal_position_splits_bucket() {
        let lines = lines_from(&["user alice login", "user bob logout"]);
        let recognizer = Recognizer::default();
        let (templates, assignments) = mine(&lines, 1, &recognizer);
        // "login" vs "logout" at the literal tail position disagree -> split.
        assert_eq!(templates.len(), 2);
        assert_eq!(assignments.len(), 2);
        assert_ne!(assignments[0].template_id, assignments[1].template_id);
    }

    #[test]
    fn every_line_gets_exactly_one_assignment() {
        let lines = lines_from(&[
            "[2024-01-01 00:00:00] INFO user=alice id=1",
            "[2024-01-01 00:00:01] INFO user=bob id=2",
            "[2024-01-01 00:00:02] INFO user=carol id=3",
            "[2024-01-01 00:00:03] ERROR something else entirely",
        ]);
        let recognizer = Recognizer::default();
        let (_, assignments) = mine(&lines, 3, &recognizer);
        assert_eq!(assignments.len(), 4);
        let mut ids: Vec<u64> = assignments.iter().map(|a| a.log_id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn deterministic_across_runs() {
        let lines = lines_from(&[
            "[2024-01-01 00:00:00] INFO user=alice id=1",
            "[2024-01-01 00:00:01] INFO user=bob id=2",
            "[2024-01-01 00:00:02] ERROR user=alice id=3",
        ]);
        let recognizer = Recognizer::default();
        let (t1, a1) = mine(&lines, 2, &recognizer);
        let (t2, a2) = mine(&lines, 2, &recognizer);
        assert_eq!(t1.len(), t2.len());
        for (x, y) in t1.iter().zip(t2.iter()) {
            assert_eq!(canonical_key(x), canonical_key(y));
            assert_eq!(x.match_count, y.match_count);
        }
        for (x, y) in a1.iter().zip(a2.iter()) {
            assert_eq!(x.template_id, y.template_id);
        }
    }

    #[test]
    fn min_support_below_threshold_becomes_synthetic() {
        let lines = lines_from(&[
            "[2024-01-01 00:00:00] INFO user=alice id=1",
            "[2024-01-01 00:00:01] INFO user=bob id=2",
            "[2024-01-01 00:00:02] ERROR user=alice id=3",
        ]);
        let recognizer = Recognizer::default();
        let (templates, _) = mine(&lines, 2, &recognizer);
        // INFO lines reach min_support=2; the single ERROR line does not and
        // becomes a synthetic raw template.
        assert!(templates.iter().any(|t| !t.is_synthetic));
        assert!(templates.iter().any(|t| t.is_synthetic));
    }
}
