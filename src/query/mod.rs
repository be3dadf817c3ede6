//! Query engine (§4.6): predicate evaluation with predicate pushdown onto
//! column blocks, and byte-faithful line reconstruction.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::column::decode_column;
use crate::container::Container;
use crate::error::{ContainerError, QueryError};
use crate::semantic::SemanticType;
use crate::template::{Slot, Template};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Predicate {
    TemplateId(u32),
    TimestampRange { since_ms: i64, until_ms: i64 },
    FieldEquals { semantic_type: SemanticType, text: String },
    FieldIn { semantic_type: SemanticType, values: Vec<String> },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

/// Log ids carrying a given template, in ascending order. Column rows for
/// that template line up 1:1 with this list (§4.5 "columns" layout note).
/// A direct index lookup, not a scan — the template→logid index is built
/// once at write time (§8 property 6, template predicate pushdown).
fn log_ids_for_template(container: &Container, template_id: u32) -> Vec<u64> {
    container.log_ids_for_template(template_id).to_vec()
}

/// Resolves a severity predicate purely via the severity→logid index: zero
/// column bytes decoded (§4.6 "severity in {S...} — resolved via the
/// severity index", §8 property 6).
fn rows_matching_severity(container: &Container, test: impl Fn(&str) -> bool) -> BTreeSet<u64> {
    container
        .severity_values()
        .filter(|v| test(v))
        .flat_map(|v| container.log_ids_for_severity(v).unwrap_or(&[]).iter().copied())
        .collect()
}

/// Resolves a timestamp range predicate by scanning each template's stored
/// min/max first and only decoding the columns whose range actually
/// intersects `[since_ms, until_ms]` (§4.6 "timestamp in [t0,t1]", §8
/// property/scenario E6: a range entirely outside every column's min/max
/// decodes zero column bytes).
fn rows_matching_timestamp(
    container: &Container,
    since_ms: i64,
    until_ms: i64,
) -> Result<BTreeSet<u64>, QueryError> {
    let mut matched = BTreeSet::new();

    for template in container.templates() {
        let timestamp_columns: Vec<u32> = template
            .slots
            .iter()
            .filter_map(|s| match s {
                Slot::Variable { semantic_type, column_id }
                    if *semantic_type == SemanticType::Timestamp =>
                {
                    Some(*column_id)
                }
                _ => None,
            })
            .collect();
        if timestamp_columns.is_empty() {
            continue;
        }

        let columns = container.columns_for_template(template.template_id);
        let log_ids = container.log_ids_for_template(template.template_id);

        for column_id in timestamp_columns {
            let Some(column) = columns.iter().find(|c| c.column_id == column_id) else {
                continue;
            };
            if let Some((min, max)) = column.min_max {
                if max < since_ms || min > until_ms {
                    continue; // whole column out of range; nothing to decode
                }
            }
            let decoded = decode_column(column)
                .map_err(|e| QueryError::Decode(ContainerError::Encode(e)))?;
            for (row, value) in decoded.iter().enumerate() {
                if let Value::I64(millis) = value {
                    if *millis >= since_ms && *millis <= until_ms {
                        matched.insert(log_ids[row]);
                    }
                }
            }
        }
    }

    Ok(matched)
}

/// Evaluates a leaf predicate against every column (across every template)
/// whose semantic type matches, via a caller-supplied row test. This is the
/// pushdown point: the row test runs directly against decoded column
/// values, never against reconstructed text.
fn rows_matching(
    container: &Container,
    semantic_type: SemanticType,
    test: impl Fn(&Value) -> bool,
) -> Result<BTreeSet<u64>, QueryError> {
    let mut matched = BTreeSet::new();

    for template in container.templates() {
        let var_positions: Vec<(usize, u32)> = template
            .slots
            .iter()
            .enumerate()
            .filter_map(|(pos, slot)| match slot {
                Slot::Variable { semantic_type: st, column_id } if *st == semantic_type => {
                    Some((pos, *column_id))
                }
                _ => None,
            })
            .collect();
        if var_positions.is_empty() {
            continue;
        }

        let columns = container.columns_for_template(template.template_id);
        let log_ids = log_ids_for_template(container, template.template_id);

        for (_, column_id) in var_positions {
            let Some(column) = columns.iter().find(|c| c.column_id == column_id) else {
                continue;
            };
            let decoded = decode_column(column)
                .map_err(|e| QueryError::Decode(ContainerError::Encode(e)))?;
            for (row, value) in decoded.iter().enumerate() {
                if test(value) {
                    matched.insert(log_ids[row]);
                }
            }
        }
    }

    Ok(matched)
}

fn evaluate(container: &Container, predicate: &Predicate) -> Result<BTreeSet<u64>, QueryError> {
    match predicate {
        Predicate::TemplateId(id) => Ok(log_ids_for_template(container, *id).into_iter().collect()),

        Predicate::TimestampRange { since_ms, until_ms } => {
            rows_matching_timestamp(container, *since_ms, *until_ms)
        }

        Predicate::FieldEquals { semantic_type, text } if *semantic_type == SemanticType::Severity => {
            Ok(rows_matching_severity(container, |v| v == text))
        }

        Predicate::FieldIn { semantic_type, values } if *semantic_type == SemanticType::Severity => {
            let set: std::collections::HashSet<&str> = values.iter().map(String::as_str).collect();
            Ok(rows_matching_severity(container, |v| set.contains(v)))
        }

        Predicate::FieldEquals { semantic_type, text } => {
            rows_matching(container, *semantic_type, |v| &v.render() == text)
        }

        Predicate::FieldIn { semantic_type, values } => {
            let set: std::collections::HashSet<&str> = values.iter().map(String::as_str).collect();
            rows_matching(container, *semantic_type, |v| set.contains(v.render().as_str()))
        }

        Predicate::And(children) => {
            let mut sets: Vec<BTreeSet<u64>> = children
                .iter()
                .map(|p| evaluate(container, p))
                .collect::<Result<_, _>>()?;
            // Smallest-result-first: intersecting from the smallest set
            // first minimizes the work done by each subsequent intersection.
            sets.sort_by_key(|s| s.len());
            let mut iter = sets.into_iter();
            let mut acc = iter.next().unwrap_or_default();
            for s in iter {
                if acc.is_empty() {
                    break;
                }
                acc = acc.intersection(&s).copied().collect();
            }
            Ok(acc)
        }

        Predicate::Or(children) => {
            let mut acc = BTreeSet::new();
            for p in children {
                acc.extend(evaluate(container, p)?);
            }
            Ok(acc)
        }
    }
}

/// Runs `predicate` and returns matching log ids, ascending.
pub fn query(container: &Container, predicate: &Predicate) -> Result<Vec<u64>, QueryError> {
    Ok(evaluate(container, predicate)?.into_iter().collect())
}

/// Count-only form; avoids building the result vector when the caller only
/// wants a number (§4.6 "count").
pub fn count(container: &Container, predicate: &Predicate) -> Result<usize, QueryError> {
    Ok(evaluate(container, predicate)?.len())
}

fn render_template(template: &Template, columns: &[crate::column::EncodedColumn], row_values: &[Value]) -> String {
    let mut out = String::new();
    let mut values = row_values.iter();
    for slot in &template.slots {
        match slot {
            Slot::Literal { text, .. } => out.push_str(text),
            Slot::Variable { column_id, .. } => {
                if let Some(v) = values.next() {
                    let codec = columns
                        .iter()
                        .find(|c| c.column_id == *column_id)
                        .map(|c| &c.codec);
                    match codec {
                        Some(codec) => out.push_str(&crate::column::render_for_reconstruction(codec, v)),
                        None => out.push_str(&v.render()),
                    }
                }
            }
        }
    }
    out
}

/// Reconstructs original line text for each of `log_ids`, byte-exact modulo
/// the trailing-whitespace normalization the lexer already performs
/// (§4.6 "materialize", §8 invariant 3).
pub fn materialize(container: &Container, log_ids: &[u64]) -> Result<Vec<(u64, String)>, QueryError> {
    let mut by_template: HashMap<u32, Vec<u64>> = HashMap::new();
    for &id in log_ids {
        let template_id = container
            .template_id_for_log(id)
            .ok_or_else(|| QueryError::MalformedPredicate(format!("log id {id} out of range")))?;
        by_template.entry(template_id).or_default().push(id);
    }

    let mut out = Vec::with_capacity(log_ids.len());
    for (template_id, ids) in by_template {
        let template = &container.templates()[template_id as usize];
        let columns = container.columns_for_template(template_id);
        let decoded: Vec<Vec<Value>> = columns
            .iter()
            .map(decode_column)
            .collect::<Result<_, _>>()
            .map_err(|e| QueryError::Decode(ContainerError::Encode(e)))?;

        for id in ids {
            let (_, row) = container.row_index_for_log(id).expect("validated above");
            let row_values: Vec<Value> = decoded.iter().map(|col| col[row].clone()).collect();
            out.push((id, render_template(template, columns, &row_values)));
        }
    }

    out.sort_by_key(|(id, _)| *id);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::encode_column;
    use crate::container::write_container;
    use crate::container::open_container;
    use crate::token::TypeTag;
    use tempfile::tempdir;

    fn build_fixture() -> (tempfile::TempDir, Container) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fixture.lpr");

        let template = Template {
            template_id: 0,
            slots: vec![
                Slot::Literal { text: "user=".into(), tag: TypeTag::Word },
                Slot::Variable { semantic_type: SemanticType::UserId, column_id: 0 },
                Slot::Literal { text: " sev=".into(), tag: TypeTag::Word },
                Slot::Variable { semantic_type: SemanticType::Severity, column_id: 1 },
            ],
            match_count: 3,
            example_log_id: 0,
            is_synthetic: false,
        };

        let user_col = encode_column(0, SemanticType::UserId, &["u1".into(), "u2".into(), "u1".into()]).unwrap();
        let sev_col = encode_column(1, SemanticType::Severity, &["INFO".into(), "ERROR".into(), "INFO".into()]).unwrap();

        write_container(&path, vec![template], vec![0, 0, 0], vec![vec![user_col, sev_col]], None).unwrap();

        let container = open_container(&path).unwrap();
        (dir, container)
    }

    #[test]
    fn template_id_predicate_matches_all_rows() {
        let (_dir, container) = build_fixture();
        let result = query(&container, &Predicate::TemplateId(0)).unwrap();
        assert_eq!(result, vec![0, 1, 2]);
    }

    #[test]
    fn field_equals_pushes_down_to_column() {
        let (_dir, container) = build_fixture();
        let result = query(
            &container,
            &Predicate::FieldEquals {
                semantic_type: SemanticType::Severity,
                text: "ERROR".into(),
            },
        )
        .unwrap();
        assert_eq!(result, vec![1]);
    }

    #[test]
    fn and_predicate_intersects() {
        let (_dir, container) = build_fixture();
        let result = query(
            &container,
            &Predicate::And(vec![
                Predicate::TemplateId(0),
                Predicate::FieldEquals {
                    semantic_type: SemanticType::UserId,
                    text: "u1".into(),
                },
            ]),
        )
        .unwrap();
        assert_eq!(result, vec![0, 2]);
    }

    #[test]
    fn materialize_reconstructs_original_text() {
        let (_dir, container) = build_fixture();
        let rendered = materialize(&container, &[0, 1, 2]).unwrap();
        assert_eq!(
            rendered,
            vec![
                (0, "user=u1 sev=INFO".to_string()),
                (1, "user=u2 sev=ERROR".to_string()),
                (2, "user=u1 sev=INFO".to_string()),
            ]
        );
    }

    #[test]
    fn count_matches_query_length() {
        let (_dir, container) = build_fixture();
        let c = count(&container, &Predicate::TemplateId(0)).unwrap();
        assert_eq!(c, 3);
    }

    #[test]
    fn severity_predicate_resolves_via_index() {
        let (_dir, container) = build_fixture();
        assert_eq!(container.log_ids_for_severity("ERROR"), Some(&[1u64][..]));
        assert_eq!(container.log_ids_for_severity("INFO"), Some(&[0u64, 2][..]));

        let result = query(
            &container,
            &Predicate::FieldIn {
                semantic_type: SemanticType::Severity,
                values: vec!["ERROR".into()],
            },
        )
        .unwrap();
        assert_eq!(result, vec![1]);
    }

    fn build_timestamp_fixture() -> (tempfile::TempDir, Container) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ts_fixture.lpr");

        let template_old = Template {
            template_id: 0,
            slots: vec![Slot::Variable { semantic_type: SemanticType::Timestamp, column_id: 0 }],
            match_count: 2,
            example_log_id: 0,
            is_synthetic: false,
        };
        let template_future = Template {
            template_id: 1,
            slots: vec![Slot::Variable { semantic_type: SemanticType::Timestamp, column_id: 1 }],
            match_count: 2,
            example_log_id: 2,
            is_synthetic: false,
        };

        let col_old = encode_column(
            0,
            SemanticType::Timestamp,
            &["2024-01-01T00:00:00.000Z".into(), "2024-01-01T00:00:01.000Z".into()],
        )
        .unwrap();
        let col_future = encode_column(
            1,
            SemanticType::Timestamp,
            &["2030-01-01T00:00:00.000Z".into(), "2030-01-01T00:00:01.000Z".into()],
        )
        .unwrap();

        write_container(
            &path,
            vec![template_old, template_future],
            vec![0, 0, 1, 1],
            vec![vec![col_old], vec![col_future]],
            None,
        )
        .unwrap();

        let container = open_container(&path).unwrap();
        (dir, container)
    }

    #[test]
    fn timestamp_range_prunes_out_of_range_columns_via_min_max() {
        let (_dir, container) = build_timestamp_fixture();
        let since_ms = crate::column::parse_timestamp_millis("2024-01-01T00:00:00.000Z").unwrap();
        let until_ms = crate::column::parse_timestamp_millis("2024-01-01T23:59:59.000Z").unwrap();

        let result = query(&container, &Predicate::TimestampRange { since_ms, until_ms }).unwrap();
        assert_eq!(result, vec![0, 1]);
    }
}
