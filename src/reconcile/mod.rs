//! Groups records that describe the same underlying financial entity and
//! checks the group members for mutual consistency. Grouping and check
//! evaluation are pure functions of the record set: identical inputs
//! yield identical groups and verdicts regardless of arrival order.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::trace;

use crate::domain::{FailureKind, RawRecord, TypedValue, ValidatedRecord, Verdict};
use crate::rules::{CrossRecordCheck, CrossRecordRule};
use crate::schema::SchemaDefinition;

/// Records sharing one reconciliation key. Transient; exists only while
/// a batch is in flight.
#[derive(Debug)]
pub struct EntityGroup {
    pub key: String,
    /// Members sorted by (ingested_at, record_id)
    pub members: Vec<RawRecord>,
}

/// Derive the reconciliation key for a record. A record missing any key
/// field groups under its own id so it is never silently merged with
/// unrelated records.
pub fn reconciliation_key(record: &RawRecord, schema: &SchemaDefinition) -> String {
    let key_fields = &schema.reconciliation.key_fields;
    if key_fields.is_empty() {
        return format!("record:{}", record.record_id);
    }
    let mut parts = Vec::with_capacity(key_fields.len());
    for field in key_fields {
        match record.fields.get(field) {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                parts.push(s.trim().to_string());
            }
            Some(serde_json::Value::Number(n)) => parts.push(n.to_string()),
            _ => return format!("record:{}", record.record_id),
        }
    }
    parts.join("|")
}

/// Single grouping pass over the full batch. Must complete before any
/// group's validation work begins.
pub fn group_records(records: Vec<RawRecord>, schema: &SchemaDefinition) -> Vec<EntityGroup> {
    let mut grouped: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
    for record in records {
        let key = reconciliation_key(&record, schema);
        grouped.entry(key).or_default().push(record);
    }
    grouped
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by(|a, b| {
                (a.provenance.ingested_at, &a.record_id)
                    .cmp(&(b.provenance.ingested_at, &b.record_id))
            });
            EntityGroup { key, members }
        })
        .collect()
}

/// Evaluate the schema's cross-record rules over one group's validated
/// members, appending ReconciliationMismatch verdicts on failure. A
/// singleton group is exempt; a check needs at least two participating
/// members. When members disagree, every participant is flagged.
pub fn check_group(key: &str, members: &mut [ValidatedRecord], schema: &SchemaDefinition) {
    if members.len() < 2 {
        return;
    }
    for rule in &schema.cross_record_rules {
        match &rule.check {
            CrossRecordCheck::FieldAgreement { field, tolerance } => {
                check_field_agreement(key, members, rule, field, *tolerance);
            }
            CrossRecordCheck::SumMatchesTotal {
                item_field,
                total_field,
                tolerance,
            } => {
                check_sum_matches_total(key, members, rule, item_field, total_field, *tolerance);
            }
        }
    }
}

fn participants(members: &[ValidatedRecord], field: &str) -> Vec<usize> {
    members
        .iter()
        .enumerate()
        .filter(|(_, m)| m.usable_value(field).is_some())
        .map(|(i, _)| i)
        .collect()
}

fn flag_all(
    members: &mut [ValidatedRecord],
    indices: &[usize],
    rule: &CrossRecordRule,
    field: &str,
    reason: String,
) {
    for &i in indices {
        members[i].verdicts.push(Verdict {
            rule: rule.name.clone(),
            field: Some(field.to_string()),
            kind: FailureKind::ReconciliationMismatch,
            severity: rule.severity,
            reason: reason.clone(),
        });
    }
}

fn check_field_agreement(
    key: &str,
    members: &mut [ValidatedRecord],
    rule: &CrossRecordRule,
    field: &str,
    tolerance: Decimal,
) {
    let indices = participants(members, field);
    if indices.len() < 2 {
        trace!(rule = %rule.name, key, "fewer than two participants, skipping");
        return;
    }

    let values: Vec<&TypedValue> = indices
        .iter()
        .filter_map(|&i| members[i].usable_value(field))
        .collect();

    let numeric: Option<Vec<Decimal>> = values.iter().map(|v| v.as_decimal()).collect();
    let disagree = match &numeric {
        Some(decimals) => match (decimals.iter().min(), decimals.iter().max()) {
            (Some(min), Some(max)) => *max - *min > tolerance,
            _ => false,
        },
        None => {
            let first = values[0];
            values.iter().any(|v| *v != first)
        }
    };

    if disagree {
        let mut observed: Vec<String> = indices
            .iter()
            .zip(&values)
            .map(|(&i, v)| format!("{}={}", members[i].record.record_id, v.to_json()))
            .collect();
        observed.sort();
        let reason = format!(
            "sources disagree on '{}' for entity '{}': {}",
            field,
            key,
            observed.join(", ")
        );
        flag_all(members, &indices, rule, field, reason);
    }
}

fn check_sum_matches_total(
    key: &str,
    members: &mut [ValidatedRecord],
    rule: &CrossRecordRule,
    item_field: &str,
    total_field: &str,
    tolerance: Decimal,
) {
    let item_indices = participants(members, item_field);
    if item_indices.len() < 2 {
        trace!(rule = %rule.name, key, "fewer than two participants, skipping");
        return;
    }

    let totals: Vec<Decimal> = participants(members, total_field)
        .iter()
        .filter_map(|&i| {
            members[i]
                .usable_value(total_field)
                .and_then(TypedValue::as_decimal)
        })
        .collect();
    let Some(&first_total) = totals.first() else {
        // No member declares a total; nothing to reconcile against
        return;
    };

    let max_total = totals.iter().max().copied().unwrap_or(first_total);
    let min_total = totals.iter().min().copied().unwrap_or(first_total);
    if max_total - min_total > tolerance {
        let reason = format!(
            "members of entity '{}' declare conflicting '{}' values",
            key, total_field
        );
        flag_all(members, &item_indices, rule, total_field, reason);
        return;
    }

    let sum: Decimal = item_indices
        .iter()
        .filter_map(|&i| {
            members[i]
                .usable_value(item_field)
                .and_then(TypedValue::as_decimal)
        })
        .sum();

    if (sum - first_total).abs() > tolerance {
        let reason = format!(
            "sum of '{}' across entity '{}' is {}, but declared '{}' is {}",
            item_field, key, sum, total_field, first_total
        );
        flag_all(members, &item_indices, rule, item_field, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Provenance;
    use crate::rules::validate;
    use crate::schema::loader::parse_document;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const SCHEMA: &str = r#"
kind = "order_extract"
version = 1

[reconciliation]
key_fields = ["report_id", "period"]

[[fields]]
name = "report_id"
type = "text"

[[fields]]
name = "period"
type = "text"

[[fields]]
name = "counterparty_id"
type = "text"
nullable = true

[[fields]]
name = "line_amount"
type = "decimal"
nullable = true

[[fields]]
name = "report_total"
type = "decimal"
nullable = true

[[rules]]
type = "cross_record"
name = "counterparty_agreement"
severity = "hard"
check = { op = "field_agreement", field = "counterparty_id" }

[[rules]]
type = "cross_record"
name = "lines_sum_to_total"
severity = "hard"
check = { op = "sum_matches_total", item_field = "line_amount", total_field = "report_total" }
"#;

    fn raw(id: &str, offset_secs: i64, fields: serde_json::Value) -> RawRecord {
        let map = match fields {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => panic!("test fields must be an object"),
        };
        RawRecord {
            record_id: id.to_string(),
            fields: map,
            provenance: Provenance {
                source_id: "erp".to_string(),
                batch_id: "b1".to_string(),
                ingested_at: Utc.timestamp_opt(1_700_000_000 + offset_secs, 0).unwrap(),
            },
        }
    }

    #[test]
    fn grouping_is_order_independent() {
        let schema = parse_document(SCHEMA).unwrap();
        let a = raw("a", 0, json!({"report_id": "R1", "period": "2025-Q1"}));
        let b = raw("b", 10, json!({"report_id": "R1", "period": "2025-Q1"}));
        let c = raw("c", 5, json!({"report_id": "R2", "period": "2025-Q1"}));

        let forward = group_records(vec![a.clone(), b.clone(), c.clone()], &schema);
        let shuffled = group_records(vec![c, b, a], &schema);

        let keys = |groups: &[EntityGroup]| -> Vec<(String, Vec<String>)> {
            groups
                .iter()
                .map(|g| {
                    (
                        g.key.clone(),
                        g.members.iter().map(|m| m.record_id.clone()).collect(),
                    )
                })
                .collect()
        };
        assert_eq!(keys(&forward), keys(&shuffled));
    }

    #[test]
    fn record_missing_key_field_is_a_singleton() {
        let schema = parse_document(SCHEMA).unwrap();
        let a = raw("a", 0, json!({"report_id": "R1"}));
        let groups = group_records(vec![a], &schema);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].key, "record:a");
    }

    #[test]
    fn disagreeing_totals_flag_both_members() {
        let schema = parse_document(SCHEMA).unwrap();
        let group = group_records(
            vec![
                raw(
                    "a",
                    0,
                    json!({"report_id": "R1", "period": "Q1", "line_amount": "60.00", "report_total": "100.00"}),
                ),
                raw(
                    "b",
                    1,
                    json!({"report_id": "R1", "period": "Q1", "line_amount": "30.00", "report_total": "100.00"}),
                ),
            ],
            &schema,
        );
        let mut members: Vec<ValidatedRecord> = group
            .into_iter()
            .next()
            .unwrap()
            .members
            .into_iter()
            .map(|r| validate(r, &schema))
            .collect();

        check_group("R1|Q1", &mut members, &schema);

        for member in &members {
            assert!(
                member
                    .verdicts
                    .iter()
                    .any(|v| v.kind == FailureKind::ReconciliationMismatch
                        && v.rule == "lines_sum_to_total"),
                "both members must carry the mismatch"
            );
        }
    }

    #[test]
    fn conflicting_counterparties_flag_all_participants() {
        let schema = parse_document(SCHEMA).unwrap();
        let mut members: Vec<ValidatedRecord> = vec![
            validate(
                raw("a", 0, json!({"report_id": "R1", "period": "Q1", "counterparty_id": "CP-1"})),
                &schema,
            ),
            validate(
                raw("b", 1, json!({"report_id": "R1", "period": "Q1", "counterparty_id": "CP-2"})),
                &schema,
            ),
            validate(
                raw("c", 2, json!({"report_id": "R1", "period": "Q1", "counterparty_id": "CP-1"})),
                &schema,
            ),
        ];

        check_group("R1|Q1", &mut members, &schema);

        let flagged = members
            .iter()
            .filter(|m| {
                m.verdicts
                    .iter()
                    .any(|v| v.rule == "counterparty_agreement")
            })
            .count();
        assert_eq!(flagged, 3, "flag-all policy covers every participant");
    }

    #[test]
    fn singleton_group_is_exempt_from_cross_record_rules() {
        let schema = parse_document(SCHEMA).unwrap();
        let mut members = vec![validate(
            raw(
                "a",
                0,
                json!({"report_id": "R1", "period": "Q1", "line_amount": "60.00", "report_total": "100.00"}),
            ),
            &schema,
        )];
        check_group("R1|Q1", &mut members, &schema);
        assert!(members[0].verdicts.is_empty());
    }

    #[test]
    fn agreement_within_tolerance_passes() {
        let doc = SCHEMA.replace(
            "check = { op = \"sum_matches_total\", item_field = \"line_amount\", total_field = \"report_total\" }",
            "check = { op = \"sum_matches_total\", item_field = \"line_amount\", total_field = \"report_total\", tolerance = \"0.01\" }",
        );
        let schema = parse_document(&doc).unwrap();
        let mut members: Vec<ValidatedRecord> = vec![
            validate(
                raw("a", 0, json!({"report_id": "R1", "period": "Q1", "line_amount": "49.995", "report_total": "100.00"})),
                &schema,
            ),
            validate(
                raw("b", 1, json!({"report_id": "R1", "period": "Q1", "line_amount": "50.00", "report_total": "100.00"})),
                &schema,
            ),
        ];
        check_group("R1|Q1", &mut members, &schema);
        assert!(members.iter().all(|m| m.verdicts.is_empty()));
    }
}
