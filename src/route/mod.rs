//! Partitions processed records into the clean and quarantine streams.
//! Routing is total and deterministic: every input record yields exactly
//! one output record in exactly one stream.

use indexmap::IndexMap;

use crate::domain::{
    CleanRecord, Diagnostic, QuarantinedRecord, RecordStatus, ValidatedRecord,
};
use crate::schema::SchemaDefinition;

/// A routed record, headed for exactly one output stream
#[derive(Debug, Clone)]
pub enum Routed {
    Clean(CleanRecord),
    Quarantined(QuarantinedRecord),
}

impl Routed {
    pub fn record_id(&self) -> &str {
        match self {
            Routed::Clean(r) => &r.record_id,
            Routed::Quarantined(r) => &r.record_id,
        }
    }
}

/// Route one validated record. Clean iff no hard failure and not marked
/// as a duplicate; otherwise quarantined with the full diagnostic.
pub fn route(validated: ValidatedRecord, schema: &SchemaDefinition) -> Routed {
    match validated.status() {
        RecordStatus::Clean => {
            // Emit canonical values in schema field order
            let mut fields = IndexMap::with_capacity(schema.fields.len());
            for spec in &schema.fields {
                let value = validated
                    .typed
                    .get(&spec.name)
                    .map(|v| v.to_json())
                    .unwrap_or(serde_json::Value::Null);
                fields.insert(spec.name.clone(), value);
            }
            Routed::Clean(CleanRecord {
                record_id: validated.record.record_id,
                status: RecordStatus::Clean,
                fields,
                provenance: validated.record.provenance,
                soft_verdicts: validated.verdicts,
            })
        }
        RecordStatus::Quarantined => {
            let rule_names = {
                let mut names: Vec<String> = Vec::new();
                for verdict in &validated.verdicts {
                    if !names.contains(&verdict.rule) {
                        names.push(verdict.rule.clone());
                    }
                }
                names
            };
            Routed::Quarantined(QuarantinedRecord {
                record_id: validated.record.record_id.clone(),
                status: RecordStatus::Quarantined,
                // Hard-failed records keep the values exactly as received
                fields: validated.record.fields,
                provenance: validated.record.provenance,
                diagnostic: Diagnostic {
                    record_id: validated.record.record_id,
                    rule_names,
                    verdicts: validated.verdicts,
                },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FailureKind, Provenance, RawRecord, Severity, Verdict};
    use crate::rules::validate;
    use crate::schema::loader::parse_document;
    use chrono::Utc;
    use serde_json::json;

    const SCHEMA: &str = r#"
kind = "order_extract"
version = 1

[[fields]]
name = "report_id"
type = "text"

[[fields]]
name = "gross_amount"
type = "decimal"
"#;

    fn validated(fields: serde_json::Value) -> ValidatedRecord {
        let map = match fields {
            serde_json::Value::Object(map) => map.into_iter().collect(),
            _ => panic!("test fields must be an object"),
        };
        let schema = parse_document(SCHEMA).unwrap();
        validate(
            RawRecord {
                record_id: "r1".to_string(),
                fields: map,
                provenance: Provenance {
                    source_id: "erp".to_string(),
                    batch_id: "b1".to_string(),
                    ingested_at: Utc::now(),
                },
            },
            &schema,
        )
    }

    #[test]
    fn clean_record_routes_with_canonical_fields() {
        let schema = parse_document(SCHEMA).unwrap();
        let routed = route(
            validated(json!({"report_id": "R1", "gross_amount": "10,50"})),
            &schema,
        );
        match routed {
            Routed::Clean(clean) => {
                assert_eq!(clean.status, RecordStatus::Clean);
                assert_eq!(clean.fields.get("gross_amount"), Some(&json!("10.50")));
            }
            Routed::Quarantined(_) => panic!("expected clean"),
        }
    }

    #[test]
    fn hard_failure_routes_to_quarantine_with_diagnostics() {
        let schema = parse_document(SCHEMA).unwrap();
        let routed = route(validated(json!({"report_id": "R1"})), &schema);
        match routed {
            Routed::Quarantined(q) => {
                assert_eq!(q.status, RecordStatus::Quarantined);
                assert_eq!(q.diagnostic.rule_names, vec!["gross_amount.required"]);
                assert_eq!(q.diagnostic.verdicts.len(), 1);
            }
            Routed::Clean(_) => panic!("expected quarantine"),
        }
    }

    #[test]
    fn deduplicated_record_is_quarantined() {
        let schema = parse_document(SCHEMA).unwrap();
        let mut record = validated(json!({"report_id": "R1", "gross_amount": "10.00"}));
        record.verdicts.push(Verdict {
            rule: "deduplicate".to_string(),
            field: None,
            kind: FailureKind::Deduplicated,
            severity: Severity::Soft,
            reason: "exact duplicate of record 'r0'".to_string(),
        });
        assert!(matches!(route(record, &schema), Routed::Quarantined(_)));
    }
}
