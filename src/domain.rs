use chrono::{DateTime, NaiveDate, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A raw financial report extract record as delivered by the ingestion
/// collaborator. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    /// Source-assigned identifier for this record
    pub record_id: String,
    /// Ordered mapping of field name to the untyped value as received
    pub fields: IndexMap<String, serde_json::Value>,
    /// Provenance information linking back to the submitting source
    pub provenance: Provenance,
}

/// Provenance metadata attached to every record at ingestion time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provenance {
    /// The source system that provided the data
    pub source_id: String,
    /// The batch this record arrived in
    pub batch_id: String,
    /// When the ingestion collaborator received the record
    pub ingested_at: DateTime<Utc>,
}

/// A schema-conformant typed value produced by coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedValue {
    Text(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Null,
}

impl TypedValue {
    /// Render the canonical JSON representation written to output streams.
    /// Decimals serialize as strings so exactness survives the handoff.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            TypedValue::Text(s) => serde_json::Value::String(s.clone()),
            TypedValue::Integer(i) => serde_json::Value::from(*i),
            TypedValue::Decimal(d) => serde_json::Value::String(d.to_string()),
            TypedValue::Boolean(b) => serde_json::Value::Bool(*b),
            TypedValue::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            TypedValue::Timestamp(t) => serde_json::Value::String(t.to_rfc3339()),
            TypedValue::Null => serde_json::Value::Null,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            TypedValue::Decimal(d) => Some(*d),
            TypedValue::Integer(i) => Some(Decimal::from(*i)),
            _ => None,
        }
    }
}

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Recorded for visibility but does not block clean status
    Soft,
    /// Forces the record into quarantine
    Hard,
}

/// The failure taxonomy carried on verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Raw value could not be coerced to the declared type
    TypeMismatch,
    /// Null or absent value on a non-nullable field
    MissingRequired,
    /// A declared constraint was violated
    ConstraintViolation,
    /// Members of an entity group materially disagree
    ReconciliationMismatch,
    /// Exact duplicate of an earlier record in the batch
    Deduplicated,
}

/// A recorded validation finding for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Name of the rule or check that produced this finding
    pub rule: String,
    /// Field this finding is anchored to, when field-scoped
    pub field: Option<String>,
    pub kind: FailureKind,
    pub severity: Severity,
    /// Human-readable explanation, detailed enough to act on without
    /// re-running validation
    pub reason: String,
}

/// Overall routing status of a processed record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Clean,
    Quarantined,
}

/// A raw record annotated with typed values and the verdicts accumulated
/// across validation, reconciliation and transformation
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub record: RawRecord,
    /// Schema-conformant typed values; fields that failed coercion are absent
    pub typed: IndexMap<String, TypedValue>,
    pub verdicts: Vec<Verdict>,
}

impl ValidatedRecord {
    pub fn has_hard_failure(&self) -> bool {
        self.verdicts.iter().any(|v| v.severity == Severity::Hard)
    }

    pub fn is_deduplicated(&self) -> bool {
        self.verdicts
            .iter()
            .any(|v| v.kind == FailureKind::Deduplicated)
    }

    pub fn status(&self) -> RecordStatus {
        if self.has_hard_failure() || self.is_deduplicated() {
            RecordStatus::Quarantined
        } else {
            RecordStatus::Clean
        }
    }

    /// Field names carrying at least one hard verdict
    pub fn hard_failed_fields(&self) -> BTreeSet<&str> {
        self.verdicts
            .iter()
            .filter(|v| v.severity == Severity::Hard)
            .filter_map(|v| v.field.as_deref())
            .collect()
    }

    /// A typed value usable as input to cross-field and cross-record
    /// checks: present, non-null, and not itself hard-failed
    pub fn usable_value(&self, field: &str) -> Option<&TypedValue> {
        if self.hard_failed_fields().contains(field) {
            return None;
        }
        match self.typed.get(field) {
            Some(TypedValue::Null) | None => None,
            Some(value) => Some(value),
        }
    }
}

/// Diagnostic object attached to every quarantined record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub record_id: String,
    /// Names of every rule that produced a finding
    pub rule_names: Vec<String>,
    /// All verdicts, including soft ones, in evaluation order
    pub verdicts: Vec<Verdict>,
}

/// A record that passed validation, emitted on the clean stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanRecord {
    pub record_id: String,
    pub status: RecordStatus,
    /// Canonical, normalized field values
    pub fields: IndexMap<String, serde_json::Value>,
    pub provenance: Provenance,
    /// Soft findings recorded for visibility
    pub soft_verdicts: Vec<Verdict>,
}

/// A record that failed validation or reconciliation, emitted on the
/// quarantine stream with its diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantinedRecord {
    pub record_id: String,
    pub status: RecordStatus,
    /// Field values as received; hard-failed records are never normalized
    pub fields: IndexMap<String, serde_json::Value>,
    pub provenance: Provenance,
    pub diagnostic: Diagnostic,
}

/// Aggregate result of one batch run. Deliberately free of wall-clock
/// timestamps so re-running a batch yields identical output; durations
/// are logged and emitted as metrics instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub schema_kind: String,
    pub schema_version: u32,
    pub input_count: usize,
    pub clean_count: usize,
    pub quarantined_count: usize,
    pub deduplicated_count: usize,
    /// Failure counts keyed by rule name, deterministically ordered
    pub rule_failure_counts: BTreeMap<String, u64>,
    pub clean: Vec<CleanRecord>,
    pub quarantined: Vec<QuarantinedRecord>,
}

impl BatchResult {
    /// Condensed view written to the observability/catalog surface
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.batch_id.clone(),
            schema_kind: self.schema_kind.clone(),
            schema_version: self.schema_version,
            input_count: self.input_count,
            clean_count: self.clean_count,
            quarantined_count: self.quarantined_count,
            deduplicated_count: self.deduplicated_count,
            rule_failure_counts: self.rule_failure_counts.clone(),
        }
    }
}

/// Per-batch counts without the record streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub schema_kind: String,
    pub schema_version: u32,
    pub input_count: usize,
    pub clean_count: usize,
    pub quarantined_count: usize,
    pub deduplicated_count: usize,
    pub rule_failure_counts: BTreeMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with_verdicts(verdicts: Vec<Verdict>) -> ValidatedRecord {
        let mut fields = IndexMap::new();
        fields.insert("amount".to_string(), json!("10.00"));
        ValidatedRecord {
            record: RawRecord {
                record_id: "r1".to_string(),
                fields,
                provenance: Provenance {
                    source_id: "src".to_string(),
                    batch_id: "b1".to_string(),
                    ingested_at: Utc::now(),
                },
            },
            typed: IndexMap::new(),
            verdicts,
        }
    }

    #[test]
    fn soft_verdicts_do_not_block_clean_status() {
        let record = record_with_verdicts(vec![Verdict {
            rule: "amount.range".to_string(),
            field: Some("amount".to_string()),
            kind: FailureKind::ConstraintViolation,
            severity: Severity::Soft,
            reason: "amount unusually large".to_string(),
        }]);
        assert_eq!(record.status(), RecordStatus::Clean);
    }

    #[test]
    fn hard_verdict_forces_quarantine() {
        let record = record_with_verdicts(vec![Verdict {
            rule: "amount.required".to_string(),
            field: Some("amount".to_string()),
            kind: FailureKind::MissingRequired,
            severity: Severity::Hard,
            reason: "amount is null".to_string(),
        }]);
        assert_eq!(record.status(), RecordStatus::Quarantined);
    }

    #[test]
    fn deduplicated_record_is_quarantined_despite_soft_severity() {
        let record = record_with_verdicts(vec![Verdict {
            rule: "dedup".to_string(),
            field: None,
            kind: FailureKind::Deduplicated,
            severity: Severity::Soft,
            reason: "duplicate of r0".to_string(),
        }]);
        assert_eq!(record.status(), RecordStatus::Quarantined);
    }

    #[test]
    fn decimal_values_render_as_strings() {
        let value = TypedValue::Decimal(Decimal::new(123456, 2));
        assert_eq!(value.to_json(), json!("1234.56"));
    }
}
