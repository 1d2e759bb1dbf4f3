//! The batch envelope: the wire format the ingestion collaborator
//! delivers batches in. Envelopes are validated structurally against a
//! JSON Schema document before deserialization; a structurally invalid
//! envelope aborts the whole batch, the only record-bearing failure mode
//! that does.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::{Provenance, RawRecord};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRef {
    pub kind: String,
    /// Omitted means "latest published version"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSubmission {
    pub record_id: String,
    /// Per-record source override for multi-source batches; defaults to
    /// the envelope's source_id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub ingested_at: DateTime<Utc>,
    pub fields: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEnvelope {
    pub envelope_version: String, // "1.0.0"
    pub batch_id: String,
    pub source_id: String,
    pub schema: SchemaRef,
    pub records: Vec<RecordSubmission>,
}

static BATCH_SCHEMA: Lazy<JSONSchema> = Lazy::new(|| {
    let schema_json: serde_json::Value =
        serde_json::from_str(include_str!("../schemas/batch.v1.json"))
            .expect("embedded batch schema is valid JSON");
    let schema_static: &'static serde_json::Value = Box::leak(Box::new(schema_json));
    JSONSchema::options()
        .compile(schema_static)
        .expect("embedded batch schema compiles")
});

/// Validate a candidate envelope against the batch JSON Schema.
pub fn validate_envelope(value: &serde_json::Value) -> Result<()> {
    BATCH_SCHEMA.validate(value).map_err(|errors| {
        let detail: Vec<String> = errors
            .take(5)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();
        PipelineError::MalformedEnvelope(detail.join("; "))
    })
}

impl BatchEnvelope {
    /// Parse and structurally validate an envelope from JSON text.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| PipelineError::MalformedEnvelope(e.to_string()))?;
        validate_envelope(&value)?;
        serde_json::from_value(value).map_err(|e| PipelineError::MalformedEnvelope(e.to_string()))
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Unpack the envelope into provenance-stamped raw records.
    pub fn into_raw_records(self) -> Vec<RawRecord> {
        let batch_id = self.batch_id;
        let default_source = self.source_id;
        self.records
            .into_iter()
            .map(|submission| RawRecord {
                record_id: submission.record_id,
                fields: submission.fields,
                provenance: Provenance {
                    source_id: submission
                        .source_id
                        .unwrap_or_else(|| default_source.clone()),
                    batch_id: batch_id.clone(),
                    ingested_at: submission.ingested_at,
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "envelope_version": "1.0.0",
            "batch_id": "batch-2025-03-31-001",
            "source_id": "erp_export",
            "schema": { "kind": "order_extract", "version": 1 },
            "records": [
                {
                    "record_id": "r-1",
                    "ingested_at": "2025-03-31T08:15:00Z",
                    "fields": { "report_id": "R1", "gross_amount": "10,00" }
                },
                {
                    "record_id": "r-2",
                    "source_id": "crm_export",
                    "ingested_at": "2025-03-31T08:16:00Z",
                    "fields": { "report_id": "R1", "gross_amount": "10.00" }
                }
            ]
        })
    }

    #[test]
    fn valid_envelope_parses() {
        let envelope = BatchEnvelope::from_json_str(&sample().to_string()).unwrap();
        assert_eq!(envelope.records.len(), 2);
        assert_eq!(envelope.schema.kind, "order_extract");
    }

    #[test]
    fn missing_batch_id_is_malformed() {
        let mut bad = sample();
        bad.as_object_mut().unwrap().remove("batch_id");
        let err = BatchEnvelope::from_json_str(&bad.to_string()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEnvelope(_)));
    }

    #[test]
    fn record_without_id_is_malformed() {
        let mut bad = sample();
        bad["records"][0].as_object_mut().unwrap().remove("record_id");
        let err = BatchEnvelope::from_json_str(&bad.to_string()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedEnvelope(_)));
    }

    #[test]
    fn per_record_source_overrides_envelope_source() {
        let envelope = BatchEnvelope::from_json_str(&sample().to_string()).unwrap();
        let records = envelope.into_raw_records();
        assert_eq!(records[0].provenance.source_id, "erp_export");
        assert_eq!(records[1].provenance.source_id, "crm_export");
        assert_eq!(records[0].provenance.batch_id, "batch-2025-03-31-001");
    }
}
