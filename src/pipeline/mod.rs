//! The pipeline orchestrator: drives a batch through schema resolution,
//! grouping, per-group validation/reconciliation/normalization and
//! routing, and aggregates run-level statistics.
//!
//! Grouping is a single serial pass needing full batch visibility; once
//! it completes, every entity group is independent and is evaluated
//! concurrently, bounded by the configured worker count. Group tasks
//! accumulate their own partial counters which are merged at batch end,
//! so there is no contended shared state on the hot path.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{BatchResult, FailureKind};
use crate::envelope::BatchEnvelope;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::reconcile::{self, EntityGroup};
use crate::route::{self, Routed};
use crate::rules;
use crate::schema::{SchemaDefinition, SchemaRegistry};
use crate::transform;

/// Per-worker partial aggregates, merged once per group at batch end
#[derive(Debug, Default)]
struct PartialStats {
    clean: usize,
    quarantined: usize,
    deduplicated: usize,
    rule_failures: BTreeMap<String, u64>,
}

impl PartialStats {
    fn observe(&mut self, routed: &Routed) {
        let verdicts = match routed {
            Routed::Clean(record) => {
                self.clean += 1;
                &record.soft_verdicts
            }
            Routed::Quarantined(record) => {
                self.quarantined += 1;
                if record
                    .diagnostic
                    .verdicts
                    .iter()
                    .any(|v| v.kind == FailureKind::Deduplicated)
                {
                    self.deduplicated += 1;
                }
                &record.diagnostic.verdicts
            }
        };
        for verdict in verdicts {
            *self.rule_failures.entry(verdict.rule.clone()).or_insert(0) += 1;
        }
    }

    fn merge(&mut self, other: PartialStats) {
        self.clean += other.clean;
        self.quarantined += other.quarantined;
        self.deduplicated += other.deduplicated;
        for (rule, count) in other.rule_failures {
            *self.rule_failures.entry(rule).or_insert(0) += count;
        }
    }
}

pub struct Pipeline {
    registry: Arc<SchemaRegistry>,
    workers: usize,
}

impl Pipeline {
    pub fn new(registry: Arc<SchemaRegistry>, workers: usize) -> Self {
        Self {
            registry,
            workers: workers.max(1),
        }
    }

    /// Process one batch to completion. Only envelope- and schema-level
    /// problems abort the run; record-level failures become quarantine
    /// entries, never errors.
    pub async fn run(&self, envelope: BatchEnvelope) -> Result<BatchResult> {
        let started = Instant::now();
        let batch_id = envelope.batch_id.clone();

        // Schema is resolved exactly once per batch
        let schema = self
            .registry
            .resolve(&envelope.schema.kind, envelope.schema.version)?;
        info!(
            batch_id = %batch_id,
            kind = %schema.kind,
            version = schema.version,
            records = envelope.records.len(),
            "starting batch"
        );

        let records = envelope.into_raw_records();
        let input_count = records.len();
        metrics::batch::records_input(input_count as u64);

        // Phase 1: grouping needs the whole batch before any group work
        let groups = reconcile::group_records(records, &schema);
        metrics::reconcile::groups(groups.len() as u64);
        for group in &groups {
            metrics::reconcile::group_size(group.members.len());
        }
        debug!(batch_id = %batch_id, groups = groups.len(), "grouping complete");

        // Phase 2: groups are independent; evaluate them concurrently,
        // bounded by the worker pool
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let group_count = groups.len();
        let mut join_set: JoinSet<(usize, Vec<Routed>, PartialStats)> = JoinSet::new();
        for (index, group) in groups.into_iter().enumerate() {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::Config(format!("worker pool closed: {}", e)))?;
            let schema = Arc::clone(&schema);
            join_set.spawn(async move {
                let _permit = permit;
                let (routed, stats) = process_group(group, &schema);
                (index, routed, stats)
            });
        }

        let mut outcomes: Vec<Option<Vec<Routed>>> = (0..group_count).map(|_| None).collect();
        let mut stats = PartialStats::default();
        while let Some(joined) = join_set.join_next().await {
            let (index, routed, partial) = joined
                .map_err(|e| PipelineError::Config(format!("group worker failed: {}", e)))?;
            stats.merge(partial);
            outcomes[index] = Some(routed);
        }

        // Reassemble output in deterministic group-key order
        let mut clean = Vec::new();
        let mut quarantined = Vec::new();
        for routed in outcomes.into_iter().flatten().flatten() {
            match routed {
                Routed::Clean(record) => clean.push(record),
                Routed::Quarantined(record) => quarantined.push(record),
            }
        }

        if clean.len() + quarantined.len() != input_count {
            // Cannot happen while routing stays total; loud if it ever does
            warn!(
                batch_id = %batch_id,
                input = input_count,
                clean = clean.len(),
                quarantined = quarantined.len(),
                "record conservation violated"
            );
        }

        let result = BatchResult {
            batch_id: batch_id.clone(),
            schema_kind: schema.kind.clone(),
            schema_version: schema.version,
            input_count,
            clean_count: clean.len(),
            quarantined_count: quarantined.len(),
            deduplicated_count: stats.deduplicated,
            rule_failure_counts: stats.rule_failures,
            clean,
            quarantined,
        };

        metrics::batch::records_clean(result.clean_count as u64);
        metrics::batch::records_quarantined(result.quarantined_count as u64);
        metrics::batch::records_deduplicated(result.deduplicated_count as u64);
        for (rule, count) in &result.rule_failure_counts {
            metrics::rules::failures(rule, *count);
        }
        let elapsed = started.elapsed();
        metrics::batch::duration(elapsed.as_secs_f64());
        metrics::batch::processed();

        info!(
            batch_id = %batch_id,
            input = result.input_count,
            clean = result.clean_count,
            quarantined = result.quarantined_count,
            deduplicated = result.deduplicated_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "batch complete"
        );

        Ok(result)
    }
}

/// Evaluate one entity group: per-record validation, cross-record
/// checks, normalization of records without hard failures, exact
/// duplicate marking, then routing. Pure and CPU-bound.
fn process_group(group: EntityGroup, schema: &SchemaDefinition) -> (Vec<Routed>, PartialStats) {
    let EntityGroup { key, members } = group;

    let mut validated: Vec<_> = members
        .into_iter()
        .map(|record| rules::validate(record, schema))
        .collect();

    reconcile::check_group(&key, &mut validated, schema);

    for record in &mut validated {
        if !record.has_hard_failure() {
            transform::normalize(record, schema);
        }
    }
    transform::dedup_group(&mut validated, schema);

    let mut stats = PartialStats::default();
    let routed: Vec<Routed> = validated
        .into_iter()
        .map(|record| {
            let routed = route::route(record, schema);
            stats.observe(&routed);
            routed
        })
        .collect();
    (routed, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::loader::parse_document;
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
name = "gross_amount"
type = "decimal"
unit = "currency"
"#;

    fn registry() -> Arc<SchemaRegistry> {
        let registry = SchemaRegistry::new();
        registry.register(parse_document(SCHEMA).unwrap()).unwrap();
        Arc::new(registry)
    }

    fn envelope(records: serde_json::Value) -> BatchEnvelope {
        BatchEnvelope::from_json_str(
            &json!({
                "envelope_version": "1.0.0",
                "batch_id": "b1",
                "source_id": "erp",
                "schema": { "kind": "order_extract", "version": 1 },
                "records": records
            })
            .to_string(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn batch_completes_with_conserved_counts() {
        let pipeline = Pipeline::new(registry(), 4);
        let result = pipeline
            .run(envelope(json!([
                {"record_id": "a", "ingested_at": "2025-03-31T08:00:00Z",
                 "fields": {"report_id": "R1", "period": "Q1", "gross_amount": "10,00"}},
                {"record_id": "b", "ingested_at": "2025-03-31T08:01:00Z",
                 "fields": {"report_id": "R2", "period": "Q1", "gross_amount": null}}
            ])))
            .await
            .unwrap();

        assert_eq!(result.input_count, 2);
        assert_eq!(result.clean_count + result.quarantined_count, 2);
        assert_eq!(result.clean_count, 1);
        assert_eq!(
            result.rule_failure_counts.get("gross_amount.required"),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn unknown_schema_aborts_the_batch() {
        let pipeline = Pipeline::new(Arc::new(SchemaRegistry::new()), 4);
        let err = pipeline.run(envelope(json!([]))).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownSchema(_)));
    }

    #[tokio::test]
    async fn record_failures_never_abort_the_batch() {
        let pipeline = Pipeline::new(registry(), 1);
        let result = pipeline
            .run(envelope(json!([
                {"record_id": "a", "ingested_at": "2025-03-31T08:00:00Z",
                 "fields": {"report_id": "R1", "period": "Q1", "gross_amount": "not a number"}}
            ])))
            .await
            .unwrap();
        assert_eq!(result.quarantined_count, 1);
        assert_eq!(result.quarantined[0].diagnostic.verdicts.len(), 1);
    }
}
