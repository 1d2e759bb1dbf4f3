//! Output ports toward the storage/catalog collaborator. The pipeline
//! hands off the two record streams and the batch summary through the
//! `RecordSink` trait; everything past that boundary is someone else's
//! system.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::domain::{BatchResult, BatchSummary, CleanRecord, QuarantinedRecord};
use crate::error::Result;

/// Receiver of the pipeline's output streams
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write_clean(&self, batch_id: &str, records: &[CleanRecord]) -> Result<()>;
    async fn write_quarantined(&self, batch_id: &str, records: &[QuarantinedRecord])
        -> Result<()>;
    async fn write_summary(&self, summary: &BatchSummary) -> Result<()>;
}

/// Hand a completed batch off to a sink: both streams, then the summary.
pub async fn deliver(sink: &dyn RecordSink, result: &BatchResult) -> Result<()> {
    sink.write_clean(&result.batch_id, &result.clean).await?;
    sink.write_quarantined(&result.batch_id, &result.quarantined)
        .await?;
    sink.write_summary(&result.summary()).await?;
    Ok(())
}

/// In-memory sink for development and testing
pub struct InMemorySink {
    clean: Arc<Mutex<Vec<CleanRecord>>>,
    quarantined: Arc<Mutex<Vec<QuarantinedRecord>>>,
    summaries: Arc<Mutex<Vec<BatchSummary>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self {
            clean: Arc::new(Mutex::new(Vec::new())),
            quarantined: Arc::new(Mutex::new(Vec::new())),
            summaries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn clean_records(&self) -> Vec<CleanRecord> {
        self.clean.lock().expect("sink lock poisoned").clone()
    }

    pub fn quarantined_records(&self) -> Vec<QuarantinedRecord> {
        self.quarantined.lock().expect("sink lock poisoned").clone()
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.summaries.lock().expect("sink lock poisoned").clone()
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordSink for InMemorySink {
    async fn write_clean(&self, _batch_id: &str, records: &[CleanRecord]) -> Result<()> {
        self.clean
            .lock()
            .expect("sink lock poisoned")
            .extend_from_slice(records);
        Ok(())
    }

    async fn write_quarantined(
        &self,
        _batch_id: &str,
        records: &[QuarantinedRecord],
    ) -> Result<()> {
        self.quarantined
            .lock()
            .expect("sink lock poisoned")
            .extend_from_slice(records);
        Ok(())
    }

    async fn write_summary(&self, summary: &BatchSummary) -> Result<()> {
        self.summaries
            .lock()
            .expect("sink lock poisoned")
            .push(summary.clone());
        Ok(())
    }
}

/// Writes each stream as a JSON-lines file under the output directory:
/// `<batch_id>.clean.jsonl`, `<batch_id>.quarantine.jsonl` and
/// `<batch_id>.summary.json`.
pub struct JsonLinesSink {
    output_dir: PathBuf,
}

impl JsonLinesSink {
    pub fn new<P: Into<PathBuf>>(output_dir: P) -> Result<Self> {
        let output_dir = output_dir.into();
        fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    fn write_lines<T: serde::Serialize>(&self, file_name: &str, records: &[T]) -> Result<()> {
        let path = self.output_dir.join(file_name);
        let mut file = fs::File::create(&path)?;
        for record in records {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{}", line)?;
        }
        debug!(path = %path.display(), count = records.len(), "stream written");
        Ok(())
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write_clean(&self, batch_id: &str, records: &[CleanRecord]) -> Result<()> {
        self.write_lines(&format!("{}.clean.jsonl", batch_id), records)
    }

    async fn write_quarantined(
        &self,
        batch_id: &str,
        records: &[QuarantinedRecord],
    ) -> Result<()> {
        self.write_lines(&format!("{}.quarantine.jsonl", batch_id), records)
    }

    async fn write_summary(&self, summary: &BatchSummary) -> Result<()> {
        let path = self.output_dir.join(format!("{}.summary.json", summary.batch_id));
        fs::write(&path, serde_json::to_string_pretty(summary)?)?;
        info!(path = %path.display(), "batch summary written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Provenance, RecordStatus};
    use chrono::Utc;
    use indexmap::IndexMap;
    use std::collections::BTreeMap;

    fn clean_record(id: &str) -> CleanRecord {
        CleanRecord {
            record_id: id.to_string(),
            status: RecordStatus::Clean,
            fields: IndexMap::new(),
            provenance: Provenance {
                source_id: "erp".to_string(),
                batch_id: "b1".to_string(),
                ingested_at: Utc::now(),
            },
            soft_verdicts: Vec::new(),
        }
    }

    fn summary() -> BatchSummary {
        BatchSummary {
            batch_id: "b1".to_string(),
            schema_kind: "order_extract".to_string(),
            schema_version: 1,
            input_count: 1,
            clean_count: 1,
            quarantined_count: 0,
            deduplicated_count: 0,
            rule_failure_counts: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn json_lines_sink_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonLinesSink::new(dir.path()).unwrap();

        sink.write_clean("b1", &[clean_record("r1")]).await.unwrap();
        sink.write_quarantined("b1", &[]).await.unwrap();
        sink.write_summary(&summary()).await.unwrap();

        let clean = std::fs::read_to_string(dir.path().join("b1.clean.jsonl")).unwrap();
        assert_eq!(clean.lines().count(), 1);
        assert!(dir.path().join("b1.quarantine.jsonl").exists());
        assert!(dir.path().join("b1.summary.json").exists());
    }

    #[tokio::test]
    async fn in_memory_sink_captures_streams() {
        let sink = InMemorySink::new();
        sink.write_clean("b1", &[clean_record("r1"), clean_record("r2")])
            .await
            .unwrap();
        sink.write_summary(&summary()).await.unwrap();

        assert_eq!(sink.clean_records().len(), 2);
        assert_eq!(sink.summaries().len(), 1);
    }
}
