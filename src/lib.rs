pub mod config;
pub mod domain;
pub mod envelope;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;
pub mod reconcile;
pub mod route;
pub mod rules;
pub mod schema;
pub mod sink;
pub mod transform;

pub use domain::{BatchResult, BatchSummary, RawRecord, RecordStatus, Severity, Verdict};
pub use envelope::BatchEnvelope;
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
pub use schema::{SchemaDefinition, SchemaRegistry};
