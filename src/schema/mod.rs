use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::domain::Severity;
use crate::error::{PipelineError, Result};
use crate::rules::{CrossFieldRule, CrossRecordRule};

pub mod loader;

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    Timestamp,
}

/// Unit annotation driving canonical normalization of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Monetary amount, canonicalized to 2 decimal places
    Currency,
    /// ISO 4217 code field, canonicalized to uppercase
    CurrencyCode,
    /// Percentage, canonicalized to 4 decimal places
    Percent,
}

/// A compiled single-field constraint. Pattern regexes are compiled once
/// at registry load time, never per record.
#[derive(Debug, Clone)]
pub enum Constraint {
    Range {
        min: Option<Decimal>,
        max: Option<Decimal>,
    },
    Enumeration {
        allowed: Vec<String>,
    },
    Pattern {
        regex: Regex,
    },
    NonEmpty,
}

impl Constraint {
    /// Short operation label used when generating verdict rule names
    pub fn op_name(&self) -> &'static str {
        match self {
            Constraint::Range { .. } => "range",
            Constraint::Enumeration { .. } => "enum",
            Constraint::Pattern { .. } => "pattern",
            Constraint::NonEmpty => "non_empty",
        }
    }
}

/// A constraint together with its configured severity and verdict name
#[derive(Debug, Clone)]
pub struct ConstraintSpec {
    /// Rule name carried on verdicts, e.g. "gross_amount.range"
    pub name: String,
    pub constraint: Constraint,
    pub severity: Severity,
}

/// Specification of one schema field
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    pub unit: Option<Unit>,
    pub constraints: Vec<ConstraintSpec>,
}

/// How records of this kind are grouped for reconciliation
#[derive(Debug, Clone, Default)]
pub struct ReconciliationSpec {
    /// Fields whose joined values form the reconciliation key; empty means
    /// every record is its own singleton group
    pub key_fields: Vec<String>,
}

/// A published schema version for one record kind. Immutable once
/// registered; rule-set changes require a new version.
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    pub kind: String,
    pub version: u32,
    /// Ordered field specifications
    pub fields: Vec<FieldSpec>,
    pub reconciliation: ReconciliationSpec,
    pub cross_field_rules: Vec<CrossFieldRule>,
    pub cross_record_rules: Vec<CrossRecordRule>,
}

impl SchemaDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Process-wide, append-only store of published schema versions.
/// Reads are cheap Arc clones and safe across concurrent workers;
/// writes are rare administrative operations (startup or between-batch
/// reload) and are serialized by the write lock.
pub struct SchemaRegistry {
    inner: RwLock<HashMap<String, BTreeMap<u32, Arc<SchemaDefinition>>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a schema version. Fails with `DuplicateVersion` if the
    /// (kind, version) pair already exists; published versions are never
    /// replaced.
    pub fn register(&self, definition: SchemaDefinition) -> Result<()> {
        let mut inner = self.inner.write().expect("schema registry lock poisoned");
        let versions = inner.entry(definition.kind.clone()).or_default();
        if versions.contains_key(&definition.version) {
            return Err(PipelineError::DuplicateVersion {
                kind: definition.kind,
                version: definition.version,
            });
        }
        debug!(
            kind = %definition.kind,
            version = definition.version,
            "registered schema version"
        );
        versions.insert(definition.version, Arc::new(definition));
        Ok(())
    }

    pub fn contains(&self, kind: &str, version: u32) -> bool {
        let inner = self.inner.read().expect("schema registry lock poisoned");
        inner
            .get(kind)
            .map(|versions| versions.contains_key(&version))
            .unwrap_or(false)
    }

    /// Look up a schema by kind, defaulting to the latest published
    /// version when none is requested.
    pub fn resolve(&self, kind: &str, version: Option<u32>) -> Result<Arc<SchemaDefinition>> {
        let inner = self.inner.read().expect("schema registry lock poisoned");
        let versions = inner
            .get(kind)
            .ok_or_else(|| PipelineError::UnknownSchema(kind.to_string()))?;
        let found = match version {
            Some(v) => versions.get(&v).ok_or_else(|| {
                PipelineError::UnknownSchema(format!("{} v{}", kind, v))
            })?,
            None => versions
                .values()
                .next_back()
                .ok_or_else(|| PipelineError::UnknownSchema(kind.to_string()))?,
        };
        Ok(Arc::clone(found))
    }

    /// All registered kinds with their published versions, sorted for
    /// stable listing output.
    pub fn kinds(&self) -> Vec<(String, Vec<u32>)> {
        let inner = self.inner.read().expect("schema registry lock poisoned");
        let mut kinds: Vec<(String, Vec<u32>)> = inner
            .iter()
            .map(|(kind, versions)| (kind.clone(), versions.keys().copied().collect()))
            .collect();
        kinds.sort();
        kinds
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(kind: &str, version: u32) -> SchemaDefinition {
        SchemaDefinition {
            kind: kind.to_string(),
            version,
            fields: Vec::new(),
            reconciliation: ReconciliationSpec::default(),
            cross_field_rules: Vec::new(),
            cross_record_rules: Vec::new(),
        }
    }

    #[test]
    fn register_and_resolve_specific_version() {
        let registry = SchemaRegistry::new();
        registry.register(definition("order_extract", 1)).unwrap();
        registry.register(definition("order_extract", 2)).unwrap();

        let resolved = registry.resolve("order_extract", Some(1)).unwrap();
        assert_eq!(resolved.version, 1);
    }

    #[test]
    fn resolve_without_version_returns_latest() {
        let registry = SchemaRegistry::new();
        registry.register(definition("order_extract", 1)).unwrap();
        registry.register(definition("order_extract", 3)).unwrap();
        registry.register(definition("order_extract", 2)).unwrap();

        let resolved = registry.resolve("order_extract", None).unwrap();
        assert_eq!(resolved.version, 3);
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let registry = SchemaRegistry::new();
        registry.register(definition("order_extract", 1)).unwrap();

        let err = registry.register(definition("order_extract", 1)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::DuplicateVersion { version: 1, .. }
        ));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let registry = SchemaRegistry::new();
        let err = registry.resolve("missing", None).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownSchema(_)));
    }
}
