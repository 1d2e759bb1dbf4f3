//! Loads declarative schema and rule-set documents from a registry
//! directory. One TOML file per published (kind, version); files are
//! re-read wholesale on reload, and already-registered versions are
//! skipped so the registry stays append-only.

use regex::Regex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::domain::Severity;
use crate::error::{PipelineError, Result};
use crate::rules::{CrossFieldPredicate, CrossFieldRule, CrossRecordCheck, CrossRecordRule};
use crate::schema::{
    Constraint, ConstraintSpec, FieldSpec, FieldType, ReconciliationSpec, SchemaDefinition,
    SchemaRegistry, Unit,
};

/// Top-level registry document: `{kind, version, fields[], rules[]}`
#[derive(Debug, Deserialize)]
pub struct SchemaDocument {
    pub kind: String,
    pub version: u32,
    #[serde(default)]
    pub reconciliation: ReconciliationDoc,
    pub fields: Vec<FieldDoc>,
    #[serde(default)]
    pub rules: Vec<RuleDoc>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ReconciliationDoc {
    #[serde(default)]
    pub key_fields: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FieldDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub unit: Option<Unit>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDoc>,
}

#[derive(Debug, Deserialize)]
pub struct ConstraintDoc {
    #[serde(flatten)]
    pub op: ConstraintOp,
    #[serde(default = "default_severity")]
    pub severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Hard
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ConstraintOp {
    Range {
        #[serde(default)]
        min: Option<Decimal>,
        #[serde(default)]
        max: Option<Decimal>,
    },
    Enumeration {
        allowed: Vec<String>,
    },
    Pattern {
        regex: String,
    },
    NonEmpty,
}

/// Declarative rules: a tagged union over the three rule kinds. Rules are
/// data; the engine evaluates them generically.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleDoc {
    FieldConstraint {
        field: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default = "default_severity")]
        severity: Severity,
        constraint: ConstraintOp,
    },
    CrossField {
        name: String,
        predicate: PredicateDoc,
        #[serde(default = "default_severity")]
        severity: Severity,
        reason: String,
    },
    CrossRecord {
        name: String,
        check: CheckDoc,
        #[serde(default = "default_severity")]
        severity: Severity,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PredicateDoc {
    SumEquals {
        addends: Vec<String>,
        total: String,
        #[serde(default)]
        tolerance: Option<Decimal>,
    },
    Equals {
        left: String,
        right: String,
    },
    LessOrEqual {
        left: String,
        right: String,
    },
    RequiresPresent {
        when: String,
        then: String,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CheckDoc {
    FieldAgreement {
        field: String,
        #[serde(default)]
        tolerance: Option<Decimal>,
    },
    SumMatchesTotal {
        item_field: String,
        total_field: String,
        #[serde(default)]
        tolerance: Option<Decimal>,
    },
}

impl SchemaDocument {
    /// Compile the document into an immutable definition, validating
    /// field references and constraint applicability up front so the
    /// engine never has to branch on configuration mistakes per record.
    pub fn compile(self) -> Result<SchemaDefinition> {
        let kind = self.kind;
        let version = self.version;

        let mut fields: Vec<FieldSpec> = Vec::with_capacity(self.fields.len());
        for doc in self.fields {
            let mut constraints = Vec::with_capacity(doc.constraints.len());
            for c in doc.constraints {
                constraints.push(compile_constraint(
                    &kind,
                    &doc.name,
                    doc.field_type,
                    None,
                    c.op,
                    c.severity,
                )?);
            }
            fields.push(FieldSpec {
                name: doc.name,
                field_type: doc.field_type,
                nullable: doc.nullable,
                unit: doc.unit,
                constraints,
            });
        }

        for key_field in &self.reconciliation.key_fields {
            require_field(&fields, &kind, version, key_field, "reconciliation key")?;
        }

        let mut cross_field_rules = Vec::new();
        let mut cross_record_rules = Vec::new();

        for rule in self.rules {
            match rule {
                RuleDoc::FieldConstraint {
                    field,
                    name,
                    severity,
                    constraint,
                } => {
                    require_field(&fields, &kind, version, &field, "field constraint rule")?;
                    let Some(spec) = fields.iter_mut().find(|f| f.name == field) else {
                        continue;
                    };
                    let compiled = compile_constraint(
                        &kind,
                        &field,
                        spec.field_type,
                        name,
                        constraint,
                        severity,
                    )?;
                    spec.constraints.push(compiled);
                }
                RuleDoc::CrossField {
                    name,
                    predicate,
                    severity,
                    reason,
                } => {
                    let (predicate, inputs) = compile_predicate(predicate);
                    for input in &inputs {
                        require_field(
                            &fields,
                            &kind,
                            version,
                            input,
                            &format!("cross-field rule '{}'", name),
                        )?;
                    }
                    cross_field_rules.push(CrossFieldRule {
                        name,
                        inputs,
                        predicate,
                        severity,
                        reason,
                    });
                }
                RuleDoc::CrossRecord {
                    name,
                    check,
                    severity,
                } => {
                    let context = format!("cross-record rule '{}'", name);
                    let check = match check {
                        CheckDoc::FieldAgreement { field, tolerance } => {
                            require_field(&fields, &kind, version, &field, &context)?;
                            CrossRecordCheck::FieldAgreement {
                                field,
                                tolerance: tolerance.unwrap_or(Decimal::ZERO),
                            }
                        }
                        CheckDoc::SumMatchesTotal {
                            item_field,
                            total_field,
                            tolerance,
                        } => {
                            require_field(&fields, &kind, version, &item_field, &context)?;
                            require_field(&fields, &kind, version, &total_field, &context)?;
                            CrossRecordCheck::SumMatchesTotal {
                                item_field,
                                total_field,
                                tolerance: tolerance.unwrap_or(Decimal::ZERO),
                            }
                        }
                    };
                    cross_record_rules.push(CrossRecordRule {
                        name,
                        check,
                        severity,
                    });
                }
            }
        }

        Ok(SchemaDefinition {
            kind,
            version,
            fields,
            reconciliation: ReconciliationSpec {
                key_fields: self.reconciliation.key_fields,
            },
            cross_field_rules,
            cross_record_rules,
        })
    }
}

fn require_field(
    fields: &[FieldSpec],
    kind: &str,
    version: u32,
    name: &str,
    context: &str,
) -> Result<()> {
    if fields.iter().any(|f| f.name == name) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "{} v{}: {} references undeclared field '{}'",
            kind, version, context, name
        )))
    }
}

fn compile_constraint(
    kind: &str,
    field: &str,
    field_type: FieldType,
    name: Option<String>,
    op: ConstraintOp,
    severity: Severity,
) -> Result<ConstraintSpec> {
    let constraint = match op {
        ConstraintOp::Range { min, max } => {
            if !matches!(field_type, FieldType::Integer | FieldType::Decimal) {
                return Err(PipelineError::Config(format!(
                    "{}: range constraint on non-numeric field '{}'",
                    kind, field
                )));
            }
            Constraint::Range { min, max }
        }
        ConstraintOp::Enumeration { allowed } => {
            require_text(kind, field, field_type, "enumeration")?;
            Constraint::Enumeration { allowed }
        }
        ConstraintOp::Pattern { regex } => {
            require_text(kind, field, field_type, "pattern")?;
            let regex = Regex::new(&regex).map_err(|e| {
                PipelineError::Config(format!(
                    "{}: invalid pattern for field '{}': {}",
                    kind, field, e
                ))
            })?;
            Constraint::Pattern { regex }
        }
        ConstraintOp::NonEmpty => {
            require_text(kind, field, field_type, "non_empty")?;
            Constraint::NonEmpty
        }
    };
    let name = name.unwrap_or_else(|| format!("{}.{}", field, constraint.op_name()));
    Ok(ConstraintSpec {
        name,
        constraint,
        severity,
    })
}

fn require_text(kind: &str, field: &str, field_type: FieldType, op: &str) -> Result<()> {
    if field_type == FieldType::Text {
        Ok(())
    } else {
        Err(PipelineError::Config(format!(
            "{}: {} constraint on non-text field '{}'",
            kind, op, field
        )))
    }
}

fn compile_predicate(doc: PredicateDoc) -> (CrossFieldPredicate, Vec<String>) {
    match doc {
        PredicateDoc::SumEquals {
            addends,
            total,
            tolerance,
        } => {
            let mut inputs = addends.clone();
            inputs.push(total.clone());
            (
                CrossFieldPredicate::SumEquals {
                    addends,
                    total,
                    tolerance: tolerance.unwrap_or(Decimal::ZERO),
                },
                inputs,
            )
        }
        PredicateDoc::Equals { left, right } => {
            let inputs = vec![left.clone(), right.clone()];
            (CrossFieldPredicate::Equals { left, right }, inputs)
        }
        PredicateDoc::LessOrEqual { left, right } => {
            let inputs = vec![left.clone(), right.clone()];
            (CrossFieldPredicate::LessOrEqual { left, right }, inputs)
        }
        PredicateDoc::RequiresPresent { when, then } => {
            let inputs = vec![when.clone(), then.clone()];
            (CrossFieldPredicate::RequiresPresent { when, then }, inputs)
        }
    }
}

/// Parse a single registry document from TOML source.
pub fn parse_document(content: &str) -> Result<SchemaDefinition> {
    let document: SchemaDocument = toml::from_str(content)?;
    document.compile()
}

/// Load every `*.toml` document from the registry directory, registering
/// versions not yet published. Safe to call again between batches for hot
/// reload; already-registered versions are left untouched.
pub fn load_registry_dir<P: AsRef<Path>>(registry: &SchemaRegistry, dir: P) -> Result<usize> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(PipelineError::Config(format!(
            "registry directory does not exist: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<_> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.extension().and_then(|s| s.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    let mut registered = 0;
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let definition = parse_document(&content).map_err(|e| {
            PipelineError::Config(format!("{}: {}", path.display(), e))
        })?;
        if registry.contains(&definition.kind, definition.version) {
            debug!(
                kind = %definition.kind,
                version = definition.version,
                "schema version already published, skipping"
            );
            continue;
        }
        registry.register(definition)?;
        registered += 1;
    }
    info!(registered, dir = %dir.display(), "registry load complete");
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"
kind = "order_extract"
version = 1

[reconciliation]
key_fields = ["report_id", "period"]

[[fields]]
name = "report_id"
type = "text"

[[fields.constraints]]
op = "non_empty"
severity = "hard"

[[fields]]
name = "period"
type = "text"

[[fields]]
name = "gross_amount"
type = "decimal"
unit = "currency"

[[fields]]
name = "net_amount"
type = "decimal"
unit = "currency"

[[fields]]
name = "tax_amount"
type = "decimal"
unit = "currency"

[[rules]]
type = "field_constraint"
field = "gross_amount"
severity = "soft"
constraint = { op = "range", min = "0" }

[[rules]]
type = "cross_field"
name = "net_plus_tax_equals_gross"
severity = "hard"
reason = "net + tax must equal gross"
predicate = { op = "sum_equals", addends = ["net_amount", "tax_amount"], total = "gross_amount" }

[[rules]]
type = "cross_record"
name = "gross_agreement"
severity = "hard"
check = { op = "field_agreement", field = "gross_amount" }
"#;

    #[test]
    fn parses_full_document() {
        let definition = parse_document(DOCUMENT).unwrap();
        assert_eq!(definition.kind, "order_extract");
        assert_eq!(definition.version, 1);
        assert_eq!(definition.reconciliation.key_fields.len(), 2);
        assert_eq!(definition.cross_field_rules.len(), 1);
        assert_eq!(definition.cross_record_rules.len(), 1);

        // field_constraint rule folded into the field's constraint list
        let gross = definition.field("gross_amount").unwrap();
        assert_eq!(gross.constraints.len(), 1);
        assert_eq!(gross.constraints[0].severity, Severity::Soft);

        // cross-field inputs derived from the predicate
        assert_eq!(
            definition.cross_field_rules[0].inputs,
            vec!["net_amount", "tax_amount", "gross_amount"]
        );
    }

    #[test]
    fn undeclared_rule_input_fails_compile() {
        let bad = DOCUMENT.replace("\"net_amount\", \"tax_amount\"", "\"missing_field\"");
        let err = parse_document(&bad).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn invalid_pattern_fails_compile() {
        let doc = r#"
kind = "k"
version = 1

[[fields]]
name = "code"
type = "text"

[[fields.constraints]]
op = "pattern"
regex = "["
"#;
        let err = parse_document(doc).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn range_on_text_field_fails_compile() {
        let doc = r#"
kind = "k"
version = 1

[[fields]]
name = "code"
type = "text"

[[fields.constraints]]
op = "range"
min = "0"
"#;
        let err = parse_document(doc).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn load_directory_skips_already_registered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("order_extract.v1.toml"), DOCUMENT).unwrap();

        let registry = SchemaRegistry::new();
        assert_eq!(load_registry_dir(&registry, dir.path()).unwrap(), 1);
        // Reload re-reads the directory without disturbing published versions
        assert_eq!(load_registry_dir(&registry, dir.path()).unwrap(), 0);
        assert!(registry.resolve("order_extract", Some(1)).is_ok());
    }
}
