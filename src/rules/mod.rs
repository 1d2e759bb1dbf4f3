//! The rule engine: evaluates schema field checks and declarative
//! cross-field rules against a single record, producing verdicts. Rules
//! are data loaded from the registry, never behavior baked in here.

use indexmap::IndexMap;
use rust_decimal::Decimal;
use tracing::trace;

use crate::domain::{FailureKind, RawRecord, Severity, TypedValue, ValidatedRecord, Verdict};
use crate::schema::{Constraint, SchemaDefinition};

pub mod coerce;

/// A declarative rule relating several fields of one record
#[derive(Debug, Clone)]
pub struct CrossFieldRule {
    pub name: String,
    /// Field names the predicate reads; a hard failure on any of them
    /// skips the rule
    pub inputs: Vec<String>,
    pub predicate: CrossFieldPredicate,
    pub severity: Severity,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum CrossFieldPredicate {
    /// sum(addends) must equal total within tolerance
    SumEquals {
        addends: Vec<String>,
        total: String,
        tolerance: Decimal,
    },
    Equals {
        left: String,
        right: String,
    },
    LessOrEqual {
        left: String,
        right: String,
    },
    /// When `when` carries a value, `then` must too
    RequiresPresent {
        when: String,
        then: String,
    },
}

/// A declarative rule comparing fields across the records of one entity
/// group; evaluated by the reconciler
#[derive(Debug, Clone)]
pub struct CrossRecordRule {
    pub name: String,
    pub check: CrossRecordCheck,
    pub severity: Severity,
}

#[derive(Debug, Clone)]
pub enum CrossRecordCheck {
    /// All group members carrying a usable value must agree on it
    FieldAgreement { field: String, tolerance: Decimal },
    /// The sum of members' item amounts must equal the declared total
    SumMatchesTotal {
        item_field: String,
        total_field: String,
        tolerance: Decimal,
    },
}

/// Outcome of evaluating one rule against one record
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Pass,
    Fail { reason: String },
    /// An input was hard-failed or unavailable; skipping instead of
    /// failing keeps diagnostics free of cascading noise
    Skipped,
}

/// Validate one record against a schema: coerce every declared field,
/// apply field constraints, then evaluate cross-field rules.
pub fn validate(record: RawRecord, schema: &SchemaDefinition) -> ValidatedRecord {
    let mut typed: IndexMap<String, TypedValue> = IndexMap::with_capacity(schema.fields.len());
    let mut verdicts: Vec<Verdict> = Vec::new();

    for spec in &schema.fields {
        match record.fields.get(&spec.name) {
            None | Some(serde_json::Value::Null) => {
                if !spec.nullable {
                    verdicts.push(Verdict {
                        rule: format!("{}.required", spec.name),
                        field: Some(spec.name.clone()),
                        kind: FailureKind::MissingRequired,
                        severity: Severity::Hard,
                        reason: format!("required field '{}' is null or absent", spec.name),
                    });
                }
                typed.insert(spec.name.clone(), TypedValue::Null);
            }
            Some(raw) => match coerce::coerce(raw, spec.field_type) {
                Err(reason) => {
                    verdicts.push(Verdict {
                        rule: format!("{}.type", spec.name),
                        field: Some(spec.name.clone()),
                        kind: FailureKind::TypeMismatch,
                        severity: Severity::Hard,
                        reason,
                    });
                }
                Ok(value) => {
                    for constraint in &spec.constraints {
                        if let Err(reason) = check_constraint(&value, &constraint.constraint) {
                            verdicts.push(Verdict {
                                rule: constraint.name.clone(),
                                field: Some(spec.name.clone()),
                                kind: FailureKind::ConstraintViolation,
                                severity: constraint.severity,
                                reason,
                            });
                        }
                    }
                    typed.insert(spec.name.clone(), value);
                }
            },
        }
    }

    // Stray columns are flagged for visibility, never fatal
    for name in record.fields.keys() {
        if schema.field(name).is_none() {
            verdicts.push(Verdict {
                rule: format!("{}.unexpected", name),
                field: Some(name.clone()),
                kind: FailureKind::ConstraintViolation,
                severity: Severity::Soft,
                reason: format!(
                    "field '{}' is not declared in schema {} v{}",
                    name, schema.kind, schema.version
                ),
            });
        }
    }

    let mut validated = ValidatedRecord {
        record,
        typed,
        verdicts,
    };

    let mut cross_verdicts = Vec::new();
    for rule in &schema.cross_field_rules {
        match evaluate_cross_field(rule, &validated) {
            RuleOutcome::Pass => {}
            RuleOutcome::Skipped => {
                trace!(rule = %rule.name, record_id = %validated.record.record_id, "cross-field rule skipped");
            }
            RuleOutcome::Fail { reason } => {
                cross_verdicts.push(Verdict {
                    rule: rule.name.clone(),
                    field: None,
                    kind: FailureKind::ConstraintViolation,
                    severity: rule.severity,
                    reason: format!("{}: {}", rule.reason, reason),
                });
            }
        }
    }
    validated.verdicts.extend(cross_verdicts);
    validated
}

/// Check one compiled constraint against a coerced value. The error
/// string becomes the ConstraintViolation verdict reason.
pub fn check_constraint(value: &TypedValue, constraint: &Constraint) -> Result<(), String> {
    match constraint {
        Constraint::Range { min, max } => {
            let Some(number) = value.as_decimal() else {
                return Ok(());
            };
            if let Some(min) = min {
                if number < *min {
                    return Err(format!("{} is below the minimum {}", number, min));
                }
            }
            if let Some(max) = max {
                if number > *max {
                    return Err(format!("{} is above the maximum {}", number, max));
                }
            }
            Ok(())
        }
        Constraint::Enumeration { allowed } => match value {
            TypedValue::Text(s) => {
                if allowed.iter().any(|a| a == s) {
                    Ok(())
                } else {
                    Err(format!("'{}' is not one of {:?}", s, allowed))
                }
            }
            _ => Ok(()),
        },
        Constraint::Pattern { regex } => match value {
            TypedValue::Text(s) => {
                if regex.is_match(s) {
                    Ok(())
                } else {
                    Err(format!("'{}' does not match pattern '{}'", s, regex))
                }
            }
            _ => Ok(()),
        },
        Constraint::NonEmpty => match value {
            TypedValue::Text(s) => {
                if s.trim().is_empty() {
                    Err("value is empty".to_string())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        },
    }
}

/// Evaluate one cross-field rule. A rule whose input carries a hard
/// failure is skipped, not failed; a nullable input left null likewise
/// leaves the rule unevaluated.
pub fn evaluate_cross_field(rule: &CrossFieldRule, record: &ValidatedRecord) -> RuleOutcome {
    let hard_failed = record.hard_failed_fields();
    if rule.inputs.iter().any(|i| hard_failed.contains(i.as_str())) {
        return RuleOutcome::Skipped;
    }

    match &rule.predicate {
        CrossFieldPredicate::SumEquals {
            addends,
            total,
            tolerance,
        } => {
            let mut sum = Decimal::ZERO;
            for addend in addends {
                match record.usable_value(addend).and_then(TypedValue::as_decimal) {
                    Some(v) => sum += v,
                    None => return RuleOutcome::Skipped,
                }
            }
            let Some(declared) = record.usable_value(total).and_then(TypedValue::as_decimal)
            else {
                return RuleOutcome::Skipped;
            };
            if (sum - declared).abs() <= *tolerance {
                RuleOutcome::Pass
            } else {
                RuleOutcome::Fail {
                    reason: format!(
                        "sum of {} is {}, but {} is {}",
                        addends.join(" + "),
                        sum,
                        total,
                        declared
                    ),
                }
            }
        }
        CrossFieldPredicate::Equals { left, right } => {
            let (Some(l), Some(r)) = (record.usable_value(left), record.usable_value(right))
            else {
                return RuleOutcome::Skipped;
            };
            let equal = match (l.as_decimal(), r.as_decimal()) {
                (Some(a), Some(b)) => a == b,
                _ => l == r,
            };
            if equal {
                RuleOutcome::Pass
            } else {
                RuleOutcome::Fail {
                    reason: format!("{} ({:?}) differs from {} ({:?})", left, l, right, r),
                }
            }
        }
        CrossFieldPredicate::LessOrEqual { left, right } => {
            let (Some(l), Some(r)) = (
                record.usable_value(left).and_then(TypedValue::as_decimal),
                record.usable_value(right).and_then(TypedValue::as_decimal),
            ) else {
                return RuleOutcome::Skipped;
            };
            if l <= r {
                RuleOutcome::Pass
            } else {
                RuleOutcome::Fail {
                    reason: format!("{} ({}) exceeds {} ({})", left, l, right, r),
                }
            }
        }
        CrossFieldPredicate::RequiresPresent { when, then } => {
            if record.usable_value(when).is_some() && record.usable_value(then).is_none() {
                RuleOutcome::Fail {
                    reason: format!("'{}' is set but '{}' is missing", when, then),
                }
            } else {
                RuleOutcome::Pass
            }
        }
    }
}
