//! Normalization of validated records into their canonical analytic
//! representation, plus exact-duplicate detection within an entity
//! group. Records carrying a hard failure are never touched; they pass
//! through unchanged into quarantine.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::domain::{FailureKind, Severity, TypedValue, ValidatedRecord, Verdict};
use crate::schema::{SchemaDefinition, Unit};

/// Canonicalize the typed values of one record in place: trimmed and
/// whitespace-collapsed text, uppercased currency codes, unit-driven
/// decimal scales (currency to 2 places, percent to 4, others with
/// trailing zeros stripped).
pub fn normalize(record: &mut ValidatedRecord, schema: &SchemaDefinition) {
    for spec in &schema.fields {
        let Some(value) = record.typed.get_mut(&spec.name) else {
            continue;
        };
        match value {
            TypedValue::Text(s) => {
                let collapsed = s.split_whitespace().collect::<Vec<_>>().join(" ");
                *s = if spec.unit == Some(Unit::CurrencyCode) {
                    collapsed.to_uppercase()
                } else {
                    collapsed
                };
            }
            TypedValue::Decimal(d) => {
                *d = match spec.unit {
                    Some(Unit::Currency) => rescaled(*d, 2),
                    Some(Unit::Percent) => rescaled(*d, 4),
                    _ => d.normalize(),
                };
            }
            _ => {}
        }
    }
}

/// Round to the unit's scale and pad back to exactly that scale, so
/// "10,0" and "10.00" share one canonical rendering
fn rescaled(value: rust_decimal::Decimal, scale: u32) -> rust_decimal::Decimal {
    let mut rounded = value.round_dp(scale);
    rounded.rescale(scale);
    rounded
}

/// Content fingerprint over the canonical field values, in schema field
/// order. Two records with identical canonical values share a
/// fingerprint.
pub fn fingerprint(record: &ValidatedRecord, schema: &SchemaDefinition) -> String {
    let mut hasher = Sha256::new();
    for spec in &schema.fields {
        if let Some(value) = record.typed.get(&spec.name) {
            hasher.update(spec.name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.to_json().to_string().as_bytes());
            hasher.update([0x1e]);
        }
    }
    hex::encode(hasher.finalize())
}

/// Mark exact duplicates within one entity group. Members arrive sorted
/// by (ingested_at, record_id), so the survivor is the earliest copy no
/// matter what order the batch delivered them in. Later copies receive a
/// soft Deduplicated verdict and are quarantined by the router rather
/// than silently dropped.
pub fn dedup_group(members: &mut [ValidatedRecord], schema: &SchemaDefinition) {
    let mut seen: HashMap<String, String> = HashMap::new();
    for member in members.iter_mut() {
        if member.has_hard_failure() {
            continue;
        }
        let fp = fingerprint(member, schema);
        if let Some(survivor) = seen.get(&fp).cloned() {
            member.verdicts.push(Verdict {
                rule: "deduplicate".to_string(),
                field: None,
                kind: FailureKind::Deduplicated,
                severity: Severity::Soft,
                reason: format!("exact duplicate of record '{}'", survivor),
            });
        } else {
            seen.insert(fp, member.record.record_id.clone());
        }
    }
}
