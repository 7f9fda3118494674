//! Field-level conflict detection and resolution over aligned groups.

use std::collections::BTreeMap;

use crate::config::{FusionConfig, ToleranceConfig};
use crate::model::{
    AlignedGroup, Alignment, CanonicalField, ConflictMetadata, ConflictResolution,
    ExtractionResult, FieldValue, FusionMethod, GroupMember, MergedTransaction, Transaction,
};
use crate::normalize::{compare, normalized_display};

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

/// One method's value for a field, in precedence order within a group.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub label: &'a str,
    pub confidence: f64,
    pub value: &'a FieldValue,
}

/// Per-field bookkeeping for one group, consumed by the assessor.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldStat {
    pub field: CanonicalField,
    /// Mean self-reported confidence of those methods.
    pub mean_confidence: f64,
    pub conflicted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub contributors: usize,
    /// Fields with values from two or more methods.
    pub checks: usize,
    pub conflicts: usize,
    pub fields: Vec<FieldStat>,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    /// One merged record per aligned group, in group order.
    pub transactions: Vec<MergedTransaction>,
    /// Every conflict resolved, in group then field order.
    pub conflicts: Vec<ConflictResolution>,
    pub group_stats: Vec<GroupStats>,
}

// ---------------------------------------------------------------------------
// Detection + Resolution
// ---------------------------------------------------------------------------

/// True if any pair of values fails the field's comparison predicate.
pub fn detect_conflict(
    field: CanonicalField,
    values: &[&FieldValue],
    tolerance: &ToleranceConfig,
) -> bool {
    let kind = field.kind();
    values.iter().enumerate().any(|(i, a)| {
        values[i + 1..]
            .iter()
            .any(|b| !compare(a, b, kind, tolerance))
    })
}

/// Pick the value of the first candidate. `candidates` must be non-empty and
/// in precedence order (confidence descending, then input order).
pub fn resolve(
    field: CanonicalField,
    group_index: usize,
    candidates: &[Candidate<'_>],
    conflict_penalty: f64,
) -> Option<ConflictResolution> {
    let winner = candidates.first()?;
    let kind = field.kind();

    let mut competing_values = BTreeMap::new();
    let mut normalized_values = BTreeMap::new();
    let mut method_confidences = BTreeMap::new();
    for c in candidates {
        competing_values.insert(c.label.to_string(), c.value.clone());
        normalized_values.insert(c.label.to_string(), normalized_display(c.value, kind));
        method_confidences.insert(c.label.to_string(), c.confidence);
    }

    Some(ConflictResolution {
        resolved_value: winner.value.clone(),
        winning_method: winner.label.to_string(),
        confidence: winner.confidence * conflict_penalty,
        conflict_type: format!("{field}_conflict"),
        metadata: ConflictMetadata {
            field,
            group_index,
            competing_values,
            normalized_values,
            method_confidences,
        },
    })
}

// ---------------------------------------------------------------------------
// Group merge
// ---------------------------------------------------------------------------

/// Merge every aligned group into one output record.
pub fn resolve_groups(
    results: &[ExtractionResult],
    labels: &[String],
    alignment: &Alignment,
    config: &FusionConfig,
) -> Resolution {
    let mut transactions = Vec::with_capacity(alignment.groups.len());
    let mut conflicts = Vec::new();
    let mut group_stats = Vec::with_capacity(alignment.groups.len());

    for (group_index, group) in alignment.groups.iter().enumerate() {
        let (merged, stats) = merge_group(results, labels, group_index, group, config);
        conflicts.extend(merged.conflict_resolutions.iter().cloned());
        transactions.push(merged);
        group_stats.push(stats);
    }

    Resolution {
        transactions,
        conflicts,
        group_stats,
    }
}

/// Members sorted by confidence descending, ties kept in input order.
fn precedence(results: &[ExtractionResult], group: &AlignedGroup) -> Vec<GroupMember> {
    let mut members = group.members.clone();
    members.sort_by(|a, b| {
        let ca = results[a.method_index].confidence();
        let cb = results[b.method_index].confidence();
        cb.total_cmp(&ca).then(a.method_index.cmp(&b.method_index))
    });
    members
}

fn merge_group(
    results: &[ExtractionResult],
    labels: &[String],
    group_index: usize,
    group: &AlignedGroup,
    config: &FusionConfig,
) -> (MergedTransaction, GroupStats) {
    let ordered = precedence(results, group);
    let record = |m: GroupMember| &results[m.method_index].transactions()[m.record_index];
    let penalty = config.scoring.conflict_penalty;

    let mut merged = Transaction::new();
    let mut field_sources = BTreeMap::new();
    let mut resolutions = Vec::new();
    let mut field_confidences = Vec::new();
    let mut stats = GroupStats {
        contributors: ordered.len(),
        checks: 0,
        conflicts: 0,
        fields: Vec::new(),
    };

    for field in CanonicalField::ALL {
        let candidates: Vec<Candidate<'_>> = ordered
            .iter()
            .filter_map(|m| {
                record(*m).populated(field).map(|value| Candidate {
                    label: labels[m.method_index].as_str(),
                    confidence: results[m.method_index].confidence(),
                    value,
                })
            })
            .collect();

        let Some(top) = candidates.first().copied() else {
            continue;
        };

        let mean_confidence =
            candidates.iter().map(|c| c.confidence).sum::<f64>() / candidates.len() as f64;
        let mut conflicted = false;

        if candidates.len() >= 2 {
            stats.checks += 1;
            let values: Vec<&FieldValue> = candidates.iter().map(|c| c.value).collect();
            if detect_conflict(field, &values, &config.tolerance) {
                conflicted = true;
                stats.conflicts += 1;
            }
        }

        if conflicted {
            if let Some(resolution) = resolve(field, group_index, &candidates, penalty) {
                field_confidences.push(resolution.confidence);
                resolutions.push(resolution);
            }
        } else {
            field_confidences.push(top.confidence);
        }

        merged.set(field, Some(top.value.clone()));
        field_sources.insert(field.key().to_string(), top.label.to_string());
        stats.fields.push(FieldStat {
            field,
            mean_confidence,
            conflicted,
        });
    }

    // Passthrough keys: highest-precedence carrier wins.
    for m in &ordered {
        for (key, value) in &record(*m).extra {
            if MergedTransaction::is_provenance_key(key) {
                continue;
            }
            if !merged.extra.contains_key(key) {
                merged.extra.insert(key.clone(), value.clone());
                field_sources.insert(key.clone(), labels[m.method_index].clone());
            }
        }
    }

    let confidence = if field_confidences.is_empty() {
        0.0
    } else {
        field_confidences.iter().sum::<f64>() / field_confidences.len() as f64
    };

    let primary = ordered.first().map(|m| labels[m.method_index].clone());

    let (fusion_method, primary_method, selected_method) = if ordered.len() <= 1 {
        (FusionMethod::SingleSource, primary, None)
    } else if let Some(first) = resolutions.first() {
        // Winners are always the top candidate for their field, so the
        // earliest in precedence order is the overall selection.
        let selected = ordered
            .iter()
            .map(|m| labels[m.method_index].as_str())
            .find(|label| resolutions.iter().any(|r| r.winning_method == *label))
            .unwrap_or(first.winning_method.as_str())
            .to_string();
        (FusionMethod::BestMethod, None, Some(selected))
    } else {
        (FusionMethod::WeightedVoting, primary, None)
    };

    // A lone record passes through untouched, blank cells included.
    if let [only] = ordered.as_slice() {
        merged = record(*only).clone();
        merged.extra.retain(|key, _| !MergedTransaction::is_provenance_key(key));
    }

    let txn = MergedTransaction {
        record: merged,
        fusion_method,
        primary_method,
        selected_method,
        conflict_resolutions: resolutions,
        field_sources,
        confidence,
    };
    (txn, stats)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::align;
    use serde_json::json;

    fn txn(date: &str, amount: &str, desc: &str) -> Transaction {
        Transaction::new()
            .with(CanonicalField::Date, date)
            .with(CanonicalField::Amount, amount)
            .with(CanonicalField::Description, desc)
    }

    fn run(results: &[ExtractionResult]) -> Resolution {
        let config = FusionConfig::default();
        let labels: Vec<String> = results.iter().map(|r| r.method().to_string()).collect();
        let alignment = align(results, &labels, &config);
        resolve_groups(results, &labels, &alignment, &config)
    }

    #[test]
    fn detect_conflict_uses_field_kind() {
        let tol = ToleranceConfig::default();
        let a = FieldValue::from("100.50");
        let b = FieldValue::from("$100.50");
        let c = FieldValue::from("101.50");
        assert!(!detect_conflict(CanonicalField::Amount, &[&a, &b], &tol));
        assert!(detect_conflict(CanonicalField::Amount, &[&a, &b, &c], &tol));

        let d1 = FieldValue::from("2024-01-15");
        let d2 = FieldValue::from("15/01/2024");
        assert!(!detect_conflict(CanonicalField::Date, &[&d1, &d2], &tol));
    }

    #[test]
    fn resolve_picks_first_candidate_and_penalizes() {
        let high = FieldValue::from("100.50");
        let low = FieldValue::from("105.00");
        let candidates = [
            Candidate { label: "a", confidence: 0.85, value: &high },
            Candidate { label: "b", confidence: 0.70, value: &low },
        ];
        let r = resolve(CanonicalField::Amount, 4, &candidates, 0.8).unwrap();
        assert_eq!(r.winning_method, "a");
        assert_eq!(r.resolved_value, high);
        assert!((r.confidence - 0.68).abs() < 1e-9);
        assert_eq!(r.conflict_type, "amount_conflict");
        assert_eq!(r.metadata.group_index, 4);
        assert_eq!(r.metadata.normalized_values["b"], "105.00");
        assert_eq!(r.metadata.competing_values.len(), 2);

        assert!(resolve(CanonicalField::Amount, 0, &[], 0.8).is_none());
    }

    #[test]
    fn agreeing_methods_use_weighted_voting() {
        let results = vec![
            ExtractionResult::new("camelot", vec![txn("15/01/2024", "100.50", "PAYMENT TO STORE")], 0.7, 1.0)
                .unwrap(),
            ExtractionResult::new("pdfplumber", vec![txn("2024-01-15", "100.50", "Payment to store")], 0.9, 1.0)
                .unwrap(),
        ];
        let out = run(&results);
        let t = &out.transactions[0];
        assert_eq!(t.fusion_method, FusionMethod::WeightedVoting);
        assert_eq!(t.primary_method.as_deref(), Some("pdfplumber"));
        assert_eq!(t.record.date, Some(FieldValue::from("2024-01-15")));
        assert_eq!(t.field_sources["amount"], "pdfplumber");
        assert!(out.conflicts.is_empty());
        assert_eq!(out.group_stats[0].checks, 3);
        assert_eq!(out.group_stats[0].conflicts, 0);
        assert!((t.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn conflict_goes_to_higher_confidence() {
        let results = vec![
            ExtractionResult::new("b", vec![txn("15/01/2024", "105.00", "SHOP")], 0.70, 1.0).unwrap(),
            ExtractionResult::new("a", vec![txn("15/01/2024", "100.50", "SHOP")], 0.85, 1.0).unwrap(),
        ];
        let out = run(&results);
        let t = &out.transactions[0];
        assert_eq!(t.fusion_method, FusionMethod::BestMethod);
        assert_eq!(t.selected_method.as_deref(), Some("a"));
        assert_eq!(t.primary_method, None);
        assert_eq!(t.record.amount, Some(FieldValue::from("100.50")));
        assert_eq!(out.conflicts.len(), 1);
        assert_eq!(out.conflicts[0].metadata.field, CanonicalField::Amount);
        assert_eq!(out.group_stats[0].conflicts, 1);
        // date 0.85, amount 0.85*0.8, description 0.85
        assert!((t.confidence - (0.85 + 0.68 + 0.85) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn equal_confidence_ties_break_by_input_order() {
        let results = vec![
            ExtractionResult::new("first", vec![txn("15/01/2024", "1.00", "X")], 0.8, 1.0).unwrap(),
            ExtractionResult::new("second", vec![txn("15/01/2024", "9.00", "X")], 0.8, 1.0).unwrap(),
        ];
        let out = run(&results);
        assert_eq!(out.conflicts[0].winning_method, "first");
    }

    #[test]
    fn single_contributor_fields_carry_through() {
        let a = Transaction::new()
            .with(CanonicalField::Date, "15/01/2024")
            .with(CanonicalField::Amount, 10.0)
            .with_extra("category", json!("food"));
        let b = Transaction::new()
            .with(CanonicalField::Date, "15/01/2024")
            .with(CanonicalField::Amount, 10.0)
            .with(CanonicalField::Balance, "250.00")
            .with_extra("category", json!("groceries"))
            .with_extra("page", json!(2));
        let results = vec![
            ExtractionResult::new("hi", vec![a], 0.9, 1.0).unwrap(),
            ExtractionResult::new("lo", vec![b], 0.5, 1.0).unwrap(),
        ];
        let out = run(&results);
        let t = &out.transactions[0];
        assert_eq!(t.record.balance, Some(FieldValue::from("250.00")));
        assert_eq!(t.field_sources["balance"], "lo");
        assert_eq!(t.record.extra["category"], json!("food"));
        assert_eq!(t.field_sources["category"], "hi");
        assert_eq!(t.field_sources["page"], "lo");
        assert_eq!(out.group_stats[0].checks, 2);
    }

    #[test]
    fn singleton_groups_are_single_source() {
        let results = vec![
            ExtractionResult::new(
                "a",
                vec![txn("15/01/2024", "1.00", "X"), txn("16/01/2024", "2.00", "Y")],
                0.8,
                1.0,
            )
            .unwrap(),
            ExtractionResult::new("b", vec![txn("16/01/2024", "2.00", "Y")], 0.6, 1.0).unwrap(),
        ];
        let out = run(&results);
        assert_eq!(out.transactions[0].fusion_method, FusionMethod::SingleSource);
        assert_eq!(out.transactions[0].primary_method.as_deref(), Some("a"));
        assert_eq!(out.transactions[1].fusion_method, FusionMethod::WeightedVoting);
    }

    #[test]
    fn provenance_keys_in_input_are_dropped() {
        let carry = |t: Transaction| {
            t.with_extra("_fusion_method", json!("x"))
                .with_extra("_confidence", json!(0.1))
                .with_extra("page", json!(1))
        };
        let results = vec![
            ExtractionResult::new("a", vec![carry(txn("15/01/2024", "10.00", "RENT"))], 0.9, 1.0).unwrap(),
            ExtractionResult::new("b", vec![carry(txn("15/01/2024", "10.00", "RENT"))], 0.6, 1.0).unwrap(),
        ];
        let out = run(&results);
        let t = &out.transactions[0];
        assert!(!t.record.extra.contains_key("_fusion_method"));
        assert!(!t.field_sources.contains_key("_fusion_method"));
        assert_eq!(t.field_sources["page"], "a");

        let text = serde_json::to_string(t).unwrap();
        for key in MergedTransaction::PROVENANCE_KEYS {
            let quoted = format!("\"{key}\":");
            assert!(text.matches(&quoted).count() <= 1, "{key} repeated in {text}");
        }
        assert_eq!(text.matches("\"_fusion_method\":").count(), 1);
        assert_eq!(text.matches("\"_confidence\":").count(), 1);
    }

    #[test]
    fn lone_record_drops_provenance_keys() {
        let record = txn("15/01/2024", "10.00", "RENT")
            .with_extra("_field_sources", json!({"amount": "old"}))
            .with_extra("memo", json!("kept"));
        let results = vec![ExtractionResult::new("a", vec![record], 0.9, 1.0).unwrap()];
        let out = run(&results);
        let t = &out.transactions[0];
        assert_eq!(t.fusion_method, FusionMethod::SingleSource);
        assert!(!t.record.extra.contains_key("_field_sources"));
        assert_eq!(t.record.extra["memo"], json!("kept"));

        let text = serde_json::to_string(t).unwrap();
        assert_eq!(text.matches("\"_field_sources\":").count(), 1);
    }

    #[test]
    fn degenerate_record_has_zero_confidence() {
        let results = vec![ExtractionResult::new("a", vec![Transaction::new()], 0.8, 1.0).unwrap()];
        let out = run(&results);
        assert_eq!(out.transactions[0].confidence, 0.0);
        assert!(out.transactions[0].field_sources.is_empty());
    }
}
