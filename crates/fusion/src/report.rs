use std::collections::{BTreeMap, BTreeSet};

use crate::config::RecommendationConfig;
use crate::model::{ConflictResolution, CrossValidationResult, MergedTransaction, QualityAssessment};

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// Percentage of merged-field attributions per method, summing to 100.
///
/// Shares are rounded to cents of a percent; the rounding remainder goes to
/// the largest share (first label on ties). With no attributions at all the
/// split is equal.
pub fn method_contributions(
    transactions: &[MergedTransaction],
    labels: &[String],
) -> BTreeMap<String, f64> {
    if labels.is_empty() {
        return BTreeMap::new();
    }

    let mut counts = vec![0usize; labels.len()];
    for source in transactions.iter().flat_map(|t| t.field_sources.values()) {
        if let Some(i) = labels.iter().position(|l| l == source) {
            counts[i] += 1;
        }
    }

    let total: usize = counts.iter().sum();
    if total == 0 {
        counts = vec![1; labels.len()];
    }
    let total: usize = counts.iter().sum();

    // Work in hundredths of a percent so the total is exact.
    let mut cents: Vec<i64> = counts
        .iter()
        .map(|c| (10_000.0 * *c as f64 / total as f64).round() as i64)
        .collect();
    let remainder = 10_000 - cents.iter().sum::<i64>();
    let mut largest = 0;
    for (i, c) in cents.iter().enumerate() {
        if *c > cents[largest] {
            largest = i;
        }
    }
    cents[largest] += remainder;

    labels
        .iter()
        .zip(cents)
        .map(|(label, c)| (label.clone(), c as f64 / 100.0))
        .collect()
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

/// Human-readable guidance. Each rule contributes at most one line, always in
/// the same order.
pub fn recommendations(
    quality: &QualityAssessment,
    cross_validation: &CrossValidationResult,
    conflicts: &[ConflictResolution],
    thresholds: &RecommendationConfig,
) -> Vec<String> {
    let mut out = Vec::new();

    if quality.overall_confidence < thresholds.low_confidence_below {
        out.push(format!(
            "LOW CONFIDENCE: overall confidence {:.2} is below {:.2}; review the extracted transactions manually",
            quality.overall_confidence, thresholds.low_confidence_below
        ));
    }

    if quality.completeness_score < thresholds.incomplete_below {
        out.push(format!(
            "INCOMPLETE: only {:.0}% of expected fields are populated; consider running an additional extraction method",
            quality.completeness_score * 100.0
        ));
    }

    let discrepancies = cross_validation.discrepancies.len();
    if cross_validation.consistency_score < thresholds.inconsistent_below || discrepancies > 0 {
        out.push(format!(
            "CONSISTENCY: methods agree on {:.1}% with {} discrepancies; verify against the source statement",
            cross_validation.agreement_percentage, discrepancies
        ));
    }

    if quality.anomaly_score > thresholds.anomalies_above {
        out.push(format!(
            "ANOMALIES: {:.0}% of transactions are flagged as unusual; inspect them before import",
            quality.anomaly_score * 100.0
        ));
    }

    if !conflicts.is_empty() {
        let fields: BTreeSet<&str> = conflicts.iter().map(|c| c.metadata.field.key()).collect();
        out.push(format!(
            "CONFLICT: {} field conflicts resolved by method confidence ({}); check the resolved values",
            conflicts.len(),
            fields.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    if out.is_empty() {
        out.push("GOOD QUALITY: extraction methods agree and results look complete".to_string());
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
