use std::collections::BTreeMap;

use crate::config::{FusionConfig, ScoringConfig};
use crate::model::{
    Alignment, CanonicalField, ConflictResolution, CrossValidationResult, ExtractionResult,
    MergedTransaction, QualityAssessment, ReliabilityIndicators, ValidationDetails,
};
use crate::resolve::{GroupStats, Resolution};

// ---------------------------------------------------------------------------
// Cross-validation
// ---------------------------------------------------------------------------

/// Agreement of each group weighted by how many methods found it, averaged
/// over groups. 1.0 for a single method or no groups.
pub fn consistency_score(group_stats: &[GroupStats], method_count: usize) -> f64 {
    if method_count <= 1 || group_stats.is_empty() {
        return 1.0;
    }
    let total: f64 = group_stats
        .iter()
        .map(|g| {
            let agreement = if g.checks == 0 {
                1.0
            } else {
                (g.checks - g.conflicts) as f64 / g.checks as f64
            };
            agreement * g.contributors as f64 / method_count as f64
        })
        .sum();
    (total / group_stats.len() as f64).clamp(0.0, 1.0)
}

pub fn cross_validate(
    results: &[ExtractionResult],
    labels: &[String],
    alignment: &Alignment,
    resolution: &Resolution,
) -> CrossValidationResult {
    let stats = &resolution.group_stats;
    let consistency = consistency_score(stats, results.len());

    let transaction_counts = labels
        .iter()
        .zip(results)
        .map(|(label, r)| (label.clone(), r.transactions().len()))
        .collect();

    let mut conflicts_by_field: BTreeMap<String, usize> = BTreeMap::new();
    for c in &resolution.conflicts {
        *conflicts_by_field.entry(c.metadata.field.key().to_string()).or_insert(0) += 1;
    }

    let details = ValidationDetails {
        alignment_strategy: alignment.strategy,
        group_count: stats.len(),
        fully_agreed_groups: stats
            .iter()
            .filter(|g| g.contributors == results.len() && g.conflicts == 0)
            .count(),
        field_checks: stats.iter().map(|g| g.checks).sum(),
        conflicting_checks: stats.iter().map(|g| g.conflicts).sum(),
        partial_groups: alignment.partial_groups,
        transaction_counts,
        conflicts_by_field,
    };

    CrossValidationResult {
        consistency_score: consistency,
        agreement_percentage: consistency * 100.0,
        discrepancies: alignment.discrepancies.clone(),
        validation_details: details,
    }
}

// ---------------------------------------------------------------------------
// Quality
// ---------------------------------------------------------------------------

/// Mean populated fraction of `fields` over the merged transactions.
pub fn completeness_score(transactions: &[MergedTransaction], fields: &[CanonicalField]) -> f64 {
    if transactions.is_empty() || fields.is_empty() {
        return 0.0;
    }
    let total: f64 = transactions
        .iter()
        .map(|t| t.record.populated_count(fields) as f64 / fields.len() as f64)
        .sum();
    total / transactions.len() as f64
}

/// Self-reported confidence blended with the mean quality metric.
pub fn method_scores(
    results: &[ExtractionResult],
    labels: &[String],
    scoring: &ScoringConfig,
) -> BTreeMap<String, f64> {
    labels
        .iter()
        .zip(results)
        .map(|(label, r)| {
            let score = match r.quality_mean() {
                Some(quality) => {
                    let (wc, wq) = (scoring.confidence_weight, scoring.quality_metrics_weight);
                    (wc * r.confidence() + wq * quality) / (wc + wq)
                }
                None => r.confidence(),
            };
            (label.clone(), score.clamp(0.0, 1.0))
        })
        .collect()
}

/// Mean provider confidence per field across groups, penalized for any field
/// that needed resolution somewhere.
pub fn field_confidence(group_stats: &[GroupStats], conflict_penalty: f64) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<CanonicalField, (f64, usize, bool)> = BTreeMap::new();
    for stat in group_stats.iter().flat_map(|g| &g.fields) {
        let entry = sums.entry(stat.field).or_insert((0.0, 0, false));
        entry.0 += stat.mean_confidence;
        entry.1 += 1;
        entry.2 |= stat.conflicted;
    }

    sums.into_iter()
        .map(|(field, (sum, n, conflicted))| {
            let mean = sum / n as f64;
            let score = if conflicted { mean * conflict_penalty } else { mean };
            (field.key().to_string(), score)
        })
        .collect()
}

/// Fraction of transactions that needed conflict resolution or whose
/// confidence is a low outlier.
pub fn anomaly_score(transactions: &[MergedTransaction], outlier_sigma: f64) -> f64 {
    let n = transactions.len();
    if n == 0 {
        return 0.0;
    }

    let mut cutoff = None;
    if n >= 3 {
        let mean = transactions.iter().map(|t| t.confidence).sum::<f64>() / n as f64;
        let variance = transactions
            .iter()
            .map(|t| (t.confidence - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let sigma = variance.sqrt();
        if sigma > 0.0 {
            cutoff = Some(mean - outlier_sigma * sigma);
        }
    }

    let flagged = transactions
        .iter()
        .filter(|t| t.has_conflicts() || cutoff.is_some_and(|c| t.confidence < c))
        .count();
    flagged as f64 / n as f64
}

pub fn overall_confidence(
    method_scores: &BTreeMap<String, f64>,
    completeness: f64,
    consistency: f64,
    scoring: &ScoringConfig,
) -> f64 {
    let mean_score = if method_scores.is_empty() {
        0.0
    } else {
        method_scores.values().sum::<f64>() / method_scores.len() as f64
    };
    let (wm, wc, ws) = (
        scoring.method_score_weight,
        scoring.completeness_weight,
        scoring.consistency_weight,
    );
    ((wm * mean_score + wc * completeness + ws * consistency) / (wm + wc + ws)).clamp(0.0, 1.0)
}

pub fn reliability_indicators(
    results: &[ExtractionResult],
    transactions: &[MergedTransaction],
    conflicts: &[ConflictResolution],
) -> ReliabilityIndicators {
    let processing_times: Vec<f64> = results.iter().map(|r| r.processing_time()).collect();
    ReliabilityIndicators {
        transaction_count: transactions.len(),
        methods_used: results.iter().map(|r| r.method().to_string()).collect(),
        total_processing_time: processing_times.iter().sum(),
        processing_times,
        conflict_count: conflicts.len(),
    }
}

pub fn assess_quality(
    results: &[ExtractionResult],
    labels: &[String],
    resolution: &Resolution,
    consistency: f64,
    config: &FusionConfig,
) -> QualityAssessment {
    let scoring = &config.scoring;
    let transactions = &resolution.transactions;

    let method_scores = method_scores(results, labels, scoring);
    let completeness = completeness_score(transactions, &config.completeness_fields);

    QualityAssessment {
        overall_confidence: overall_confidence(&method_scores, completeness, consistency, scoring),
        field_confidence: field_confidence(&resolution.group_stats, scoring.conflict_penalty),
        method_scores,
        completeness_score: completeness,
        consistency_score: consistency,
        anomaly_score: anomaly_score(transactions, scoring.outlier_sigma),
        reliability_indicators: reliability_indicators(results, transactions, &resolution.conflicts),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
