use std::path::Path;

use serde::Deserialize;

use crate::error::FusionError;
use crate::model::CanonicalField;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Engine configuration. Every section is optional in TOML; missing keys take
/// the documented defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FusionConfig {
    /// Fields counted by `completeness_score`.
    pub completeness_fields: Vec<CanonicalField>,
    pub tolerance: ToleranceConfig,
    pub alignment: AlignmentConfig,
    pub scoring: ScoringConfig,
    pub recommendations: RecommendationConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            completeness_fields: CanonicalField::ALL.to_vec(),
            tolerance: ToleranceConfig::default(),
            alignment: AlignmentConfig::default(),
            scoring: ScoringConfig::default(),
            recommendations: RecommendationConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

/// Field comparison tolerances.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToleranceConfig {
    /// Minimum absolute amount difference treated as equal (currency units).
    pub amount_absolute: f64,
    /// Relative amount tolerance, applied to the larger magnitude.
    pub amount_relative: f64,
    /// Text similarity must be strictly above this to compare equal.
    pub text_similarity: f64,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            amount_absolute: 0.01,
            amount_relative: 0.005,
            text_similarity: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

/// Weights for similarity-based alignment when result counts differ.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlignmentConfig {
    pub date_weight: f64,
    pub amount_weight: f64,
    pub description_weight: f64,
    /// Pairs scoring below this stay unmatched.
    pub min_similarity: f64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            date_weight: 0.4,
            amount_weight: 0.4,
            description_weight: 0.2,
            min_similarity: 0.6,
        }
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Multiplier applied to confidence wherever a conflict was resolved.
    pub conflict_penalty: f64,
    /// `method_scores` blend: self-reported confidence.
    pub confidence_weight: f64,
    /// `method_scores` blend: mean of quality metrics.
    pub quality_metrics_weight: f64,
    /// `overall_confidence` blend: mean method score.
    pub method_score_weight: f64,
    /// `overall_confidence` blend: completeness.
    pub completeness_weight: f64,
    /// `overall_confidence` blend: consistency.
    pub consistency_weight: f64,
    /// Transactions whose confidence falls this many standard deviations
    /// below the mean count as anomalous.
    pub outlier_sigma: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            conflict_penalty: 0.8,
            confidence_weight: 0.6,
            quality_metrics_weight: 0.4,
            method_score_weight: 0.4,
            completeness_weight: 0.3,
            consistency_weight: 0.3,
            outlier_sigma: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Recommendations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecommendationConfig {
    pub low_confidence_below: f64,
    pub incomplete_below: f64,
    pub inconsistent_below: f64,
    pub anomalies_above: f64,
}

impl Default for RecommendationConfig {
    fn default() -> Self {
        Self {
            low_confidence_below: 0.5,
            incomplete_below: 0.7,
            inconsistent_below: 0.7,
            anomalies_above: 0.2,
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl FusionConfig {
    pub fn from_toml(input: &str) -> Result<Self, FusionError> {
        let config: FusionConfig =
            toml::from_str(input).map_err(|e| FusionError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, FusionError> {
        let input = std::fs::read_to_string(path)
            .map_err(|e| FusionError::Io(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> Result<(), FusionError> {
        if self.completeness_fields.is_empty() {
            return Err(FusionError::ConfigValidation(
                "completeness_fields must name at least one field".into(),
            ));
        }

        let t = &self.tolerance;
        non_negative("tolerance.amount_absolute", t.amount_absolute)?;
        non_negative("tolerance.amount_relative", t.amount_relative)?;
        unit_interval("tolerance.text_similarity", t.text_similarity)?;

        let a = &self.alignment;
        weight_set(
            "alignment",
            &[
                ("date_weight", a.date_weight),
                ("amount_weight", a.amount_weight),
                ("description_weight", a.description_weight),
            ],
        )?;
        unit_interval("alignment.min_similarity", a.min_similarity)?;

        let s = &self.scoring;
        unit_interval("scoring.conflict_penalty", s.conflict_penalty)?;
        weight_set(
            "scoring",
            &[
                ("confidence_weight", s.confidence_weight),
                ("quality_metrics_weight", s.quality_metrics_weight),
            ],
        )?;
        weight_set(
            "scoring",
            &[
                ("method_score_weight", s.method_score_weight),
                ("completeness_weight", s.completeness_weight),
                ("consistency_weight", s.consistency_weight),
            ],
        )?;
        if !(s.outlier_sigma.is_finite() && s.outlier_sigma > 0.0) {
            return Err(FusionError::ConfigValidation(format!(
                "scoring.outlier_sigma must be positive, got {}",
                s.outlier_sigma
            )));
        }

        let r = &self.recommendations;
        unit_interval("recommendations.low_confidence_below", r.low_confidence_below)?;
        unit_interval("recommendations.incomplete_below", r.incomplete_below)?;
        unit_interval("recommendations.inconsistent_below", r.inconsistent_below)?;
        unit_interval("recommendations.anomalies_above", r.anomalies_above)?;

        Ok(())
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), FusionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FusionError::ConfigValidation(format!(
            "{name} must be a non-negative number, got {value}"
        )))
    }
}

fn unit_interval(name: &str, value: f64) -> Result<(), FusionError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(FusionError::ConfigValidation(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

fn weight_set(section: &str, weights: &[(&str, f64)]) -> Result<(), FusionError> {
    for (name, w) in weights {
        non_negative(&format!("{section}.{name}"), *w)?;
    }
    let total: f64 = weights.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        let names: Vec<&str> = weights.iter().map(|(n, _)| *n).collect();
        return Err(FusionError::ConfigValidation(format!(
            "{section}: {} must not all be zero",
            names.join(", ")
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
