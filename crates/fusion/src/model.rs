use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FusionError;

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// Transaction attributes the engine knows how to normalize and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    Date,
    Amount,
    Description,
    Balance,
    Reference,
}

/// Comparison family for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Date,
    Amount,
    Text,
    /// Equality after whitespace trim.
    Exact,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 5] = [
        Self::Date,
        Self::Amount,
        Self::Description,
        Self::Balance,
        Self::Reference,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Amount => "amount",
            Self::Description => "description",
            Self::Balance => "balance",
            Self::Reference => "reference",
        }
    }

    pub fn kind(self) -> FieldKind {
        match self {
            Self::Date => FieldKind::Date,
            Self::Amount | Self::Balance => FieldKind::Amount,
            Self::Description => FieldKind::Text,
            Self::Reference => FieldKind::Exact,
        }
    }

    /// Case-insensitive lookup of a column / key name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.key().eq_ignore_ascii_case(name))
    }
}

impl std::fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// A raw canonical field value as an extractor reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Whitespace-only text counts as missing.
    pub fn is_populated(&self) -> bool {
        match self {
            Self::Text(s) => !s.trim().is_empty(),
            Self::Number(n) => n.is_finite(),
            Self::Bool(_) => true,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

// ---------------------------------------------------------------------------
// Transaction record
// ---------------------------------------------------------------------------

/// One extracted transaction. Canonical fields are typed slots; any other key
/// is carried verbatim in `extra`. Serializes as a single flat object.
///
/// Deserialization matches canonical keys in any case, like the CSV loader.
/// When two casings of the same field are present the lowercase key wins and
/// the other stays in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct Transaction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<FieldValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<FieldValue>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter, mostly for constructing records in code and tests.
    pub fn with(mut self, field: CanonicalField, value: impl Into<FieldValue>) -> Self {
        self.set(field, Some(value.into()));
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn get(&self, field: CanonicalField) -> Option<&FieldValue> {
        match field {
            CanonicalField::Date => self.date.as_ref(),
            CanonicalField::Amount => self.amount.as_ref(),
            CanonicalField::Description => self.description.as_ref(),
            CanonicalField::Balance => self.balance.as_ref(),
            CanonicalField::Reference => self.reference.as_ref(),
        }
    }

    pub fn set(&mut self, field: CanonicalField, value: Option<FieldValue>) {
        let slot = match field {
            CanonicalField::Date => &mut self.date,
            CanonicalField::Amount => &mut self.amount,
            CanonicalField::Description => &mut self.description,
            CanonicalField::Balance => &mut self.balance,
            CanonicalField::Reference => &mut self.reference,
        };
        *slot = value;
    }

    /// The field value if it is present and non-blank.
    pub fn populated(&self, field: CanonicalField) -> Option<&FieldValue> {
        self.get(field).filter(|v| v.is_populated())
    }

    pub fn populated_count(&self, fields: &[CanonicalField]) -> usize {
        fields.iter().filter(|f| self.populated(**f).is_some()).count()
    }

    /// No canonical field populated at all.
    pub fn is_degenerate(&self) -> bool {
        self.populated_count(&CanonicalField::ALL) == 0
    }

    /// Route one raw text cell: canonical names fill their slot, anything else
    /// goes to `extra`. Blank cells are skipped.
    pub fn insert_raw(&mut self, key: &str, raw: &str) {
        if raw.trim().is_empty() {
            return;
        }
        match CanonicalField::parse(key) {
            Some(field) => self.set(field, Some(FieldValue::Text(raw.to_string()))),
            None => {
                self.extra.insert(key.to_string(), Value::String(raw.to_string()));
            }
        }
    }
}

impl TryFrom<BTreeMap<String, Value>> for Transaction {
    type Error = FusionError;

    fn try_from(map: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut txn = Transaction::new();
        let mut folded: Vec<(CanonicalField, String, Value)> = Vec::new();

        for (key, value) in map {
            match CanonicalField::parse(&key) {
                Some(field) if key == field.key() => {
                    if !value.is_null() {
                        let value = serde_json::from_value(value)
                            .map_err(|e| FusionError::json(format!("field {key}: {e}")))?;
                        txn.set(field, Some(value));
                    }
                }
                Some(field) => folded.push((field, key, value)),
                None => {
                    txn.extra.insert(key, value);
                }
            }
        }

        for (field, key, value) in folded {
            if value.is_null() {
                continue;
            }
            if txn.get(field).is_some() {
                txn.extra.insert(key, value);
                continue;
            }
            let value = serde_json::from_value(value)
                .map_err(|e| FusionError::json(format!("field {key}: {e}")))?;
            txn.set(field, Some(value));
        }

        Ok(txn)
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Output of one upstream extraction method. Immutable once constructed.
///
/// `confidence` is clamped to [0, 1]; a negative or non-finite
/// `processing_time` becomes 0; non-finite quality metrics are dropped and the
/// rest clamped to [0, 1]. An empty method identifier or a non-finite
/// confidence is rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ExtractionResultData")]
pub struct ExtractionResult {
    method: String,
    transactions: Vec<Transaction>,
    confidence: f64,
    processing_time: f64,
    metadata: BTreeMap<String, Value>,
    quality_metrics: BTreeMap<String, f64>,
}

#[derive(Deserialize)]
struct ExtractionResultData {
    method: String,
    #[serde(default)]
    transactions: Vec<Transaction>,
    confidence: f64,
    #[serde(default)]
    processing_time: f64,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
    #[serde(default)]
    quality_metrics: BTreeMap<String, f64>,
}

impl TryFrom<ExtractionResultData> for ExtractionResult {
    type Error = FusionError;

    fn try_from(data: ExtractionResultData) -> Result<Self, Self::Error> {
        Ok(ExtractionResult::new(
            data.method,
            data.transactions,
            data.confidence,
            data.processing_time,
        )?
        .with_metadata(data.metadata)
        .with_quality_metrics(data.quality_metrics))
    }
}

impl ExtractionResult {
    pub fn new(
        method: impl Into<String>,
        transactions: Vec<Transaction>,
        confidence: f64,
        processing_time: f64,
    ) -> Result<Self, FusionError> {
        let method = method.into().trim().to_string();
        if method.is_empty() {
            return Err(FusionError::invalid("extraction method identifier must not be empty"));
        }
        if !confidence.is_finite() {
            return Err(FusionError::invalid(format!(
                "method '{method}': confidence must be a finite number, got {confidence}"
            )));
        }
        let processing_time = if processing_time.is_finite() {
            processing_time.max(0.0)
        } else {
            0.0
        };

        Ok(Self {
            method,
            transactions,
            confidence: confidence.clamp(0.0, 1.0),
            processing_time,
            metadata: BTreeMap::new(),
            quality_metrics: BTreeMap::new(),
        })
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_quality_metrics(mut self, metrics: BTreeMap<String, f64>) -> Self {
        self.quality_metrics = metrics
            .into_iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(k, v)| (k, v.clamp(0.0, 1.0)))
            .collect();
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn quality_metrics(&self) -> &BTreeMap<String, f64> {
        &self.quality_metrics
    }

    /// Mean of the quality metrics, `None` when there are none.
    pub fn quality_mean(&self) -> Option<f64> {
        if self.quality_metrics.is_empty() {
            return None;
        }
        let sum: f64 = self.quality_metrics.values().sum();
        Some(sum / self.quality_metrics.len() as f64)
    }
}

/// Construct a validated [`ExtractionResult`].
pub fn create_extraction_result(
    method: impl Into<String>,
    transactions: Vec<Transaction>,
    confidence: f64,
    processing_time: f64,
    metadata: Option<BTreeMap<String, Value>>,
    quality_metrics: Option<BTreeMap<String, f64>>,
) -> Result<ExtractionResult, FusionError> {
    Ok(
        ExtractionResult::new(method, transactions, confidence, processing_time)?
            .with_metadata(metadata.unwrap_or_default())
            .with_quality_metrics(quality_metrics.unwrap_or_default()),
    )
}

// ---------------------------------------------------------------------------
// Alignment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlignmentStrategy {
    SingleSource,
    Positional,
    Similarity,
}

impl std::fmt::Display for AlignmentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleSource => write!(f, "single_source"),
            Self::Positional => write!(f, "positional"),
            Self::Similarity => write!(f, "similarity"),
        }
    }
}

/// One method's record inside an aligned group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMember {
    pub method_index: usize,
    pub record_index: usize,
}

/// Records (at most one per method) believed to be the same real transaction.
/// `members` is ordered by method input order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedGroup {
    pub members: Vec<GroupMember>,
    pub missing_methods: Vec<String>,
}

impl AlignedGroup {
    pub fn record_for(&self, method_index: usize) -> Option<usize> {
        self.members
            .iter()
            .find(|m| m.method_index == method_index)
            .map(|m| m.record_index)
    }

    pub fn contributor_count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone)]
pub struct Alignment {
    pub strategy: AlignmentStrategy,
    pub groups: Vec<AlignedGroup>,
    pub discrepancies: Vec<String>,
    pub partial_groups: usize,
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    WeightedVoting,
    BestMethod,
    SingleSource,
}

impl std::fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WeightedVoting => write!(f, "weighted_voting"),
            Self::BestMethod => write!(f, "best_method"),
            Self::SingleSource => write!(f, "single_source"),
        }
    }
}

/// Audit record for one resolved field disagreement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictResolution {
    pub resolved_value: FieldValue,
    pub winning_method: String,
    pub confidence: f64,
    pub conflict_type: String,
    pub metadata: ConflictMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictMetadata {
    pub field: CanonicalField,
    pub group_index: usize,
    pub competing_values: BTreeMap<String, FieldValue>,
    pub normalized_values: BTreeMap<String, String>,
    pub method_confidences: BTreeMap<String, f64>,
}

/// A merged output record with its fusion provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedTransaction {
    #[serde(flatten)]
    pub record: Transaction,
    #[serde(rename = "_fusion_method")]
    pub fusion_method: FusionMethod,
    #[serde(rename = "_primary_method", skip_serializing_if = "Option::is_none")]
    pub primary_method: Option<String>,
    #[serde(rename = "_selected_method", skip_serializing_if = "Option::is_none")]
    pub selected_method: Option<String>,
    #[serde(rename = "_conflict_resolutions", skip_serializing_if = "Vec::is_empty")]
    pub conflict_resolutions: Vec<ConflictResolution>,
    /// Output key → method label that supplied it.
    #[serde(rename = "_field_sources")]
    pub field_sources: BTreeMap<String, String>,
    #[serde(rename = "_confidence")]
    pub confidence: f64,
}

impl MergedTransaction {
    /// Keys written by the provenance fields. Input passthrough keys with
    /// these names are dropped on merge.
    pub const PROVENANCE_KEYS: [&'static str; 6] = [
        "_fusion_method",
        "_primary_method",
        "_selected_method",
        "_conflict_resolutions",
        "_field_sources",
        "_confidence",
    ];

    pub fn is_provenance_key(key: &str) -> bool {
        Self::PROVENANCE_KEYS.contains(&key)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflict_resolutions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Assessment + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationDetails {
    pub alignment_strategy: AlignmentStrategy,
    pub group_count: usize,
    pub fully_agreed_groups: usize,
    pub field_checks: usize,
    pub conflicting_checks: usize,
    pub partial_groups: usize,
    pub transaction_counts: BTreeMap<String, usize>,
    pub conflicts_by_field: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrossValidationResult {
    pub consistency_score: f64,
    pub agreement_percentage: f64,
    pub discrepancies: Vec<String>,
    pub validation_details: ValidationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReliabilityIndicators {
    pub transaction_count: usize,
    pub methods_used: Vec<String>,
    pub processing_times: Vec<f64>,
    pub total_processing_time: f64,
    pub conflict_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityAssessment {
    pub overall_confidence: f64,
    pub method_scores: BTreeMap<String, f64>,
    pub field_confidence: BTreeMap<String, f64>,
    pub completeness_score: f64,
    pub consistency_score: f64,
    pub anomaly_score: f64,
    pub reliability_indicators: ReliabilityIndicators,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingSummary {
    pub input_methods: usize,
    pub final_transaction_count: usize,
    pub methods_used: Vec<String>,
    pub conflicts_resolved: usize,
    pub alignment_strategy: AlignmentStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedResult {
    pub transactions: Vec<MergedTransaction>,
    pub quality_assessment: QualityAssessment,
    pub cross_validation: CrossValidationResult,
    pub conflict_resolutions: Vec<ConflictResolution>,
    pub method_contributions: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
    pub processing_summary: ProcessingSummary,
}

impl CombinedResult {
    pub fn to_json_pretty(&self) -> Result<String, FusionError> {
        serde_json::to_string_pretty(self).map_err(FusionError::json)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
