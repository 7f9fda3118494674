use std::collections::BTreeSet;

use crate::align::align;
use crate::assess::{assess_quality, cross_validate};
use crate::config::FusionConfig;
use crate::error::FusionError;
use crate::model::{CombinedResult, ExtractionResult, ProcessingSummary, Transaction};
use crate::observer::{FusionEvent, FusionObserver, LogObserver, NoopObserver};
use crate::report::{method_contributions, recommendations};
use crate::resolve::resolve_groups;

/// Combine extraction results per config, reporting progress to `observer`.
///
/// A single result is passed through as `single_source`: alignment produces
/// one group per record without comparing anything and no conflicts can
/// arise, so consistency is 1.0.
pub fn run(
    config: &FusionConfig,
    results: &[ExtractionResult],
    observer: &mut dyn FusionObserver,
) -> Result<CombinedResult, FusionError> {
    if results.is_empty() {
        return Err(FusionError::invalid("at least one extraction result is required"));
    }
    config.validate()?;

    let labels = method_labels(results);
    let counts: Vec<usize> = results.iter().map(|r| r.transactions().len()).collect();
    observer.on_event(FusionEvent::Started {
        methods: &labels,
        transaction_counts: &counts,
    });

    let alignment = align(results, &labels, config);
    observer.on_event(FusionEvent::Aligned {
        strategy: alignment.strategy,
        groups: alignment.groups.len(),
        partial_groups: alignment.partial_groups,
    });
    for message in &alignment.discrepancies {
        observer.on_event(FusionEvent::Discrepancy { message });
    }

    let resolution = resolve_groups(results, &labels, &alignment, config);
    for conflict in &resolution.conflicts {
        observer.on_event(FusionEvent::ConflictResolved {
            resolution: conflict,
        });
    }

    let cross_validation = cross_validate(results, &labels, &alignment, &resolution);
    let quality_assessment = assess_quality(
        results,
        &labels,
        &resolution,
        cross_validation.consistency_score,
        config,
    );
    observer.on_event(FusionEvent::Assessed {
        quality: &quality_assessment,
        agreement_percentage: cross_validation.agreement_percentage,
    });

    let method_contributions = method_contributions(&resolution.transactions, &labels);
    let recommendations = recommendations(
        &quality_assessment,
        &cross_validation,
        &resolution.conflicts,
        &config.recommendations,
    );

    let processing_summary = ProcessingSummary {
        input_methods: results.len(),
        final_transaction_count: resolution.transactions.len(),
        methods_used: results.iter().map(|r| r.method().to_string()).collect(),
        conflicts_resolved: resolution.conflicts.len(),
        alignment_strategy: alignment.strategy,
    };

    observer.on_event(FusionEvent::Finished {
        transactions: resolution.transactions.len(),
        conflicts: resolution.conflicts.len(),
    });

    Ok(CombinedResult {
        transactions: resolution.transactions,
        quality_assessment,
        cross_validation,
        conflict_resolutions: resolution.conflicts,
        method_contributions,
        recommendations,
        processing_summary,
    })
}

/// Combine with the default configuration and no diagnostics.
pub fn combine_results(results: &[ExtractionResult]) -> Result<CombinedResult, FusionError> {
    run(&FusionConfig::default(), results, &mut NoopObserver)
}

/// Same contract as [`combine_results`]; `debug` routes diagnostics to the
/// `log` facade.
pub fn combine_extraction_results(
    results: &[ExtractionResult],
    debug: bool,
) -> Result<CombinedResult, FusionError> {
    let config = FusionConfig::default();
    if debug {
        run(&config, results, &mut LogObserver)
    } else {
        run(&config, results, &mut NoopObserver)
    }
}

/// Unique per-result labels. A method name already issued gets the first
/// free `#n` suffix, `n` starting at 2.
pub fn method_labels(results: &[ExtractionResult]) -> Vec<String> {
    let mut issued: BTreeSet<String> = BTreeSet::new();
    results
        .iter()
        .map(|r| {
            let base = r.method();
            let mut label = base.to_string();
            let mut n = 1;
            while issued.contains(&label) {
                n += 1;
                label = format!("{base}#{n}");
            }
            issued.insert(label.clone());
            label
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Ingestion
// ---------------------------------------------------------------------------

/// Load one method's transactions from CSV. Headers naming a canonical field
/// (any case) fill that field; other columns are kept as passthrough text.
pub fn load_csv_transactions(csv_data: &str) -> Result<Vec<Transaction>, FusionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(FusionError::csv)?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FusionError::csv(format!("row {}: {e}", i + 1)))?;
        let mut txn = Transaction::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            txn.insert_raw(header, cell);
        }
        rows.push(txn);
    }

    Ok(rows)
}

/// Load a JSON array of extraction results, validating each one.
pub fn load_results_json(json: &str) -> Result<Vec<ExtractionResult>, FusionError> {
    serde_json::from_str(json).map_err(FusionError::json)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
