//! Diagnostic side channel for a fusion run.
//!
//! The engine reports what it is doing through a [`FusionObserver`] instead of
//! logging directly. Observers see borrowed views only and cannot change the
//! result.

use crate::model::{AlignmentStrategy, ConflictResolution, QualityAssessment};

const LOG_TARGET: &str = "visigrid_fusion";

/// A step of the pipeline worth reporting.
#[derive(Debug, Clone, Copy)]
pub enum FusionEvent<'a> {
    Started {
        methods: &'a [String],
        transaction_counts: &'a [usize],
    },
    Aligned {
        strategy: AlignmentStrategy,
        groups: usize,
        partial_groups: usize,
    },
    Discrepancy {
        message: &'a str,
    },
    ConflictResolved {
        resolution: &'a ConflictResolution,
    },
    Assessed {
        quality: &'a QualityAssessment,
        agreement_percentage: f64,
    },
    Finished {
        transactions: usize,
        conflicts: usize,
    },
}

pub trait FusionObserver {
    fn on_event(&mut self, event: FusionEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FusionObserver for NoopObserver {
    fn on_event(&mut self, _event: FusionEvent<'_>) {}
}

/// Forwards events to the `log` facade under the `visigrid_fusion` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl FusionObserver for LogObserver {
    fn on_event(&mut self, event: FusionEvent<'_>) {
        match event {
            FusionEvent::Started {
                methods,
                transaction_counts,
            } => {
                log::debug!(
                    target: LOG_TARGET,
                    "combining {} results: {}",
                    methods.len(),
                    methods
                        .iter()
                        .zip(transaction_counts)
                        .map(|(m, n)| format!("{m}={n}"))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }
            FusionEvent::Aligned {
                strategy,
                groups,
                partial_groups,
            } => {
                log::debug!(
                    target: LOG_TARGET,
                    "aligned {} groups ({}), {} partial",
                    groups,
                    strategy,
                    partial_groups
                );
            }
            FusionEvent::Discrepancy { message } => {
                log::warn!(target: LOG_TARGET, "{}", message);
            }
            FusionEvent::ConflictResolved { resolution } => {
                log::debug!(
                    target: LOG_TARGET,
                    "{} in group {}: kept {} from {} (confidence {:.2})",
                    resolution.conflict_type,
                    resolution.metadata.group_index,
                    resolution.resolved_value,
                    resolution.winning_method,
                    resolution.confidence
                );
            }
            FusionEvent::Assessed {
                quality,
                agreement_percentage,
            } => {
                log::info!(
                    target: LOG_TARGET,
                    "overall confidence {:.3}, completeness {:.3}, agreement {:.1}%, anomalies {:.3}",
                    quality.overall_confidence,
                    quality.completeness_score,
                    agreement_percentage,
                    quality.anomaly_score
                );
            }
            FusionEvent::Finished {
                transactions,
                conflicts,
            } => {
                log::debug!(
                    target: LOG_TARGET,
                    "fusion finished: {} transactions, {} conflicts resolved",
                    transactions,
                    conflicts
                );
            }
        }
    }
}
