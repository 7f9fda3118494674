//! `visigrid-fusion`: cross-validation engine for bank-statement extraction.
//!
//! Pure engine crate: receives the transaction lists produced by several
//! independent extraction methods, aligns them, resolves field conflicts by
//! method confidence, and returns one scored, explainable result.
//! No CLI or document-parsing dependencies.

pub mod align;
pub mod assess;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod normalize;
pub mod observer;
pub mod report;
pub mod resolve;

pub use config::FusionConfig;
pub use engine::{
    combine_extraction_results, combine_results, load_csv_transactions, load_results_json, run,
};
pub use error::FusionError;
pub use model::{
    create_extraction_result, CanonicalField, CombinedResult, ExtractionResult, FieldValue,
    MergedTransaction, Transaction,
};
pub use normalize::{compare, normalize_amount, normalize_date, normalize_text};
pub use observer::{FusionEvent, FusionObserver, LogObserver, NoopObserver};
pub use resolve::{detect_conflict, resolve};
