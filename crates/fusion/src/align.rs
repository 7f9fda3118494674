//! Cross-method transaction alignment.
//!
//! Equal-length results align by position. Otherwise the longest result is the
//! anchor and every other method is greedily matched, best score first,
//! against the groups built so far.

use crate::config::FusionConfig;
use crate::model::{
    AlignedGroup, Alignment, AlignmentStrategy, CanonicalField, ExtractionResult, GroupMember,
    Transaction,
};
use crate::normalize::{compare, normalize_amount, normalize_date, normalize_text, text_similarity};

/// Align records across results. `labels[i]` names `results[i]`. No results
/// yields an empty positional alignment.
pub fn align(results: &[ExtractionResult], labels: &[String], config: &FusionConfig) -> Alignment {
    let counts: Vec<usize> = results.iter().map(|r| r.transactions().len()).collect();
    let Some(&first) = counts.first() else {
        return Alignment {
            strategy: AlignmentStrategy::Positional,
            groups: Vec::new(),
            discrepancies: Vec::new(),
            partial_groups: 0,
        };
    };

    if results.len() == 1 {
        let groups = (0..first)
            .map(|record_index| AlignedGroup {
                members: vec![GroupMember { method_index: 0, record_index }],
                missing_methods: Vec::new(),
            })
            .collect();
        return Alignment {
            strategy: AlignmentStrategy::SingleSource,
            groups,
            discrepancies: Vec::new(),
            partial_groups: 0,
        };
    }

    if counts.iter().all(|c| *c == first) {
        return Alignment {
            strategy: AlignmentStrategy::Positional,
            groups: align_positional(results.len(), first),
            discrepancies: Vec::new(),
            partial_groups: 0,
        };
    }

    let member_sets = align_by_similarity(results, config);

    let mut discrepancies = vec![count_mismatch(labels, &counts)];
    let mut groups = Vec::with_capacity(member_sets.len());
    let mut partial_groups = 0;

    for mut members in member_sets {
        members.sort_by_key(|m| m.method_index);
        let missing_methods: Vec<String> = (0..results.len())
            .filter(|mi| !members.iter().any(|m| m.method_index == *mi))
            .map(|mi| labels[mi].clone())
            .collect();

        if !missing_methods.is_empty() {
            partial_groups += 1;
            discrepancies.push(describe_unmatched(results, labels, &members, &missing_methods));
        }

        groups.push(AlignedGroup {
            members,
            missing_methods,
        });
    }

    Alignment {
        strategy: AlignmentStrategy::Similarity,
        groups,
        discrepancies,
        partial_groups,
    }
}

fn align_positional(methods: usize, count: usize) -> Vec<AlignedGroup> {
    (0..count)
        .map(|record_index| AlignedGroup {
            members: (0..methods)
                .map(|method_index| GroupMember {
                    method_index,
                    record_index,
                })
                .collect(),
            missing_methods: Vec::new(),
        })
        .collect()
}

fn align_by_similarity(results: &[ExtractionResult], config: &FusionConfig) -> Vec<Vec<GroupMember>> {
    // Anchor: most transactions, first in input order on ties.
    let mut anchor = 0;
    for (i, r) in results.iter().enumerate() {
        if r.transactions().len() > results[anchor].transactions().len() {
            anchor = i;
        }
    }

    let mut groups: Vec<Vec<GroupMember>> = (0..results[anchor].transactions().len())
        .map(|record_index| {
            vec![GroupMember {
                method_index: anchor,
                record_index,
            }]
        })
        .collect();

    let record = |m: GroupMember| &results[m.method_index].transactions()[m.record_index];

    for method_index in (0..results.len()).filter(|i| *i != anchor) {
        let records = results[method_index].transactions();

        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (gi, group) in groups.iter().enumerate() {
            for (ri, txn) in records.iter().enumerate() {
                let score = group
                    .iter()
                    .map(|m| record_similarity(record(*m), txn, config))
                    .fold(0.0, f64::max);
                if score >= config.alignment.min_similarity {
                    candidates.push((score, gi, ri));
                }
            }
        }

        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut group_taken = vec![false; groups.len()];
        let mut record_taken = vec![false; records.len()];
        for (_, gi, ri) in candidates {
            if group_taken[gi] || record_taken[ri] {
                continue;
            }
            group_taken[gi] = true;
            record_taken[ri] = true;
            groups[gi].push(GroupMember {
                method_index,
                record_index: ri,
            });
        }

        for (ri, taken) in record_taken.iter().enumerate() {
            if !taken {
                groups.push(vec![GroupMember {
                    method_index,
                    record_index: ri,
                }]);
            }
        }
    }

    groups
}

/// Weighted agreement between two records over the components both carry.
pub fn record_similarity(a: &Transaction, b: &Transaction, config: &FusionConfig) -> f64 {
    let weights = &config.alignment;
    let tolerance = &config.tolerance;
    let mut score = 0.0;
    let mut weight = 0.0;

    for (field, w) in [
        (CanonicalField::Date, weights.date_weight),
        (CanonicalField::Amount, weights.amount_weight),
    ] {
        if let (Some(x), Some(y)) = (a.populated(field), b.populated(field)) {
            weight += w;
            if compare(x, y, field.kind(), tolerance) {
                score += w;
            }
        }
    }

    if let (Some(x), Some(y)) = (
        a.populated(CanonicalField::Description),
        b.populated(CanonicalField::Description),
    ) {
        weight += weights.description_weight;
        score += weights.description_weight * text_similarity(&normalize_text(x), &normalize_text(y));
    }

    if weight > 0.0 {
        score / weight
    } else {
        0.0
    }
}

fn count_mismatch(labels: &[String], counts: &[usize]) -> String {
    let parts: Vec<String> = labels
        .iter()
        .zip(counts)
        .map(|(label, count)| format!("{label}={count}"))
        .collect();
    format!("transaction count mismatch: {}", parts.join(", "))
}

fn describe_unmatched(
    results: &[ExtractionResult],
    labels: &[String],
    members: &[GroupMember],
    missing: &[String],
) -> String {
    let first = members[0];
    let txn = &results[first.method_index].transactions()[first.record_index];

    let date = txn
        .populated(CanonicalField::Date)
        .map(normalize_date)
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "?".into());
    let amount = txn
        .populated(CanonicalField::Amount)
        .map(|v| format!("{:.2}", normalize_amount(v)))
        .unwrap_or_else(|| "?".into());
    let found: Vec<&str> = members.iter().map(|m| labels[m.method_index].as_str()).collect();

    format!(
        "unmatched transaction (date {date}, amount {amount}) found by {} but missing from {}",
        found.join(", "),
        missing.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(date: &str, amount: f64, desc: &str) -> Transaction {
        Transaction::new()
            .with(CanonicalField::Date, date)
            .with(CanonicalField::Amount, amount)
            .with(CanonicalField::Description, desc)
    }

    fn result(method: &str, txns: Vec<Transaction>) -> ExtractionResult {
        ExtractionResult::new(method, txns, 0.8, 1.0).unwrap()
    }

    fn labels(results: &[ExtractionResult]) -> Vec<String> {
        results.iter().map(|r| r.method().to_string()).collect()
    }

    #[test]
    fn equal_counts_align_by_position() {
        let results = vec![
            result("a", vec![txn("15/01/2024", 1.0, "X"), txn("16/01/2024", 2.0, "Y")]),
            result("b", vec![txn("16/01/2024", 2.0, "Y"), txn("15/01/2024", 1.0, "X")]),
        ];
        let out = align(&results, &labels(&results), &FusionConfig::default());
        assert_eq!(out.strategy, AlignmentStrategy::Positional);
        assert_eq!(out.groups.len(), 2);
        assert_eq!(out.groups[0].record_for(1), Some(0));
        assert!(out.discrepancies.is_empty());
    }

    #[test]
    fn subset_matches_by_content() {
        let results = vec![
            result(
                "pdfplumber",
                vec![txn("15/01/2024", 100.5, "PAYMENT TO STORE"), txn("16/01/2024", -50.0, "ATM WITHDRAWAL")],
            ),
            result("easyocr", vec![txn("2024-01-16", -50.0, "atm withdrawal")]),
        ];
        let out = align(&results, &labels(&results), &FusionConfig::default());
        assert_eq!(out.strategy, AlignmentStrategy::Similarity);
        assert_eq!(out.groups.len(), 2);
        assert_eq!(out.groups[0].record_for(1), None);
        assert_eq!(out.groups[0].missing_methods, vec!["easyocr".to_string()]);
        assert_eq!(out.groups[1].record_for(1), Some(0));
        assert_eq!(out.partial_groups, 1);
        assert_eq!(out.discrepancies[0], "transaction count mismatch: pdfplumber=2, easyocr=1");
        assert!(out.discrepancies[1].contains("15/01/2024"));
        assert!(out.discrepancies[1].contains("missing from easyocr"));
    }

    #[test]
    fn below_threshold_stays_unmatched() {
        let results = vec![
            result("a", vec![txn("15/01/2024", 10.0, "SALARY")]),
            result("b", vec![txn("20/02/2024", 99.0, "RENT PAYMENT"), txn("21/02/2024", 5.0, "COFFEE SHOP")]),
        ];
        let out = align(&results, &labels(&results), &FusionConfig::default());
        // anchor = b (2 records); a's record matches nothing
        assert_eq!(out.groups.len(), 3);
        assert!(out.groups.iter().all(|g| g.contributor_count() == 1));
        assert_eq!(out.partial_groups, 3);
    }

    #[test]
    fn third_method_chains_onto_new_group() {
        let extra = txn("18/01/2024", 7.0, "BOOKSHOP");
        let results = vec![
            result("a", vec![txn("15/01/2024", 1.0, "X"), txn("16/01/2024", 2.0, "Y")]),
            result("b", vec![extra.clone()]),
            result("c", vec![extra]),
        ];
        let out = align(&results, &labels(&results), &FusionConfig::default());
        assert_eq!(out.groups.len(), 3);
        let chained = &out.groups[2];
        assert_eq!(chained.record_for(1), Some(0));
        assert_eq!(chained.record_for(2), Some(0));
        assert_eq!(chained.missing_methods, vec!["a".to_string()]);
    }

    #[test]
    fn similarity_ignores_missing_components() {
        let config = FusionConfig::default();
        let a = Transaction::new().with(CanonicalField::Amount, 5.0);
        let b = txn("01/01/2024", 5.0, "ANYTHING");
        assert_eq!(record_similarity(&a, &b, &config), 1.0);
        assert_eq!(record_similarity(&Transaction::new(), &b, &config), 0.0);
    }

    #[test]
    fn no_results_align_to_nothing() {
        let out = align(&[], &[], &FusionConfig::default());
        assert_eq!(out.strategy, AlignmentStrategy::Positional);
        assert!(out.groups.is_empty());
        assert!(out.discrepancies.is_empty());
        assert_eq!(out.partial_groups, 0);
    }

    #[test]
    fn single_result_is_single_source() {
        let results = vec![result("only", vec![txn("15/01/2024", 1.0, "X")])];
        let out = align(&results, &labels(&results), &FusionConfig::default());
        assert_eq!(out.strategy, AlignmentStrategy::SingleSource);
        assert_eq!(out.groups.len(), 1);
    }
}
