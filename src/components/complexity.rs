//! Pattern Complexity Analyzer
//!
//! Static, best-effort inspection of a regex source for constructs that are
//! prone to catastrophic backtracking. The pattern under inspection is never
//! executed; only fixed probe expressions run over its source text.
//!
//! Detection is intentionally incomplete. The per-filter evaluation timeout is
//! the real backstop for anything that slips through.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    // `.*+`, `.+*`, `.**`, `.++`: a wildcard quantifier doubled in place.
    static ref DOUBLED_QUANTIFIER: Regex = Regex::new(r"\.[*+][*+]").unwrap();
    // A wildcard run or bounded repetition immediately repeated again.
    static ref REPEATED_RUN: Regex = Regex::new(r"(\.\*|\.\+|\{\d*,?\d*\})\+").unwrap();
    // A group whose body is quantified and which is itself quantified: `(a+)+`.
    static ref NESTED_QUANTIFIER: Regex = Regex::new(r"\([^()]*[*+}]\)[*+{]").unwrap();
}

const SAFE_ESTIMATE_MS: u64 = 1;
const BACKTRACKING_ESTIMATE_MS: u64 = 100;
const CATASTROPHIC_ESTIMATE_MS: u64 = 1_000;

/// Structural risk assessment for one regex source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexComplexity {
    pub has_backtracking: bool,
    pub has_negative_lookahead: bool,
    pub has_alternation: bool,
    pub is_catastrophic: bool,
    /// Advisory only, never measured.
    pub estimated_worst_case_ms: u64,
    pub safe_for_production: bool,
}

pub struct ComplexityAnalyzer;

impl ComplexityAnalyzer {
    pub fn analyze(pattern: &str) -> RegexComplexity {
        let has_backtracking =
            REPEATED_RUN.is_match(pattern) || NESTED_QUANTIFIER.is_match(pattern);
        let has_negative_lookahead = pattern.contains("(?!");
        let has_alternation = pattern.contains('|');
        let is_catastrophic = DOUBLED_QUANTIFIER.is_match(pattern);

        let estimated_worst_case_ms = if is_catastrophic {
            CATASTROPHIC_ESTIMATE_MS
        } else if has_backtracking {
            BACKTRACKING_ESTIMATE_MS
        } else {
            SAFE_ESTIMATE_MS
        };

        RegexComplexity {
            has_backtracking,
            has_negative_lookahead,
            has_alternation,
            is_catastrophic,
            estimated_worst_case_ms,
            safe_for_production: !is_catastrophic && !has_negative_lookahead,
        }
    }
}
