//! Filter Compiler
//!
//! Turns a declarative `MessageFilter` into its executable form. Compilation
//! never fails outright: problems are captured on the `CompiledFilter` so the
//! engine can keep reporting the filter while skipping it at evaluation time.

use crate::components::complexity::{ComplexityAnalyzer, RegexComplexity};
use crate::config::{FilterAction, FilterType, MessageFilter};
use fancy_regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("Pattern '{0}' rejected: catastrophic backtracking risk")]
    Catastrophic(String),

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Route filter '{0}' has no route_to_agent")]
    MissingRouteTarget(String),
}

/// The executable artifact of a compiled filter.
#[derive(Debug)]
pub enum CompiledMatcher {
    Regex(Regex),
    Keywords(Vec<String>),
    /// Sender, time and frequency filters read `filter.pattern` directly.
    Direct,
    /// Compilation failed; see `CompiledFilter::compile_error`.
    Unavailable,
}

#[derive(Debug)]
pub struct CompiledFilter {
    pub filter: MessageFilter,
    pub matcher: CompiledMatcher,
    pub complexity: Option<RegexComplexity>,
    pub compiled: bool,
    pub compile_error: Option<String>,
}

impl CompiledFilter {
    fn failed(
        filter: &MessageFilter,
        complexity: Option<RegexComplexity>,
        error: CompileError,
    ) -> Self {
        log::warn!(
            "Filter '{}' ({}) failed to compile: {}",
            filter.name,
            filter.id,
            error
        );
        Self {
            filter: filter.clone(),
            matcher: CompiledMatcher::Unavailable,
            complexity,
            compiled: false,
            compile_error: Some(error.to_string()),
        }
    }

    fn ready(
        filter: &MessageFilter,
        matcher: CompiledMatcher,
        complexity: Option<RegexComplexity>,
    ) -> Self {
        Self {
            filter: filter.clone(),
            matcher,
            complexity,
            compiled: true,
            compile_error: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.filter.id
    }
}

pub struct FilterCompiler {
    backtrack_limit: usize,
}

impl FilterCompiler {
    pub fn new(backtrack_limit: usize) -> Self {
        Self { backtrack_limit }
    }

    pub fn compile(&self, filter: &MessageFilter) -> CompiledFilter {
        if filter.action == FilterAction::Route && !has_route_target(filter) {
            return CompiledFilter::failed(
                filter,
                None,
                CompileError::MissingRouteTarget(filter.id.clone()),
            );
        }

        match filter.filter_type {
            FilterType::Regex => self.compile_regex(filter),
            FilterType::Keyword => {
                let keywords = split_keywords(&filter.pattern);
                CompiledFilter::ready(filter, CompiledMatcher::Keywords(keywords), None)
            }
            FilterType::Sender | FilterType::Time | FilterType::Frequency => {
                CompiledFilter::ready(filter, CompiledMatcher::Direct, None)
            }
        }
    }

    fn compile_regex(&self, filter: &MessageFilter) -> CompiledFilter {
        let complexity = ComplexityAnalyzer::analyze(&filter.pattern);

        if complexity.is_catastrophic {
            return CompiledFilter::failed(
                filter,
                Some(complexity),
                CompileError::Catastrophic(filter.pattern.clone()),
            );
        }

        let source = if filter.is_case_sensitive() {
            filter.pattern.clone()
        } else {
            format!("(?i){}", filter.pattern)
        };

        match RegexBuilder::new(&source)
            .backtrack_limit(self.backtrack_limit)
            .build()
        {
            Ok(regex) => {
                if !complexity.safe_for_production {
                    log::warn!(
                        "Filter '{}' ({}) compiled but is not production-safe (negative lookahead)",
                        filter.name,
                        filter.id
                    );
                }
                CompiledFilter::ready(filter, CompiledMatcher::Regex(regex), Some(complexity))
            }
            Err(e) => CompiledFilter::failed(
                filter,
                Some(complexity),
                CompileError::InvalidPattern {
                    pattern: filter.pattern.clone(),
                    reason: e.to_string(),
                },
            ),
        }
    }
}

fn has_route_target(filter: &MessageFilter) -> bool {
    filter
        .route_to_agent
        .as_deref()
        .is_some_and(|agent| !agent.trim().is_empty())
}

fn split_keywords(pattern: &str) -> Vec<String> {
    pattern
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}
