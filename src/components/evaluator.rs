//! Single-Filter Evaluator
//!
//! Decides whether one compiled filter matches one message. Matching runs on
//! tokio's blocking pool and is awaited under a timeout. When the timer wins
//! the engine moves on, but the blocking thread is not aborted: a runaway
//! pattern keeps that worker busy until the match returns on its own.

use crate::components::compiler::{CompiledFilter, CompiledMatcher};
use crate::config::{FilterAction, FilterType, MatchMode};
use crate::filter::{FilterEvaluationContext, FilterEvaluationResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures that count against a filter's circuit breaker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EvaluationFailure {
    #[error("evaluation exceeded {0:?}")]
    Timeout(Duration),

    #[error("evaluation task panicked: {0}")]
    Panicked(String),
}

/// Run `task` on the blocking pool, giving up after `timeout`.
pub async fn run_bounded<F, T>(timeout: Duration, task: F) -> Result<T, EvaluationFailure>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(task);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EvaluationFailure::Panicked(e.to_string())),
        Err(_) => Err(EvaluationFailure::Timeout(timeout)),
    }
}

pub async fn evaluate_with_timeout(
    compiled: Arc<CompiledFilter>,
    context: Arc<FilterEvaluationContext>,
    timeout: Duration,
) -> Result<FilterEvaluationResult, EvaluationFailure> {
    run_bounded(timeout, move || evaluate(&compiled, &context)).await
}

/// Synchronous matching logic. Never fails: compile failures and matching
/// errors both degrade to a not-matched result.
pub fn evaluate(
    compiled: &CompiledFilter,
    context: &FilterEvaluationContext,
) -> FilterEvaluationResult {
    let start = Instant::now();
    let filter = &compiled.filter;

    if !compiled.compiled {
        return no_match(compiled, "Filter failed to compile", start);
    }

    let outcome = match (&compiled.matcher, filter.filter_type) {
        (CompiledMatcher::Regex(regex), _) => match regex.is_match(&context.message) {
            Ok(true) => Some(filter.pattern.clone()),
            Ok(false) => None,
            Err(e) => {
                log::warn!("Filter '{}' ({}) evaluation error: {}", filter.name, filter.id, e);
                return no_match(compiled, &format!("Evaluation error: {e}"), start);
            }
        },
        (CompiledMatcher::Keywords(keywords), _) => match_keywords(
            keywords,
            &context.message,
            filter.match_mode.unwrap_or_default(),
            filter.is_case_sensitive(),
        ),
        (CompiledMatcher::Direct, FilterType::Sender) => {
            match_sender(&filter.pattern, &context.sender).then(|| filter.pattern.clone())
        }
        (CompiledMatcher::Direct, other) => {
            return no_match(
                compiled,
                &format!("Filter type '{other}' is not evaluated by this engine"),
                start,
            );
        }
        (CompiledMatcher::Unavailable, _) => {
            return no_match(compiled, "Filter failed to compile", start);
        }
    };

    match outcome {
        Some(matched_pattern) => FilterEvaluationResult {
            filter_id: filter.id.clone(),
            filter_name: filter.name.clone(),
            matched: true,
            action: filter.action,
            reason: format!("Matched {} filter '{}'", filter.filter_type, filter.name),
            matched_pattern: Some(matched_pattern),
            confidence: 1.0,
            execution_time_ms: elapsed_ms(start),
            route_to: if filter.action == FilterAction::Route {
                filter.route_to_agent.clone()
            } else {
                None
            },
        },
        None => no_match(compiled, "No match", start),
    }
}

/// Returns the matched keyword(s), comma-joined.
fn match_keywords(
    keywords: &[String],
    message: &str,
    mode: MatchMode,
    case_sensitive: bool,
) -> Option<String> {
    if keywords.is_empty() {
        return None;
    }

    let haystack = if case_sensitive {
        message.to_string()
    } else {
        message.to_lowercase()
    };
    let contains = |keyword: &str| {
        if case_sensitive {
            haystack.contains(keyword)
        } else {
            haystack.contains(keyword.to_lowercase().as_str())
        }
    };

    let hits: Vec<&str> = keywords
        .iter()
        .filter(|k| contains(k.as_str()))
        .map(String::as_str)
        .collect();

    let matched = match mode {
        MatchMode::Any => !hits.is_empty(),
        MatchMode::All => hits.len() == keywords.len(),
    };

    matched.then(|| hits.join(", "))
}

fn match_sender(pattern: &str, sender: &str) -> bool {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return false;
    }
    sender == pattern || sender.contains(pattern)
}

fn no_match(compiled: &CompiledFilter, reason: &str, start: Instant) -> FilterEvaluationResult {
    FilterEvaluationResult {
        filter_id: compiled.filter.id.clone(),
        filter_name: compiled.filter.name.clone(),
        matched: false,
        action: FilterAction::Allow,
        reason: reason.to_string(),
        matched_pattern: None,
        confidence: 0.0,
        execution_time_ms: elapsed_ms(start),
        route_to: None,
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
