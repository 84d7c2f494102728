use crate::components::circuit_breaker::CircuitBreaker;
use crate::components::compiler::{CompiledFilter, FilterCompiler};
use crate::components::evaluator::{self, EvaluationFailure};
use crate::config::{EngineSettings, FilterAction, MessageFilter};
use crate::statistics::{StatEvent, StatisticsCollector, StatisticsSnapshot};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Everything a filter may inspect about one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEvaluationContext {
    pub message: String,
    pub sender: String,
    pub channel: String,
    pub timestamp: DateTime<Utc>,
}

impl FilterEvaluationContext {
    pub fn new(
        message: impl Into<String>,
        sender: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            sender: sender.into(),
            channel: channel.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterEvaluationResult {
    pub filter_id: String,
    pub filter_name: String,
    pub matched: bool,
    /// The filter's action when matched, otherwise `allow`.
    pub action: FilterAction,
    pub reason: String,
    pub matched_pattern: Option<String>,
    /// 1.0 on match, 0.0 otherwise.
    pub confidence: f64,
    pub execution_time_ms: f64,
    pub route_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterBatchResult {
    pub results: Vec<FilterEvaluationResult>,
    pub final_action: FilterAction,
    pub matched: bool,
    pub blocked_by: Option<String>,
    pub routed_to: Option<String>,
    pub execution_time_ms: f64,
}

/// Evaluates inbound channel messages against the live filter set.
///
/// Filters run in ascending `priority` order (lower values first, ties keep
/// insertion order). A matching `block` stops the batch; a matching `route`
/// sets the destination but later filters still run and may block.
pub struct FilterEngine {
    settings: EngineSettings,
    compiler: FilterCompiler,
    filters: RwLock<Arc<Vec<Arc<CompiledFilter>>>>,
    circuit_breaker: CircuitBreaker,
    statistics: StatisticsCollector,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        FilterEngine {
            compiler: FilterCompiler::new(settings.backtrack_limit),
            circuit_breaker: CircuitBreaker::new(settings.failure_threshold, settings.reset_window()),
            statistics: StatisticsCollector::new(),
            filters: RwLock::new(Arc::new(Vec::new())),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn snapshot(&self) -> Arc<Vec<Arc<CompiledFilter>>> {
        self.filters
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn replace(&self, compiled: Vec<Arc<CompiledFilter>>) {
        *self.filters.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(compiled);
    }

    fn compile_all(&self, filters: &[MessageFilter]) -> Vec<Arc<CompiledFilter>> {
        filters
            .iter()
            .map(|f| Arc::new(self.compiler.compile(f)))
            .collect()
    }

    /// Replace the live filter set. Disabled filters are dropped; the rest
    /// are sorted by priority and compiled. Circuit breaker state survives.
    pub fn load_filters(&self, filters: Vec<MessageFilter>) {
        let total = filters.len();
        let mut enabled: Vec<MessageFilter> =
            filters.into_iter().filter(|f| f.enabled).collect();
        enabled.sort_by_key(|f| f.priority);

        let compiled = self.compile_all(&enabled);
        let failed = compiled.iter().filter(|c| !c.compiled).count();

        log::info!(
            "Loaded {} filters ({} disabled, {} failed to compile)",
            compiled.len(),
            total - compiled.len(),
            failed
        );
        self.replace(compiled);
    }

    /// Compile the currently loaded filters again.
    pub fn recompile(&self) {
        let sources = self.get_filters();
        let compiled = self.compile_all(&sources);
        log::info!("Recompiled {} filters", compiled.len());
        self.replace(compiled);
    }

    /// Live filters in evaluation order, including ones that failed to compile.
    pub fn get_filters(&self) -> Vec<MessageFilter> {
        self.snapshot().iter().map(|c| c.filter.clone()).collect()
    }

    pub fn compiled_filters(&self) -> Vec<Arc<CompiledFilter>> {
        self.snapshot().iter().cloned().collect()
    }

    /// `(filter id, error)` for every filter that failed to compile.
    pub fn compile_errors(&self) -> Vec<(String, String)> {
        self.snapshot()
            .iter()
            .filter_map(|c| {
                c.compile_error
                    .as_ref()
                    .map(|e| (c.filter.id.clone(), e.clone()))
            })
            .collect()
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        self.statistics.snapshot()
    }

    pub fn statistics_collector(&self) -> &StatisticsCollector {
        &self.statistics
    }

    pub async fn evaluate_batch(&self, context: FilterEvaluationContext) -> FilterBatchResult {
        let start = Instant::now();
        let filters = self.snapshot();
        let context = Arc::new(context);
        let timeout = self.settings.evaluation_timeout();

        let mut results = Vec::with_capacity(filters.len());
        let mut final_action = FilterAction::Allow;
        let mut blocked_by = None;
        let mut routed_to = None;

        for compiled in filters.iter() {
            let filter_id = compiled.id();

            if self.circuit_breaker.is_open(filter_id) {
                log::debug!("Skipping filter {filter_id}: circuit breaker open");
                self.statistics.record_event(StatEvent::FilterSkipped);
                continue;
            }

            let result =
                match evaluator::evaluate_with_timeout(compiled.clone(), context.clone(), timeout)
                    .await
                {
                    Ok(result) => result,
                    Err(failure) => {
                        log::warn!(
                            "Filter '{}' ({}) failed on channel {}: {}",
                            compiled.filter.name,
                            filter_id,
                            context.channel,
                            failure
                        );
                        self.statistics.record_event(StatEvent::FilterFailed {
                            filter_id: filter_id.to_string(),
                            timed_out: matches!(failure, EvaluationFailure::Timeout(_)),
                        });
                        if self.circuit_breaker.record_failure(filter_id) {
                            log::error!(
                                "Circuit breaker opened for filter '{}' ({}) after {} failures",
                                compiled.filter.name,
                                filter_id,
                                self.settings.failure_threshold
                            );
                        }
                        continue;
                    }
                };

            log::debug!(
                "Filter '{}' evaluated: matched={} ({})",
                result.filter_name,
                result.matched,
                result.reason
            );

            if result.matched {
                self.statistics.record_event(StatEvent::FilterMatched {
                    filter_id: result.filter_id.clone(),
                    action: result.action,
                    evaluation_time_ms: result.execution_time_ms,
                });
            }

            let matched_action = result.matched.then_some(result.action);
            let route_to = result.route_to.clone();
            results.push(result);

            match matched_action {
                Some(FilterAction::Block) => {
                    log::info!(
                        "Message from {} on {} blocked by filter '{}' ({})",
                        context.sender,
                        context.channel,
                        compiled.filter.name,
                        filter_id
                    );
                    final_action = FilterAction::Block;
                    blocked_by = Some(filter_id.to_string());
                    break;
                }
                Some(FilterAction::Route) if route_to.is_some() => {
                    final_action = FilterAction::Route;
                    routed_to = route_to;
                }
                _ => {}
            }
        }

        let matched = results.iter().any(|r| r.matched);
        self.statistics.record_event(StatEvent::MessageEvaluated {
            final_action,
            matched,
        });

        FilterBatchResult {
            results,
            final_action,
            matched,
            blocked_by,
            routed_to,
            execution_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FilterType, MatchMode};
    use std::time::Duration;

    fn ctx(message: &str) -> FilterEvaluationContext {
        FilterEvaluationContext::new(message, "user-1", "discord")
    }

    fn regex(id: &str, pattern: &str, action: FilterAction) -> MessageFilter {
        MessageFilter::new(id, id, FilterType::Regex, pattern, action)
    }

    #[test]
    fn test_get_filters_sorted_by_priority() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("c", "c", FilterAction::Flag).with_priority(30),
            regex("a", "a", FilterAction::Flag).with_priority(10),
            regex("broken", "[oops", FilterAction::Block).with_priority(20),
            regex("a2", "a", FilterAction::Flag).with_priority(10),
        ]);

        let ids: Vec<String> = engine.get_filters().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["a", "a2", "broken", "c"]);
        assert_eq!(engine.compile_errors().len(), 1);
        assert_eq!(engine.compile_errors()[0].0, "broken");
    }

    #[tokio::test]
    async fn test_regex_block() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex(
            "spam",
            "^(spam|casino|lottery|prize)",
            FilterAction::Block,
        )]);

        // Anchored, so the keyword has to open the message; case is ignored.
        let result = engine.evaluate_batch(ctx("Prize inside")).await;
        assert_eq!(result.final_action, FilterAction::Block);
        assert!(result.matched);
        assert_eq!(result.blocked_by.as_deref(), Some("spam"));
    }

    #[tokio::test]
    async fn test_regex_block_won_a_prize() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("spam", "(spam|casino|lottery|prize)", FilterAction::Block)]);

        let result = engine.evaluate_batch(ctx("You won a prize!")).await;
        assert_eq!(result.final_action, FilterAction::Block);
        assert!(result.matched);
    }

    #[tokio::test]
    async fn test_block_wins_over_earlier_allow() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("block-casino", "casino", FilterAction::Block).with_priority(100),
            regex("allow-casino", "casino", FilterAction::Allow).with_priority(0),
        ]);

        let result = engine.evaluate_batch(ctx("Visit the casino")).await;

        // Ascending order: the allow filter (priority 0) runs first and does not
        // stop evaluation; the block filter (priority 100) is then reached.
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].filter_id, "allow-casino");
        assert_eq!(result.results[1].filter_id, "block-casino");
        assert_eq!(result.final_action, FilterAction::Block);
        assert_eq!(result.blocked_by.as_deref(), Some("block-casino"));
    }

    #[tokio::test]
    async fn test_block_short_circuits() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("first", "casino", FilterAction::Block).with_priority(1),
            regex("second", "casino", FilterAction::Flag).with_priority(2),
        ]);

        let result = engine.evaluate_batch(ctx("casino")).await;
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.final_action, FilterAction::Block);
    }

    #[tokio::test]
    async fn test_pathological_pattern_returns_quickly() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("redos", "(a+)+b", FilterAction::Block)]);

        let message = "a".repeat(10_000);
        let start = Instant::now();
        let result = engine.evaluate_batch(ctx(&message)).await;
        assert!(start.elapsed() < Duration::from_millis(150));
        assert_ne!(result.final_action, FilterAction::Block);
    }

    #[tokio::test]
    async fn test_keyword_all_mode() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![MessageFilter::new(
            "kw",
            "Spam content",
            FilterType::Keyword,
            "spam, content",
            FilterAction::Flag,
        )
        .with_match_mode(MatchMode::All)]);

        let hit = engine.evaluate_batch(ctx("This is spam content")).await;
        assert!(hit.matched);
        assert_eq!(hit.final_action, FilterAction::Allow);

        let miss = engine.evaluate_batch(ctx("This is spam")).await;
        assert!(!miss.matched);
    }

    #[tokio::test]
    async fn test_sender_filter() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![MessageFilter::new(
            "sender",
            "Blocked user",
            FilterType::Sender,
            "blocked-user-123",
            FilterAction::Block,
        )]);

        let context = FilterEvaluationContext::new("hello", "blocked-user-123", "slack");
        let result = engine.evaluate_batch(context).await;
        assert!(result.matched);
        assert_eq!(result.final_action, FilterAction::Block);

        let other = FilterEvaluationContext::new("hello", "friendly-user", "slack");
        assert!(!engine.evaluate_batch(other).await.matched);
    }

    #[tokio::test]
    async fn test_route_action() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![MessageFilter::new(
            "urgent",
            "Urgent",
            FilterType::Regex,
            "urgent",
            FilterAction::Route,
        )
        .with_route("support-agent")]);

        let result = engine.evaluate_batch(ctx("This is URGENT, please help")).await;
        assert_eq!(result.final_action, FilterAction::Route);
        assert_eq!(result.routed_to.as_deref(), Some("support-agent"));
    }

    #[tokio::test]
    async fn test_later_block_overrides_route() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("route", "urgent", FilterAction::Route)
                .with_route("support-agent")
                .with_priority(1),
            regex("block", "casino", FilterAction::Block).with_priority(2),
        ]);

        let result = engine.evaluate_batch(ctx("urgent casino deal")).await;
        assert_eq!(result.final_action, FilterAction::Block);
        assert_eq!(result.results.len(), 2);
    }

    #[tokio::test]
    async fn test_disabled_filter_excluded() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("off", "casino", FilterAction::Block).disabled()]);

        assert!(engine.get_filters().is_empty());
        let result = engine.evaluate_batch(ctx("casino")).await;
        assert!(!result.matched);
        assert_eq!(result.final_action, FilterAction::Allow);
        assert!(result.results.is_empty());
    }

    #[tokio::test]
    async fn test_open_breaker_skips_filter() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("flaky", "casino", FilterAction::Block).with_priority(1),
            regex("steady", "casino", FilterAction::Flag).with_priority(2),
        ]);

        for _ in 0..5 {
            engine.circuit_breaker().record_failure("flaky");
        }

        let result = engine.evaluate_batch(ctx("casino")).await;
        assert!(result.results.iter().all(|r| r.filter_id != "flaky"));
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.final_action, FilterAction::Allow);
        assert_eq!(engine.statistics().global.skipped_open_breaker, 1);
    }

    #[tokio::test]
    async fn test_breaker_below_threshold_still_evaluates() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("flaky", "casino", FilterAction::Block)]);

        for _ in 0..4 {
            engine.circuit_breaker().record_failure("flaky");
        }

        let result = engine.evaluate_batch(ctx("casino")).await;
        assert_eq!(result.final_action, FilterAction::Block);
    }

    #[tokio::test]
    async fn test_breaker_closes_after_window() {
        let settings = EngineSettings {
            reset_window_ms: 30,
            ..EngineSettings::default()
        };
        let engine = FilterEngine::with_settings(settings);
        engine.load_filters(vec![regex("flaky", "casino", FilterAction::Block)]);

        for _ in 0..5 {
            engine.circuit_breaker().record_failure("flaky");
        }
        assert!(engine.evaluate_batch(ctx("casino")).await.results.is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let result = engine.evaluate_batch(ctx("casino")).await;
        assert_eq!(result.final_action, FilterAction::Block);
    }

    #[tokio::test]
    async fn test_breaker_survives_reload() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("flaky", "casino", FilterAction::Block)]);
        for _ in 0..5 {
            engine.circuit_breaker().record_failure("flaky");
        }

        engine.load_filters(vec![regex("flaky", "casino", FilterAction::Block)]);
        assert!(engine.evaluate_batch(ctx("casino")).await.results.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_regex_does_not_panic() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("bad", "[unclosed", FilterAction::Block)]);

        let compiled = engine.compiled_filters();
        assert_eq!(compiled.len(), 1);
        assert!(!compiled[0].compiled);
        assert!(compiled[0].compile_error.is_some());

        let result = engine.evaluate_batch(ctx("[unclosed")).await;
        assert!(!result.matched);
        assert_eq!(result.results[0].reason, "Filter failed to compile");
        assert_eq!(engine.circuit_breaker().failure_count("bad"), 0);
    }

    #[tokio::test]
    async fn test_recompile_keeps_filters() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("b", "b", FilterAction::Flag).with_priority(2),
            regex("a", "a", FilterAction::Flag).with_priority(1),
        ]);
        engine.recompile();

        let ids: Vec<String> = engine.get_filters().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(engine.evaluate_batch(ctx("a")).await.matched);
    }

    #[tokio::test]
    async fn test_flag_keeps_allow_and_records_result() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![regex("links", r"https?://", FilterAction::Flag)]);

        let result = engine.evaluate_batch(ctx("see https://example.com")).await;
        assert!(result.matched);
        assert_eq!(result.final_action, FilterAction::Allow);
        assert_eq!(result.results[0].action, FilterAction::Flag);

        let stats = engine.statistics();
        assert_eq!(stats.global.total_messages, 1);
        assert_eq!(stats.filters[0].flags, 1);
    }

    #[tokio::test]
    async fn test_empty_engine_allows() {
        let engine = FilterEngine::new();
        let result = engine.evaluate_batch(ctx("anything")).await;
        assert_eq!(result.final_action, FilterAction::Allow);
        assert!(!result.matched);
        assert!(result.blocked_by.is_none());
        assert!(result.routed_to.is_none());
    }

    #[tokio::test]
    async fn test_route_without_agent_keeps_earlier_destination() {
        let engine = FilterEngine::new();
        engine.load_filters(vec![
            regex("r1", "urgent", FilterAction::Route)
                .with_route("oncall")
                .with_priority(1),
            regex("r2", "urgent", FilterAction::Route).with_priority(2),
        ]);

        let errors = engine.compile_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "r2");

        let result = engine.evaluate_batch(ctx("urgent: pager is firing")).await;
        assert_eq!(result.final_action, FilterAction::Route);
        assert_eq!(result.routed_to.as_deref(), Some("oncall"));
        assert!(!result.results[1].matched);
    }

    #[tokio::test]
    async fn test_repeated_timeouts_open_breaker() {
        let settings = EngineSettings {
            evaluation_timeout_ms: 5,
            backtrack_limit: 20_000_000,
            ..EngineSettings::default()
        };
        let engine = FilterEngine::with_settings(settings);
        engine.load_filters(vec![regex("slow", r"^(a|a)*\1b$", FilterAction::Block)]);
        assert!(engine.compile_errors().is_empty());

        let message = "a".repeat(30);
        for attempt in 1..=5 {
            let result = engine.evaluate_batch(ctx(&message)).await;
            assert!(result.results.iter().all(|r| r.filter_id != "slow"));
            assert_eq!(result.final_action, FilterAction::Allow);
            assert_eq!(engine.circuit_breaker().failure_count("slow"), attempt);
        }
        assert!(engine.circuit_breaker().is_open("slow"));

        let skipped = engine.evaluate_batch(ctx(&message)).await;
        assert!(skipped.results.is_empty());
        assert_eq!(engine.circuit_breaker().failure_count("slow"), 5);

        let stats = engine.statistics();
        assert_eq!(stats.global.timeouts, 5);
        assert_eq!(stats.global.skipped_open_breaker, 1);
    }
}
