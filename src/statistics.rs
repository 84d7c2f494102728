use crate::config::FilterAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterStats {
    pub filter_id: String,
    pub matches: u64,
    pub blocks: u64,
    pub routes: u64,
    pub flags: u64,
    pub allows: u64,
    pub failures: u64,
    pub first_match: Option<DateTime<Utc>>,
    pub last_match: Option<DateTime<Utc>>,
    pub total_evaluation_time_ms: f64,
}

impl FilterStats {
    fn new(filter_id: &str) -> Self {
        Self {
            filter_id: filter_id.to_string(),
            matches: 0,
            blocks: 0,
            routes: 0,
            flags: 0,
            allows: 0,
            failures: 0,
            first_match: None,
            last_match: None,
            total_evaluation_time_ms: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_messages: u64,
    pub blocked: u64,
    pub routed: u64,
    pub allowed: u64,
    pub no_filter_matches: u64, // Messages no filter matched
    pub timeouts: u64,
    pub skipped_open_breaker: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl GlobalStats {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            total_messages: 0,
            blocked: 0,
            routed: 0,
            allowed: 0,
            no_filter_matches: 0,
            timeouts: 0,
            skipped_open_breaker: 0,
            start_time: now,
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    FilterMatched {
        filter_id: String,
        action: FilterAction,
        evaluation_time_ms: f64,
    },
    FilterFailed {
        filter_id: String,
        timed_out: bool,
    },
    FilterSkipped,
    MessageEvaluated {
        final_action: FilterAction,
        matched: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StatisticsSnapshot {
    pub global: GlobalStats,
    /// Sorted by match count, highest first.
    pub filters: Vec<FilterStats>,
}

struct StatsState {
    global: GlobalStats,
    filters: HashMap<String, FilterStats>,
}

pub struct StatisticsCollector {
    state: Mutex<StatsState>,
}

impl Default for StatisticsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatsState {
                global: GlobalStats::new(),
                filters: HashMap::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, StatsState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_event(&self, event: StatEvent) {
        let mut state = self.state();
        let now = Utc::now();
        state.global.last_updated = now;

        match event {
            StatEvent::FilterMatched {
                filter_id,
                action,
                evaluation_time_ms,
            } => {
                let stats = state
                    .filters
                    .entry(filter_id.clone())
                    .or_insert_with(|| FilterStats::new(&filter_id));

                stats.matches += 1;
                stats.first_match.get_or_insert(now);
                stats.last_match = Some(now);
                stats.total_evaluation_time_ms += evaluation_time_ms;

                match action {
                    FilterAction::Block => stats.blocks += 1,
                    FilterAction::Route => stats.routes += 1,
                    FilterAction::Flag => stats.flags += 1,
                    FilterAction::Allow => stats.allows += 1,
                }
            }
            StatEvent::FilterFailed {
                filter_id,
                timed_out,
            } => {
                state
                    .filters
                    .entry(filter_id.clone())
                    .or_insert_with(|| FilterStats::new(&filter_id))
                    .failures += 1;
                if timed_out {
                    state.global.timeouts += 1;
                }
            }
            StatEvent::FilterSkipped => {
                state.global.skipped_open_breaker += 1;
            }
            StatEvent::MessageEvaluated {
                final_action,
                matched,
            } => {
                state.global.total_messages += 1;
                match final_action {
                    FilterAction::Block => state.global.blocked += 1,
                    FilterAction::Route => state.global.routed += 1,
                    FilterAction::Allow | FilterAction::Flag => state.global.allowed += 1,
                }
                if !matched {
                    state.global.no_filter_matches += 1;
                }
            }
        }
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let state = self.state();
        let mut filters: Vec<FilterStats> = state.filters.values().cloned().collect();
        filters.sort_by(|a, b| b.matches.cmp(&a.matches).then_with(|| a.filter_id.cmp(&b.filter_id)));
        StatisticsSnapshot {
            global: state.global.clone(),
            filters,
        }
    }

    /// Filter ids from `all_filter_ids` that have never matched.
    pub fn unmatched_filters(&self, all_filter_ids: &[String]) -> Vec<String> {
        let state = self.state();
        all_filter_ids
            .iter()
            .filter(|id| state.filters.get(*id).map(|s| s.matches == 0).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        let mut state = self.state();
        state.global = GlobalStats::new();
        state.filters.clear();
    }
}
