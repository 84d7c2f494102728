pub mod components;
pub mod config;
pub mod filter;
pub mod statistics;

pub use components::{CircuitBreaker, ComplexityAnalyzer, CompiledFilter, RegexComplexity};
pub use config::{Config, EngineSettings, FilterAction, FilterType, MatchMode, MessageFilter};
pub use filter::{FilterBatchResult, FilterEngine, FilterEvaluationContext, FilterEvaluationResult};
pub use statistics::{StatEvent, StatisticsCollector, StatisticsSnapshot};
