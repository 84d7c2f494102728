//! Building blocks of the filter engine.
//!
//! Leaf-first: the complexity analyzer feeds the compiler, the compiler feeds
//! the evaluator, and the circuit breaker sits beside the evaluator so the
//! engine can skip filters that keep failing.

pub mod circuit_breaker;
pub mod compiler;
pub mod complexity;
pub mod evaluator;

pub use circuit_breaker::{BreakerStatus, CircuitBreaker};
pub use compiler::{CompileError, CompiledFilter, CompiledMatcher, FilterCompiler};
pub use complexity::{ComplexityAnalyzer, RegexComplexity};
pub use evaluator::EvaluationFailure;
