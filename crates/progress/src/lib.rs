//! Progress tracking for PlanWatch.
//!
//! Dependency graph analysis, completion forecasting, and the aggregation
//! service that cascades task progress into milestones.

#![warn(missing_docs)]

pub mod analyzer;
pub mod forecast;
pub mod aggregator;
pub mod gate;
pub mod error;

pub use analyzer::{
    Cycle, DependencyGraphAnalyzer, DependencyIssue, DependencyReport, IssueKind, Severity,
};
pub use forecast::{
    Confidence, ForecastEngine, ForecastReport, ForecastStatus, RateSource, TaskForecast,
};
pub use aggregator::{MilestoneOutcome, ProgressAggregator, ProgressUpdate};
pub use gate::{CompletionGate, DeliverableGate, GateFailurePolicy, GateOutcome};
pub use error::{ProgressError, Result};
