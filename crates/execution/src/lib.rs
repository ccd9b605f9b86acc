//! Execution layer - auto-processing runs, the daily batch, and alert delivery.

#![warn(missing_docs)]

pub mod orchestrator;
pub mod job;
pub mod notifier;

pub use orchestrator::{
    AutoProcessOptions, AutoProcessSummary, AutoProcessingOrchestrator, ALERT_KIND, PROJECT_SOURCE,
};
pub use job::{BatchOutcome, BatchReport, DailyAutoProcessingJob, AUTO_PROCESSING_JOB};
pub use notifier::{LogNotifier, Notifier, NotifyError, WebhookNotifier};
