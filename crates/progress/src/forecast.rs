//! Completion forecasting.
//!
//! Velocity is derived per task from progress history, falling back to the
//! time since work started, then to the planned duration, then to a fixed
//! floor. Remaining work divided by velocity gives the predicted finish.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use planwatch_core::{ProgressLog, Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::aggregator::weighted_mean;

/// Velocity used when nothing better is known, in percent per day.
pub const FALLBACK_RATE: f64 = 5.0;

/// Lower bound applied to velocity before dividing remaining work.
pub const MIN_RATE: f64 = 0.1;

/// Horizons, in days, for expected progress gain.
pub const SHORT_HORIZON_DAYS: i64 = 7;
/// Second horizon, in days.
pub const LONG_HORIZON_DAYS: i64 = 14;

/// Where the velocity estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Difference between first and last progress log
    History,
    /// Progress so far over days since actual start
    ActualStart,
    /// 100% over the planned duration
    Plan,
    /// Fixed floor
    Fallback,
}

/// Forecast status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastStatus {
    /// Done
    Completed,
    /// At 100% but not yet marked done
    Finishing,
    /// Predicted to finish after its planned end
    Delayed,
    /// Predicted to finish on or before its planned end
    OnTrack,
}

/// Forecast for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskForecast {
    /// Task forecast
    pub task_id: TaskId,
    /// Current progress
    pub progress_percent: f64,
    /// Predicted finish date
    pub predicted_finish_date: NaiveDate,
    /// Planned end, if any
    pub plan_end: Option<NaiveDate>,
    /// Predicted finish minus planned end (0 when unknown or finished)
    pub delay_days: i64,
    /// Status
    pub status: ForecastStatus,
    /// Whether the task is predicted late
    pub critical: bool,
    /// Estimated percent per day
    pub rate_per_day: f64,
    /// Where the rate came from
    pub rate_source: RateSource,
    /// Rollup weight
    pub weight: f64,
    /// Whether at least two progress logs exist
    pub has_history: bool,
}

impl TaskForecast {
    fn remaining_percent(&self) -> f64 {
        (100.0 - self.progress_percent).max(0.0)
    }

    /// Progress the task is expected to gain within `days`.
    pub fn expected_gain(&self, days: i64) -> f64 {
        (self.rate_per_day * days as f64).min(self.remaining_percent())
    }
}

/// Qualitative confidence in a project forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    /// Most tasks have progress history
    High,
    /// Some tasks have progress history
    Medium,
    /// Few or no tasks have progress history
    Low,
}

impl Confidence {
    /// Bucket by the share of tasks with enough progress history.
    pub fn from_history_ratio(ratio: f64) -> Self {
        if ratio >= 0.6 {
            Confidence::High
        } else if ratio >= 0.3 {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

/// Forecast for a whole project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastReport {
    /// Weighted current progress
    pub current_progress: f64,
    /// Latest predicted task finish
    pub predicted_completion_date: Option<NaiveDate>,
    /// Latest planned task end (falls back to the prediction)
    pub planned_completion_date: Option<NaiveDate>,
    /// Predicted minus planned completion
    pub predicted_delay_days: i64,
    /// Weighted progress gain expected over the next 7 days
    pub expected_gain_7d: f64,
    /// Weighted progress gain expected over the next 14 days
    pub expected_gain_14d: f64,
    /// Confidence bucket
    pub confidence: Confidence,
    /// Tasks predicted late
    pub delayed_tasks: usize,
    /// Tasks flagged critical
    pub critical_tasks: usize,
    /// Per-task forecasts
    pub tasks: Vec<TaskForecast>,
}

impl ForecastReport {
    /// The report for a project without tasks.
    pub fn empty() -> Self {
        Self {
            current_progress: 0.0,
            predicted_completion_date: None,
            planned_completion_date: None,
            predicted_delay_days: 0,
            expected_gain_7d: 0.0,
            expected_gain_14d: 0.0,
            confidence: Confidence::Low,
            delayed_tasks: 0,
            critical_tasks: 0,
            tasks: Vec::new(),
        }
    }
}

/// Forecast engine.
#[derive(Debug, Clone, Default)]
pub struct ForecastEngine;

impl ForecastEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self
    }

    /// Estimate velocity for a task. `logs` must be oldest first.
    pub fn derive_rate(&self, task: &Task, logs: &[ProgressLog], today: NaiveDate) -> (f64, RateSource) {
        if let (Some(first), Some(last)) = (logs.first(), logs.last()) {
            if logs.len() >= 2 {
                let days = (last.updated_at - first.updated_at).num_days().max(1);
                let rate = (last.progress_percent - first.progress_percent) / days as f64;
                if rate > 0.0 {
                    return (rate, RateSource::History);
                }
            }
        }

        if let Some(start) = task.actual_start {
            if task.progress_percent > 0.0 {
                let days = (today - start).num_days().max(1);
                return (task.progress_percent / days as f64, RateSource::ActualStart);
            }
        }

        if let (Some(start), Some(end)) = (task.plan_start, task.plan_end) {
            let days = (end - start).num_days().max(1);
            return (100.0 / days as f64, RateSource::Plan);
        }

        (FALLBACK_RATE, RateSource::Fallback)
    }

    /// Forecast a single task.
    pub fn forecast_task(&self, task: &Task, logs: &[ProgressLog], today: NaiveDate) -> TaskForecast {
        let (rate, source) = self.derive_rate(task, logs, today);
        let mut forecast = TaskForecast {
            task_id: task.id,
            progress_percent: task.progress_percent,
            predicted_finish_date: today,
            plan_end: task.plan_end,
            delay_days: 0,
            status: ForecastStatus::OnTrack,
            critical: false,
            rate_per_day: rate,
            rate_source: source,
            weight: task.weight,
            has_history: logs.len() >= 2,
        };

        if task.progress_percent >= 100.0 {
            forecast.predicted_finish_date = task.actual_end.or(task.plan_end).unwrap_or(today);
            forecast.status = if task.status == TaskStatus::Done {
                ForecastStatus::Completed
            } else {
                ForecastStatus::Finishing
            };
            return forecast;
        }

        let remaining_days = ((100.0 - task.progress_percent) / rate.max(MIN_RATE)).ceil() as i64;
        forecast.predicted_finish_date = today + Duration::days(remaining_days);

        if let Some(plan_end) = task.plan_end {
            forecast.delay_days = (forecast.predicted_finish_date - plan_end).num_days();
        }
        if forecast.delay_days > 0 {
            forecast.status = ForecastStatus::Delayed;
            forecast.critical = true;
        }

        forecast
    }

    /// Forecast every task and aggregate to a project report.
    pub fn forecast_project(
        &self,
        tasks: &[Task],
        logs: &HashMap<TaskId, Vec<ProgressLog>>,
        today: NaiveDate,
    ) -> ForecastReport {
        if tasks.is_empty() {
            return ForecastReport::empty();
        }

        let items: Vec<TaskForecast> = tasks
            .iter()
            .map(|task| {
                let history = logs.get(&task.id).map(Vec::as_slice).unwrap_or(&[]);
                self.forecast_task(task, history, today)
            })
            .collect();

        let weight = |f: &TaskForecast| f.weight;
        let current_progress = weighted_mean(&items, weight, |f| f.progress_percent);
        let expected_gain_7d =
            weighted_mean(&items, weight, |f| f.expected_gain(SHORT_HORIZON_DAYS));
        let expected_gain_14d =
            weighted_mean(&items, weight, |f| f.expected_gain(LONG_HORIZON_DAYS));

        let predicted = items.iter().map(|f| f.predicted_finish_date).max();
        let planned = tasks.iter().filter_map(|t| t.plan_end).max().or(predicted);
        let predicted_delay_days = match (predicted, planned) {
            (Some(p), Some(q)) => (p - q).num_days(),
            _ => 0,
        };

        let with_history = items.iter().filter(|f| f.has_history).count();
        let confidence = Confidence::from_history_ratio(with_history as f64 / items.len() as f64);

        ForecastReport {
            current_progress,
            predicted_completion_date: predicted,
            planned_completion_date: planned,
            predicted_delay_days,
            expected_gain_7d,
            expected_gain_14d,
            confidence,
            delayed_tasks: items.iter().filter(|f| f.status == ForecastStatus::Delayed).count(),
            critical_tasks: items.iter().filter(|f| f.critical).count(),
            tasks: items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use planwatch_core::{ProjectId, UserId};

    use crate::aggregator::weighted_progress;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn log(task: &Task, percent: f64, d: u32) -> ProgressLog {
        let at = Utc.with_ymd_and_hms(2024, 4, d, 9, 0, 0).unwrap();
        ProgressLog::new(task.id, percent, "", UserId::new("dev"), at)
    }

    #[test]
    fn test_rate_from_plan_duration() {
        let task = Task::new(ProjectId::new(), "t").with_plan(day(1), day(11));
        let (rate, source) = ForecastEngine::new().derive_rate(&task, &[], day(5));
        assert_eq!(source, RateSource::Plan);
        assert!((rate - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_from_history_wins() {
        let mut task = Task::new(ProjectId::new(), "t").with_plan(day(1), day(11));
        task.actual_start = Some(day(1));
        task.progress_percent = 40.0;
        let logs = vec![log(&task, 10.0, 2), log(&task, 40.0, 8)];

        let (rate, source) = ForecastEngine::new().derive_rate(&task, &logs, day(10));
        assert_eq!(source, RateSource::History);
        assert!((rate - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_history_falls_through_to_actual_start() {
        let mut task = Task::new(ProjectId::new(), "t");
        task.actual_start = Some(day(1));
        task.progress_percent = 30.0;
        let logs = vec![log(&task, 30.0, 2), log(&task, 30.0, 5)];

        let (rate, source) = ForecastEngine::new().derive_rate(&task, &logs, day(11));
        assert_eq!(source, RateSource::ActualStart);
        assert!((rate - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_fallback_rate() {
        let task = Task::new(ProjectId::new(), "t");
        let (rate, source) = ForecastEngine::new().derive_rate(&task, &[], day(1));
        assert_eq!(source, RateSource::Fallback);
        assert_eq!(rate, FALLBACK_RATE);
    }

    #[test]
    fn test_completed_task_finish_date() {
        let engine = ForecastEngine::new();
        let mut task = Task::new(ProjectId::new(), "t").with_plan(day(1), day(10));
        task.progress_percent = 100.0;
        task.actual_end = Some(day(8));
        task.status = TaskStatus::Done;

        let f = engine.forecast_task(&task, &[], day(20));
        assert_eq!(f.predicted_finish_date, day(8));
        assert_eq!(f.status, ForecastStatus::Completed);
        assert_eq!(f.delay_days, 0);

        task.actual_end = None;
        task.status = TaskStatus::InProgress;
        let f = engine.forecast_task(&task, &[], day(20));
        assert_eq!(f.predicted_finish_date, day(10));
        assert_eq!(f.status, ForecastStatus::Finishing);

        task.plan_end = None;
        let f = engine.forecast_task(&task, &[], day(20));
        assert_eq!(f.predicted_finish_date, day(20));
    }

    #[test]
    fn test_delayed_task_is_critical() {
        // 10%/day from the plan, 50% left -> 5 days from the 8th = 13th, plan ends 11th.
        let mut task = Task::new(ProjectId::new(), "t").with_plan(day(1), day(11));
        task.progress_percent = 50.0;

        let f = ForecastEngine::new().forecast_task(&task, &[], day(8));
        assert_eq!(f.predicted_finish_date, day(13));
        assert_eq!(f.delay_days, 2);
        assert_eq!(f.status, ForecastStatus::Delayed);
        assert!(f.critical);
    }

    #[test]
    fn test_on_track_without_plan_end() {
        let task = Task::new(ProjectId::new(), "t");
        let f = ForecastEngine::new().forecast_task(&task, &[], day(1));
        // 100% at the 5%/day floor.
        assert_eq!(f.predicted_finish_date, day(21));
        assert_eq!(f.status, ForecastStatus::OnTrack);
        assert!(!f.critical);
    }

    #[test]
    fn test_weighted_project_progress() {
        let p = ProjectId::new();
        let mut a = Task::new(p, "a").with_weight(1.0);
        a.progress_percent = 100.0;
        let mut b = Task::new(p, "b").with_weight(1.0);
        b.progress_percent = 50.0;
        let c = Task::new(p, "c").with_weight(2.0);

        let report = ForecastEngine::new().forecast_project(&[a, b, c], &HashMap::new(), day(1));
        assert!((report.current_progress - 37.5).abs() < 1e-9);
    }

    #[test]
    fn test_project_dates_and_horizons() {
        let p = ProjectId::new();
        let a = Task::new(p, "a").with_plan(day(1), day(11));
        let b = Task::new(p, "b").with_plan(day(1), day(5));

        let report = ForecastEngine::new().forecast_project(&[a, b], &HashMap::new(), day(1));
        // a: 10%/day -> 10 days; b: 25%/day -> 4 days.
        assert_eq!(report.predicted_completion_date, Some(day(11)));
        assert_eq!(report.planned_completion_date, Some(day(11)));
        assert_eq!(report.predicted_delay_days, 0);
        // 7 days: a gains 70, b gains 100 -> 85; 14 days: 100 each.
        assert!((report.expected_gain_7d - 85.0).abs() < 1e-9);
        assert!((report.expected_gain_14d - 100.0).abs() < 1e-9);
        assert_eq!(report.confidence, Confidence::Low);
    }

    #[test]
    fn test_confidence_buckets() {
        let p = ProjectId::new();
        let tasks: Vec<Task> = (0..3).map(|i| Task::new(p, format!("t{}", i))).collect();
        let mut logs = HashMap::new();
        logs.insert(tasks[0].id, vec![log(&tasks[0], 0.0, 1), log(&tasks[0], 20.0, 3)]);

        let engine = ForecastEngine::new();
        assert_eq!(engine.forecast_project(&tasks, &logs, day(5)).confidence, Confidence::Medium);

        logs.insert(tasks[1].id, vec![log(&tasks[1], 0.0, 1), log(&tasks[1], 20.0, 3)]);
        assert_eq!(engine.forecast_project(&tasks, &logs, day(5)).confidence, Confidence::High);
    }

    #[test]
    fn test_empty_project() {
        let report = ForecastEngine::new().forecast_project(&[], &HashMap::new(), day(1));
        assert_eq!(report.current_progress, 0.0);
        assert_eq!(report.confidence, Confidence::Low);
        assert_eq!(report.expected_gain_7d, 0.0);
        assert!(report.predicted_completion_date.is_none());
    }

    #[test]
    fn test_zero_weights_match_progress_rollup() {
        let p = ProjectId::new();
        let mut a = Task::new(p, "a").with_weight(0.0);
        a.progress_percent = 40.0;
        let mut b = Task::new(p, "b").with_weight(0.0);
        b.progress_percent = 60.0;
        let tasks = [a, b];

        let report = ForecastEngine::new().forecast_project(&tasks, &HashMap::new(), day(1));
        assert_eq!(report.current_progress, 50.0);
        assert_eq!(report.current_progress, weighted_progress(&tasks));
    }
}
