//! Dependency graph analysis.
//!
//! This module inspects a project's dependency edges and reports:
//! - Dangling edges whose predecessor no longer exists
//! - Dependency cycles, rendered as task-name paths
//! - Scheduling conflicts for FS/SS/FF/SF constraints with lag
//! - Successors that started before their predecessor finished

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};
use planwatch_core::{Anchor, DependencyId, Task, TaskDependency, TaskId};
use serde::{Deserialize, Serialize};

/// Category of a dependency problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    /// The edge points at a task that does not exist
    MissingPredecessor,
    /// A stored edge points from a task to itself
    SelfDependency,
    /// Planned or actual dates violate the constraint
    TimingConflict,
    /// The successor started while the predecessor is unfinished
    UnresolvedPredecessor,
}

impl IssueKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueKind::MissingPredecessor => "MISSING_PREDECESSOR",
            IssueKind::SelfDependency => "SELF_DEPENDENCY",
            IssueKind::TimingConflict => "TIMING_CONFLICT",
            IssueKind::UnresolvedPredecessor => "UNRESOLVED_PREDECESSOR",
        }
    }
}

/// Issue severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Informational
    Low,
    /// Schedule drift worth a look
    Medium,
    /// Broken structure or started work on an open predecessor
    High,
    /// Needs action today
    Urgent,
}

impl Severity {
    /// HIGH or URGENT.
    pub fn is_high(&self) -> bool {
        *self >= Severity::High
    }
}

/// A problem found on one dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyIssue {
    /// What went wrong
    pub kind: IssueKind,
    /// How bad it is
    pub severity: Severity,
    /// The successor task
    pub task_id: TaskId,
    /// The offending edge
    pub dependency_id: DependencyId,
    /// The predecessor named by the edge
    pub predecessor_id: TaskId,
    /// Human-readable explanation
    pub detail: String,
}

/// A dependency cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// Tasks on the cycle, each depending on the next
    pub task_ids: Vec<TaskId>,
    /// Task names in the same order
    pub names: Vec<String>,
}

impl Cycle {
    /// Whether `id` is on the cycle.
    pub fn contains(&self, id: TaskId) -> bool {
        self.task_ids.contains(&id)
    }
}

impl std::fmt::Display for Cycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut path = self.names.join(" -> ");
        if let Some(first) = self.names.first() {
            path.push_str(" -> ");
            path.push_str(first);
        }
        f.write_str(&path)
    }
}

/// Result of analyzing a project's dependency graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyReport {
    /// Detected cycles
    pub cycles: Vec<Cycle>,
    /// Edge-level issues
    pub issues: Vec<DependencyIssue>,
}

impl DependencyReport {
    /// Whether anything warrants alerting a human.
    pub fn needs_attention(&self) -> bool {
        !self.cycles.is_empty() || self.issues.iter().any(|i| i.severity.is_high())
    }

    /// Number of issues of a kind.
    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}

/// The date a constraint requires of the successor, or `None` when the
/// predecessor lacks the anchoring date.
pub fn required_date(dep: &TaskDependency, predecessor: &Task) -> Option<NaiveDate> {
    let anchor = match dep.dependency_type.predecessor_anchor() {
        Anchor::Start => predecessor.effective_start(),
        Anchor::Finish => predecessor.effective_finish(),
    }?;
    Some(anchor + Duration::days(dep.lag_days))
}

/// The successor date a constraint applies to.
pub fn constrained_date(dep: &TaskDependency, successor: &Task) -> Option<NaiveDate> {
    match dep.dependency_type.successor_anchor() {
        Anchor::Start => successor.effective_start(),
        Anchor::Finish => successor.effective_finish(),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Temporary,
    Permanent,
}

/// Analyzes dependency graphs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraphAnalyzer;

impl DependencyGraphAnalyzer {
    /// Create a new analyzer.
    pub fn new() -> Self {
        Self
    }

    /// Run every check over `tasks` and `dependencies`.
    pub fn analyze(
        &self,
        tasks: &HashMap<TaskId, Task>,
        dependencies: &[TaskDependency],
    ) -> DependencyReport {
        // Dense arena: tasks sorted by id so traversal order is stable.
        let mut ids: Vec<TaskId> = tasks.keys().copied().collect();
        ids.sort();
        let index: HashMap<TaskId, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut issues = Vec::new();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); ids.len()];
        let mut valid_edges = Vec::new();

        for dep in dependencies {
            let Some(&succ) = index.get(&dep.task_id) else {
                tracing::debug!("Ignoring dependency {} with unknown successor", dep.id);
                continue;
            };
            let Some(&pred) = index.get(&dep.depends_on_task_id) else {
                issues.push(DependencyIssue {
                    kind: IssueKind::MissingPredecessor,
                    severity: Severity::High,
                    task_id: dep.task_id,
                    dependency_id: dep.id,
                    predecessor_id: dep.depends_on_task_id,
                    detail: format!(
                        "Task '{}' depends on missing or deleted task {}",
                        tasks[&dep.task_id].name, dep.depends_on_task_id
                    ),
                });
                continue;
            };
            if succ == pred {
                issues.push(DependencyIssue {
                    kind: IssueKind::SelfDependency,
                    severity: Severity::High,
                    task_id: dep.task_id,
                    dependency_id: dep.id,
                    predecessor_id: dep.depends_on_task_id,
                    detail: format!("Task '{}' depends on itself", tasks[&dep.task_id].name),
                });
                continue;
            }
            adjacency[succ].push(pred);
            valid_edges.push(dep);
        }
        // Parallel edges (FS and SS on the same pair) are one structural link.
        for targets in &mut adjacency {
            targets.sort_unstable();
            targets.dedup();
        }

        let cycles = find_cycles(&adjacency)
            .into_iter()
            .map(|path| Cycle {
                names: path.iter().map(|&i| tasks[&ids[i]].name.clone()).collect(),
                task_ids: path.into_iter().map(|i| ids[i]).collect(),
            })
            .collect();

        for dep in valid_edges {
            let successor = &tasks[&dep.task_id];
            let predecessor = &tasks[&dep.depends_on_task_id];
            issues.extend(check_timing(dep, successor, predecessor));
            issues.extend(check_resolution(dep, successor, predecessor));
        }

        DependencyReport { cycles, issues }
    }
}

/// Iterative DFS over `adjacency` with temporary/permanent marks and an
/// explicit path stack. Each back edge yields the path slice from the
/// revisited node to the top of the stack.
fn find_cycles(adjacency: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = adjacency.len();
    let mut marks = vec![Mark::Unvisited; n];
    let mut path_pos: Vec<Option<usize>> = vec![None; n];
    let mut cycles = Vec::new();

    for start in 0..n {
        if marks[start] != Mark::Unvisited {
            continue;
        }

        // (node, next edge to explore); the frames double as the path stack.
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::Temporary;
        path_pos[start] = Some(0);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            if let Some(&target) = adjacency[node].get(next) {
                frame.1 += 1;
                match marks[target] {
                    Mark::Unvisited => {
                        marks[target] = Mark::Temporary;
                        path_pos[target] = Some(stack.len());
                        stack.push((target, 0));
                    }
                    Mark::Temporary => {
                        if let Some(pos) = path_pos[target] {
                            cycles.push(stack[pos..].iter().map(|(id, _)| *id).collect());
                        }
                    }
                    Mark::Permanent => {}
                }
            } else {
                marks[node] = Mark::Permanent;
                path_pos[node] = None;
                stack.pop();
            }
        }
    }

    cycles
}

fn check_timing(
    dep: &TaskDependency,
    successor: &Task,
    predecessor: &Task,
) -> Option<DependencyIssue> {
    let required = required_date(dep, predecessor)?;
    let actual = constrained_date(dep, successor)?;
    if actual >= required {
        return None;
    }

    Some(DependencyIssue {
        kind: IssueKind::TimingConflict,
        severity: Severity::Medium,
        task_id: dep.task_id,
        dependency_id: dep.id,
        predecessor_id: dep.depends_on_task_id,
        detail: format!(
            "{} ({}, lag {}d) violated: '{}' is scheduled for {} but must not be before {} given '{}'",
            dep.dependency_type.label(),
            dep.dependency_type.code(),
            dep.lag_days,
            successor.name,
            actual,
            required,
            predecessor.name,
        ),
    })
}

fn check_resolution(
    dep: &TaskDependency,
    successor: &Task,
    predecessor: &Task,
) -> Option<DependencyIssue> {
    if !successor.has_started() || predecessor.is_complete() {
        return None;
    }

    Some(DependencyIssue {
        kind: IssueKind::UnresolvedPredecessor,
        severity: Severity::High,
        task_id: dep.task_id,
        dependency_id: dep.id,
        predecessor_id: dep.depends_on_task_id,
        detail: format!(
            "'{}' has started but predecessor '{}' is only {:.0}% complete ({})",
            successor.name, predecessor.name, predecessor.progress_percent, predecessor.status
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwatch_core::{DependencyType, ProjectId, TaskStatus};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn task_map(tasks: &[&Task]) -> HashMap<TaskId, Task> {
        tasks.iter().map(|t| (t.id, (*t).clone())).collect()
    }

    fn edge(succ: &Task, pred: &Task, kind: DependencyType, lag: i64) -> TaskDependency {
        TaskDependency::new(succ.id, pred.id, kind, lag).unwrap()
    }

    #[test]
    fn test_two_node_cycle_detected() {
        let p = ProjectId::new();
        let a = Task::new(p, "A");
        let b = Task::new(p, "B");
        let deps = vec![
            edge(&a, &b, DependencyType::FinishToStart, 0),
            edge(&b, &a, DependencyType::FinishToStart, 0),
        ];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&a, &b]), &deps);

        assert!(!report.cycles.is_empty());
        let cycle = &report.cycles[0];
        assert!(cycle.contains(a.id) && cycle.contains(b.id));
        assert_eq!(cycle.names.len(), 2);
        assert!(report.needs_attention());
    }

    #[test]
    fn test_parallel_edges_report_one_cycle() {
        let p = ProjectId::new();
        let a = Task::new(p, "A");
        let b = Task::new(p, "B");
        let deps = vec![
            edge(&b, &a, DependencyType::FinishToStart, 0),
            edge(&b, &a, DependencyType::StartToStart, 0),
            edge(&a, &b, DependencyType::FinishToStart, 0),
            edge(&a, &b, DependencyType::FinishToFinish, 0),
        ];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&a, &b]), &deps);

        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].task_ids.len(), 2);
    }

    #[test]
    fn test_cycle_found_from_any_component() {
        let p = ProjectId::new();
        let tasks: Vec<Task> = (0..5).map(|i| Task::new(p, format!("T{}", i))).collect();
        // T0 -> T1 is acyclic; T2 -> T3 -> T4 -> T2 is a separate component.
        let deps = vec![
            edge(&tasks[0], &tasks[1], DependencyType::FinishToStart, 0),
            edge(&tasks[2], &tasks[3], DependencyType::FinishToStart, 0),
            edge(&tasks[3], &tasks[4], DependencyType::FinishToStart, 0),
            edge(&tasks[4], &tasks[2], DependencyType::FinishToStart, 0),
        ];
        let refs: Vec<&Task> = tasks.iter().collect();

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&refs), &deps);

        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0].task_ids.len(), 3);
        assert!(!report.cycles[0].contains(tasks[0].id));
        let rendered = report.cycles[0].to_string();
        assert_eq!(rendered.matches(" -> ").count(), 3);
    }

    #[test]
    fn test_acyclic_chain_has_no_cycles() {
        let p = ProjectId::new();
        let a = Task::new(p, "A");
        let b = Task::new(p, "B");
        let c = Task::new(p, "C");
        let deps = vec![
            edge(&c, &b, DependencyType::FinishToStart, 0),
            edge(&b, &a, DependencyType::FinishToStart, 0),
            edge(&c, &a, DependencyType::FinishToStart, 0),
        ];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&a, &b, &c]), &deps);
        assert!(report.cycles.is_empty());
    }

    #[test]
    fn test_fs_lag_conflict() {
        let p = ProjectId::new();
        let pred = Task::new(p, "pred").with_plan(day(1), day(10));
        let succ = Task::new(p, "succ").with_plan(day(11), day(20));
        let deps = vec![edge(&succ, &pred, DependencyType::FinishToStart, 2)];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &deps);

        assert_eq!(report.count(IssueKind::TimingConflict), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.severity, Severity::Medium);
        assert_eq!(issue.task_id, succ.id);
        assert!(issue.detail.contains("finish-to-start"));
    }

    #[test]
    fn test_fs_satisfied_with_lag() {
        let p = ProjectId::new();
        let pred = Task::new(p, "pred").with_plan(day(1), day(10));
        let succ = Task::new(p, "succ").with_plan(day(12), day(20));
        let deps = vec![edge(&succ, &pred, DependencyType::FinishToStart, 2)];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &deps);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_other_constraint_types() {
        let p = ProjectId::new();
        let pred = Task::new(p, "pred").with_plan(day(5), day(15));
        // SS: start 4 < 5 + 0; FF: finish 14 < 15 + 0; SF: finish 14 >= 5 + 3.
        let succ = Task::new(p, "succ").with_plan(day(4), day(14));
        let analyzer = DependencyGraphAnalyzer::new();
        let map = task_map(&[&pred, &succ]);

        let ss = analyzer.analyze(&map, &[edge(&succ, &pred, DependencyType::StartToStart, 0)]);
        assert_eq!(ss.count(IssueKind::TimingConflict), 1);
        assert!(ss.issues[0].detail.contains("start-to-start"));

        let ff = analyzer.analyze(&map, &[edge(&succ, &pred, DependencyType::FinishToFinish, 0)]);
        assert_eq!(ff.count(IssueKind::TimingConflict), 1);

        let sf = analyzer.analyze(&map, &[edge(&succ, &pred, DependencyType::StartToFinish, 3)]);
        assert_eq!(sf.count(IssueKind::TimingConflict), 0);
    }

    #[test]
    fn test_sf_conflict() {
        let p = ProjectId::new();
        let pred = Task::new(p, "pred").with_plan(day(5), day(15));
        // SF: finish 6 < start 5 + 3.
        let succ = Task::new(p, "succ").with_plan(day(1), day(6));
        let dep = edge(&succ, &pred, DependencyType::StartToFinish, 3);

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &[dep.clone()]);

        assert_eq!(report.count(IssueKind::TimingConflict), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.dependency_id, dep.id);
        assert_eq!(issue.severity, Severity::Medium);
        assert!(issue.detail.contains("start-to-finish"));

        // Finishing exactly on the required day satisfies it.
        let on_time = Task::new(p, "succ").with_plan(day(1), day(8));
        let edge_ok = edge(&on_time, &pred, DependencyType::StartToFinish, 3);
        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &on_time]), &[edge_ok]);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_actual_dates_take_precedence() {
        let p = ProjectId::new();
        let mut pred = Task::new(p, "pred").with_plan(day(1), day(5));
        pred.actual_end = Some(day(9));
        let succ = Task::new(p, "succ").with_plan(day(6), day(12));
        let deps = vec![edge(&succ, &pred, DependencyType::FinishToStart, 0)];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &deps);
        assert_eq!(report.count(IssueKind::TimingConflict), 1);
    }

    #[test]
    fn test_missing_predecessor_reported_once() {
        let p = ProjectId::new();
        let mut succ = Task::new(p, "succ").with_plan(day(1), day(3));
        succ.status = TaskStatus::InProgress;
        let ghost = TaskId::new();
        let dep = TaskDependency::new(succ.id, ghost, DependencyType::FinishToStart, 0).unwrap();

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&succ]), &[dep.clone()]);

        assert_eq!(report.issues.len(), 1);
        let issue = &report.issues[0];
        assert_eq!(issue.kind, IssueKind::MissingPredecessor);
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.dependency_id, dep.id);
        assert_eq!(issue.predecessor_id, ghost);
    }

    #[test]
    fn test_unresolved_predecessor() {
        let p = ProjectId::new();
        let mut pred = Task::new(p, "pred");
        pred.progress_percent = 60.0;
        pred.status = TaskStatus::InProgress;
        let mut succ = Task::new(p, "succ");
        succ.actual_start = Some(day(3));
        let deps = vec![edge(&succ, &pred, DependencyType::FinishToStart, 0)];

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &deps);
        assert_eq!(report.count(IssueKind::UnresolvedPredecessor), 1);
        assert!(report.needs_attention());

        pred.status = TaskStatus::Done;
        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&pred, &succ]), &deps);
        assert_eq!(report.count(IssueKind::UnresolvedPredecessor), 0);
    }

    #[test]
    fn test_stored_self_loop_reported() {
        let p = ProjectId::new();
        let a = Task::new(p, "A");
        let mut dep = edge(&a, &Task::new(p, "B"), DependencyType::FinishToStart, 0);
        dep.depends_on_task_id = a.id;

        let report = DependencyGraphAnalyzer::new().analyze(&task_map(&[&a]), &[dep]);
        assert!(report.cycles.is_empty());
        assert_eq!(report.count(IssueKind::SelfDependency), 1);
    }

    #[test]
    fn test_empty_graph() {
        let report = DependencyGraphAnalyzer::new().analyze(&HashMap::new(), &[]);
        assert!(report.cycles.is_empty());
        assert!(report.issues.is_empty());
        assert!(!report.needs_attention());
    }
}
