//! Execution engine - runs a task collection against a target
//!
//! Builds and checks the graph up front, then hands every task to the
//! scheduler. Task errors and panics become per-task outcomes; only
//! configuration problems abort a run.

use crate::changes::{Action, ChangeDescriptor, FieldDelta};
use crate::context::{RunContext, TaskContext};
use crate::error::{Error, Result, TaskError};
use crate::graph::TaskGraph;
use crate::scheduler::{Execution, Scheduler};
use crate::target::{DryRunTarget, Target};
use crate::task::{Task, TaskSet};
use crate::types::{Interrupt, RunOptions, RunSummary, SkipCause, TaskOutcome, TaskState};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Per-task results of a run, in task insertion order
#[derive(Debug)]
pub struct RunReport {
    outcomes: Vec<(String, TaskOutcome)>,
    interrupt: Option<Interrupt>,
}

impl RunReport {
    fn from_execution(execution: Execution) -> Self {
        Self {
            outcomes: execution.outcomes,
            interrupt: execution.interrupt,
        }
    }

    /// Outcome of the named task
    pub fn outcome(&self, task: &str) -> Option<&TaskOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == task)
            .map(|(_, outcome)| outcome)
    }

    /// Final state of the named task
    pub fn state(&self, task: &str) -> Option<TaskState> {
        self.outcome(task).map(TaskOutcome::state)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &TaskOutcome)> {
        self.outcomes.iter().map(|(name, outcome)| (name.as_str(), outcome))
    }

    /// Every failed task with its error
    pub fn failures(&self) -> Vec<(&str, &TaskError)> {
        self.outcomes()
            .filter_map(|(name, outcome)| match outcome {
                TaskOutcome::Failed { error } => Some((name, error)),
                _ => None,
            })
            .collect()
    }

    /// Every skipped task with its cause
    pub fn skipped(&self) -> Vec<(&str, &SkipCause)> {
        self.outcomes()
            .filter_map(|(name, outcome)| match outcome {
                TaskOutcome::Skipped { cause } => Some((name, cause)),
                _ => None,
            })
            .collect()
    }

    /// Changes produced by successful tasks, excluding no-ops
    pub fn changes(&self) -> Vec<&ChangeDescriptor> {
        self.outcomes()
            .filter_map(|(_, outcome)| outcome.change())
            .filter(|change| !change.is_no_change())
            .collect()
    }

    /// Warnings recorded by tasks, including insufficient-access skips
    pub fn warnings(&self) -> Vec<(&str, &str)> {
        let mut warnings = Vec::new();
        for (name, outcome) in self.outcomes() {
            match outcome {
                TaskOutcome::Succeeded { warnings: w, .. } => {
                    warnings.extend(w.iter().map(|message| (name, message.as_str())));
                }
                TaskOutcome::Skipped {
                    cause: SkipCause::InsufficientAccess { message },
                } => warnings.push((name, message.as_str())),
                _ => {}
            }
        }
        warnings
    }

    /// Why the run stopped starting tasks early, if it did
    pub fn interrupt(&self) -> Option<Interrupt> {
        self.interrupt
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for (_, outcome) in self.outcomes() {
            summary.add_outcome(outcome);
        }
        summary
    }

    /// No task failed or was skipped for a reason other than its own
    /// insufficient-access lifecycle
    pub fn is_success(&self) -> bool {
        !self.outcomes().any(|(_, outcome)| outcome.is_problem())
    }

    /// Turn an unsuccessful report into an error
    pub fn ensure_success(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let failed = self.failures().len();
        let skipped = self
            .outcomes()
            .filter(|(_, outcome)| outcome.state() == TaskState::Skipped && outcome.is_problem())
            .count();
        Err(Error::Incomplete { failed, skipped })
    }
}

impl<C: Sync + 'static> RunContext<'_, C> {
    /// Reconcile every task in dependency order
    pub fn run_tasks(&self, tasks: &TaskSet<C>) -> Result<RunReport> {
        let graph = self.prepare(tasks)?;
        log::info!(
            "running {} task(s) against {} target",
            tasks.len(),
            self.target().name()
        );

        let execution = self.schedule(&graph, |name| match tasks.get(name) {
            Some(task) => self.run_one(task.as_ref()),
            None => missing(name),
        })?;
        let report = RunReport::from_execution(execution);
        log_finished("run", &report);
        Ok(report)
    }

    /// Prune leftovers in reverse dependency order.
    ///
    /// Only `Sync` tasks are asked for deletions; every other lifecycle
    /// finishes with no change.
    pub fn run_deletions(&self, tasks: &TaskSet<C>) -> Result<RunReport> {
        let graph = self.prepare(tasks)?.reversed();
        log::info!(
            "running deletion pass over {} task(s) against {} target",
            tasks.len(),
            self.target().name()
        );

        let execution = self.schedule(&graph, |name| match tasks.get(name) {
            Some(task) => self.delete_one(task.as_ref(), tasks),
            None => missing(name),
        })?;
        let report = RunReport::from_execution(execution);
        log_finished("deletion pass", &report);
        Ok(report)
    }

    /// Build the graph and validate every task; nothing runs on error
    fn prepare(&self, tasks: &TaskSet<C>) -> Result<TaskGraph> {
        let graph = TaskGraph::build(tasks)?;
        for task in tasks.iter() {
            task.validate()?;
        }
        self.target().begin();
        Ok(graph)
    }

    fn schedule<F>(&self, graph: &TaskGraph, work: F) -> Result<Execution>
    where
        F: Fn(&str) -> TaskOutcome + Sync,
    {
        Scheduler::new(graph, self.options(), self.cancel_token(), self.progress()).execute(work)
    }

    fn run_one(&self, task: &dyn Task<C>) -> TaskOutcome {
        let name = task.name();
        log::debug!("{name}: running {}", task.resource_type());

        let ctx = TaskContext::new(name, self.cloud(), self.target(), self.options());
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx)));
        into_outcome(name, result, ctx.into_warnings())
    }

    fn delete_one(&self, task: &dyn Task<C>, tasks: &TaskSet<C>) -> TaskOutcome {
        let name = task.name();
        if !task.lifecycle().permits_deletion() {
            log::debug!("{name}: lifecycle {} never deletes", task.lifecycle());
            return TaskOutcome::Succeeded {
                change: ChangeDescriptor::no_change(name, task.resource_type()),
                warnings: Vec::new(),
            };
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| -> TaskResult {
            let deletions = task
                .find_deletions(self.cloud(), tasks)
                .map_err(TaskError::Discovery)?;
            if deletions.is_empty() {
                return Ok(ChangeDescriptor::no_change(name, task.resource_type()));
            }

            let mut deltas = Vec::with_capacity(deletions.len());
            for deletion in &deletions {
                self.target()
                    .delete(self.cloud(), name, deletion.as_ref())
                    .map_err(TaskError::Apply)?;
                deltas.push(FieldDelta::removed(deletion.resource_type(), deletion.item()));
            }
            Ok(ChangeDescriptor::new(
                name,
                task.resource_type(),
                Action::Delete,
                deltas,
            ))
        }));
        into_outcome(name, result, Vec::new())
    }
}

type TaskResult = std::result::Result<ChangeDescriptor, TaskError>;

fn into_outcome(
    name: &str,
    result: std::thread::Result<TaskResult>,
    warnings: Vec<String>,
) -> TaskOutcome {
    match result {
        Ok(Ok(change)) => {
            log::debug!("{name}: {}", change.action);
            TaskOutcome::Succeeded { change, warnings }
        }
        Ok(Err(TaskError::InsufficientAccess(message))) => {
            log::warn!("{name}: skipped, {message}");
            TaskOutcome::Skipped {
                cause: SkipCause::InsufficientAccess { message },
            }
        }
        Ok(Err(error)) => {
            log::debug!("{name}: {error}");
            TaskOutcome::Failed { error }
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            log::debug!("{name}: panicked: {message}");
            TaskOutcome::Failed {
                error: TaskError::Panicked(message),
            }
        }
    }
}

fn missing(name: &str) -> TaskOutcome {
    TaskOutcome::Failed {
        error: TaskError::Apply(anyhow::anyhow!("task {name} is not part of the run")),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn log_finished(what: &str, report: &RunReport) {
    let summary = report.summary();
    log::info!(
        "{what} finished: {} change(s), {} unchanged, {} failed, {} skipped",
        summary.total_changes(),
        summary.unchanged,
        summary.failed,
        summary.skipped
    );
}

/// Run `tasks` against `target` with the given options
pub fn run_tasks<C: Sync + 'static>(
    cloud: &C,
    target: &dyn Target<C>,
    tasks: &TaskSet<C>,
    options: RunOptions,
) -> Result<RunReport> {
    RunContext::new(cloud, target)
        .with_options(options)
        .run_tasks(tasks)
}

/// Re-run `tasks` as a dry run and require that nothing would change.
///
/// Fails with [`Error::Incomplete`] if any task fails, or
/// [`Error::UnexpectedChanges`] listing the recorded changes.
pub fn check_no_changes<C: Sync + 'static>(
    cloud: &C,
    tasks: &TaskSet<C>,
    options: RunOptions,
) -> Result<()> {
    let target = DryRunTarget::new();
    let report = run_tasks(cloud, &target, tasks, options)?;
    report.ensure_success()?;

    let changes = target.changes();
    if !changes.is_empty() {
        return Err(Error::UnexpectedChanges(changes));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CancelToken, ProgressCallback};
    use crate::error::ConfigurationError;
    use crate::target::{ApiTarget, Render};
    use crate::task::{Deletion, TaskRef};
    use crate::types::{BlockReason, Lifecycle};
    use std::sync::{Arc, Mutex};

    /// Provider stand-in: an append-only journal of provider calls
    type Journal = Mutex<Vec<String>>;

    fn entries(journal: &Journal) -> Vec<String> {
        journal.lock().unwrap().clone()
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Mode {
        Converged,
        Create,
        Warn,
        Fail,
        Panic,
        Denied,
    }

    #[derive(Debug)]
    struct Step {
        name: String,
        mode: Mode,
        lifecycle: Lifecycle,
        deps: Mutex<Vec<TaskRef<Journal>>>,
        invalid: bool,
    }

    impl Step {
        fn new(name: &str, mode: Mode) -> Arc<Self> {
            Self::build(name, mode, Lifecycle::Sync, false)
        }

        fn build(name: &str, mode: Mode, lifecycle: Lifecycle, invalid: bool) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                mode,
                lifecycle,
                deps: Mutex::new(Vec::new()),
                invalid,
            })
        }

        fn depends_on(&self, other: &Arc<Step>) {
            self.deps.lock().unwrap().push(TaskRef::from(Arc::clone(other)));
        }
    }

    impl Render<Journal> for Step {
        fn render(&self, cloud: &Journal, change: &ChangeDescriptor) -> anyhow::Result<()> {
            cloud
                .lock()
                .unwrap()
                .push(format!("{} {}", change.action, self.name));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Leftover(String);

    impl Deletion<Journal> for Leftover {
        fn resource_type(&self) -> &'static str {
            "leftover"
        }

        fn item(&self) -> String {
            self.0.clone()
        }

        fn delete(&self, cloud: &Journal) -> anyhow::Result<()> {
            cloud.lock().unwrap().push(format!("delete {}", self.0));
            Ok(())
        }
    }

    impl Task<Journal> for Step {
        fn name(&self) -> &str {
            &self.name
        }

        fn resource_type(&self) -> &'static str {
            "step"
        }

        fn lifecycle(&self) -> Lifecycle {
            self.lifecycle
        }

        fn dependencies(&self) -> Vec<TaskRef<Journal>> {
            self.deps.lock().unwrap().clone()
        }

        fn validate(&self) -> std::result::Result<(), ConfigurationError> {
            if self.invalid {
                return Err(ConfigurationError::InvalidTask {
                    task: self.name.clone(),
                    message: "bad config".into(),
                });
            }
            Ok(())
        }

        fn run(
            &self,
            ctx: &TaskContext<'_, Journal>,
        ) -> std::result::Result<ChangeDescriptor, TaskError> {
            ctx.cloud().lock().unwrap().push(format!("run {}", self.name));
            match self.mode {
                Mode::Converged => Ok(ChangeDescriptor::no_change(&self.name, "step")),
                Mode::Create => {
                    let change = ChangeDescriptor::new(&self.name, "step", Action::Create, Vec::new());
                    ctx.target()
                        .render(ctx.cloud(), &change, self)
                        .map_err(TaskError::Apply)?;
                    Ok(change)
                }
                Mode::Warn => {
                    ctx.warn("tags drifted");
                    Ok(ChangeDescriptor::no_change(&self.name, "step"))
                }
                Mode::Fail => Err(TaskError::Apply(anyhow::anyhow!("provider rejected request"))),
                Mode::Panic => panic!("step {} exploded", self.name),
                Mode::Denied => Err(TaskError::InsufficientAccess("GetRole denied".into())),
            }
        }

        fn find_deletions(
            &self,
            _cloud: &Journal,
            _tasks: &TaskSet<Journal>,
        ) -> anyhow::Result<Vec<Box<dyn Deletion<Journal>>>> {
            Ok(vec![Box::new(Leftover(format!("{}-extra", self.name)))])
        }
    }

    fn set(steps: &[&Arc<Step>]) -> TaskSet<Journal> {
        let mut tasks = TaskSet::new();
        for step in steps {
            tasks.insert(Arc::clone(step)).unwrap();
        }
        tasks
    }

    fn api_run(journal: &Journal, tasks: &TaskSet<Journal>) -> Result<RunReport> {
        run_tasks(journal, &ApiTarget, tasks, RunOptions::default())
    }

    #[test]
    fn test_successful_run_report() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Create);
        let sg = Step::new("sg", Mode::Converged);
        sg.depends_on(&vpc);

        let report = api_run(&journal, &set(&[&sg, &vpc])).unwrap();
        assert!(report.is_success());
        assert!(report.ensure_success().is_ok());
        assert_eq!(report.state("vpc"), Some(TaskState::Succeeded));
        assert_eq!(report.changes().len(), 1);
        assert_eq!(report.summary().created, 1);
        assert_eq!(report.summary().unchanged, 1);
        assert_eq!(entries(&journal), vec!["run vpc", "create vpc", "run sg"]);
    }

    #[test]
    fn test_cycle_rejected_before_any_task_runs() {
        let journal = Journal::default();
        let a = Step::new("a", Mode::Converged);
        let b = Step::new("b", Mode::Converged);
        a.depends_on(&b);
        b.depends_on(&a);

        let err = api_run(&journal, &set(&[&a, &b])).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::Cycle { .. })
        ));
        assert!(entries(&journal).is_empty());

        a.deps.lock().unwrap().clear();
        b.deps.lock().unwrap().clear();
    }

    #[test]
    fn test_invalid_task_rejected_before_any_task_runs() {
        let journal = Journal::default();
        let good = Step::new("good", Mode::Create);
        let bad = Step::build("bad", Mode::Create, Lifecycle::Sync, true);

        let err = api_run(&journal, &set(&[&good, &bad])).unwrap_err();
        assert!(matches!(
            err,
            Error::Configuration(ConfigurationError::InvalidTask { .. })
        ));
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn test_failure_isolated_to_its_branch() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Fail);
        let sg = Step::new("sg", Mode::Create);
        let role = Step::new("role", Mode::Create);
        sg.depends_on(&vpc);

        let report = api_run(&journal, &set(&[&vpc, &sg, &role])).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.state("role"), Some(TaskState::Succeeded));
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].0, "vpc");
        assert_eq!(report.skipped().len(), 1);
        assert_eq!(report.skipped()[0].1.blocked_by(), Some("vpc"));
        assert!(!entries(&journal).contains(&"run sg".to_string()));

        let err = report.ensure_success().unwrap_err();
        assert!(matches!(
            err,
            Error::Incomplete {
                failed: 1,
                skipped: 1
            }
        ));
    }

    #[test]
    fn test_panic_becomes_failed_task() {
        let journal = Journal::default();
        let boom = Step::new("boom", Mode::Panic);
        let after = Step::new("after", Mode::Converged);
        let other = Step::new("other", Mode::Converged);
        after.depends_on(&boom);

        let report = api_run(&journal, &set(&[&boom, &after, &other])).unwrap();
        match report.outcome("boom") {
            Some(TaskOutcome::Failed {
                error: TaskError::Panicked(message),
            }) => assert_eq!(message, "step boom exploded"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(report.state("after"), Some(TaskState::Skipped));
        assert_eq!(report.state("other"), Some(TaskState::Succeeded));
    }

    #[test]
    fn test_warnings_are_collected() {
        let journal = Journal::default();
        let drifted = Step::new("drifted", Mode::Warn);
        let denied = Step::build("denied", Mode::Denied, Lifecycle::WarnIfInsufficientAccess, false);

        let report = api_run(&journal, &set(&[&drifted, &denied])).unwrap();
        assert!(report.is_success());
        assert_eq!(
            report.warnings(),
            vec![("drifted", "tags drifted"), ("denied", "GetRole denied")]
        );
        assert!(report.outcome("drifted").unwrap().is_tainted());
        assert_eq!(report.summary().warnings, 2);
    }

    #[test]
    fn test_tainted_dependency_policy() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Warn);
        let sg = Step::new("sg", Mode::Converged);
        sg.depends_on(&vpc);
        let tasks = set(&[&vpc, &sg]);

        let report = api_run(&journal, &tasks).unwrap();
        assert_eq!(report.state("sg"), Some(TaskState::Succeeded));

        let options = RunOptions {
            block_on_tainted_dependencies: true,
            ..RunOptions::default()
        };
        let report = run_tasks(&journal, &ApiTarget, &tasks, options).unwrap();
        match report.outcome("sg") {
            Some(TaskOutcome::Skipped {
                cause: SkipCause::Blocked { reason, .. },
            }) => assert_eq!(*reason, BlockReason::Tainted),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_dry_run_records_without_provider_calls() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Create);
        let target = DryRunTarget::new();

        let report = run_tasks(&journal, &target, &set(&[&vpc]), RunOptions::default()).unwrap();
        assert!(report.is_success());
        assert_eq!(target.changes().len(), 1);
        assert_eq!(entries(&journal), vec!["run vpc"]);
    }

    #[test]
    fn test_check_no_changes() {
        let journal = Journal::default();
        let converged = Step::new("vpc", Mode::Converged);
        assert!(check_no_changes(&journal, &set(&[&converged]), RunOptions::default()).is_ok());

        let pending = Step::new("vpc", Mode::Create);
        let err = check_no_changes(&journal, &set(&[&pending]), RunOptions::default()).unwrap_err();
        match err {
            Error::UnexpectedChanges(changes) => {
                assert_eq!(changes.len(), 1);
                assert_eq!(changes[0].task, "vpc");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_deletions_run_in_reverse_order() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Converged);
        let sg = Step::new("sg", Mode::Converged);
        let kept = Step::build("kept", Mode::Converged, Lifecycle::ExistsAndValidates, false);
        sg.depends_on(&vpc);
        kept.depends_on(&sg);

        let options = RunOptions {
            workers: 1,
            ..RunOptions::default()
        };
        let report = RunContext::new(&journal, &ApiTarget)
            .with_options(options)
            .run_deletions(&set(&[&vpc, &sg, &kept]))
            .unwrap();

        assert!(report.is_success());
        assert_eq!(entries(&journal), vec!["delete sg-extra", "delete vpc-extra"]);
        assert_eq!(report.summary().deleted, 2);
        assert!(report.outcome("kept").unwrap().change().unwrap().is_no_change());
        let change = report.outcome("sg").unwrap().change().unwrap();
        assert_eq!(change.action, Action::Delete);
        assert_eq!(change.deltas[0].actual.as_deref(), Some("sg-extra"));
    }

    #[test]
    fn test_cancelled_before_start_skips_everything() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Create);
        let cancel = CancelToken::new();
        cancel.cancel();

        let report = RunContext::new(&journal, &ApiTarget)
            .with_cancel(cancel)
            .run_tasks(&set(&[&vpc]))
            .unwrap();
        assert_eq!(report.interrupt(), Some(Interrupt::Cancelled));
        assert_eq!(report.state("vpc"), Some(TaskState::Skipped));
        assert!(!report.is_success());
        assert!(entries(&journal).is_empty());
    }

    #[derive(Default)]
    struct Completions(Mutex<Vec<(String, TaskState)>>);

    impl ProgressCallback for Completions {
        fn on_complete(&self, task: &str, outcome: &TaskOutcome) {
            self.0.lock().unwrap().push((task.to_string(), outcome.state()));
        }
    }

    #[test]
    fn test_progress_reports_every_completion() {
        let journal = Journal::default();
        let vpc = Step::new("vpc", Mode::Fail);
        let sg = Step::new("sg", Mode::Create);
        sg.depends_on(&vpc);
        let progress = Completions::default();

        RunContext::new(&journal, &ApiTarget)
            .with_progress(&progress)
            .run_tasks(&set(&[&vpc, &sg]))
            .unwrap();

        let completed = progress.0.into_inner().unwrap();
        assert_eq!(
            completed,
            vec![
                ("vpc".to_string(), TaskState::Failed),
                ("sg".to_string(), TaskState::Skipped),
            ]
        );
    }
}
