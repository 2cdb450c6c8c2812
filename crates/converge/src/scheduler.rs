//! Dependency-count scheduler over a task graph
//!
//! Workers pull ready tasks from one shared queue. A task is queued the
//! moment its last dependency settles in a way that satisfies it; there is
//! no layer barrier. The board lock only guards bookkeeping and is released
//! while a task runs.

use crate::context::{CancelToken, ProgressCallback};
use crate::error::Result;
use crate::graph::TaskGraph;
use crate::types::{BlockReason, Interrupt, RunOptions, SkipCause, TaskOutcome, TaskState};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

/// Final outcomes of a scheduled run, in graph insertion order
pub(crate) struct Execution {
    pub outcomes: Vec<(String, TaskOutcome)>,
    pub interrupt: Option<Interrupt>,
}

pub(crate) struct Scheduler<'a> {
    graph: &'a TaskGraph,
    options: &'a RunOptions,
    cancel: &'a CancelToken,
    progress: &'a dyn ProgressCallback,
}

/// Shared scheduler state guarded by one mutex
struct Board {
    ready: VecDeque<usize>,
    /// Dependencies not yet settled in a satisfying way
    waiting: Vec<usize>,
    states: Vec<TaskState>,
    settled: Vec<Option<TaskOutcome>>,
    running: usize,
    interrupt: Option<Interrupt>,
}

struct Shared {
    board: Mutex<Board>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Board> {
        match self.board.lock() {
            Ok(board) => board,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<'a> Scheduler<'a> {
    pub fn new(
        graph: &'a TaskGraph,
        options: &'a RunOptions,
        cancel: &'a CancelToken,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            graph,
            options,
            cancel,
            progress,
        }
    }

    /// Run every task through `work`, respecting dependency order.
    ///
    /// `work` must not panic; callers catch task panics themselves.
    pub fn execute<F>(&self, work: F) -> Result<Execution>
    where
        F: Fn(&str) -> TaskOutcome + Sync,
    {
        let count = self.graph.len();
        let deadline = self.options.timeout.map(|budget| Instant::now() + budget);

        let mut board = Board {
            ready: VecDeque::new(),
            waiting: (0..count).map(|n| self.graph.dependency_count(n)).collect(),
            states: vec![TaskState::Pending; count],
            settled: (0..count).map(|_| None).collect(),
            running: 0,
            interrupt: None,
        };
        for node in 0..count {
            self.progress.on_transition(&self.graph.nodes()[node], TaskState::Pending);
        }
        for node in 0..count {
            if board.waiting[node] == 0 {
                self.make_ready(&mut board, node);
            }
        }

        let shared = Shared {
            board: Mutex::new(board),
            wake: Condvar::new(),
        };

        if count > 0 {
            let workers = self.options.workers.clamp(1, count);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("converge-worker-{i}"))
                .build()?;
            log::debug!("scheduling {count} task(s) on {workers} worker(s)");

            pool.scope(|scope| {
                for _ in 0..workers {
                    scope.spawn(|_| self.worker(&shared, &work, deadline));
                }
            });
        }

        let mut board = match shared.board.into_inner() {
            Ok(board) => board,
            Err(poisoned) => poisoned.into_inner(),
        };
        let interrupt = board.interrupt;

        let mut outcomes = Vec::with_capacity(count);
        for node in 0..count {
            let name = &self.graph.nodes()[node];
            let outcome = match board.settled[node].take() {
                Some(outcome) => outcome,
                None => {
                    let outcome = TaskOutcome::Skipped {
                        cause: SkipCause::Interrupted(interrupt.unwrap_or(Interrupt::Cancelled)),
                    };
                    self.progress.on_transition(name, TaskState::Skipped);
                    self.progress.on_complete(name, &outcome);
                    outcome
                }
            };
            outcomes.push((name.clone(), outcome));
        }

        Ok(Execution {
            outcomes,
            interrupt,
        })
    }

    fn worker<F>(&self, shared: &Shared, work: &F, deadline: Option<Instant>)
    where
        F: Fn(&str) -> TaskOutcome + Sync,
    {
        let mut board = shared.lock();
        loop {
            if board.interrupt.is_none()
                && let Some(interrupt) = self.check_interrupt(deadline)
            {
                log::warn!("{interrupt}: no further tasks will start");
                board.interrupt = Some(interrupt);
                shared.wake.notify_all();
            }
            if board.interrupt.is_some() {
                break;
            }

            if let Some(node) = board.ready.pop_front() {
                board.running += 1;
                self.transition(&mut board, node, TaskState::Running);
                drop(board);

                let outcome = work(&self.graph.nodes()[node]);

                board = shared.lock();
                board.running -= 1;
                self.settle(&mut board, node, outcome);
                shared.wake.notify_all();
                continue;
            }

            if board.running == 0 {
                break;
            }

            board = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match shared.wake.wait_timeout(board, remaining) {
                        Ok((board, _)) => board,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => match shared.wake.wait(board) {
                    Ok(board) => board,
                    Err(poisoned) => poisoned.into_inner(),
                },
            };
        }
    }

    fn check_interrupt(&self, deadline: Option<Instant>) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::Cancelled)
        } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            Some(Interrupt::TimedOut)
        } else {
            None
        }
    }

    fn transition(&self, board: &mut Board, node: usize, state: TaskState) {
        board.states[node] = state;
        self.progress.on_transition(&self.graph.nodes()[node], state);
    }

    fn make_ready(&self, board: &mut Board, node: usize) {
        self.transition(board, node, TaskState::Ready);
        board.ready.push_back(node);
    }

    fn finish(&self, board: &mut Board, node: usize, outcome: TaskOutcome) {
        let name = &self.graph.nodes()[node];
        debug_assert!(!board.states[node].is_terminal(), "{name} settled twice");
        self.transition(board, node, outcome.state());
        self.progress.on_complete(name, &outcome);
        board.settled[node] = Some(outcome);
    }

    /// Record a finished task and release or block its dependents
    fn settle(&self, board: &mut Board, node: usize, outcome: TaskOutcome) {
        let blocking = self.blocking_reason(&outcome);
        self.finish(board, node, outcome);

        match blocking {
            None => {
                for dependent in self.graph.dependent_indices(node) {
                    board.waiting[dependent] -= 1;
                    if board.waiting[dependent] == 0
                        && board.states[dependent] == TaskState::Pending
                    {
                        self.make_ready(board, dependent);
                    }
                }
            }
            Some(reason) => self.block_dependents(board, node, reason),
        }
    }

    /// Why `outcome` keeps dependents from running, `None` if it does not
    fn blocking_reason(&self, outcome: &TaskOutcome) -> Option<BlockReason> {
        match outcome {
            TaskOutcome::Succeeded { warnings, .. } => {
                if !warnings.is_empty() && self.options.block_on_tainted_dependencies {
                    Some(BlockReason::Tainted)
                } else {
                    None
                }
            }
            TaskOutcome::Skipped {
                cause: SkipCause::InsufficientAccess { .. },
            } if self.options.tolerate_skipped_dependencies => None,
            TaskOutcome::Skipped { .. } => Some(BlockReason::Skipped),
            TaskOutcome::Failed { .. } => Some(BlockReason::Failed),
        }
    }

    /// Skip every transitive dependent of `root`, recording the chain back
    /// to it
    fn block_dependents(&self, board: &mut Board, root: usize, reason: BlockReason) {
        let root_name = self.graph.nodes()[root].clone();
        let mut stack: Vec<(usize, Vec<String>)> = self
            .graph
            .dependent_indices(root)
            .map(|dependent| (dependent, vec![root_name.clone()]))
            .collect();
        stack.reverse();

        while let Some((node, chain)) = stack.pop() {
            if board.states[node] != TaskState::Pending {
                continue;
            }
            let name = &self.graph.nodes()[node];
            log::debug!("{name}: skipped, blocked by {reason} dependency {root_name}");

            let mut next_chain = Vec::with_capacity(chain.len() + 1);
            next_chain.push(name.clone());
            next_chain.extend(chain.iter().cloned());
            let mut next: Vec<(usize, Vec<String>)> = self
                .graph
                .dependent_indices(node)
                .map(|dependent| (dependent, next_chain.clone()))
                .collect();
            next.reverse();

            self.finish(
                board,
                node,
                TaskOutcome::Skipped {
                    cause: SkipCause::Blocked { chain, reason },
                },
            );
            stack.extend(next);
        }
    }
}
