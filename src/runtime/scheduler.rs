//! Step chain scheduling and the worker pool seam
//!
//! An agent's work is a chain of typed steps (start → execute → …). The chain
//! is driven by a pure transition function; the `StepChain` cursor makes sure
//! at most one step per agent is scheduled or running at any time and that a
//! step task runs at most once. Steps themselves run on a `WorkerPool`
//! supplied by the host.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::agent::AgentState;
use super::error::StepError;

/// Kind of action step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    /// Activate roles and enter the execute loop
    Start,
    /// Dispatch queued events and run the agent behaviour
    Execute,
}

/// Successor of a step that completed without fault.
///
/// Nothing is scheduled unless the agent is active. `Start` always leads to
/// `Execute`; `Execute` repeats only while events are pending, otherwise the
/// chain parks until new work arrives.
pub fn next_step(step: Step, state: AgentState, pending_events: bool) -> Option<Step> {
    if state != AgentState::Active {
        return None;
    }
    match step {
        Step::Start => Some(Step::Execute),
        Step::Execute => pending_events.then_some(Step::Execute),
    }
}

/// Policy applied when a step faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultPolicy {
    /// Leave the chain halted until an operator restarts it
    #[default]
    Halt,
    /// Schedule a fresh execute step, up to a consecutive-fault limit
    Restart,
}

/// Successor of a step that faulted
pub fn next_after_fault(
    policy: FaultPolicy,
    state: AgentState,
    consecutive_faults: u32,
    max_consecutive_faults: u32,
) -> Option<Step> {
    match policy {
        FaultPolicy::Restart
            if state == AgentState::Active && consecutive_faults < max_consecutive_faults =>
        {
            Some(Step::Execute)
        }
        _ => None,
    }
}

/// Record of a step fault, kept for inspection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFault {
    /// Sequence number of the failed task
    pub seq: u64,
    /// Step kind
    pub step: Step,
    /// Error rendering
    pub detail: String,
    /// Whether the step panicked
    pub panicked: bool,
    /// When the fault was observed
    pub at: DateTime<Utc>,
}

impl StepFault {
    fn from_error(seq: u64, error: &StepError) -> Self {
        let (step, detail, panicked) = match error {
            StepError::Failed { step, detail } => (*step, detail.clone(), false),
            StepError::Panicked { step, detail } => (*step, detail.clone(), true),
        };
        Self {
            seq,
            step,
            detail,
            panicked,
            at: Utc::now(),
        }
    }
}

/// A scheduled step instance. Not `Clone`: running consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct StepTask {
    /// Chain-local sequence number
    pub seq: u64,
    /// Step kind
    pub step: Step,
}

/// Position of an agent's step chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCursor {
    /// No step has been scheduled yet
    Idle,
    /// A task is queued on the pool
    Scheduled(u64),
    /// A task is running
    Running(u64),
    /// Waiting for new events, suspension to end, or both
    Parked,
    /// Stopped by a step fault
    Halted,
    /// Agent terminated; nothing will be scheduled again
    Finished,
}

#[derive(Debug)]
struct ChainState {
    cursor: ChainCursor,
    next_seq: u64,
    consecutive_faults: u32,
    faults: Vec<StepFault>,
}

/// Cursor and bookkeeping for one agent's step chain
#[derive(Debug)]
pub struct StepChain {
    state: Mutex<ChainState>,
}

impl StepChain {
    /// Create a chain that has not started
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState {
                cursor: ChainCursor::Idle,
                next_seq: 0,
                consecutive_faults: 0,
                faults: Vec::new(),
            }),
        }
    }

    /// Current cursor
    pub fn cursor(&self) -> ChainCursor {
        self.state.lock().cursor
    }

    /// Faults recorded so far, oldest first
    pub fn faults(&self) -> Vec<StepFault> {
        self.state.lock().faults.clone()
    }

    /// Schedule `step` if the chain is resting in one of `from`.
    ///
    /// `agent_state` is evaluated under the chain lock; nothing is scheduled
    /// unless it reports `Active`.
    pub fn arm(
        &self,
        step: Step,
        from: &[ChainCursor],
        agent_state: impl FnOnce() -> AgentState,
    ) -> Option<StepTask> {
        let mut chain = self.state.lock();
        if !from.contains(&chain.cursor) || agent_state() != AgentState::Active {
            return None;
        }
        Some(chain.schedule(step))
    }

    /// Like `arm`, but a chain resting in one of `from` while the agent is
    /// suspended moves to `Parked`, so that `resume` picks it up.
    pub fn arm_or_park(
        &self,
        step: Step,
        from: &[ChainCursor],
        agent_state: impl FnOnce() -> AgentState,
    ) -> Option<StepTask> {
        let mut chain = self.state.lock();
        if !from.contains(&chain.cursor) {
            return None;
        }
        match agent_state() {
            AgentState::Active => Some(chain.schedule(step)),
            AgentState::Suspended => {
                chain.cursor = ChainCursor::Parked;
                None
            }
            _ => None,
        }
    }

    /// Mark a task as running. Returns false when the task is stale or the
    /// agent is no longer active, in which case the task must be dropped.
    pub fn begin(&self, task: &StepTask, agent_state: AgentState) -> bool {
        let mut chain = self.state.lock();
        if chain.cursor != ChainCursor::Scheduled(task.seq) {
            return false;
        }
        match agent_state {
            AgentState::Active => {
                chain.cursor = ChainCursor::Running(task.seq);
                true
            }
            AgentState::Terminated => {
                chain.cursor = ChainCursor::Finished;
                false
            }
            _ => {
                chain.cursor = ChainCursor::Parked;
                false
            }
        }
    }

    /// Record a finished task and decide its successor.
    ///
    /// The closures are evaluated under the chain lock so that a concurrent
    /// `arm` either sees this task still running or sees the final cursor.
    pub fn finish(
        &self,
        task: StepTask,
        outcome: Result<(), StepError>,
        policy: FaultPolicy,
        max_consecutive_faults: u32,
        agent_state: impl FnOnce() -> AgentState,
        pending_events: impl FnOnce() -> bool,
    ) -> Option<StepTask> {
        let mut chain = self.state.lock();
        if chain.cursor != ChainCursor::Running(task.seq) {
            return None;
        }
        let state = agent_state();

        let next = match outcome {
            Ok(()) => {
                chain.consecutive_faults = 0;
                next_step(task.step, state, pending_events())
            }
            Err(error) => {
                chain.consecutive_faults += 1;
                chain.faults.push(StepFault::from_error(task.seq, &error));
                tracing::error!(
                    step = ?task.step,
                    seq = task.seq,
                    consecutive = chain.consecutive_faults,
                    "step fault: {error}"
                );
                let next = next_after_fault(
                    policy,
                    state,
                    chain.consecutive_faults,
                    max_consecutive_faults,
                );
                if next.is_none() && state != AgentState::Terminated {
                    // A restartable fault seen while suspended waits for resume.
                    let retry_on_resume = policy == FaultPolicy::Restart
                        && state == AgentState::Suspended
                        && chain.consecutive_faults < max_consecutive_faults;
                    chain.cursor = if retry_on_resume {
                        ChainCursor::Parked
                    } else {
                        ChainCursor::Halted
                    };
                    return None;
                }
                next
            }
        };

        match next {
            Some(step) => Some(chain.schedule(step)),
            None => {
                chain.cursor = if state == AgentState::Terminated {
                    ChainCursor::Finished
                } else {
                    ChainCursor::Parked
                };
                None
            }
        }
    }

    /// Terminal transition; pending tasks become stale
    pub fn finish_chain(&self) {
        let mut chain = self.state.lock();
        if !matches!(chain.cursor, ChainCursor::Running(_)) {
            chain.cursor = ChainCursor::Finished;
        }
    }
}

impl Default for StepChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainState {
    fn schedule(&mut self, step: Step) -> StepTask {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.cursor = ChainCursor::Scheduled(seq);
        StepTask { seq, step }
    }
}

/// Unit of work submitted to a worker pool
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Shared executor supplied by the hosting environment
pub trait WorkerPool: Send + Sync {
    /// Run `job` at some later point on some worker
    fn submit(&self, job: Job);
}

impl WorkerPool for tokio::runtime::Handle {
    fn submit(&self, job: Job) {
        // Step work is synchronous user code; keep it off the async workers.
        drop(self.spawn_blocking(job));
    }
}

/// Pool that queues jobs until the host runs them explicitly.
///
/// Useful for hosts that drive agents from their own loop, and for tests
/// that need to observe exactly which steps were scheduled.
#[derive(Default)]
pub struct ManualPool {
    jobs: Mutex<VecDeque<Job>>,
}

impl ManualPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued jobs
    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Run the oldest queued job. Returns false if none was queued.
    pub fn run_next(&self) -> bool {
        let job = self.jobs.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run queued jobs, including ones they enqueue, up to `limit` jobs.
    /// Returns the number of jobs run.
    pub fn run(&self, limit: usize) -> usize {
        let mut ran = 0;
        while ran < limit && self.run_next() {
            ran += 1;
        }
        ran
    }
}

impl WorkerPool for ManualPool {
    fn submit(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}
