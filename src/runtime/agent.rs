//! Agents: lifecycle state machine and composition root
//!
//! An agent owns its role registry, goal base, event queue, event bus and
//! step chain. Every state change inside the agent lands in the event queue;
//! the execute step drains the queue through the bus. Emitting an event
//! re-arms a parked chain, so work arriving from any thread is picked up
//! without the caller running agent logic inline.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use super::AgentConfig;
use super::bus::{DispatchReport, EventBinding, EventBus};
use super::error::{AgentError, AgentResult, StepError, StepResult, panic_detail};
use super::event::{Event, EventQueue, EventSink, EventType};
use super::goal::{Goal, GoalBase};
use super::ids::AgentId;
use super::message::{self, AclMessage};
use super::role::{RoleRef, RoleRegistry};
use super::scheduler::{ChainCursor, Step, StepChain, StepFault, StepTask, WorkerPool};
use super::transport::Transport;

/// Lifecycle state of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    /// Built, not started
    Created,
    /// Running its step chain
    Active,
    /// Temporarily not scheduling steps
    Suspended,
    /// Stopped for good
    Terminated,
}

/// Per-step work of an agent, run by every execute step after queued events
/// have been dispatched. An error or panic is a step fault.
pub trait StepBehaviour: Send + Sync {
    /// Perform one step of work
    fn on_execute(&self, agent: &Agent) -> anyhow::Result<()>;
}

impl<F> StepBehaviour for F
where
    F: Fn(&Agent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_execute(&self, agent: &Agent) -> anyhow::Result<()> {
        self(agent)
    }
}

/// Event sink that queues on the agent and re-arms its chain
struct AgentSink {
    queue: Arc<EventQueue>,
    agent: Weak<Agent>,
}

impl EventSink for AgentSink {
    fn emit(&self, event: Event) {
        self.queue.push(event);
        if let Some(agent) = self.agent.upgrade() {
            agent.wake();
        }
    }
}

/// A long-lived agent
pub struct Agent {
    id: AgentId,
    config: AgentConfig,
    state: RwLock<AgentState>,
    events: Arc<EventQueue>,
    sink: Arc<AgentSink>,
    roles: RoleRegistry,
    goals: GoalBase,
    bus: EventBus<Agent>,
    chain: StepChain,
    pool: Arc<dyn WorkerPool>,
    transport: Option<Arc<dyn Transport>>,
    behaviour: Option<Arc<dyn StepBehaviour>>,
    this: Weak<Agent>,
}

impl Agent {
    /// Start building an agent whose steps run on `pool`
    pub fn builder(pool: Arc<dyn WorkerPool>) -> AgentBuilder {
        AgentBuilder::new(pool)
    }

    /// Agent identifier
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    /// ACL name of this agent
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    /// Role registry
    pub fn roles(&self) -> &RoleRegistry {
        &self.roles
    }

    /// Snapshot of held roles
    pub fn get_roles(&self) -> Vec<RoleRef> {
        self.roles.roles()
    }

    /// Goal base
    pub fn goals(&self) -> &GoalBase {
        &self.goals
    }

    /// Event bus
    pub fn bus(&self) -> &EventBus<Agent> {
        &self.bus
    }

    /// Number of events waiting for dispatch
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Position of the step chain
    pub fn chain_cursor(&self) -> ChainCursor {
        self.chain.cursor()
    }

    /// Step faults recorded so far
    pub fn step_faults(&self) -> Vec<StepFault> {
        self.chain.faults()
    }

    /// Start the agent: CREATED → ACTIVE, activate held roles, schedule the
    /// first execute step.
    ///
    /// A failure while activating is contained: it is logged, the agent goes
    /// back to CREATED and the error is returned.
    pub fn start(&self) -> AgentResult<()> {
        self.transition("start", &[AgentState::Created], AgentState::Active)?;

        if let Err(err) = self.run_contained(Step::Start) {
            let mut state = self.state.write();
            if *state == AgentState::Active {
                *state = AgentState::Created;
            }
            tracing::error!(agent = %self.id, "agent failed to start: {err}");
            return Err(AgentError::Activation(err.detail().to_string()));
        }

        tracing::info!(agent = %self.id, name = %self.config.name, "agent started");
        if let Some(step) = super::scheduler::next_step(Step::Start, AgentState::Active, false) {
            // Suspended while starting: park, so resume schedules the first step.
            if let Some(task) = self.chain.arm_or_park(step, &[ChainCursor::Idle], || self.state()) {
                self.submit(task);
            }
        }
        Ok(())
    }

    /// Stop the agent: ACTIVE or SUSPENDED → TERMINATED.
    ///
    /// A step already running completes; nothing is scheduled after it.
    pub fn stop(&self) -> AgentResult<()> {
        self.transition(
            "stop",
            &[AgentState::Active, AgentState::Suspended],
            AgentState::Terminated,
        )?;
        self.chain.finish_chain();
        tracing::info!(agent = %self.id, "agent stopped");
        Ok(())
    }

    /// Suspend the agent: ACTIVE → SUSPENDED. The chain parks after the
    /// running step, if any.
    pub fn suspend(&self) -> AgentResult<()> {
        self.transition("suspend", &[AgentState::Active], AgentState::Suspended)?;
        tracing::info!(agent = %self.id, "agent suspended");
        Ok(())
    }

    /// Resume the agent: SUSPENDED → ACTIVE, re-arming a parked chain.
    pub fn resume(&self) -> AgentResult<()> {
        self.transition("resume", &[AgentState::Suspended], AgentState::Active)?;
        tracing::info!(agent = %self.id, "agent resumed");
        self.arm_from(&[ChainCursor::Parked]);
        Ok(())
    }

    /// Re-arm a chain halted by a step fault. Returns whether a step was
    /// scheduled.
    pub fn restart_chain(&self) -> bool {
        let restarted = self.arm_from(&[ChainCursor::Halted]);
        if restarted {
            tracing::info!(agent = %self.id, "step chain restarted");
        }
        restarted
    }

    /// Decode one wire frame and queue it as a `MessageReceived` event.
    ///
    /// Returns as soon as the event is queued; handlers run on the step
    /// chain. Undecodable frames are dropped and reported as errors.
    pub fn receive_message(&self, text: &str) -> AgentResult<()> {
        let message = match message::decode(text) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(agent = %self.id, "dropping undecodable message: {err}");
                return Err(err.into());
            }
        };

        let state = self.state();
        if state == AgentState::Terminated {
            return Err(AgentError::InvalidTransition {
                operation: "deliver to",
                state,
            });
        }

        tracing::debug!(
            agent = %self.id,
            performative = %message.performative,
            sender = %message.sender,
            "message received"
        );
        self.sink.emit(Event::message_received(message));
        Ok(())
    }

    /// Encode a message and hand it to the transport. An empty sender is
    /// filled with this agent's name.
    pub fn send_message(&self, mut message: AclMessage) -> AgentResult<()> {
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| AgentError::Send("no transport configured".to_string()))?;

        if message.sender.is_empty() {
            message.sender = self.config.name.clone();
        }
        let text = message::encode(&message)
            .map_err(|err| AgentError::Send(format!("encoding failed: {err}")))?;
        transport
            .send(&message.receiver, text)
            .map_err(|err| AgentError::Send(format!("{err:#}")))?;

        tracing::debug!(
            agent = %self.id,
            performative = %message.performative,
            receiver = %message.receiver,
            "message sent"
        );
        Ok(())
    }

    /// Dispatch an event synchronously on the calling thread
    pub fn fire(&self, event: &Event) -> DispatchReport {
        self.bus.fire(self, event)
    }

    /// Queue an event for dispatch by the step chain
    pub fn post(&self, event: Event) {
        self.sink.emit(event);
    }

    fn transition(
        &self,
        operation: &'static str,
        from: &[AgentState],
        to: AgentState,
    ) -> AgentResult<()> {
        let mut state = self.state.write();
        if !from.contains(&*state) {
            return Err(AgentError::InvalidTransition {
                operation,
                state: *state,
            });
        }
        *state = to;
        Ok(())
    }

    fn wake(&self) {
        self.arm_from(&[ChainCursor::Parked]);
    }

    fn arm_from(&self, from: &[ChainCursor]) -> bool {
        match self.chain.arm(Step::Execute, from, || self.state()) {
            Some(task) => {
                self.submit(task);
                true
            }
            None => false,
        }
    }

    fn submit(&self, task: StepTask) {
        let Some(agent) = self.this.upgrade() else {
            return;
        };
        tracing::debug!(agent = %self.id, step = ?task.step, seq = task.seq, "step scheduled");
        self.pool.submit(Box::new(move || agent.run_task(task)));
    }

    fn run_task(&self, task: StepTask) {
        if !self.chain.begin(&task, self.state()) {
            tracing::debug!(agent = %self.id, step = ?task.step, seq = task.seq, "step dropped");
            return;
        }

        let outcome = self.run_contained(task.step);
        let next = self.chain.finish(
            task,
            outcome,
            self.config.fault_policy,
            self.config.max_consecutive_faults,
            || self.state(),
            || !self.events.is_empty(),
        );
        if let Some(next) = next {
            self.submit(next);
        }
    }

    /// Run a step's work, converting panics into step errors
    fn run_contained(&self, step: Step) -> StepResult<()> {
        match catch_unwind(AssertUnwindSafe(|| self.perform(step))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(StepError::Panicked {
                step,
                detail: panic_detail(payload.as_ref()),
            }),
        }
    }

    fn perform(&self, step: Step) -> StepResult<()> {
        match step {
            Step::Start => self
                .roles
                .activate_all()
                .map(|_| ())
                .map_err(|err| StepError::Failed {
                    step,
                    detail: match err {
                        AgentError::Activation(detail) => detail,
                        other => other.to_string(),
                    },
                }),
            Step::Execute => self.execute(),
        }
    }

    fn execute(&self) -> StepResult<()> {
        let mut batch = self.events.take(self.config.max_events_per_step.max(1));
        let mut dispatched = 0;
        for event in &batch {
            if self.state() != AgentState::Active {
                break;
            }
            self.bus.fire(self, event);
            dispatched += 1;
        }
        if dispatched < batch.len() {
            // Suspended or stopped mid-batch; the rest waits for a resumed chain.
            self.events.requeue(batch.split_off(dispatched));
        }

        if let Some(behaviour) = &self.behaviour {
            behaviour
                .on_execute(self)
                .map_err(|err| StepError::Failed {
                    step: Step::Execute,
                    detail: format!("{err:#}"),
                })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("state", &self.state())
            .field("roles", &self.roles.len())
            .finish_non_exhaustive()
    }
}

/// Assembles an agent and its static binding table
pub struct AgentBuilder {
    id: AgentId,
    config: AgentConfig,
    pool: Arc<dyn WorkerPool>,
    bindings: Vec<EventBinding<Agent>>,
    roles: Vec<RoleRef>,
    goals: Vec<Goal>,
    transport: Option<Arc<dyn Transport>>,
    behaviour: Option<Arc<dyn StepBehaviour>>,
}

impl AgentBuilder {
    fn new(pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            id: AgentId::new(),
            config: AgentConfig::default(),
            pool,
            bindings: Vec::new(),
            roles: Vec::new(),
            goals: Vec::new(),
            transport: None,
            behaviour: None,
        }
    }

    /// Use a fixed agent id
    pub fn id(mut self, id: AgentId) -> Self {
        self.id = id;
        self
    }

    /// Use a configuration
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Add one binding to the table
    pub fn binding(mut self, binding: EventBinding<Agent>) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add an externally supplied binding table
    pub fn bindings(mut self, bindings: impl IntoIterator<Item = EventBinding<Agent>>) -> Self {
        self.bindings.extend(bindings);
        self
    }

    /// Bind a handler to every event of `event_type`
    pub fn on<F>(self, name: impl Into<String>, event_type: EventType, handler: F) -> Self
    where
        F: Fn(&Agent, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.binding(EventBinding::new(name, event_type, handler))
    }

    /// Bind a handler to events of `event_type` carrying `discriminant`
    pub fn on_discriminant<F>(
        self,
        name: impl Into<String>,
        event_type: EventType,
        discriminant: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&Agent, &Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.binding(EventBinding::new(name, event_type, handler).with_discriminant(discriminant))
    }

    /// Hold a role from the start
    pub fn role(mut self, role: RoleRef) -> Self {
        self.roles.push(role);
        self
    }

    /// Hold a goal from the start
    pub fn goal(mut self, goal: Goal) -> Self {
        self.goals.push(goal);
        self
    }

    /// Outbound transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Per-step behaviour
    pub fn behaviour(mut self, behaviour: impl StepBehaviour + 'static) -> Self {
        self.behaviour = Some(Arc::new(behaviour));
        self
    }

    /// Build the agent in state CREATED.
    ///
    /// Initial roles and goals emit their added events into the queue; they
    /// are dispatched once the agent has started.
    pub fn build(self) -> Arc<Agent> {
        let agent = Arc::new_cyclic(|this: &Weak<Agent>| {
            let events = Arc::new(EventQueue::new());
            let sink = Arc::new(AgentSink {
                queue: events.clone(),
                agent: this.clone(),
            });
            Agent {
                id: self.id,
                config: self.config,
                state: RwLock::new(AgentState::Created),
                events,
                roles: RoleRegistry::new(sink.clone()),
                goals: GoalBase::new(sink.clone()),
                sink,
                bus: EventBus::from_bindings(self.bindings),
                chain: StepChain::new(),
                pool: self.pool,
                transport: self.transport,
                behaviour: self.behaviour,
                this: this.clone(),
            }
        });

        for role in self.roles {
            agent.roles.add(role);
        }
        for goal in self.goals {
            agent.goals.add(goal);
        }
        tracing::debug!(agent = %agent.id, bindings = agent.bus.len(), "agent built");
        agent
    }
}
