//! Mock collaborators and a harness for engine unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatloop_config::AppConfig;
use chatloop_core::action::{
    ActionContext, ActionExecutor, ActionOutcome, ActionSet, PlannedAction, StaticActions,
};
use chatloop_core::cycle::{ChatMode, CycleRecord, CycleSnapshot};
use chatloop_core::error::{ActionError, GenerationError, PlanError, SendError};
use chatloop_core::event::EventBus;
use chatloop_core::hooks::SleepMonitor;
use chatloop_core::message::{StreamInfo, Trigger};
use chatloop_core::planner::{PlanResult, Planner};
use chatloop_core::reply::{ReplyGenerator, ReplySegment, ReplySender, SendOptions};
use chatloop_store::InMemoryMessageStore;
use tokio::sync::RwLock;

use crate::context::{Collaborators, LoopContext};
use crate::energy::EnergyModel;
use crate::pipeline::PlanActPipeline;

pub fn group_stream() -> StreamInfo {
    StreamInfo::group("g1", "100").with_name("test-group")
}

pub fn dm_stream() -> StreamInfo {
    StreamInfo::private("p1", "200")
}

// ── Planner ──────────────────────────────────────────────────────────────

pub struct MockPlanner {
    result: Result<PlanResult, PlanError>,
    delay: Duration,
    calls: AtomicUsize,
    offered: Mutex<Vec<ActionSet>>,
}

impl MockPlanner {
    pub fn new(plan: PlanResult) -> Self {
        Self {
            result: Ok(plan),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            offered: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: PlanError) -> Self {
        Self {
            result: Err(error),
            ..Self::new(PlanResult::forced_reply("unused"))
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The action set passed to the most recent call.
    pub fn last_actions(&self) -> Option<ActionSet> {
        self.offered.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Planner for MockPlanner {
    async fn plan(
        &self,
        _stream: &StreamInfo,
        _mode: ChatMode,
        actions: &ActionSet,
    ) -> Result<PlanResult, PlanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.offered.lock().unwrap().push(actions.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

// ── Generator ────────────────────────────────────────────────────────────

enum Generated {
    Echo,
    Text(String),
    Empty,
    Fail,
}

/// Produces `re:<trigger id>` by default, so tests can tell which trigger a
/// reply was generated for.
pub struct MockGenerator {
    output: Generated,
    delay: Duration,
    triggers: Mutex<Vec<String>>,
}

impl MockGenerator {
    fn with_output(output: Generated) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            triggers: Mutex::new(Vec::new()),
        }
    }

    pub fn echo() -> Self {
        Self::with_output(Generated::Echo)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::with_output(Generated::Text(text.into()))
    }

    pub fn empty() -> Self {
        Self::with_output(Generated::Empty)
    }

    pub fn failing() -> Self {
        Self::with_output(Generated::Fail)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.triggers.lock().unwrap().len()
    }

    /// Ids of the triggers generation was requested for, in order.
    pub fn triggers(&self) -> Vec<String> {
        self.triggers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReplyGenerator for MockGenerator {
    async fn generate(
        &self,
        _stream: &StreamInfo,
        trigger: &Trigger,
        _actions: &ActionSet,
    ) -> Result<Vec<ReplySegment>, GenerationError> {
        self.triggers.lock().unwrap().push(trigger.id().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.output {
            Generated::Echo => Ok(vec![ReplySegment::text(format!("re:{}", trigger.id()))]),
            Generated::Text(text) => Ok(vec![ReplySegment::text(text.clone())]),
            Generated::Empty => Ok(Vec::new()),
            Generated::Fail => Err(GenerationError::RequestFailed("model unavailable".into())),
        }
    }
}

// ── Sender ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(ReplySegment, SendOptions)>>,
    fail: bool,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<(ReplySegment, SendOptions)> {
        self.sent.lock().unwrap().clone()
    }

    /// Content of every delivered segment.
    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(segment, _)| segment.content().to_string())
            .collect()
    }
}

#[async_trait]
impl ReplySender for RecordingSender {
    async fn send(
        &self,
        stream: &StreamInfo,
        segment: &ReplySegment,
        options: &SendOptions,
    ) -> Result<(), SendError> {
        if self.fail {
            return Err(SendError::DeliveryFailed {
                stream: stream.stream_id.clone(),
                reason: "connection reset".into(),
            });
        }
        self.sent
            .lock()
            .unwrap()
            .push((segment.clone(), options.clone()));
        Ok(())
    }
}

// ── Executor ─────────────────────────────────────────────────────────────

enum Execution {
    Succeed(Option<ActionOutcome>),
    Fail(ActionError),
    Panic,
}

pub struct MockExecutor {
    execution: Execution,
    calls: AtomicUsize,
}

impl MockExecutor {
    fn with_execution(execution: Execution) -> Self {
        Self {
            execution,
            calls: AtomicUsize::new(0),
        }
    }

    /// Succeeds, reporting the action's name as the command.
    pub fn new() -> Self {
        Self::with_execution(Execution::Succeed(None))
    }

    pub fn succeeding(outcome: ActionOutcome) -> Self {
        Self::with_execution(Execution::Succeed(Some(outcome)))
    }

    pub fn failing(error: ActionError) -> Self {
        Self::with_execution(Execution::Fail(error))
    }

    pub fn panicking() -> Self {
        Self::with_execution(Execution::Panic)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for MockExecutor {
    async fn execute(
        &self,
        action: &PlannedAction,
        _context: &ActionContext,
    ) -> Result<ActionOutcome, ActionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.execution {
            Execution::Succeed(Some(outcome)) => Ok(outcome.clone()),
            Execution::Succeed(None) => Ok(ActionOutcome {
                success: true,
                reply_text: String::new(),
                command: action.name().to_string(),
            }),
            Execution::Fail(error) => Err(error.clone()),
            Execution::Panic => panic!("executor blew up on {}", action.name()),
        }
    }
}

// ── Sleep ────────────────────────────────────────────────────────────────

pub struct FixedSleep(pub bool);

#[async_trait]
impl SleepMonitor for FixedSleep {
    async fn is_sleeping(&self) -> bool {
        self.0
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

/// A loop context wired to mocks. The `with_*` methods swap a mock in both
/// the harness and the context.
pub struct TestHarness {
    pub ctx: LoopContext,
    pub store: InMemoryMessageStore,
    pub planner: Arc<MockPlanner>,
    pub generator: Arc<MockGenerator>,
    pub sender: Arc<RecordingSender>,
    pub executor: Arc<MockExecutor>,
}

impl TestHarness {
    pub fn new(stream: StreamInfo, config: AppConfig) -> Self {
        let store = InMemoryMessageStore::new();
        let planner = Arc::new(MockPlanner::new(PlanResult::forced_reply("mock planner")));
        let generator = Arc::new(MockGenerator::echo());
        let sender = Arc::new(RecordingSender::default());
        let executor = Arc::new(MockExecutor::new());

        let collab = Collaborators::new(
            Arc::new(store.clone()),
            Arc::new(StaticActions(ActionSet::core())),
            planner.clone(),
            generator.clone(),
            sender.clone(),
            executor.clone(),
        );

        let model = EnergyModel::from_config(&config);
        let state = model.initial_state(stream.clone(), config.chat.history_limit);

        Self {
            ctx: LoopContext {
                stream,
                config: Arc::new(config),
                collab,
                state: Arc::new(RwLock::new(state)),
                events: EventBus::new(64),
            },
            store,
            planner,
            generator,
            sender,
            executor,
        }
    }

    pub fn with_actions(mut self, actions: ActionSet) -> Self {
        self.ctx.collab.actions = Arc::new(StaticActions(actions));
        self
    }

    pub fn with_planner(mut self, planner: MockPlanner) -> Self {
        self.planner = Arc::new(planner);
        self.ctx.collab.planner = self.planner.clone();
        self
    }

    pub fn with_generator(mut self, generator: MockGenerator) -> Self {
        self.generator = Arc::new(generator);
        self.ctx.collab.generator = self.generator.clone();
        self
    }

    pub fn with_sender(mut self, sender: RecordingSender) -> Self {
        self.sender = Arc::new(sender);
        self.ctx.collab.sender = self.sender.clone();
        self
    }

    pub fn with_executor(mut self, executor: MockExecutor) -> Self {
        self.executor = Arc::new(executor);
        self.ctx.collab.executor = self.executor.clone();
        self
    }

    pub fn sleeping(mut self) -> Self {
        self.ctx.collab.sleep = Some(Arc::new(FixedSleep(true)));
        self
    }

    /// Force the mode without publishing a transition.
    pub async fn set_mode(&self, mode: ChatMode) {
        self.ctx.state.write().await.set_mode(mode);
    }

    pub fn pipeline(&self) -> PlanActPipeline {
        PlanActPipeline::new(self.ctx.clone())
    }

    pub async fn history(&self) -> Vec<CycleRecord> {
        self.ctx.state.read().await.history().cloned().collect()
    }

    pub async fn snapshot(&self) -> CycleSnapshot {
        self.ctx.state.read().await.snapshot()
    }
}
