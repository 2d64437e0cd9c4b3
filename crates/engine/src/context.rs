//! Shared handles a conversation loop's tasks are built from.

use std::sync::Arc;

use chatloop_config::AppConfig;
use chatloop_core::action::{ActionExecutor, ActionModifier};
use chatloop_core::cycle::CycleState;
use chatloop_core::event::EventBus;
use chatloop_core::hooks::{NoopHooks, SleepMonitor, SocialHooks};
use chatloop_core::message::StreamInfo;
use chatloop_core::planner::Planner;
use chatloop_core::reply::{ReplyGenerator, ReplySender};
use chatloop_core::store::MessageStore;
use chatloop_core::willingness::{AlwaysWilling, Willingness};
use tokio::sync::RwLock;

/// The external services a conversation loop consumes.
///
/// All collaborators are shared across conversations and treated as
/// stateless per call.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MessageStore>,
    pub actions: Arc<dyn ActionModifier>,
    pub planner: Arc<dyn Planner>,
    pub generator: Arc<dyn ReplyGenerator>,
    pub sender: Arc<dyn ReplySender>,
    pub executor: Arc<dyn ActionExecutor>,
    pub willingness: Arc<dyn Willingness>,
    pub hooks: Arc<dyn SocialHooks>,
    pub sleep: Option<Arc<dyn SleepMonitor>>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn MessageStore>,
        actions: Arc<dyn ActionModifier>,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn ReplyGenerator>,
        sender: Arc<dyn ReplySender>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            store,
            actions,
            planner,
            generator,
            sender,
            executor,
            willingness: Arc::new(AlwaysWilling),
            hooks: Arc::new(NoopHooks),
            sleep: None,
        }
    }

    pub fn with_willingness(mut self, willingness: Arc<dyn Willingness>) -> Self {
        self.willingness = willingness;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SocialHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_sleep_monitor(mut self, sleep: Arc<dyn SleepMonitor>) -> Self {
        self.sleep = Some(sleep);
        self
    }

    /// Whether the sleep monitor (if any) reports sleeping.
    pub async fn is_sleeping(&self) -> bool {
        match &self.sleep {
            Some(monitor) => monitor.is_sleeping().await,
            None => false,
        }
    }
}

/// Everything one conversation's tasks share. Cheap to clone.
#[derive(Clone)]
pub struct LoopContext {
    pub stream: StreamInfo,
    pub config: Arc<AppConfig>,
    pub collab: Collaborators,
    pub state: Arc<RwLock<CycleState>>,
    pub events: EventBus,
}

impl LoopContext {
    pub fn stream_id(&self) -> &str {
        &self.stream.stream_id
    }
}
