//! Conversation registry: one supervised loop per stream.
//!
//! `create` starts three tasks for a stream (driver, energy tick, proactive
//! check), each under its own supervisor, all sharing one cancellation token.
//! `destroy` cancels them and waits for a clean exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chatloop_config::AppConfig;
use chatloop_core::cycle::{ChatMode, CycleRecord, CycleSnapshot, CycleState};
use chatloop_core::error::{Error, Result};
use chatloop_core::event::{DomainEvent, EventBus};
use chatloop_core::message::StreamInfo;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{Collaborators, LoopContext};
use crate::driver::{CycleDriver, ProactiveInbox};
use crate::energy::{EnergyModel, run_ticks};
use crate::proactive::run_checks;
use crate::supervisor::{TaskKind, supervise};

/// Proactive triggers waiting for the driver. One pending trigger is enough.
const PROACTIVE_QUEUE: usize = 4;

/// How long `destroy` waits for each task before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Read access to one running conversation.
#[derive(Clone)]
pub struct ChatHandle {
    pub stream: StreamInfo,
    state: Arc<RwLock<CycleState>>,
}

impl ChatHandle {
    pub async fn mode(&self) -> ChatMode {
        self.state.read().await.mode()
    }

    pub async fn snapshot(&self) -> CycleSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn history(&self) -> Vec<CycleRecord> {
        self.state.read().await.history().cloned().collect()
    }

    pub fn same_loop(&self, other: &ChatHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

struct RunningLoop {
    handle: ChatHandle,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns every active conversation loop.
pub struct ChatRegistry {
    collab: Collaborators,
    config: Arc<AppConfig>,
    events: EventBus,
    loops: RwLock<HashMap<String, RunningLoop>>,
}

impl ChatRegistry {
    pub fn new(collab: Collaborators, config: Arc<AppConfig>, events: EventBus) -> Self {
        Self {
            collab,
            config,
            events,
            loops: RwLock::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.events.subscribe()
    }

    /// Start the loop for `stream`, or return the running one.
    ///
    /// Configuration problems are fatal here rather than degraded later.
    pub async fn create(&self, stream: StreamInfo) -> Result<ChatHandle> {
        if let Some(running) = self.loops.read().await.get(&stream.stream_id) {
            return Ok(running.handle.clone());
        }

        self.config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let mut loops = self.loops.write().await;
        if let Some(running) = loops.get(&stream.stream_id) {
            return Ok(running.handle.clone());
        }

        let model = EnergyModel::from_config(&self.config);
        let state = Arc::new(RwLock::new(
            model.initial_state(stream.clone(), self.config.chat.history_limit),
        ));
        let ctx = LoopContext {
            stream: stream.clone(),
            config: self.config.clone(),
            collab: self.collab.clone(),
            state: state.clone(),
            events: self.events.clone(),
        };
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(PROACTIVE_QUEUE);
        let inbox: ProactiveInbox = Arc::new(Mutex::new(rx));

        let driver = {
            let (ctx, inbox, cancel) = (ctx.clone(), inbox.clone(), cancel.clone());
            move || CycleDriver::new(ctx.clone(), inbox.clone()).run(cancel.clone())
        };
        let energy = {
            let (ctx, cancel) = (ctx.clone(), cancel.clone());
            move || run_ticks(ctx.clone(), model.clone(), cancel.clone())
        };
        let proactive = {
            let (ctx, cancel) = (ctx.clone(), cancel.clone());
            move || run_checks(ctx.clone(), tx.clone(), cancel.clone())
        };

        let tasks = vec![
            tokio::spawn(supervise(TaskKind::Driver, ctx.clone(), cancel.clone(), driver)),
            tokio::spawn(supervise(
                TaskKind::Background("energy"),
                ctx.clone(),
                cancel.clone(),
                energy,
            )),
            tokio::spawn(supervise(
                TaskKind::Background("proactive"),
                ctx,
                cancel.clone(),
                proactive,
            )),
        ];

        let initial_mode = state.read().await.mode();
        info!(
            stream = %stream.label(),
            kind = stream.kind.as_str(),
            mode = %initial_mode,
            "Conversation loop created"
        );

        let handle = ChatHandle { stream, state };
        loops.insert(
            handle.stream.stream_id.clone(),
            RunningLoop {
                handle: handle.clone(),
                cancel,
                tasks,
            },
        );
        Ok(handle)
    }

    pub async fn get(&self, stream_id: &str) -> Option<ChatHandle> {
        self.loops
            .read()
            .await
            .get(stream_id)
            .map(|running| running.handle.clone())
    }

    /// Stop and forget a loop. Returns `false` if none was running.
    pub async fn destroy(&self, stream_id: &str) -> bool {
        let Some(running) = self.loops.write().await.remove(stream_id) else {
            return false;
        };

        running.cancel.cancel();
        for mut task in running.tasks {
            if tokio::time::timeout(STOP_GRACE, &mut task).await.is_err() {
                warn!(stream = %stream_id, "Task did not stop in time, aborting");
                task.abort();
            }
        }
        info!(stream = %running.handle.stream.label(), "Conversation loop destroyed");
        true
    }

    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.loops.read().await.keys().cloned().collect();
        for id in ids {
            self.destroy(&id).await;
        }
    }

    /// Stream ids with a running loop, sorted.
    pub async fn active_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.loops.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn history(&self, stream_id: &str) -> Option<Vec<CycleRecord>> {
        Some(self.get(stream_id).await?.history().await)
    }

    pub async fn snapshot(&self, stream_id: &str) -> Option<CycleSnapshot> {
        Some(self.get(stream_id).await?.snapshot().await)
    }
}
