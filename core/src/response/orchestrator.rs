use super::translator::{translate, Effect, RunPhase, RunState};
use crate::agent::{AgentError, AssistantApi, RunEvent, RunStream};
use crate::chat::{AiState, ChatClient, IndicatorEvent};
use crate::events::{ChannelRef, ChatEvent, Subscription};
use crate::tools::ToolRunner;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const TIMEOUT_MESSAGE: &str = "Response timed out";

/// Everything an orchestrator needs besides its own run
#[derive(Clone)]
pub struct RunContext {
    pub api: Arc<dyn AssistantApi>,
    pub chat: Arc<dyn ChatClient>,
    pub tools: ToolRunner,
    pub channel: ChannelRef,
    pub thread_id: String,
    /// Fail the run when no event arrives for this long
    pub run_idle_timeout: Option<Duration>,
}

type DisposeHook = Box<dyn FnOnce() + Send>;

struct HandleInner {
    message_id: String,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    on_dispose: Mutex<Option<DisposeHook>>,
}

/// Shared handle used to dispose an orchestrator from outside its task
#[derive(Clone)]
pub struct OrchestratorHandle {
    inner: Arc<HandleInner>,
}

impl OrchestratorHandle {
    fn new(message_id: String, on_dispose: DisposeHook) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                message_id,
                disposed: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                on_dispose: Mutex::new(Some(on_dispose)),
            }),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.inner.message_id
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Stop the orchestrator and run its dispose hook. Only the first call
    /// has an effect; returns whether this call was it.
    pub fn dispose(&self) -> bool {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.inner.shutdown.cancel();
        let hook = self
            .inner
            .on_dispose
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(hook) = hook {
            hook();
        }
        debug!(message_id = %self.inner.message_id, "orchestrator disposed");
        true
    }
}

impl std::fmt::Debug for OrchestratorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorHandle")
            .field("message_id", &self.inner.message_id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

enum Next {
    Event(RunEvent),
    Stop(String),
    StopsClosed,
    Ignored,
    StreamEnded,
    StreamFailed(AgentError),
    TimedOut,
    Shutdown,
}

/// Drives one assistant run for one outgoing chat message
pub struct ResponseOrchestrator {
    ctx: RunContext,
    state: RunState,
    stops: Option<Subscription>,
    handle: OrchestratorHandle,
    /// Stop accepted before the provider reported the run id
    cancel_when_created: bool,
}

impl ResponseOrchestrator {
    /// `stops` should be subscribed before the run is opened so no stop
    /// request is missed. `on_dispose` runs exactly once.
    pub fn new(
        ctx: RunContext,
        message_id: impl Into<String>,
        stops: Subscription,
        on_dispose: impl FnOnce() + Send + 'static,
    ) -> (Self, OrchestratorHandle) {
        let message_id = message_id.into();
        let handle = OrchestratorHandle::new(message_id.clone(), Box::new(on_dispose));
        let orchestrator = Self {
            ctx,
            state: RunState::new(message_id),
            stops: Some(stops),
            handle: handle.clone(),
            cancel_when_created: false,
        };
        (orchestrator, handle)
    }

    /// Consume `stream` (and every stream resumed after tool outputs) until a
    /// terminal state, a drain error, or disposal. Returns the final phase.
    pub async fn run(mut self, stream: RunStream) -> RunPhase {
        let mut stream = stream;
        let shutdown = self.handle.inner.shutdown.clone();
        let idle_timeout = self.ctx.run_idle_timeout;
        let mut deadline = idle_timeout.map(|bound| tokio::time::Instant::now() + bound);

        loop {
            let next = self.next(&mut stream, &shutdown, deadline).await;
            match next {
                Next::Shutdown => break,
                Next::Ignored => continue,
                Next::StopsClosed => {
                    self.stops = None;
                    continue;
                }
                Next::Stop(message_id) => self.handle_stop(&message_id).await,
                Next::Event(event) => {
                    if self.cancel_when_created {
                        self.cancel_late_run(&event).await;
                    }
                    let effects = translate(&mut self.state, event, Instant::now());
                    if let Err(e) = self.apply(effects, &mut stream).await {
                        error!(message_id = %self.state.message_id(), error = %e, "error resuming run after tool outputs");
                        break;
                    }
                    deadline = idle_timeout.map(|bound| tokio::time::Instant::now() + bound);
                }
                Next::StreamEnded => {
                    if !self.state.is_done() {
                        warn!(
                            message_id = %self.state.message_id(),
                            phase = ?self.state.phase(),
                            "run stream ended before a terminal event"
                        );
                    }
                    break;
                }
                Next::StreamFailed(e) => {
                    error!(message_id = %self.state.message_id(), error = %e, "error handling run stream");
                    break;
                }
                Next::TimedOut => {
                    warn!(message_id = %self.state.message_id(), "run went silent, failing it");
                    self.cancel_when_created = false;
                    let effects = self.state.fail(Some(TIMEOUT_MESSAGE.to_string()));
                    if let Err(e) = self.apply(effects, &mut stream).await {
                        error!(message_id = %self.state.message_id(), error = %e, "error failing silent run");
                        break;
                    }
                }
            }

            let finished = self.state.is_done() && !self.cancel_when_created;
            if finished || self.handle.is_disposed() {
                break;
            }
        }

        let phase = self.state.phase();
        info!(
            message_id = %self.state.message_id(),
            run_id = self.state.run_id().unwrap_or("-"),
            ?phase,
            chunks = self.state.chunk_counter(),
            "response finished"
        );
        self.handle.dispose();
        phase
    }

    async fn next(
        &mut self,
        stream: &mut RunStream,
        shutdown: &CancellationToken,
        deadline: Option<tokio::time::Instant>,
    ) -> Next {
        let stops_open = self.stops.is_some();

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => Next::Shutdown,
            event = recv_stop(&mut self.stops), if stops_open => match event {
                Some(ChatEvent::StopGenerating { message_id, .. }) => Next::Stop(message_id),
                Some(_) => Next::Ignored,
                None => Next::StopsClosed,
            },
            item = stream.next() => match item {
                Some(Ok(event)) => Next::Event(event),
                Some(Err(e)) => Next::StreamFailed(e),
                None => Next::StreamEnded,
            },
            _ = sleep_until(deadline) => Next::TimedOut,
        }
    }

    async fn handle_stop(&mut self, message_id: &str) {
        if !self.state.accept_stop(message_id) {
            return;
        }
        info!(message_id, "stop generating requested");

        match self.state.run_id() {
            Some(run_id) => self.cancel_run(run_id.to_string()).await,
            None => {
                // The provider has not named the run yet; cancel it once it does
                debug!(message_id, "run id unknown, cancelling once the run is created");
                self.cancel_when_created = true;
            }
        }
        self.clear_indicator().await;
    }

    async fn cancel_late_run(&mut self, event: &RunEvent) {
        let run_id = match event {
            RunEvent::RunCreated { run_id } | RunEvent::RequiresAction { run_id, .. } => run_id.clone(),
            _ => return,
        };
        self.cancel_when_created = false;
        self.cancel_run(run_id).await;
    }

    async fn cancel_run(&self, run_id: String) {
        if let Err(e) = self.ctx.api.cancel_run(&self.ctx.thread_id, &run_id).await {
            warn!(message_id = %self.state.message_id(), %run_id, error = %e, "error cancelling run");
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>, stream: &mut RunStream) -> Result<(), AgentError> {
        for effect in effects {
            match effect {
                Effect::Indicator(state) => self.indicator(state).await,
                Effect::ClearIndicator => self.clear_indicator().await,
                Effect::PartialText(text) | Effect::FinalText(text) => {
                    if let Err(e) = self.ctx.chat.update_text(self.state.message_id(), &text).await {
                        warn!(message_id = %self.state.message_id(), error = %e, "failed to update message text");
                    }
                }
                Effect::RunTools { run_id, tool_calls } => {
                    info!(
                        message_id = %self.state.message_id(),
                        %run_id,
                        count = tool_calls.len(),
                        "run requires tool outputs"
                    );
                    let outputs = self.ctx.tools.run_all(&tool_calls).await;
                    if self.handle.is_disposed() {
                        return Ok(());
                    }
                    *stream = self
                        .ctx
                        .api
                        .submit_tool_outputs(&self.ctx.thread_id, &run_id, outputs)
                        .await?;
                    self.state.resume();
                }
            }
        }
        Ok(())
    }

    async fn indicator(&self, state: AiState) {
        let event = IndicatorEvent::Update {
            state,
            message_id: self.state.message_id().to_string(),
        };
        if let Err(e) = self.ctx.chat.send_indicator(&self.ctx.channel, event).await {
            warn!(message_id = %self.state.message_id(), error = %e, "failed to send indicator");
        }
    }

    async fn clear_indicator(&self) {
        let event = IndicatorEvent::Clear {
            message_id: self.state.message_id().to_string(),
        };
        if let Err(e) = self.ctx.chat.send_indicator(&self.ctx.channel, event).await {
            warn!(message_id = %self.state.message_id(), error = %e, "failed to clear indicator");
        }
    }
}

async fn recv_stop(stops: &mut Option<Subscription>) -> Option<ChatEvent> {
    match stops {
        Some(subscription) => subscription.recv().await,
        None => None,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
