use crate::agent::{AgentError, AgentPlatform, AssistantApi, RunStream};
use crate::chat::{AiState, ChatClient, ChatError, IndicatorEvent};
use crate::events::{ChannelRef, ChatEvent, EventBus, InboundMessage, Subscription};
use crate::response::{OrchestratorHandle, ResponseOrchestrator, RunContext};
use crate::tools::{ToolRegistry, ToolRunner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors that can occur while bringing a session up
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    #[error("Session for {0} was already disposed")]
    Disposed(String),
}

/// Per-session settings
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub platform: AgentPlatform,
    pub model: String,
    pub run_idle_timeout: Option<Duration>,
}

#[derive(Debug)]
struct SessionIds {
    assistant_id: String,
    thread_id: String,
}

/// Written to a placeholder whose run was never opened because the session
/// was torn down
pub const SESSION_CLOSED_TEXT: &str = "The AI agent was stopped before it could reply";

/// Active orchestrators keyed by the id of the message they write
type Roster = Arc<Mutex<HashMap<String, OrchestratorHandle>>>;

struct SessionInner {
    api: Arc<dyn AssistantApi>,
    chat: Arc<dyn ChatClient>,
    tools: ToolRunner,
    bus: EventBus,
    channel: ChannelRef,
    options: SessionOptions,
    ids: OnceLock<SessionIds>,
    last_interaction: Mutex<Instant>,
    roster: Roster,
}

/// The AI participant of one chat channel.
///
/// Owns one assistant persona and one conversation thread. Every qualifying
/// message posted to the channel starts a new streamed response.
pub struct AgentSession {
    inner: Arc<SessionInner>,
    init_lock: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
    stop_listening: CancellationToken,
    disposed: AtomicBool,
}

impl AgentSession {
    pub fn new(
        api: Arc<dyn AssistantApi>,
        chat: Arc<dyn ChatClient>,
        tools: ToolRunner,
        bus: EventBus,
        channel: ChannelRef,
        options: SessionOptions,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                api,
                chat,
                tools,
                bus,
                channel,
                options,
                ids: OnceLock::new(),
                last_interaction: Mutex::new(Instant::now()),
                roster: Arc::new(Mutex::new(HashMap::new())),
            }),
            init_lock: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            stop_listening: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    /// Create the assistant and thread, then start listening for channel messages
    pub async fn init(&self) -> Result<(), SessionError> {
        let _guard = self.init_lock.lock().await;
        if self.is_disposed() {
            return Err(SessionError::Disposed(self.inner.channel.cid()));
        }
        if self.inner.ids.get().is_some() {
            return Ok(());
        }

        let inner = &self.inner;
        inner.chat.join_channel(&inner.channel).await?;

        let spec = inner
            .options
            .platform
            .assistant_spec(&inner.options.model, &ToolRegistry::new());
        let assistant_id = inner.api.create_assistant(&spec).await?;
        let thread_id = inner.api.create_thread().await?;
        info!(
            cid = %inner.channel.cid(),
            %assistant_id,
            %thread_id,
            platform = ?inner.options.platform,
            "agent session initialized"
        );
        let _ = inner.ids.set(SessionIds {
            assistant_id,
            thread_id,
        });

        let cid = inner.channel.cid();
        let messages = inner.bus.subscribe_filtered(move |event| {
            matches!(event, ChatEvent::MessageNew(message) if message.cid == cid)
        });
        let task = tokio::spawn(listen(
            Arc::clone(inner),
            messages,
            self.stop_listening.clone(),
        ));
        *lock(&self.listener) = Some(task);
        Ok(())
    }

    /// Stop listening, dispose every active orchestrator and release the chat
    /// connection. Calling it again does nothing.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_listening.cancel();

        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            if let Err(e) = listener.await {
                warn!(cid = %self.inner.channel.cid(), error = %e, "message listener ended abnormally");
            }
        }

        let handles: Vec<OrchestratorHandle> = lock(&self.inner.roster).drain().map(|(_, h)| h).collect();
        let runs = handles.len();
        for handle in handles {
            handle.dispose();
        }

        if let Err(e) = self.inner.chat.disconnect().await {
            warn!(cid = %self.inner.channel.cid(), error = %e, "error disconnecting chat client");
        }
        info!(cid = %self.inner.channel.cid(), runs, "agent session disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// When the last qualifying message arrived (or the session was created)
    pub fn last_interaction(&self) -> Instant {
        *lock(&self.inner.last_interaction)
    }

    /// Message ids of the responses still being generated
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.roster).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.inner.channel
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.inner.ids.get().map(|ids| ids.thread_id.as_str())
    }
}

async fn listen(inner: Arc<SessionInner>, mut messages: Subscription, stop: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            event = messages.recv() => event,
        };

        let message = match event {
            Some(ChatEvent::MessageNew(message)) => message,
            Some(_) => continue,
            None => break,
        };
        if !inner.qualifies(&message) {
            continue;
        }
        inner.touch();

        inner.start_response(&message, &stop).await;
    }
    debug!(cid = %inner.channel.cid(), "message listener stopped");
}

impl SessionInner {
    fn qualifies(&self, message: &InboundMessage) -> bool {
        message.cid == self.channel.cid()
            && !message.text.trim().is_empty()
            && !message.ai_generated
            && message.user_id.as_deref() != Some(self.chat.bot_user_id())
    }

    fn touch(&self) {
        *lock(&self.last_interaction) = Instant::now();
    }

    async fn start_response(&self, message: &InboundMessage, teardown: &CancellationToken) {
        let Some(ids) = self.ids.get() else {
            return;
        };

        let placeholder = tokio::select! {
            biased;
            _ = teardown.cancelled() => return,
            placeholder = self.chat.create_placeholder(&self.channel) => placeholder,
        };
        let message_id = match placeholder {
            Ok(id) => id,
            Err(e) => {
                error!(cid = %self.channel.cid(), error = %e, "failed to create placeholder message");
                return;
            }
        };

        // Subscribed before the run exists so an early stop is not lost
        let cid = self.channel.cid();
        let stops = self.bus.subscribe_filtered(move |event| {
            matches!(event, ChatEvent::StopGenerating { .. })
                && event.cid().map_or(true, |event_cid| event_cid == cid)
        });

        let opened = tokio::select! {
            biased;
            _ = teardown.cancelled() => {
                info!(cid = %self.channel.cid(), %message_id, "session closed before the run was opened");
                if let Err(e) = self.chat.update_text(&message_id, SESSION_CLOSED_TEXT).await {
                    warn!(%message_id, error = %e, "failed to close placeholder");
                }
                return;
            }
            opened = self.open_run(ids, &message.text) => opened,
        };
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(cid = %self.channel.cid(), %message_id, error = %e, "failed to open run");
                self.report_failure(&message_id, &e.to_string()).await;
                return;
            }
        };

        let ctx = RunContext {
            api: Arc::clone(&self.api),
            chat: Arc::clone(&self.chat),
            tools: self.tools.clone(),
            channel: self.channel.clone(),
            thread_id: ids.thread_id.clone(),
            run_idle_timeout: self.options.run_idle_timeout,
        };
        let roster: Weak<Mutex<HashMap<String, OrchestratorHandle>>> = Arc::downgrade(&self.roster);
        let key = message_id.clone();
        let (orchestrator, handle) = ResponseOrchestrator::new(ctx, message_id.clone(), stops, move || {
            if let Some(roster) = roster.upgrade() {
                lock(&roster).remove(&key);
            }
        });

        lock(&self.roster).insert(message_id.clone(), handle);
        info!(cid = %self.channel.cid(), %message_id, "response started");
        tokio::spawn(orchestrator.run(stream));
    }

    async fn open_run(&self, ids: &SessionIds, text: &str) -> Result<RunStream, AgentError> {
        self.api.add_user_message(&ids.thread_id, text).await?;
        self.api.stream_run(&ids.thread_id, &ids.assistant_id).await
    }

    async fn report_failure(&self, message_id: &str, reason: &str) {
        let event = IndicatorEvent::Update {
            state: AiState::Error,
            message_id: message_id.to_string(),
        };
        if let Err(e) = self.chat.send_indicator(&self.channel, event).await {
            warn!(%message_id, error = %e, "failed to send error indicator");
        }
        if let Err(e) = self.chat.update_text(message_id, reason).await {
            warn!(%message_id, error = %e, "failed to write error text");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
