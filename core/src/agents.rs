use crate::agent::{AgentPlatform, AssistantApi};
use crate::chat::{ChatClient, ChatError};
use crate::config::Config;
use crate::events::{ChannelRef, ChatEvent, EventBus};
use crate::session::{AgentSession, SessionError, SessionOptions};
use crate::tools::ToolRunner;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Builds a fresh chat connection for each session
pub type ChatFactory = Arc<dyn Fn() -> Result<Arc<dyn ChatClient>, ChatError> + Send + Sync>;

/// Outcome of [`AgentRegistry::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Running, or another start for the channel is still initializing
    AlreadyRunning,
    /// Stopped while it was initializing
    Stopped,
}

#[derive(Default)]
struct Sessions {
    running: HashMap<String, Arc<AgentSession>>,
    /// Channels reserved by a `start` that is still initializing
    starting: HashSet<String>,
}

/// All running agent sessions, keyed by channel cid.
///
/// The lock is never held across a network call: `start` reserves the cid,
/// initializes the session unlocked, then publishes it.
pub struct AgentRegistry {
    sessions: Mutex<Sessions>,
    api: Arc<dyn AssistantApi>,
    chat_factory: ChatFactory,
    tools: ToolRunner,
    bus: EventBus,
    model: String,
    run_idle_timeout: Option<Duration>,
}

impl AgentRegistry {
    pub fn new(config: &Config, api: Arc<dyn AssistantApi>, chat_factory: ChatFactory, tools: ToolRunner) -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            api,
            chat_factory,
            tools,
            bus: EventBus::new(),
            model: config.openai_model.clone(),
            run_idle_timeout: config.run_idle_timeout,
        }
    }

    /// Start a session for `channel` unless one is already running
    pub async fn start(&self, channel: ChannelRef, platform: AgentPlatform) -> Result<StartOutcome, SessionError> {
        let cid = channel.cid();
        {
            let mut sessions = self.sessions.lock().await;
            if sessions.running.contains_key(&cid) || !sessions.starting.insert(cid.clone()) {
                return Ok(StartOutcome::AlreadyRunning);
            }
        }

        let session = match (self.chat_factory)() {
            Ok(chat) => Arc::new(AgentSession::new(
                Arc::clone(&self.api),
                chat,
                self.tools.clone(),
                self.bus.clone(),
                channel,
                SessionOptions {
                    platform,
                    model: self.model.clone(),
                    run_idle_timeout: self.run_idle_timeout,
                },
            )),
            Err(e) => {
                self.sessions.lock().await.starting.remove(&cid);
                return Err(e.into());
            }
        };

        if let Err(e) = session.init().await {
            warn!(%cid, error = %e, "failed to start agent session");
            self.sessions.lock().await.starting.remove(&cid);
            session.dispose().await;
            return Err(e);
        }

        let active = {
            let mut sessions = self.sessions.lock().await;
            if !sessions.starting.remove(&cid) {
                None
            } else {
                sessions.running.insert(cid.clone(), Arc::clone(&session));
                Some(sessions.running.len())
            }
        };
        match active {
            Some(active) => {
                info!(%cid, active, "agent started");
                Ok(StartOutcome::Started)
            }
            None => {
                info!(%cid, "agent stopped while initializing");
                session.dispose().await;
                Ok(StartOutcome::Stopped)
            }
        }
    }

    /// Dispose and forget the session of `channel`, or cancel a start still
    /// initializing. Returns whether there was one.
    pub async fn stop(&self, channel: &ChannelRef) -> bool {
        let cid = channel.cid();
        let session = {
            let mut sessions = self.sessions.lock().await;
            let was_starting = sessions.starting.remove(&cid);
            match sessions.running.remove(&cid) {
                Some(session) => session,
                None => return was_starting,
            }
        };
        session.dispose().await;
        info!(%cid, "agent stopped");
        true
    }

    pub async fn is_running(&self, channel: &ChannelRef) -> bool {
        self.sessions.lock().await.running.contains_key(&channel.cid())
    }

    pub async fn get(&self, channel: &ChannelRef) -> Option<Arc<AgentSession>> {
        self.sessions.lock().await.running.get(&channel.cid()).cloned()
    }

    pub async fn count(&self) -> usize {
        self.sessions.lock().await.running.len()
    }

    /// Dispose every session idle for longer than `max_idle`. Returns the evicted cids.
    pub async fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<(String, Arc<AgentSession>)> = {
            let mut sessions = self.sessions.lock().await;
            let cids: Vec<String> = sessions
                .running
                .iter()
                .filter(|(_, s)| now.saturating_duration_since(s.last_interaction()) > max_idle)
                .map(|(cid, _)| cid.clone())
                .collect();
            cids.into_iter()
                .filter_map(|cid| sessions.running.remove(&cid).map(|s| (cid, s)))
                .collect()
        };

        let mut evicted = Vec::with_capacity(stale.len());
        for (cid, session) in stale {
            session.dispose().await;
            info!(%cid, "disposed idle agent");
            evicted.push(cid);
        }
        evicted
    }

    /// Hand a chat notification to every session
    pub fn publish(&self, event: ChatEvent) -> usize {
        self.bus.publish(event)
    }

    /// Dispose all sessions
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<AgentSession>> = {
            let mut sessions = self.sessions.lock().await;
            sessions.starting.clear();
            sessions.running.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.dispose().await;
        }
    }
}
