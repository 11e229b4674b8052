use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// Reference to a chat channel, rendered by the chat provider as `type:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelRef {
    pub channel_type: String,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(channel_type: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Parse a `type:id` channel cid. A bare id defaults to the `messaging` type.
    pub fn from_cid(cid: &str) -> Option<Self> {
        match cid.split_once(':') {
            Some((ty, id)) if !ty.is_empty() && !id.is_empty() => Some(Self::new(ty, id)),
            Some(_) => None,
            None if !cid.is_empty() => Some(Self::new("messaging", cid)),
            None => None,
        }
    }

    pub fn cid(&self) -> String {
        format!("{}:{}", self.channel_type, self.channel_id)
    }
}

/// A message posted to a channel by any participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub cid: String,
    pub user_id: Option<String>,
    pub text: String,
    pub ai_generated: bool,
}

/// Notifications coming in from the chat provider
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// `message.new`
    MessageNew(InboundMessage),

    /// `ai_indicator.stop`: a participant asked to stop generating a message
    StopGenerating { cid: Option<String>, message_id: String },
}

impl ChatEvent {
    /// Decode a chat-provider webhook payload. Event types the relay does not
    /// act on yield `None`.
    pub fn from_webhook(payload: &Value) -> Option<Self> {
        let event_type = payload.get("type")?.as_str()?;
        let cid = payload
            .get("cid")
            .and_then(Value::as_str)
            .map(str::to_string);

        match event_type {
            "message.new" => {
                let message = payload.get("message")?;
                let cid = cid.or_else(|| {
                    message
                        .get("cid")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })?;
                Some(ChatEvent::MessageNew(InboundMessage {
                    message_id: message.get("id")?.as_str()?.to_string(),
                    cid,
                    user_id: message
                        .pointer("/user/id")
                        .or_else(|| payload.pointer("/user/id"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    text: message
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    ai_generated: message
                        .get("ai_generated")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }))
            }
            "ai_indicator.stop" => Some(ChatEvent::StopGenerating {
                cid,
                message_id: payload.get("message_id")?.as_str()?.to_string(),
            }),
            _ => None,
        }
    }

    /// Channel the event belongs to, when the provider said so
    pub fn cid(&self) -> Option<&str> {
        match self {
            ChatEvent::MessageNew(message) => Some(&message.cid),
            ChatEvent::StopGenerating { cid, .. } => cid.as_deref(),
        }
    }
}

type EventFilter = Box<dyn Fn(&ChatEvent) -> bool + Send + Sync>;

struct Subscriber {
    sender: mpsc::UnboundedSender<ChatEvent>,
    filter: Option<EventFilter>,
}

impl Subscriber {
    fn wants(&self, event: &ChatEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

type Subscribers = Mutex<HashMap<u64, Subscriber>>;

#[derive(Debug, Default)]
struct BusInner {
    subscribers: Subscribers,
    next_id: Mutex<u64>,
}

/// Fan-out bus for chat notifications. Every subscriber sees each event it
/// accepts that was published after it subscribed, in publish order.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The returned handle unsubscribes when dropped.
    pub fn subscribe(&self) -> Subscription {
        self.register(None)
    }

    /// Like [`EventBus::subscribe`], but only events accepted by `filter`
    /// are delivered to this subscriber.
    pub fn subscribe_filtered<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&ChatEvent) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Box::new(filter)))
    }

    fn register(&self, filter: Option<EventFilter>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut next = lock(&self.inner.next_id);
            *next += 1;
            *next
        };
        lock(&self.inner.subscribers).insert(id, Subscriber { sender, filter });
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every live subscriber that wants it. Returns how
    /// many received it.
    pub fn publish(&self, event: ChatEvent) -> usize {
        let mut delivered = 0;
        lock(&self.inner.subscribers).retain(|_, subscriber| {
            if !subscriber.wants(&event) {
                return !subscriber.sender.is_closed();
            }
            let sent = subscriber.sender.send(event.clone()).is_ok();
            delivered += usize::from(sent);
            sent
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }
}

/// Handle for one registration on the [`EventBus`]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<ChatEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            lock(&bus.subscribers).remove(&self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
