//! Filtered event broadcast.
//!
//! Publishing is non-blocking: each subscriber owns a bounded ring buffer guarded by its own
//! mutex. On overflow the oldest undelivered event is dropped to make room for the new one,
//! and a `buffer.overflow` counter on the subscription is incremented — the publisher never
//! blocks on a slow subscriber.

use crate::cloudllm::domain::{new_id, CoordEvent, Id, Subscription};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};

/// Default per-subscriber buffer depth before the oldest event is dropped.
pub const DEFAULT_BUFFER: usize = 256;

struct RingBuffer {
    queue: Mutex<VecDeque<CoordEvent>>,
    notify: Notify,
    capacity: usize,
    overflow_count: AtomicU64,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            notify: Notify::new(),
            capacity,
            overflow_count: AtomicU64::new(0),
        }
    }

    async fn push(&self, event: CoordEvent) {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            queue.pop_front();
            self.overflow_count.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    async fn recv(self: &Arc<Self>) -> Option<CoordEvent> {
        loop {
            {
                let mut queue = self.queue.lock().await;
                if let Some(event) = queue.pop_front() {
                    return Some(event);
                }
            }
            self.notify.notified().await;
        }
    }
}

struct SubscriberChannel {
    subscription: Subscription,
    buffer: Arc<RingBuffer>,
}

/// A handle returned by [`EventBus::subscribe`] that receives matching events.
pub struct Subscriber {
    pub subscription_id: Id,
    buffer: Arc<RingBuffer>,
}

impl Subscriber {
    /// Await the next event delivered to this subscription. Never returns `None` while the
    /// bus is alive; events simply arrive as they are published and matched.
    pub async fn recv(&mut self) -> Option<CoordEvent> {
        self.buffer.recv().await
    }
}

/// Matches a dotted event type against a shell-style glob where `*` matches exactly one
/// dot-separated segment, or the whole type when the glob is the bare `"*"`.
///
/// `agent.*` matches `agent.created` but not the bare `agent`; `*` matches everything.
pub fn glob_matches(glob: &str, event_type: &str) -> bool {
    if glob == "*" {
        return true;
    }
    let glob_segments: Vec<&str> = glob.split('.').collect();
    let type_segments: Vec<&str> = event_type.split('.').collect();
    if glob_segments.len() != type_segments.len() {
        return false;
    }
    glob_segments
        .iter()
        .zip(type_segments.iter())
        .all(|(g, t)| *g == "*" || g == t)
}

fn any_glob_matches(globs: &[String], event_type: &str) -> bool {
    globs.iter().any(|g| glob_matches(g, event_type))
}

/// The process-local, glob-filtered broadcast bus for one workspace's coordination events.
pub struct EventBus {
    subscribers: RwLock<HashMap<Id, SubscriberChannel>>,
    buffer_capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_BUFFER)
    }

    pub fn with_buffer(buffer_capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer_capacity,
        }
    }

    /// Register a new subscriber and return both its subscription id and a receiver for
    /// matching events.
    pub async fn subscribe(
        &self,
        subscriber_agent_id: impl Into<Id>,
        name: impl Into<String>,
        globs: Vec<String>,
        exclude_self: bool,
    ) -> Subscriber {
        let id = new_id();
        let subscription = Subscription {
            id: id.clone(),
            subscriber_agent_id: subscriber_agent_id.into(),
            subscriber_name: name.into(),
            event_type_globs: globs,
            exclude_self,
        };
        let buffer = Arc::new(RingBuffer::new(self.buffer_capacity));
        let mut subs = self.subscribers.write().await;
        subs.insert(
            id.clone(),
            SubscriberChannel {
                subscription,
                buffer: buffer.clone(),
            },
        );
        Subscriber {
            subscription_id: id,
            buffer,
        }
    }

    /// Idempotent: unsubscribing an unknown or already-removed id is a no-op success.
    pub async fn unsubscribe(&self, subscription_id: &str) {
        self.subscribers.write().await.remove(subscription_id);
    }

    /// Number of times a subscription's buffer has overflowed and dropped its oldest
    /// undelivered event.
    pub async fn overflow_count(&self, subscription_id: &str) -> u64 {
        self.subscribers
            .read()
            .await
            .get(subscription_id)
            .map(|s| s.buffer.overflow_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Deliver `event` to every matching live subscriber. Delivery to a single subscriber
    /// preserves `publish` call order; cross-subscriber ordering is unspecified because each
    /// subscriber's push runs independently.
    pub async fn publish(&self, event: CoordEvent) {
        let subs = self.subscribers.read().await;
        for chan in subs.values() {
            let sub = &chan.subscription;
            if !any_glob_matches(&sub.event_type_globs, &event.event_type) {
                continue;
            }
            if sub.exclude_self {
                if let Some(source) = &event.source_agent_id {
                    if *source == sub.subscriber_agent_id {
                        continue;
                    }
                }
            }
            chan.buffer.push(event.clone()).await;
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_matches_segment_wildcard() {
        assert!(glob_matches("agent.*", "agent.created"));
        assert!(!glob_matches("agent.*", "agent"));
        assert!(glob_matches("*", "task.created"));
        assert!(!glob_matches("agent.*", "task.created"));
    }

    #[tokio::test]
    async fn delivers_only_matching_events_in_order() {
        let bus = EventBus::new();
        let mut sub = bus
            .subscribe("agent-1", "watcher", vec!["agent.*".to_string()], false)
            .await;

        bus.publish(CoordEvent::new("agent.created").from_agent("agent-2"))
            .await;
        bus.publish(CoordEvent::new("task.created").from_agent("agent-2"))
            .await;
        bus.publish(CoordEvent::new("agent.updated").from_agent("agent-2"))
            .await;

        let first = sub.recv().await.unwrap();
        assert_eq!(first.event_type, "agent.created");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, "agent.updated");
    }

    #[tokio::test]
    async fn exclude_self_filters_source_agent() {
        let bus = EventBus::new();
        let mut sub = bus
            .subscribe("agent-1", "watcher", vec!["*".to_string()], true)
            .await;
        bus.publish(CoordEvent::new("agent.created").from_agent("agent-1"))
            .await;
        bus.publish(CoordEvent::new("agent.created").from_agent("agent-2"))
            .await;
        let event = sub.recv().await.unwrap();
        assert_eq!(event.source_agent_id.as_deref(), Some("agent-2"));
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let bus = EventBus::with_buffer(2);
        let mut sub = bus
            .subscribe("agent-1", "watcher", vec!["*".to_string()], false)
            .await;
        bus.publish(CoordEvent::new("e.1")).await;
        bus.publish(CoordEvent::new("e.2")).await;
        bus.publish(CoordEvent::new("e.3")).await;

        assert_eq!(bus.overflow_count(&sub.subscription_id).await, 1);
        let first = sub.recv().await.unwrap();
        assert_eq!(first.event_type, "e.2");
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event_type, "e.3");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let sub = bus
            .subscribe("agent-1", "watcher", vec!["*".to_string()], false)
            .await;
        bus.unsubscribe(&sub.subscription_id).await;
        bus.unsubscribe(&sub.subscription_id).await;
    }
}
