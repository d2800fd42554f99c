//! In-process pub/sub for agent lifecycle events.
//!
//! Delivery is synchronous and in registration order. `emit` holds only a
//! read lock, so subscribers MUST NOT call `subscribe`/`unsubscribe` on the
//! same emitter from inside a callback: that write-locks against the held
//! read lock and deadlocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Lifecycle events emitted by the agent loop.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    AgentStart,
    TurnStart,
    /// Final assistant text for a turn with no tool calls.
    MessageEnd { content: String },
    ToolStart { tool_name: String },
    ToolEnd { tool_name: String, content: String },
    TurnEnd,
    AgentEnd { error: Option<String> },
}

type Callback = Box<dyn Fn(&AgentEvent) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// Handle returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<EmitterInner>,
}

struct EmitterInner {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EmitterInner {
                subscribers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscribers
            .write()
            .expect("event emitter lock poisoned")
            .push(Subscriber {
                id,
                callback: Box::new(callback),
            });
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self
            .inner
            .subscribers
            .write()
            .expect("event emitter lock poisoned");
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscription.0);
        subscribers.len() != before
    }

    pub fn emit(&self, event: &AgentEvent) {
        let subscribers = self
            .inner
            .subscribers
            .read()
            .expect("event emitter lock poisoned");
        for subscriber in subscribers.iter() {
            (subscriber.callback)(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .expect("event emitter lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_delivery_in_registration_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            emitter.subscribe(move |_| seen.lock().unwrap().push(tag));
        }

        emitter.emit(&AgentEvent::TurnStart);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_unsubscribe() {
        let emitter = EventEmitter::new();
        let count = Arc::new(Mutex::new(0usize));

        let count2 = count.clone();
        let sub = emitter.subscribe(move |_| *count2.lock().unwrap() += 1);

        emitter.emit(&AgentEvent::TurnStart);
        assert!(emitter.unsubscribe(sub));
        emitter.emit(&AgentEvent::TurnEnd);

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(!emitter.unsubscribe(sub));
    }

    #[test]
    fn test_event_payloads() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen2 = seen.clone();
        emitter.subscribe(move |event| {
            if let AgentEvent::ToolEnd { tool_name, content } = event {
                seen2.lock().unwrap().push((tool_name.clone(), content.clone()));
            }
        });

        emitter.emit(&AgentEvent::ToolEnd {
            tool_name: "read".to_string(),
            content: "ok".to_string(),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("read".to_string(), "ok".to_string())]
        );
    }

    #[test]
    fn test_handles_stable_across_churn() {
        let emitter = EventEmitter::new();
        let a = emitter.subscribe(|_| {});
        let b = emitter.subscribe(|_| {});
        assert!(emitter.unsubscribe(a));
        let c = emitter.subscribe(|_| {});
        assert_ne!(b, c);
        assert!(emitter.unsubscribe(b));
        assert!(emitter.unsubscribe(c));
        assert_eq!(emitter.subscriber_count(), 0);
    }
}
