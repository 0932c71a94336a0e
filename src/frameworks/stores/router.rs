// Topic router shared by both store backends: maps topic names to the
// local subscriber callbacks and fans incoming payloads out to them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::domain::{Subscription, SubscriptionCallback};

#[derive(Default)]
struct RouterInner {
    topics: HashMap<String, HashMap<u64, SubscriptionCallback>>,
    next_id: u64,
}

/// Local subscriber registry. The mutex is held only for add, remove and
/// lookup; callbacks always run after it is released.
#[derive(Default)]
pub struct TopicRouter {
    inner: Mutex<RouterInner>,
}

impl TopicRouter {
    pub fn new() -> Arc<TopicRouter> {
        Arc::new(TopicRouter::default())
    }

    /// Registers `callback` for every topic in `topics`; the returned
    /// subscription detaches all of them when dropped.
    pub fn subscribe(
        self: &Arc<Self>,
        topics: &[String],
        callback: SubscriptionCallback,
    ) -> Subscription {
        let mut entries = Vec::with_capacity(topics.len());
        {
            let mut inner = self.inner.lock().expect("router lock poisoned");
            for topic in topics {
                let id = inner.next_id;
                inner.next_id += 1;
                inner
                    .topics
                    .entry(topic.clone())
                    .or_default()
                    .insert(id, callback.clone());
                entries.push((topic.clone(), id));
            }
        }

        let router = Arc::clone(self);
        Subscription::new(move || router.detach(&entries))
    }

    fn detach(&self, entries: &[(String, u64)]) {
        let mut inner = self.inner.lock().expect("router lock poisoned");
        for (topic, id) in entries {
            if let Some(callbacks) = inner.topics.get_mut(topic) {
                callbacks.remove(id);
                if callbacks.is_empty() {
                    inner.topics.remove(topic);
                }
            }
        }
    }

    /// Delivers `data` to every local subscriber of `topic`. Returns the
    /// number of callbacks invoked.
    pub fn dispatch(&self, topic: &str, data: &[u8]) -> usize {
        let callbacks: Vec<SubscriptionCallback> = {
            let inner = self.inner.lock().expect("router lock poisoned");
            match inner.topics.get(topic) {
                Some(map) => map.values().cloned().collect(),
                None => return 0,
            }
        };
        for callback in &callbacks {
            callback(data);
        }
        callbacks.len()
    }

    pub fn has_subscribers(&self, topic: &str) -> bool {
        let inner = self.inner.lock().expect("router lock poisoned");
        inner.topics.contains_key(topic)
    }
}
