use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

use crate::domain::sync::lock;

/// Something contributions can be folded into.
pub trait Aggregate: Default + Clone + Send {
    type Item;

    fn absorb(&mut self, item: Self::Item);
}

impl<T: Clone + Send> Aggregate for Vec<T> {
    type Item = T;

    fn absorb(&mut self, item: T) {
        self.push(item);
    }
}

impl<K, V> Aggregate for HashMap<K, V>
where
    K: Eq + Hash + Clone + Send,
    V: Clone + Send,
{
    type Item = (K, V);

    fn absorb(&mut self, (key, value): (K, V)) {
        self.insert(key, value);
    }
}

#[derive(Debug)]
struct CollectorState<A> {
    remaining: usize,
    aggregate: A,
}

/// One-shot fan-in barrier.
///
/// Expects a fixed number of contributions. Waiters are released once the last one has
/// arrived; anything added after that is ignored. A collector expecting zero contributions
/// is complete from the start.
#[derive(Debug)]
pub struct Collector<A: Aggregate> {
    state: Mutex<CollectorState<A>>,
    completed: Notify,
}

/// Collects every contribution into a list.
pub type ListCollector<T> = Collector<Vec<T>>;

/// Collects keyed contributions; a repeated key overwrites the earlier value.
pub type MappingCollector<K, V> = Collector<HashMap<K, V>>;

impl<A: Aggregate> Collector<A> {
    pub fn new(expected: usize) -> Self {
        Collector { state: Mutex::new(CollectorState { remaining: expected, aggregate: A::default() }), completed: Notify::new() }
    }

    /// Returns false if the collector was already complete and `item` was dropped.
    pub fn add(&self, item: A::Item) -> bool {
        let finished = {
            let mut state = lock(&self.state);
            if state.remaining == 0 {
                return false;
            }
            state.aggregate.absorb(item);
            state.remaining -= 1;
            state.remaining == 0
        };

        if finished {
            self.completed.notify_waiters();
        }
        true
    }

    /// True while contributions are still outstanding.
    pub fn is_working(&self) -> bool {
        lock(&self.state).remaining > 0
    }

    /// Current aggregate, complete or not.
    pub fn snapshot(&self) -> A {
        lock(&self.state).aggregate.clone()
    }

    /// Waits until every expected contribution has arrived.
    pub async fn wait(&self) -> A {
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            // Register before checking so a completion in between is not missed.
            notified.as_mut().enable();

            {
                let state = lock(&self.state);
                if state.remaining == 0 {
                    return state.aggregate.clone();
                }
            }

            notified.await;
        }
    }

    /// Like [`Collector::wait`], giving up after `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<A> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }
}
