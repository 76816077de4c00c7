//! Debounce, echo suppression and caching policies shared by the monitors.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

struct DebouncerState<K> {
    next_generation: u64,
    pending: HashMap<K, Pending>,
}

/// Keyed debouncer. Scheduling work for a key cancels whatever was still
/// waiting for that key, so only the last call within `settle` runs.
pub struct Debouncer<K> {
    settle: Duration,
    state: Arc<Mutex<DebouncerState<K>>>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(settle: Duration) -> Self {
        Self {
            settle,
            state: Arc::new(Mutex::new(DebouncerState {
                next_generation: 0,
                pending: HashMap::new(),
            })),
        }
    }

    /// Run `work` once `key` has been quiet for the settle window.
    /// Returns true when an earlier pending run was superseded.
    pub fn schedule<F>(&self, key: K, work: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state.lock().expect("debouncer lock poisoned");
        let generation = state.next_generation;
        state.next_generation += 1;

        let settle = self.settle;
        let shared = Arc::clone(&self.state);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(settle).await;
            {
                let mut state = shared.lock().expect("debouncer lock poisoned");
                match state.pending.get(&task_key) {
                    Some(p) if p.generation == generation => {
                        state.pending.remove(&task_key);
                    }
                    _ => return,
                }
            }
            work.await;
        });

        match state.pending.insert(key, Pending { generation, task }) {
            Some(previous) => {
                previous.task.abort();
                true
            }
            None => false,
        }
    }

    /// Drop pending work for `key`. Returns true if something was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let mut state = self.state.lock().expect("debouncer lock poisoned");
        match state.pending.remove(key) {
            Some(previous) => {
                previous.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.state
            .lock()
            .expect("debouncer lock poisoned")
            .pending
            .contains_key(key)
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for (_, pending) in state.pending.drain() {
                pending.task.abort();
            }
        }
    }
}

/// Remembers recent disconnects so an immediate reconnect of the same
/// entity can be treated as one continuous connection.
pub struct EchoSuppressor<K> {
    window: Duration,
    recent: HashMap<K, Instant>,
}

impl<K: Eq + Hash> EchoSuppressor<K> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            recent: HashMap::new(),
        }
    }

    pub fn note_disconnect(&mut self, key: K) {
        self.prune();
        self.recent.insert(key, Instant::now());
    }

    /// True when `key` disconnected within the window. The remembered
    /// disconnect is consumed either way.
    pub fn is_echo(&mut self, key: &K) -> bool {
        self.prune();
        self.recent.remove(key).is_some()
    }

    fn prune(&mut self) {
        let window = self.window;
        self.recent.retain(|_, at| at.elapsed() < window);
    }
}

/// Small least-recently-used cache. Sizes are a handful of entries, so
/// recency is tracked with a plain queue.
pub struct LruCache<K, V> {
    capacity: usize,
    entries: HashMap<K, V>,
    recency: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            if let Some(k) = self.recency.remove(pos) {
                self.recency.push_back(k);
            }
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.entries.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.entries.get(key)
    }

    /// Look up without affecting recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or replace. Returns the evicted key, if any.
    pub fn insert(&mut self, key: K, value: V) -> Option<K> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.touch(&key);
            return None;
        }
        self.recency.push_back(key);

        if self.entries.len() > self.capacity {
            let evicted = self.recency.pop_front()?;
            self.entries.remove(&evicted);
            return Some(evicted);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_runs_after_settle() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&runs);
        debouncer.schedule("a", async move {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.is_pending(&"a"));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_pending(&"a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_coalesces_per_key() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let last = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let l = Arc::clone(&last);
            let superseded = debouncer.schedule("a", async move {
                l.lock().unwrap().push(i);
            });
            assert_eq!(superseded, i > 0);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let l = Arc::clone(&last);
        debouncer.schedule("b", async move {
            l.lock().unwrap().push(99);
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let mut got = last.lock().unwrap().clone();
        got.sort_unstable();
        assert_eq!(got, vec![3, 99]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debouncer_cancel() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let runs = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&runs);
        debouncer.schedule(1u32, async move {
            r.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.cancel(&1));
        assert!(!debouncer.cancel(&1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_within_window() {
        let mut echo = EchoSuppressor::new(Duration::from_secs(2));
        echo.note_disconnect("aa");

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(echo.is_echo(&"aa"));
        // Consumed
        assert!(!echo.is_echo(&"aa"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_echo_after_window() {
        let mut echo = EchoSuppressor::new(Duration::from_secs(2));
        echo.note_disconnect("aa");

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(!echo.is_echo(&"aa"));
        assert!(!echo.is_echo(&"bb"));
    }

    #[test]
    fn test_lru_evicts_least_recently_touched() {
        let mut cache = LruCache::new(5);
        for i in 0..5 {
            assert_eq!(cache.insert(i, i * 10), None);
        }
        // 0 becomes most recent, so 1 is now the oldest
        assert_eq!(cache.get(&0), Some(&0));

        assert_eq!(cache.insert(5, 50), Some(1));
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&0), Some(&0));
        assert_eq!(cache.get(&5), Some(&50));
    }

    #[test]
    fn test_lru_replace_does_not_evict() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.insert("a", 3), None);
        assert_eq!(cache.peek(&"a"), Some(&3));

        // "b" is oldest after "a" was replaced
        assert_eq!(cache.insert("c", 4), Some("b"));
    }

    #[test]
    fn test_lru_peek_does_not_touch() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.peek(&"a"), Some(&1));
        assert_eq!(cache.insert("c", 3), Some("a"));
    }
}
