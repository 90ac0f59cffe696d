use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Cancellable one-shot timers keyed by payment hash.
///
/// Each arm hands out a new generation number. A firing timer must
/// [`claim`](DealTimers::claim) its generation before acting, so a timer that
/// was cancelled or re-armed after its sleep completed becomes a no-op.
#[derive(Default)]
pub struct DealTimers {
    next_generation: u64,
    entries: HashMap<String, TimerEntry>,
}

impl DealTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `on_fire(generation)` after `delay`, replacing any timer
    /// already armed for `key`.
    pub fn arm<F, Fut>(&mut self, key: &str, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.next_generation += 1;
        let generation = self.next_generation;
        let fire = on_fire(generation);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });
        if let Some(previous) = self.entries.insert(
            key.to_string(),
            TimerEntry { generation, handle },
        ) {
            previous.handle.abort();
        }
        generation
    }

    /// Cancels the timer for `key`. Returns `true` if one was armed.
    pub fn cancel(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Called from inside a firing timer. Returns `true` only if `generation`
    /// is still the armed one, and disarms it.
    pub fn claim(&mut self, key: &str, generation: u64) -> bool {
        if self.entries.get(key).map(|e| e.generation) == Some(generation) {
            self.entries.remove(key);
            true
        } else {
            false
        }
    }

    #[cfg(test)]
    fn is_armed(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.handle.abort();
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
