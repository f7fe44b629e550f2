//! In-process implementation of [`KvBackend`] for tests and local runs.

use crate::{KvBackend, Result, StoreError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MemoryState {
    strings: HashMap<String, (String, Option<Instant>)>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(i64, String)>>,
}

impl MemoryState {
    fn live_string(&mut self, key: &str) -> Option<&String> {
        if let Some((_, Some(deadline))) = self.strings.get(key) {
            if *deadline <= Instant::now() {
                self.strings.remove(key);
                return None;
            }
        }
        self.strings.get(key).map(|(value, _)| value)
    }
}

/// Mutex-guarded in-memory store.
///
/// Supports an "outage" switch so tests can drive the fail-open paths of the
/// rate limiter and idempotency store.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a backend outage; all operations fail until cleared.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory backend offline (test)"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvBackend for MemoryBackend {
    async fn incr(&self, key: &str) -> Result<i64> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let current = state
            .live_string(key)
            .map(|v| v.parse::<i64>().unwrap_or(0))
            .unwrap_or(0);
        let next = current + 1;
        let expiry = state.strings.get(key).and_then(|(_, e)| *e);
        state.strings.insert(key.to_string(), (next.to_string(), expiry));
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        if let Some(entry) = state.strings.get_mut(key) {
            entry.1 = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        Ok(state.live_string(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state.strings.insert(
            key.to_string(),
            (
                value.to_string(),
                Some(Instant::now() + Duration::from_secs(ttl_secs)),
            ),
        );
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        state
            .lists
            .entry(key.to_string())
            .or_default()
            .push_front(value.to_string());
        Ok(())
    }

    async fn move_tail_to_head(&self, src: &str, dst: &str) -> Result<Option<String>> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let item = state.lists.get_mut(src).and_then(|list| list.pop_back());
        if let Some(value) = item {
            state
                .lists
                .entry(dst.to_string())
                .or_default()
                .push_front(value.clone());
            return Ok(Some(value));
        }
        Ok(None)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<usize> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|item| item != value);
        Ok(before - list.len())
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>> {
        self.check_available()?;
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.check_available()?;
        let state = self.state.lock().expect("memory store lock poisoned");
        Ok(state.lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, score: i64, member: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let zset = state.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        zset.push((score, member.to_string()));
        zset.sort_by_key(|(score, _)| *score);
        Ok(())
    }

    async fn zpop_due(&self, key: &str, max_score: i64) -> Result<Vec<String>> {
        self.check_available()?;
        let mut state = self.state.lock().expect("memory store lock poisoned");
        let Some(zset) = state.zsets.get_mut(key) else {
            return Ok(vec![]);
        };
        let due: Vec<String> = zset
            .iter()
            .filter(|(score, _)| *score <= max_score)
            .map(|(_, member)| member.clone())
            .collect();
        zset.retain(|(score, _)| *score > max_score);
        Ok(due)
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}
