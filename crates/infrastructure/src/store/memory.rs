//! In-memory key-value store
//!
//! Single-process stand-in for Redis. Expiry uses `tokio::time::Instant`, so
//! tests running with a paused clock can advance time deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_domain::{CounterOutcome, Expiry, KeyValueStore};
use orchestrator_errors::{OrchestratorError, OrchestratorResult};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone)]
enum Value {
    Bytes(Vec<u8>),
    Set(HashSet<String>),
    List(VecDeque<Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn remaining(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(now))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    list_notify: Notify,
    closed: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        info!("Creating in-memory key-value store");
        Self::default()
    }

    fn ensure_open(&self) -> OrchestratorResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(OrchestratorError::store("in-memory store is closed"));
        }
        Ok(())
    }

    fn wrong_type(key: &str) -> OrchestratorError {
        OrchestratorError::store(format!("wrong value type for key {key}"))
    }

    /// Drops the entry if it has expired and returns the live one, if any.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }

    fn deadline(expiry: Expiry, now: Instant, current: Option<Instant>) -> Option<Instant> {
        match expiry {
            Expiry::Never => None,
            Expiry::After(ttl) => Some(now + ttl),
            Expiry::Keep => current,
        }
    }

    async fn try_pop(&self, key: &str) -> OrchestratorResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let popped = match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => items.pop_front(),
            Some(_) => return Err(Self::wrong_type(key)),
            None => None,
        };
        if matches!(
            entries.get(key),
            Some(Entry { value: Value::List(items), .. }) if items.is_empty()
        ) {
            entries.remove(key);
        }
        Ok(popped)
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> OrchestratorResult<Option<Vec<u8>>> {
        Ok(self.get_with_ttl(key).await?.map(|(value, _)| value))
    }

    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> OrchestratorResult<Option<(Vec<u8>, Option<Duration>)>> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(entry) => match &entry.value {
                Value::Bytes(bytes) => Ok(Some((bytes.clone(), entry.remaining(now)))),
                _ => Err(Self::wrong_type(key)),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], expiry: Expiry) -> OrchestratorResult<()> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let current = Self::live(&mut entries, key, now).and_then(|e| e.expires_at);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: Self::deadline(expiry, now, current),
            },
        );
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<bool> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if Self::live(&mut entries, key, now).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: ttl.map(|ttl| now + ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        new: &[u8],
        expiry: Expiry,
    ) -> OrchestratorResult<bool> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let Some(entry) = Self::live(&mut entries, key, now) else {
            return Ok(false);
        };
        match &entry.value {
            Value::Bytes(current) if current.as_slice() == expected => {
                entry.expires_at = Self::deadline(expiry, now, entry.expires_at);
                entry.value = Value::Bytes(new.to_vec());
                Ok(true)
            }
            Value::Bytes(_) => Ok(false),
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<bool> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.remove(key).is_some_and(|e| !e.is_expired(now)))
    }

    async fn delete_many(&self, keys: &[String]) -> OrchestratorResult<u64> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter(|key| entries.remove(key.as_str()).is_some_and(|e| !e.is_expired(now)))
            .count();
        Ok(removed as u64)
    }

    async fn delete_if_equals(&self, key: &str, expected: &[u8]) -> OrchestratorResult<bool> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let matches = matches!(
            Self::live(&mut entries, key, now),
            Some(Entry { value: Value::Bytes(current), .. }) if current.as_slice() == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn ttl(&self, key: &str) -> OrchestratorResult<Option<Duration>> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(Self::live(&mut entries, key, now).and_then(|e| e.remaining(now)))
    }

    async fn increment_below(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> OrchestratorResult<CounterOutcome> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let (current, expires_at) = match Self::live(&mut entries, key, now) {
            Some(entry) => match &entry.value {
                Value::Bytes(bytes) => {
                    let count = std::str::from_utf8(bytes)
                        .ok()
                        .and_then(|s| s.parse::<u64>().ok())
                        .ok_or_else(|| Self::wrong_type(key))?;
                    (count, entry.expires_at)
                }
                _ => return Err(Self::wrong_type(key)),
            },
            None => (0, None),
        };

        if current >= limit {
            return Ok(CounterOutcome {
                applied: false,
                count: current,
                ttl: expires_at.map_or(Duration::ZERO, |at| at.saturating_duration_since(now)),
            });
        }

        let count = current + 1;
        let expires_at = if current == 0 {
            Some(now + window)
        } else {
            expires_at
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(count.to_string().into_bytes()),
                expires_at,
            },
        );
        Ok(CounterOutcome {
            applied: true,
            count,
            ttl: expires_at.map_or(Duration::ZERO, |at| at.saturating_duration_since(now)),
        })
    }

    async fn set_add(
        &self,
        key: &str,
        members: &[String],
        ttl: Option<Duration>,
    ) -> OrchestratorResult<()> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let wanted = ttl.map(|ttl| now + ttl);

        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let Value::Set(set) = &mut entry.value else {
                    return Err(Self::wrong_type(key));
                };
                set.extend(members.iter().cloned());
                if let (Some(current), Some(wanted)) = (entry.expires_at, wanted) {
                    entry.expires_at = Some(current.max(wanted));
                }
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(members.iter().cloned().collect()),
                        expires_at: wanted,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> OrchestratorResult<()> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let now_empty = match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            Some(_) => return Err(Self::wrong_type(key)),
            None => false,
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> OrchestratorResult<Vec<String>> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn list_push(&self, key: &str, value: &[u8]) -> OrchestratorResult<()> {
        self.ensure_open()?;
        {
            let mut entries = self.entries.lock().await;
            let now = Instant::now();
            match Self::live(&mut entries, key, now) {
                Some(Entry {
                    value: Value::List(items),
                    ..
                }) => items.push_back(value.to_vec()),
                Some(_) => return Err(Self::wrong_type(key)),
                None => {
                    entries.insert(
                        key.to_string(),
                        Entry {
                            value: Value::List(VecDeque::from([value.to_vec()])),
                            expires_at: None,
                        },
                    );
                }
            }
        }
        self.list_notify.notify_waiters();
        Ok(())
    }

    async fn list_pop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> OrchestratorResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.list_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(value) = self.try_pop(key).await? {
                return Ok(Some(value));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!("list pop timed out: {}", key);
                return Ok(None);
            }
            self.ensure_open()?;
        }
    }

    async fn list_len(&self, key: &str) -> OrchestratorResult<u64> {
        self.ensure_open()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::List(items),
                ..
            }) => Ok(items.len() as u64),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn health_check(&self) -> OrchestratorResult<bool> {
        Ok(!self.closed.load(Ordering::SeqCst))
    }

    async fn close(&self) -> OrchestratorResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.list_notify.notify_waiters();
        info!("In-memory store closed");
        Ok(())
    }
}
