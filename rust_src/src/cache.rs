//! Time-bounded item pool cache owned by the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::item::Item;

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

struct CacheEntry {
    items: Arc<Vec<Item>>,
    fetched_at: DateTime<Utc>,
}

/// Item pools keyed by subject, each valid for `ttl` after insertion.
pub struct ItemCache<C: Clock = SystemClock> {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    clock: C,
}

impl ItemCache<SystemClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, SystemClock)
    }
}

impl<C: Clock> ItemCache<C> {
    pub fn with_clock(ttl: Duration, clock: C) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Cached pool for `subject`, or `None` if missing or expired.
    pub fn get(&self, subject: &str) -> Option<Arc<Vec<Item>>> {
        let entry = self.entries.get(subject)?;
        if self.clock.now() - entry.fetched_at >= self.ttl {
            return None;
        }
        Some(Arc::clone(&entry.items))
    }

    pub fn insert(&mut self, subject: impl Into<String>, items: Vec<Item>) -> Arc<Vec<Item>> {
        let items = Arc::new(items);
        self.entries.insert(
            subject.into(),
            CacheEntry {
                items: Arc::clone(&items),
                fetched_at: self.clock.now(),
            },
        );
        items
    }

    /// Return the cached pool, or load, cache and return a fresh one.
    pub fn get_or_insert_with<F>(&mut self, subject: &str, load: F) -> Arc<Vec<Item>>
    where
        F: FnOnce() -> Vec<Item>,
    {
        if let Some(items) = self.get(subject) {
            return items;
        }
        tracing::debug!(subject, "item cache miss");
        self.insert(subject, load())
    }

    pub fn invalidate(&mut self, subject: &str) -> bool {
        self.entries.remove(subject).is_some()
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now - entry.fetched_at < ttl);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
