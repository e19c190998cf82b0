//! Key-value store abstraction behind the response cache.
//!
//! The cache only needs four operations from its backing store. `RedisStore`
//! talks to a Redis server; [`MemoryStore`] keeps entries in process and is
//! used for single-node deployments and tests.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use thiserror::Error;

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed cache entry `{key}`: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Operations the cache performs against its backing store.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Replace the value under `key`, expiring it after `ttl_secs`.
    async fn set_with_expiry(&self, key: &str, value: &str, ttl_secs: u64)
    -> Result<(), StoreError>;

    /// Remove every key matching a glob `pattern`, returning how many were removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError>;

    /// Raw `name:value` lines describing store activity.
    async fn info(&self) -> Result<String, StoreError>;

    /// Release connections held by the store.
    async fn close(&self) {}
}

struct StoredValue {
    value: String,
    expires_at: Instant,
}

/// In-process store with per-entry expiry and LRU eviction.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, StoredValue>>,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Number of live and not yet reaped entries.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "memory_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "memory_get");
        let now = Instant::now();

        let expired = match entries.get(key) {
            Some(stored) if stored.expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(stored.value.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
            self.expired.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<(), StoreError> {
        let stored = StoredValue {
            value: value.to_string(),
            expires_at: Instant::now() + Duration::from_secs(ttl_secs),
        };
        rw_write(&self.entries, SOURCE, "memory_set").put(key.to_string(), stored);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let mut entries = rw_write(&self.entries, SOURCE, "memory_delete_matching");
        let now = Instant::now();
        let matched: Vec<(String, bool)> = entries
            .iter()
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, stored)| (key.clone(), stored.expires_at > now))
            .collect();

        let mut deleted = 0;
        for (key, live) in &matched {
            entries.pop(key);
            if *live {
                deleted += 1;
            } else {
                self.expired.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(deleted)
    }

    async fn info(&self) -> Result<String, StoreError> {
        let keys = self.len();
        Ok(format!(
            "# Stats\r\nkeys:{keys}\r\nkeyspace_hits:{}\r\nkeyspace_misses:{}\r\nexpired_keys:{}\r\n",
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.expired.load(Ordering::Relaxed),
        ))
    }
}

/// Redis-style glob matching supporting `*`, `?`, `[...]` classes and `\`
/// escapes. Classes accept ranges (`[a-z]`) and negation (`[^0-9]`); an
/// unterminated class runs to the end of the pattern.
pub fn glob_match(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, c));
                p += 1;
                continue;
            }
            Some('?') => {
                p += 1;
                c += 1;
                continue;
            }
            Some('[') => {
                let (matched, next) = match_class(&pattern, p + 1, candidate[c]);
                if matched {
                    p = next;
                    c += 1;
                    continue;
                }
            }
            Some('\\') if pattern.get(p + 1) == Some(&candidate[c]) => {
                p += 2;
                c += 1;
                continue;
            }
            Some(&ch) if ch != '\\' && ch == candidate[c] => {
                p += 1;
                c += 1;
                continue;
            }
            _ => {}
        }

        // Backtrack to the last star and let it swallow one more character.
        match star {
            Some((star_p, star_c)) => {
                p = star_p + 1;
                c = star_c + 1;
                star = Some((star_p, star_c + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// Match `ch` against the class body starting at `start` (just past `[`).
/// Returns whether it matched and the pattern index after the closing `]`.
fn match_class(pattern: &[char], start: usize, ch: char) -> (bool, usize) {
    let mut i = start;
    let negated = pattern.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut matched = false;
    while let Some(&token) = pattern.get(i) {
        if token == ']' {
            i += 1;
            return (matched != negated, i);
        }
        if token == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == ch;
            i += 2;
        } else if pattern.get(i + 1) == Some(&'-')
            && pattern.get(i + 2).is_some_and(|&end| end != ']')
        {
            let end = pattern[i + 2];
            let (low, high) = (token.min(end), token.max(end));
            matched |= (low..=high).contains(&ch);
            i += 3;
        } else {
            matched |= token == ch;
            i += 1;
        }
    }
    (matched != negated, i)
}
