//! Bounded LRU cache for results of idempotent tools.
//!
//! Keys are `"<tool>:<canonical arguments>"`. Canonical form sorts object keys
//! recursively and collapses whitespace inside strings, so calls that differ
//! only in key order or incidental spacing share one entry. Numbers keep their
//! JSON spelling (`1` and `1.0` are different keys).

use crate::types::ToolResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: ToolResult,
    pub inserted_at: Instant,
    pub last_access: Instant,
    // Tie-breaker for entries touched within the same clock tick
    access_seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    seq: u64,
    /// Bumped by `clear`; results computed under an older generation are not stored
    generation: u64,
}

impl CacheState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn evict_lru(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| (e.last_access, e.access_seq))
            .map(|e| e.key.clone())?;
        self.entries.remove(&oldest);
        self.evictions += 1;
        Some(oldest)
    }
}

pub struct ResponseCache {
    state: Mutex<CacheState>,
    max_size: usize,
    ttl: Option<Duration>,
}

impl ResponseCache {
    /// A `max_size` of zero disables storage; every lookup misses.
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_size,
            ttl: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let now = Instant::now();
        let mut state = self.lock();
        let expired = match (state.entries.get(key), self.ttl) {
            (Some(entry), Some(ttl)) => now.duration_since(entry.inserted_at) >= ttl,
            _ => false,
        };
        if expired {
            state.entries.remove(key);
        }

        let seq = state.next_seq();
        match state.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = now;
                entry.access_seq = seq;
                let value = entry.value.clone();
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Insert or replace, evicting the least recently used entry when full.
    pub fn put(&self, key: String, value: ToolResult) {
        if self.max_size == 0 {
            return;
        }
        let mut state = self.lock();
        Self::insert(&mut state, self.max_size, key, value);
    }

    /// Like [`ResponseCache::put`], but drops the value if the cache was cleared
    /// since `generation` was read. Returns whether the value was stored.
    pub fn put_if_current(&self, key: String, value: ToolResult, generation: u64) -> bool {
        if self.max_size == 0 {
            return false;
        }
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        Self::insert(&mut state, self.max_size, key, value);
        true
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    fn insert(state: &mut CacheState, max_size: usize, key: String, value: ToolResult) {
        let now = Instant::now();
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= max_size {
                match state.evict_lru() {
                    Some(evicted) => tracing::debug!(key = %evicted, "evicted cache entry"),
                    None => break,
                }
            }
        }
        let seq = state.next_seq();
        state.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                inserted_at: now,
                last_access: now,
                access_seq: seq,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry, e.g. after the page changed under all of them.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.generation += 1;
    }

    /// Drops every entry produced by `tool_name`. Returns how many were removed.
    pub fn invalidate_tool(&self, tool_name: &str) -> usize {
        let prefix = format!("{}:", tool_name);
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|key, _| !key.starts_with(&prefix));
        before - state.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            max_size: self.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }
}

/// Deterministic cache key for a tool invocation.
pub fn cache_key(tool_name: &str, arguments: &Map<String, Value>) -> String {
    let mut key = String::with_capacity(tool_name.len() + 64);
    key.push_str(tool_name);
    key.push(':');
    write_object(arguments, &mut key);
    key
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    out.push('{');
    for (i, k) in keys.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(k, out);
        out.push(':');
        write_canonical(&map[k], out);
    }
    out.push('}');
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => write_object(map, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::String(s) => {
            let normalized: Vec<&str> = s.split_whitespace().collect();
            write_string(&normalized.join(" "), out);
        }
        other => out.push_str(&other.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    // Value::String display yields a quoted, escaped JSON string
    out.push_str(&Value::String(s.to_string()).to_string());
}
