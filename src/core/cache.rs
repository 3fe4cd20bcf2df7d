//! Memoized evaluation results with dependency tracking.
//!
//! Entries are keyed by storage path. Each entry remembers the set of paths
//! read while computing it; invalidation walks that dependency graph with a
//! worklist so indirect dependents are cleared too. Concurrent reads of the
//! same uncached path coalesce onto one pending computation.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::future::{LocalBoxFuture, Shared};
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::path;
use crate::errors::Error;

/// Result of one expression computation, cloned to every coalesced waiter.
#[derive(Debug, Clone)]
pub(crate) struct EvalOutcome {
    pub value: Value,
    pub deps: Rc<HashSet<String>>,
    /// False when the expression invoked `fresh(...)`; such results are
    /// never stored.
    pub cacheable: bool,
}

pub(crate) type SharedEval = Shared<LocalBoxFuture<'static, Result<EvalOutcome, Error>>>;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    deps: Rc<HashSet<String>>,
}

struct PendingSlot {
    token: u64,
    future: SharedEval,
}

/// The in-memory evaluation cache.
pub(crate) struct EvalCache {
    entries: RefCell<HashMap<String, CacheEntry>>,
    pending: RefCell<HashMap<String, PendingSlot>>,
    /// Bumped by every mutation; a computation that started before a
    /// mutation must not store its (possibly stale) result.
    generation: Cell<u64>,
    next_token: Cell<u64>,
}

impl EvalCache {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
            pending: RefCell::new(HashMap::new()),
            generation: Cell::new(0),
            next_token: Cell::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    pub fn bump_generation(&self) {
        self.generation.set(self.generation.get() + 1);
    }

    pub fn lookup(&self, key: &str) -> Option<Value> {
        let value = self.entries.borrow().get(key).map(|e| e.value.clone());
        if value.is_some() {
            trace!(key, "cache hit");
        }
        value
    }

    pub fn pending(&self, key: &str) -> Option<SharedEval> {
        self.pending.borrow().get(key).map(|slot| slot.future.clone())
    }

    /// Register an in-flight computation; the returned token scopes removal
    /// to this slot, so a newer computation for the same key is never
    /// detached by a stale owner.
    pub fn insert_pending(&self, key: String, future: SharedEval) -> u64 {
        let token = self.next_token.get();
        self.next_token.set(token + 1);
        self.pending
            .borrow_mut()
            .insert(key, PendingSlot { token, future });
        token
    }

    pub fn remove_pending(&self, key: &str, token: u64) {
        let mut pending = self.pending.borrow_mut();
        if pending.get(key).is_some_and(|slot| slot.token == token) {
            pending.remove(key);
        }
    }

    /// Store a computed value unless a mutation happened since the
    /// computation began. Returns whether the value was stored.
    pub fn store(
        &self,
        key: String,
        value: Value,
        deps: Rc<HashSet<String>>,
        started_generation: u64,
    ) -> bool {
        if self.generation.get() != started_generation {
            debug!(key, "discarding result computed before a mutation");
            return false;
        }
        trace!(key, deps = deps.len(), "cache store");
        self.entries.borrow_mut().insert(key, CacheEntry { value, deps });
        true
    }

    /// Clear every entry whose own path or dependency set is related to the
    /// mutated path, then every entry that depended on those, transitively.
    pub fn invalidate(&self, mutated: &str) {
        let mut queue = vec![mutated.to_string()];
        let mut removed = 0usize;
        while let Some(target) = queue.pop() {
            self.pending
                .borrow_mut()
                .retain(|key, _| !path::related(key, &target));
            let mut entries = self.entries.borrow_mut();
            let hit: Vec<String> = entries
                .iter()
                .filter(|(key, entry)| {
                    path::related(key, &target)
                        || entry.deps.iter().any(|dep| path::related(dep, &target))
                })
                .map(|(key, _)| key.clone())
                .collect();
            for key in hit {
                entries.remove(&key);
                removed += 1;
                queue.push(key);
            }
        }
        if removed > 0 {
            debug!(mutated, removed, "cache invalidated");
        }
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
        self.pending.borrow_mut().clear();
    }

    #[cfg(test)]
    fn insert_raw(&self, key: &str, value: Value, deps: &[&str]) {
        let deps: HashSet<String> = deps.iter().map(|d| d.to_string()).collect();
        self.entries.borrow_mut().insert(
            key.to_string(),
            CacheEntry {
                value,
                deps: Rc::new(deps),
            },
        );
    }

    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.entries.borrow().contains_key(key)
    }
}
