// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Two-generation TTL session table.
//!
//! Sessions are keyed by `(vs, client_addr, client_port)`. Inserts and
//! refreshes go to the current generation; while a previous generation is
//! still draining, lookups consult it as a fallback and migrate hits
//! forward. Every worker carries a `use_prev_gen` flag: it is raised when
//! a resize publishes a new generation and cleared by the worker at its
//! next iteration boundary; once all flags are down the previous
//! generation is retired.
//!
//! Ring selection keys on the flow hash, so all packets of a session land
//! on one worker and each key has a single writer.

use crate::module::{RealId, VsId};
use arc_swap::{ArcSwap, ArcSwapOption};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, info};

/// Session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Virtual service the session belongs to.
    pub vs: VsId,
    /// Client address, IPv4 mapped into the low bytes.
    pub client_addr: [u8; 16],
    /// Client port.
    pub client_port: u16,
}

/// Session state.
#[derive(Debug, Clone, Copy)]
pub struct SessionValue {
    /// The real the session is pinned to.
    pub real: RealId,
    /// Creation timestamp, coarse milliseconds.
    pub create_ms: u64,
    /// Last refresh timestamp.
    pub last_ms: u64,
    /// Idle timeout from `last_ms`.
    pub timeout_ms: u64,
}

impl SessionValue {
    fn expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_ms) > self.timeout_ms
    }
}

/// Sizing and resize policy.
#[derive(Debug, Clone, Copy)]
pub struct SessionTableConfig {
    /// Capacity of the first generation.
    pub capacity: usize,
    /// Resize when `len * 8 / capacity` reaches this.
    pub density_threshold: u8,
    /// Worker count, for the `use_prev_gen` flag set.
    pub workers: usize,
}

#[derive(Debug)]
struct TableGen {
    map: DashMap<SessionKey, SessionValue, ahash::RandomState>,
    capacity: usize,
}

impl TableGen {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity_and_hasher(capacity, ahash::RandomState::default()),
            capacity,
        }
    }

    fn density(&self) -> usize {
        self.map.len() * 8 / self.capacity.max(1)
    }
}

/// The session table.
#[derive(Debug)]
pub struct SessionTable {
    current: ArcSwap<TableGen>,
    prev: ArcSwapOption<TableGen>,
    current_gen: AtomicU64,
    use_prev_gen: Vec<AtomicBool>,
    density_threshold: u8,
}

impl SessionTable {
    /// An empty table per `config`.
    #[must_use]
    pub fn new(config: &SessionTableConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(TableGen::with_capacity(config.capacity.max(16))),
            prev: ArcSwapOption::const_empty(),
            current_gen: AtomicU64::new(1),
            use_prev_gen: (0..config.workers.max(1))
                .map(|_| AtomicBool::new(false))
                .collect(),
            density_threshold: config.density_threshold,
        }
    }

    /// The generation counter; bumped by each resize.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current_gen.load(Ordering::Acquire)
    }

    /// Live sessions in the current generation.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current.load().map.len()
    }

    /// True when the current generation holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a live session, migrating previous-generation hits forward.
    /// Expired entries are removed on sight and read as misses.
    #[must_use]
    pub fn lookup(&self, key: &SessionKey, now_ms: u64) -> Option<SessionValue> {
        let current = self.current.load();
        if let Some(entry) = current.map.get(key) {
            let value = *entry;
            drop(entry);
            if value.expired(now_ms) {
                current.map.remove(key);
                return None;
            }
            return Some(value);
        }
        let prev = self.prev.load_full()?;
        let entry = prev.map.remove(key).map(|(_, v)| v)?;
        if entry.expired(now_ms) {
            return None;
        }
        // migrate forward so the drain converges
        current.map.insert(*key, entry);
        Some(entry)
    }

    /// Insert or overwrite a session in the current generation, resizing
    /// first when density crossed the threshold.
    pub fn insert(&self, key: SessionKey, value: SessionValue) {
        let current = self.current.load();
        if current.density() >= usize::from(self.density_threshold) {
            drop(current);
            self.grow();
        }
        self.current.load().map.insert(key, value);
    }

    /// Refresh a session's liveness and timeout class.
    pub fn refresh(&self, key: &SessionKey, now_ms: u64, timeout_ms: u64, real: RealId) {
        let current = self.current.load();
        let mut entry = current
            .map
            .entry(*key)
            .or_insert(SessionValue {
                real,
                create_ms: now_ms,
                last_ms: now_ms,
                timeout_ms,
            });
        entry.real = real;
        entry.last_ms = now_ms;
        entry.timeout_ms = timeout_ms;
    }

    /// Double the table, keeping the old generation for draining lookups.
    /// Raises every worker's `use_prev_gen` flag.
    pub fn grow(&self) {
        // a second resize while one is draining folds the drain forward
        if let Some(prev) = self.prev.load_full() {
            let current = self.current.load();
            for entry in prev.map.iter() {
                current.map.entry(*entry.key()).or_insert(*entry.value());
            }
        }
        let old = self.current.load_full();
        let grown = TableGen::with_capacity(old.capacity * 2);
        info!(
            from = old.capacity,
            to = grown.capacity,
            "session table resize"
        );
        self.prev.store(Some(Arc::clone(&old)));
        self.current.store(Arc::new(grown));
        self.current_gen.fetch_add(1, Ordering::AcqRel);
        for flag in &self.use_prev_gen {
            flag.store(true, Ordering::Release);
        }
    }

    /// Worker iteration boundary: clear the worker's `use_prev_gen` flag
    /// and retire the previous generation once every worker has passed.
    pub fn worker_checkpoint(&self, worker_idx: usize) {
        let Some(flag) = self.use_prev_gen.get(worker_idx) else {
            return;
        };
        if !flag.swap(false, Ordering::AcqRel) {
            return;
        }
        if self
            .use_prev_gen
            .iter()
            .all(|f| !f.load(Ordering::Acquire))
            && let Some(prev) = self.prev.swap(None)
        {
            // anything not migrated by now is carried over wholesale
            let current = self.current.load();
            for entry in prev.map.iter() {
                current.map.entry(*entry.key()).or_insert(*entry.value());
            }
            debug!(drained = prev.map.len(), "retired previous session generation");
        }
    }

    /// Remove expired sessions; returns how many were purged.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let current = self.current.load();
        let before = current.map.len();
        current.map.retain(|_, v| !v.expired(now_ms));
        let mut purged = before - current.map.len();
        if let Some(prev) = self.prev.load_full() {
            let before = prev.map.len();
            prev.map.retain(|_, v| !v.expired(now_ms));
            purged += before - prev.map.len();
        }
        purged
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn key(port: u16) -> SessionKey {
        let mut client_addr = [0u8; 16];
        client_addr[12..].copy_from_slice(&[1, 2, 3, 4]);
        SessionKey {
            vs: 0,
            client_addr,
            client_port: port,
        }
    }

    fn value(real: RealId, now: u64, timeout: u64) -> SessionValue {
        SessionValue {
            real,
            create_ms: now,
            last_ms: now,
            timeout_ms: timeout,
        }
    }

    fn table(capacity: usize, workers: usize) -> SessionTable {
        SessionTable::new(&SessionTableConfig {
            capacity,
            density_threshold: 7,
            workers,
        })
    }

    #[test]
    fn lookup_respects_timeout() {
        let t = table(64, 1);
        t.insert(key(1000), value(3, 0, 200));
        assert_eq!(t.lookup(&key(1000), 150).unwrap().real, 3);
        // expired: last + timeout < now
        assert!(t.lookup(&key(1000), 500).is_none());
        // and removed on sight
        assert!(t.is_empty());
    }

    #[test]
    fn refresh_extends_life() {
        let t = table(64, 1);
        t.insert(key(1), value(2, 0, 100));
        t.refresh(&key(1), 90, 100, 2);
        let v = t.lookup(&key(1), 180).unwrap();
        assert_eq!(v.real, 2);
        assert_eq!(v.create_ms, 0);
        assert_eq!(v.last_ms, 90);
    }

    #[traced_test]
    #[test]
    fn density_trigger_grows_and_drains() {
        let t = table(16, 2);
        let gen_before = t.generation();
        // 7/8 of 16 = 14 entries trip the threshold
        for port in 0..15u16 {
            t.insert(key(port), value(0, 0, 10_000));
        }
        assert!(t.generation() > gen_before);
        assert!(logs_contain("session table resize"));

        // lookups still find sessions created before the resize
        assert!(t.lookup(&key(3), 1).is_some());

        // both workers pass an iteration boundary; prev retires and every
        // session survives
        t.worker_checkpoint(0);
        t.worker_checkpoint(1);
        for port in 0..15u16 {
            assert!(t.lookup(&key(port), 1).is_some(), "port {port}");
        }
    }

    #[test]
    fn forced_grow_keeps_sessions_visible() {
        let t = table(1024, 1);
        t.insert(key(7), value(5, 0, 10_000));
        t.grow();
        assert_eq!(t.lookup(&key(7), 1).unwrap().real, 5);
        t.worker_checkpoint(0);
        assert_eq!(t.lookup(&key(7), 1).unwrap().real, 5);
    }

    #[test]
    fn purge_removes_only_expired() {
        let t = table(64, 1);
        t.insert(key(1), value(0, 0, 100));
        t.insert(key(2), value(0, 0, 10_000));
        assert_eq!(t.purge_expired(5_000), 1);
        assert!(t.lookup(&key(2), 5_000).is_some());
    }
}
