use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::analytics::{compute_analytics, AnalyticsResult};
use crate::config::{ChainKey, Config, Thresholds};
use crate::state::HistoryWindow;
use crate::types::Snapshot;

// ---------------------------------------------------------------------------
// ChainState
// ---------------------------------------------------------------------------

/// Everything the engine keeps for one symbol/expiry. Only `ChainStore` mutates it, and
/// only while holding the DashMap entry lock, so passes for one chain are serialized.
#[derive(Debug)]
struct ChainState {
    history: HistoryWindow,
    latest: Option<Arc<AnalyticsResult>>,
    /// Sequence handed to the most recently started fetch.
    issued_seq: u64,
    /// Sequence of the fetch whose outcome was last applied (success or failure).
    applied_seq: u64,
    stale: bool,
    last_error: Option<String>,
    last_success_ms: Option<i64>,
    passes: u64,
    failures: u64,
    dropped: u64,
}

impl ChainState {
    fn new(max_entries: usize, max_minutes: u64) -> Self {
        Self {
            history: HistoryWindow::new(max_entries, max_minutes),
            latest: None,
            issued_seq: 0,
            applied_seq: 0,
            stale: false,
            last_error: None,
            last_success_ms: None,
            passes: 0,
            failures: 0,
            dropped: 0,
        }
    }
}

/// Read-only view of a chain for the API: the latest analytics (if any) plus freshness.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus {
    pub symbol: String,
    pub expiry: Option<String>,
    pub stale: bool,
    pub last_error: Option<String>,
    /// Fetch time of the snapshot behind `latest`.
    pub fetched_at_ms: Option<i64>,
    pub last_success_ms: Option<i64>,
    pub history_len: usize,
    pub passes: u64,
    pub failures: u64,
    pub dropped: u64,
    #[serde(skip)]
    pub latest: Option<Arc<AnalyticsResult>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// A newer fetch already landed; this result was discarded.
    Dropped,
}

// ---------------------------------------------------------------------------
// ChainStore
// ---------------------------------------------------------------------------

pub struct ChainStore {
    chains: DashMap<ChainKey, ChainState>,
    history_max_entries: usize,
    history_max_minutes: u64,
    thresholds: Thresholds,
}

impl ChainStore {
    pub fn new(history_max_entries: usize, history_max_minutes: u64, thresholds: Thresholds) -> Arc<Self> {
        Arc::new(Self {
            chains: DashMap::new(),
            history_max_entries,
            history_max_minutes,
            thresholds,
        })
    }

    pub fn from_config(cfg: &Config) -> Arc<Self> {
        let store = Self::new(cfg.history_max_entries, cfg.history_max_minutes, cfg.thresholds.clone());
        for key in &cfg.chains {
            store.register(key.clone());
        }
        store
    }

    /// Start tracking a chain. Idempotent.
    pub fn register(&self, key: ChainKey) {
        self.chains
            .entry(key)
            .or_insert_with(|| ChainState::new(self.history_max_entries, self.history_max_minutes));
    }

    /// Hand out the sequence number for a fetch that is about to start.
    pub fn next_seq(&self, key: &ChainKey) -> u64 {
        let mut state = self
            .chains
            .entry(key.clone())
            .or_insert_with(|| ChainState::new(self.history_max_entries, self.history_max_minutes));
        state.issued_seq += 1;
        state.issued_seq
    }

    /// Run one analytics pass for a fetched snapshot and publish it.
    ///
    /// The pass reads the history as it was before this snapshot, then appends it.
    /// Results from a fetch older than the last applied one are dropped. An empty
    /// snapshot publishes the neutral result but is kept out of the history.
    pub fn apply(&self, key: &ChainKey, seq: u64, snapshot: Snapshot) -> ApplyOutcome {
        let mut state = self
            .chains
            .entry(key.clone())
            .or_insert_with(|| ChainState::new(self.history_max_entries, self.history_max_minutes));
        if seq <= state.applied_seq {
            state.dropped += 1;
            return ApplyOutcome::Dropped;
        }

        let result = compute_analytics(&snapshot, &state.history, &self.thresholds);
        if !snapshot.is_empty() {
            state.history.append(Arc::new(snapshot));
        }
        state.latest = Some(Arc::new(result));
        state.applied_seq = seq;
        state.stale = false;
        state.last_error = None;
        state.last_success_ms = state.latest.as_ref().map(|r| r.fetched_at_ms);
        state.passes += 1;
        ApplyOutcome::Applied
    }

    /// Record a failed fetch. The previous analytics stay published and are flagged stale.
    pub fn mark_failed(&self, key: &ChainKey, seq: u64, error: &str) -> ApplyOutcome {
        let mut state = self
            .chains
            .entry(key.clone())
            .or_insert_with(|| ChainState::new(self.history_max_entries, self.history_max_minutes));
        if seq <= state.applied_seq {
            state.dropped += 1;
            return ApplyOutcome::Dropped;
        }
        state.applied_seq = seq;
        state.stale = true;
        state.last_error = Some(error.to_string());
        state.failures += 1;
        ApplyOutcome::Applied
    }

    pub fn latest(&self, key: &ChainKey) -> Option<Arc<AnalyticsResult>> {
        self.chains.get(key).and_then(|s| s.latest.clone())
    }

    pub fn status(&self, key: &ChainKey) -> Option<ChainStatus> {
        let state = self.chains.get(key)?;
        Some(ChainStatus {
            symbol: key.symbol.clone(),
            expiry: key.expiry.clone(),
            stale: state.stale,
            last_error: state.last_error.clone(),
            fetched_at_ms: state.latest.as_ref().map(|r| r.fetched_at_ms),
            last_success_ms: state.last_success_ms,
            history_len: state.history.len(),
            passes: state.passes,
            failures: state.failures,
            dropped: state.dropped,
            latest: state.latest.clone(),
        })
    }

    /// Status of every tracked chain, ordered by symbol then expiry.
    pub fn all_status(&self) -> Vec<ChainStatus> {
        let mut keys: Vec<ChainKey> = self.chains.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.iter().filter_map(|k| self.status(k)).collect()
    }

    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Chains that have published at least one result.
    pub fn ready_count(&self) -> usize {
        self.chains.iter().filter(|e| e.value().latest.is_some()).count()
    }

    pub fn stale_count(&self) -> usize {
        self.chains.iter().filter(|e| e.value().stale).count()
    }
}

impl Default for ChainStore {
    fn default() -> Self {
        Self {
            chains: DashMap::new(),
            history_max_entries: crate::config::HISTORY_MAX_ENTRIES,
            history_max_minutes: crate::config::HISTORY_MAX_MINUTES,
            thresholds: Thresholds::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
