//! Shared health state for the /health endpoint.
//! Updated by the chain refreshers, read by the API.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;

use crate::config::ChainKey;

/// Outcome of the most recent fetch for one chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ChainFetchHealth {
    ok: bool,
    /// Refresh sequence number of the fetch this outcome belongs to.
    seq: u64,
    consecutive_failures: u64,
}

#[derive(Default)]
pub struct HealthState {
    chains: DashMap<ChainKey, ChainFetchHealth>,
    /// Epoch milliseconds of the last applied analytics pass (0 = none).
    last_pass_at_ms: AtomicI64,
    /// Fetches started but not yet finished across all chains.
    fetches_in_flight: AtomicU64,
}

/// Counts one fetch as in flight until dropped, including when the fetch task unwinds.
pub struct InFlightGuard<'a> {
    health: &'a HealthState,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.health.fetches_in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_fetch(&self) -> InFlightGuard<'_> {
        self.fetches_in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { health: self }
    }

    /// Record how a chain's fetch `seq` ended. An outcome from an older fetch never
    /// overwrites a newer one.
    pub fn record_fetch(&self, key: &ChainKey, seq: u64, ok: bool) {
        let mut entry = self.chains.entry(key.clone()).or_default();
        if seq <= entry.seq {
            return;
        }
        entry.ok = ok;
        entry.seq = seq;
        entry.consecutive_failures = if ok { 0 } else { entry.consecutive_failures + 1 };
    }

    pub fn set_last_pass_at_ms(&self, ms: i64) {
        self.last_pass_at_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// True while at least one chain's latest fetch reached NSE.
    pub fn nse_reachable(&self) -> bool {
        self.chains.iter().any(|c| c.ok)
    }

    /// Chains whose latest fetch failed, sorted for stable output.
    pub fn unreachable_chains(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .chains
            .iter()
            .filter(|c| !c.ok)
            .map(|c| c.key().to_string())
            .collect();
        out.sort();
        out
    }

    pub fn max_consecutive_failures(&self) -> u64 {
        self.chains.iter().map(|c| c.consecutive_failures).max().unwrap_or(0)
    }

    pub fn last_pass_at_ms(&self) -> Option<i64> {
        match self.last_pass_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn fetches_in_flight(&self) -> u64 {
        self.fetches_in_flight.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_failing_chain_does_not_hide_a_healthy_one() {
        let health = HealthState::new();
        let nifty = ChainKey::new("NIFTY", None);
        let bank = ChainKey::new("BANKNIFTY", None);
        assert!(!health.nse_reachable());

        health.record_fetch(&nifty, 1, true);
        health.record_fetch(&bank, 1, false);
        assert!(health.nse_reachable());
        assert_eq!(health.unreachable_chains(), vec![bank.to_string()]);

        health.record_fetch(&nifty, 2, false);
        assert!(!health.nse_reachable());
        assert_eq!(health.unreachable_chains().len(), 2);

        health.record_fetch(&bank, 2, false);
        assert_eq!(health.max_consecutive_failures(), 2);
        health.record_fetch(&bank, 3, true);
        assert!(health.nse_reachable());
        assert_eq!(health.max_consecutive_failures(), 1);
    }

    #[test]
    fn late_outcome_does_not_overwrite_newer_one() {
        let health = HealthState::new();
        let key = ChainKey::new("NIFTY", None);
        health.record_fetch(&key, 2, true);
        health.record_fetch(&key, 1, false);
        assert!(health.nse_reachable());
        assert_eq!(health.max_consecutive_failures(), 0);
    }

    #[test]
    fn in_flight_guard_releases_on_drop() {
        let health = HealthState::new();
        let a = health.begin_fetch();
        let b = health.begin_fetch();
        assert_eq!(health.fetches_in_flight(), 2);
        drop(a);
        assert_eq!(health.fetches_in_flight(), 1);

        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = health.begin_fetch();
            panic!("fetch task died");
        }));
        assert!(unwound.is_err());
        assert_eq!(health.fetches_in_flight(), 1);
        drop(b);
        assert_eq!(health.fetches_in_flight(), 0);
    }
}
