use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::PipelineLatency;
use crate::config::{ChainKey, CHANNEL_CAPACITY};
use crate::fetcher::SnapshotSource;
use crate::state::{ApplyOutcome, ChainStore};
use crate::types::parse_nse_timestamp_ms;

/// Commands accepted by a running refresher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMsg {
    /// Start one fetch now, independent of the timer.
    RefreshNow,
    /// Pause the timer. On-demand refreshes still run.
    Stop,
    /// Resume the timer after `Stop`.
    Resume,
    /// Exit the refresher loop. In-flight fetches still land.
    Shutdown,
}

/// Cloneable handle for controlling one chain's refresher.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    pub key: ChainKey,
    control_tx: mpsc::Sender<ControlMsg>,
}

impl RefreshHandle {
    /// Returns false when the refresher is gone or its queue is full.
    pub fn send(&self, msg: ControlMsg) -> bool {
        match self.control_tx.try_send(msg) {
            Ok(()) => true,
            Err(e) => {
                warn!(chain = %self.key, ?msg, "Refresher control send failed: {e}");
                false
            }
        }
    }
}

/// Shared pieces every refresher needs.
pub struct RefreshContext<S> {
    pub source: Arc<S>,
    pub store: Arc<ChainStore>,
    pub latency: Arc<PipelineLatency>,
    pub health: Arc<HealthState>,
    pub instrument_type: String,
    pub interval: Duration,
}

impl<S> Clone for RefreshContext<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            store: Arc::clone(&self.store),
            latency: Arc::clone(&self.latency),
            health: Arc::clone(&self.health),
            instrument_type: self.instrument_type.clone(),
            interval: self.interval,
        }
    }
}

/// Periodically fetches one chain and applies the analytics pass.
///
/// Each fetch runs in its own task and carries the sequence number it was started
/// with, so a slow fetch never holds up the next tick and, if it lands after a newer
/// one, the store discards it.
pub struct ChainRefresher<S> {
    key: ChainKey,
    ctx: RefreshContext<S>,
    control_rx: mpsc::Receiver<ControlMsg>,
}

impl<S: SnapshotSource> ChainRefresher<S> {
    pub fn spawn(key: ChainKey, ctx: RefreshContext<S>) -> (RefreshHandle, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::channel(CHANNEL_CAPACITY);
        ctx.store.register(key.clone());
        let refresher = Self { key: key.clone(), ctx, control_rx };
        let task = tokio::spawn(async move { refresher.run().await });
        (RefreshHandle { key, control_tx }, task)
    }

    async fn run(mut self) {
        let mut ticker = interval(self.ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut timer_on = true;
        info!(
            chain = %self.key,
            interval_secs = self.ctx.interval.as_secs(),
            "Refresher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick(), if timer_on => self.start_fetch(),
                msg = self.control_rx.recv() => match msg {
                    Some(ControlMsg::RefreshNow) => self.start_fetch(),
                    Some(ControlMsg::Stop) => {
                        timer_on = false;
                        info!(chain = %self.key, "Refresher timer stopped");
                    }
                    Some(ControlMsg::Resume) => {
                        if !timer_on {
                            ticker.reset();
                            timer_on = true;
                            info!(chain = %self.key, "Refresher timer resumed");
                        }
                    }
                    Some(ControlMsg::Shutdown) | None => break,
                },
            }
        }
        info!(chain = %self.key, "Refresher exited");
    }

    fn start_fetch(&self) {
        let seq = self.ctx.store.next_seq(&self.key);
        let key = self.key.clone();
        let ctx = self.ctx.clone();
        tokio::spawn(async move { fetch_and_apply(key, seq, ctx).await });
    }
}

async fn fetch_and_apply<S: SnapshotSource>(key: ChainKey, seq: u64, ctx: RefreshContext<S>) {
    let in_flight = ctx.health.begin_fetch();
    let started = Instant::now();
    let fetched = ctx.source.fetch_snapshot(&key, &ctx.instrument_type).await;
    ctx.latency.fetch.record(started.elapsed());
    drop(in_flight);

    let mut snapshot = match fetched {
        Ok(s) => s,
        Err(e) => {
            ctx.health.record_fetch(&key, seq, false);
            let outcome = ctx.store.mark_failed(&key, seq, &e.to_string());
            warn!(
                event = "FETCH_FAILED",
                chain = %key,
                seq,
                applied = outcome == ApplyOutcome::Applied,
                "Fetch failed for {key}, keeping last analytics: {e}"
            );
            return;
        }
    };
    ctx.health.record_fetch(&key, seq, true);

    if snapshot.spot_change_pct.is_none() {
        match ctx.source.index_change_pct(&key.symbol).await {
            Ok(pct) => snapshot.spot_change_pct = pct,
            Err(e) => debug!(chain = %key, "Index change unavailable: {e}"),
        }
    }

    let fetched_at_ms = snapshot.fetched_at_ms;
    let exchange_lag_ms = snapshot
        .exchange_timestamp
        .as_deref()
        .and_then(parse_nse_timestamp_ms)
        .map(|ts| fetched_at_ms - ts);
    let strikes = snapshot.strikes.len();

    let compute_started = Instant::now();
    let outcome = ctx.store.apply(&key, seq, snapshot);
    ctx.latency.compute.record(compute_started.elapsed());

    if outcome == ApplyOutcome::Dropped {
        debug!(chain = %key, seq, "Dropped out-of-order fetch result");
        return;
    }
    ctx.health.set_last_pass_at_ms(fetched_at_ms);

    if let Some(result) = ctx.store.latest(&key) {
        info!(
            event = "ANALYTICS_PASS",
            chain = %key,
            seq,
            strikes,
            spot = result.spot,
            bias = %result.bias.label,
            trap_risk = %result.trap.risk,
            support = ?result.key_levels.support,
            resistance = ?result.key_levels.resistance,
            max_pain = ?result.key_levels.max_pain,
            exchange_lag_ms = ?exchange_lag_ms,
            "{key} | spot {:.2} | {} | trap: {}",
            result.spot,
            result.bias.label,
            result.trap.risk,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::error::{AppError, Result};
    use crate::types::test_support::*;
    use crate::types::Snapshot;

    const MIN: i64 = 60_000;
    const T0: i64 = 1_800_000_000_000;

    /// Serves scripted (delay, result) pairs in call order; repeats the last one.
    struct ScriptedSource {
        calls: AtomicUsize,
        script: Vec<(u64, Option<i64>)>,
        index_pct: Option<f64>,
    }

    impl ScriptedSource {
        fn new(script: Vec<(u64, Option<i64>)>) -> Self {
            Self { calls: AtomicUsize::new(0), script, index_pct: None }
        }

        fn with_index_pct(mut self, pct: f64) -> Self {
            self.index_pct = Some(pct);
            self
        }
    }

    impl SnapshotSource for ScriptedSource {
        fn fetch_snapshot(
            &self,
            key: &ChainKey,
            _instrument_type: &str,
        ) -> impl Future<Output = Result<Snapshot>> + Send {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay_ms, fetched_at) = self.script[n.min(self.script.len() - 1)];
            let symbol = key.symbol.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                let ms = fetched_at.ok_or_else(|| AppError::Transport("HTTP 403 Forbidden".to_string()))?;
                let mut s = snap_at(23_000.0, ms, flat_chain(23_000.0, 50.0, 3, 1_000.0, 100.0));
                s.symbol = symbol;
                Ok::<_, AppError>(s)
            }
        }

        fn index_change_pct(&self, _symbol: &str) -> impl Future<Output = Result<Option<f64>>> + Send {
            let pct = self.index_pct;
            async move { Ok(pct) }
        }
    }

    fn context(source: ScriptedSource) -> RefreshContext<ScriptedSource> {
        RefreshContext {
            source: Arc::new(source),
            store: Arc::new(ChainStore::default()),
            latency: Arc::new(PipelineLatency::new()),
            health: Arc::new(HealthState::new()),
            instrument_type: "Indices".to_string(),
            interval: Duration::from_secs(3600),
        }
    }

    async fn wait_for(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn slow_first_fetch_is_dropped_after_newer_result() {
        // First tick fetch is slow and older; the on-demand fetch returns at once.
        let ctx = context(ScriptedSource::new(vec![(300, Some(T0)), (0, Some(T0 + MIN))]));
        let store = Arc::clone(&ctx.store);
        let key = ChainKey::new("NIFTY", None);
        let (handle, task) = ChainRefresher::spawn(key.clone(), ctx);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.send(ControlMsg::RefreshNow));

        wait_for(|| store.status(&key).is_some_and(|s| s.dropped == 1)).await;
        let status = store.status(&key).unwrap();
        assert_eq!(status.passes, 1);
        assert_eq!(status.fetched_at_ms, Some(T0 + MIN));

        handle.send(ControlMsg::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_marks_chain_stale() {
        let ctx = context(ScriptedSource::new(vec![(0, Some(T0)), (0, None)]));
        let store = Arc::clone(&ctx.store);
        let health = Arc::clone(&ctx.health);
        let latency = Arc::clone(&ctx.latency);
        let key = ChainKey::new("BANKNIFTY", None);
        let (handle, task) = ChainRefresher::spawn(key.clone(), ctx);

        wait_for(|| store.latest(&key).is_some()).await;
        assert!(handle.send(ControlMsg::RefreshNow));
        wait_for(|| store.status(&key).is_some_and(|s| s.stale)).await;

        let status = store.status(&key).unwrap();
        assert_eq!(status.fetched_at_ms, Some(T0));
        assert!(status.last_error.unwrap().contains("403"));
        assert!(!health.nse_reachable());
        assert_eq!(health.unreachable_chains(), vec![key.to_string()]);
        assert_eq!(health.fetches_in_flight(), 0);
        assert_eq!(health.last_pass_at_ms(), Some(T0));
        assert_eq!(latency.fetch.summary().samples, 2);

        handle.send(ControlMsg::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn index_change_feeds_market_bias() {
        let ctx = context(ScriptedSource::new(vec![(0, Some(T0))]).with_index_pct(-0.7));
        let store = Arc::clone(&ctx.store);
        let key = ChainKey::new("NIFTY", None);
        let (handle, task) = ChainRefresher::spawn(key.clone(), ctx);

        wait_for(|| store.latest(&key).is_some()).await;
        let latest = store.latest(&key).unwrap();
        assert_eq!(latest.bias.inputs.index_change_pct, -0.7);

        handle.send(ControlMsg::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stopped_timer_still_serves_on_demand_refresh() {
        let ctx = context(ScriptedSource::new(vec![(0, Some(T0)), (0, Some(T0 + MIN))]));
        let store = Arc::clone(&ctx.store);
        let key = ChainKey::new("NIFTY", None);
        let (handle, task) = ChainRefresher::spawn(key.clone(), ctx);

        wait_for(|| store.latest(&key).is_some()).await;
        assert!(handle.send(ControlMsg::Stop));
        assert!(handle.send(ControlMsg::RefreshNow));
        wait_for(|| store.status(&key).is_some_and(|s| s.passes == 2)).await;

        drop(handle);
        task.await.unwrap();
    }
}
