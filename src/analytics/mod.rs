//! Option-chain analytics. Every function here is a pure function of the current
//! snapshot, the chain's history window and the thresholds; nothing logs or mutates.

pub mod basis;
pub mod bias;
pub mod breakout;
pub mod classifier;
pub mod expiry;
pub mod levels;
pub mod scalping;
pub mod targets;
pub mod velocity;

use serde::Serialize;

use crate::config::Thresholds;
use crate::state::HistoryWindow;
use crate::types::Snapshot;

pub use basis::Basis;
pub use bias::MarketBiasResult;
pub use breakout::TrapAssessment;
pub use classifier::StrikeInterpretation;
pub use expiry::ExpiryRisk;
pub use levels::{ChainTotals, KeyLevels, LevelShift};
pub use scalping::ScalpingSignal;
pub use targets::TargetProjection;
pub use velocity::{Heatmap, VelocityMap};

/// Everything derived from one snapshot. Built once per refresh and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsResult {
    pub symbol: String,
    pub expiry: Option<String>,
    pub fetched_at_ms: i64,
    pub exchange_timestamp: Option<String>,
    pub spot: f64,
    pub atm_strike: Option<f64>,
    pub interpretations: Vec<StrikeInterpretation>,
    pub key_levels: KeyLevels,
    pub totals: ChainTotals,
    pub level_shift: Option<LevelShift>,
    pub bias: MarketBiasResult,
    pub trap: TrapAssessment,
    pub targets: Option<TargetProjection>,
    /// Per-minute rates against the prior observation; None until there is one.
    pub velocity: Option<VelocityMap>,
    pub heatmap: Heatmap,
    pub scalping: ScalpingSignal,
    pub expiry_risk: Option<ExpiryRisk>,
    pub basis: Option<Basis>,
}

/// Run every engine over `snapshot`.
///
/// `history` holds the chain's earlier snapshots and must not yet contain this one. The
/// prior observation used for rates and shifts is the newest history entry from an
/// earlier minute, which is what will precede `snapshot` once it is appended.
pub fn compute_analytics(snapshot: &Snapshot, history: &HistoryWindow, t: &Thresholds) -> AnalyticsResult {
    let prior = history.prior_to(snapshot);

    let interpretations = classifier::classify_snapshot(snapshot, t);
    let key_levels = levels::locate(snapshot);
    let level_shift = prior.map(|p| levels::shift(&levels::locate(p), &key_levels));

    let index_change = bias::index_change_pct(snapshot, history.oldest());
    let bias = bias::assess(snapshot, &interpretations, prior, index_change, t);
    let trap = breakout::assess(snapshot, &key_levels, t);
    let targets = targets::project(snapshot, &trap, t);

    let velocity = velocity::since_prior(history, snapshot).ok();
    let heatmap = velocity::heatmap(
        history,
        snapshot,
        snapshot.atm_window(t.bias_window_strikes),
        t.heatmap_columns,
    );

    AnalyticsResult {
        symbol: snapshot.symbol.clone(),
        expiry: snapshot.expiry.clone(),
        fetched_at_ms: snapshot.fetched_at_ms,
        exchange_timestamp: snapshot.exchange_timestamp.clone(),
        spot: snapshot.spot,
        atm_strike: snapshot.atm_strike(),
        totals: levels::totals(snapshot),
        scalping: scalping::assess(snapshot, history, t),
        expiry_risk: expiry::assess(snapshot, key_levels.max_pain, t),
        basis: basis::compute(snapshot, t),
        interpretations,
        key_levels,
        level_shift,
        bias,
        trap,
        targets,
        velocity,
        heatmap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::analytics::bias::BiasLabel;
    use crate::analytics::breakout::TrapRisk;
    use crate::types::test_support::*;

    const MIN: i64 = 60_000;
    const T0: i64 = 1_800_000_000_000;

    #[test]
    fn empty_snapshot_yields_neutral_result() {
        let s = snap_at(23_000.0, T0, vec![]);
        let r = compute_analytics(&s, &HistoryWindow::default(), &Thresholds::default());
        assert!(r.interpretations.is_empty());
        assert_eq!(r.key_levels, KeyLevels::default());
        assert_eq!(r.bias.label, BiasLabel::Neutral);
        assert!(!r.trap.trap_likely);
        assert_eq!(r.trap.risk, TrapRisk::Safe);
        assert!(r.targets.is_none());
        assert!(r.velocity.is_none());
        assert!(r.expiry_risk.is_none());
        assert!(r.basis.is_none());
        assert_eq!(r.scalping.momentum_score, 0);
    }

    #[test]
    fn velocity_and_shift_use_prior_minute() {
        let mut h = HistoryWindow::default();
        h.append(Arc::new(snap_at(23_000.0, T0, vec![oi_row(23_000.0, 100.0, 300.0), oi_row(23_100.0, 200.0, 50.0)])));
        let cur = snap_at(
            23_000.0,
            T0 + 2 * MIN,
            vec![oi_row(23_000.0, 300.0, 300.0), oi_row(23_100.0, 200.0, 500.0)],
        );
        let r = compute_analytics(&cur, &h, &Thresholds::default());
        let v = r.velocity.as_ref().unwrap();
        assert_eq!(v.get(23_000.0).unwrap().ce_oi_per_min, 100.0);
        let shift = r.level_shift.unwrap();
        assert_eq!(shift.resistance_from, Some(23_100.0));
        assert_eq!(shift.resistance_to, Some(23_000.0));
        assert_eq!(shift.support_to, Some(23_100.0));
        assert_eq!(r.heatmap.columns, vec![T0 + 2 * MIN]);
    }

    #[test]
    fn first_pass_has_no_rates() {
        let cur = snap_at(23_000.0, T0, flat_chain(23_000.0, 50.0, 5, 1_000.0, 100.0));
        let r = compute_analytics(&cur, &HistoryWindow::default(), &Thresholds::default());
        assert!(r.velocity.is_none());
        assert!(r.level_shift.is_none());
        assert_eq!(r.interpretations.len(), 11);
        assert_eq!(r.atm_strike, Some(23_000.0));
    }
}
