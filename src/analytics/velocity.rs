use serde::Serialize;

use crate::error::{AppError, Result};
use crate::state::HistoryWindow;
use crate::types::{Snapshot, StrikeRow};

/// Per-minute rate of change at one strike.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeVelocity {
    pub strike: f64,
    pub ce_oi_per_min: f64,
    pub pe_oi_per_min: f64,
    pub ce_volume_per_min: f64,
    pub pe_volume_per_min: f64,
}

/// Velocity for every strike present in both of the two compared snapshots, ascending
/// by strike. Strikes missing from either side are absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VelocityMap {
    pub from_ms: i64,
    pub to_ms: i64,
    pub elapsed_minutes: f64,
    pub strikes: Vec<StrikeVelocity>,
}

impl VelocityMap {
    pub fn get(&self, strike: f64) -> Option<&StrikeVelocity> {
        self.strikes.iter().find(|v| crate::types::strike_key(v.strike) == crate::types::strike_key(strike))
    }
}

/// Rate of change from `previous` to `current`. When no time has elapsed every rate is
/// zero rather than a division by zero.
pub fn between(previous: &Snapshot, current: &Snapshot) -> VelocityMap {
    let elapsed_minutes = (current.fetched_at_ms - previous.fetched_at_ms).max(0) as f64 / 60_000.0;
    let rate = |now: f64, before: f64| {
        if elapsed_minutes > 0.0 {
            (now - before) / elapsed_minutes
        } else {
            0.0
        }
    };

    let strikes = current
        .strikes
        .iter()
        .filter_map(|cur| {
            let prev = previous.row(cur.strike)?;
            Some(StrikeVelocity {
                strike: cur.strike,
                ce_oi_per_min: rate(cur.ce.open_interest, prev.ce.open_interest),
                pe_oi_per_min: rate(cur.pe.open_interest, prev.pe.open_interest),
                ce_volume_per_min: rate(cur.ce.volume, prev.ce.volume),
                pe_volume_per_min: rate(cur.pe.volume, prev.pe.volume),
            })
        })
        .collect();

    VelocityMap {
        from_ms: previous.fetched_at_ms,
        to_ms: current.fetched_at_ms,
        elapsed_minutes,
        strikes,
    }
}

/// Velocity of `current` against the observation that precedes it in `history`.
/// Errors when there is no earlier-minute entry to compare with.
pub fn since_prior(history: &HistoryWindow, current: &Snapshot) -> Result<VelocityMap> {
    let prior = history
        .prior_to(current)
        .ok_or(AppError::InsufficientHistory { have: 1, need: 2 })?;
    Ok(between(prior, current))
}

// ---------------------------------------------------------------------------
// Heatmap
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatCell {
    pub ce_oi_change: f64,
    pub pe_oi_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeatmapRow {
    pub strike: f64,
    /// One cell per column; None where the strike is missing from either snapshot.
    pub cells: Vec<Option<HeatCell>>,
}

/// Strike × time grid of OI change between consecutive observations, newest column last.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Heatmap {
    /// `fetchedAtMs` of the later snapshot of each column.
    pub columns: Vec<i64>,
    pub rows: Vec<HeatmapRow>,
}

/// Build the heatmap over `rows_of_interest` from the history window followed by
/// `current`. At most `max_columns` columns; empty with fewer than two observations.
pub fn heatmap(
    history: &HistoryWindow,
    current: &Snapshot,
    rows_of_interest: &[StrikeRow],
    max_columns: usize,
) -> Heatmap {
    let mut series: Vec<&Snapshot> = history
        .iter()
        .filter(|s| s.minute_bucket() < current.minute_bucket())
        .collect();
    series.push(current);

    let pairs = series.len().saturating_sub(1).min(max_columns);
    if pairs == 0 {
        return Heatmap::default();
    }
    let tail = &series[series.len() - pairs - 1..];

    let columns = tail.windows(2).map(|w| w[1].fetched_at_ms).collect();
    let rows = rows_of_interest
        .iter()
        .map(|r| HeatmapRow {
            strike: r.strike,
            cells: tail
                .windows(2)
                .map(|w| {
                    let before = w[0].row(r.strike)?;
                    let after = w[1].row(r.strike)?;
                    Some(HeatCell {
                        ce_oi_change: after.ce.open_interest - before.ce.open_interest,
                        pe_oi_change: after.pe.open_interest - before.pe.open_interest,
                    })
                })
                .collect(),
        })
        .collect();

    Heatmap { columns, rows }
}
