use serde::Serialize;

use crate::types::{Snapshot, StrikeRow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyLevels {
    /// Strike with the largest PE open interest.
    pub support: Option<f64>,
    /// Strike with the largest CE open interest.
    pub resistance: Option<f64>,
    pub max_pain: Option<f64>,
    pub max_volume_strike: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTotals {
    pub ce_oi: f64,
    pub pe_oi: f64,
    pub ce_delta_oi: f64,
    pub pe_delta_oi: f64,
    pub ce_volume: f64,
    pub pe_volume: f64,
    /// Σ PE OI ÷ Σ CE OI. None when there is no CE open interest.
    pub pcr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftDirection {
    Higher,
    Lower,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelShift {
    pub support_from: Option<f64>,
    pub support_to: Option<f64>,
    pub support_shift: ShiftDirection,
    pub resistance_from: Option<f64>,
    pub resistance_to: Option<f64>,
    pub resistance_shift: ShiftDirection,
}

/// Locate support, resistance, max-pain and max-volume strikes. An empty snapshot
/// yields all-None levels.
pub fn locate(snapshot: &Snapshot) -> KeyLevels {
    let spot = snapshot.spot;
    KeyLevels {
        support: argmax_near_spot(&snapshot.strikes, spot, |r| r.pe.open_interest),
        resistance: argmax_near_spot(&snapshot.strikes, spot, |r| r.ce.open_interest),
        max_pain: max_pain(&snapshot.strikes),
        max_volume_strike: argmax_near_spot(&snapshot.strikes, spot, StrikeRow::combined_volume),
    }
}

/// Strike maximising `metric`; ties go to the strike nearest spot, then the lower strike.
fn argmax_near_spot(rows: &[StrikeRow], spot: f64, metric: impl Fn(&StrikeRow) -> f64) -> Option<f64> {
    let mut best: Option<(&StrikeRow, f64)> = None;
    for row in rows {
        let value = metric(row);
        best = match best {
            None => Some((row, value)),
            Some((_, bv)) if value > bv => Some((row, value)),
            Some((b, bv)) if value == bv && (row.strike - spot).abs() < (b.strike - spot).abs() => {
                Some((row, value))
            }
            keep => keep,
        };
    }
    best.map(|(row, _)| row.strike)
}

/// Total payout option writers owe if expiry settles at `settle`.
pub fn total_pain(rows: &[StrikeRow], settle: f64) -> f64 {
    rows.iter()
        .map(|r| {
            (settle - r.strike).max(0.0) * r.ce.open_interest
                + (r.strike - settle).max(0.0) * r.pe.open_interest
        })
        .sum()
}

/// Candidate strike with the minimum total pain; lower strike on a tie. O(n²) over the
/// visible chain, which is bounded to a few hundred strikes at most.
pub fn max_pain(rows: &[StrikeRow]) -> Option<f64> {
    rows.iter()
        .map(|r| (r.strike, total_pain(rows, r.strike)))
        .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.total_cmp(&b.0)))
        .map(|(strike, _)| strike)
}

pub fn totals(snapshot: &Snapshot) -> ChainTotals {
    let mut t = snapshot.strikes.iter().fold(ChainTotals::default(), |mut t, r| {
        t.ce_oi += r.ce.open_interest;
        t.pe_oi += r.pe.open_interest;
        t.ce_delta_oi += r.ce.delta_open_interest;
        t.pe_delta_oi += r.pe.delta_open_interest;
        t.ce_volume += r.ce.volume;
        t.pe_volume += r.pe.volume;
        t
    });
    t.pcr = (t.ce_oi > 0.0).then(|| t.pe_oi / t.ce_oi);
    t
}

/// Compare levels recomputed on the prior snapshot with the current ones.
pub fn shift(prior: &KeyLevels, current: &KeyLevels) -> LevelShift {
    LevelShift {
        support_from: prior.support,
        support_to: current.support,
        support_shift: shift_direction(prior.support, current.support),
        resistance_from: prior.resistance,
        resistance_to: current.resistance,
        resistance_shift: shift_direction(prior.resistance, current.resistance),
    }
}

fn shift_direction(from: Option<f64>, to: Option<f64>) -> ShiftDirection {
    match (from, to) {
        (Some(a), Some(b)) if b > a => ShiftDirection::Higher,
        (Some(a), Some(b)) if b < a => ShiftDirection::Lower,
        _ => ShiftDirection::Unchanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::*;

    #[test]
    fn two_strike_support_and_resistance() {
        let s = snap(
            23_050.0,
            vec![oi_row(23_000.0, 100.0, 300.0), oi_row(23_100.0, 200.0, 50.0)],
        );
        let levels = locate(&s);
        assert_eq!(levels.support, Some(23_000.0));
        assert_eq!(levels.resistance, Some(23_100.0));
    }

    #[test]
    fn resistance_and_support_dominate_their_legs() {
        let rows: Vec<_> = (0..15)
            .map(|i| {
                let k = i as f64;
                oi_row(22_700.0 + k * 50.0, ((k * 7.0) % 11.0) * 1_000.0, ((k * 5.0) % 13.0) * 1_000.0)
            })
            .collect();
        let s = snap(23_000.0, rows);
        let levels = locate(&s);
        let res = s.row(levels.resistance.unwrap()).unwrap();
        let sup = s.row(levels.support.unwrap()).unwrap();
        for r in &s.strikes {
            assert!(res.ce.open_interest >= r.ce.open_interest);
            assert!(sup.pe.open_interest >= r.pe.open_interest);
        }
    }

    #[test]
    fn oi_ties_resolve_to_strike_nearest_spot() {
        let s = snap(
            23_180.0,
            vec![
                oi_row(23_000.0, 500.0, 500.0),
                oi_row(23_100.0, 100.0, 100.0),
                oi_row(23_200.0, 500.0, 500.0),
            ],
        );
        let levels = locate(&s);
        assert_eq!(levels.resistance, Some(23_200.0));
        assert_eq!(levels.support, Some(23_200.0));
    }

    #[test]
    fn max_pain_is_global_minimum() {
        let rows: Vec<_> = (0..21)
            .map(|i| {
                let k = i as f64;
                oi_row(22_500.0 + k * 50.0, (k * 37.0 % 17.0 + 1.0) * 900.0, ((20.0 - k) * 29.0 % 19.0 + 1.0) * 800.0)
            })
            .collect();
        let s = snap(23_000.0, rows);
        let mp = max_pain(&s.strikes).unwrap();
        let pain_at_mp = total_pain(&s.strikes, mp);
        for r in &s.strikes {
            assert!(pain_at_mp <= total_pain(&s.strikes, r.strike));
        }
    }

    #[test]
    fn max_pain_sits_between_call_and_put_walls() {
        let s = snap(
            23_000.0,
            vec![
                oi_row(22_900.0, 0.0, 1_000.0),
                oi_row(23_000.0, 10.0, 10.0),
                oi_row(23_100.0, 1_000.0, 0.0),
            ],
        );
        assert_eq!(max_pain(&s.strikes), Some(23_000.0));
    }

    #[test]
    fn max_volume_strike_uses_combined_volume() {
        let s = snap(
            23_000.0,
            vec![
                row(23_000.0, leg(0.0, 0.0, 300.0, None), leg(0.0, 0.0, 300.0, None)),
                row(23_100.0, leg(0.0, 0.0, 500.0, None), leg(0.0, 0.0, 0.0, None)),
            ],
        );
        assert_eq!(locate(&s).max_volume_strike, Some(23_000.0));
    }

    #[test]
    fn empty_snapshot_has_no_levels() {
        let s = snap(23_000.0, vec![]);
        assert_eq!(locate(&s), KeyLevels::default());
        assert!(totals(&s).pcr.is_none());
    }

    #[test]
    fn pcr_and_shift() {
        let s = snap(23_000.0, vec![oi_row(23_000.0, 200.0, 300.0)]);
        assert_eq!(totals(&s).pcr, Some(1.5));

        let prior = KeyLevels { support: Some(22_900.0), resistance: Some(23_200.0), ..Default::default() };
        let now = KeyLevels { support: Some(23_000.0), resistance: Some(23_200.0), ..Default::default() };
        let shift = shift(&prior, &now);
        assert_eq!(shift.support_shift, ShiftDirection::Higher);
        assert_eq!(shift.resistance_shift, ShiftDirection::Unchanged);
    }
}
