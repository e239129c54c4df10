use serde::Serialize;

use crate::analytics::levels::KeyLevels;
use crate::config::Thresholds;
use crate::types::{mean, Snapshot, StrikeRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrapRisk {
    Safe,
    Caution,
    #[serde(rename = "High Risk")]
    HighRisk,
}

impl TrapRisk {
    pub fn from_score(score: u8) -> Self {
        if score <= 30 {
            TrapRisk::Safe
        } else if score <= 60 {
            TrapRisk::Caution
        } else {
            TrapRisk::HighRisk
        }
    }
}

impl std::fmt::Display for TrapRisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapRisk::Safe => write!(f, "Safe"),
            TrapRisk::Caution => write!(f, "Caution"),
            TrapRisk::HighRisk => write!(f, "High Risk"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakoutSide {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrapAssessment {
    pub breakout_up: bool,
    pub breakout_down: bool,
    /// The resistance (up) or support (down) strike that was cleared.
    pub broken_level: Option<f64>,
    pub buffer_pct: f64,
    pub weak_oi: bool,
    pub weak_volume: bool,
    pub trap_likely: bool,
    pub score: u8,
    pub risk: TrapRisk,
    pub reasons: Vec<String>,
}

impl TrapAssessment {
    fn safe(buffer_pct: f64) -> Self {
        Self {
            breakout_up: false,
            breakout_down: false,
            broken_level: None,
            buffer_pct,
            weak_oi: false,
            weak_volume: false,
            trap_likely: false,
            score: 0,
            risk: TrapRisk::Safe,
            reasons: Vec::new(),
        }
    }

    pub fn side(&self) -> Option<BreakoutSide> {
        if self.breakout_up {
            Some(BreakoutSide::Up)
        } else if self.breakout_down {
            Some(BreakoutSide::Down)
        } else {
            None
        }
    }
}

/// OI movement in the band that agrees with the breakout: writers covering on the broken
/// side or fresh writing on the other side.
fn confirms(row: &StrikeRow, side: BreakoutSide) -> bool {
    match side {
        BreakoutSide::Up => row.ce.delta_open_interest < 0.0 || row.pe.delta_open_interest > 0.0,
        BreakoutSide::Down => row.pe.delta_open_interest < 0.0 || row.ce.delta_open_interest > 0.0,
    }
}

/// Evaluate this refresh's breakout and, if one holds, whether it looks like a trap.
pub fn assess(snapshot: &Snapshot, levels: &KeyLevels, t: &Thresholds) -> TrapAssessment {
    let spot = snapshot.spot;
    let buffer_pct = t.breakout_buffer_for(spot);
    let factor = buffer_pct / 100.0;
    if spot <= 0.0 {
        return TrapAssessment::safe(buffer_pct);
    }

    let side = match (levels.resistance, levels.support) {
        (Some(res), _) if spot > res * (1.0 + factor) => Some((BreakoutSide::Up, res)),
        (_, Some(sup)) if spot < sup * (1.0 - factor) => Some((BreakoutSide::Down, sup)),
        _ => None,
    };
    let Some((side, level)) = side else {
        return TrapAssessment::safe(buffer_pct);
    };

    let band = snapshot.atm_window(t.atm_band_strikes);
    let band_abs_doi = mean(band.iter().map(StrikeRow::combined_abs_delta_oi));
    let chain_abs_doi = snapshot.avg_abs_delta_oi();
    let band_volume = mean(band.iter().map(StrikeRow::combined_volume));
    let chain_volume = snapshot.avg_combined_volume();

    let thin_oi = band_abs_doi < t.weak_oi_ratio * chain_abs_doi;
    let unconfirmed = !band.iter().any(|r| confirms(r, side));
    let weak_oi = thin_oi || unconfirmed;
    let weak_volume = band_volume < t.weak_volume_ratio * chain_volume;

    let mut score = 40u8;
    let mut reasons = vec![match side {
        BreakoutSide::Up => format!("Spot {spot:.2} above resistance {level} by more than {buffer_pct}%"),
        BreakoutSide::Down => format!("Spot {spot:.2} below support {level} by more than {buffer_pct}%"),
    }];
    if weak_oi {
        score += 30;
        if thin_oi {
            reasons.push(format!(
                "ATM band |ΔOI| {band_abs_doi:.0} under {:.0}% of chain average {chain_abs_doi:.0}",
                t.weak_oi_ratio * 100.0
            ));
        }
        if unconfirmed {
            reasons.push("No ATM strike shows OI moving with the breakout".to_string());
        }
    }
    if weak_volume {
        score += 30;
        reasons.push(format!(
            "ATM band volume {band_volume:.0} under {:.0}% of chain average {chain_volume:.0}",
            t.weak_volume_ratio * 100.0
        ));
    }

    TrapAssessment {
        breakout_up: side == BreakoutSide::Up,
        breakout_down: side == BreakoutSide::Down,
        broken_level: Some(level),
        buffer_pct,
        weak_oi,
        weak_volume,
        trap_likely: weak_oi && weak_volume,
        score,
        risk: TrapRisk::from_score(score),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::levels::locate;
    use crate::types::test_support::*;

    fn run(s: &Snapshot) -> TrapAssessment {
        let t = Thresholds::default();
        assess(s, &locate(s), &t)
    }

    #[test]
    fn unknown_spot_is_not_a_breakdown() {
        let mut s = snap(23_000.0, flat_chain(23_000.0, 50.0, 4, 1_000_000.0, 5_000.0));
        s.spot = 0.0;
        let levels = KeyLevels { support: Some(22_800.0), resistance: Some(23_200.0), ..locate(&s) };
        let a = assess(&s, &levels, &Thresholds::default());
        assert!(!a.breakout_down && !a.breakout_up);
        assert!(!a.trap_likely);
        assert_eq!(a.broken_level, None);
    }

    #[test]
    fn spot_inside_buffer_is_not_a_breakout() {
        let mut rows = flat_chain(23_500.0, 50.0, 4, 1_000_000.0, 5_000.0);
        for r in &mut rows {
            if r.strike == 23_500.0 {
                r.ce.open_interest = 12_000_000.0;
            }
        }
        // 0.05% above the wall, inside the 0.10% buffer.
        let s = snap(23_511.75, rows);
        let a = run(&s);
        assert!(!a.breakout_up);
        assert!(!a.trap_likely);
        assert_eq!(a.risk, TrapRisk::Safe);
        assert_eq!(a.score, 0);
    }

    /// Resistance at 23000, support at 22800, spot well above resistance. The ATM band
    /// (23200±2 strikes) has the given ΔOI and volume; the rest of the chain is busier.
    fn breakout_up_chain(band_doi: f64, band_volume: f64) -> Snapshot {
        let rows = (0..13)
            .map(|i| {
                let strike = 22_800.0 + i as f64 * 50.0;
                let in_band = (23_100.0..=23_300.0).contains(&strike);
                let (doi, vol) = if in_band { (band_doi, band_volume) } else { (1_000.0, 10_000.0) };
                let ce_oi = if strike == 23_000.0 { 9_000_000.0 } else { 1_000_000.0 };
                let pe_oi = if strike == 22_800.0 { 9_000_000.0 } else { 1_000_000.0 };
                row(strike, leg(ce_oi, doi, vol, None), leg(pe_oi, doi, vol, None))
            })
            .collect();
        snap(23_200.0, rows)
    }

    #[test]
    fn weak_breakout_is_a_trap() {
        let a = run(&breakout_up_chain(0.0, 1_000.0));
        assert!(a.breakout_up);
        assert_eq!(a.broken_level, Some(23_000.0));
        assert!(a.weak_oi && a.weak_volume);
        assert!(a.trap_likely);
        assert_eq!(a.score, 100);
        assert_eq!(a.risk, TrapRisk::HighRisk);
    }

    #[test]
    fn supported_breakout_is_caution_only() {
        let a = run(&breakout_up_chain(5_000.0, 20_000.0));
        assert!(a.breakout_up);
        assert!(!a.weak_oi);
        assert!(!a.weak_volume);
        assert!(!a.trap_likely);
        assert_eq!(a.score, 40);
        assert_eq!(a.risk, TrapRisk::Caution);
    }

    #[test]
    fn band_oi_against_breakout_is_weak() {
        // Plenty of ΔOI but it is all CE build, so nothing confirms an up move.
        let mut s = breakout_up_chain(5_000.0, 20_000.0);
        for r in &mut s.strikes {
            r.pe.delta_open_interest = -5_000.0;
        }
        let a = run(&s);
        assert!(a.weak_oi);
        assert!(!a.trap_likely);
        assert_eq!(a.score, 70);
    }

    #[test]
    fn breakdown_below_support() {
        let mut s = breakout_up_chain(0.0, 1_000.0);
        s.spot = 22_700.0;
        let a = run(&s);
        assert!(a.breakout_down);
        assert!(!a.breakout_up);
        assert_eq!(a.broken_level, Some(22_800.0));
    }

    #[test]
    fn trap_implies_breakout() {
        for spot in [22_500.0, 22_790.0, 22_900.0, 23_000.0, 23_030.0, 23_400.0] {
            let mut s = breakout_up_chain(0.0, 1_000.0);
            s.spot = spot;
            let a = run(&s);
            if a.trap_likely {
                assert!(a.breakout_up || a.breakout_down);
            }
        }
    }
}
