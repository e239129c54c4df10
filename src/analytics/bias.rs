use serde::Serialize;

use crate::analytics::classifier::{InterpretationLabel, StrikeInterpretation};
use crate::config::Thresholds;
use crate::types::{Leg, Snapshot, StrikeRow};

pub const VOLATILITY_EXPANSION_TAG: &str = "Volatility Expansion Possible";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BiasLabel {
    #[serde(rename = "Strongly Bearish")]
    StronglyBearish,
    Bearish,
    #[serde(rename = "Range-Bound")]
    RangeBound,
    Bullish,
    #[serde(rename = "Strongly Bullish")]
    StronglyBullish,
    Neutral,
}

impl std::fmt::Display for BiasLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BiasLabel::StronglyBearish => "Strongly Bearish",
            BiasLabel::Bearish => "Bearish",
            BiasLabel::RangeBound => "Range-Bound",
            BiasLabel::Bullish => "Bullish",
            BiasLabel::StronglyBullish => "Strongly Bullish",
            BiasLabel::Neutral => "Neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: u32) -> Self {
        if score < 50 {
            Confidence::Low
        } else if score < 80 {
            Confidence::Medium
        } else {
            Confidence::High
        }
    }
}

/// Per-side label counts over the ATM window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SideTally {
    pub short_build_up: u32,
    pub long_build_up: u32,
    pub short_covering: u32,
    pub long_unwinding: u32,
}

impl SideTally {
    fn count(&mut self, label: InterpretationLabel) {
        match label {
            InterpretationLabel::ShortBuildUp => self.short_build_up += 1,
            InterpretationLabel::LongBuildUp => self.long_build_up += 1,
            InterpretationLabel::ShortCovering => self.short_covering += 1,
            InterpretationLabel::LongUnwinding => self.long_unwinding += 1,
            InterpretationLabel::Mixed | InterpretationLabel::Neutral => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasInputs {
    pub atm_strike: Option<f64>,
    pub window_strikes: usize,
    pub ce_delta_oi: f64,
    pub pe_delta_oi: f64,
    pub ce: SideTally,
    pub pe: SideTally,
    pub rising_volume_strikes: u32,
    pub call_writing_score: u32,
    pub put_writing_score: u32,
    pub bearish_pressure: u32,
    pub bullish_pressure: u32,
    pub index_change_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBiasResult {
    pub label: BiasLabel,
    pub confidence: Confidence,
    pub reasons: Vec<String>,
    pub tag: Option<String>,
    pub inputs: BiasInputs,
}

impl MarketBiasResult {
    pub fn neutral() -> Self {
        Self {
            label: BiasLabel::Neutral,
            confidence: Confidence::Low,
            reasons: vec!["No strikes in the ATM window".to_string()],
            tag: None,
            inputs: BiasInputs {
                atm_strike: None,
                window_strikes: 0,
                ce_delta_oi: 0.0,
                pe_delta_oi: 0.0,
                ce: SideTally::default(),
                pe: SideTally::default(),
                rising_volume_strikes: 0,
                call_writing_score: 0,
                put_writing_score: 0,
                bearish_pressure: 0,
                bullish_pressure: 0,
                index_change_pct: 0.0,
            },
        }
    }
}

/// Index % change: the feed's own figure, else the spot move since the oldest history
/// entry, else zero.
pub fn index_change_pct(snapshot: &Snapshot, oldest: Option<&Snapshot>) -> f64 {
    if let Some(pct) = snapshot.spot_change_pct {
        return pct;
    }
    match oldest {
        Some(o) if o.spot > 0.0 => (snapshot.spot - o.spot) / o.spot * 100.0,
        _ => 0.0,
    }
}

/// A strike's volume is rising when combined volume grew versus the prior snapshot.
/// Without a prior snapshot, either leg being high-volume counts.
fn volume_rising(row: &StrikeRow, interp: &StrikeInterpretation, prior: Option<&Snapshot>) -> bool {
    match prior.and_then(|p| p.row(row.strike)) {
        Some(before) => row.combined_volume() > before.combined_volume(),
        None => [Leg::Ce, Leg::Pe].into_iter().any(|leg| interp.leg(leg).high_volume),
    }
}

/// Aggregate the ATM window's interpretations into one directional verdict.
///
/// `interpretations` must be index-aligned with `snapshot.strikes`.
pub fn assess(
    snapshot: &Snapshot,
    interpretations: &[StrikeInterpretation],
    prior: Option<&Snapshot>,
    index_change_pct: f64,
    t: &Thresholds,
) -> MarketBiasResult {
    let Some(atm) = snapshot.atm_index() else {
        return MarketBiasResult::neutral();
    };
    let lo = atm.saturating_sub(t.bias_window_strikes);
    let hi = (atm + t.bias_window_strikes + 1).min(snapshot.strikes.len()).min(interpretations.len());
    if lo >= hi {
        return MarketBiasResult::neutral();
    }

    let mut ce = SideTally::default();
    let mut pe = SideTally::default();
    let mut ce_delta_oi = 0.0;
    let mut pe_delta_oi = 0.0;
    let mut rising_volume_strikes = 0;
    for (row, interp) in snapshot.strikes[lo..hi].iter().zip(&interpretations[lo..hi]) {
        ce.count(interp.ce.label);
        pe.count(interp.pe.label);
        ce_delta_oi += row.ce.delta_open_interest;
        pe_delta_oi += row.pe.delta_open_interest;
        if volume_rising(row, interp, prior) {
            rising_volume_strikes += 1;
        }
    }

    let call_writing_score = ce.short_build_up + u32::from(ce_delta_oi > pe_delta_oi);
    let put_writing_score = pe.short_build_up + u32::from(pe_delta_oi > ce_delta_oi);
    let bearish_pressure = ce.short_build_up + pe.long_build_up + pe.short_covering;
    let bullish_pressure = pe.short_build_up + ce.long_build_up + ce.short_covering;

    let inputs = BiasInputs {
        atm_strike: Some(snapshot.strikes[atm].strike),
        window_strikes: hi - lo,
        ce_delta_oi,
        pe_delta_oi,
        ce,
        pe,
        rising_volume_strikes,
        call_writing_score,
        put_writing_score,
        bearish_pressure,
        bullish_pressure,
        index_change_pct,
    };

    let label = select_label(&inputs, t);
    let score_gap = call_writing_score.abs_diff(put_writing_score).min(5) * 20;
    let tag = (ce.short_covering >= 2 && pe.short_covering >= 2 && rising_volume_strikes >= 3)
        .then(|| VOLATILITY_EXPANSION_TAG.to_string());

    MarketBiasResult {
        label,
        confidence: Confidence::from_score(score_gap),
        reasons: reasons(&inputs),
        tag,
        inputs,
    }
}

/// Priority order, first match wins. The strong labels come first on both sides: their
/// conditions imply the plain directional ones.
fn select_label(i: &BiasInputs, t: &Thresholds) -> BiasLabel {
    let call = i.call_writing_score;
    let put = i.put_writing_score;
    let bear = i.bearish_pressure;
    let bull = i.bullish_pressure;

    if call >= 3 && put <= 1 && bull == 0 {
        BiasLabel::StronglyBearish
    } else if put >= 3 && call <= 1 && bear == 0 {
        BiasLabel::StronglyBullish
    } else if call > put && bear > bull {
        BiasLabel::Bearish
    } else if call.abs_diff(put) <= 1
        && bear.abs_diff(bull) <= 1
        && i.index_change_pct.abs() <= t.range_bound_max_change_pct
    {
        BiasLabel::RangeBound
    } else if put > call && bull > bear {
        BiasLabel::Bullish
    } else {
        BiasLabel::Neutral
    }
}

fn reasons(i: &BiasInputs) -> Vec<String> {
    let mut out = Vec::new();
    if i.ce.short_build_up > 0 {
        out.push(format!("Call writing at {} strikes near ATM", i.ce.short_build_up));
    }
    if i.pe.short_build_up > 0 {
        out.push(format!("Put writing at {} strikes near ATM", i.pe.short_build_up));
    }
    if i.ce_delta_oi > i.pe_delta_oi {
        out.push(format!("CE OI added ({:.0}) exceeds PE OI added ({:.0})", i.ce_delta_oi, i.pe_delta_oi));
    } else if i.pe_delta_oi > i.ce_delta_oi {
        out.push(format!("PE OI added ({:.0}) exceeds CE OI added ({:.0})", i.pe_delta_oi, i.ce_delta_oi));
    }
    if i.ce.short_covering > 0 || i.pe.short_covering > 0 {
        out.push(format!(
            "Short covering: {} CE / {} PE strikes",
            i.ce.short_covering, i.pe.short_covering
        ));
    }
    out.push(format!(
        "Pressure bearish {} vs bullish {}; index {:+.2}%",
        i.bearish_pressure, i.bullish_pressure, i.index_change_pct
    ));
    out
}
