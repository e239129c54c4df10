use serde::Serialize;

use crate::config::Thresholds;
use crate::state::HistoryWindow;
use crate::types::{mean, Sentiment, Snapshot, StrikeRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VwapBias {
    Above,
    Below,
    At,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalpingSignal {
    pub momentum_score: u8,
    pub direction: Sentiment,
    /// Spot change over the short look-back, percent.
    pub price_change_pct: f64,
    pub vwap: Option<f64>,
    pub vwap_bias: Option<VwapBias>,
    pub volume_surge: bool,
    /// Signed put-minus-call ΔOI share in the ATM band, -1..1.
    pub oi_imbalance: f64,
    pub reasons: Vec<String>,
}

/// Volume-weighted average spot across the history window plus `current`. Each
/// observation is weighted by the growth in total chain volume since the one before it;
/// when nothing traded (or there is a single observation) all weights are equal.
pub fn spot_vwap(history: &HistoryWindow, current: &Snapshot) -> Option<f64> {
    let mut series: Vec<&Snapshot> = history
        .iter()
        .filter(|s| s.minute_bucket() < current.minute_bucket())
        .collect();
    series.push(current);
    let series: Vec<&Snapshot> = series.into_iter().filter(|s| s.spot > 0.0).collect();
    if series.is_empty() {
        return None;
    }

    let mut sum_pq = 0.0;
    let mut sum_q = 0.0;
    for pair in series.windows(2) {
        let q = (pair[1].total_volume() - pair[0].total_volume()).max(0.0);
        sum_pq += pair[1].spot * q;
        sum_q += q;
    }
    if sum_q > 0.0 {
        Some(sum_pq / sum_q)
    } else {
        Some(mean(series.iter().map(|s| s.spot)))
    }
}

/// Spot change over the look-back, falling back to the feed's day change.
pub fn short_horizon_change_pct(history: &HistoryWindow, current: &Snapshot, t: &Thresholds) -> f64 {
    if current.spot <= 0.0 {
        return current.spot_change_pct.unwrap_or(0.0);
    }
    match history.at_or_before(current.fetched_at_ms, t.scalp_lookback_minutes) {
        Some(base) if base.spot > 0.0 => (current.spot - base.spot) / base.spot * 100.0,
        _ => current.spot_change_pct.unwrap_or(0.0),
    }
}

pub fn assess(snapshot: &Snapshot, history: &HistoryWindow, t: &Thresholds) -> ScalpingSignal {
    let price_change_pct = short_horizon_change_pct(history, snapshot, t);
    let vwap = if snapshot.is_empty() || snapshot.spot <= 0.0 { None } else { spot_vwap(history, snapshot) };
    let vwap_bias = vwap.map(|v| {
        let diff_pct = (snapshot.spot - v) / v * 100.0;
        if diff_pct > t.vwap_flat_pct {
            VwapBias::Above
        } else if diff_pct < -t.vwap_flat_pct {
            VwapBias::Below
        } else {
            VwapBias::At
        }
    });

    let band = snapshot.atm_window(t.atm_band_strikes);
    let band_volume = mean(band.iter().map(StrikeRow::combined_volume));
    let chain_volume = snapshot.avg_combined_volume();
    let volume_surge = chain_volume > 0.0 && band_volume > t.scalp_volume_surge_ratio * chain_volume;

    let ce_doi: f64 = band.iter().map(|r| r.ce.delta_open_interest).sum();
    let pe_doi: f64 = band.iter().map(|r| r.pe.delta_open_interest).sum();
    let gross = ce_doi.abs() + pe_doi.abs();
    let oi_imbalance = if gross > 0.0 { (pe_doi - ce_doi) / gross } else { 0.0 };
    let imbalanced = oi_imbalance.abs() >= t.scalp_oi_imbalance;

    let bullish = price_change_pct > 0.0 && vwap_bias == Some(VwapBias::Above) && pe_doi > ce_doi;
    let bearish = price_change_pct < 0.0 && vwap_bias == Some(VwapBias::Below) && ce_doi > pe_doi;
    let direction = if bullish {
        Sentiment::Bullish
    } else if bearish {
        Sentiment::Bearish
    } else {
        Sentiment::Neutral
    };

    let mut score: u32 = 0;
    let mut reasons = Vec::new();
    if price_change_pct.abs() > t.scalp_price_change_pct {
        score += 30;
        reasons.push(format!("Spot moved {price_change_pct:+.2}% over {}m", t.scalp_lookback_minutes));
    }
    if volume_surge {
        score += 30;
        reasons.push(format!("ATM volume {:.1}x chain average", band_volume / chain_volume));
    }
    if imbalanced {
        score += 25;
        let side = if oi_imbalance > 0.0 { "put" } else { "call" };
        reasons.push(format!("ATM OI imbalance {:.0}% toward {side} writing", oi_imbalance.abs() * 100.0));
    }
    if bullish || bearish {
        score += 15;
        reasons.push(format!("{direction:?} setup active"));
    }

    ScalpingSignal {
        momentum_score: score.min(100) as u8,
        direction,
        price_change_pct,
        vwap,
        vwap_bias,
        volume_surge,
        oi_imbalance,
        reasons,
    }
}
