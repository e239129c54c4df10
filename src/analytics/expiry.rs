use serde::Serialize;

use crate::config::Thresholds;
use crate::types::{ist_day, parse_nse_date, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PinRisk {
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryRisk {
    pub max_pain: f64,
    pub distance_pct: f64,
    /// 0 at or beyond the pin distance, 100 with spot exactly at max-pain.
    pub pin_probability: f64,
    pub risk: PinRisk,
    /// Whole days from the snapshot's fetch date (IST) to expiry; None if the expiry is unparseable.
    pub days_to_expiry: Option<i64>,
    pub expiry_day: bool,
}

/// Linear pinning probability from the spot's distance to max-pain.
pub fn pin_probability(spot: f64, max_pain: f64, t: &Thresholds) -> f64 {
    if spot <= 0.0 || t.pin_distance_pct <= 0.0 {
        return 0.0;
    }
    let distance_pct = (spot - max_pain).abs() / spot * 100.0;
    ((1.0 - distance_pct / t.pin_distance_pct) * 100.0).clamp(0.0, 100.0)
}

pub fn assess(snapshot: &Snapshot, max_pain: Option<f64>, t: &Thresholds) -> Option<ExpiryRisk> {
    let max_pain = max_pain?;
    if snapshot.spot <= 0.0 {
        return None;
    }
    let pin_probability = pin_probability(snapshot.spot, max_pain, t);
    let risk = if pin_probability >= 70.0 {
        PinRisk::High
    } else if pin_probability >= 40.0 {
        PinRisk::Moderate
    } else {
        PinRisk::Low
    };

    let fetch_day = ist_day(snapshot.fetched_at_ms);
    let days_to_expiry = snapshot
        .expiry
        .as_deref()
        .and_then(parse_nse_date)
        .map(|expiry_day| expiry_day - fetch_day);

    Some(ExpiryRisk {
        max_pain,
        distance_pct: (snapshot.spot - max_pain).abs() / snapshot.spot * 100.0,
        pin_probability,
        risk,
        days_to_expiry,
        expiry_day: days_to_expiry == Some(0),
    })
}
