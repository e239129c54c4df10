use serde::Serialize;

use crate::config::Thresholds;
use crate::types::{Direction, Leg, LegMetrics, Snapshot};

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// Price direction × OI direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InterpretationLabel {
    #[serde(rename = "Long Build-up")]
    LongBuildUp,
    #[serde(rename = "Short Build-up")]
    ShortBuildUp,
    #[serde(rename = "Long Unwinding")]
    LongUnwinding,
    #[serde(rename = "Short Covering")]
    ShortCovering,
    Mixed,
    Neutral,
}

impl InterpretationLabel {
    pub fn from_directions(price: Direction, oi: Direction) -> Self {
        match (price, oi) {
            (Direction::Up, Direction::Up) => InterpretationLabel::LongBuildUp,
            (Direction::Down, Direction::Up) => InterpretationLabel::ShortBuildUp,
            (Direction::Down, Direction::Down) => InterpretationLabel::LongUnwinding,
            (Direction::Up, Direction::Down) => InterpretationLabel::ShortCovering,
            (Direction::Flat, Direction::Flat) => InterpretationLabel::Neutral,
            _ => InterpretationLabel::Mixed,
        }
    }
}

impl std::fmt::Display for InterpretationLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InterpretationLabel::LongBuildUp => "Long Build-up",
            InterpretationLabel::ShortBuildUp => "Short Build-up",
            InterpretationLabel::LongUnwinding => "Long Unwinding",
            InterpretationLabel::ShortCovering => "Short Covering",
            InterpretationLabel::Mixed => "Mixed",
            InterpretationLabel::Neutral => "Neutral",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TruthFlags {
    /// High volume but OI did not move: churn or algo flow.
    #[serde(rename = "volumeWithoutOI")]
    pub volume_without_oi: bool,
    /// Strong OI move on below-median volume: quiet positional build.
    #[serde(rename = "oiWithoutVolume")]
    pub oi_without_volume: bool,
    /// OI, volume and price all participate.
    pub real_money: bool,
    pub volume_low: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Interpretation {
    pub label: InterpretationLabel,
    pub description: String,
    pub confidence_score: u8,
    pub truth_flags: TruthFlags,
    pub price_direction: Direction,
    pub oi_direction: Direction,
    pub high_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrikeInterpretation {
    pub strike: f64,
    #[serde(rename = "CE")]
    pub ce: Interpretation,
    #[serde(rename = "PE")]
    pub pe: Interpretation,
}

impl StrikeInterpretation {
    pub fn leg(&self, leg: Leg) -> &Interpretation {
        match leg {
            Leg::Ce => &self.ce,
            Leg::Pe => &self.pe,
        }
    }
}

// ---------------------------------------------------------------------------
// Volume distribution
// ---------------------------------------------------------------------------

/// Volume cut-offs for one leg across a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeProfile {
    pub high: f64,
    pub median: f64,
    pub low: f64,
}

impl VolumeProfile {
    pub fn for_leg(snapshot: &Snapshot, leg: Leg, t: &Thresholds) -> Self {
        let mut volumes: Vec<f64> = snapshot.strikes.iter().map(|r| r.leg(leg).volume).collect();
        volumes.sort_by(f64::total_cmp);
        Self {
            high: percentile(&volumes, t.high_volume_percentile),
            median: percentile(&volumes, t.median_volume_percentile),
            low: percentile(&volumes, t.low_volume_percentile),
        }
    }
}

/// Nearest-rank percentile of an ascending slice. The rank is rounded up, so when `p`
/// falls between two ranks the higher value becomes the cut: a borderline strike ends
/// up in the lower-confidence bucket.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p.clamp(0.0, 1.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

pub fn price_direction(m: &LegMetrics, t: &Thresholds) -> Direction {
    match m.price_change_pct {
        Some(pct) if pct > t.price_flat_pct => Direction::Up,
        Some(pct) if pct < -t.price_flat_pct => Direction::Down,
        _ => Direction::Flat,
    }
}

pub fn oi_direction(m: &LegMetrics, t: &Thresholds) -> Direction {
    let floor = t.oi_flat_abs.max(t.oi_flat_rel * m.open_interest.abs());
    if m.delta_open_interest.abs() < floor {
        Direction::Flat
    } else if m.delta_open_interest > 0.0 {
        Direction::Up
    } else {
        Direction::Down
    }
}

fn oi_strong(m: &LegMetrics, t: &Thresholds) -> bool {
    m.delta_open_interest.abs() >= t.oi_strong_rel * m.open_interest.abs().max(1.0)
}

/// Classify one leg against its snapshot-wide volume profile.
pub fn classify_leg(m: &LegMetrics, profile: &VolumeProfile, t: &Thresholds) -> Interpretation {
    let price_dir = price_direction(m, t);
    let oi_dir = oi_direction(m, t);
    let high_volume = m.volume > 0.0 && m.volume >= profile.high;
    let label = InterpretationLabel::from_directions(price_dir, oi_dir);

    let volume_without_oi = high_volume && oi_dir.is_flat();
    let oi_without_volume = !oi_dir.is_flat() && oi_strong(m, t) && m.volume < profile.median;
    let flags = TruthFlags {
        volume_without_oi,
        oi_without_volume,
        real_money: high_volume && !oi_dir.is_flat() && !price_dir.is_flat(),
        volume_low: m.volume < profile.low,
    };

    let mut score: i32 = 50;
    if high_volume {
        score += 25;
    }
    if !oi_dir.is_flat() && !price_dir.is_flat() {
        score += 15;
    }
    if volume_without_oi {
        score -= 20;
    }
    if oi_without_volume {
        score -= 10;
    }

    Interpretation {
        label,
        description: describe(label, price_dir, oi_dir, high_volume, &flags),
        confidence_score: score.clamp(0, 100) as u8,
        truth_flags: flags,
        price_direction: price_dir,
        oi_direction: oi_dir,
        high_volume,
    }
}

fn describe(
    label: InterpretationLabel,
    price: Direction,
    oi: Direction,
    high_volume: bool,
    flags: &TruthFlags,
) -> String {
    if flags.volume_without_oi {
        return "High volume without OI change — likely intraday churn or algo flow".to_string();
    }
    if flags.oi_without_volume {
        return format!("OI {oi} on thin volume — quiet positional build");
    }
    let volume = if high_volume { "High volume" } else { "Normal volume" };
    match label {
        InterpretationLabel::LongBuildUp => {
            format!("{volume} with rising OI and rising price — fresh long positions")
        }
        InterpretationLabel::ShortBuildUp => {
            format!("{volume} with rising OI and falling price — fresh short positions")
        }
        InterpretationLabel::LongUnwinding => {
            format!("{volume} with falling OI and falling price — longs exiting")
        }
        InterpretationLabel::ShortCovering => {
            format!("{volume} with falling OI and rising price — shorts covering")
        }
        InterpretationLabel::Mixed => format!("Price {price}, OI {oi} — no clear driver"),
        InterpretationLabel::Neutral => "Price and OI flat — no participation".to_string(),
    }
}

/// Interpret both legs of every strike in the snapshot.
pub fn classify_snapshot(snapshot: &Snapshot, t: &Thresholds) -> Vec<StrikeInterpretation> {
    let ce_profile = VolumeProfile::for_leg(snapshot, Leg::Ce, t);
    let pe_profile = VolumeProfile::for_leg(snapshot, Leg::Pe, t);
    snapshot
        .strikes
        .iter()
        .map(|row| StrikeInterpretation {
            strike: row.strike,
            ce: classify_leg(&row.ce, &ce_profile, t),
            pe: classify_leg(&row.pe, &pe_profile, t),
        })
        .collect()
}
