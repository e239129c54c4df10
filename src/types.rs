use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Snapshot model
// ---------------------------------------------------------------------------

/// Per-leg (CE or PE) metrics at one strike.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegMetrics {
    pub open_interest: f64,
    /// Change in open interest since the previous exchange observation.
    pub delta_open_interest: f64,
    pub volume: f64,
    pub last_price: Option<f64>,
    pub price_change_pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeRow {
    pub strike: f64,
    #[serde(rename = "CE")]
    pub ce: LegMetrics,
    #[serde(rename = "PE")]
    pub pe: LegMetrics,
}

impl StrikeRow {
    pub fn leg(&self, leg: Leg) -> &LegMetrics {
        match leg {
            Leg::Ce => &self.ce,
            Leg::Pe => &self.pe,
        }
    }

    pub fn combined_oi(&self) -> f64 {
        self.ce.open_interest + self.pe.open_interest
    }

    pub fn combined_volume(&self) -> f64 {
        self.ce.volume + self.pe.volume
    }

    pub fn combined_abs_delta_oi(&self) -> f64 {
        self.ce.delta_open_interest.abs() + self.pe.delta_open_interest.abs()
    }
}

/// One refresh worth of option-chain data.
///
/// Strikes are unique and sorted ascending; [`Snapshot::new`] enforces this and every
/// analytics engine relies on it (window slicing, nearest-strike lookups, look-ahead).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Unix epoch milliseconds at which the snapshot was fetched.
    pub fetched_at_ms: i64,
    pub symbol: String,
    pub spot: f64,
    pub expiry: Option<String>,
    pub strikes: Vec<StrikeRow>,
    /// Underlying day change in percent, when the feed reports it.
    pub spot_change_pct: Option<f64>,
    /// Raw exchange timestamp string, for display only.
    pub exchange_timestamp: Option<String>,
}

impl Snapshot {
    /// Build a snapshot, sorting rows by strike. For duplicate strikes the later row wins.
    pub fn new(
        symbol: impl Into<String>,
        expiry: Option<String>,
        spot: f64,
        fetched_at_ms: i64,
        mut strikes: Vec<StrikeRow>,
    ) -> Self {
        strikes.retain(|r| r.strike.is_finite());
        // Stable sort keeps input order among equal strikes, so keeping the last of each run
        // keeps the later row.
        strikes.sort_by(|a, b| a.strike.total_cmp(&b.strike));
        let mut deduped: Vec<StrikeRow> = Vec::with_capacity(strikes.len());
        for row in strikes {
            match deduped.last_mut() {
                Some(last) if strike_key(last.strike) == strike_key(row.strike) => *last = row,
                _ => deduped.push(row),
            }
        }

        Self {
            fetched_at_ms,
            symbol: symbol.into(),
            spot,
            expiry,
            strikes: deduped,
            spot_change_pct: None,
            exchange_timestamp: None,
        }
    }

    pub fn with_exchange_timestamp(mut self, ts: Option<String>) -> Self {
        self.exchange_timestamp = ts;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.strikes.is_empty()
    }

    /// Wall-clock minute the snapshot belongs to. Two snapshots in the same minute are
    /// duplicates from the history window's point of view.
    pub fn minute_bucket(&self) -> i64 {
        self.fetched_at_ms.div_euclid(60_000)
    }

    /// Index of the at-the-money strike: nearest to spot, lower strike on a tie.
    pub fn atm_index(&self) -> Option<usize> {
        nearest_index(&self.strikes, self.spot)
    }

    pub fn atm_strike(&self) -> Option<f64> {
        self.atm_index().map(|i| self.strikes[i].strike)
    }

    /// Rows within `half_width` strikes on each side of ATM (clipped at the chain edges).
    pub fn atm_window(&self, half_width: usize) -> &[StrikeRow] {
        let Some(atm) = self.atm_index() else {
            return &[];
        };
        let lo = atm.saturating_sub(half_width);
        let hi = (atm + half_width + 1).min(self.strikes.len());
        &self.strikes[lo..hi]
    }

    pub fn row(&self, strike: f64) -> Option<&StrikeRow> {
        let key = strike_key(strike);
        self.strikes
            .binary_search_by(|r| strike_key(r.strike).cmp(&key))
            .ok()
            .map(|i| &self.strikes[i])
    }

    pub fn index_of(&self, strike: f64) -> Option<usize> {
        let key = strike_key(strike);
        self.strikes.binary_search_by(|r| strike_key(r.strike).cmp(&key)).ok()
    }

    pub fn total_volume(&self) -> f64 {
        self.strikes.iter().map(StrikeRow::combined_volume).sum()
    }

    pub fn avg_combined_volume(&self) -> f64 {
        mean(self.strikes.iter().map(StrikeRow::combined_volume))
    }

    pub fn avg_combined_oi(&self) -> f64 {
        mean(self.strikes.iter().map(StrikeRow::combined_oi))
    }

    pub fn avg_abs_delta_oi(&self) -> f64 {
        mean(self.strikes.iter().map(StrikeRow::combined_abs_delta_oi))
    }
}

/// Strikes are stored as `f64`; comparisons go through an integer key with two decimals
/// of precision to avoid floating-point equality.
#[inline]
pub fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

/// Index of the row whose strike is nearest `price`; lower strike on a tie.
pub fn nearest_index(rows: &[StrikeRow], price: f64) -> Option<usize> {
    rows.iter()
        .enumerate()
        .min_by(|(ia, a), (ib, b)| {
            (a.strike - price)
                .abs()
                .total_cmp(&(b.strike - price).abs())
                .then(ia.cmp(ib))
        })
        .map(|(i, _)| i)
}

pub fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

// ---------------------------------------------------------------------------
// Shared enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Leg {
    #[serde(rename = "CE")]
    Ce,
    #[serde(rename = "PE")]
    Pe,
}

impl std::fmt::Display for Leg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Leg::Ce => write!(f, "CE"),
            Leg::Pe => write!(f, "PE"),
        }
    }
}

/// Qualitative direction of price or open interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn is_flat(self) -> bool {
        self == Direction::Flat
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Up => "rising",
            Direction::Down => "falling",
            Direction::Flat => "flat",
        };
        write!(f, "{s}")
    }
}

/// Broad market direction used by the scalping engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

// ---------------------------------------------------------------------------
// Exchange date formats
// ---------------------------------------------------------------------------

/// Exchange wall clock is IST (UTC+05:30).
const IST_OFFSET_SECS: i64 = 5 * 3600 + 30 * 60;

fn month_number(mon: &str) -> Option<i64> {
    let m = match mon.to_ascii_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(m)
}

/// Days since the Unix epoch for a civil date (proleptic Gregorian).
fn unix_days(year: i64, month: i64, day: i64) -> i64 {
    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    jdn - 2_440_588
}

/// Parse an NSE date (`27-Oct-2026`) to days since the Unix epoch.
pub fn parse_nse_date(s: &str) -> Option<i64> {
    let mut parts = s.trim().split('-');
    let day: i64 = parts.next()?.parse().ok()?;
    let month = month_number(parts.next()?)?;
    let year: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(1..=31).contains(&day) {
        return None;
    }
    Some(unix_days(year, month, day))
}

/// Parse an NSE timestamp (`19-Oct-2026 15:30:00`, IST) to Unix epoch milliseconds.
pub fn parse_nse_timestamp_ms(s: &str) -> Option<i64> {
    let (date, time) = s.trim().split_once(' ')?;
    let days = parse_nse_date(date)?;
    let mut hms = time.trim().split(':').map(|p| p.parse::<i64>().ok());
    let hour = hms.next()??;
    let minute = hms.next()??;
    let second = hms.next().flatten().unwrap_or(0);
    let secs = days * 86_400 + hour * 3600 + minute * 60 + second - IST_OFFSET_SECS;
    Some(secs * 1000)
}

/// Calendar day (days since the Unix epoch) of an epoch-ms instant on the exchange's
/// IST wall clock.
pub fn ist_day(ms: i64) -> i64 {
    (ms + IST_OFFSET_SECS * 1000).div_euclid(86_400_000)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Snapshot builders shared by the engine tests.
    use super::*;

    pub fn leg(oi: f64, doi: f64, volume: f64, pct: Option<f64>) -> LegMetrics {
        LegMetrics {
            open_interest: oi,
            delta_open_interest: doi,
            volume,
            last_price: Some(100.0),
            price_change_pct: pct,
        }
    }

    pub fn row(strike: f64, ce: LegMetrics, pe: LegMetrics) -> StrikeRow {
        StrikeRow { strike, ce, pe }
    }

    /// Row with only OI set on both legs.
    pub fn oi_row(strike: f64, ce_oi: f64, pe_oi: f64) -> StrikeRow {
        row(strike, leg(ce_oi, 0.0, 0.0, None), leg(pe_oi, 0.0, 0.0, None))
    }

    pub fn snap(spot: f64, rows: Vec<StrikeRow>) -> Snapshot {
        Snapshot::new("NIFTY", Some("27-Oct-2026".to_string()), spot, 1_800_000_000_000, rows)
    }

    pub fn snap_at(spot: f64, fetched_at_ms: i64, rows: Vec<StrikeRow>) -> Snapshot {
        Snapshot::new("NIFTY", Some("27-Oct-2026".to_string()), spot, fetched_at_ms, rows)
    }

    /// Evenly spaced strikes with uniform OI/volume, centred on `center`.
    pub fn flat_chain(center: f64, step: f64, half: usize, oi: f64, volume: f64) -> Vec<StrikeRow> {
        (0..=2 * half)
            .map(|i| {
                let strike = center + (i as f64 - half as f64) * step;
                row(strike, leg(oi, 0.0, volume, None), leg(oi, 0.0, volume, None))
            })
            .collect()
    }
}
