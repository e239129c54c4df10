use std::str::FromStr;

use crate::error::{AppError, Result};

pub const NSE_BASE_URL: &str = "https://www.nseindia.com";

/// Default refresh tick for every tracked chain (seconds).
pub const REFRESH_INTERVAL_SECS: u64 = 15;

/// Per-request timeout against the exchange (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 10;

/// Attempts per fetch before the failure surfaces as a transport error.
pub const FETCH_MAX_ATTEMPTS: u32 = 3;

/// Pause between fetch attempts (milliseconds).
pub const FETCH_RETRY_PAUSE_MS: u64 = 500;

/// The NSE session is re-primed (home + option-chain page) at most this often (seconds).
pub const SESSION_PRIME_INTERVAL_SECS: u64 = 600;

/// A cached good payload may stand in for a failed fetch for this long (seconds).
pub const LAST_GOOD_CACHE_TTL_SECS: u64 = 120;

/// Channel capacity for refresher control messages.
pub const CHANNEL_CAPACITY: usize = 64;

/// History window bounds: whichever binds first evicts the oldest snapshot.
pub const HISTORY_MAX_ENTRIES: usize = 480;
pub const HISTORY_MAX_MINUTES: u64 = 120;

/// Heuristic cut-offs used by the analytics engines.
///
/// The values are empirical; they are kept as named defaults and every one of them
/// can be overridden through [`Thresholds`].
pub mod defaults {
    /// Price change within ±this percentage counts as flat.
    pub const PRICE_FLAT_PCT: f64 = 0.05;
    /// |ΔOI| below this many contracts counts as flat.
    pub const OI_FLAT_ABS: f64 = 1.0;
    /// |ΔOI| below this fraction of OI counts as flat.
    pub const OI_FLAT_REL: f64 = 0.001;
    /// |ΔOI| at or above this fraction of OI is a strong move.
    pub const OI_STRONG_REL: f64 = 0.05;

    pub const HIGH_VOLUME_PERCENTILE: f64 = 0.80;
    pub const MEDIAN_VOLUME_PERCENTILE: f64 = 0.50;
    pub const LOW_VOLUME_PERCENTILE: f64 = 0.20;

    /// Strikes on each side of ATM that feed the market bias tally.
    pub const BIAS_WINDOW_STRIKES: usize = 5;
    pub const RANGE_BOUND_MAX_CHANGE_PCT: f64 = 0.4;

    pub const BREAKOUT_BUFFER_PCT: f64 = 0.10;
    pub const BREAKOUT_BUFFER_HIGH_PCT: f64 = 0.15;
    /// Underlyings priced at or above this use the wider breakout buffer.
    pub const HIGH_PRICE_SPOT: f64 = 30_000.0;
    /// Strikes on each side of ATM used for breakout confirmation.
    pub const ATM_BAND_STRIKES: usize = 2;
    pub const WEAK_OI_RATIO: f64 = 0.60;
    pub const WEAK_VOLUME_RATIO: f64 = 0.80;

    pub const TARGET_LOOKAHEAD_STRIKES: usize = 10;
    pub const AIR_POCKET_OI_RATIO: f64 = 0.50;
    pub const ACCELERATION_EXTENSION: f64 = 0.50;

    pub const SCALP_PRICE_CHANGE_PCT: f64 = 0.25;
    pub const SCALP_VOLUME_SURGE_RATIO: f64 = 1.5;
    pub const SCALP_OI_IMBALANCE: f64 = 0.30;
    pub const SCALP_LOOKBACK_MINUTES: u64 = 5;
    pub const VWAP_FLAT_PCT: f64 = 0.05;

    /// Spot this far (percent) or further from max-pain has zero pinning probability.
    pub const PIN_DISTANCE_PCT: f64 = 0.3;

    pub const BASIS_FLAT_PCT: f64 = 0.05;

    pub const HEATMAP_COLUMNS: usize = 10;
}

/// Tunable heuristics threaded explicitly through every analytics call.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub price_flat_pct: f64,
    pub oi_flat_abs: f64,
    pub oi_flat_rel: f64,
    pub oi_strong_rel: f64,
    pub high_volume_percentile: f64,
    pub median_volume_percentile: f64,
    pub low_volume_percentile: f64,
    pub bias_window_strikes: usize,
    pub range_bound_max_change_pct: f64,
    pub breakout_buffer_pct: f64,
    pub breakout_buffer_high_pct: f64,
    pub high_price_spot: f64,
    pub atm_band_strikes: usize,
    pub weak_oi_ratio: f64,
    pub weak_volume_ratio: f64,
    pub target_lookahead_strikes: usize,
    pub air_pocket_oi_ratio: f64,
    pub acceleration_extension: f64,
    pub scalp_price_change_pct: f64,
    pub scalp_volume_surge_ratio: f64,
    pub scalp_oi_imbalance: f64,
    pub scalp_lookback_minutes: u64,
    pub vwap_flat_pct: f64,
    pub pin_distance_pct: f64,
    pub basis_flat_pct: f64,
    pub heatmap_columns: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        use defaults::*;
        Self {
            price_flat_pct: PRICE_FLAT_PCT,
            oi_flat_abs: OI_FLAT_ABS,
            oi_flat_rel: OI_FLAT_REL,
            oi_strong_rel: OI_STRONG_REL,
            high_volume_percentile: HIGH_VOLUME_PERCENTILE,
            median_volume_percentile: MEDIAN_VOLUME_PERCENTILE,
            low_volume_percentile: LOW_VOLUME_PERCENTILE,
            bias_window_strikes: BIAS_WINDOW_STRIKES,
            range_bound_max_change_pct: RANGE_BOUND_MAX_CHANGE_PCT,
            breakout_buffer_pct: BREAKOUT_BUFFER_PCT,
            breakout_buffer_high_pct: BREAKOUT_BUFFER_HIGH_PCT,
            high_price_spot: HIGH_PRICE_SPOT,
            atm_band_strikes: ATM_BAND_STRIKES,
            weak_oi_ratio: WEAK_OI_RATIO,
            weak_volume_ratio: WEAK_VOLUME_RATIO,
            target_lookahead_strikes: TARGET_LOOKAHEAD_STRIKES,
            air_pocket_oi_ratio: AIR_POCKET_OI_RATIO,
            acceleration_extension: ACCELERATION_EXTENSION,
            scalp_price_change_pct: SCALP_PRICE_CHANGE_PCT,
            scalp_volume_surge_ratio: SCALP_VOLUME_SURGE_RATIO,
            scalp_oi_imbalance: SCALP_OI_IMBALANCE,
            scalp_lookback_minutes: SCALP_LOOKBACK_MINUTES,
            vwap_flat_pct: VWAP_FLAT_PCT,
            pin_distance_pct: PIN_DISTANCE_PCT,
            basis_flat_pct: BASIS_FLAT_PCT,
            heatmap_columns: HEATMAP_COLUMNS,
        }
    }
}

impl Thresholds {
    /// Buffer (percent) a spot must clear beyond a key level to count as a breakout.
    pub fn breakout_buffer_for(&self, spot: f64) -> f64 {
        if spot >= self.high_price_spot {
            self.breakout_buffer_high_pct
        } else {
            self.breakout_buffer_pct
        }
    }

    fn from_env() -> Result<Self> {
        let base = Self::default();
        Ok(Self {
            breakout_buffer_pct: env_or("BREAKOUT_BUFFER_PCT", base.breakout_buffer_pct)?,
            breakout_buffer_high_pct: env_or(
                "BREAKOUT_BUFFER_HIGH_PCT",
                base.breakout_buffer_high_pct,
            )?,
            high_volume_percentile: env_or(
                "HIGH_VOLUME_PERCENTILE",
                base.high_volume_percentile,
            )?,
            low_volume_percentile: env_or("LOW_VOLUME_PERCENTILE", base.low_volume_percentile)?,
            range_bound_max_change_pct: env_or(
                "RANGE_BOUND_MAX_CHANGE_PCT",
                base.range_bound_max_change_pct,
            )?,
            bias_window_strikes: env_or("BIAS_WINDOW_STRIKES", base.bias_window_strikes)?,
            ..base
        })
    }
}

/// One option chain to track: symbol plus an optional pinned expiry
/// (None = nearest expiry as reported by the exchange).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainKey {
    pub symbol: String,
    pub expiry: Option<String>,
}

impl ChainKey {
    pub fn new(symbol: impl Into<String>, expiry: Option<String>) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            expiry: expiry.filter(|e| !e.trim().is_empty()),
        }
    }
}

impl std::fmt::Display for ChainKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.expiry {
            Some(expiry) => write!(f, "{}@{}", self.symbol, expiry),
            None => write!(f, "{}@nearest", self.symbol),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub nse_base_url: String,
    pub log_level: String,
    pub api_port: u16,
    /// Chains refreshed in parallel (SYMBOLS, comma-separated; EXPIRY pins all of them)
    pub chains: Vec<ChainKey>,
    /// NSE instrument type query parameter (INSTRUMENT_TYPE): Indices or Equity
    pub instrument_type: String,
    /// Timer interval for every refresher (REFRESH_INTERVAL_SECS)
    pub refresh_interval_secs: u64,
    /// Optional cookie header override for the NSE session (NSE_COOKIE)
    pub nse_cookie: Option<String>,
    pub history_max_entries: usize,
    pub history_max_minutes: u64,
    pub thresholds: Thresholds,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let expiry = std::env::var("EXPIRY").ok();
        let chains: Vec<ChainKey> = std::env::var("SYMBOLS")
            .unwrap_or_else(|_| "NIFTY,BANKNIFTY".to_string())
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| ChainKey::new(s, expiry.clone()))
            .collect();
        if chains.is_empty() {
            return Err(AppError::Config("SYMBOLS must name at least one symbol".to_string()));
        }

        let refresh_interval_secs = env_or("REFRESH_INTERVAL_SECS", REFRESH_INTERVAL_SECS)?;
        if refresh_interval_secs == 0 {
            return Err(AppError::Config("REFRESH_INTERVAL_SECS must be positive".to_string()));
        }

        Ok(Self {
            nse_base_url: std::env::var("NSE_BASE_URL")
                .unwrap_or_else(|_| NSE_BASE_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            chains,
            instrument_type: std::env::var("INSTRUMENT_TYPE")
                .unwrap_or_else(|_| "Indices".to_string()),
            refresh_interval_secs,
            nse_cookie: std::env::var("NSE_COOKIE").ok().filter(|c| !c.trim().is_empty()),
            history_max_entries: env_or("HISTORY_MAX_ENTRIES", HISTORY_MAX_ENTRIES)?,
            history_max_minutes: env_or("HISTORY_MAX_MINUTES", HISTORY_MAX_MINUTES)?,
            thresholds: Thresholds::from_env()?,
        })
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
/// A value that is set but unparseable is a configuration error.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
