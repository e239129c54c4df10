use std::future::Future;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, REFERER, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{
    ChainKey, Config, FETCH_MAX_ATTEMPTS, FETCH_RETRY_PAUSE_MS, FETCH_TIMEOUT_SECS,
    LAST_GOOD_CACHE_TTL_SECS, SESSION_PRIME_INTERVAL_SECS,
};
use crate::error::{AppError, Result};
use crate::types::{LegMetrics, Snapshot, StrikeRow};

const BROWSER_UA: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:147.0) Gecko/20100101 Firefox/147.0";

// ---------------------------------------------------------------------------
// SnapshotSource
// ---------------------------------------------------------------------------

/// Where snapshots come from. The refresher only sees this trait, so tests can feed it
/// scripted chains and the NSE client stays the single place that knows about HTTP.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch_snapshot(
        &self,
        key: &ChainKey,
        instrument_type: &str,
    ) -> impl Future<Output = Result<Snapshot>> + Send;

    /// Day % change of the index behind `symbol`, when the source has an index feed.
    fn index_change_pct(&self, _symbol: &str) -> impl Future<Output = Result<Option<f64>>> + Send {
        async { Ok(None) }
    }
}

// ---------------------------------------------------------------------------
// NseClient
// ---------------------------------------------------------------------------

/// Expiries and strikes listed for a symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    pub symbol: String,
    pub expiry_dates: Vec<String>,
    pub strike_prices: Vec<f64>,
}

/// A JSON response, or the last good one for the same request when every attempt failed.
#[derive(Debug)]
enum Payload {
    Fresh(Value),
    Cached { value: Value, age: Duration, error: String },
}

impl Payload {
    /// Fresh payloads only: a cache hit surfaces as the transport error it stands in for.
    fn fresh(self, context: &str) -> Result<Value> {
        match self {
            Payload::Fresh(value) => Ok(value),
            Payload::Cached { age, error, .. } => Err(AppError::Transport(format!(
                "NSE {context} failed after {FETCH_MAX_ATTEMPTS} attempts: {error} \
                 (last good payload is {}s old)",
                age.as_secs()
            ))),
        }
    }

    /// Any payload, fresh or cached. Used by the pass-through endpoints.
    fn any(self) -> Value {
        match self {
            Payload::Fresh(value) | Payload::Cached { value, .. } => value,
        }
    }
}

struct Session {
    client: reqwest::Client,
    primed_at: Option<Instant>,
}

/// NSE option-chain API client.
///
/// NSE serves the JSON API only to sessions carrying the cookies its HTML pages hand
/// out, so every session is primed against the home and option-chain pages first and
/// re-primed every `SESSION_PRIME_INTERVAL_SECS`. A payload that fails to arrive falls
/// back to the last good one for the same request while it is younger than
/// `LAST_GOOD_CACHE_TTL_SECS`. Pass-through endpoints serve that cached copy. The
/// option chain and the index change report it as a failed fetch.
pub struct NseClient {
    base_url: String,
    cookie: Option<String>,
    session: Mutex<Session>,
    /// request key → (received at, payload)
    last_good: DashMap<String, (Instant, Value)>,
}

impl NseClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let base_url = cfg.nse_base_url.trim_end_matches('/').to_string();
        let client = build_http_client(cfg.nse_cookie.as_deref())?;
        Ok(Self {
            base_url,
            cookie: cfg.nse_cookie.clone(),
            session: Mutex::new(Session { client, primed_at: None }),
            last_good: DashMap::new(),
        })
    }

    /// Fetch and parse the option chain for one symbol/expiry.
    pub async fn fetch_option_chain(&self, key: &ChainKey, instrument_type: &str) -> Result<Snapshot> {
        let mut params = vec![("type", instrument_type.to_string()), ("symbol", key.symbol.clone())];
        if let Some(expiry) = &key.expiry {
            params.push(("expiry", expiry.clone()));
        }
        let payload = self
            .request_json("/api/option-chain-v3", &params, "option chain")
            .await?
            .fresh("option chain")?;
        parse_option_chain(&payload, &key.symbol, key.expiry.as_deref(), now_ms())
    }

    pub async fn fetch_contract_info(&self, symbol: &str) -> Result<ContractInfo> {
        let symbol = symbol.trim().to_uppercase();
        let params = vec![("symbol", symbol.clone())];
        let payload = self
            .request_json("/api/option-chain-contract-info", &params, "contract info")
            .await?
            .any();
        Ok(parse_contract_info(&payload, &symbol))
    }

    /// Live quotes for every NSE index, one JSON object per index.
    pub async fn fetch_index_data(&self) -> Result<Vec<Value>> {
        Ok(index_rows(self.index_payload().await?.any()))
    }

    /// Day % change for the index behind an F&O symbol. None for symbols that are not
    /// indices or that the feed does not list.
    pub async fn fetch_index_change_pct(&self, symbol: &str) -> Result<Option<f64>> {
        let Some(name) = index_name_for(symbol) else {
            return Ok(None);
        };
        let rows = index_rows(self.index_payload().await?.fresh("index data")?);
        Ok(index_change_for(&rows, name))
    }

    async fn index_payload(&self) -> Result<Payload> {
        let params = vec![("functionName", "getIndexData".to_string()), ("type", "All".to_string())];
        self.request_json("/api/NextApi/apiClient", &params, "index data").await
    }

    /// GET a JSON endpoint with session priming, retries and the last-good fallback.
    async fn request_json(&self, path: &str, params: &[(&str, String)], context: &str) -> Result<Payload> {
        let url = format!("{}{}", self.base_url, path);
        let key = cache_key(&url, params);
        let mut last_error = String::from("no attempt made");

        for attempt in 0..FETCH_MAX_ATTEMPTS {
            let force_new = attempt > 0;
            match self.try_request(&url, params, force_new).await {
                Ok(payload) => {
                    self.last_good.insert(key, (Instant::now(), payload.clone()));
                    return Ok(Payload::Fresh(payload));
                }
                Err(e) => {
                    debug!(context, attempt, error = %e, "NSE request attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt + 1 < FETCH_MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(FETCH_RETRY_PAUSE_MS)).await;
            }
        }

        if let Some(entry) = self.last_good.get(&key) {
            let (at, payload) = entry.value();
            if at.elapsed() <= Duration::from_secs(LAST_GOOD_CACHE_TTL_SECS) {
                warn!(
                    context,
                    age_secs = at.elapsed().as_secs(),
                    error = %last_error,
                    "NSE {context} failed, serving last good payload"
                );
                return Ok(Payload::Cached {
                    value: payload.clone(),
                    age: at.elapsed(),
                    error: last_error,
                });
            }
        }

        Err(AppError::Transport(format!(
            "NSE {context} failed after {FETCH_MAX_ATTEMPTS} attempts: {last_error}"
        )))
    }

    async fn try_request(&self, url: &str, params: &[(&str, String)], force_new: bool) -> Result<Value> {
        let client = self.session(force_new).await?;
        let resp = client
            .get(url)
            .query(params)
            .header(ACCEPT, "application/json, text/plain, */*")
            .header("X-Requested-With", "XMLHttpRequest")
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Transport(format!("HTTP {status}")));
        }
        let payload: Value = resp.error_for_status()?.json().await?;
        if is_empty_payload(&payload) {
            return Err(AppError::Transport("Empty JSON payload".to_string()));
        }
        Ok(payload)
    }

    /// Current session client, rebuilt when `force_new` and primed when due.
    async fn session(&self, force_new: bool) -> Result<reqwest::Client> {
        let mut session = self.session.lock().await;
        if force_new {
            session.client = build_http_client(self.cookie.as_deref())?;
            session.primed_at = None;
        }
        let due = session
            .primed_at
            .map_or(true, |at| at.elapsed() >= Duration::from_secs(SESSION_PRIME_INTERVAL_SECS));
        if due {
            for page in ["", "/option-chain"] {
                session
                    .client
                    .get(format!("{}{}", self.base_url, page))
                    .send()
                    .await?;
            }
            session.primed_at = Some(Instant::now());
            info!(event = "NSE_SESSION_PRIMED", rebuilt = force_new, "NSE session primed");
        }
        Ok(session.client.clone())
    }
}

impl SnapshotSource for NseClient {
    fn fetch_snapshot(
        &self,
        key: &ChainKey,
        instrument_type: &str,
    ) -> impl Future<Output = Result<Snapshot>> + Send {
        self.fetch_option_chain(key, instrument_type)
    }

    fn index_change_pct(&self, symbol: &str) -> impl Future<Output = Result<Option<f64>>> + Send {
        self.fetch_index_change_pct(symbol)
    }
}

fn build_http_client(cookie: Option<&str>) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(REFERER, HeaderValue::from_static("https://www.nseindia.com/option-chain"));
    if let Some(cookie) = cookie {
        let value = HeaderValue::from_str(cookie)
            .map_err(|_| AppError::Config("NSE_COOKIE is not a valid header value".to_string()))?;
        headers.insert(COOKIE, value);
    }

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .cookie_store(true)
        .gzip(true)
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()?)
}

fn cache_key(url: &str, params: &[(&str, String)]) -> String {
    let mut parts: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.sort();
    format!("{url}?{}", parts.join("&"))
}

fn is_empty_payload(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ---------------------------------------------------------------------------
// Payload parsing
// ---------------------------------------------------------------------------

/// Numeric field that NSE may send as a number or as a string such as `"1,234.50"`.
/// `"-"` and empty strings read as missing.
fn num(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim().replace(',', "");
            if s.is_empty() || s == "-" {
                None
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

/// One CE or PE leg. A missing leg parses as all-zero metrics with no price.
fn parse_leg(v: Option<&Value>) -> LegMetrics {
    let Some(v) = v.filter(|v| v.is_object()) else {
        return LegMetrics::default();
    };
    let last_price = num(v, "lastPrice");
    let price_change_pct = num(v, "pChange").or_else(|| {
        let change = num(v, "change")?;
        let prev = last_price? - change;
        (prev > 0.0).then(|| change / prev * 100.0)
    });
    LegMetrics {
        open_interest: num(v, "openInterest").unwrap_or(0.0),
        delta_open_interest: num(v, "changeinOpenInterest").unwrap_or(0.0),
        volume: num(v, "totalTradedVolume").unwrap_or(0.0),
        last_price,
        price_change_pct,
    }
}

/// Expiry a data item belongs to. `option-chain-v3` calls the field `expiryDates`
/// (a single date despite the name); older payloads use `expiryDate`.
fn item_expiry(item: &Value) -> Option<&str> {
    item.get("expiryDates")
        .or_else(|| item.get("expiryDate"))
        .and_then(Value::as_str)
}

/// Build a snapshot from an option-chain payload.
///
/// With no requested expiry the nearest listed one is used. Items tagged with a
/// different expiry are skipped; strikes are sorted and de-duplicated by
/// [`Snapshot::new`]. A payload without `records`, or with rows but no positive
/// underlying value, is an empty snapshot error; a `records` block with no rows yields
/// an empty snapshot.
pub fn parse_option_chain(
    payload: &Value,
    symbol: &str,
    requested_expiry: Option<&str>,
    fetched_at_ms: i64,
) -> Result<Snapshot> {
    let records = payload
        .get("records")
        .filter(|r| r.is_object())
        .ok_or_else(|| AppError::EmptySnapshot(symbol.to_string()))?;

    let expiry = requested_expiry.map(str::to_string).or_else(|| {
        records
            .get("expiryDates")
            .and_then(Value::as_array)
            .and_then(|dates| dates.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let items = records.get("data").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
    let rows: Vec<StrikeRow> = items
        .iter()
        .filter(|item| match (item_expiry(item), expiry.as_deref()) {
            (Some(have), Some(want)) => have.eq_ignore_ascii_case(want),
            _ => true,
        })
        .filter_map(|item| {
            let strike = num(item, "strikePrice")?;
            Some(StrikeRow {
                strike,
                ce: parse_leg(item.get("CE")),
                pe: parse_leg(item.get("PE")),
            })
        })
        .collect();

    // The underlying also rides along on every leg when the records block omits it.
    let spot = num(records, "underlyingValue")
        .or_else(|| {
            items.iter().find_map(|item| {
                ["CE", "PE"]
                    .iter()
                    .find_map(|leg| item.get(*leg).and_then(|l| num(l, "underlyingValue")))
            })
        })
        .filter(|spot| *spot > 0.0);
    let spot = match spot {
        Some(spot) => spot,
        // Without an underlying price every level comparison is meaningless.
        None if !rows.is_empty() => return Err(AppError::EmptySnapshot(symbol.to_string())),
        None => 0.0,
    };

    let exchange_timestamp = records
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Snapshot::new(symbol, expiry, spot, fetched_at_ms, rows)
        .with_exchange_timestamp(exchange_timestamp))
}

// ---------------------------------------------------------------------------
// Index data
// ---------------------------------------------------------------------------

/// Index name in the `getIndexData` feed for an F&O index symbol.
pub fn index_name_for(symbol: &str) -> Option<&'static str> {
    let name = match symbol.trim().to_uppercase().as_str() {
        "NIFTY" => "NIFTY 50",
        "BANKNIFTY" => "NIFTY BANK",
        "FINNIFTY" => "NIFTY FINANCIAL SERVICES",
        "MIDCPNIFTY" => "NIFTY MID SELECT",
        "NIFTYNXT50" => "NIFTY NEXT 50",
        _ => return None,
    };
    Some(name)
}

fn index_rows(payload: Value) -> Vec<Value> {
    match payload {
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(rows)) => rows,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn index_name(row: &Value) -> Option<&str> {
    row.get("indexName").and_then(Value::as_str)
}

/// Keep rows whose `indexName` is in the comma-separated `names` (case-insensitive).
/// No filter, or an empty one, keeps everything.
pub fn filter_index_rows(rows: Vec<Value>, names: Option<&str>) -> Vec<Value> {
    let wanted: Vec<String> = names
        .unwrap_or_default()
        .split(',')
        .map(|n| n.trim().to_uppercase())
        .filter(|n| !n.is_empty())
        .collect();
    if wanted.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| index_name(row).is_some_and(|n| wanted.contains(&n.trim().to_uppercase())))
        .collect()
}

/// Day % change for `name`: the feed's own figure, else derived from last and previous close.
pub fn index_change_for(rows: &[Value], name: &str) -> Option<f64> {
    let row = rows
        .iter()
        .find(|row| index_name(row).is_some_and(|n| n.trim().eq_ignore_ascii_case(name)))?;
    ["percChange", "pChange", "percentChange"]
        .iter()
        .find_map(|key| num(row, key))
        .or_else(|| {
            let last = num(row, "last")?;
            let prev = num(row, "previousClose")?;
            (prev > 0.0).then(|| (last - prev) / prev * 100.0)
        })
}

pub fn parse_contract_info(payload: &Value, symbol: &str) -> ContractInfo {
    let expiry_dates = payload
        .get("expiryDates")
        .and_then(Value::as_array)
        .map(|dates| dates.iter().filter_map(|d| d.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let mut strike_prices: Vec<f64> = payload
        .get("strikePrice")
        .and_then(Value::as_array)
        .map(|strikes| {
            strikes
                .iter()
                .filter_map(|s| match s {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().replace(',', "").parse().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();
    strike_prices.sort_by(f64::total_cmp);
    strike_prices.dedup();

    ContractInfo {
        symbol: symbol.to_string(),
        expiry_dates,
        strike_prices,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "records": {
                "timestamp": "19-Oct-2026 15:30:00",
                "underlyingValue": 25_012.35,
                "expiryDates": ["27-Oct-2026", "03-Nov-2026"],
                "data": [
                    {
                        "strikePrice": 25_100,
                        "expiryDates": "27-Oct-2026",
                        "CE": { "openInterest": 1200, "changeinOpenInterest": 150, "totalTradedVolume": 9000,
                                "lastPrice": 80.5, "pChange": 12.4 },
                        "PE": { "openInterest": 300, "changeinOpenInterest": -20, "totalTradedVolume": 700,
                                "lastPrice": 160.0, "change": -40.0 }
                    },
                    {
                        "strikePrice": 25_000,
                        "expiryDates": "27-Oct-2026",
                        "CE": { "openInterest": "1,500", "changeinOpenInterest": 10, "totalTradedVolume": 5000,
                                "lastPrice": 120.0, "pChange": "-" }
                    },
                    {
                        "strikePrice": 25_000,
                        "expiryDates": "03-Nov-2026",
                        "CE": { "openInterest": 99999 }
                    }
                ]
            }
        })
    }

    #[test]
    fn parses_sorted_rows_for_nearest_expiry() {
        let s = parse_option_chain(&payload(), "NIFTY", None, 1_000).unwrap();
        assert_eq!(s.expiry.as_deref(), Some("27-Oct-2026"));
        assert_eq!(s.spot, 25_012.35);
        assert_eq!(s.fetched_at_ms, 1_000);
        assert_eq!(s.exchange_timestamp.as_deref(), Some("19-Oct-2026 15:30:00"));
        let strikes: Vec<f64> = s.strikes.iter().map(|r| r.strike).collect();
        assert_eq!(strikes, vec![25_000.0, 25_100.0]);

        let low = &s.strikes[0];
        assert_eq!(low.ce.open_interest, 1_500.0);
        assert_eq!(low.ce.price_change_pct, None);
        // Missing PE leg reads as zeros.
        assert_eq!(low.pe, LegMetrics::default());

        let high = &s.strikes[1];
        assert_eq!(high.ce.price_change_pct, Some(12.4));
        assert_eq!(high.pe.delta_open_interest, -20.0);
        // pChange absent: derived from change over the previous price (160 + 40).
        assert!((high.pe.price_change_pct.unwrap() + 20.0).abs() < 1e-9);
    }

    #[test]
    fn requested_expiry_filters_rows() {
        let s = parse_option_chain(&payload(), "NIFTY", Some("03-Nov-2026"), 0).unwrap();
        assert_eq!(s.strikes.len(), 1);
        assert_eq!(s.strikes[0].ce.open_interest, 99_999.0);
    }

    #[test]
    fn spot_falls_back_to_leg_underlying() {
        let p = json!({ "records": { "data": [
            { "strikePrice": 100, "PE": { "underlyingValue": 101.5, "openInterest": 1 } }
        ] } });
        let s = parse_option_chain(&p, "X", None, 0).unwrap();
        assert_eq!(s.spot, 101.5);
        assert_eq!(s.expiry, None);
    }

    #[test]
    fn missing_records_is_empty_snapshot_error() {
        let err = parse_option_chain(&json!({}), "NIFTY", None, 0).unwrap_err();
        assert!(matches!(err, AppError::EmptySnapshot(ref s) if s == "NIFTY"));

        let empty = parse_option_chain(&json!({ "records": { "data": [] } }), "NIFTY", None, 0).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn rows_without_spot_are_rejected() {
        let p = json!({ "records": { "data": [
            { "strikePrice": 23_000, "CE": { "openInterest": 10 }, "PE": { "openInterest": 20 } }
        ] } });
        let err = parse_option_chain(&p, "NIFTY", None, 0).unwrap_err();
        assert!(matches!(err, AppError::EmptySnapshot(_)));

        let zero = json!({ "records": { "underlyingValue": 0, "data": [
            { "strikePrice": 23_000, "CE": { "openInterest": 10 } }
        ] } });
        assert!(parse_option_chain(&zero, "NIFTY", None, 0).is_err());
    }

    fn index_payload() -> Value {
        json!({ "data": [
            { "indexName": "NIFTY 50", "last": 25_100.0, "previousClose": 25_000.0, "percChange": 0.4 },
            { "indexName": "NIFTY BANK", "last": "56,100.00", "previousClose": "55,000.00" },
            { "indexName": "INDIA VIX", "last": 12.5, "percChange": "-3.10" }
        ] })
    }

    #[test]
    fn index_change_prefers_feed_figure() {
        let rows = index_rows(index_payload());
        assert_eq!(index_change_for(&rows, index_name_for("nifty").unwrap()), Some(0.4));
        let bank = index_change_for(&rows, index_name_for("BANKNIFTY").unwrap()).unwrap();
        assert!((bank - 2.0).abs() < 1e-9, "bank={bank}");
        assert_eq!(index_change_for(&rows, "NIFTY MID SELECT"), None);
        assert_eq!(index_name_for("RELIANCE"), None);
    }

    #[test]
    fn index_rows_filter_by_name() {
        let rows = index_rows(index_payload());
        assert_eq!(filter_index_rows(rows.clone(), None).len(), 3);
        assert_eq!(filter_index_rows(rows.clone(), Some(" ")).len(), 3);
        let picked = filter_index_rows(rows, Some("nifty 50, India VIX"));
        let names: Vec<&str> = picked.iter().filter_map(index_name).collect();
        assert_eq!(names, vec!["NIFTY 50", "INDIA VIX"]);
        assert!(index_rows(json!([])).is_empty());
    }

    /// Local stand-in for NSE: the HTML pages always answer, the option-chain endpoint
    /// answers once and then fails with 500.
    async fn flaky_exchange() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new()
            .route("/", get(|| async { "home" }))
            .route("/option-chain", get(|| async { "page" }))
            .route(
                "/api/option-chain-v3",
                get(move || {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Json(payload()).into_response()
                        } else {
                            StatusCode::INTERNAL_SERVER_ERROR.into_response()
                        }
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn local_config(base_url: String) -> Config {
        Config {
            nse_base_url: base_url,
            log_level: "info".to_string(),
            api_port: 0,
            chains: vec![ChainKey::new("NIFTY", None)],
            instrument_type: "Indices".to_string(),
            refresh_interval_secs: 15,
            nse_cookie: None,
            history_max_entries: 480,
            history_max_minutes: 120,
            thresholds: crate::config::Thresholds::default(),
        }
    }

    #[tokio::test]
    async fn cached_payload_is_a_transport_failure_for_snapshots() {
        let (base_url, hits) = flaky_exchange().await;
        let client = NseClient::new(&local_config(base_url)).unwrap();
        let key = ChainKey::new("NIFTY", None);

        let first = client.fetch_snapshot(&key, "Indices").await.unwrap();
        assert_eq!(first.strikes.len(), 2);

        let err = client.fetch_snapshot(&key, "Indices").await.unwrap_err();
        assert!(matches!(err, AppError::Transport(ref msg) if msg.contains("last good payload")), "{err}");
        assert_eq!(hits.load(Ordering::SeqCst), 1 + FETCH_MAX_ATTEMPTS as usize);

        // The store keeps the first result and flags the chain stale.
        let store = crate::state::ChainStore::default();
        let s1 = store.next_seq(&key);
        store.apply(&key, s1, first);
        let s2 = store.next_seq(&key);
        store.mark_failed(&key, s2, &err.to_string());
        let status = store.status(&key).unwrap();
        assert!(status.stale);
        assert_eq!(status.history_len, 1);
        assert_eq!(status.passes, 1);
    }

    #[test]
    fn contract_info_sorts_strikes() {
        let p = json!({
            "expiryDates": ["27-Oct-2026", "03-Nov-2026"],
            "strikePrice": ["25100", "24,900", 25000, "25100"]
        });
        let info = parse_contract_info(&p, "NIFTY");
        assert_eq!(info.expiry_dates.len(), 2);
        assert_eq!(info.strike_prices, vec![24_900.0, 25_000.0, 25_100.0]);
    }

    #[test]
    fn cache_key_ignores_param_order() {
        let a = cache_key("u", &[("symbol", "NIFTY".into()), ("type", "Indices".into())]);
        let b = cache_key("u", &[("type", "Indices".into()), ("symbol", "NIFTY".into())]);
        assert_eq!(a, b);
        assert!(is_empty_payload(&json!({})));
        assert!(!is_empty_payload(&json!({ "records": {} })));
    }
}
