use crate::error::StreamError;
use crate::market::window::WindowBound;
use chrono::{FixedOffset, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_INTERVAL: CandleInterval = CandleInterval::M1;
pub const DEFAULT_KLINE_LIMIT: usize = 200;
pub const DEFAULT_WINDOW_MINUTES: f64 = 1.0;
pub const DEFAULT_EMIT_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_LOOPS: u32 = 100;
pub const MIN_KLINE_LIMIT: usize = 1;
pub const MAX_KLINE_LIMIT: usize = 5_000;
pub const MAX_WINDOW_MINUTES: f64 = 1_440.0;
pub const MAX_EMIT_INTERVAL_MS: u64 = 10_000;
pub const MIN_MAX_LOOPS: u32 = 1;
pub const MAX_MAX_LOOPS: u32 = 1_000;

pub const DEFAULT_REST_BASE_URL: &str = "https://api.binance.com";
pub const DEFAULT_WS_BASE_URL: &str = "wss://stream.binance.com:9443/ws";
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;
pub const DEFAULT_FIELD_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_PING_INTERVAL_MS: u64 = 20_000;
pub const DEFAULT_PONG_TIMEOUT_MS: u64 = 10_000;
/// India Standard Time, the display zone the sheets were built around.
pub const DEFAULT_DISPLAY_OFFSET_MINUTES: i32 = 330;
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;
pub const DEFAULT_AGG_TRADE_PAGE_SIZE: u16 = 1_000;

pub const STATUS_LABEL: &str = "STREAM_STATUS";
pub const INVALID_FIELD: &str = "Invalid Field";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    AggTrade,
    Kline,
    AllTicker,
    TickerField,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AggTrade => "aggTrade",
            Self::Kline => "kline",
            Self::AllTicker => "allTicker",
            Self::TickerField => "tickerField",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CandleInterval {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl CandleInterval {
    pub const ALL: [Self; 16] = [
        Self::S1,
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
        Self::Mo1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::S1 => "1s",
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    pub fn duration_ms(self) -> i64 {
        const MINUTE: i64 = 60_000;
        const HOUR: i64 = 60 * MINUTE;
        const DAY: i64 = 24 * HOUR;
        match self {
            Self::S1 => 1_000,
            Self::M1 => MINUTE,
            Self::M3 => 3 * MINUTE,
            Self::M5 => 5 * MINUTE,
            Self::M15 => 15 * MINUTE,
            Self::M30 => 30 * MINUTE,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::D3 => 3 * DAY,
            Self::W1 => 7 * DAY,
            Self::Mo1 => 30 * DAY,
        }
    }

    /// Case-sensitive: `1m` is a minute, `1M` is a month.
    pub fn parse_str(value: &str) -> Result<Self, StreamError> {
        let trimmed = value.trim();
        Self::ALL
            .into_iter()
            .find(|interval| interval.as_str() == trimmed)
            .ok_or_else(|| {
                StreamError::InvalidConfiguration(format!("unsupported interval '{trimmed}'"))
            })
    }
}

/// Keys of the single-symbol `@ticker` push payload, with the friendly names the
/// sheets use for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickerField {
    EventTime,
    Symbol,
    PriceChange,
    PriceChangePercent,
    WeightedAveragePrice,
    LastPrice,
    LastQuantity,
    OpenPrice,
    HighPrice,
    LowPrice,
    BaseVolume,
    QuoteVolume,
    StatisticsOpenTime,
    StatisticsCloseTime,
    FirstTradeId,
    LastTradeId,
    TradeCount,
}

impl TickerField {
    pub const ALL: [Self; 17] = [
        Self::EventTime,
        Self::Symbol,
        Self::PriceChange,
        Self::PriceChangePercent,
        Self::WeightedAveragePrice,
        Self::LastPrice,
        Self::LastQuantity,
        Self::OpenPrice,
        Self::HighPrice,
        Self::LowPrice,
        Self::BaseVolume,
        Self::QuoteVolume,
        Self::StatisticsOpenTime,
        Self::StatisticsCloseTime,
        Self::FirstTradeId,
        Self::LastTradeId,
        Self::TradeCount,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Self::EventTime => "E",
            Self::Symbol => "s",
            Self::PriceChange => "p",
            Self::PriceChangePercent => "P",
            Self::WeightedAveragePrice => "w",
            Self::LastPrice => "c",
            Self::LastQuantity => "Q",
            Self::OpenPrice => "o",
            Self::HighPrice => "h",
            Self::LowPrice => "l",
            Self::BaseVolume => "v",
            Self::QuoteVolume => "q",
            Self::StatisticsOpenTime => "O",
            Self::StatisticsCloseTime => "C",
            Self::FirstTradeId => "F",
            Self::LastTradeId => "L",
            Self::TradeCount => "n",
        }
    }

    pub fn friendly_name(self) -> &'static str {
        match self {
            Self::EventTime => "Event time",
            Self::Symbol => "Symbol",
            Self::PriceChange => "Price change",
            Self::PriceChangePercent => "Price change percent",
            Self::WeightedAveragePrice => "Weighted average price",
            Self::LastPrice => "Last price",
            Self::LastQuantity => "Last quantity",
            Self::OpenPrice => "Open price",
            Self::HighPrice => "High price",
            Self::LowPrice => "Low price",
            Self::BaseVolume => "Total traded base asset volume",
            Self::QuoteVolume => "Total traded quote asset volume",
            Self::StatisticsOpenTime => "Statistics open time",
            Self::StatisticsCloseTime => "Statistics close time",
            Self::FirstTradeId => "First trade ID",
            Self::LastTradeId => "Last trade ID",
            Self::TradeCount => "Total number of trades",
        }
    }

    /// Friendly names match exactly; raw keys are case-sensitive (`p` vs `P`).
    pub fn parse_str(value: &str) -> Result<Self, StreamError> {
        Self::ALL
            .into_iter()
            .find(|field| field.friendly_name() == value || field.key() == value)
            .ok_or_else(|| StreamError::InvalidConfiguration(INVALID_FIELD.to_string()))
    }
}

/// Raw subscription request, as a host would hand it over.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeArgs {
    pub kind: StreamKind,
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub minutes: Option<f64>,
    pub limit: Option<u32>,
    pub emit_interval_ms: Option<u64>,
    pub max_loops: Option<u32>,
    pub field: Option<String>,
}

impl SubscribeArgs {
    fn empty(kind: StreamKind) -> Self {
        Self {
            kind,
            symbol: None,
            interval: None,
            minutes: None,
            limit: None,
            emit_interval_ms: None,
            max_loops: None,
            field: None,
        }
    }

    pub fn agg_trade(symbol: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            ..Self::empty(StreamKind::AggTrade)
        }
    }

    pub fn kline(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            interval: Some(interval.into()),
            ..Self::empty(StreamKind::Kline)
        }
    }

    pub fn all_tickers() -> Self {
        Self::empty(StreamKind::AllTicker)
    }

    pub fn ticker_field(symbol: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            symbol: Some(symbol.into()),
            field: Some(field.into()),
            ..Self::empty(StreamKind::TickerField)
        }
    }

    pub fn with_minutes(mut self, minutes: f64) -> Self {
        self.minutes = Some(minutes);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_emit_interval_ms(mut self, emit_interval_ms: u64) -> Self {
        self.emit_interval_ms = Some(emit_interval_ms);
        self
    }

    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = Some(max_loops);
        self
    }

    pub fn normalize(self) -> Result<StreamConfig, StreamError> {
        let symbol = match self.kind {
            StreamKind::AllTicker => String::new(),
            _ => normalize_symbol(self.symbol.as_deref())?,
        };

        let spec = match self.kind {
            StreamKind::AggTrade => {
                let minutes = self.minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
                if !minutes.is_finite() || minutes <= 0.0 || minutes > MAX_WINDOW_MINUTES {
                    return Err(StreamError::InvalidConfiguration(format!(
                        "minutes must be greater than 0 and at most {MAX_WINDOW_MINUTES}"
                    )));
                }

                let limit = match self.limit {
                    Some(0) => {
                        return Err(StreamError::InvalidConfiguration(
                            "limit must be at least 1".to_string(),
                        ))
                    }
                    other => other.map(|value| value as usize),
                };

                let emit_interval_ms = self.emit_interval_ms.unwrap_or(DEFAULT_EMIT_INTERVAL_MS);
                if emit_interval_ms > MAX_EMIT_INTERVAL_MS {
                    return Err(StreamError::InvalidConfiguration(format!(
                        "emitIntervalMs must be between 0 and {MAX_EMIT_INTERVAL_MS}"
                    )));
                }

                let max_loops = self.max_loops.unwrap_or(DEFAULT_MAX_LOOPS);
                if !(MIN_MAX_LOOPS..=MAX_MAX_LOOPS).contains(&max_loops) {
                    return Err(StreamError::InvalidConfiguration(format!(
                        "maxLoops must be between {MIN_MAX_LOOPS} and {MAX_MAX_LOOPS}"
                    )));
                }

                StreamSpec::AggTrade {
                    minutes,
                    limit,
                    emit_interval_ms,
                    max_loops,
                }
            }
            StreamKind::Kline => {
                let interval = match self.interval.as_deref() {
                    Some(raw) => CandleInterval::parse_str(raw)?,
                    None => DEFAULT_INTERVAL,
                };
                let limit = self
                    .limit
                    .map(|value| value as usize)
                    .unwrap_or(DEFAULT_KLINE_LIMIT);
                if !(MIN_KLINE_LIMIT..=MAX_KLINE_LIMIT).contains(&limit) {
                    return Err(StreamError::InvalidConfiguration(format!(
                        "limit must be between {MIN_KLINE_LIMIT} and {MAX_KLINE_LIMIT}"
                    )));
                }
                StreamSpec::Kline { interval, limit }
            }
            StreamKind::AllTicker => StreamSpec::AllTicker,
            StreamKind::TickerField => {
                let raw = self.field.as_deref().unwrap_or_default();
                StreamSpec::TickerField {
                    field: TickerField::parse_str(raw)?,
                }
            }
        };

        Ok(StreamConfig { symbol, spec })
    }
}

fn normalize_symbol(raw: Option<&str>) -> Result<String, StreamError> {
    let symbol = raw.unwrap_or_default().trim().to_ascii_uppercase();
    if symbol.is_empty() || !symbol.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(StreamError::InvalidConfiguration(
            "symbol must be non-empty alphanumeric ASCII".to_string(),
        ));
    }
    Ok(symbol)
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamSpec {
    AggTrade {
        minutes: f64,
        limit: Option<usize>,
        emit_interval_ms: u64,
        max_loops: u32,
    },
    Kline {
        interval: CandleInterval,
        limit: usize,
    },
    AllTicker,
    TickerField {
        field: TickerField,
    },
}

/// Validated subscription parameters. The symbol is stored upper-case and is
/// empty for the all-market ticker.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub symbol: String,
    pub spec: StreamSpec,
}

impl StreamConfig {
    pub fn kind(&self) -> StreamKind {
        match self.spec {
            StreamSpec::AggTrade { .. } => StreamKind::AggTrade,
            StreamSpec::Kline { .. } => StreamKind::Kline,
            StreamSpec::AllTicker => StreamKind::AllTicker,
            StreamSpec::TickerField { .. } => StreamKind::TickerField,
        }
    }

    pub fn push_topic(&self) -> String {
        let symbol = self.symbol.to_ascii_lowercase();
        match &self.spec {
            StreamSpec::AggTrade { .. } => format!("{symbol}@aggTrade"),
            StreamSpec::Kline { interval, .. } => format!("{symbol}@kline_{}", interval.as_str()),
            StreamSpec::AllTicker => "!ticker@arr".to_string(),
            StreamSpec::TickerField { .. } => format!("{symbol}@ticker"),
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        let parameters = match &self.spec {
            StreamSpec::AggTrade {
                minutes,
                limit,
                emit_interval_ms,
                max_loops,
            } => {
                let limit = limit.map(|value| value.to_string()).unwrap_or_default();
                format!("minutes={minutes}&limit={limit}&emit={emit_interval_ms}&loops={max_loops}")
            }
            StreamSpec::Kline { interval, limit } => {
                format!("interval={}&limit={limit}", interval.as_str())
            }
            StreamSpec::AllTicker => String::new(),
            StreamSpec::TickerField { field } => format!("field={}", field.key()),
        };
        SubscriptionKey(format!(
            "{}:{}:{parameters}",
            self.kind().as_str(),
            self.symbol
        ))
    }

    /// Engine behaviour for table-producing kinds; `None` for the scalar field stream.
    pub fn profile(&self) -> Option<StreamProfile> {
        match &self.spec {
            StreamSpec::AggTrade {
                minutes,
                limit,
                emit_interval_ms,
                ..
            } => Some(StreamProfile {
                identity: IdentityMode::Append,
                bound: WindowBound {
                    max_rows: *limit,
                    max_age_ms: Some((minutes * 60_000.0).round() as i64),
                },
                emit: if *emit_interval_ms == 0 {
                    EmitPolicy::EveryMutation
                } else {
                    EmitPolicy::Throttled(Duration::from_millis(*emit_interval_ms))
                },
                tracks_liveness: false,
                reconcile_on_close: false,
            }),
            StreamSpec::Kline { limit, .. } => Some(StreamProfile {
                identity: IdentityMode::Replace,
                bound: WindowBound {
                    max_rows: Some(*limit),
                    max_age_ms: None,
                },
                emit: EmitPolicy::EveryMutation,
                tracks_liveness: true,
                reconcile_on_close: true,
            }),
            StreamSpec::AllTicker => Some(StreamProfile {
                identity: IdentityMode::Replace,
                bound: WindowBound::default(),
                emit: EmitPolicy::EveryMutation,
                tracks_liveness: true,
                reconcile_on_close: false,
            }),
            StreamSpec::TickerField { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Identities only grow; anything not above the running maximum is a replay.
    Append,
    /// Each identity is an independent slot, overwritten on every arrival.
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitPolicy {
    EveryMutation,
    Throttled(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProfile {
    pub identity: IdentityMode,
    pub bound: WindowBound,
    pub emit: EmitPolicy,
    pub tracks_liveness: bool,
    pub reconcile_on_close: bool,
}

/// One table cell as handed to the host.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Integer(i64),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for Cell {
    fn from(value: u64) -> Self {
        Self::Integer(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<bool> for Cell {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamStatus {
    Live,
    Disconnected,
}

impl StreamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Disconnected => "DISCONNECTED",
        }
    }

    /// `["STREAM_STATUS", <status>, "", ...]` padded to `width` cells.
    pub fn row(self, width: usize) -> Vec<Cell> {
        let mut row = Vec::with_capacity(width.max(2));
        row.push(Cell::from(STATUS_LABEL));
        row.push(Cell::from(self.as_str()));
        while row.len() < width {
            row.push(Cell::from(""));
        }
        row
    }
}

/// One immutable materialized table. New state always produces a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    header: &'static [&'static str],
    rows: Vec<Vec<Cell>>,
    status: Option<StreamStatus>,
}

impl Snapshot {
    pub fn new(header: &'static [&'static str], rows: Vec<Vec<Cell>>) -> Self {
        Self {
            header,
            rows,
            status: None,
        }
    }

    pub fn with_status(mut self, status: StreamStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn header(&self) -> &[&'static str] {
        self.header
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn status(&self) -> Option<StreamStatus> {
        self.status
    }

    /// The same table marked stale, or `None` when this kind carries no status row.
    pub fn frozen(&self) -> Option<Self> {
        self.status.map(|_| Self {
            header: self.header,
            rows: self.rows.clone(),
            status: Some(StreamStatus::Disconnected),
        })
    }

    pub fn to_table(&self) -> Vec<Vec<Cell>> {
        let width = self.header.len();
        let mut table = Vec::with_capacity(self.rows.len() + 2);
        table.push(self.header.iter().map(|name| Cell::from(*name)).collect());
        table.extend(self.rows.iter().cloned());
        if let Some(status) = self.status {
            table.push(status.row(width));
        }
        table
    }
}

impl Serialize for Snapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_table().serialize(serializer)
    }
}

/// A value pulled by the host from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamValue {
    Table(std::sync::Arc<Snapshot>),
    Scalar(Cell),
    /// Terminal, user-visible diagnostic for a rejected configuration.
    Diagnostic(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorPhase {
    Backfilling,
    Streaming,
    Frozen,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub phase: SupervisorPhase,
    pub key: String,
    pub reason: Option<String>,
    pub snapshots_emitted: u64,
    pub reconnect_attempts: u32,
    pub duplicates_dropped: u64,
    pub last_identity: Option<i64>,
}

impl SubscriptionStatus {
    pub fn starting(key: &SubscriptionKey) -> Self {
        Self {
            phase: SupervisorPhase::Backfilling,
            key: key.to_string(),
            reason: Some("subscription starting".to_string()),
            snapshots_emitted: 0,
            reconnect_attempts: 0,
            duplicates_dropped: 0,
            last_identity: None,
        }
    }

    /// Status of a subscription whose arguments never validated.
    pub fn rejected(kind: StreamKind, reason: String) -> Self {
        Self {
            phase: SupervisorPhase::Failed,
            key: format!("{}:rejected", kind.as_str()),
            reason: Some(reason),
            snapshots_emitted: 0,
            reconnect_attempts: 0,
            duplicates_dropped: 0,
            last_identity: None,
        }
    }
}

/// Engine-wide knobs shared by every subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub rest_base_url: String,
    pub ws_base_url: String,
    pub reconnect_delay: Duration,
    pub field_reconnect_delay: Duration,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub display_offset_minutes: i32,
    pub channel_capacity: usize,
    pub agg_trade_page_size: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rest_base_url: DEFAULT_REST_BASE_URL.to_string(),
            ws_base_url: DEFAULT_WS_BASE_URL.to_string(),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            field_reconnect_delay: Duration::from_millis(DEFAULT_FIELD_RECONNECT_DELAY_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            pong_timeout: Duration::from_millis(DEFAULT_PONG_TIMEOUT_MS),
            display_offset_minutes: DEFAULT_DISPLAY_OFFSET_MINUTES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            agg_trade_page_size: DEFAULT_AGG_TRADE_PAGE_SIZE,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `SHEET_STREAM_*` variables; unparsable values are ignored.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rest_base_url: env_value("SHEET_STREAM_REST_URL").unwrap_or(defaults.rest_base_url),
            ws_base_url: env_value("SHEET_STREAM_WS_URL").unwrap_or(defaults.ws_base_url),
            reconnect_delay: env_value("SHEET_STREAM_RECONNECT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            field_reconnect_delay: env_value("SHEET_STREAM_FIELD_RECONNECT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.field_reconnect_delay),
            ping_interval: env_value("SHEET_STREAM_PING_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.ping_interval),
            pong_timeout: env_value("SHEET_STREAM_PONG_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.pong_timeout),
            display_offset_minutes: env_value("SHEET_STREAM_DISPLAY_OFFSET_MINUTES")
                .unwrap_or(defaults.display_offset_minutes),
            channel_capacity: env_value("SHEET_STREAM_CHANNEL_CAPACITY")
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.channel_capacity),
            agg_trade_page_size: defaults.agg_trade_page_size,
        }
    }

    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.display_offset_minutes.saturating_mul(60))
            .unwrap_or_else(|| Utc.fix())
    }
}

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<T>().ok())
}
