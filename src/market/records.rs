use crate::error::StreamError;
use crate::market::types::{Cell, TickerField};
use chrono::{DateTime, FixedOffset};
use serde::Deserialize;

pub const AGG_TRADE_HEADER: &[&str] = &[
    "TradeTime",
    "Price",
    "Quantity",
    "AggTradeID",
    "FirstTradeID",
    "LastTradeID",
    "IsBuyerMaker",
    "IsBestMatch",
];

pub const KLINE_HEADER: &[&str] = &[
    "OpenDateTime",
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "CloseDateTime",
    "QuoteAssetVolume",
    "NumberOfTrades",
    "TakerBuyBaseVol",
    "TakerBuyQuoteVol",
];

pub const TICKER_HEADER: &[&str] = &[
    "Symbol",
    "EventTime",
    "LastPrice",
    "PriceChange",
    "PriceChangePercent",
    "HighPrice",
    "LowPrice",
    "BaseVolume",
    "QuoteVolume",
    "NumberOfTrades",
];

/// Store key. Sequences (trade ids, candle open times) sort numerically and
/// symbols lexically; a stream only ever uses one of the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventIdentity {
    Sequence(i64),
    Symbol(String),
}

impl EventIdentity {
    pub fn as_sequence(&self) -> Option<i64> {
        match self {
            Self::Sequence(value) => Some(*value),
            Self::Symbol(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggTrade {
    pub aggregate_trade_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub first_trade_id: u64,
    pub last_trade_id: u64,
    pub trade_time: i64,
    pub is_buyer_maker: bool,
    pub is_best_match: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
    pub taker_buy_base_volume: f64,
    pub taker_buy_quote_volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub event_time: i64,
    pub last_price: f64,
    pub price_change: f64,
    pub price_change_percent: f64,
    pub high_price: f64,
    pub low_price: f64,
    pub base_volume: f64,
    pub quote_volume: f64,
    pub trade_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalEvent {
    AggTrade(AggTrade),
    Kline(Kline),
    Ticker(Ticker),
}

impl CanonicalEvent {
    pub fn identity(&self) -> EventIdentity {
        match self {
            Self::AggTrade(trade) => EventIdentity::Sequence(
                i64::try_from(trade.aggregate_trade_id).unwrap_or(i64::MAX),
            ),
            Self::Kline(kline) => EventIdentity::Sequence(kline.open_time),
            Self::Ticker(ticker) => EventIdentity::Symbol(ticker.symbol.clone()),
        }
    }

    /// Absolute UTC epoch milliseconds used for windowing.
    pub fn event_time_ms(&self) -> i64 {
        match self {
            Self::AggTrade(trade) => trade.trade_time,
            Self::Kline(kline) => kline.open_time,
            Self::Ticker(ticker) => ticker.event_time,
        }
    }

    /// Display row; `offset` only shifts rendered timestamps.
    pub fn row(&self, offset: FixedOffset) -> Vec<Cell> {
        match self {
            Self::AggTrade(trade) => vec![
                display_time(trade.trade_time, offset),
                Cell::from(trade.price),
                Cell::from(trade.quantity),
                Cell::from(trade.aggregate_trade_id),
                Cell::from(trade.first_trade_id),
                Cell::from(trade.last_trade_id),
                Cell::from(trade.is_buyer_maker),
                trade.is_best_match.map(Cell::from).unwrap_or(Cell::Empty),
            ],
            Self::Kline(kline) => vec![
                display_time(kline.open_time, offset),
                Cell::from(kline.open),
                Cell::from(kline.high),
                Cell::from(kline.low),
                Cell::from(kline.close),
                Cell::from(kline.volume),
                display_time(kline.close_time, offset),
                Cell::from(kline.quote_volume),
                Cell::from(kline.trade_count),
                Cell::from(kline.taker_buy_base_volume),
                Cell::from(kline.taker_buy_quote_volume),
            ],
            Self::Ticker(ticker) => vec![
                Cell::from(ticker.symbol.as_str()),
                display_time(ticker.event_time, offset),
                Cell::from(ticker.last_price),
                Cell::from(ticker.price_change),
                Cell::from(ticker.price_change_percent),
                Cell::from(ticker.high_price),
                Cell::from(ticker.low_price),
                Cell::from(ticker.base_volume),
                Cell::from(ticker.quote_volume),
                Cell::from(ticker.trade_count),
            ],
        }
    }
}

pub fn display_time(epoch_ms: i64, offset: FixedOffset) -> Cell {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|instant| Cell::DateTime(instant.with_timezone(&offset).naive_local()))
        .unwrap_or(Cell::Empty)
}

fn utc_text(epoch_ms: i64) -> Cell {
    DateTime::from_timestamp_millis(epoch_ms)
        .map(|instant| Cell::Text(instant.format("%Y-%m-%d %H:%M:%S").to_string()))
        .unwrap_or(Cell::Empty)
}

fn parse_decimal(name: &str, raw: &str) -> Result<f64, StreamError> {
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|error| StreamError::MalformedRecord(format!("{name}='{raw}': {error}")))?;
    if !value.is_finite() {
        return Err(StreamError::MalformedRecord(format!("{name} must be finite")));
    }
    Ok(value)
}

/// Quantities and volumes; a negative amount makes the whole record malformed.
fn parse_amount(name: &str, raw: &str) -> Result<f64, StreamError> {
    let value = parse_decimal(name, raw)?;
    if value < 0.0 {
        return Err(StreamError::MalformedRecord(format!("{name} must be non-negative")));
    }
    Ok(value)
}

fn decode<'de, T: Deserialize<'de>>(payload: &'de mut [u8]) -> Result<T, StreamError> {
    simd_json::serde::from_slice(payload)
        .map_err(|error| StreamError::MalformedRecord(error.to_string()))
}

fn expect_event_type(found: Option<&str>, expected: &str) -> Result<(), StreamError> {
    match found {
        Some(event_type) if event_type != expected => Err(StreamError::MalformedRecord(format!(
            "unexpected event type '{event_type}', expected '{expected}'"
        ))),
        _ => Ok(()),
    }
}

/// REST `aggTrades` rows and `@aggTrade` push events share these keys.
#[derive(Debug, Clone, Deserialize)]
pub struct AggTradeWire {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "a")]
    pub aggregate_trade_id: u64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "f")]
    pub first_trade_id: u64,
    #[serde(rename = "l")]
    pub last_trade_id: u64,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
    #[serde(rename = "M", default)]
    pub is_best_match: Option<bool>,
}

impl TryFrom<AggTradeWire> for AggTrade {
    type Error = StreamError;

    fn try_from(value: AggTradeWire) -> Result<Self, Self::Error> {
        expect_event_type(value.event_type.as_deref(), "aggTrade")?;

        let price = parse_decimal("price", &value.price)?;
        let quantity = parse_amount("quantity", &value.quantity)?;

        Ok(Self {
            aggregate_trade_id: value.aggregate_trade_id,
            price,
            quantity,
            first_trade_id: value.first_trade_id,
            last_trade_id: value.last_trade_id,
            trade_time: value.trade_time,
            is_buyer_maker: value.is_buyer_maker,
            is_best_match: value.is_best_match,
        })
    }
}

pub fn parse_agg_trade_payload(payload: &mut [u8]) -> Result<AggTrade, StreamError> {
    let wire: AggTradeWire = decode(payload)?;
    wire.try_into()
}

/// REST kline row: `[openTime, open, high, low, close, volume, closeTime,
/// quoteVolume, trades, takerBuyBase, takerBuyQuote, ignore]`.
#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct KlineWire(
    pub i64,
    pub String,
    pub String,
    pub String,
    pub String,
    pub String,
    pub i64,
    pub String,
    pub u64,
    pub String,
    pub String,
    pub String,
);

impl TryFrom<KlineWire> for Kline {
    type Error = StreamError;

    fn try_from(value: KlineWire) -> Result<Self, Self::Error> {
        Ok(Self {
            open_time: value.0,
            open: parse_decimal("open", &value.1)?,
            high: parse_decimal("high", &value.2)?,
            low: parse_decimal("low", &value.3)?,
            close: parse_decimal("close", &value.4)?,
            volume: parse_amount("volume", &value.5)?,
            close_time: value.6,
            quote_volume: parse_decimal("quoteVolume", &value.7)?,
            trade_count: value.8,
            taker_buy_base_volume: parse_decimal("takerBuyBase", &value.9)?,
            taker_buy_quote_volume: parse_decimal("takerBuyQuote", &value.10)?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineBodyWire {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "n")]
    pub trade_count: u64,
    #[serde(rename = "x", default)]
    pub closed: bool,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "V")]
    pub taker_buy_base_volume: String,
    #[serde(rename = "Q")]
    pub taker_buy_quote_volume: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineEventWire {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "k")]
    pub body: KlineBodyWire,
}

/// A push candle plus whether the exchange has settled it.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    pub kline: Kline,
    pub closed: bool,
}

impl TryFrom<KlineEventWire> for KlineUpdate {
    type Error = StreamError;

    fn try_from(value: KlineEventWire) -> Result<Self, Self::Error> {
        expect_event_type(value.event_type.as_deref(), "kline")?;
        let body = value.body;
        let kline = Kline {
            open_time: body.open_time,
            close_time: body.close_time,
            open: parse_decimal("open", &body.open)?,
            high: parse_decimal("high", &body.high)?,
            low: parse_decimal("low", &body.low)?,
            close: parse_decimal("close", &body.close)?,
            volume: parse_amount("volume", &body.volume)?,
            quote_volume: parse_decimal("quoteVolume", &body.quote_volume)?,
            trade_count: body.trade_count,
            taker_buy_base_volume: parse_decimal("takerBuyBase", &body.taker_buy_base_volume)?,
            taker_buy_quote_volume: parse_decimal("takerBuyQuote", &body.taker_buy_quote_volume)?,
        };
        Ok(Self {
            kline,
            closed: body.closed,
        })
    }
}

pub fn parse_kline_payload(payload: &mut [u8]) -> Result<KlineUpdate, StreamError> {
    let wire: KlineEventWire = decode(payload)?;
    wire.try_into()
}

/// One element of the REST `ticker/24hr` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerRestWire {
    pub symbol: String,
    pub price_change: String,
    pub price_change_percent: String,
    pub last_price: String,
    pub high_price: String,
    pub low_price: String,
    pub volume: String,
    pub quote_volume: String,
    pub close_time: i64,
    pub count: u64,
}

impl TryFrom<TickerRestWire> for Ticker {
    type Error = StreamError;

    fn try_from(value: TickerRestWire) -> Result<Self, Self::Error> {
        Ok(Self {
            last_price: parse_decimal("lastPrice", &value.last_price)?,
            price_change: parse_decimal("priceChange", &value.price_change)?,
            price_change_percent: parse_decimal("priceChangePercent", &value.price_change_percent)?,
            high_price: parse_decimal("highPrice", &value.high_price)?,
            low_price: parse_decimal("lowPrice", &value.low_price)?,
            base_volume: parse_decimal("volume", &value.volume)?,
            quote_volume: parse_decimal("quoteVolume", &value.quote_volume)?,
            event_time: value.close_time,
            trade_count: value.count,
            symbol: value.symbol,
        })
    }
}

/// `24hrTicker` push event, used by both `!ticker@arr` and `<sym>@ticker`.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPushWire {
    #[serde(rename = "e", default)]
    pub event_type: Option<String>,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub price_change: String,
    #[serde(rename = "P")]
    pub price_change_percent: String,
    #[serde(rename = "w")]
    pub weighted_average_price: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "Q")]
    pub last_quantity: String,
    #[serde(rename = "o")]
    pub open_price: String,
    #[serde(rename = "h")]
    pub high_price: String,
    #[serde(rename = "l")]
    pub low_price: String,
    #[serde(rename = "v")]
    pub base_volume: String,
    #[serde(rename = "q")]
    pub quote_volume: String,
    #[serde(rename = "O")]
    pub statistics_open_time: i64,
    #[serde(rename = "C")]
    pub statistics_close_time: i64,
    #[serde(rename = "F")]
    pub first_trade_id: i64,
    #[serde(rename = "L")]
    pub last_trade_id: i64,
    #[serde(rename = "n")]
    pub trade_count: u64,
}

impl TickerPushWire {
    /// Single-field presentation: timestamps as UTC text, ids and counts as
    /// integers, unparsable decimals as empty cells.
    pub fn field_value(&self, field: TickerField) -> Cell {
        let decimal = |raw: &str| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Cell::Number)
                .unwrap_or(Cell::Empty)
        };

        match field {
            TickerField::EventTime => utc_text(self.event_time),
            TickerField::StatisticsOpenTime => utc_text(self.statistics_open_time),
            TickerField::StatisticsCloseTime => utc_text(self.statistics_close_time),
            TickerField::Symbol => Cell::from(self.symbol.as_str()),
            TickerField::FirstTradeId => Cell::from(self.first_trade_id),
            TickerField::LastTradeId => Cell::from(self.last_trade_id),
            TickerField::TradeCount => Cell::from(self.trade_count),
            TickerField::PriceChange => decimal(&self.price_change),
            TickerField::PriceChangePercent => decimal(&self.price_change_percent),
            TickerField::WeightedAveragePrice => decimal(&self.weighted_average_price),
            TickerField::LastPrice => decimal(&self.last_price),
            TickerField::LastQuantity => decimal(&self.last_quantity),
            TickerField::OpenPrice => decimal(&self.open_price),
            TickerField::HighPrice => decimal(&self.high_price),
            TickerField::LowPrice => decimal(&self.low_price),
            TickerField::BaseVolume => decimal(&self.base_volume),
            TickerField::QuoteVolume => decimal(&self.quote_volume),
        }
    }
}

impl TryFrom<TickerPushWire> for Ticker {
    type Error = StreamError;

    fn try_from(value: TickerPushWire) -> Result<Self, Self::Error> {
        expect_event_type(value.event_type.as_deref(), "24hrTicker")?;
        Ok(Self {
            last_price: parse_decimal("c", &value.last_price)?,
            price_change: parse_decimal("p", &value.price_change)?,
            price_change_percent: parse_decimal("P", &value.price_change_percent)?,
            high_price: parse_decimal("h", &value.high_price)?,
            low_price: parse_decimal("l", &value.low_price)?,
            base_volume: parse_decimal("v", &value.base_volume)?,
            quote_volume: parse_decimal("q", &value.quote_volume)?,
            event_time: value.event_time,
            trade_count: value.trade_count,
            symbol: value.symbol,
        })
    }
}

/// Decodes a `!ticker@arr` frame. One bad element rejects the whole frame.
pub fn parse_ticker_array_payload(payload: &mut [u8]) -> Result<Vec<Ticker>, StreamError> {
    let wire: Vec<TickerPushWire> = decode(payload)?;
    wire.into_iter().map(Ticker::try_from).collect()
}

pub fn parse_ticker_payload(payload: &mut [u8]) -> Result<TickerPushWire, StreamError> {
    let wire: TickerPushWire = decode(payload)?;
    expect_event_type(wire.event_type.as_deref(), "24hrTicker")?;
    Ok(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::types::DEFAULT_DISPLAY_OFFSET_MINUTES;
    use chrono::NaiveDate;

    fn ist() -> FixedOffset {
        FixedOffset::east_opt(DEFAULT_DISPLAY_OFFSET_MINUTES * 60).expect("valid offset")
    }

    const TICKER_EVENT: &str = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"-12.50","P":"-0.03","w":"37000.1","x":"37010.0","c":"36997.5","Q":"0.010","b":"36997.4","B":"1.2","a":"36997.6","A":"0.4","o":"37010.0","h":"37200.0","l":"36800.0","v":"1234.5","q":"45678901.2","O":1699913600000,"C":1700000000000,"F":100,"L":250,"n":151}"#;

    #[test]
    fn parses_push_agg_trade() {
        let mut payload =
            br#"{"e":"aggTrade","E":123456790,"s":"BTCUSDT","a":55,"p":"1000.5","q":"0.25","f":100,"l":105,"T":123456789,"m":false,"M":true}"#
                .to_vec();
        let trade = parse_agg_trade_payload(&mut payload).expect("aggTrade payload should parse");

        assert_eq!(trade.aggregate_trade_id, 55);
        assert_eq!(trade.price, 1000.5);
        assert_eq!(trade.first_trade_id, 100);
        assert_eq!(trade.is_best_match, Some(true));
        assert_eq!(
            CanonicalEvent::AggTrade(trade).identity(),
            EventIdentity::Sequence(55)
        );
    }

    #[test]
    fn rest_and_push_agg_trades_normalize_identically() {
        let mut rest =
            br#"{"a":7,"p":"10.0","q":"2.0","f":1,"l":3,"T":1000,"m":true,"M":true}"#.to_vec();
        let mut push =
            br#"{"e":"aggTrade","E":1001,"s":"ETHUSDT","a":7,"p":"10.0","q":"2.0","f":1,"l":3,"T":1000,"m":true,"M":true}"#
                .to_vec();

        let from_rest = parse_agg_trade_payload(&mut rest).expect("rest shape");
        let from_push = parse_agg_trade_payload(&mut push).expect("push shape");
        assert_eq!(from_rest, from_push);
    }

    #[test]
    fn rejects_agg_trade_with_missing_key() {
        let mut payload = br#"{"e":"aggTrade","a":55,"q":"0.25","f":1,"l":1,"T":1,"m":false}"#.to_vec();
        let error = parse_agg_trade_payload(&mut payload).expect_err("price is missing");
        assert!(error.is_malformed());
    }

    #[test]
    fn rejects_agg_trade_with_broken_price() {
        let mut payload =
            br#"{"a":55,"p":"broken","q":"0.25","f":1,"l":1,"T":1,"m":false}"#.to_vec();
        let error = parse_agg_trade_payload(&mut payload).expect_err("price is not numeric");
        assert!(matches!(error, StreamError::MalformedRecord(_)));
    }

    #[test]
    fn rest_kline_row_converts() {
        let wire = KlineWire(
            1_700_000_000_000,
            "100.0".to_string(),
            "110.0".to_string(),
            "95.0".to_string(),
            "105.0".to_string(),
            "12.5".to_string(),
            1_700_000_059_999,
            "1300.0".to_string(),
            42,
            "6.0".to_string(),
            "630.0".to_string(),
            "0".to_string(),
        );
        let kline = Kline::try_from(wire).expect("valid row");
        assert_eq!(kline.open_time, 1_700_000_000_000);
        assert_eq!(kline.high, 110.0);
        assert_eq!(kline.trade_count, 42);
        assert_eq!(kline.taker_buy_quote_volume, 630.0);
    }

    #[test]
    fn push_kline_reports_closed_flag() {
        let mut payload = br#"{"e":"kline","E":1700000060001,"s":"BTCUSDT","k":{"t":1700000000000,"T":1700000059999,"s":"BTCUSDT","i":"1m","f":1,"L":9,"o":"100.0","c":"101.0","h":"102.0","l":"99.0","v":"3.0","n":9,"x":true,"q":"300.0","V":"1.5","Q":"150.0","B":"0"}}"#.to_vec();
        let update = parse_kline_payload(&mut payload).expect("kline payload should parse");

        assert!(update.closed);
        assert_eq!(update.kline.open_time, 1_700_000_000_000);
        assert_eq!(update.kline.close, 101.0);
        assert_eq!(update.kline.taker_buy_base_volume, 1.5);
    }

    #[test]
    fn negative_amounts_are_malformed_for_every_kind() {
        let mut trade =
            br#"{"a":55,"p":"100.0","q":"-0.25","f":1,"l":1,"T":1,"m":false}"#.to_vec();
        let error = parse_agg_trade_payload(&mut trade).expect_err("negative quantity");
        assert!(error.is_malformed());

        let mut candle = br#"{"e":"kline","k":{"t":0,"T":59999,"o":"1","c":"1","h":"1","l":"1","v":"-3.0","n":1,"x":false,"q":"1","V":"1","Q":"1"}}"#.to_vec();
        let error = parse_kline_payload(&mut candle).expect_err("negative volume");
        assert!(error.is_malformed());
    }

    #[test]
    fn push_frame_without_candle_is_malformed() {
        let mut payload = br#"{"result":null,"id":1}"#.to_vec();
        let error = parse_kline_payload(&mut payload).expect_err("no k body");
        assert!(error.is_malformed());
    }

    #[test]
    fn ticker_array_uses_symbol_identity() {
        let mut payload = format!("[{TICKER_EVENT}]").into_bytes();
        let tickers = parse_ticker_array_payload(&mut payload).expect("array should parse");

        assert_eq!(tickers.len(), 1);
        let event = CanonicalEvent::Ticker(tickers[0].clone());
        assert_eq!(event.identity(), EventIdentity::Symbol("BTCUSDT".to_string()));
        assert_eq!(tickers[0].trade_count, 151);
        assert_eq!(tickers[0].last_price, 36997.5);
    }

    #[test]
    fn field_values_follow_key_types() {
        let mut payload = TICKER_EVENT.as_bytes().to_vec();
        let ticker = parse_ticker_payload(&mut payload).expect("ticker should parse");

        assert_eq!(
            ticker.field_value(TickerField::EventTime),
            Cell::from("2023-11-14 22:13:20")
        );
        assert_eq!(ticker.field_value(TickerField::HighPrice), Cell::Number(37200.0));
        assert_eq!(ticker.field_value(TickerField::TradeCount), Cell::Integer(151));
        assert_eq!(ticker.field_value(TickerField::FirstTradeId), Cell::Integer(100));
        assert_eq!(ticker.field_value(TickerField::Symbol), Cell::from("BTCUSDT"));
    }

    #[test]
    fn rows_render_time_in_display_offset() {
        let event = CanonicalEvent::AggTrade(AggTrade {
            aggregate_trade_id: 1,
            price: 1.0,
            quantity: 2.0,
            first_trade_id: 1,
            last_trade_id: 1,
            trade_time: 0,
            is_buyer_maker: false,
            is_best_match: None,
        });
        let row = event.row(ist());
        let expected = NaiveDate::from_ymd_opt(1970, 1, 1)
            .and_then(|date| date.and_hms_opt(5, 30, 0))
            .expect("valid date");

        assert_eq!(row.len(), AGG_TRADE_HEADER.len());
        assert_eq!(row[0], Cell::DateTime(expected));
        assert_eq!(row[7], Cell::Empty);
        assert_eq!(event.event_time_ms(), 0);
    }
}
