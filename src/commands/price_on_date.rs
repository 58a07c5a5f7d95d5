use crate::error::StreamError;
use crate::market::binance::{KlineQuery, MarketGateway};
use crate::market::records::Kline;
use crate::market::types::{CandleInterval, Cell};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

pub const NO_DATA: &str = "No data";
pub const INVALID_PRICE_TYPE: &str = "Invalid price_type";

/// Numbers at or above this are epoch milliseconds rather than spreadsheet serials.
const EPOCH_MS_THRESHOLD: f64 = 100_000_000_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl PriceType {
    pub fn parse_str(value: &str) -> Result<Self, StreamError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "close" => Ok(Self::Close),
            "volume" => Ok(Self::Volume),
            _ => Err(StreamError::InvalidConfiguration(
                INVALID_PRICE_TYPE.to_string(),
            )),
        }
    }

    fn pick(self, kline: &Kline) -> f64 {
        match self {
            Self::Open => kline.open,
            Self::High => kline.high,
            Self::Low => kline.low,
            Self::Close => kline.close,
            Self::Volume => kline.volume,
        }
    }
}

/// A date as a spreadsheet cell may hold it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum DateInput {
    Number(f64),
    Text(String),
}

impl DateInput {
    /// Start of the requested instant as UTC epoch milliseconds.
    pub fn to_epoch_ms(&self) -> Result<i64, StreamError> {
        match self {
            Self::Number(value) if !value.is_finite() => Err(invalid_date(&value.to_string())),
            Self::Number(value) if value.abs() >= EPOCH_MS_THRESHOLD => Ok(value.round() as i64),
            Self::Number(serial) => excel_serial_to_ms(*serial),
            Self::Text(raw) => parse_date_text(raw.trim()),
        }
    }
}

fn invalid_date(raw: &str) -> StreamError {
    StreamError::InvalidConfiguration(format!("unsupported date '{raw}'"))
}

fn excel_serial_to_ms(serial: f64) -> Result<i64, StreamError> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .map(|date| date.and_time(NaiveTime::MIN))
        .ok_or_else(|| invalid_date(&serial.to_string()))?;
    let offset = Duration::milliseconds((serial * 86_400_000.0).round() as i64);
    Ok((epoch + offset).and_utc().timestamp_millis())
}

fn parse_date_text(raw: &str) -> Result<i64, StreamError> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.timestamp_millis());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Ok(date.and_time(NaiveTime::MIN).and_utc().timestamp_millis());
        }
    }

    if let Ok(serial) = raw.parse::<f64>() {
        return DateInput::Number(serial).to_epoch_ms();
    }

    Err(invalid_date(raw))
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceOnDateArgs {
    pub symbol: String,
    pub date: DateInput,
    pub interval: Option<String>,
    pub price_type: Option<String>,
}

/// One candle starting at `date`; returns the chosen price, or `"No data"` when the
/// exchange has no candle there.
pub async fn price_on_date(
    gateway: &dyn MarketGateway,
    args: PriceOnDateArgs,
) -> Result<Cell, StreamError> {
    let symbol = args.symbol.trim().to_ascii_uppercase();
    if symbol.is_empty() {
        return Err(StreamError::InvalidConfiguration(
            "symbol must not be empty".to_string(),
        ));
    }
    let interval = CandleInterval::parse_str(args.interval.as_deref().unwrap_or("1d"))?;
    let price_type = PriceType::parse_str(args.price_type.as_deref().unwrap_or("close"))?;
    let start_time = args.date.to_epoch_ms()?;

    let query = KlineQuery {
        start_time: Some(start_time),
        end_time: Some(start_time.saturating_add(interval.duration_ms())),
        ..KlineQuery::latest(&symbol, interval, 1)
    };
    let Some(wire) = gateway.fetch_klines(&query).await?.into_iter().next() else {
        return Ok(Cell::from(NO_DATA));
    };

    let kline = Kline::try_from(wire)?;
    Ok(Cell::Number(price_type.pick(&kline)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excel_serial_maps_to_utc_midnight() {
        // 45292 is 2024-01-01.
        let millis = DateInput::Number(45_292.0)
            .to_epoch_ms()
            .expect("serial should parse");
        assert_eq!(millis, 1_704_067_200_000);
    }

    #[test]
    fn fractional_serial_keeps_time_of_day() {
        let millis = DateInput::Number(45_292.5)
            .to_epoch_ms()
            .expect("serial should parse");
        assert_eq!(millis, 1_704_067_200_000 + 43_200_000);
    }

    #[test]
    fn large_numbers_are_epoch_millis() {
        let millis = DateInput::Number(1_704_067_200_000.0)
            .to_epoch_ms()
            .expect("epoch should pass through");
        assert_eq!(millis, 1_704_067_200_000);
    }

    #[test]
    fn text_dates_in_common_formats() {
        let expected = 1_704_067_200_000;
        for raw in [
            "2024-01-01",
            "01/01/2024",
            "2024-01-01 00:00",
            "2024-01-01 00:00:00",
            "2024-01-01T05:30:00+05:30",
        ] {
            let millis = DateInput::Text(raw.to_string())
                .to_epoch_ms()
                .expect("date should parse");
            assert_eq!(millis, expected, "{raw}");
        }
    }

    #[test]
    fn rejects_garbage_dates() {
        let error = DateInput::Text("next tuesday".to_string())
            .to_epoch_ms()
            .expect_err("not a date");
        assert!(error.is_terminal());
    }

    #[test]
    fn price_type_is_case_insensitive_and_closed() {
        assert_eq!(PriceType::parse_str("HIGH").ok(), Some(PriceType::High));
        let error = PriceType::parse_str("median").expect_err("unknown price type");
        assert_eq!(error.to_string(), INVALID_PRICE_TYPE);
    }
}
