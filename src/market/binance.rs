use crate::error::StreamError;
use crate::market::records::{AggTradeWire, KlineWire, TickerRestWire};
use crate::market::types::{CandleInterval, EngineSettings};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};

pub const BINANCE_MAX_KLINES_PER_REQUEST: usize = 1_000;

pub type BinanceWsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Historical candle request; `start_time`/`end_time` are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    pub symbol: String,
    pub interval: CandleInterval,
    pub limit: u16,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl KlineQuery {
    pub fn latest(symbol: &str, interval: CandleInterval, limit: u16) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            limit,
            start_time: None,
            end_time: None,
        }
    }
}

/// What a push connection yields. Pings and pongs only prove the link is alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    Payload(Vec<u8>),
    Heartbeat,
    Closed,
}

#[async_trait]
pub trait FeedConnection: Send {
    async fn next_frame(&mut self) -> Result<FeedFrame, StreamError>;

    async fn ping(&mut self) -> Result<(), StreamError>;

    /// Best-effort close; errors are irrelevant once we are leaving.
    async fn close(&mut self);
}

/// Upstream exchange as seen by the engine: paged history plus push topics.
#[async_trait]
pub trait MarketGateway: Send + Sync {
    async fn fetch_agg_trades(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: u16,
    ) -> Result<Vec<AggTradeWire>, StreamError>;

    async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<KlineWire>, StreamError>;

    async fn fetch_tickers(&self) -> Result<Vec<TickerRestWire>, StreamError>;

    async fn open_feed(&self, topic: &str) -> Result<Box<dyn FeedConnection>, StreamError>;
}

fn ws_endpoint(ws_base_url: &str, topic: &str) -> String {
    format!("{}/{topic}", ws_base_url.trim_end_matches('/'))
}

fn agg_trades_endpoint(
    rest_base_url: &str,
    symbol: &str,
    from_id: Option<u64>,
    limit: u16,
) -> String {
    let mut endpoint = format!("{rest_base_url}/api/v3/aggTrades")
        + &format!("?symbol={}&limit={limit}", symbol.to_ascii_uppercase());
    if let Some(value) = from_id {
        endpoint.push_str(&format!("&fromId={value}"));
    }
    endpoint
}

fn klines_endpoint(rest_base_url: &str, query: &KlineQuery) -> String {
    let mut endpoint = format!("{rest_base_url}/api/v3/klines")
        + &format!(
            "?symbol={}&interval={}&limit={}",
            query.symbol.to_ascii_uppercase(),
            query.interval.as_str(),
            query.limit
        );
    if let Some(value) = query.start_time {
        endpoint.push_str(&format!("&startTime={value}"));
    }
    if let Some(value) = query.end_time {
        endpoint.push_str(&format!("&endTime={value}"));
    }
    endpoint
}

fn tickers_endpoint(rest_base_url: &str) -> String {
    format!("{rest_base_url}/api/v3/ticker/24hr")
}

#[derive(Debug, Clone)]
pub struct BinanceGateway {
    client: Client,
    rest_base_url: String,
    ws_base_url: String,
}

impl BinanceGateway {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            client: Client::new(),
            rest_base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            ws_base_url: settings.ws_base_url.clone(),
        }
    }
}

#[async_trait]
impl MarketGateway for BinanceGateway {
    async fn fetch_agg_trades(
        &self,
        symbol: &str,
        from_id: Option<u64>,
        limit: u16,
    ) -> Result<Vec<AggTradeWire>, StreamError> {
        let endpoint = agg_trades_endpoint(&self.rest_base_url, symbol, from_id, limit);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<AggTradeWire>>().await?;
        Ok(payload)
    }

    async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<KlineWire>, StreamError> {
        let endpoint = klines_endpoint(&self.rest_base_url, query);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<KlineWire>>().await?;
        Ok(payload)
    }

    async fn fetch_tickers(&self) -> Result<Vec<TickerRestWire>, StreamError> {
        let endpoint = tickers_endpoint(&self.rest_base_url);
        let response = self.client.get(endpoint).send().await?.error_for_status()?;
        let payload = response.json::<Vec<TickerRestWire>>().await?;
        Ok(payload)
    }

    async fn open_feed(&self, topic: &str) -> Result<Box<dyn FeedConnection>, StreamError> {
        let ws_config = WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            ..Default::default()
        };

        let request = ws_endpoint(&self.ws_base_url, topic);
        let (stream, _) = connect_async_with_config(request, Some(ws_config), true)
            .await
            .map_err(|error| StreamError::ConnectionFailed(error.to_string()))?;
        Ok(Box::new(WsFeed { stream }))
    }
}

struct WsFeed {
    stream: BinanceWsStream,
}

#[async_trait]
impl FeedConnection for WsFeed {
    async fn next_frame(&mut self) -> Result<FeedFrame, StreamError> {
        loop {
            let Some(frame_result) = self.stream.next().await else {
                return Ok(FeedFrame::Closed);
            };

            let message =
                frame_result.map_err(|error| StreamError::ConnectionFailed(error.to_string()))?;
            return Ok(match message {
                Message::Text(text_payload) => FeedFrame::Payload(text_payload.into_bytes()),
                Message::Binary(binary_payload) => FeedFrame::Payload(binary_payload),
                Message::Ping(_) | Message::Pong(_) => FeedFrame::Heartbeat,
                Message::Close(_) => FeedFrame::Closed,
                Message::Frame(_) => continue,
            });
        }
    }

    async fn ping(&mut self) -> Result<(), StreamError> {
        self.stream.send(Message::Ping(Vec::new())).await?;
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
