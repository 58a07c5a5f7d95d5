pub mod commands;
pub mod error;
pub mod market;
pub mod state;

pub use commands::price_on_date::{price_on_date, DateInput, PriceOnDateArgs, PriceType};
pub use commands::stream::{shutdown, stream_status, subscribe, unsubscribe, Subscription};
pub use error::StreamError;
pub use market::binance::{BinanceGateway, FeedConnection, FeedFrame, KlineQuery, MarketGateway};
pub use market::types::{
    CandleInterval, Cell, EngineSettings, Snapshot, StreamKind, StreamStatus, StreamValue,
    SubscribeArgs, SubscriptionKey, SubscriptionStatus, SupervisorPhase, TickerField,
};
pub use state::EngineState;
