pub mod backfill;
pub mod binance;
pub mod merge;
pub mod pipeline;
pub mod records;
pub mod throttle;
pub mod types;
pub mod window;
