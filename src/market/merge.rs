use crate::error::StreamError;
use crate::market::backfill::backfill_klines;
use crate::market::binance::MarketGateway;
use crate::market::records::CanonicalEvent;
use crate::market::types::{CandleInterval, IdentityMode};
use crate::market::window::WindowStore;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Append-mode record at or below the running maximum.
    Duplicate { identity: i64, last: i64 },
}

/// Applies live records to a [`WindowStore`] under the stream's identity rules.
///
/// The running maximum is kept here rather than read from the store, since the
/// store may already have evicted the newest identity it ever held.
#[derive(Debug)]
pub struct LiveMerge {
    identity: IdentityMode,
    last_identity: Option<i64>,
    duplicates_dropped: u64,
}

impl LiveMerge {
    pub fn new(identity: IdentityMode) -> Self {
        Self {
            identity,
            last_identity: None,
            duplicates_dropped: 0,
        }
    }

    /// Raises the running maximum to cover a backfilled batch.
    pub fn observe_batch(&mut self, events: &[CanonicalEvent]) {
        for event in events {
            self.observe(event.identity().as_sequence());
        }
    }

    fn observe(&mut self, sequence: Option<i64>) {
        if let Some(value) = sequence {
            self.last_identity = Some(self.last_identity.map_or(value, |last| last.max(value)));
        }
    }

    /// Upserts one record unless it is an append-mode replay. The caller applies the
    /// store bound after the message's records are merged.
    pub fn apply(&mut self, store: &mut WindowStore, event: CanonicalEvent) -> MergeOutcome {
        let sequence = event.identity().as_sequence();

        if self.identity == IdentityMode::Append {
            if let (Some(identity), Some(last)) = (sequence, self.last_identity) {
                if identity <= last {
                    self.duplicates_dropped += 1;
                    debug!(identity, last, "dropping replayed record");
                    return MergeOutcome::Duplicate { identity, last };
                }
            }
        }

        self.observe(sequence);
        store.upsert(event);
        MergeOutcome::Applied
    }

    pub fn last_identity(&self) -> Option<i64> {
        self.last_identity
    }

    pub fn duplicates_dropped(&self) -> u64 {
        self.duplicates_dropped
    }
}

/// Replaces provisional candles with the exchange's settled values after a close.
/// Runs to completion before the connection is read again.
pub async fn reconcile_klines(
    gateway: &dyn MarketGateway,
    store: &mut WindowStore,
    symbol: &str,
    interval: CandleInterval,
    limit: usize,
) -> Result<usize, StreamError> {
    let settled = backfill_klines(gateway, symbol, interval, limit)
        .await
        .map_err(StreamError::into_reconciliation)?;
    let refreshed = settled.len();

    store.upsert_all(settled);
    store.enforce_bound();
    info!(symbol, interval = interval.as_str(), refreshed, "candle close reconciled");
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::records::{AggTrade, Ticker};
    use crate::market::window::WindowBound;

    fn trade(id: u64) -> CanonicalEvent {
        CanonicalEvent::AggTrade(AggTrade {
            aggregate_trade_id: id,
            price: 1.0,
            quantity: 1.0,
            first_trade_id: id,
            last_trade_id: id,
            trade_time: id as i64,
            is_buyer_maker: true,
            is_best_match: None,
        })
    }

    fn ticker(symbol: &str, last_price: f64) -> CanonicalEvent {
        CanonicalEvent::Ticker(Ticker {
            symbol: symbol.to_string(),
            event_time: 1,
            last_price,
            price_change: 0.0,
            price_change_percent: 0.0,
            high_price: last_price,
            low_price: last_price,
            base_volume: 0.0,
            quote_volume: 0.0,
            trade_count: 0,
        })
    }

    #[test]
    fn append_mode_drops_replays_and_keeps_newer() {
        let mut store = WindowStore::new(WindowBound::default());
        let mut merge = LiveMerge::new(IdentityMode::Append);
        let backfill = vec![trade(100), trade(101), trade(102)];
        merge.observe_batch(&backfill);
        store.upsert_all(backfill);

        assert_eq!(
            merge.apply(&mut store, trade(99)),
            MergeOutcome::Duplicate {
                identity: 99,
                last: 102
            }
        );
        assert!(matches!(
            merge.apply(&mut store, trade(102)),
            MergeOutcome::Duplicate { .. }
        ));
        assert_eq!(merge.apply(&mut store, trade(103)), MergeOutcome::Applied);

        assert_eq!(store.len(), 4);
        assert_eq!(merge.last_identity(), Some(103));
        assert_eq!(merge.duplicates_dropped(), 2);
    }

    #[test]
    fn running_maximum_survives_eviction() {
        let bound = WindowBound {
            max_rows: Some(1),
            max_age_ms: None,
        };
        let mut store = WindowStore::new(bound);
        let mut merge = LiveMerge::new(IdentityMode::Append);

        merge.apply(&mut store, trade(10));
        merge.apply(&mut store, trade(11));
        store.enforce_bound();
        store = WindowStore::new(bound);

        assert!(matches!(
            merge.apply(&mut store, trade(11)),
            MergeOutcome::Duplicate { .. }
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn replace_mode_always_upserts() {
        let mut store = WindowStore::new(WindowBound::default());
        let mut merge = LiveMerge::new(IdentityMode::Replace);

        merge.apply(&mut store, ticker("ETHUSDT", 2_000.0));
        merge.apply(&mut store, ticker("BTCUSDT", 40_000.0));
        let outcome = merge.apply(&mut store, ticker("ETHUSDT", 2_001.0));

        assert_eq!(outcome, MergeOutcome::Applied);
        assert_eq!(store.len(), 2);
        assert_eq!(merge.duplicates_dropped(), 0);
    }
}
