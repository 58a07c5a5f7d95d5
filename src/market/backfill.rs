use crate::error::StreamError;
use crate::market::binance::{KlineQuery, MarketGateway, BINANCE_MAX_KLINES_PER_REQUEST};
use crate::market::records::{AggTrade, CanonicalEvent, Kline, Ticker};
use crate::market::types::CandleInterval;
use tracing::debug;

/// Pages overshoot the requested span slightly so the time filter has margin.
const SPAN_COVERAGE_FACTOR: f64 = 1.05;

/// Walks aggregate trades backward from the newest page until `minutes` is covered,
/// an empty page comes back, or `max_loops` pages were fetched. Output is oldest page
/// first; overlapping pages may repeat identities.
pub async fn backfill_agg_trades(
    gateway: &dyn MarketGateway,
    symbol: &str,
    minutes: f64,
    max_loops: u32,
    page_size: u16,
) -> Result<Vec<CanonicalEvent>, StreamError> {
    let target_span_ms = minutes * 60_000.0 * SPAN_COVERAGE_FACTOR;
    let mut trades: Vec<AggTrade> = Vec::new();
    let mut from_id: Option<u64> = None;

    for page_index in 0..max_loops {
        let page = gateway
            .fetch_agg_trades(symbol, from_id, page_size)
            .await
            .map_err(StreamError::into_backfill)?;
        let Some(first_id) = page.first().map(|wire| wire.aggregate_trade_id) else {
            debug!(symbol, page_index, "aggTrade backfill reached an empty page");
            break;
        };

        let mut normalized = page
            .into_iter()
            .map(AggTrade::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StreamError::into_backfill)?;
        normalized.append(&mut trades);
        trades = normalized;

        let span_ms = covered_span_ms(&trades);
        if span_ms as f64 >= target_span_ms || first_id == 0 {
            break;
        }
        from_id = Some(first_id.saturating_sub(u64::from(page_size)));
    }

    debug!(symbol, trades = trades.len(), "aggTrade backfill finished");
    Ok(trades.into_iter().map(CanonicalEvent::AggTrade).collect())
}

fn covered_span_ms(trades: &[AggTrade]) -> i64 {
    let mut times = trades.iter().map(|trade| trade.trade_time);
    let Some(first) = times.next() else {
        return 0;
    };
    let (oldest, newest) = times.fold((first, first), |(low, high), time| {
        (low.min(time), high.max(time))
    });
    newest - oldest
}

/// Most recent `limit` candles, paging backward with `endTime` past the per-request cap.
pub async fn backfill_klines(
    gateway: &dyn MarketGateway,
    symbol: &str,
    interval: CandleInterval,
    limit: usize,
) -> Result<Vec<CanonicalEvent>, StreamError> {
    let mut remaining = limit;
    let mut end_time: Option<i64> = None;
    let mut wires = Vec::with_capacity(limit);

    while remaining > 0 {
        let request_limit = remaining.min(BINANCE_MAX_KLINES_PER_REQUEST) as u16;
        let query = KlineQuery {
            end_time,
            ..KlineQuery::latest(symbol, interval, request_limit)
        };
        let mut page = gateway.fetch_klines(&query).await?;
        if page.is_empty() {
            break;
        }

        let oldest_open_time = page.first().map(|wire| wire.0).unwrap_or_default();
        let page_len = page.len();
        remaining = remaining.saturating_sub(page_len);
        wires.append(&mut page);

        // A short page means the exchange has no older candles.
        if page_len < usize::from(request_limit) || oldest_open_time <= 0 {
            break;
        }
        end_time = Some(oldest_open_time - 1);
    }

    wires.sort_unstable_by_key(|wire| wire.0);
    wires.dedup_by_key(|wire| wire.0);
    if wires.len() > limit {
        let overflow = wires.len() - limit;
        wires.drain(0..overflow);
    }

    wires
        .into_iter()
        .map(|wire| Kline::try_from(wire).map(CanonicalEvent::Kline))
        .collect()
}

pub async fn backfill_tickers(
    gateway: &dyn MarketGateway,
) -> Result<Vec<CanonicalEvent>, StreamError> {
    gateway
        .fetch_tickers()
        .await?
        .into_iter()
        .map(|wire| Ticker::try_from(wire).map(CanonicalEvent::Ticker))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::binance::FeedConnection;
    use crate::market::records::{AggTradeWire, KlineWire, TickerRestWire};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Serves aggregate trades `0..=newest_id`, one per `spacing_ms`.
    struct PagedTrades {
        newest_id: u64,
        spacing_ms: i64,
        fail_on_call: Option<usize>,
        cursors: Mutex<Vec<Option<u64>>>,
        kline_queries: Mutex<Vec<KlineQuery>>,
        kline_open_times: Vec<i64>,
    }

    impl PagedTrades {
        fn new(newest_id: u64, spacing_ms: i64) -> Self {
            Self {
                newest_id,
                spacing_ms,
                fail_on_call: None,
                cursors: Mutex::new(Vec::new()),
                kline_queries: Mutex::new(Vec::new()),
                kline_open_times: Vec::new(),
            }
        }

        fn wire(&self, id: u64) -> AggTradeWire {
            AggTradeWire {
                event_type: None,
                aggregate_trade_id: id,
                price: "100.0".to_string(),
                quantity: "1.0".to_string(),
                first_trade_id: id,
                last_trade_id: id,
                trade_time: id as i64 * self.spacing_ms,
                is_buyer_maker: false,
                is_best_match: Some(true),
            }
        }
    }

    fn kline_wire(open_time: i64) -> KlineWire {
        KlineWire(
            open_time,
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            "1".to_string(),
            open_time + 59_999,
            "1".to_string(),
            1,
            "1".to_string(),
            "1".to_string(),
            "0".to_string(),
        )
    }

    #[async_trait]
    impl MarketGateway for PagedTrades {
        async fn fetch_agg_trades(
            &self,
            _symbol: &str,
            from_id: Option<u64>,
            limit: u16,
        ) -> Result<Vec<AggTradeWire>, StreamError> {
            let call_index = {
                let mut cursors = self.cursors.lock();
                cursors.push(from_id);
                cursors.len() - 1
            };
            if self.fail_on_call == Some(call_index) {
                return Err(StreamError::ConnectionFailed("HTTP 503".to_string()));
            }

            let limit = u64::from(limit);
            let start = from_id.unwrap_or_else(|| (self.newest_id + 1).saturating_sub(limit));
            let end = (start + limit).min(self.newest_id + 1);
            Ok((start..end).map(|id| self.wire(id)).collect())
        }

        async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<KlineWire>, StreamError> {
            self.kline_queries.lock().push(query.clone());
            let eligible: Vec<i64> = self
                .kline_open_times
                .iter()
                .copied()
                .filter(|open_time| query.end_time.map_or(true, |end| *open_time <= end))
                .collect();
            let skip = eligible.len().saturating_sub(usize::from(query.limit));
            Ok(eligible[skip..].iter().map(|time| kline_wire(*time)).collect())
        }

        async fn fetch_tickers(&self) -> Result<Vec<TickerRestWire>, StreamError> {
            Ok(Vec::new())
        }

        async fn open_feed(&self, _topic: &str) -> Result<Box<dyn FeedConnection>, StreamError> {
            Err(StreamError::ConnectionFailed("not scripted".to_string()))
        }
    }

    fn ids(events: &[CanonicalEvent]) -> Vec<i64> {
        events
            .iter()
            .filter_map(|event| event.identity().as_sequence())
            .collect()
    }

    #[tokio::test]
    async fn stops_once_span_is_covered() {
        // 10 trades per page, one trade per second; a page spans 9 s.
        let gateway = PagedTrades::new(99, 1_000);
        let events = backfill_agg_trades(&gateway, "BTCUSDT", 0.25, 100, 10)
            .await
            .expect("backfill should succeed");

        // 0.25 min * 1.05 = 15.75 s needs two pages.
        assert_eq!(gateway.cursors.lock().clone(), vec![None, Some(80)]);
        assert_eq!(ids(&events), (80..=99).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn respects_loop_budget() {
        let gateway = PagedTrades::new(999, 60_000);
        let events = backfill_agg_trades(&gateway, "BTCUSDT", 1_000.0, 3, 10)
            .await
            .expect("backfill should succeed");

        assert_eq!(gateway.cursors.lock().len(), 3);
        assert_eq!(events.len(), 30);
    }

    #[tokio::test]
    async fn stops_at_the_first_trade_ever() {
        let gateway = PagedTrades::new(14, 1);
        let events = backfill_agg_trades(&gateway, "BTCUSDT", 60.0, 100, 10)
            .await
            .expect("backfill should succeed");

        // Second page starts at id 0 and overlaps the first; duplicates are tolerated.
        assert_eq!(gateway.cursors.lock().clone(), vec![None, Some(0)]);
        assert_eq!(events.len(), 20);
        assert_eq!(ids(&events).first(), Some(&0));
    }

    #[tokio::test]
    async fn page_failure_discards_partial_progress() {
        let mut gateway = PagedTrades::new(999, 1);
        gateway.fail_on_call = Some(1);
        let error = backfill_agg_trades(&gateway, "BTCUSDT", 60.0, 100, 10)
            .await
            .expect_err("second page fails");

        assert!(matches!(error, StreamError::BackfillFailed(_)));
    }

    #[tokio::test]
    async fn kline_backfill_pages_past_request_cap() {
        let mut gateway = PagedTrades::new(0, 1);
        gateway.kline_open_times = (0..1_500).map(|index| index * 60_000).collect();

        let events = backfill_klines(&gateway, "BTCUSDT", CandleInterval::M1, 1_200)
            .await
            .expect("klines should load");

        let queries = gateway.kline_queries.lock().clone();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].limit, 1_000);
        assert_eq!(queries[1].limit, 200);
        assert_eq!(queries[1].end_time, Some(500 * 60_000 - 1));
        assert_eq!(events.len(), 1_200);
        assert_eq!(ids(&events).first(), Some(&(300 * 60_000)));
    }

    #[tokio::test]
    async fn short_kline_history_needs_one_request() {
        let mut gateway = PagedTrades::new(0, 1);
        gateway.kline_open_times = (1..=3).map(|index| index * 60_000).collect();

        let events = backfill_klines(&gateway, "BTCUSDT", CandleInterval::M1, 200)
            .await
            .expect("klines should load");

        assert_eq!(gateway.kline_queries.lock().len(), 1);
        assert_eq!(events.len(), 3);
    }
}
