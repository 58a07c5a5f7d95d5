use crate::error::StreamError;
use crate::market::backfill::{backfill_agg_trades, backfill_klines, backfill_tickers};
use crate::market::binance::{FeedConnection, FeedFrame, MarketGateway};
use crate::market::merge::{reconcile_klines, LiveMerge, MergeOutcome};
use crate::market::records::{
    parse_agg_trade_payload, parse_kline_payload, parse_ticker_array_payload,
    parse_ticker_payload, CanonicalEvent, AGG_TRADE_HEADER, KLINE_HEADER, TICKER_HEADER,
};
use crate::market::throttle::EmissionThrottle;
use crate::market::types::{
    EngineSettings, Snapshot, StreamConfig, StreamProfile, StreamSpec, StreamStatus,
    StreamValue, SubscriptionStatus, SupervisorPhase, TickerField,
};
use crate::market::window::WindowStore;
use chrono::FixedOffset;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How one streaming attempt ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleExit {
    Cancelled,
    ConsumerGone,
}

struct StreamRuntimeContext<'a> {
    gateway: &'a dyn MarketGateway,
    config: &'a StreamConfig,
    settings: &'a EngineSettings,
    sender: &'a mpsc::Sender<StreamValue>,
    status_store: &'a Arc<RwLock<SubscriptionStatus>>,
    cancel_token: &'a CancellationToken,
}

impl StreamRuntimeContext<'_> {
    /// Hands one value to the consumer unless the token fires first. `Some` means the
    /// producer must stop.
    async fn deliver(&self, value: StreamValue) -> Option<CycleExit> {
        tokio::select! {
            _ = self.cancel_token.cancelled() => Some(CycleExit::Cancelled),
            sent = self.sender.send(value) => sent.err().map(|_| CycleExit::ConsumerGone),
        }
    }
}

/// Producer task for one subscription. Runs until the token is cancelled, the
/// receiver is dropped, or a configuration error ends the subscription.
pub async fn run_market_stream(
    gateway: Arc<dyn MarketGateway>,
    config: StreamConfig,
    settings: EngineSettings,
    sender: mpsc::Sender<StreamValue>,
    status_store: Arc<RwLock<SubscriptionStatus>>,
    cancel_token: CancellationToken,
) {
    let context = StreamRuntimeContext {
        gateway: gateway.as_ref(),
        config: &config,
        settings: &settings,
        sender: &sender,
        status_store: &status_store,
        cancel_token: &cancel_token,
    };

    let result = match (&config.spec, config.profile()) {
        (StreamSpec::TickerField { field }, _) => run_field_stream(&context, *field).await,
        (_, Some(profile)) => TableEngine::new(&context, profile).run().await,
        (_, None) => Err(StreamError::InvalidConfiguration(format!(
            "{} has no table profile",
            config.kind().as_str()
        ))),
    };

    match result {
        Ok(exit) => {
            info!(key = %config.key(), ?exit, "market stream stopped");
            publish_status(
                &status_store,
                SupervisorPhase::Stopped,
                Some("stream stopped".to_string()),
            )
            .await;
        }
        Err(error) => {
            warn!(key = %config.key(), %error, "market stream rejected");
            let _ = context
                .deliver(StreamValue::Diagnostic(error.to_string()))
                .await;
            publish_status(&status_store, SupervisorPhase::Failed, Some(error.to_string())).await;
        }
    }
}

/// Snapshot engine for every table kind: backfill, stream, freeze, back off, repeat.
struct TableEngine<'a> {
    context: &'a StreamRuntimeContext<'a>,
    profile: StreamProfile,
    header: &'static [&'static str],
    offset: FixedOffset,
    last_snapshot: Option<Arc<Snapshot>>,
    frozen_sent: bool,
}

impl<'a> TableEngine<'a> {
    fn new(context: &'a StreamRuntimeContext<'a>, profile: StreamProfile) -> Self {
        let header = match context.config.spec {
            StreamSpec::AggTrade { .. } => AGG_TRADE_HEADER,
            StreamSpec::Kline { .. } => KLINE_HEADER,
            StreamSpec::AllTicker | StreamSpec::TickerField { .. } => TICKER_HEADER,
        };
        Self {
            context,
            profile,
            header,
            offset: context.settings.display_offset(),
            last_snapshot: None,
            frozen_sent: false,
        }
    }

    async fn run(&mut self) -> Result<CycleExit, StreamError> {
        let context = self.context;
        let key = context.config.key();
        let mut reconnect_attempt = 0_u32;

        while !context.cancel_token.is_cancelled() {
            let reason = if reconnect_attempt == 0 {
                "loading backfill".to_string()
            } else {
                format!("reconnect attempt {reconnect_attempt}")
            };
            publish_status(context.status_store, SupervisorPhase::Backfilling, Some(reason)).await;

            let error = match self.run_cycle().await {
                Ok(exit) => return Ok(exit),
                Err(error) if error.is_terminal() => return Err(error),
                Err(error) => error,
            };

            reconnect_attempt = reconnect_attempt.saturating_add(1);
            warn!(%key, %error, reconnect_attempt, "stream cycle failed, freezing");
            if let Some(exit) = self.emit_frozen().await {
                return Ok(exit);
            }
            {
                let mut writable = context.status_store.write().await;
                writable.phase = SupervisorPhase::Frozen;
                writable.reason = Some(error.to_string());
                writable.reconnect_attempts = reconnect_attempt;
            }

            tokio::select! {
                _ = context.cancel_token.cancelled() => break,
                _ = tokio::time::sleep(context.settings.reconnect_delay) => {}
            }
        }

        Ok(CycleExit::Cancelled)
    }

    async fn run_cycle(&mut self) -> Result<CycleExit, StreamError> {
        let context = self.context;
        let mut store = WindowStore::new(self.profile.bound);
        let mut merge = LiveMerge::new(self.profile.identity);
        let mut throttle = EmissionThrottle::new(self.profile.emit);

        let backfill = tokio::select! {
            _ = context.cancel_token.cancelled() => return Ok(CycleExit::Cancelled),
            batch = self.backfill() => batch.map_err(StreamError::into_backfill)?,
        };
        merge.observe_batch(&backfill);
        store.upsert_all(backfill);
        store.enforce_bound();
        info!(key = %context.config.key(), rows = store.len(), "backfill complete");

        throttle.allow(std::time::Instant::now());
        if let Some(exit) = self.emit(&store, &merge).await {
            return Ok(exit);
        }

        let topic = context.config.push_topic();
        let mut feed = tokio::select! {
            _ = context.cancel_token.cancelled() => return Ok(CycleExit::Cancelled),
            feed = context.gateway.open_feed(&topic) => feed?,
        };
        info!(%topic, "push feed connected");
        publish_status(
            context.status_store,
            SupervisorPhase::Streaming,
            Some("push feed connected".to_string()),
        )
        .await;

        let exit = self
            .stream_feed(feed.as_mut(), &mut store, &mut merge, &mut throttle)
            .await;
        feed.close().await;
        exit
    }

    async fn backfill(&self) -> Result<Vec<CanonicalEvent>, StreamError> {
        let context = self.context;
        let symbol = context.config.symbol.as_str();
        match &context.config.spec {
            StreamSpec::AggTrade {
                minutes, max_loops, ..
            } => {
                backfill_agg_trades(
                    context.gateway,
                    symbol,
                    *minutes,
                    *max_loops,
                    context.settings.agg_trade_page_size,
                )
                .await
            }
            StreamSpec::Kline { interval, limit } => {
                backfill_klines(context.gateway, symbol, *interval, *limit).await
            }
            StreamSpec::AllTicker => backfill_tickers(context.gateway).await,
            StreamSpec::TickerField { .. } => Ok(Vec::new()),
        }
    }

    async fn stream_feed(
        &mut self,
        feed: &mut dyn FeedConnection,
        store: &mut WindowStore,
        merge: &mut LiveMerge,
        throttle: &mut EmissionThrottle,
    ) -> Result<CycleExit, StreamError> {
        let context = self.context;
        let mut watchdog = FeedWatchdog::new(context.settings);

        loop {
            let Some(mut payload) = watchdog.next_payload(feed, context.cancel_token).await? else {
                return Ok(CycleExit::Cancelled);
            };

            match self.apply_payload(payload.as_mut_slice(), store, merge).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) if error.is_malformed() => {
                    debug!(%error, "dropping malformed push message");
                    continue;
                }
                Err(error) => return Err(error),
            }

            if throttle.allow(std::time::Instant::now()) {
                if let Some(exit) = self.emit(store, merge).await {
                    return Ok(exit);
                }
            }
        }
    }

    /// Returns whether the store changed.
    async fn apply_payload(
        &self,
        payload: &mut [u8],
        store: &mut WindowStore,
        merge: &mut LiveMerge,
    ) -> Result<bool, StreamError> {
        let context = self.context;
        match &context.config.spec {
            StreamSpec::AggTrade { .. } => {
                let trade = parse_agg_trade_payload(payload)?;
                if let MergeOutcome::Duplicate { .. } =
                    merge.apply(store, CanonicalEvent::AggTrade(trade))
                {
                    context.status_store.write().await.duplicates_dropped =
                        merge.duplicates_dropped();
                    return Ok(false);
                }
                store.enforce_bound();
            }
            StreamSpec::Kline { interval, limit } => {
                let update = parse_kline_payload(payload)?;
                merge.apply(store, CanonicalEvent::Kline(update.kline));
                store.enforce_bound();
                if update.closed && self.profile.reconcile_on_close {
                    reconcile_klines(
                        context.gateway,
                        store,
                        &context.config.symbol,
                        *interval,
                        *limit,
                    )
                    .await?;
                }
            }
            StreamSpec::AllTicker => {
                for ticker in parse_ticker_array_payload(payload)? {
                    merge.apply(store, CanonicalEvent::Ticker(ticker));
                }
                store.enforce_bound();
            }
            StreamSpec::TickerField { .. } => return Ok(false),
        }
        Ok(true)
    }

    /// Sends a fresh snapshot. `Some` means the producer must stop.
    async fn emit(&mut self, store: &WindowStore, merge: &LiveMerge) -> Option<CycleExit> {
        let mut snapshot = store.snapshot(self.header, self.offset);
        if self.profile.tracks_liveness {
            snapshot = snapshot.with_status(StreamStatus::Live);
        }
        let snapshot = Arc::new(snapshot);

        {
            let mut writable = self.context.status_store.write().await;
            writable.snapshots_emitted = writable.snapshots_emitted.saturating_add(1);
            writable.last_identity = merge.last_identity();
            writable.duplicates_dropped = merge.duplicates_dropped();
        }

        if let Some(exit) = self
            .context
            .deliver(StreamValue::Table(Arc::clone(&snapshot)))
            .await
        {
            return Some(exit);
        }

        self.last_snapshot = Some(snapshot);
        self.frozen_sent = false;
        None
    }

    /// Re-sends the last good table marked disconnected, once per outage.
    async fn emit_frozen(&mut self) -> Option<CycleExit> {
        if self.frozen_sent || !self.profile.tracks_liveness {
            return None;
        }
        let frozen = self.last_snapshot.as_ref().and_then(|snapshot| snapshot.frozen())?;

        if let Some(exit) = self
            .context
            .deliver(StreamValue::Table(Arc::new(frozen)))
            .await
        {
            return Some(exit);
        }
        self.frozen_sent = true;
        None
    }
}

/// One scalar per `<symbol>@ticker` message; no backfill, no table.
async fn run_field_stream(
    context: &StreamRuntimeContext<'_>,
    field: TickerField,
) -> Result<CycleExit, StreamError> {
    let topic = context.config.push_topic();
    let mut reconnect_attempt = 0_u32;

    while !context.cancel_token.is_cancelled() {
        let error = match stream_field(context, &topic, field).await {
            Ok(exit) => return Ok(exit),
            Err(error) if error.is_terminal() => return Err(error),
            Err(error) => error,
        };

        reconnect_attempt = reconnect_attempt.saturating_add(1);
        warn!(%topic, %error, reconnect_attempt, "ticker field stream failed");
        {
            let mut writable = context.status_store.write().await;
            writable.phase = SupervisorPhase::Frozen;
            writable.reason = Some(error.to_string());
            writable.reconnect_attempts = reconnect_attempt;
        }

        tokio::select! {
            _ = context.cancel_token.cancelled() => break,
            _ = tokio::time::sleep(context.settings.field_reconnect_delay) => {}
        }
    }

    Ok(CycleExit::Cancelled)
}

async fn stream_field(
    context: &StreamRuntimeContext<'_>,
    topic: &str,
    field: TickerField,
) -> Result<CycleExit, StreamError> {
    let mut feed = tokio::select! {
        _ = context.cancel_token.cancelled() => return Ok(CycleExit::Cancelled),
        feed = context.gateway.open_feed(topic) => feed?,
    };
    info!(%topic, field = field.key(), "ticker field feed connected");
    publish_status(
        context.status_store,
        SupervisorPhase::Streaming,
        Some("push feed connected".to_string()),
    )
    .await;

    let mut watchdog = FeedWatchdog::new(context.settings);
    let exit = loop {
        let mut payload = match watchdog.next_payload(feed.as_mut(), context.cancel_token).await {
            Ok(Some(payload)) => payload,
            Ok(None) => break Ok(CycleExit::Cancelled),
            Err(error) => break Err(error),
        };

        let ticker = match parse_ticker_payload(payload.as_mut_slice()) {
            Ok(ticker) => ticker,
            Err(error) => {
                debug!(%error, "dropping malformed ticker message");
                continue;
            }
        };

        let value = StreamValue::Scalar(ticker.field_value(field));
        if let Some(exit) = context.deliver(value).await {
            break Ok(exit);
        }
        let mut writable = context.status_store.write().await;
        writable.snapshots_emitted = writable.snapshots_emitted.saturating_add(1);
    };

    feed.close().await;
    exit
}

enum FeedEvent {
    Cancelled,
    PingDue,
    Idle,
    Frame(Result<FeedFrame, StreamError>),
}

/// Pings on a fixed cadence and fails the connection when nothing at all has
/// arrived for one ping interval plus the pong timeout.
struct FeedWatchdog {
    ping: Interval,
    idle_limit: Duration,
    last_activity: Instant,
}

impl FeedWatchdog {
    fn new(settings: &EngineSettings) -> Self {
        let now = Instant::now();
        let mut ping =
            tokio::time::interval_at(now + settings.ping_interval, settings.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            ping,
            idle_limit: settings.ping_interval + settings.pong_timeout,
            last_activity: now,
        }
    }

    /// Next data payload, or `None` once cancelled.
    async fn next_payload(
        &mut self,
        feed: &mut dyn FeedConnection,
        cancel_token: &CancellationToken,
    ) -> Result<Option<Vec<u8>>, StreamError> {
        loop {
            let idle_deadline = self.last_activity + self.idle_limit;
            let event = tokio::select! {
                _ = cancel_token.cancelled() => FeedEvent::Cancelled,
                _ = self.ping.tick() => FeedEvent::PingDue,
                _ = tokio::time::sleep_until(idle_deadline) => FeedEvent::Idle,
                frame = feed.next_frame() => FeedEvent::Frame(frame),
            };

            match event {
                FeedEvent::Cancelled => return Ok(None),
                FeedEvent::PingDue => feed.ping().await?,
                FeedEvent::Idle => {
                    return Err(StreamError::ConnectionFailed(format!(
                        "no traffic for {} ms",
                        self.idle_limit.as_millis()
                    )))
                }
                FeedEvent::Frame(frame) => {
                    self.last_activity = Instant::now();
                    match frame? {
                        FeedFrame::Payload(payload) => return Ok(Some(payload)),
                        FeedFrame::Heartbeat => {}
                        FeedFrame::Closed => {
                            return Err(StreamError::ConnectionFailed(
                                "push feed closed by upstream".to_string(),
                            ))
                        }
                    }
                }
            }
        }
    }
}

async fn publish_status(
    status_store: &Arc<RwLock<SubscriptionStatus>>,
    phase: SupervisorPhase,
    reason: Option<String>,
) {
    let mut writable = status_store.write().await;
    writable.phase = phase;
    writable.reason = reason;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct QueuedFeed {
        frames: VecDeque<Result<FeedFrame, StreamError>>,
        pings: Arc<AtomicUsize>,
    }

    impl QueuedFeed {
        fn new(frames: Vec<Result<FeedFrame, StreamError>>) -> Self {
            Self {
                frames: frames.into(),
                pings: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl FeedConnection for QueuedFeed {
        async fn next_frame(&mut self) -> Result<FeedFrame, StreamError> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<(), StreamError> {
            self.pings.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn settings(ping_ms: u64, pong_ms: u64) -> EngineSettings {
        EngineSettings {
            ping_interval: Duration::from_millis(ping_ms),
            pong_timeout: Duration::from_millis(pong_ms),
            ..EngineSettings::default()
        }
    }

    #[tokio::test]
    async fn watchdog_skips_heartbeats_and_yields_payloads() {
        let mut feed = QueuedFeed::new(vec![
            Ok(FeedFrame::Heartbeat),
            Ok(FeedFrame::Payload(b"{}".to_vec())),
        ]);
        let mut watchdog = FeedWatchdog::new(&settings(10_000, 10_000));
        let payload = watchdog
            .next_payload(&mut feed, &CancellationToken::new())
            .await
            .expect("payload should arrive");

        assert_eq!(payload, Some(b"{}".to_vec()));
    }

    #[tokio::test]
    async fn watchdog_fails_on_upstream_close() {
        let mut feed = QueuedFeed::new(vec![Ok(FeedFrame::Closed)]);
        let mut watchdog = FeedWatchdog::new(&settings(10_000, 10_000));
        let error = watchdog
            .next_payload(&mut feed, &CancellationToken::new())
            .await
            .expect_err("close is a connection failure");

        assert!(matches!(error, StreamError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn watchdog_pings_then_times_out_on_silence() {
        let mut feed = QueuedFeed::new(Vec::new());
        let pings = Arc::clone(&feed.pings);
        let mut watchdog = FeedWatchdog::new(&settings(20, 30));

        let error = watchdog
            .next_payload(&mut feed, &CancellationToken::new())
            .await
            .expect_err("silent feed must time out");

        assert!(matches!(error, StreamError::ConnectionFailed(_)));
        assert!(pings.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn watchdog_returns_none_when_cancelled() {
        let mut feed = QueuedFeed::new(Vec::new());
        let cancel_token = CancellationToken::new();
        cancel_token.cancel();
        let mut watchdog = FeedWatchdog::new(&settings(10_000, 10_000));

        let payload = watchdog
            .next_payload(&mut feed, &cancel_token)
            .await
            .expect("cancel is not an error");
        assert_eq!(payload, None);
    }
}
