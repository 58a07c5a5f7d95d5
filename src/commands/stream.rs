use crate::market::pipeline::run_market_stream;
use crate::market::types::{
    StreamKind, StreamValue, SubscribeArgs, SubscriptionKey, SubscriptionStatus, SupervisorPhase,
};
use crate::state::{EngineState, StreamHandle};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Consumer side of one subscription. Dropping it stops the producer.
pub struct Subscription {
    key: Option<SubscriptionKey>,
    receiver: mpsc::Receiver<StreamValue>,
    cancellation_token: CancellationToken,
    status: Arc<RwLock<SubscriptionStatus>>,
}

impl Subscription {
    /// `None` when the arguments were rejected.
    pub fn key(&self) -> Option<&SubscriptionKey> {
        self.key.as_ref()
    }

    /// Next snapshot, scalar or diagnostic; `None` once the producer has exited.
    pub async fn next(&mut self) -> Option<StreamValue> {
        self.receiver.recv().await
    }

    pub async fn status(&self) -> SubscriptionStatus {
        self.status.read().await.clone()
    }

    pub fn close(&mut self) {
        self.cancellation_token.cancel();
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancellation_token.cancel();
    }
}

/// Starts a stream for `args`. A subscription with the same key is stopped and
/// awaited first, so the new one always starts from a fresh backfill.
pub async fn subscribe(state: &EngineState, args: SubscribeArgs) -> Subscription {
    let kind = args.kind;
    let config = match args.normalize() {
        Ok(config) => config,
        Err(error) => return rejected(kind, error.to_string()),
    };
    let key = config.key();

    if let Some(handle) = state.take_stream(&key) {
        info!(%key, "restarting existing subscription");
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }

    let (sender, receiver) = mpsc::channel(state.settings.channel_capacity.max(1));
    let cancellation_token = CancellationToken::new();
    let status = Arc::new(RwLock::new(SubscriptionStatus::starting(&key)));

    let join_handle = tokio::spawn(run_market_stream(
        Arc::clone(&state.gateway),
        config,
        state.settings.clone(),
        sender,
        Arc::clone(&status),
        cancellation_token.clone(),
    ));

    state.insert_stream(
        key.clone(),
        StreamHandle {
            cancellation_token: cancellation_token.clone(),
            join_handle,
            status: Arc::clone(&status),
        },
    );

    Subscription {
        key: Some(key),
        receiver,
        cancellation_token,
        status,
    }
}

/// A subscription that yields exactly one diagnostic and then ends.
fn rejected(kind: StreamKind, reason: String) -> Subscription {
    let (sender, receiver) = mpsc::channel(1);
    let _ = sender.try_send(StreamValue::Diagnostic(reason.clone()));

    Subscription {
        key: None,
        receiver,
        cancellation_token: CancellationToken::new(),
        status: Arc::new(RwLock::new(SubscriptionStatus::rejected(kind, reason))),
    }
}

/// Stops the producer for `key` and waits for it to exit.
pub async fn unsubscribe(state: &EngineState, key: &SubscriptionKey) -> bool {
    let Some(handle) = state.take_stream(key) else {
        return false;
    };

    handle.cancellation_token.cancel();
    let _ = handle.join_handle.await;
    let mut writable = handle.status.write().await;
    writable.phase = SupervisorPhase::Stopped;
    writable.reason = Some("stream stopped by command".to_string());
    true
}

pub async fn stream_status(
    state: &EngineState,
    key: &SubscriptionKey,
) -> Option<SubscriptionStatus> {
    let status = state.stream_status(key)?;
    let snapshot = status.read().await.clone();
    Some(snapshot)
}

/// Cancels every running producer and waits for all of them.
pub async fn shutdown(state: &EngineState) {
    for handle in state.drain_streams() {
        handle.cancellation_token.cancel();
        let _ = handle.join_handle.await;
    }
}
