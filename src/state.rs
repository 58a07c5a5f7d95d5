use crate::market::binance::{BinanceGateway, MarketGateway};
use crate::market::types::{EngineSettings, SubscriptionKey, SubscriptionStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct StreamHandle {
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
    pub status: Arc<RwLock<SubscriptionStatus>>,
}

/// Engine-wide state: the upstream gateway, shared settings and one producer task per
/// subscription key.
pub struct EngineState {
    pub gateway: Arc<dyn MarketGateway>,
    pub settings: EngineSettings,
    streams: Mutex<HashMap<SubscriptionKey, StreamHandle>>,
}

impl EngineState {
    pub fn new(gateway: Arc<dyn MarketGateway>, settings: EngineSettings) -> Self {
        Self {
            gateway,
            settings,
            streams: Mutex::new(HashMap::new()),
        }
    }

    pub fn binance(settings: EngineSettings) -> Self {
        let gateway = Arc::new(BinanceGateway::new(&settings));
        Self::new(gateway, settings)
    }

    pub fn take_stream(&self, key: &SubscriptionKey) -> Option<StreamHandle> {
        self.streams.lock().remove(key)
    }

    /// Registers a producer, dropping entries whose task already finished.
    pub fn insert_stream(&self, key: SubscriptionKey, handle: StreamHandle) {
        let mut streams = self.streams.lock();
        streams.retain(|_, existing| !existing.join_handle.is_finished());
        streams.insert(key, handle);
    }

    pub fn stream_status(&self, key: &SubscriptionKey) -> Option<Arc<RwLock<SubscriptionStatus>>> {
        self.streams
            .lock()
            .get(key)
            .map(|handle| Arc::clone(&handle.status))
    }

    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = self
            .streams
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.join_handle.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn drain_streams(&self) -> Vec<StreamHandle> {
        self.streams.lock().drain().map(|(_, handle)| handle).collect()
    }
}
