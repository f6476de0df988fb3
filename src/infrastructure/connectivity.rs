use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use url::Url;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpConnectivityProbe {
    client: Client,
    health_url: Url,
}

impl HttpConnectivityProbe {
    pub fn new(health_url: Url) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|error| InfraError::Network(format!("failed to build probe client: {error}")))?;
        Ok(Self { client, health_url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpConnectivityProbe {
    async fn is_reachable(&self) -> bool {
        match self.client.get(self.health_url.clone()).send().await {
            Ok(response) => !response.status().is_server_error(),
            Err(_) => false,
        }
    }
}

/// Tracks whether the server is reachable and publishes online/offline
/// transitions. Subscribers only wake on an actual change.
pub struct ConnectivityMonitor<P: ConnectivityProbe> {
    probe: Arc<P>,
    sender: watch::Sender<bool>,
}

impl<P: ConnectivityProbe> ConnectivityMonitor<P> {
    pub fn new(probe: Arc<P>, initially_online: bool) -> Self {
        let (sender, _) = watch::channel(initially_online);
        Self { probe, sender }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Probes the server and publishes the result.
    pub async fn check(&self) -> bool {
        let online = self.probe.is_reachable().await;
        self.publish(online);
        online
    }

    /// Forces offline mode, as when a request fails mid-flight.
    pub fn trigger_offline(&self) {
        self.publish(false);
    }

    pub fn restore(&self) {
        self.publish(true);
    }

    pub async fn watch(&self, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            self.check().await;
        }
    }

    fn publish(&self, online: bool) {
        let changed = self.sender.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });
        if changed {
            if online {
                info!("connectivity restored");
            } else {
                warn!("connectivity lost; offline mode enabled");
            }
        }
    }
}
