//! Online/offline signal feeding the sync orchestrator.

use crate::config::ServerConfig;
use crate::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Write side of the connectivity signal. Hosts with a platform
/// reachability API push its events here.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityHandle {
    /// Creates the signal with its initial value
    pub fn new(initially_online: bool) -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(initially_online);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Publishes `online`; receivers are only notified on a change
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            log::info!(
                "Connectivity changed: {}",
                if online { "online" } else { "offline" }
            );
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// No orchestrator listens anymore
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Polls the server's `status.php` to decide reachability
pub struct ReachabilityProbe {
    http: reqwest::Client,
    status_url: String,
    interval: Duration,
    handle: ConnectivityHandle,
}

impl ReachabilityProbe {
    pub fn new(
        server: &ServerConfig,
        interval: Duration,
        handle: ConnectivityHandle,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::Network(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            status_url: status_url(&server.server_url),
            interval,
            handle,
        })
    }

    /// One reachability check
    pub async fn check(&self) -> bool {
        match self.http.get(&self.status_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                log::debug!("Reachability check: HTTP {}", response.status());
                false
            }
            Err(e) => {
                log::debug!("Reachability check failed: {}", e);
                false
            }
        }
    }

    /// Probes every `interval` until no receiver is left
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.handle.is_closed() {
                log::debug!("Connectivity signal has no listeners, stopping probe");
                break;
            }
            let online = self.check().await;
            self.handle.set_online(online);
        }
    }
}

/// `<server>/status.php`
pub fn status_url(server_url: &str) -> String {
    format!("{}/status.php", server_url.trim_end_matches('/'))
}
