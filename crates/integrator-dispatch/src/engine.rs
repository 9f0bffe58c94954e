//! Engine lifecycle: configuration, statistics, startup, and shutdown.
//!
//! `DispatchEngine` wires the producer and the worker pool together over a
//! bounded channel of request identifiers and supervises their lifetime.
//! Work distribution happens over the channel; mutual exclusion over rows
//! happens in the database via the non-blocking claim.

use std::{sync::Arc, time::Duration};

use integrator_core::{models::RequestId, Destinations};
use tokio::{
    sync::{mpsc, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient},
    error::{DispatchError, Result},
    producer::Producer,
    storage::DispatchStorage,
    worker::Worker,
};

/// Configuration for the dispatch engine.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent delivery workers.
    pub max_concurrent: usize,

    /// Maximum retries before a request expires.
    pub max_retries: i32,

    /// Capacity of the bounded work channel; also caps in-flight producer
    /// submissions.
    pub queue_capacity: usize,

    /// Producer poll interval.
    pub process_interval: Duration,

    /// Upper bound on identifiers fetched per scan.
    pub scan_batch_limit: i64,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Maximum time to wait for workers during graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: crate::DEFAULT_MAX_CONCURRENT,
            max_retries: crate::DEFAULT_MAX_RETRIES,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            process_interval: Duration::from_secs(crate::DEFAULT_PROCESS_INTERVAL_SECS),
            scan_batch_limit: crate::DEFAULT_SCAN_BATCH_LIMIT,
            client_config: ClientConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Statistics for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active workers.
    pub active_workers: usize,
    /// Identifiers returned by producer scans since startup.
    pub requests_scanned: u64,
    /// Requests fully processed (claimed and released).
    pub requests_processed: u64,
    /// Deliveries that reached a success outcome (completed or submitted).
    pub successful_deliveries: u64,
    /// Deliveries that failed (transport or destination error).
    pub failed_deliveries: u64,
    /// Claim attempts that found the row locked by another worker.
    pub claim_contention: u64,
    /// Requests currently between claim and release.
    pub in_flight: u64,
}

/// The producer/consumer dispatch engine.
pub struct DispatchEngine {
    storage: Arc<dyn DispatchStorage>,
    destinations: Arc<Destinations>,
    config: DispatchConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl DispatchEngine {
    /// Creates a new engine over the given storage and destination snapshot.
    ///
    /// # Errors
    ///
    /// Returns error if the delivery client cannot be initialized.
    pub fn new(
        storage: Arc<dyn DispatchStorage>,
        destinations: Arc<Destinations>,
        config: DispatchConfig,
    ) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);

        Ok(Self {
            storage,
            destinations,
            config,
            client,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            handles: Vec::new(),
        })
    }

    /// Spawns the producer and the worker pool.
    ///
    /// Returns immediately; use [`DispatchEngine::shutdown`] to stop
    /// gracefully.
    pub async fn start(&mut self) {
        info!(
            max_concurrent = self.config.max_concurrent,
            queue_capacity = self.config.queue_capacity,
            max_retries = self.config.max_retries,
            "starting dispatch engine"
        );

        let (sender, receiver) = mpsc::channel::<RequestId>(self.config.queue_capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let producer = Producer::new(
            self.storage.clone(),
            sender,
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        self.handles.push(tokio::spawn(async move { producer.run().await }));

        for worker_id in 0..self.config.max_concurrent {
            let worker = Worker::new(
                worker_id,
                self.storage.clone(),
                self.destinations.clone(),
                self.client.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );
            let receiver = receiver.clone();
            self.handles.push(tokio::spawn(async move { worker.run(receiver).await }));
        }

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.max_concurrent;
        }

        info!("dispatch engine started");
    }

    /// Gracefully shuts the engine down.
    ///
    /// Signals cancellation, then waits for the producer and all workers to
    /// finish within the configured shutdown timeout.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ShutdownTimeout`] when tasks do not finish
    /// in time.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down dispatch engine");
        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.handles);
        let stats = self.stats.clone();
        let shutdown_future = async move {
            for (task_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(
                        task_id,
                        error = %join_error,
                        "engine task panicked during shutdown"
                    );
                }
            }
            stats.write().await.active_workers = 0;
        };

        match tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                info!("dispatch engine shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = self.config.shutdown_timeout.as_secs(),
                    "engine shutdown timed out, some tasks may still be running"
                );
                Err(DispatchError::ShutdownTimeout { timeout: self.config.shutdown_timeout })
            },
        }
    }

    /// Returns a snapshot of current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}

impl Drop for DispatchEngine {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            let active = self.handles.iter().filter(|h| !h.is_finished()).count();
            if active > 0 && !self.cancellation_token.is_cancelled() {
                warn!(
                    active_tasks = active,
                    "DispatchEngine dropped with running tasks, forcing cancellation"
                );
                self.cancellation_token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = DispatchConfig::default();
        assert_eq!(config.max_concurrent, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.queue_capacity, 100);
        assert_eq!(config.process_interval, Duration::from_secs(5));
        assert_eq!(config.scan_batch_limit, 100_000);
    }
}
