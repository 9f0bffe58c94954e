//! Producer: periodic scan of dispatch candidates feeding the work channel.
//!
//! On every tick the producer fetches up to a bounded batch of dispatchable
//! identifiers in FIFO order and submits each onto the bounded work channel.
//! Submissions are semaphore-gated sends on spawned tasks: a full channel
//! never stalls the scan loop, while the permit count caps how many pushes
//! can be in flight, so consumer backpressure bounds memory instead of
//! growing an unbounded task pile.

use std::sync::Arc;

use integrator_core::models::RequestId;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    engine::{DispatchConfig, EngineStats},
    storage::DispatchStorage,
};

/// The scan-and-submit loop.
pub struct Producer {
    storage: Arc<dyn DispatchStorage>,
    sender: mpsc::Sender<RequestId>,
    submissions: Arc<Semaphore>,
    config: DispatchConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl Producer {
    /// Creates a new producer feeding `sender`.
    pub fn new(
        storage: Arc<dyn DispatchStorage>,
        sender: mpsc::Sender<RequestId>,
        config: DispatchConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let submissions = Arc::new(Semaphore::new(config.queue_capacity));
        Self { storage, sender, submissions, config, stats, cancellation_token }
    }

    /// Runs the poll loop until shutdown is signaled.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.process_interval.as_secs(),
            batch_limit = self.config.scan_batch_limit,
            "producer starting"
        );

        'poll: loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.storage.scan_dispatchable(self.config.scan_batch_limit).await {
                Ok(ids) => {
                    debug!(count = ids.len(), "scanned dispatchable requests");
                    {
                        let mut stats = self.stats.write().await;
                        stats.requests_scanned += ids.len() as u64;
                    }

                    for id in ids {
                        let permit = tokio::select! {
                            () = self.cancellation_token.cancelled() => break 'poll,
                            permit = self.submissions.clone().acquire_owned() => {
                                match permit {
                                    Ok(permit) => permit,
                                    Err(_) => break 'poll,
                                }
                            },
                        };

                        let sender = self.sender.clone();
                        let cancellation_token = self.cancellation_token.clone();
                        tokio::spawn(async move {
                            tokio::select! {
                                () = cancellation_token.cancelled() => {},
                                result = sender.send(id) => {
                                    if result.is_err() {
                                        debug!(request_id = %id, "work channel closed during submit");
                                    }
                                },
                            }
                            drop(permit);
                        });
                    }
                },
                Err(error) => {
                    error!(error = %error, "failed to scan for dispatchable requests");
                },
            }

            tokio::select! {
                () = tokio::time::sleep(self.config.process_interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("producer stopped");
    }
}
