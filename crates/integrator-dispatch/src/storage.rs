//! Storage abstraction for the dispatch engine.
//!
//! The engine talks to storage through an object-safe trait so delivery
//! logic, the eligibility policy, and retry behavior are testable without a
//! database. The production implementation delegates to the repository
//! layer and keeps each claim's transaction open until `release`, so the
//! row lock spans the outbound HTTP call exactly as the engine expects.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use integrator_core::{
    error::Result,
    models::{ClaimedRequest, RequestId, RequestStatus},
    storage::{requests::ClaimOutcome, Storage},
};
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of a claim attempt, as seen by the engine.
#[derive(Debug)]
pub enum Claim {
    /// Exclusive lock acquired; the claim stays open until
    /// [`DispatchStorage::release`].
    Claimed(ClaimedRequest),
    /// Another worker holds the row. Transient; skip and rescan later.
    Busy,
    /// The row no longer exists.
    Missing,
}

/// Storage operations required by the dispatch engine.
///
/// A claim opens an exclusive, non-blocking row lock; `update_result` and
/// `update_status` write under that claim; `release` ends it, committing
/// whatever was written. Callers must pair every successful claim with
/// exactly one `release` so rows are never left locked.
pub trait DispatchStorage: Send + Sync + 'static {
    /// Scans for dispatch candidates, oldest first.
    fn scan_dispatchable(&self, limit: i64) -> BoxFuture<'_, Result<Vec<RequestId>>>;

    /// Attempts an exclusive, non-blocking claim of one request.
    fn claim(&self, id: RequestId) -> BoxFuture<'_, Result<Claim>>;

    /// Writes the full delivery result under the open claim.
    fn update_result(&self, request: ClaimedRequest) -> BoxFuture<'_, Result<()>>;

    /// Writes a status-only transition under the open claim.
    fn update_status(&self, id: RequestId, status: RequestStatus) -> BoxFuture<'_, Result<()>>;

    /// Ends the claim, committing its writes and releasing the row lock.
    fn release(&self, id: RequestId) -> BoxFuture<'_, Result<()>>;
}

/// Production storage backed by PostgreSQL.
///
/// Open claims are kept as live transactions keyed by request id; the
/// `FOR UPDATE NOWAIT` lock taken at claim time is held until the
/// transaction commits in `release`.
pub struct PostgresDispatchStorage {
    storage: Arc<Storage>,
    active: Mutex<HashMap<RequestId, Transaction<'static, Postgres>>>,
}

impl PostgresDispatchStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage, active: Mutex::new(HashMap::new()) }
    }
}

impl DispatchStorage for PostgresDispatchStorage {
    fn scan_dispatchable(&self, limit: i64) -> BoxFuture<'_, Result<Vec<RequestId>>> {
        Box::pin(async move { self.storage.requests.fetch_dispatchable_ids(limit).await })
    }

    fn claim(&self, id: RequestId) -> BoxFuture<'_, Result<Claim>> {
        Box::pin(async move {
            let mut tx = self.storage.requests.begin().await?;
            match self.storage.requests.claim(&mut tx, id).await? {
                ClaimOutcome::Claimed(request) => {
                    self.active.lock().await.insert(id, tx);
                    Ok(Claim::Claimed(request))
                },
                ClaimOutcome::Busy => {
                    tx.rollback().await.map_err(integrator_core::CoreError::from)?;
                    Ok(Claim::Busy)
                },
                ClaimOutcome::Missing => {
                    tx.rollback().await.map_err(integrator_core::CoreError::from)?;
                    Ok(Claim::Missing)
                },
            }
        })
    }

    fn update_result(&self, request: ClaimedRequest) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut active = self.active.lock().await;
            let tx = active.get_mut(&request.id).ok_or_else(|| {
                integrator_core::CoreError::Database(format!(
                    "no open claim for request {}",
                    request.id
                ))
            })?;
            self.storage.requests.update_result(tx, &request).await
        })
    }

    fn update_status(&self, id: RequestId, status: RequestStatus) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut active = self.active.lock().await;
            let tx = active.get_mut(&id).ok_or_else(|| {
                integrator_core::CoreError::Database(format!("no open claim for request {id}"))
            })?;
            self.storage.requests.update_status(tx, id, status).await
        })
    }

    fn release(&self, id: RequestId) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let tx = self.active.lock().await.remove(&id);
            match tx {
                Some(tx) => {
                    tx.commit().await.map_err(integrator_core::CoreError::from)?;
                    Ok(())
                },
                None => Ok(()),
            }
        })
    }
}

pub mod mock {
    //! In-memory storage double for engine tests.
    //!
    //! Reproduces the claim semantics the engine depends on: at most one
    //! open claim per request id, with concurrent attempts observing `Busy`.

    use std::collections::HashSet;

    use super::{
        Arc, BoxFuture, Claim, ClaimedRequest, DispatchStorage, HashMap, Mutex, RequestId,
        RequestStatus, Result,
    };

    /// Mock storage holding requests in memory.
    #[derive(Default)]
    pub struct MockDispatchStorage {
        requests: Arc<Mutex<HashMap<RequestId, ClaimedRequest>>>,
        order: Arc<Mutex<Vec<RequestId>>>,
        claimed: Arc<Mutex<HashSet<RequestId>>>,
    }

    impl MockDispatchStorage {
        /// Creates an empty mock.
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds a request to the queue in insertion order.
        pub async fn add_request(&self, request: ClaimedRequest) {
            self.order.lock().await.push(request.id);
            self.requests.lock().await.insert(request.id, request);
        }

        /// Returns the current state of a request for assertions.
        pub async fn request(&self, id: RequestId) -> Option<ClaimedRequest> {
            self.requests.lock().await.get(&id).cloned()
        }

        /// Number of claims currently open.
        pub async fn open_claims(&self) -> usize {
            self.claimed.lock().await.len()
        }
    }

    impl DispatchStorage for MockDispatchStorage {
        fn scan_dispatchable(&self, limit: i64) -> BoxFuture<'_, Result<Vec<RequestId>>> {
            Box::pin(async move {
                let order = self.order.lock().await;
                let requests = self.requests.lock().await;
                let ids = order
                    .iter()
                    .filter(|id| {
                        requests.get(*id).is_some_and(|r| r.status.is_dispatchable())
                    })
                    .take(usize::try_from(limit).unwrap_or(usize::MAX))
                    .copied()
                    .collect();
                Ok(ids)
            })
        }

        fn claim(&self, id: RequestId) -> BoxFuture<'_, Result<Claim>> {
            Box::pin(async move {
                let requests = self.requests.lock().await;
                let Some(request) = requests.get(&id).cloned() else {
                    return Ok(Claim::Missing);
                };
                drop(requests);

                let mut claimed = self.claimed.lock().await;
                if !claimed.insert(id) {
                    return Ok(Claim::Busy);
                }
                Ok(Claim::Claimed(request))
            })
        }

        fn update_result(&self, request: ClaimedRequest) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.requests.lock().await.insert(request.id, request);
                Ok(())
            })
        }

        fn update_status(
            &self,
            id: RequestId,
            status: RequestStatus,
        ) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                if let Some(request) = self.requests.lock().await.get_mut(&id) {
                    request.status = status;
                }
                Ok(())
            })
        }

        fn release(&self, id: RequestId) -> BoxFuture<'_, Result<()>> {
            Box::pin(async move {
                self.claimed.lock().await.remove(&id);
                Ok(())
            })
        }
    }
}
