//! Delivery worker: claim, gate, deliver, write back.
//!
//! Each worker loops on the shared work channel. For every identifier it
//! opens a claim (exclusive, non-blocking row lock), applies the eligibility
//! policy in fixed order, performs the HTTP delivery, and writes the outcome
//! back under the claim before releasing it. The claim is released on every
//! path so a row is never left locked, and the transaction deliberately
//! spans the outbound call — the lock is the engine's only mutual exclusion
//! over the row.

use std::sync::Arc;

use chrono::{Timelike, Utc};
use integrator_core::{
    models::{ClaimedRequest, RequestId, RequestStatus, Server},
    Destinations,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{Auth, DeliveryClient, DeliveryRequest},
    engine::{DispatchConfig, EngineStats},
    error::Result,
    payload::{ImportSummary, ObjectKind, Payload},
    storage::{Claim, DispatchStorage},
};

/// Diagnostic code for an empty request body.
const CODE_EMPTY_BODY: &str = "ERROR1";
/// Diagnostic code for an unreachable destination.
const CODE_UNREACHABLE: &str = "ERROR02";
/// Diagnostic code for a blacklisted request.
const CODE_BLACKLISTED: &str = "ERROR7";

/// One delivery worker.
pub struct Worker {
    id: usize,
    storage: Arc<dyn DispatchStorage>,
    destinations: Arc<Destinations>,
    client: Arc<DeliveryClient>,
    config: DispatchConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl Worker {
    /// Creates a new worker.
    pub fn new(
        id: usize,
        storage: Arc<dyn DispatchStorage>,
        destinations: Arc<Destinations>,
        client: Arc<DeliveryClient>,
        config: DispatchConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, storage, destinations, client, config, stats, cancellation_token }
    }

    /// Main worker loop: pulls identifiers until the channel closes or
    /// shutdown is signaled.
    pub async fn run(&self, receiver: Arc<Mutex<mpsc::Receiver<RequestId>>>) {
        info!(worker_id = self.id, "dispatch worker starting");

        loop {
            let next = {
                let mut rx = receiver.lock().await;
                tokio::select! {
                    () = self.cancellation_token.cancelled() => break,
                    msg = rx.recv() => msg,
                }
            };

            let Some(request_id) = next else { break };

            debug!(worker_id = self.id, request_id = %request_id, "handling request");
            if let Err(error) = self.process(request_id).await {
                error!(
                    worker_id = self.id,
                    request_id = %request_id,
                    error = %error,
                    "request processing failed"
                );
            }
        }

        info!(worker_id = self.id, "dispatch worker stopped");
    }

    /// Claims and processes one request.
    ///
    /// # Errors
    ///
    /// Returns error if the claim or a write-back fails. Claim contention is
    /// not an error: the row stays queued and a later scan retries it.
    pub async fn process(&self, id: RequestId) -> Result<()> {
        match self.storage.claim(id).await? {
            Claim::Busy => {
                debug!(worker_id = self.id, request_id = %id, "request locked by another worker, skipping");
                self.stats.write().await.claim_contention += 1;
                Ok(())
            },
            Claim::Missing => {
                warn!(worker_id = self.id, request_id = %id, "request disappeared before claim");
                Ok(())
            },
            Claim::Claimed(request) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.in_flight += 1;
                }

                let outcome = self.handle_claimed(request).await;

                // The claim must end on every path so the row lock and its
                // transaction are not left dangling.
                let released = self.storage.release(id).await;

                {
                    let mut stats = self.stats.write().await;
                    stats.in_flight -= 1;
                    stats.requests_processed += 1;
                }

                outcome.and(released.map_err(Into::into))
            },
        }
    }

    /// Runs the eligibility policy and delivery for a claimed request.
    async fn handle_claimed(&self, mut request: ClaimedRequest) -> Result<()> {
        // An id can be enqueued twice within one scan window; whoever ran
        // first may already have finished the row.
        if !request.status.is_dispatchable() {
            debug!(
                worker_id = self.id,
                request_id = %request.id,
                status = %request.status,
                "request no longer dispatchable, skipping"
            );
            return Ok(());
        }

        let Some(server) = self.destinations.get(request.destination).await else {
            warn!(
                worker_id = self.id,
                request_id = %request.id,
                destination = %request.destination,
                "no configuration for destination server"
            );
            return Ok(());
        };

        if !self.can_send(&mut request, &server).await? {
            return Ok(());
        }

        self.deliver(request, &server).await
    }

    /// The eligibility policy: fixed order, short-circuiting on the first
    /// failing check.
    ///
    /// 1. retries exhausted → `expired`
    /// 2. destination suspended → skip, untouched
    /// 3. destination out of submission period → skip, untouched
    /// 4. request blacklisted → `canceled`, `ERROR7`
    /// 5. empty body → `failed`, `ERROR1`
    async fn can_send(&self, request: &mut ClaimedRequest, server: &Server) -> Result<bool> {
        if request.retries > self.config.max_retries {
            self.storage.update_status(request.id, RequestStatus::Expired).await?;
            info!(
                worker_id = self.id,
                request_id = %request.id,
                retries = request.retries,
                "retries exhausted, request expired"
            );
            return Ok(false);
        }

        if server.suspended {
            info!(
                worker_id = self.id,
                server = %server.id,
                name = %server.name,
                "destination server is suspended"
            );
            return Ok(false);
        }

        if !server.in_submission_period(Utc::now().hour()) {
            info!(
                worker_id = self.id,
                server = %server.id,
                name = %server.name,
                "destination server out of submission period"
            );
            return Ok(false);
        }

        if request.suspended {
            request.status = RequestStatus::Canceled;
            request.status_code = CODE_BLACKLISTED.to_string();
            request.errors = "Blacklisted".to_string();
            request.retries += 1;
            self.storage.update_result(request.clone()).await?;
            info!(worker_id = self.id, request_id = %request.id, "request blacklisted");
            return Ok(false);
        }

        if request.body.trim().is_empty() {
            request.status = RequestStatus::Failed;
            request.status_code = CODE_EMPTY_BODY.to_string();
            request.errors = "Request has empty body".to_string();
            self.storage.update_result(request.clone()).await?;
            info!(worker_id = self.id, request_id = %request.id, "request has empty body");
            return Ok(false);
        }

        Ok(true)
    }

    /// Performs the HTTP delivery and writes back per the destination's
    /// synchronous/asynchronous protocol.
    async fn deliver(&self, mut request: ClaimedRequest, server: &Server) -> Result<()> {
        let delivery = match build_delivery_request(&request, server) {
            Ok(delivery) => delivery,
            Err(error) => {
                // The request cannot be put on the wire; same outcome as a
                // destination that never answered.
                warn!(
                    worker_id = self.id,
                    request_id = %request.id,
                    error = %error,
                    "failed to build delivery request"
                );
                return self.fail_transport(request).await;
            },
        };

        let response = match self.client.deliver(delivery).await {
            Ok(response) => response,
            Err(error) => {
                warn!(
                    worker_id = self.id,
                    request_id = %request.id,
                    error = %error,
                    "failed to send request"
                );
                return self.fail_transport(request).await;
            },
        };

        if server.use_async {
            self.complete_async(request, server, response).await
        } else {
            self.complete_sync(&mut request, server, response).await
        }
    }

    /// Transport failure: the destination never produced a response.
    async fn fail_transport(&self, mut request: ClaimedRequest) -> Result<()> {
        request.status = RequestStatus::Failed;
        request.status_code = CODE_UNREACHABLE.to_string();
        request.errors = "Server possibly unreachable".to_string();
        request.retries += 1;
        self.storage.update_result(request).await?;
        self.stats.write().await.failed_deliveries += 1;
        Ok(())
    }

    /// Destination-side error response (non-2xx): transition to `error` and
    /// count the attempt, so the row neither retries forever nor wedges in
    /// a claimed state.
    async fn fail_destination(&self, mut request: ClaimedRequest, status_code: u16) -> Result<()> {
        request.status = RequestStatus::Error;
        request.status_code = status_code.to_string();
        request.errors = format!("destination returned HTTP {status_code}");
        request.retries += 1;
        self.storage.update_result(request).await?;
        self.stats.write().await.failed_deliveries += 1;
        Ok(())
    }

    /// Synchronous destination: the response carries the final import
    /// result.
    async fn complete_sync(
        &self,
        request: &mut ClaimedRequest,
        server: &Server,
        response: crate::client::DeliveryResponse,
    ) -> Result<()> {
        if !response.is_success {
            warn!(
                worker_id = self.id,
                request_id = %request.id,
                status = response.status_code,
                "destination rejected request"
            );
            return self.fail_destination(request.clone(), response.status_code).await;
        }

        let body = response.body.unwrap_or_default();
        let summary: ImportSummary = serde_json::from_str(&body).unwrap_or_default();

        if server.parse_responses {
            request.response = Some(body);
            request.status = RequestStatus::Completed;
            self.storage.update_result(request.clone()).await?;
        } else {
            self.storage.update_status(request.id, RequestStatus::Completed).await?;
        }

        self.stats.write().await.successful_deliveries += 1;
        info!(
            worker_id = self.id,
            request_id = %request.id,
            status = %summary.response.status,
            description = %summary.response.description,
            imported = summary.response.import_count.imported,
            updated = summary.response.import_count.updated,
            ignored = summary.response.import_count.ignored,
            "request completed successfully"
        );
        Ok(())
    }

    /// Asynchronous destination: the response only acknowledges receipt;
    /// completion arrives out of band.
    async fn complete_async(
        &self,
        request: ClaimedRequest,
        _server: &Server,
        response: crate::client::DeliveryResponse,
    ) -> Result<()> {
        let Some(body) = response.body else {
            warn!(
                worker_id = self.id,
                request_id = %request.id,
                "could not read response from asynchronous destination"
            );
            self.storage.update_status(request.id, RequestStatus::Failed).await?;
            self.stats.write().await.failed_deliveries += 1;
            return Ok(());
        };

        if !response.is_success {
            warn!(
                worker_id = self.id,
                request_id = %request.id,
                status = response.status_code,
                "asynchronous destination rejected request"
            );
            return self.fail_destination(request, response.status_code).await;
        }

        let job_status = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("status").cloned());
        debug!(
            worker_id = self.id,
            request_id = %request.id,
            job_status = ?job_status,
            "asynchronous destination acknowledged submission"
        );

        self.storage.update_status(request.id, RequestStatus::Pending).await?;
        self.stats.write().await.successful_deliveries += 1;
        Ok(())
    }
}

/// Resolves a claimed request and its destination into one outbound call.
///
/// The destination URL gains the request's `url_suffix` and the
/// destination's extra `url_params`. A query-parameter request contributes
/// its body as query pairs and sends no payload; anything else is
/// normalized through the payload codec.
pub fn build_delivery_request(
    request: &ClaimedRequest,
    server: &Server,
) -> Result<DeliveryRequest> {
    let url = format!("{}{}", server.url, request.url_suffix);

    let mut query: Vec<(String, String)> =
        server.url_params.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    query.sort();

    let body = if request.body_is_query_params {
        for pair in request.body.split('&') {
            let mut kv = pair.splitn(2, '=');
            let key = kv.next().unwrap_or_default();
            if key.is_empty() {
                continue;
            }
            query.push((key.to_string(), kv.next().unwrap_or_default().to_string()));
        }
        None
    } else {
        let kind = ObjectKind::parse(&request.object_type);
        Some(Payload::decode(kind, &request.body)?.encode()?)
    };

    let auth = match server.auth_method {
        integrator_core::AuthMethod::Token => Auth::Token(server.auth_token.clone()),
        integrator_core::AuthMethod::Basic => {
            Auth::Basic { username: server.username.clone(), password: server.password.clone() }
        },
    };

    Ok(DeliveryRequest {
        url,
        method: server.http_method.clone(),
        auth,
        content_type: request.content_type.clone(),
        body,
        query,
    })
}
