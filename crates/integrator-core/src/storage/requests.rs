//! Repository for queued request database operations.
//!
//! Provides the ingest insert contract, the producer's dispatchable scan,
//! the worker's exclusive non-blocking claim, and the status/result updates
//! performed under the claim transaction.

use std::sync::Arc;

use sqlx::{PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{generate_uid, ClaimedRequest, NewRequest, Request, RequestId, RequestStatus},
};

/// PostgreSQL SQLSTATE for "lock not available", raised by `FOR UPDATE
/// NOWAIT` when another worker already holds the row.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Outcome of an exclusive claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The row lock was acquired; the request is ours until the surrounding
    /// transaction ends.
    Claimed(ClaimedRequest),
    /// Another worker holds the lock. Transient — try again on a later scan.
    Busy,
    /// No such request (deleted between scan and claim).
    Missing,
}

/// Repository for request rows.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Begins a transaction on the shared pool.
    ///
    /// # Errors
    ///
    /// Returns error if a connection cannot be acquired.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Inserts a new request with status `ready` and a generated uid.
    ///
    /// This is the ingest contract: the transport surface maps its input
    /// onto [`NewRequest`] and everything else is assigned here.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub async fn create(&self, new: &NewRequest) -> Result<(RequestId, String)> {
        let uid = generate_uid();
        let id: RequestId = sqlx::query_scalar(
            r"
            INSERT INTO requests (
                uid, batch_id, source, destination, content_type, body, status,
                period, week, month, year, msisdn, raw_msg, facility, district,
                report_type, object_type, extras, body_is_query_params,
                submission_id, url_suffix, created, updated
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                $15, $16, $17, $18, $19, $20, $21, NOW(), NOW()
            )
            RETURNING id
            ",
        )
        .bind(&uid)
        .bind(&new.batch_id)
        .bind(new.source)
        .bind(new.destination)
        .bind(&new.content_type)
        .bind(&new.body)
        .bind(RequestStatus::Ready.to_string())
        .bind(&new.period)
        .bind(&new.week)
        .bind(&new.month)
        .bind(&new.year)
        .bind(&new.msisdn)
        .bind(&new.raw_msg)
        .bind(&new.facility)
        .bind(&new.district)
        .bind(&new.report_type)
        .bind(&new.object_type)
        .bind(&new.extras)
        .bind(new.body_is_query_params)
        .bind(&new.submission_id)
        .bind(&new.url_suffix)
        .fetch_one(&*self.pool)
        .await?;

        Ok((id, uid))
    }

    /// Scans for dispatch candidates: requests whose status is in the
    /// dispatchable set, oldest first (FIFO fairness within a batch).
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn fetch_dispatchable_ids(&self, limit: i64) -> Result<Vec<RequestId>> {
        let statuses: Vec<String> =
            RequestStatus::DISPATCHABLE.iter().map(ToString::to_string).collect();

        let ids = sqlx::query_scalar(
            r"
            SELECT id FROM requests
            WHERE status = ANY($1)
            ORDER BY created
            LIMIT $2
            ",
        )
        .bind(&statuses)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await?;

        Ok(ids)
    }

    /// Attempts an exclusive, non-blocking claim of one request row.
    ///
    /// Runs `SELECT ... FOR UPDATE NOWAIT` inside the caller's transaction,
    /// so the lock is held until the transaction commits or rolls back. A
    /// lock held elsewhere fails fast as [`ClaimOutcome::Busy`] rather than
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns error for database failures other than lock contention.
    pub async fn claim(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: RequestId,
    ) -> Result<ClaimOutcome> {
        let result = sqlx::query_as::<_, ClaimedRequest>(
            r"
            SELECT id, source, destination, body, retries, content_type,
                   object_type, body_is_query_params, submission_id, url_suffix,
                   suspended, status, status_code, errors, response
            FROM requests
            WHERE id = $1
            FOR UPDATE NOWAIT
            ",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await;

        match result {
            Ok(Some(request)) => Ok(ClaimOutcome::Claimed(request)),
            Ok(None) => Ok(ClaimOutcome::Missing),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE) =>
            {
                Ok(ClaimOutcome::Busy)
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Writes back the full delivery result: status, diagnostic code, error
    /// text, retry counter, and (when present) the destination response.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_result(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        request: &ClaimedRequest,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE requests
            SET status = $1, status_code = $2, errors = $3, retries = $4,
                response = COALESCE($5, response), updated = NOW()
            WHERE id = $6
            ",
        )
        .bind(request.status.to_string())
        .bind(&request.status_code)
        .bind(&request.errors)
        .bind(request.retries)
        .bind(&request.response)
        .bind(request.id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Lightweight status-only transition.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn update_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: RequestId,
        status: RequestStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE requests SET status = $1, updated = NOW() WHERE id = $2")
            .bind(status.to_string())
            .bind(id)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Finds a request by its external uid.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_uid(&self, uid: &str) -> Result<Option<Request>> {
        let request = sqlx::query_as::<_, Request>(
            r"
            SELECT id, uid, batch_id, source, destination, content_type, body,
                   response, status, status_code, retries, errors,
                   frequency_type, period, day, week, month, year, msisdn,
                   raw_msg, facility, district, report_type, object_type,
                   extras, suspended, body_is_query_params, submission_id,
                   url_suffix, created, updated
            FROM requests
            WHERE uid = $1
            ",
        )
        .bind(uid)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(request)
    }

    /// Deletes a request by its external uid. Administrative operation; the
    /// dispatch engine never deletes rows.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete_by_uid(&self, uid: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM requests WHERE uid = $1")
            .bind(uid)
            .execute(&*self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Counts rows matching a rendered WHERE clause from the query builder.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_where(&self, where_clause: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM requests r WHERE {where_clause}");
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&*self.pool).await?;

        Ok(count)
    }

    /// Executes a query built by the query builder, wrapping each row with
    /// `ROW_TO_JSON` so projections come back as JSON objects verbatim.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn select_json(&self, query: &str) -> Result<Vec<serde_json::Value>> {
        let sql = format!("SELECT ROW_TO_JSON(s) FROM ({query}) s");
        let rows = sqlx::query_scalar::<_, serde_json::Value>(&sql)
            .fetch_all(&*self.pool)
            .await?;

        Ok(rows)
    }
}
