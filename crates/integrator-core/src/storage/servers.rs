//! Repository for destination server configuration.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{Server, ServerId},
};

const SERVER_COLUMNS: &str = r"id, uid, name, username, password, auth_token, auth_method, url,
       http_method, cc_urls, callback_url, allow_callbacks, allow_copies,
       use_async, use_ssl, parse_responses, suspended,
       start_submission_period, end_submission_period, url_params,
       created, updated";

/// Repository for server rows.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Loads every configured destination, used to build the in-memory
    /// snapshot at startup and on explicit reload.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn load_all(&self) -> Result<Vec<Server>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM servers");
        let servers = sqlx::query_as::<_, Server>(&sql).fetch_all(&*self.pool).await?;

        Ok(servers)
    }

    /// Resolves a server name to its identity; used by ingest to map the
    /// `source`/`destination` query parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_id_by_name(&self, name: &str) -> Result<Option<ServerId>> {
        let id = sqlx::query_scalar::<_, ServerId>("SELECT id FROM servers WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(id)
    }
}
