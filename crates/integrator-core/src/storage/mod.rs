//! Database access layer implementing the repository pattern.
//!
//! Repositories translate between domain models and the `requests` /
//! `servers` tables. All database operations go through this module; the
//! listing API's generated queries are executed here as well so raw SQL
//! never leaks into handlers.

use std::sync::Arc;

use sqlx::PgPool;

pub mod requests;
pub mod servers;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for queued request operations.
    pub requests: Arc<requests::Repository>,

    /// Repository for destination server configuration.
    pub servers: Arc<servers::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            requests: Arc::new(requests::Repository::new(pool.clone())),
            servers: Arc::new(servers::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.requests.pool()).await?;

        Ok(())
    }
}
