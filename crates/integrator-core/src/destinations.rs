//! In-memory snapshot of destination configuration.
//!
//! Destinations are read-mostly reference data: loaded once at startup,
//! consulted by every worker on every delivery, and refreshed only by an
//! explicit [`Destinations::reload`]. The snapshot is an owned, injectable
//! value handed to the engine at construction — there is no process-global
//! registry.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::{
    error::Result,
    models::{Server, ServerId},
    storage::Storage,
};

/// Read-mostly lookup of destination servers keyed by identity.
pub struct Destinations {
    inner: RwLock<HashMap<ServerId, Server>>,
}

impl Destinations {
    /// Builds a snapshot from an already-loaded server list.
    pub fn from_servers(servers: Vec<Server>) -> Self {
        let map = servers.into_iter().map(|s| (s.id, s)).collect();
        Self { inner: RwLock::new(map) }
    }

    /// Loads the snapshot from storage.
    ///
    /// # Errors
    ///
    /// Returns error if the server table cannot be read.
    pub async fn load(storage: &Storage) -> Result<Self> {
        let servers = storage.servers.load_all().await?;
        tracing::info!(server_count = servers.len(), "loaded destination snapshot");
        Ok(Self::from_servers(servers))
    }

    /// Replaces the snapshot with the current table contents.
    ///
    /// # Errors
    ///
    /// Returns error if the server table cannot be read; the previous
    /// snapshot stays in place on failure.
    pub async fn reload(&self, storage: &Storage) -> Result<usize> {
        let servers = storage.servers.load_all().await?;
        let count = servers.len();
        let map: HashMap<ServerId, Server> = servers.into_iter().map(|s| (s.id, s)).collect();
        *self.inner.write().await = map;
        tracing::info!(server_count = count, "reloaded destination snapshot");
        Ok(count)
    }

    /// Looks up a destination by identity, cloning the configuration so the
    /// caller never holds the snapshot lock across a delivery.
    pub async fn get(&self, id: ServerId) -> Option<Server> {
        self.inner.read().await.get(&id).cloned()
    }

    /// Number of configured destinations.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// True when no destinations are configured.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::models::AuthMethod;

    fn server(id: i64, name: &str) -> Server {
        Server {
            id: ServerId(id),
            uid: format!("Srv{id:08}"),
            name: name.to_string(),
            username: String::new(),
            password: String::new(),
            auth_token: String::new(),
            auth_method: AuthMethod::Basic,
            url: "http://localhost/api".to_string(),
            http_method: "POST".to_string(),
            cc_urls: Vec::new(),
            callback_url: String::new(),
            allow_callbacks: false,
            allow_copies: false,
            use_async: false,
            use_ssl: false,
            parse_responses: false,
            suspended: false,
            start_submission_period: 0,
            end_submission_period: 23,
            url_params: sqlx::types::Json(HashMap::new()),
            created: Utc::now(),
            updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn snapshot_lookup_by_identity() {
        let destinations =
            Destinations::from_servers(vec![server(1, "dhis2"), server(2, "mirror")]);

        assert_eq!(destinations.len().await, 2);
        assert_eq!(destinations.get(ServerId(1)).await.map(|s| s.name), Some("dhis2".into()));
        assert!(destinations.get(ServerId(9)).await.is_none());
    }
}
