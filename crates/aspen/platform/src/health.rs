//! Connection health checks with a bounded TTL cache.
//!
//! The cache is an explicitly constructed service owned by whoever builds
//! the engine, not module-global state. Entries expire after the TTL
//! (about five minutes by default) to bound the probe load added to
//! platform APIs.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

use aspen_types::{Connection, ConnectionId};

use crate::client::PlatformClient;

/// Result of a connection health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub reason: Option<String>,
}

impl HealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: None,
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
        }
    }
}

struct CachedHealth {
    status: HealthStatus,
    checked_at: Instant,
}

/// TTL-cached health checks for platform connections.
pub struct HealthService {
    cache: DashMap<ConnectionId, CachedHealth>,
    ttl: Duration,
}

impl HealthService {
    /// Service with the default five-minute TTL.
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(300))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            ttl,
        }
    }

    /// Check a connection, consulting the cache first.
    ///
    /// A connection is healthy when it is active, carries a credential, and
    /// the platform responds to the client's probe call.
    pub async fn check(
        &self,
        connection: &Connection,
        client: &dyn PlatformClient,
    ) -> HealthStatus {
        if let Some(cached) = self.cache.get(&connection.id) {
            if cached.checked_at.elapsed() < self.ttl {
                debug!(connection_id = %connection.id, "health check cache hit");
                return cached.status.clone();
            }
        }

        let status = self.probe(connection, client).await;
        self.cache.insert(
            connection.id.clone(),
            CachedHealth {
                status: status.clone(),
                checked_at: Instant::now(),
            },
        );
        status
    }

    async fn probe(&self, connection: &Connection, client: &dyn PlatformClient) -> HealthStatus {
        if !connection.active {
            return HealthStatus::unhealthy("connection is not active");
        }
        if connection.credential_ref.is_none() {
            return HealthStatus::unhealthy("connection has no credential");
        }
        match client.health_check(connection).await {
            Ok(status) => status,
            Err(e) => HealthStatus::unhealthy(format!("probe failed: {}", e)),
        }
    }

    /// Drop a cached entry (e.g. after a credential refresh).
    pub fn invalidate(&self, connection_id: &ConnectionId) {
        self.cache.remove(connection_id);
    }

    /// Number of cached entries.
    pub fn cached_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for HealthService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryPlatform;
    use aspen_types::{Provider, WorkspaceId};

    fn connection(active: bool, credential: bool) -> Connection {
        Connection {
            id: ConnectionId::generate(),
            workspace_id: WorkspaceId::generate(),
            provider: Provider::Meta,
            active,
            credential_ref: credential.then(|| "vault://meta/123".to_string()),
        }
    }

    #[tokio::test]
    async fn test_healthy_connection() {
        let service = HealthService::new();
        let client = InMemoryPlatform::new(Provider::Meta);
        let status = service.check(&connection(true, true), &client).await;
        assert!(status.healthy);
    }

    #[tokio::test]
    async fn test_inactive_connection_unhealthy() {
        let service = HealthService::new();
        let client = InMemoryPlatform::new(Provider::Meta);
        let status = service.check(&connection(false, true), &client).await;
        assert!(!status.healthy);
        assert!(status.reason.unwrap().contains("not active"));
    }

    #[tokio::test]
    async fn test_missing_credential_unhealthy() {
        let service = HealthService::new();
        let client = InMemoryPlatform::new(Provider::Meta);
        let status = service.check(&connection(true, false), &client).await;
        assert!(!status.healthy);
        assert!(status.reason.unwrap().contains("credential"));
    }

    #[tokio::test]
    async fn test_probe_failure_is_unhealthy_not_error() {
        let service = HealthService::new();
        let client = InMemoryPlatform::new(Provider::Meta);
        client.set_probe_healthy(false);
        let status = service.check(&connection(true, true), &client).await;
        assert!(!status.healthy);
    }

    #[tokio::test]
    async fn test_cache_serves_within_ttl() {
        let service = HealthService::with_ttl(Duration::from_secs(300));
        let client = InMemoryPlatform::new(Provider::Meta);
        let conn = connection(true, true);

        let first = service.check(&conn, &client).await;
        assert!(first.healthy);

        // Flip the probe; the cached healthy result is still served.
        client.set_probe_healthy(false);
        let second = service.check(&conn, &client).await;
        assert!(second.healthy);

        // Invalidation forces a fresh probe.
        service.invalidate(&conn.id);
        let third = service.check(&conn, &client).await;
        assert!(!third.healthy);
    }

    #[tokio::test]
    async fn test_zero_ttl_always_probes() {
        let service = HealthService::with_ttl(Duration::from_secs(0));
        let client = InMemoryPlatform::new(Provider::Meta);
        let conn = connection(true, true);

        assert!(service.check(&conn, &client).await.healthy);
        client.set_probe_healthy(false);
        assert!(!service.check(&conn, &client).await.healthy);
    }
}
