//! Tenant resource pool with LRU and TTL eviction.
//!
//! Multiplexes many tenants onto at most `max_instances` live backend
//! instances. Entries are kept in recency order (least-recently-used first),
//! and every mutation, including the hit path's touch, runs under one async
//! mutex so that check-then-create is never split:
//!
//! ```text
//! get(tenant)
//!     │
//!     ├─► hit  → move to tail, refresh last_used_at, return handle
//!     └─► miss → while full: pop head, close it
//!                create(tenant) → push tail → return handle
//! ```
//!
//! The guard only covers bookkeeping. Callers use the returned handle after
//! the guard is released, and several workers may share one tenant's handle.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backend::{BackendFactory, BackendHandle};
use crate::error::BackendError;

/// Pool sizing and expiry.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live backend instances
    pub max_instances: usize,
    /// Idle time after which an instance may be reaped
    pub ttl: Duration,
    /// Upper bound on a single backend close
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_instances: 10,
            ttl: Duration::from_secs(300),
            close_timeout: Duration::from_secs(30),
        }
    }
}

/// A live backend instance and its usage timestamps.
pub struct PooledInstance {
    pub tenant_id: String,
    pub handle: BackendHandle,
    pub created_at: Instant,
    pub last_used_at: Instant,
}

impl PooledInstance {
    fn new(tenant_id: String, handle: BackendHandle) -> Self {
        let now = Instant::now();
        Self {
            tenant_id,
            handle,
            created_at: now,
            last_used_at: now,
        }
    }

    /// True while a caller still holds a handle obtained from `get`.
    pub fn in_use(&self) -> bool {
        Arc::strong_count(&self.handle) > 1
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }
}

/// Snapshot of the pool for logging and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub active_instances: usize,
    pub max_instances: usize,
    pub ttl_seconds: u64,
    /// Tenants from least to most recently used
    pub tenants: Vec<String>,
}

/// Bounded, recency-ordered pool of tenant backend instances.
pub struct TenantPool {
    factory: Arc<dyn BackendFactory>,
    config: PoolConfig,
    instances: Mutex<IndexMap<String, PooledInstance>>,
}

impl TenantPool {
    pub fn new(factory: Arc<dyn BackendFactory>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            instances: Mutex::new(IndexMap::new()),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Get the tenant's backend handle, creating it on a miss.
    ///
    /// A construction failure is returned to the caller and the tenant is
    /// not added.
    pub async fn get(&self, tenant_id: &str) -> Result<BackendHandle, BackendError> {
        let mut instances = self.instances.lock().await;

        if let Some(index) = instances.get_index_of(tenant_id) {
            let tail = instances.len() - 1;
            instances.move_index(index, tail);
            if let Some((_, entry)) = instances.get_index_mut(tail) {
                entry.last_used_at = entry.last_used_at.max(Instant::now());
                debug!(tenant_id = %tenant_id, "reusing backend instance");
                return Ok(entry.handle.clone());
            }
        }

        while instances.len() >= self.config.max_instances.max(1) {
            let Some((evicted_id, evicted)) = instances.shift_remove_index(0) else {
                break;
            };
            info!(tenant_id = %evicted_id, reason = "capacity", "evicting backend instance");
            self.close_instance(evicted).await;
        }

        info!(tenant_id = %tenant_id, "creating backend instance");
        let handle = self.factory.create(tenant_id).await?;
        instances.insert(
            tenant_id.to_string(),
            PooledInstance::new(tenant_id.to_string(), handle.clone()),
        );

        Ok(handle)
    }

    /// Close and remove a tenant's instance. No-op when absent.
    pub async fn release(&self, tenant_id: &str) {
        let mut instances = self.instances.lock().await;

        if let Some(instance) = instances.shift_remove(tenant_id) {
            info!(tenant_id = %tenant_id, reason = "released", "evicting backend instance");
            self.close_instance(instance).await;
        }
    }

    /// Close every instance idle for longer than the TTL.
    ///
    /// Instances whose handle is still held by an in-flight caller are kept
    /// until a later sweep. Returns the number of instances removed.
    pub async fn evict_expired(&self) -> usize {
        let mut instances = self.instances.lock().await;
        let now = Instant::now();

        let expired: Vec<String> = instances
            .values()
            .filter(|entry| entry.idle_for(now) > self.config.ttl)
            .filter(|entry| {
                if entry.in_use() {
                    debug!(tenant_id = %entry.tenant_id, "expired instance still in use, keeping");
                    return false;
                }
                true
            })
            .map(|entry| entry.tenant_id.clone())
            .collect();

        for tenant_id in &expired {
            if let Some(instance) = instances.shift_remove(tenant_id) {
                info!(
                    tenant_id = %tenant_id,
                    idle_secs = instance.idle_for(now).as_secs(),
                    reason = "expired",
                    "evicting backend instance"
                );
                self.close_instance(instance).await;
            }
        }

        expired.len()
    }

    /// Close every instance. Used on shutdown.
    pub async fn close_all(&self) {
        let mut instances = self.instances.lock().await;
        info!(count = instances.len(), "closing all backend instances");

        for (_, instance) in instances.drain(..) {
            self.close_instance(instance).await;
        }

        info!("all backend instances closed");
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }

    pub async fn contains(&self, tenant_id: &str) -> bool {
        self.instances.lock().await.contains_key(tenant_id)
    }

    pub async fn stats(&self) -> PoolStats {
        let instances = self.instances.lock().await;
        PoolStats {
            active_instances: instances.len(),
            max_instances: self.config.max_instances,
            ttl_seconds: self.config.ttl.as_secs(),
            tenants: instances.keys().cloned().collect(),
        }
    }

    /// Close an instance that has already been removed from the map.
    /// Failures and timeouts are logged, never returned.
    async fn close_instance(&self, instance: PooledInstance) {
        let tenant_id = instance.tenant_id;
        match tokio::time::timeout(self.config.close_timeout, instance.handle.close()).await {
            Ok(Ok(())) => debug!(tenant_id = %tenant_id, "backend instance closed"),
            Ok(Err(e)) => {
                warn!(tenant_id = %tenant_id, error = %e, "error closing backend instance")
            }
            Err(_) => {
                let e = BackendError::CloseTimeout {
                    secs: self.config.close_timeout.as_secs(),
                };
                warn!(tenant_id = %tenant_id, error = %e, "error closing backend instance")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackendFactory;

    fn pool(factory: &Arc<MockBackendFactory>, max_instances: usize, ttl_secs: u64) -> TenantPool {
        TenantPool::new(
            factory.clone(),
            PoolConfig {
                max_instances,
                ttl: Duration::from_secs(ttl_secs),
                close_timeout: Duration::from_secs(1),
            },
        )
    }

    #[tokio::test]
    async fn test_hit_reuses_instance() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 2, 300);

        let first = pool.get("a").await.unwrap();
        let second = pool.get("a").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(factory.create_count("a"), 1);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_used() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 2, 300);

        pool.get("A").await.unwrap();
        pool.get("B").await.unwrap();
        pool.get("A").await.unwrap();
        pool.get("C").await.unwrap();

        assert!(pool.contains("A").await);
        assert!(!pool.contains("B").await);
        assert!(pool.contains("C").await);
        assert_eq!(factory.closed_tenants(), vec!["B".to_string()]);
        assert_eq!(pool.stats().await.tenants, vec!["A".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 3, 300);

        for i in 0..20 {
            let tenant = format!("t{}", i % 7);
            pool.get(&tenant).await.unwrap();
            assert!(pool.len().await <= 3);
        }
    }

    #[tokio::test]
    async fn test_create_failure_not_inserted() {
        let factory = Arc::new(MockBackendFactory::new().fail_create_for("bad"));
        let pool = pool(&factory, 2, 300);

        let err = pool.get("bad").await.err().unwrap();
        assert!(matches!(err, BackendError::Unavailable(_)));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_failure_does_not_block_eviction() {
        let factory = Arc::new(MockBackendFactory::new().fail_close());
        let pool = pool(&factory, 1, 300);

        pool.get("a").await.unwrap();
        pool.get("b").await.unwrap();

        assert!(!pool.contains("a").await);
        assert!(pool.contains("b").await);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 2, 300);

        pool.get("a").await.unwrap();
        pool.release("a").await;
        pool.release("a").await;
        pool.release("never-seen").await;

        assert!(pool.is_empty().await);
        assert_eq!(factory.closed_tenants(), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 5, 300);

        drop(pool.get("stale").await.unwrap());
        drop(pool.get("fresh").await.unwrap());

        tokio::time::advance(Duration::from_secs(200)).await;
        drop(pool.get("fresh").await.unwrap());
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(pool.evict_expired().await, 1);
        assert!(!pool.contains("stale").await);
        assert!(pool.contains("fresh").await);
        assert_eq!(factory.closed_tenants(), vec!["stale".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_skips_in_use_instance() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 5, 60);

        let held = pool.get("busy").await.unwrap();
        tokio::time::advance(Duration::from_secs(120)).await;

        assert_eq!(pool.evict_expired().await, 0);
        assert!(pool.contains("busy").await);

        drop(held);
        assert_eq!(pool.evict_expired().await, 1);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_misses_create_once() {
        let factory = Arc::new(
            MockBackendFactory::new().with_create_delay(Duration::from_millis(20)),
        );
        let pool = Arc::new(pool(&factory, 4, 300));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.get("shared").await }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(factory.create_count("shared"), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_for_distinct_tenants_respect_capacity() {
        let factory = Arc::new(
            MockBackendFactory::new().with_create_delay(Duration::from_millis(10)),
        );
        let pool = Arc::new(pool(&factory, 3, 300));

        let mut handles = Vec::new();
        for i in 0..12 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let handle = pool.get(&format!("tenant-{}", i)).await.unwrap();
                let len = pool.len().await;
                (handle.tenant_id().to_string(), len)
            }));
        }

        for handle in handles {
            let (_, len) = handle.await.unwrap();
            assert!(len <= 3);
        }

        assert_eq!(pool.len().await, 3);
        assert_eq!(factory.total_creates(), 12);
        assert_eq!(factory.closed_tenants().len(), 12 - 3);
    }

    #[tokio::test]
    async fn test_close_all() {
        let factory = Arc::new(MockBackendFactory::new());
        let pool = pool(&factory, 3, 300);

        pool.get("a").await.unwrap();
        pool.get("b").await.unwrap();
        pool.close_all().await;

        assert!(pool.is_empty().await);
        let mut closed = factory.closed_tenants();
        closed.sort();
        assert_eq!(closed, vec!["a".to_string(), "b".to_string()]);
    }
}
