//! Connection pooling for store clients.
//!
//! Pools are keyed by (side, resource URI) so every component of one
//! replica talking to the same member shares a client and a bounded
//! concurrency budget.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::Result;

/// Key identifying one pooled client: (side, resource URI).
pub type PoolKey = (String, String);

struct PoolEntry {
    client: Client,
    permits: Arc<Semaphore>,
}

/// Pool of HTTP clients, one per (side, resource URI) pair.
pub struct ConnectionPool {
    entries: DashMap<PoolKey, PoolEntry>,
    max_connections: usize,
    connect_timeout: Duration,
}

/// A client checked out of the pool.
///
/// Holds one concurrency permit for its key; dropping the connection
/// returns the permit.
#[derive(Debug)]
pub struct PooledConnection {
    client: Client,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// The underlying HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl ConnectionPool {
    pub fn new(max_connections: usize, connect_timeout: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_connections,
            connect_timeout,
        }
    }

    /// Check a client out of the pool, waiting when the key is at its
    /// concurrency limit.
    pub async fn acquire(&self, side: &str, resource: &str) -> Result<PooledConnection> {
        let key = (side.to_string(), resource.to_string());

        loop {
            let (client, permits) = {
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_try_insert_with(|| self.build_entry())?;
                (entry.client.clone(), Arc::clone(&entry.permits))
            };

            match permits.acquire_owned().await {
                Ok(permit) => {
                    return Ok(PooledConnection {
                        client,
                        _permit: permit,
                    })
                }
                // The entry was recycled while we waited. Re-enter with
                // a fresh one.
                Err(_) => continue,
            }
        }
    }

    /// Drop pooled clients with nothing checked out.
    pub fn recycle_idle(&self) {
        self.entries.retain(|_, entry| {
            if entry.permits.available_permits() == self.max_connections {
                entry.permits.close();
                false
            } else {
                true
            }
        });
    }

    /// Number of distinct keys currently pooled.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    fn build_entry(&self) -> Result<PoolEntry> {
        let client = Client::builder()
            .connect_timeout(self.connect_timeout)
            .build()?;
        tracing::debug!(max_connections = self.max_connections, "pooled client created");
        Ok(PoolEntry {
            client,
            permits: Arc::new(Semaphore::new(self.max_connections)),
        })
    }
}
