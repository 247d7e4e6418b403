use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{HttpConfig, TlsVersion};
use crate::error::Result;

/// Thin wrapper around the process-wide `reqwest::Client`, tracking coarse
/// usage counters for introspection. `reqwest` pools TCP/TLS connections
/// internally (per-host idle caps, idle timeout, opportunistic HTTP/2); this
/// wrapper is the one place that builds that client so every provider shares
/// the same pool. `reqwest` has no knob for a process-wide connection cap
/// independent of per-host limits, so `global_max_idle` is enforced here with
/// an admission semaphore: a request call waits for a permit before it is
/// allowed onto the wire, capping total concurrent connections regardless of
/// how many distinct provider hosts are in use.
#[derive(Clone)]
pub struct ConnectionPool {
    client: reqwest::Client,
    admission: Arc<Semaphore>,
    issued: Arc<AtomicU64>,
    in_flight: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSnapshot {
    pub issued: u64,
    pub in_flight: u64,
}

impl ConnectionPool {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let min_tls_version = match config.min_tls_version {
            TlsVersion::Tls12 => reqwest::tls::Version::TLS_1_2,
            TlsVersion::Tls13 => reqwest::tls::Version::TLS_1_3,
        };

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .timeout(config.request_timeout)
            .connect_timeout(config.tls_handshake_timeout)
            .min_tls_version(min_tls_version)
            .build()
            .map_err(|e| crate::error::AnalysisError::Transport { attempts: 0, source: e })?;

        Ok(Self {
            client,
            admission: Arc::new(Semaphore::new(config.global_max_idle.max(1))),
            issued: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Waits for a global admission slot, then marks one connection issued
    /// and in flight. The returned guard releases both the slot and the
    /// in-flight count when dropped.
    pub(crate) async fn guard(&self) -> InFlightGuard {
        let permit = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");
        self.issued.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { in_flight: Arc::clone(&self.in_flight), _permit: permit }
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            issued: self.issued.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }

    /// `reqwest` has no public handle for evicting idle connections early;
    /// rebuilding the client is the only way to drop its pool deterministically
    /// on shutdown, so this replaces the inner client with a fresh one sharing
    /// the same configuration-derived builder settings.
    pub fn close_idle(&mut self, config: &HttpConfig) -> Result<()> {
        *self = Self::new(config)?;
        Ok(())
    }
}

pub(crate) struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_with_global_cap(cap: usize) -> HttpConfig {
        HttpConfig { global_max_idle: cap, ..HttpConfig::default() }
    }

    #[tokio::test]
    async fn admission_blocks_beyond_global_cap_until_a_permit_is_released() {
        let pool = ConnectionPool::new(&config_with_global_cap(1)).unwrap();

        let first = pool.guard().await;
        assert_eq!(pool.snapshot().in_flight, 1);

        let pool2 = pool.clone();
        let second_acquired = tokio::spawn(async move {
            let _second = pool2.guard().await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!second_acquired.is_finished());

        drop(first);
        second_acquired.await.unwrap();
        assert_eq!(pool.snapshot().in_flight, 0);
    }

    #[tokio::test]
    async fn snapshot_tracks_issued_and_in_flight() {
        let pool = ConnectionPool::new(&config_with_global_cap(4)).unwrap();
        let guard_a = pool.guard().await;
        let guard_b = pool.guard().await;
        let snap = pool.snapshot();
        assert_eq!(snap.issued, 2);
        assert_eq!(snap.in_flight, 2);

        drop(guard_a);
        drop(guard_b);
        assert_eq!(pool.snapshot().in_flight, 0);
    }
}
