//! Single-slot admission gate.
//!
//! At most one [`AdmissionToken`] exists at any instant. Callers poll with a
//! short per-attempt timeout and sleep a fixed backoff between attempts, so a
//! waiter is eventually served but never queued: there is no FIFO ordering
//! between waiters, and a request that keeps losing the race can wait
//! indefinitely. There is no overall deadline either; bounding total wait is
//! the caller's job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::config::GateConfig;
use crate::metrics::Metrics;

/// The gate was occupied for the whole attempt.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("server is busy")]
pub struct Busy;

static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one [`AdmissionGate`], carried by every token it issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateId(u64);

#[derive(Debug, Default)]
struct GateCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Exclusive right to run one generation or swap.
///
/// Released exactly once, when dropped.
pub struct AdmissionToken {
    _permit: OwnedSemaphorePermit,
    gate: GateId,
    counters: Arc<GateCounters>,
    metrics: Arc<Metrics>,
    acquired_at: Instant,
}

impl AdmissionToken {
    /// How long this token has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// The gate that issued this token.
    pub fn gate_id(&self) -> GateId {
        self.gate
    }
}

impl std::fmt::Debug for AdmissionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionToken")
            .field("gate", &self.gate)
            .field("held_for", &self.held_for())
            .finish()
    }
}

impl Drop for AdmissionToken {
    fn drop(&mut self) {
        self.counters.released.fetch_add(1, Ordering::SeqCst);
        self.metrics.gate_held.set(0);
        debug!(held_ms = self.acquired_at.elapsed().as_millis() as u64, "Gate released");
    }
}

pub struct AdmissionGate {
    id: GateId,
    slot: Arc<Semaphore>,
    counters: Arc<GateCounters>,
    metrics: Arc<Metrics>,
    poll_timeout: Duration,
    backoff: Duration,
}

impl AdmissionGate {
    pub fn new(config: &GateConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            id: GateId(NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed)),
            slot: Arc::new(Semaphore::new(1)),
            counters: Arc::new(GateCounters::default()),
            metrics,
            poll_timeout: config.poll_timeout(),
            backoff: config.backoff(),
        }
    }

    pub fn id(&self) -> GateId {
        self.id
    }

    /// One acquisition attempt bounded by `timeout`.
    pub async fn try_acquire(&self, timeout: Duration) -> Result<AdmissionToken, Busy> {
        match tokio::time::timeout(timeout, self.slot.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(self.issue(permit)),
            // The semaphore is never closed; treat it like a lost race.
            Ok(Err(_)) | Err(_) => Err(Busy),
        }
    }

    /// Poll until the gate is acquired.
    pub async fn acquire(&self) -> AdmissionToken {
        let started = Instant::now();
        loop {
            match self.try_acquire(self.poll_timeout).await {
                Ok(token) => {
                    self.metrics
                        .gate_wait_seconds
                        .observe(started.elapsed().as_secs_f64());
                    return token;
                }
                Err(Busy) => {
                    self.metrics.busy_polls.inc();
                    info!("Server is busy");
                    tokio::time::sleep(self.backoff).await;
                }
            }
        }
    }

    /// Whether a token is currently outstanding.
    pub fn is_held(&self) -> bool {
        self.slot.available_permits() == 0
    }

    pub fn acquired_count(&self) -> u64 {
        self.counters.acquired.load(Ordering::SeqCst)
    }

    pub fn released_count(&self) -> u64 {
        self.counters.released.load(Ordering::SeqCst)
    }

    fn issue(&self, permit: OwnedSemaphorePermit) -> AdmissionToken {
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        self.metrics.gate_held.set(1);
        debug!("Gate acquired");
        AdmissionToken {
            _permit: permit,
            gate: self.id,
            counters: self.counters.clone(),
            metrics: self.metrics.clone(),
            acquired_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_gate() -> AdmissionGate {
        let config = GateConfig {
            poll_timeout_ms: 5,
            backoff_ms: 5,
        };
        AdmissionGate::new(&config, Arc::new(Metrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_second_try_acquire_is_busy() {
        let gate = fast_gate();
        let token = gate.try_acquire(Duration::from_millis(5)).await.unwrap();
        assert!(gate.is_held());

        let second = gate.try_acquire(Duration::from_millis(5)).await;
        assert_eq!(second.unwrap_err(), Busy);

        drop(token);
        assert!(!gate.is_held());
        assert!(gate.try_acquire(Duration::from_millis(5)).await.is_ok());
    }

    #[tokio::test]
    async fn test_tokens_carry_their_gate_id() {
        let first = fast_gate();
        let second = fast_gate();
        assert_ne!(first.id(), second.id());

        let token = first.acquire().await;
        assert_eq!(token.gate_id(), first.id());
        assert_ne!(token.gate_id(), second.id());
    }

    #[tokio::test]
    async fn test_release_counted_once_per_acquire() {
        let gate = fast_gate();
        for _ in 0..3 {
            let token = gate.acquire().await;
            drop(token);
        }
        assert_eq!(gate.acquired_count(), 3);
        assert_eq!(gate.released_count(), 3);
    }

    #[tokio::test]
    async fn test_waiter_served_after_release() {
        let gate = Arc::new(fast_gate());
        let token = gate.acquire().await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _token = gate.acquire().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        drop(token);
        waiter.await.unwrap();
        assert_eq!(gate.released_count(), 2);
        assert!(gate.metrics.busy_polls.get() >= 1);
    }
}
