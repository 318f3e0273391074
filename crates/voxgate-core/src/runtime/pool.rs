//! Bounded offload of blocking engine and codec work.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{Error, Result};

/// Runs blocking jobs on tokio's blocking threads, at most `max_workers` at a time.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Jobs currently holding a worker slot.
    pub fn busy(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Run `job` off the async scheduler and wait for its result.
    ///
    /// The slot is held until the job returns, even if the caller stops waiting.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Worker("Worker pool is closed".to_string()))?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|err| Error::Worker(format!("Blocking job failed: {err}")))?
    }
}

/// Serializes calls into one engine unless the engine allows concurrent calls.
///
/// Enter the gate before taking a [`WorkerPool`] slot: requests queued behind a
/// busy engine then wait on the scheduler, not on a worker slot.
#[derive(Debug)]
pub struct EngineGate {
    name: String,
    exclusive: Option<Arc<Semaphore>>,
}

impl EngineGate {
    pub fn new(name: impl Into<String>, concurrent: bool) -> Self {
        Self {
            name: name.into(),
            exclusive: (!concurrent).then(|| Arc::new(Semaphore::new(1))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until the caller may use the engine. `None` when no exclusion is needed.
    ///
    /// The pass is owned so it can move into a blocking job.
    pub async fn enter(&self) -> Result<Option<OwnedSemaphorePermit>> {
        let Some(exclusive) = &self.exclusive else {
            return Ok(None);
        };
        let pass = exclusive
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Worker(format!("{} engine gate is closed", self.name)))?;
        debug!("Entered {} engine gate", self.name);
        Ok(Some(pass))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn track(active: &AtomicUsize, peak: &AtomicUsize) {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        active.fetch_sub(1, Ordering::SeqCst);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pool_bounds_concurrent_jobs() {
        let pool = WorkerPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    track(&active, &peak);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn job_errors_and_panics_are_reported() {
        let pool = WorkerPool::new(1);

        let err = pool
            .run(|| -> Result<()> { Err(Error::Inference("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Inference(_)));

        let err = pool
            .run(|| -> Result<()> { panic!("job exploded") })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Worker(_)));

        assert_eq!(pool.run(|| Ok(7)).await.unwrap(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exclusive_gate_serializes_callers() {
        let gate = Arc::new(EngineGate::new("tts", false));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let gate = gate.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let pass = gate.enter().await.unwrap();
                tokio::task::spawn_blocking(move || {
                    let _pass = pass;
                    track(&active, &peak);
                })
                .await
                .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_gate_does_not_lock() {
        let gate = EngineGate::new("stt", true);
        assert!(gate.enter().await.unwrap().is_none());
        assert_eq!(gate.name(), "stt");
    }
}
