//! Bounded worker pool for resolving candidates in parallel.
//!
//! A document typically yields a handful of independent candidates; the
//! runtime resolves them concurrently on a fixed set of threads fed by a
//! bounded queue. A full queue is reported to the caller instead of blocking.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity::CandidateEntity;
use crate::error::{ExecutionError, ResolveError, ResolveResult, ValidationError};
use crate::mapping::MappingResult;
use crate::resolution::Resolver;
use crate::TARGET_RESOLVER;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued candidates.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Checks the configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if either value is zero.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "workers must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(self)
    }
}

enum Job {
    Resolve {
        candidate: CandidateEntity,
        reply: Sender<ResolveResult<MappingResult>>,
    },

    #[cfg(test)]
    Block {
        started: Sender<()>,
        release: Receiver<()>,
    },
}

struct WorkerPool {
    tx: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    fn start(resolver: &Resolver, config: &RuntimeConfig) -> ResolveResult<Self> {
        let (tx, rx) = bounded::<Job>(config.queue_capacity);

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            let rx: Receiver<Job> = rx.clone();
            let resolver = resolver.clone();
            let handle = thread::Builder::new()
                .name(format!("resolver-worker-{idx}"))
                .spawn(move || work(&resolver, &rx))
                .map_err(|e| ResolveError::internal(format!("failed to spawn resolver worker: {e}")))?;
            workers.push(handle);
        }

        Ok(Self {
            tx,
            workers,
            queue_capacity: config.queue_capacity,
        })
    }

    fn try_submit(&self, job: Job) -> ResolveResult<()> {
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ExecutionError::QueueFull {
                capacity: self.queue_capacity,
            }
            .into()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutionError::Disconnected.into()),
        }
    }

    fn submit_blocking(&self, job: Job) -> ResolveResult<()> {
        self.tx
            .send(job)
            .map_err(|_| ExecutionError::Disconnected.into())
    }

    fn shutdown(self) {
        // Closing the channel lets workers drain queued jobs, then exit.
        drop(self.tx);
        for handle in self.workers {
            let _ = handle.join();
        }
    }
}

fn work(resolver: &Resolver, rx: &Receiver<Job>) {
    while let Ok(job) = rx.recv() {
        match job {
            Job::Resolve { candidate, reply } => {
                let _ = reply.send(resolver.resolve(candidate));
            }

            #[cfg(test)]
            Job::Block { started, release } => {
                let _ = started.send(());
                let _ = release.recv();
            }
        }
    }
}

/// Pending result of a submitted candidate.
#[derive(Debug)]
pub struct ResolutionHandle {
    rx: Receiver<ResolveResult<MappingResult>>,
}

impl ResolutionHandle {
    /// Waits for the result.
    ///
    /// # Errors
    /// The resolution's own error, or `Disconnected` if the worker went away.
    pub fn join(self) -> ResolveResult<MappingResult> {
        self.rx
            .recv()
            .map_err(|_| ResolveError::from(ExecutionError::Disconnected))?
    }

    /// Waits for the result at most `timeout`.
    ///
    /// # Errors
    /// As [`join`](Self::join), plus `Timeout`.
    pub fn join_timeout(self, timeout: Duration) -> ResolveResult<MappingResult> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ResolveError::from(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => ResolveError::from(ExecutionError::Disconnected),
        })?
    }
}

/// Thread pool running a [`Resolver`].
///
/// Dropping the runtime finishes every queued candidate, then joins the
/// workers.
pub struct ResolverRuntime {
    resolver: Resolver,
    pool: Option<WorkerPool>,
}

impl std::fmt::Debug for ResolverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverRuntime")
            .field("workers", &self.pool.as_ref().map_or(0, |p| p.workers.len()))
            .finish_non_exhaustive()
    }
}

impl ResolverRuntime {
    /// Starts the workers.
    ///
    /// # Errors
    /// - Validation error for an invalid configuration
    /// - `Internal` if a worker thread cannot be spawned
    pub fn new(resolver: Resolver, config: RuntimeConfig) -> ResolveResult<Self> {
        let config = config.validate()?;
        let pool = WorkerPool::start(&resolver, &config)?;
        info!(
            target: TARGET_RESOLVER,
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "resolver runtime started"
        );
        Ok(Self {
            resolver,
            pool: Some(pool),
        })
    }

    /// The resolver the workers run.
    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    fn pool(&self) -> ResolveResult<&WorkerPool> {
        self.pool
            .as_ref()
            .ok_or_else(|| ExecutionError::Disconnected.into())
    }

    /// Queues a candidate without waiting.
    ///
    /// # Errors
    /// `QueueFull` when the queue is at capacity.
    pub fn submit(&self, candidate: CandidateEntity) -> ResolveResult<ResolutionHandle> {
        let (reply, rx) = bounded(1);
        self.pool()?.try_submit(Job::Resolve { candidate, reply })?;
        Ok(ResolutionHandle { rx })
    }

    /// Resolves a batch, returning one result per candidate in input order.
    ///
    /// Waits for queue space rather than failing, so batches may exceed the
    /// queue capacity.
    pub fn resolve_batch(&self, candidates: Vec<CandidateEntity>) -> Vec<ResolveResult<MappingResult>> {
        let count = candidates.len();
        let handles: Vec<ResolveResult<ResolutionHandle>> = candidates
            .into_iter()
            .map(|candidate| {
                let (reply, rx) = bounded(1);
                self.pool()?
                    .submit_blocking(Job::Resolve { candidate, reply })?;
                Ok(ResolutionHandle { rx })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.and_then(ResolutionHandle::join))
            .collect();
        debug!(
            target: TARGET_RESOLVER,
            candidates = count,
            failed = results.iter().filter(|r| r.is_err()).count(),
            "batch resolved"
        );
        results
    }

    #[cfg(test)]
    fn submit_block(&self) -> ResolveResult<(Receiver<()>, Sender<()>)> {
        let (started_tx, started_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        self.pool()?.try_submit(Job::Block {
            started: started_tx,
            release: release_rx,
        })?;
        Ok((started_rx, release_tx))
    }
}

impl Drop for ResolverRuntime {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::entity::{ContactInfo, Entity, EntityType};
    use crate::mapping::ResolutionOutcome;
    use crate::storage::{EntityStore, InMemoryEntityStore};

    fn resolver() -> Resolver {
        let store = InMemoryEntityStore::new();
        store
            .create(
                Entity::with_id("E1", "Acme Corp", EntityType::Company)
                    .with_contact(ContactInfo::phone("8885646546")),
            )
            .unwrap();
        store
            .create(Entity::with_id("E2", "Bennett Logistics", EntityType::Company))
            .unwrap();
        Resolver::new(Arc::new(store))
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        let config = RuntimeConfig {
            workers: 0,
            ..RuntimeConfig::default()
        };
        assert!(ResolverRuntime::new(resolver(), config).unwrap_err().is_validation());
    }

    #[test]
    fn test_batch_preserves_order() {
        let runtime = ResolverRuntime::new(
            resolver(),
            RuntimeConfig {
                workers: 3,
                queue_capacity: 2,
            },
        )
        .unwrap();

        let results = runtime.resolve_batch(vec![
            CandidateEntity::company("Bennett Logistics"),
            CandidateEntity::company(""),
            CandidateEntity::company("Zephyr Lines"),
            CandidateEntity::company("Acme Corp"),
            CandidateEntity::company("Bennett Logistics"),
        ]);

        assert_eq!(results.len(), 5);
        assert_eq!(results[0].as_ref().unwrap().mapped_entity_id.as_ref().unwrap().as_str(), "E2");
        assert!(results[1].as_ref().unwrap_err().is_validation());
        assert_eq!(results[2].as_ref().unwrap().outcome, ResolutionOutcome::NoMatch);
        assert_eq!(results[3].as_ref().unwrap().mapped_entity_id.as_ref().unwrap().as_str(), "E1");
        assert_eq!(results[4].as_ref().unwrap().mapped_entity_id.as_ref().unwrap().as_str(), "E2");
    }

    #[test]
    fn test_full_queue_is_reported() {
        let runtime = ResolverRuntime::new(
            resolver(),
            RuntimeConfig {
                workers: 1,
                queue_capacity: 1,
            },
        )
        .unwrap();

        // Occupy the only worker, then fill the queue.
        let (started, release) = runtime.submit_block().unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();
        let queued = runtime.submit(CandidateEntity::company("Acme Corp")).unwrap();

        let err = runtime
            .submit(CandidateEntity::company("Bennett Logistics"))
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Execution(ExecutionError::QueueFull { capacity: 1 })
        ));
        assert!(err.is_retryable());

        release.send(()).unwrap();
        assert!(queued.join_timeout(Duration::from_secs(5)).unwrap().is_mapped());
    }

    #[test]
    fn test_join_timeout_while_worker_busy() {
        let runtime = ResolverRuntime::new(
            resolver(),
            RuntimeConfig {
                workers: 1,
                queue_capacity: 4,
            },
        )
        .unwrap();
        let (started, release) = runtime.submit_block().unwrap();
        started.recv_timeout(Duration::from_secs(5)).unwrap();

        let handle = runtime.submit(CandidateEntity::company("Acme Corp")).unwrap();
        let err = handle.join_timeout(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Execution(ExecutionError::Timeout { duration_ms: 20 })
        ));
        release.send(()).unwrap();
    }

    #[test]
    fn test_join_reports_disconnected_when_reply_dropped() {
        let (tx, rx) = bounded::<ResolveResult<MappingResult>>(1);
        drop(tx);

        let err = ResolutionHandle { rx }.join().unwrap_err();
        assert!(matches!(err, ResolveError::Execution(ExecutionError::Disconnected)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_drop_finishes_queued_work() {
        let runtime = ResolverRuntime::new(resolver(), RuntimeConfig::default()).unwrap();
        let handles: Vec<_> = (0..16)
            .map(|_| runtime.submit(CandidateEntity::company("Acme Corp")).unwrap())
            .collect();
        drop(runtime);

        for handle in handles {
            assert!(handle.join().unwrap().is_mapped());
        }
    }
}
