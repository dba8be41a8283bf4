//! Update Pipeline
//!
//! Request handlers never persist decayed state themselves; they hand a
//! [`Job`] to the pipeline and return. Each distribution name is routed to a
//! fixed worker (`crc32(name) % workers`) so all jobs for one name run in
//! FIFO order on a single task.

mod queue;
mod worker;

pub use queue::JobQueue;
pub use worker::{process, JobOutcome, WorkerContext};

use crate::config::PipelineConfig;
use crate::distribution::Distribution;
use crate::error::PipelineError;
use crate::observability::SharedMetrics;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Reload, decay with the current time, persist
    Refresh(String),
    /// Persist this already-decayed distribution
    Snapshot(Distribution),
}

impl Job {
    pub fn name(&self) -> &str {
        match self {
            Job::Refresh(name) => name,
            Job::Snapshot(dist) => &dist.name,
        }
    }
}

/// Worker index for `name`
#[inline]
pub fn route(name: &str, workers: usize) -> usize {
    crc32fast::hash(name.as_bytes()) as usize % workers.max(1)
}

/// Producer side, cloned into every request handler
#[derive(Clone)]
pub struct PipelineHandle {
    queues: Arc<[Arc<JobQueue>]>,
    metrics: SharedMetrics,
}

impl PipelineHandle {
    pub async fn submit(&self, job: Job) -> Result<(), PipelineError> {
        let worker = route(job.name(), self.queues.len());
        let name = job.name().to_string();

        match self.queues[worker].push(job).await {
            Ok(None) => {
                self.metrics.record_enqueued(worker, self.queues[worker].len());
                Ok(())
            }
            Ok(Some(evicted)) => {
                self.metrics.record_enqueued(worker, self.queues[worker].len());
                self.metrics.record_dropped("overflow");
                warn!(worker, evicted = %evicted.name(), "queue full, evicted oldest job");
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    PipelineError::QueueFull => "overflow",
                    PipelineError::Closed => "closed",
                };
                self.metrics.record_dropped(reason);
                warn!(worker, distribution = %name, error = %e, "job dropped");
                Err(e)
            }
        }
    }

    /// Jobs waiting across all queues
    pub fn pending(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn workers(&self) -> usize {
        self.queues.len()
    }
}

pub struct UpdatePipeline {
    handle: PipelineHandle,
    workers: Vec<JoinHandle<()>>,
}

impl UpdatePipeline {
    /// Spawn `config.workers` tasks, splitting `queue_capacity` between them
    pub fn start(config: &PipelineConfig, ctx: WorkerContext) -> Self {
        let workers = config.workers.max(1);
        let per_worker = config.queue_capacity.div_ceil(workers).max(1);
        let metrics = ctx.metrics.clone();
        let ctx = Arc::new(WorkerContext {
            max_attempts: config.max_persist_attempts.max(1),
            ..ctx
        });

        let queues: Arc<[Arc<JobQueue>]> = (0..workers)
            .map(|_| Arc::new(JobQueue::new(per_worker, config.overflow)))
            .collect();

        let tasks = queues
            .iter()
            .enumerate()
            .map(|(id, queue)| tokio::spawn(worker::run(id, queue.clone(), ctx.clone())))
            .collect();

        info!(
            workers,
            queue_capacity = per_worker,
            overflow = ?config.overflow,
            "update pipeline started"
        );

        UpdatePipeline {
            handle: PipelineHandle { queues, metrics },
            workers: tasks,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Close every queue, let workers drain what is queued, and wait for them
    pub async fn shutdown(self) {
        let pending = self.handle.pending();
        for queue in self.handle.queues.iter() {
            queue.close();
        }
        for task in self.workers {
            if let Err(e) = task.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!(drained = pending, "update pipeline stopped");
    }
}
