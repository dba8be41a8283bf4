//! Bounded FIFO feeding one worker
//!
//! Lock-free `ArrayQueue` storage with two `Notify` handles: `available`
//! wakes the consumer, `space` wakes producers blocked on a full queue.
//! `pushing` counts producers between their closed check and their push, so
//! the consumer never declares a closed queue drained while a push that
//! passed the check can still land.

use super::Job;
use crate::config::OverflowPolicy;
use crate::error::PipelineError;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

pub struct JobQueue {
    jobs: ArrayQueue<Job>,
    policy: OverflowPolicy,
    available: Notify,
    space: Notify,
    closed: AtomicBool,
    pushing: AtomicUsize,
}

enum Attempt {
    Pushed(Option<Job>),
    Full(Job),
}

impl JobQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        JobQueue {
            jobs: ArrayQueue::new(capacity.max(1)),
            policy,
            available: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
            pushing: AtomicUsize::new(0),
        }
    }

    /// Enqueue `job` according to the overflow policy.
    ///
    /// Returns the evicted job when `DropOldest` had to make room.
    pub async fn push(&self, job: Job) -> Result<Option<Job>, PipelineError> {
        let mut job = job;
        loop {
            // Register before trying so a pop between the attempt and the
            // await is not missed.
            let space = self.space.notified();
            tokio::pin!(space);
            space.as_mut().enable();

            match self.try_push(job)? {
                Attempt::Pushed(evicted) => return Ok(evicted),
                Attempt::Full(_) if self.policy == OverflowPolicy::Reject => {
                    return Err(PipelineError::QueueFull)
                }
                Attempt::Full(back) => job = back,
            }
            space.await;
        }
    }

    fn try_push(&self, job: Job) -> Result<Attempt, PipelineError> {
        self.pushing.fetch_add(1, Ordering::SeqCst);
        let attempt = if self.is_closed() {
            Err(PipelineError::Closed)
        } else if self.policy == OverflowPolicy::DropOldest {
            Ok(Attempt::Pushed(self.jobs.force_push(job)))
        } else {
            Ok(match self.jobs.push(job) {
                Ok(()) => Attempt::Pushed(None),
                Err(back) => Attempt::Full(back),
            })
        };
        self.pushing.fetch_sub(1, Ordering::SeqCst);
        // after the decrement, so a consumer waiting on `pushing` wakes
        self.available.notify_one();
        attempt
    }

    /// Next job, or `None` once the queue is closed and drained
    pub async fn pop(&self) -> Option<Job> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.take() {
                return Some(job);
            }
            if self.is_closed() && self.pushing.load(Ordering::SeqCst) == 0 {
                // nothing can be added any more; one last look for a push
                // that finished after the attempt above
                return self.take();
            }
            notified.await;
        }
    }

    fn take(&self) -> Option<Job> {
        let job = self.jobs.pop()?;
        self.space.notify_one();
        Some(job)
    }

    /// Refuse new jobs and wake everyone waiting. Queued jobs stay poppable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.available.notify_waiters();
        self.space.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.jobs.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn refresh(name: &str) -> Job {
        Job::Refresh(name.to_string())
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let q = JobQueue::new(4, OverflowPolicy::Block);
        for name in ["a", "b", "c"] {
            q.push(refresh(name)).await.unwrap();
        }
        assert_eq!(q.pop().await.unwrap().name(), "a");
        assert_eq!(q.pop().await.unwrap().name(), "b");
        assert_eq!(q.pop().await.unwrap().name(), "c");
    }

    #[tokio::test]
    async fn test_reject_when_full() {
        let q = JobQueue::new(1, OverflowPolicy::Reject);
        q.push(refresh("a")).await.unwrap();
        assert_eq!(q.push(refresh("b")).await, Err(PipelineError::QueueFull));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().await.unwrap().name(), "a");
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let q = JobQueue::new(2, OverflowPolicy::DropOldest);
        assert!(q.push(refresh("a")).await.unwrap().is_none());
        assert!(q.push(refresh("b")).await.unwrap().is_none());
        let evicted = q.push(refresh("c")).await.unwrap();
        assert_eq!(evicted.unwrap().name(), "a");
        assert_eq!(q.pop().await.unwrap().name(), "b");
        assert_eq!(q.pop().await.unwrap().name(), "c");
    }

    #[tokio::test]
    async fn test_block_waits_for_space() {
        let q = Arc::new(JobQueue::new(1, OverflowPolicy::Block));
        q.push(refresh("a")).await.unwrap();

        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.push(refresh("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(q.pop().await.unwrap().name(), "a");
        producer.await.unwrap().unwrap();
        assert_eq!(q.pop().await.unwrap().name(), "b");
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let q = JobQueue::new(4, OverflowPolicy::Block);
        q.push(refresh("a")).await.unwrap();
        q.close();

        assert_eq!(q.push(refresh("b")).await, Err(PipelineError::Closed));
        assert_eq!(q.pop().await.unwrap().name(), "a");
        assert!(q.pop().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_idle_consumer() {
        let q = Arc::new(JobQueue::new(4, OverflowPolicy::Block));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_accepted_jobs_survive_racing_close() {
        for policy in [OverflowPolicy::Reject, OverflowPolicy::DropOldest] {
            for _ in 0..50 {
                let q = Arc::new(JobQueue::new(256, policy));
                let consumer = {
                    let q = q.clone();
                    tokio::spawn(async move {
                        let mut popped = 0usize;
                        while q.pop().await.is_some() {
                            popped += 1;
                        }
                        popped
                    })
                };
                let producers: Vec<_> = (0..32)
                    .map(|i| {
                        let q = q.clone();
                        tokio::spawn(async move {
                            q.push(refresh(&format!("d{}", i))).await.is_ok()
                        })
                    })
                    .collect();
                tokio::task::yield_now().await;
                q.close();

                let mut accepted = 0usize;
                for producer in producers {
                    if producer.await.unwrap() {
                        accepted += 1;
                    }
                }
                let popped = tokio::time::timeout(Duration::from_secs(5), consumer)
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(popped, accepted, "{:?}", policy);
            }
        }
    }

    #[tokio::test]
    async fn test_close_releases_blocked_producer() {
        let q = Arc::new(JobQueue::new(1, OverflowPolicy::Block));
        q.push(refresh("a")).await.unwrap();
        let producer = {
            let q = q.clone();
            tokio::spawn(async move { q.push(refresh("b")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let result = tokio::time::timeout(Duration::from_secs(1), producer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(PipelineError::Closed));
    }
}
