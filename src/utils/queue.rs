use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use log::debug;
use tokio::sync::{oneshot, Mutex};

use crate::error::{Error, Result};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Rate-limited FIFO queue for outbound network calls. Operations are
/// dispatched strictly one at a time, each followed by a fixed delay
/// before the next begins. Enqueueing never blocks on prior work
/// draining. One instance is constructed per session and injected into
/// the clients that share an upstream rate limit.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Mutex<Inner>>,
    min_interval: Duration,
}

struct Inner {
    jobs: VecDeque<Job>,
    draining: bool,
}

impl RequestQueue {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                jobs: VecDeque::new(),
                draining: false,
            })),
            min_interval,
        }
    }

    /// Enqueues `op` and waits for its turn. The returned value mirrors
    /// the operation's own outcome. If the queue is cleared before the
    /// operation starts, the caller sees `Error::RequestAbandoned`;
    /// that means the work was discarded, not that the upstream failed.
    pub async fn enqueue<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let result = op.await;
            // Caller may have given up waiting; nothing to do then.
            let _ = tx.send(result);
        });

        let start_drain = {
            let mut inner = self.inner.lock().await;
            inner.jobs.push_back(job);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };

        if start_drain {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.drain().await;
            });
        }

        rx.await.map_err(|_| Error::RequestAbandoned)?
    }

    /// Discards not-yet-started work. Pending callers observe
    /// `Error::RequestAbandoned`; the operation currently in flight is
    /// not interrupted.
    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        let dropped = inner.jobs.len();
        inner.jobs.clear();
        if dropped > 0 {
            debug!("Cleared {} pending queue entries", dropped);
        }
    }

    pub async fn pending(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    async fn drain(&self) {
        loop {
            let job = {
                let mut inner = self.inner.lock().await;
                match inner.jobs.pop_front() {
                    Some(job) => job,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            job.await;
            tokio::time::sleep(self.min_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn spaces_operations_by_min_interval() {
        let queue = RequestQueue::new(Duration::from_millis(250));
        let start = Instant::now();

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(async move { Ok(i) }).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        // 4 inter-call delays must elapse before the 5th op completes.
        assert!(start.elapsed() >= Duration::from_millis(4 * 250));
        assert_eq!(results, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn executes_in_enqueue_order() {
        let queue = RequestQueue::new(Duration::from_millis(10));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..4u32 {
            let queue = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(async move {
                        order.lock().await.push(i);
                        Ok(())
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_does_not_stop_the_drain() {
        let queue = RequestQueue::new(Duration::from_millis(1));

        let first: Result<u32> = queue
            .enqueue(async { Err(Error::ApiError("boom".to_string())) })
            .await;
        assert!(first.is_err());

        let second = queue.enqueue(async { Ok(7u32) }).await;
        assert_eq!(second.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_abandons_pending_entries() {
        // Long interval keeps entries queued behind the first job.
        let queue = RequestQueue::new(Duration::from_secs(3600));
        let ran = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            let ran = ran.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .enqueue(async move {
                        ran.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }

        // Let the first job start, then drop the rest.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(queue.pending().await, 2);
        queue.clear().await;
        assert_eq!(queue.pending().await, 0);

        let mut abandoned = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), Err(Error::RequestAbandoned)) {
                abandoned += 1;
            }
        }
        assert_eq!(abandoned, 2);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
