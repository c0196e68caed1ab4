//! Ordered single-flight work queue.
//!
//! Units of work submitted to an [`ActionQueue`] run one at a time, in
//! submission order, on a dedicated worker task. The first unit that fails
//! poisons the queue: every unit behind it is skipped without running and
//! resolves to [`QueueError::Aborted`] carrying the original failure.
//!
//! This is the serialization point for everything that touches a shared
//! browser session; callers get ordering and mutual exclusion for free.

use std::future::Future;
use std::sync::Mutex;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How a queued unit of work came to not produce a value.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum QueueError<E> {
    /// This unit ran and failed.
    #[error("unit of work failed: {0}")]
    Failed(E),
    /// An earlier unit failed; this one was skipped without running.
    #[error("skipped after earlier failure: {0}")]
    Aborted(E),
    /// The queue was closed before this unit could resolve.
    #[error("queue closed")]
    Closed,
}

type Job<E> = Box<dyn FnOnce(Option<E>) -> BoxFuture<'static, Option<E>> + Send>;

/// A queue of units of work bound to one shared execution context.
pub struct ActionQueue<E> {
    tx: Mutex<Option<mpsc::UnboundedSender<Job<E>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E> ActionQueue<E>
where
    E: Clone + Send + std::fmt::Display + 'static,
{
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job<E>>();
        let worker = tokio::spawn(async move {
            let mut poison: Option<E> = None;
            while let Some(job) = rx.recv().await {
                let outcome = job(poison.clone()).await;
                if poison.is_none() {
                    if let Some(err) = outcome {
                        warn!(target: "action-queue", %err, "unit failed, aborting queued work");
                        poison = Some(err);
                    }
                }
            }
            debug!(target: "action-queue", "worker drained");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue a unit of work. The returned future resolves once the unit
    /// has run (or been skipped), preserving submission order.
    pub fn submit<T, F, Fut>(&self, f: F) -> impl Future<Output = Result<T, QueueError<E>>>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (result_tx, result_rx) = oneshot::channel::<Result<T, QueueError<E>>>();

        let job: Job<E> = Box::new(move |poison| {
            Box::pin(async move {
                if let Some(earlier) = poison {
                    let _ = result_tx.send(Err(QueueError::Aborted(earlier)));
                    return None;
                }
                match f().await {
                    Ok(value) => {
                        let _ = result_tx.send(Ok(value));
                        None
                    }
                    Err(err) => {
                        let _ = result_tx.send(Err(QueueError::Failed(err.clone())));
                        Some(err)
                    }
                }
            })
        });

        let sent = match self.tx.lock().expect("queue sender lock").as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        };

        async move {
            if !sent {
                return Err(QueueError::Closed);
            }
            result_rx.await.unwrap_or(Err(QueueError::Closed))
        }
    }

    /// Stop accepting work and wait for the in-flight unit to finish.
    pub async fn close(&self) {
        self.tx.lock().expect("queue sender lock").take();
        let worker = self.worker.lock().expect("queue worker lock").take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }
}

impl<E> Default for ActionQueue<E>
where
    E: Clone + Send + std::fmt::Display + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::time::{sleep, Duration};

    #[derive(Clone, Debug, PartialEq)]
    struct TestError(&'static str);

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    #[tokio::test]
    async fn runs_units_in_submission_order() {
        let queue: ActionQueue<TestError> = ActionQueue::new();
        let order = Arc::new(AsyncMutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5u32 {
            let order = order.clone();
            handles.push(queue.submit(move || async move {
                // Later units sleeping less would expose reordering.
                sleep(Duration::from_millis(10 * (5 - i) as u64)).await;
                order.lock().await.push(i);
                Ok::<_, TestError>(i)
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.await.unwrap(), i as u32);
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failure_skips_subsequent_units() {
        let queue: ActionQueue<TestError> = ActionQueue::new();
        let ran = Arc::new(AsyncMutex::new(false));

        let ok = queue.submit(|| async { Ok::<_, TestError>(1) });
        let boom = queue.submit(|| async { Err::<u32, _>(TestError("boom")) });
        let skipped = {
            let ran = ran.clone();
            queue.submit(move || async move {
                *ran.lock().await = true;
                Ok::<_, TestError>(2)
            })
        };

        assert_eq!(ok.await.unwrap(), 1);
        assert_eq!(boom.await.unwrap_err(), QueueError::Failed(TestError("boom")));
        assert_eq!(
            skipped.await.unwrap_err(),
            QueueError::Aborted(TestError("boom"))
        );
        assert!(!*ran.lock().await, "skipped unit must never run");
    }

    #[tokio::test]
    async fn close_rejects_new_work() {
        let queue: ActionQueue<TestError> = ActionQueue::new();
        queue.close().await;
        let result = queue.submit(|| async { Ok::<_, TestError>(()) }).await;
        assert_eq!(result.unwrap_err(), QueueError::Closed);
    }
}
