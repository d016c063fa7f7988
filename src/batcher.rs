use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep;

use crate::config::{BatchError, BatcherConfig};

/// One submitted request, the oneshot carries its result back once the
/// window it belongs to has flushed.
struct Pending<P, R> {
    param: P,
    tx: oneshot::Sender<Result<Option<R>, BatchError>>,
}

/// The shape of a flushed batch result. Positional results are aligned
/// with the pool by submission index, keyed results are looked up via the
/// configured result mapper.
enum BatchData<R> {
    Positional(Vec<R>),
    Keyed(HashMap<String, R>),
}

/// Handle to a spawned batching worker.
///
/// Cloning the handle shares the same worker, so submissions from every
/// clone coalesce into the same windows. Once all handles are dropped the
/// worker flushes whatever is still pending and exits.
pub struct Batcher<P, R> {
    tx: mpsc::UnboundedSender<Pending<P, R>>,
}

impl<P, R> Clone for Batcher<P, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<P, R> Batcher<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn spawn(config: BatcherConfig<P, R>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(Worker { rx, config }.run());

        Self { tx }
    }

    /// Submits one parameter and resolves once the window it joined has
    /// flushed. The parameter is enqueued immediately, before the returned
    /// future is first polled, so submission order is the call order.
    ///
    /// Resolves to `Ok(None)` when the underlying call produced no result
    /// for this request, a lookup miss is not an error.
    pub fn submit(&self, param: P) -> impl Future<Output = Result<Option<R>, BatchError>> + use<P, R> {
        let (tx, rx) = oneshot::channel();
        let sent = self.tx.send(Pending { param, tx }).is_ok();

        async move {
            if !sent {
                return Err(BatchError::Closed);
            }

            rx.await.unwrap_or(Err(BatchError::Closed))
        }
    }
}

struct Worker<P, R> {
    rx: mpsc::UnboundedReceiver<Pending<P, R>>,
    config: BatcherConfig<P, R>,
}

impl<P, R> Worker<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    async fn run(mut self) {
        // Idle until the first submission opens a window, then keep
        // re-arming the debounce sleep on every further submission. The
        // window flushes once it stays quiet for `wait_time`, or right
        // away when the last handle is dropped.
        while let Some(first) = self.rx.recv().await {
            let mut pool = vec![first];
            let mut closed = false;

            loop {
                tokio::select! {
                    received = self.rx.recv() => match received {
                        Some(pending) => pool.push(pending),
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = sleep(self.config.wait_time) => break,
                }
            }

            self.flush(pool).await;

            if closed {
                return;
            }
        }
    }

    /// Drains one window: submissions arriving while the underlying call
    /// is in flight stay buffered in the channel and form the next window.
    async fn flush(&self, pool: Vec<Pending<P, R>>) {
        trace!(message = "flushing batch", pending = pool.len());

        let response = match (&self.config.single_call, pool.as_slice()) {
            (Some(single_call), [only]) => {
                (single_call)(only.param.clone()).await.map(|result| vec![result])
            }
            _ => {
                let params = match &self.config.query_id {
                    Some(query_id) => {
                        // Scan from the newest end so the last submission
                        // per key is the one forwarded.
                        let mut seen = HashSet::new();
                        let mut params = Vec::with_capacity(pool.len());
                        for pending in pool.iter().rev() {
                            if seen.insert((query_id)(&pending.param)) {
                                params.push(pending.param.clone());
                            }
                        }
                        params
                    }
                    None => pool.iter().map(|pending| pending.param.clone()).collect(),
                };

                (self.config.multi_call)(params).await
            }
        };

        let results = match response {
            Ok(results) => results,
            Err(err) => {
                let err = BatchError::Failed(Arc::new(err));
                error!(message = "batch call failed", %err);

                // A failed batch is final for its waiters, the drained
                // pool is not carried over into the next window.
                for pending in pool {
                    let _ = pending.tx.send(Err(err.clone()));
                }

                return;
            }
        };

        let data = match &self.config.result_mapper {
            Some(mapper) => BatchData::Keyed(
                results
                    .into_iter()
                    .map(|result| ((mapper.result_to_key)(&result), result))
                    .collect(),
            ),
            None => BatchData::Positional(results),
        };

        for (index, pending) in pool.into_iter().enumerate() {
            let value = match &data {
                BatchData::Positional(results) => results.get(index).cloned(),
                BatchData::Keyed(results) => match &self.config.result_mapper {
                    Some(mapper) => results.get(&(mapper.param_to_key)(&pending.param)).cloned(),
                    None => None,
                },
            };

            // The receiver may be gone if the caller gave up waiting.
            let _ = pending.tx.send(Ok(value));
        }
    }
}
