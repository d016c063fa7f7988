use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::batcher::Batcher;

const DEFAULT_WAIT_TIME: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("`wait_time` must be greater than zero")]
    InvalidWaitTime,

    #[error("`query_id` requires a `result_mapper`, positional results would misalign")]
    QueryIdWithoutMapper,

    #[error("batch call failed: {0}")]
    Failed(Arc<crate::Error>),

    #[error("batcher is closed")]
    Closed,
}

pub(crate) type MultiCallFn<P, R> =
    Box<dyn Fn(Vec<P>) -> BoxFuture<'static, crate::Result<Vec<R>>> + Send + Sync>;
pub(crate) type SingleCallFn<P, R> =
    Box<dyn Fn(P) -> BoxFuture<'static, crate::Result<R>> + Send + Sync>;
pub(crate) type KeyFn<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Translates between results and parameters on one side and the shared
/// lookup key on the other, so callers can find their result when the
/// underlying call returns fewer items, or items in an unrelated order.
pub(crate) struct ResultMapper<P, R> {
    pub result_to_key: KeyFn<R>,
    pub param_to_key: KeyFn<P>,
}

/// Configures a [`Batcher`], `multi_call` is the only required piece.
pub struct BatcherConfig<P, R> {
    pub(crate) multi_call: MultiCallFn<P, R>,
    pub(crate) single_call: Option<SingleCallFn<P, R>>,
    pub(crate) query_id: Option<KeyFn<P>>,
    pub(crate) result_mapper: Option<ResultMapper<P, R>>,
    pub(crate) wait_time: Duration,
}

impl<P, R> BatcherConfig<P, R>
where
    P: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Starts a configuration around the batched transport. `multi_call`
    /// receives the parameters of a whole window and must resolve them
    /// in one call.
    pub fn new<F, Fut>(multi_call: F) -> Self
    where
        F: Fn(Vec<P>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<Vec<R>>> + Send + 'static,
    {
        Self {
            multi_call: Box::new(move |params| multi_call(params).boxed()),
            single_call: None,
            query_id: None,
            result_mapper: None,
            wait_time: DEFAULT_WAIT_TIME,
        }
    }

    /// Fast path for singleton windows. When exactly one request is
    /// pending at flush time it is passed here instead of `multi_call`,
    /// skipping the batch overhead.
    pub fn single_call<F, Fut>(mut self, single_call: F) -> Self
    where
        F: Fn(P) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = crate::Result<R>> + Send + 'static,
    {
        self.single_call = Some(Box::new(move |param| single_call(param).boxed()));
        self
    }

    /// Derives a deduplication key per parameter. Duplicate keys within a
    /// window are collapsed before `multi_call` (the last submission per
    /// key wins), while every original caller is still resolved. Requires
    /// [`result_mapper`](Self::result_mapper).
    pub fn query_id<F>(mut self, query_id: F) -> Self
    where
        F: Fn(&P) -> String + Send + Sync + 'static,
    {
        self.query_id = Some(Box::new(query_id));
        self
    }

    /// Keys batch results by `result_to_key` instead of position, and
    /// resolves each caller via `param_to_key`. Use this whenever the
    /// underlying call may reorder, drop or deduplicate items.
    pub fn result_mapper<RF, PF>(mut self, result_to_key: RF, param_to_key: PF) -> Self
    where
        RF: Fn(&R) -> String + Send + Sync + 'static,
        PF: Fn(&P) -> String + Send + Sync + 'static,
    {
        self.result_mapper = Some(ResultMapper {
            result_to_key: Box::new(result_to_key),
            param_to_key: Box::new(param_to_key),
        });
        self
    }

    /// Debounce delay before a window flushes, measured from the last
    /// submission. Defaults to 250ms.
    pub fn wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = wait_time;
        self
    }

    pub fn validate(self) -> Result<Self, BatchError> {
        if self.wait_time.is_zero() {
            return Err(BatchError::InvalidWaitTime);
        }

        // Deduplication shrinks the call list, so positional results can
        // no longer line up with the pool. Refuse the combination instead
        // of resolving callers with silently wrong values.
        if self.query_id.is_some() && self.result_mapper.is_none() {
            return Err(BatchError::QueryIdWithoutMapper);
        }

        Ok(self)
    }

    /// Validates the configuration and spawns the worker task behind a
    /// new [`Batcher`] handle.
    pub fn build(self) -> Result<Batcher<P, R>, BatchError> {
        let config = self.validate()?;
        Ok(Batcher::spawn(config))
    }
}
