use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Payload, Result};

/// Body of a command: takes the command parameters, produces a result.
///
/// Sync and async closures are normalized into this one awaited capability at
/// registration time through [`SyncFn`] and [`AsyncFn`].
#[async_trait]
pub trait CommandFunction: Send + Sync {
    async fn invoke(&self, parameters: Payload) -> Result<Value>;
}

/// Adapter for a synchronous closure.
pub struct SyncFn<F>(pub F);

#[async_trait]
impl<F> CommandFunction for SyncFn<F>
where
    F: Fn(Payload) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, parameters: Payload) -> Result<Value> {
        (self.0)(parameters)
    }
}

/// Adapter for a closure returning a future.
pub struct AsyncFn<F>(pub F);

#[async_trait]
impl<F, Fut> CommandFunction for AsyncFn<F>
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn invoke(&self, parameters: Payload) -> Result<Value> {
        (self.0)(parameters).await
    }
}
