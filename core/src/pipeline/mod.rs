//! Pipes and filters: ordered filter chains over envelopes.
//!
//! - [`Pipeline`]: sequential chain with short-circuit on block, plus
//!   concurrent batch processing
//! - [`ParallelPipeline`]: independent filters fanned out over copies of one
//!   input
//! - [`filters`]: stock validation/transform/enrichment filters

pub mod filter;
pub mod filters;
pub mod parallel;

use std::sync::Arc;

use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{ConduitConfig, Envelope};

pub use filter::{apply_filter, Filter, FilterOutcome};
pub use filters::{EnrichmentFilter, FnFilter, TransformFilter, ValidationFilter};
pub use parallel::ParallelPipeline;

/// Sequential filter chain.
///
/// Each filter sees an independent copy of the current envelope; stages run
/// strictly one after another and a block stops the chain before the next
/// stage starts.
///
/// # Examples
///
/// ```
/// use conduit_core::pipeline::{EnrichmentFilter, Pipeline, ValidationFilter};
/// use conduit_core::{Envelope, Payload};
///
/// # async fn example() {
/// let pipeline = Pipeline::new("orders")
///     .with_filter(ValidationFilter::new("validate", ["order_id"]))
///     .with_filter(EnrichmentFilter::new("enrich", Payload::new()).with_field("checked", true));
///
/// let accepted = pipeline
///     .process(Envelope::new("api").with_field("order_id", 7))
///     .await;
/// assert!(accepted.is_some());
///
/// let rejected = pipeline.process(Envelope::new("api")).await;
/// assert!(rejected.is_none());
/// # }
/// ```
pub struct Pipeline {
    name: String,
    filters: RwLock<Vec<Arc<dyn Filter>>>,
    max_concurrency: usize,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &ConduitConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &ConduitConfig) -> Self {
        let name = name.into();
        info!(target: "pipeline", pipeline = %name, "Pipeline created");
        Self {
            name,
            filters: RwLock::new(Vec::new()),
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Appends a filter while building the pipeline.
    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.get_mut().push(Arc::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends a filter; only later `process` calls see it.
    pub async fn add_filter(&self, filter: Arc<dyn Filter>) {
        info!(target: "pipeline", pipeline = %self.name, filter = %filter.name(), "Filter added");
        self.filters.write().await.push(filter);
    }

    pub async fn filter_names(&self) -> Vec<String> {
        self.filters
            .read()
            .await
            .iter()
            .map(|f| f.name().to_string())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.filters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.filters.read().await.is_empty()
    }

    /// Runs the envelope through every filter in order.
    ///
    /// Returns `None` when a filter blocked it.
    #[tracing::instrument(skip(self, envelope), fields(pipeline = %self.name, message_id = %envelope.id()))]
    pub async fn process(&self, envelope: Envelope) -> Option<Envelope> {
        let filters = self.snapshot().await;
        run_chain(&self.name, &filters, envelope).await
    }

    /// Runs `process` concurrently over a batch.
    ///
    /// Only envelopes that made it through are returned, in input order. A
    /// run that panics is logged and dropped without affecting its siblings.
    pub async fn process_batch(&self, envelopes: Vec<Envelope>) -> Vec<Envelope> {
        let total = envelopes.len();
        info!(target: "pipeline", pipeline = %self.name, batch = total, "Processing batch");

        let filters: Arc<[Arc<dyn Filter>]> = self.snapshot().await.into();
        let name: Arc<str> = Arc::from(self.name.as_str());
        let permits = Arc::new(Semaphore::new(self.max_concurrency));

        let mut runs = JoinSet::new();
        for (idx, envelope) in envelopes.into_iter().enumerate() {
            let filters = Arc::clone(&filters);
            let name = Arc::clone(&name);
            let permits = Arc::clone(&permits);
            runs.spawn(async move {
                let _permit = permits.acquire_owned().await;
                (idx, run_chain(&name, &filters, envelope).await)
            });
        }

        let mut processed = Vec::with_capacity(total);
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((idx, Some(envelope))) => processed.push((idx, envelope)),
                Ok((_, None)) => {}
                Err(err) => {
                    warn!(target: "pipeline", pipeline = %self.name, error = %err, "Pipeline run aborted")
                }
            }
        }
        processed.sort_by_key(|(idx, _)| *idx);

        info!(target: "pipeline", pipeline = %self.name, passed = processed.len(), batch = total, "Batch processed");
        processed.into_iter().map(|(_, env)| env).collect()
    }

    async fn snapshot(&self) -> Vec<Arc<dyn Filter>> {
        self.filters.read().await.clone()
    }
}

async fn run_chain(
    pipeline: &str,
    filters: &[Arc<dyn Filter>],
    envelope: Envelope,
) -> Option<Envelope> {
    let message_id = envelope.id().to_string();
    let mut current = envelope;

    for (stage, filter) in filters.iter().enumerate() {
        debug!(target: "pipeline", pipeline = %pipeline, stage = stage + 1, total = filters.len(), filter = %filter.name(), "Applying filter");

        match apply_filter(filter.as_ref(), &current).await.into_envelope() {
            Some(next) => current = next,
            None => {
                info!(target: "pipeline", pipeline = %pipeline, message_id = %message_id, stage = stage + 1, filter = %filter.name(), "Message blocked");
                return None;
            }
        }
    }

    debug!(target: "pipeline", pipeline = %pipeline, message_id = %message_id, "Message completed pipeline");
    Some(current)
}
