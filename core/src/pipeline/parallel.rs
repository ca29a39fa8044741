use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{apply_filter, Filter, FilterOutcome};
use crate::envelope::keys;
use crate::Envelope;

/// Status values written under `keys::filter_status(name)`.
pub mod status {
    pub const SUCCESS: &str = "success";
    pub const PASSED: &str = "passed";
    pub const BLOCKED: &str = "blocked";
    pub const FAILED: &str = "failed";
}

/// Fan-out pipeline for independent analyses.
///
/// Every filter runs concurrently on its own copy of the same input; nothing
/// is chained. `execute` returns one envelope per filter, in filter order,
/// each stamped with that filter's status in metadata. Blocked and failed
/// filters still contribute an envelope (the untouched input copy), so the
/// caller always sees every filter's verdict.
pub struct ParallelPipeline {
    name: String,
    filters: RwLock<Vec<Arc<dyn Filter>>>,
}

impl ParallelPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filters: RwLock::new(Vec::new()),
        }
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.get_mut().push(Arc::new(filter));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn add_filter(&self, filter: Arc<dyn Filter>) {
        info!(target: "pipeline", pipeline = %self.name, filter = %filter.name(), "Filter added");
        self.filters.write().await.push(filter);
    }

    #[tracing::instrument(skip(self, envelope), fields(pipeline = %self.name, message_id = %envelope.id()))]
    pub async fn execute(&self, envelope: Envelope) -> Vec<Envelope> {
        let filters = self.filters.read().await.clone();
        info!(target: "pipeline", pipeline = %self.name, filters = filters.len(), "Starting parallel pipeline");

        let input = Arc::new(envelope);
        let mut runs = JoinSet::new();
        for (idx, filter) in filters.iter().enumerate() {
            let filter = Arc::clone(filter);
            let input = Arc::clone(&input);
            runs.spawn(async move {
                let outcome = apply_filter(filter.as_ref(), &input).await;
                (idx, stamp(filter.name(), &input, outcome))
            });
        }

        let mut results: Vec<Option<Envelope>> = vec![None; filters.len()];
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((idx, envelope)) => results[idx] = Some(envelope),
                Err(err) => warn!(target: "pipeline", pipeline = %self.name, error = %err, "Parallel filter task aborted"),
            }
        }

        info!(target: "pipeline", pipeline = %self.name, "Parallel pipeline completed");
        results
            .into_iter()
            .zip(filters.iter())
            .map(|(result, filter)| {
                result.unwrap_or_else(|| {
                    let mut copy = (*input).clone();
                    copy.set_metadata(keys::filter_status(filter.name()), status::FAILED);
                    copy.set_metadata(keys::filter_error(filter.name()), "filter task aborted");
                    copy
                })
            })
            .collect()
    }
}

fn stamp(filter: &str, input: &Envelope, outcome: FilterOutcome) -> Envelope {
    let (mut envelope, status, error) = match outcome {
        FilterOutcome::Processed(out) => (out, status::SUCCESS, None),
        FilterOutcome::Forwarded(out) => (out, status::PASSED, None),
        FilterOutcome::Blocked => (input.clone(), status::BLOCKED, None),
        FilterOutcome::Failed { error, .. } => (input.clone(), status::FAILED, Some(error)),
    };
    envelope.set_metadata(keys::filter_status(filter), status);
    if let Some(error) = error {
        envelope.set_metadata(keys::filter_error(filter), error);
    }
    envelope
}
