use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::{panic_message, ConduitError, Envelope, Result};

/// A pipeline stage that transforms, validates or blocks an envelope.
///
/// `filter` receives its own copy of the envelope. Returning `Ok(None)` asks to
/// block it; whether that block is honored, and what happens on `Err`, is
/// decided by [`Filter::pass_through`]:
///
/// | outcome      | pass-through            | non-pass-through |
/// |--------------|-------------------------|------------------|
/// | `Ok(Some)`   | continue with output    | continue with output |
/// | `Ok(None)`   | forward original        | block            |
/// | `Err(_)`     | forward original        | block            |
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stable name used in logs and metadata status keys
    fn name(&self) -> &str;

    /// Forward the original envelope instead of blocking when the filter
    /// declines or fails
    fn pass_through(&self) -> bool {
        true
    }

    async fn filter(&self, envelope: Envelope) -> Result<Option<Envelope>>;
}

/// Result of applying one filter under its pass-through policy.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    /// The filter produced an envelope
    Processed(Envelope),
    /// The filter declined but is pass-through; carries the original
    Forwarded(Envelope),
    /// The filter declined and is not pass-through
    Blocked,
    /// The filter body failed; `forwarded` holds the original for
    /// pass-through filters and is `None` otherwise
    Failed {
        error: String,
        forwarded: Option<Envelope>,
    },
}

impl FilterOutcome {
    /// Envelope to continue with, or `None` when the pipeline must stop.
    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            FilterOutcome::Processed(env) | FilterOutcome::Forwarded(env) => Some(env),
            FilterOutcome::Blocked => None,
            FilterOutcome::Failed { forwarded, .. } => forwarded,
        }
    }
}

/// Runs `filter` on a copy of `input` and resolves the outcome.
///
/// `input` itself is never handed to the filter, so the caller keeps the
/// pre-filter state to fall back on. A panicking filter counts as a failed
/// one. A processed envelope gets the filter appended to its transformation
/// trail.
pub async fn apply_filter(filter: &dyn Filter, input: &Envelope) -> FilterOutcome {
    let name = filter.name();
    let result = AssertUnwindSafe(filter.filter(input.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(ConduitError::Filter(format!(
                "filter panicked: {}",
                panic_message(&panic)
            )))
        });

    match result {
        Ok(Some(mut out)) => {
            debug!(target: "pipeline", filter = %name, message_id = %input.id(), "Filter processed message");
            out.record_transformation(name);
            FilterOutcome::Processed(out)
        }
        Ok(None) if filter.pass_through() => {
            debug!(target: "pipeline", filter = %name, message_id = %input.id(), "Filter passed message unchanged");
            FilterOutcome::Forwarded(input.clone())
        }
        Ok(None) => {
            info!(target: "pipeline", filter = %name, message_id = %input.id(), "Filter blocked message");
            FilterOutcome::Blocked
        }
        Err(err) => {
            warn!(target: "pipeline", filter = %name, message_id = %input.id(), error = %err, "Filter failed");
            FilterOutcome::Failed {
                error: err.to_string(),
                forwarded: filter.pass_through().then(|| input.clone()),
            }
        }
    }
}
