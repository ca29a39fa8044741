//! Stock filters: validation, payload transform, enrichment, and a closure adapter.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::Filter;
use crate::{Envelope, Payload, Result};

/// Blocks envelopes whose payload lacks any of the required fields.
///
/// Never pass-through: a missing field always stops the pipeline.
pub struct ValidationFilter {
    name: String,
    required_fields: Vec<String>,
}

impl ValidationFilter {
    pub fn new<I, S>(name: impl Into<String>, required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            required_fields: required_fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }
}

#[async_trait]
impl Filter for ValidationFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn pass_through(&self) -> bool {
        false
    }

    async fn filter(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        if let Some(missing) = self
            .required_fields
            .iter()
            .find(|field| !envelope.has_field(field))
        {
            warn!(target: "pipeline", filter = %self.name, message_id = %envelope.id(), field = %missing, "Message rejected: required field missing");
            return Ok(None);
        }
        Ok(Some(envelope))
    }
}

/// Replaces the payload with the output of a transform function.
///
/// Pass-through: if the function fails, the envelope continues untouched.
pub struct TransformFilter<F> {
    name: String,
    transform: F,
}

impl<F> TransformFilter<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    pub fn new(name: impl Into<String>, transform: F) -> Self {
        Self {
            name: name.into(),
            transform,
        }
    }
}

#[async_trait]
impl<F> Filter for TransformFilter<F>
where
    F: Fn(Payload) -> Result<Payload> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn filter(&self, mut envelope: Envelope) -> Result<Option<Envelope>> {
        let payload = std::mem::take(&mut envelope.payload);
        envelope.payload = (self.transform)(payload)?;
        Ok(Some(envelope))
    }
}

/// Merges a fixed set of fields into every payload, overwriting on conflict.
pub struct EnrichmentFilter {
    name: String,
    fields: Payload,
}

impl EnrichmentFilter {
    pub fn new(name: impl Into<String>, fields: Payload) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Adds one enrichment field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Filter for EnrichmentFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn filter(&self, mut envelope: Envelope) -> Result<Option<Envelope>> {
        for (key, value) in &self.fields {
            envelope.payload.insert(key.clone(), value.clone());
        }
        info!(target: "pipeline", filter = %self.name, message_id = %envelope.id(), fields = self.fields.len(), "Message enriched");
        Ok(Some(envelope))
    }
}

/// Adapts a plain closure into a [`Filter`] with an explicit pass-through policy.
pub struct FnFilter<F> {
    name: String,
    pass_through: bool,
    f: F,
}

impl<F> FnFilter<F>
where
    F: Fn(Envelope) -> Result<Option<Envelope>> + Send + Sync,
{
    /// Pass-through filter around `f`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            pass_through: true,
            f,
        }
    }

    /// Filter around `f` whose `None`/`Err` blocks the envelope.
    pub fn blocking(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            pass_through: false,
            f,
        }
    }
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(Envelope) -> Result<Option<Envelope>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn pass_through(&self) -> bool {
        self.pass_through
    }

    async fn filter(&self, envelope: Envelope) -> Result<Option<Envelope>> {
        (self.f)(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConduitError;
    use serde_json::json;

    fn order() -> Envelope {
        Envelope::new("test")
            .with_field("name", "Test User")
            .with_field("email", "test@example.com")
    }

    #[tokio::test]
    async fn validation_accepts_complete_payload() {
        let f = ValidationFilter::new("validator", ["name", "email"]);
        let env = order();
        let out = f.filter(env.clone()).await.unwrap();
        assert_eq!(out.map(|e| e.payload), Some(env.payload));
    }

    #[tokio::test]
    async fn validation_rejects_missing_field() {
        let f = ValidationFilter::new("validator", ["name", "phone"]);
        assert!(f.filter(order()).await.unwrap().is_none());
        assert!(!f.pass_through());
    }

    #[tokio::test]
    async fn transform_rewrites_payload() {
        let f = TransformFilter::new("upper", |mut p: Payload| {
            if let Some(Value::String(name)) = p.get("name").cloned() {
                p.insert("name".into(), json!(name.to_uppercase()));
            }
            Ok(p)
        });
        let out = f.filter(order()).await.unwrap().unwrap();
        assert_eq!(out.get("name"), Some(&json!("TEST USER")));
    }

    #[tokio::test]
    async fn transform_error_surfaces_to_pipeline() {
        let f = TransformFilter::new("broken", |_p: Payload| {
            Err(ConduitError::Filter("cannot transform".into()))
        });
        assert!(f.filter(order()).await.is_err());
        assert!(f.pass_through());
    }

    #[tokio::test]
    async fn enrichment_merges_fields() {
        let f = EnrichmentFilter::new("enricher", Payload::new())
            .with_field("version", "1.0")
            .with_field("processor", "test");
        let out = f.filter(order()).await.unwrap().unwrap();
        assert_eq!(out.get("version"), Some(&json!("1.0")));
        assert_eq!(out.get("processor"), Some(&json!("test")));
        assert_eq!(out.get("name"), Some(&json!("Test User")));
    }
}
