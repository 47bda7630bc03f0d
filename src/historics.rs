//! Historics: asynchronous batch queries over recorded data
//!
//! Jobs are prepared over REST, then started, stopped, or deleted by id.
//! Result retrieval happens through the usual pull endpoint once the job
//! has produced a subscription.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::rest::RestClient;

/// Historics sub-API
pub struct Historics {
    rest: Arc<RestClient>,
}

impl Historics {
    pub(crate) fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }

    /// Prepare a historics job for a compiled stream hash over the given
    /// time window. `sample` is a percentage of the recorded data.
    pub async fn prepare(
        &self,
        hash: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        name: &str,
        sources: &[&str],
        sample: Option<f64>,
    ) -> Result<Value> {
        let form = prepare_params(hash, start, end, name, sources, sample);
        self.rest.post("historics/prepare", &form).await
    }

    /// Start a prepared job
    pub async fn start(&self, id: &str) -> Result<Value> {
        self.rest.post("historics/start", &[("id", id.to_string())]).await
    }

    /// Stop a running job
    pub async fn stop(&self, id: &str) -> Result<Value> {
        self.rest.post("historics/stop", &[("id", id.to_string())]).await
    }

    /// Delete a job
    pub async fn delete(&self, id: &str) -> Result<Value> {
        self.rest.post("historics/delete", &[("id", id.to_string())]).await
    }
}

/// Assemble the prepare form: timestamps go over the wire as unix seconds,
/// sources as a comma-separated list.
fn prepare_params(
    hash: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    name: &str,
    sources: &[&str],
    sample: Option<f64>,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("hash", hash.to_string()),
        ("start", start.timestamp().to_string()),
        ("end", end.timestamp().to_string()),
        ("name", name.to_string()),
        ("sources", sources.join(",")),
    ];
    if let Some(sample) = sample {
        form.push(("sample", sample.to_string()));
    }
    form
}
