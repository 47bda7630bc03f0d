//! Authenticated REST transport
//!
//! Thin wrapper around a pre-configured [`reqwest::Client`]: every call
//! runs the exchange and pipes the resulting status + body through the
//! response classifier. No knowledge of individual endpoints lives here.

use reqwest::{header, Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::classify::classify;
use crate::config::Config;
use crate::error::{DataSiftError, Result};

/// Authenticated HTTP client for the REST API
pub struct RestClient {
    config: Config,
    client: Client,
}

impl RestClient {
    /// Create a client with credentials baked into the default headers
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        let auth = format!("{}:{}", config.username, config.api_key);
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&auth)
                .map_err(|e| DataSiftError::Config(format!("Invalid credentials: {}", e)))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// GET an endpoint and classify the response
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let url = self.config.api_url(endpoint);
        debug!(endpoint = %endpoint, "GET");

        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        let body = response.text().await?;

        classify(status, &body).into_result()
    }

    /// GET an endpoint, returning headers alongside the classified body.
    ///
    /// Used by paginated endpoints that carry cursors in response headers.
    pub async fn get_with_headers(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<(header::HeaderMap, Value)> {
        let url = self.config.api_url(endpoint);
        debug!(endpoint = %endpoint, "GET");

        let response = self.client.get(&url).query(params).send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        // An empty pull page comes back 204 with no body
        if status == StatusCode::NO_CONTENT {
            return Ok((headers, Value::Array(Vec::new())));
        }

        let value = classify(status, &body).into_result()?;
        Ok((headers, value))
    }

    /// POST form parameters to an endpoint and classify the response
    pub async fn post(&self, endpoint: &str, form: &[(&str, String)]) -> Result<Value> {
        let url = self.config.api_url(endpoint);
        debug!(endpoint = %endpoint, "POST");

        let response = self.client.post(&url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        classify(status, &body).into_result()
    }

    /// The config this client was built from
    pub fn config(&self) -> &Config {
        &self.config
    }
}
