//! Rendered view revalidation
//!
//! Asks the frontend to regenerate a statically rendered page.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::RevalidationConfig;
use crate::error::AppError;

/// Marks one rendered view path as stale
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PathRevalidator: Send + Sync {
    /// # Returns
    /// `true` if a revalidation request was sent, `false` when disabled
    async fn revalidate(&self, path: &str) -> Result<bool, AppError>;
}

/// Posts `{path, secret}` to the configured revalidation endpoint
pub struct HttpRevalidator {
    client: reqwest::Client,
    endpoint: Option<String>,
    secret: Option<String>,
}

impl HttpRevalidator {
    pub fn new(client: reqwest::Client, config: &RevalidationConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            secret: config.secret.clone(),
        }
    }
}

#[async_trait]
impl PathRevalidator for HttpRevalidator {
    async fn revalidate(&self, path: &str) -> Result<bool, AppError> {
        let Some(endpoint) = &self.endpoint else {
            tracing::debug!(path, "Revalidation endpoint not configured, skipping");
            return Ok(false);
        };

        let response = self
            .client
            .post(endpoint)
            .timeout(Duration::from_secs(10))
            .json(&serde_json::json!({
                "path": path,
                "secret": self.secret,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "revalidation of {} returned HTTP {}",
                path,
                status
            )));
        }

        tracing::debug!(path, "Revalidated view");
        Ok(true)
    }
}
