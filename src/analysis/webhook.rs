use super::{extract_reply, AnalysisRequest};
use crate::config::AnalysisConfig;
use crate::error::{Result, RevenueError};
use log::debug;
use reqwest::Client;
use std::time::Duration;

/// Forwards chat questions, with the dataset, to an external analysis
/// webhook.
#[derive(Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        let url = config.webhook_url.clone().ok_or_else(|| {
            RevenueError::ConfigError("analysis.webhook_url is not set".to_string())
        })?;
        Self::new(url, Duration::from_secs(config.timeout_secs))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn forward(&self, request: &AnalysisRequest) -> Result<String> {
        debug!(
            "Forwarding analysis request ({} projects, {} invoices) to {}",
            request.project_data.len(),
            request.invoice_data.len(),
            self.url
        );

        let res = self.client.post(&self.url).json(request).send().await?;
        let status = res.status();
        let body = res.text().await?;

        if !status.is_success() {
            return Err(RevenueError::ExternalServiceError(format!(
                "Webhook failed (status {}): {}",
                status, body
            )));
        }

        extract_reply(&body).ok_or_else(|| {
            RevenueError::ExternalServiceError("Webhook returned an empty reply".to_string())
        })
    }
}
