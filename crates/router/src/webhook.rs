//! Automation webhook client (n8n-style)
//!
//! Utterances matching the keyword policy are posted as `{query, token}`;
//! success answers with a configured acknowledgement string.

use std::time::Duration;

use serde::Serialize;

use voicehub_config::RouterConfig;

use crate::agent::backoff_schedule;
use crate::RouterError;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<&'a str>,
}

pub struct WebhookClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    token: Option<String>,
    keywords: Vec<String>,
    retry_limit: u32,
    backoff_base: Duration,
}

impl WebhookClient {
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RouterError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.n8n_url.clone(),
            token: config.n8n_token.clone(),
            keywords: config
                .webhook_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            retry_limit: config.retry_limit.max(1),
            backoff_base: Duration::from_secs(config.retry_backoff_secs),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Keyword policy: the utterance must contain one of the configured
    /// trigger words.
    pub fn matches(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k))
    }

    /// Fire the webhook; the acknowledgement text is fixed, the webhook's
    /// body is not spoken.
    pub async fn trigger(&self, query: &str) -> Result<String, RouterError> {
        let endpoint = self.endpoint.as_deref().ok_or(RouterError::NotConfigured)?;
        let payload = WebhookPayload {
            query,
            token: self.token.as_deref(),
        };

        let mut delays = backoff_schedule(self.backoff_base, self.retry_limit).into_iter();
        let mut last_error = RouterError::Webhook("no attempts made".into());

        for attempt in 1..=self.retry_limit {
            if attempt > 1 {
                if let Some(delay) = delays.next() {
                    tokio::time::sleep(delay).await;
                }
            }

            let result = self.client.post(endpoint).json(&payload).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(endpoint, "Automation webhook triggered");
                    return Ok("Okay, wird erledigt.".to_string());
                }
                Ok(resp) => {
                    last_error = RouterError::Webhook(format!("status {}", resp.status()));
                }
                Err(e) => {
                    last_error = RouterError::Webhook(e.to_string());
                }
            }
            tracing::debug!(attempt, error = %last_error, "Webhook attempt failed");
        }

        Err(last_error)
    }
}
