//! External agent client (Flowise-style prediction API)
//!
//! Calls go out with bounded retries and exponential backoff; each attempt
//! carries its own deadline. An empty reply from the agent is treated the
//! same as a failed call so the router can degrade to Echo.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use voicehub_config::RouterConfig;

use crate::RouterError;

/// Backoff ceiling for retried calls
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Delays slept before the 2nd..=nth attempt: `base * 2^(k-1)`, capped.
pub fn backoff_schedule(base: Duration, attempts: u32) -> Vec<Duration> {
    (1..attempts)
        .map(|k| {
            let factor = 2u32.saturating_pow(k - 1);
            base.saturating_mul(factor).min(BACKOFF_CAP)
        })
        .collect()
}

/// Per-session LLM parameters
#[derive(Debug, Clone, Serialize)]
pub struct LlmOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Conversation turns carried as context
    pub context_turns: u32,
    pub system_prompt: String,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            temperature: 0.7,
            max_tokens: 256,
            context_turns: 8,
            system_prompt: "Du bist ein hilfreicher Sprachassistent. Antworte kurz, \
                            die Antwort wird vorgelesen."
                .to_string(),
        }
    }
}

/// One past exchange kept as conversation context
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub user: String,
    pub assistant: String,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    question: &'a str,
    #[serde(rename = "overrideConfig")]
    override_config: OverrideConfig<'a>,
    history: Vec<HistoryEntry<'a>>,
}

#[derive(Serialize)]
struct OverrideConfig<'a> {
    temperature: f32,
    #[serde(rename = "maxTokens")]
    max_tokens: u32,
    #[serde(rename = "systemMessage")]
    system_message: &'a str,
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct PredictionResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct ChatflowEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    id: String,
}

/// HTTP client for the external agent
pub struct AgentClient {
    client: reqwest::Client,
    endpoint: Option<String>,
    retry_limit: u32,
    backoff_base: Duration,
}

impl AgentClient {
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| RouterError::Configuration(e.to_string()))?;

        let endpoint = match (&config.flowise_url, &config.flowise_id) {
            (Some(url), Some(id)) => Some(format!(
                "{}/api/v1/prediction/{}",
                url.trim_end_matches('/'),
                id
            )),
            _ => None,
        };

        Ok(Self {
            client,
            endpoint,
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

    /// Ask the agent. Retries transient failures up to the configured
    /// attempt count; an empty reply counts as a failure.
    pub async fn ask(
        &self,
        question: &str,
        options: &LlmOptions,
        history: &[ChatTurn],
    ) -> Result<String, RouterError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or(RouterError::NotConfigured)?;

        let turns = history
            .iter()
            .rev()
            .take(options.context_turns as usize)
            .rev();
        let mut history_entries = Vec::new();
        for turn in turns {
            history_entries.push(HistoryEntry {
                role: "user",
                content: &turn.user,
            });
            history_entries.push(HistoryEntry {
                role: "assistant",
                content: &turn.assistant,
            });
        }

        let request = PredictionRequest {
            question,
            override_config: OverrideConfig {
                temperature: options.temperature,
                max_tokens: options.max_tokens,
                system_message: &options.system_prompt,
            },
            history: history_entries,
        };

        let mut delays = backoff_schedule(self.backoff_base, self.retry_limit).into_iter();
        let mut last_error = RouterError::Agent("no attempts made".into());

        for attempt in 1..=self.retry_limit {
            if attempt > 1 {
                let delay = delays.next().unwrap_or(BACKOFF_CAP);
                tracing::warn!(
                    attempt,
                    limit = self.retry_limit,
                    delay_ms = delay.as_millis() as u64,
                    "Agent call failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
            }

            match self.attempt(endpoint, &request).await {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => {
                    // Empty reply: do not retry, the agent answered.
                    return Err(RouterError::EmptyReply);
                }
                Err(e) => {
                    tracing::debug!(attempt, error = %e, "Agent attempt failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn attempt(
        &self,
        endpoint: &str,
        request: &PredictionRequest<'_>,
    ) -> Result<String, RouterError> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| RouterError::Agent(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RouterError::Agent(format!("{status}: {body}")));
        }

        // The prediction endpoint answers {"text": ...}; tolerate a bare
        // string body from older deployments.
        let raw = response
            .text()
            .await
            .map_err(|e| RouterError::Agent(e.to_string()))?;
        match serde_json::from_str::<PredictionResponse>(&raw) {
            Ok(parsed) => Ok(parsed.text),
            Err(_) => Ok(raw.trim_matches('"').to_string()),
        }
    }

    /// Discovery for `get_llm_models`: list the agent's chatflows, falling
    /// back to the currently selected model when unreachable.
    pub async fn list_models(&self, current: &str) -> Vec<String> {
        let Some(endpoint) = &self.endpoint else {
            return vec![current.to_string()];
        };
        // .../api/v1/prediction/{id} -> .../api/v1/chatflows
        let Some(base) = endpoint.split("/api/v1/").next() else {
            return vec![current.to_string()];
        };
        let url = format!("{base}/api/v1/chatflows");

        let result = tokio::time::timeout(Duration::from_secs(3), self.client.get(&url).send()).await;
        match result {
            Ok(Ok(resp)) if resp.status().is_success() => {
                match resp.json::<Vec<ChatflowEntry>>().await {
                    Ok(entries) if !entries.is_empty() => entries
                        .into_iter()
                        .map(|e| if e.name.is_empty() { e.id } else { e.name })
                        .collect(),
                    _ => vec![current.to_string()],
                }
            }
            _ => {
                tracing::debug!(url, "Chatflow listing unavailable");
                vec![current.to_string()]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let delays = backoff_schedule(Duration::from_secs(1), 6);
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );

        let capped = backoff_schedule(Duration::from_secs(10), 4);
        assert_eq!(capped[2], BACKOFF_CAP);
    }

    #[test]
    fn test_backoff_schedule_single_attempt_is_empty() {
        assert!(backoff_schedule(Duration::from_secs(1), 1).is_empty());
    }

    #[test]
    fn test_endpoint_requires_url_and_id() {
        let mut config = RouterConfig::default();
        config.flowise_url = Some("http://localhost:3000/".into());
        config.flowise_id = None;
        assert!(!AgentClient::new(&config).unwrap().is_configured());

        config.flowise_id = Some("abc".into());
        let client = AgentClient::new(&config).unwrap();
        assert_eq!(
            client.endpoint(),
            Some("http://localhost:3000/api/v1/prediction/abc")
        );
    }
}
