//! Intent routing
//!
//! One utterance resolves to exactly one intent: the first claiming local
//! skill, the external agent, the automation webhook, or echo. External
//! failures degrade down the chain so the user always gets a spoken reply.

pub mod agent;
pub mod skills;
pub mod webhook;

pub use agent::{backoff_schedule, AgentClient, ChatTurn, LlmOptions};
pub use skills::{build_skills, Skill};
pub use webhook::WebhookClient;

use thiserror::Error;

use voicehub_config::RouterConfig;

/// Router errors
#[derive(Error, Debug)]
pub enum RouterError {
    #[error("router misconfigured: {0}")]
    Configuration(String),

    #[error("external endpoint not configured")]
    NotConfigured,

    #[error("agent call failed: {0}")]
    Agent(String),

    #[error("agent returned an empty reply")]
    EmptyReply,

    #[error("webhook call failed: {0}")]
    Webhook(String),
}

/// Classification of one utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    LocalSkill { name: String },
    ExternalAgent { endpoint: String },
    Automation { endpoint: String },
    Echo,
}

/// The routed reply handed to staged TTS
#[derive(Debug, Clone)]
pub struct RoutedReply {
    pub intent: Intent,
    pub reply: String,
    /// True when an external dependency exhausted its retries and the
    /// router degraded; the session surfaces `routing_failed` alongside
    /// the echoed reply.
    pub routing_failed: bool,
}

/// The intent router
pub struct IntentRouter {
    skills: Vec<Box<dyn Skill>>,
    agent: AgentClient,
    webhook: WebhookClient,
}

impl IntentRouter {
    pub fn new(config: &RouterConfig) -> Result<Self, RouterError> {
        Ok(Self {
            skills: build_skills(&config.enabled_skills),
            agent: AgentClient::new(config)?,
            webhook: WebhookClient::new(config)?,
        })
    }

    pub fn agent(&self) -> &AgentClient {
        &self.agent
    }

    /// Resolve one utterance to an intent and reply text.
    ///
    /// Order: skills (registration order) -> external agent -> automation
    /// webhook (keyword policy) -> echo.
    pub async fn route(
        &self,
        text: &str,
        language: &str,
        llm: &LlmOptions,
        history: &[ChatTurn],
    ) -> RoutedReply {
        let text = text.trim();

        // 1. Local skills.
        for skill in &self.skills {
            if skill.can_handle(text, language) {
                let reply = skill.handle(text).await;
                tracing::info!(skill = skill.name(), "Utterance handled by skill");
                return RoutedReply {
                    intent: Intent::LocalSkill {
                        name: skill.name().to_string(),
                    },
                    reply,
                    routing_failed: false,
                };
            }
        }

        // 2. External agent.
        let mut routing_failed = false;
        if self.agent.is_configured() {
            match self.agent.ask(text, llm, history).await {
                Ok(reply) => {
                    return RoutedReply {
                        intent: Intent::ExternalAgent {
                            endpoint: self.agent.endpoint().unwrap_or_default().to_string(),
                        },
                        reply,
                        routing_failed: false,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Agent routing failed, falling through");
                    routing_failed = true;
                }
            }
        }

        // 3. Automation webhook.
        if self.webhook.is_configured() && self.webhook.matches(text) {
            match self.webhook.trigger(text).await {
                Ok(ack) => {
                    return RoutedReply {
                        intent: Intent::Automation {
                            endpoint: self.webhook.endpoint().unwrap_or_default().to_string(),
                        },
                        reply: ack,
                        routing_failed,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Webhook routing failed, falling through");
                    routing_failed = true;
                }
            }
        }

        // 4. Echo: the transcript itself is the reply.
        RoutedReply {
            intent: Intent::Echo,
            reply: text.to_string(),
            routing_failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn offline_config() -> RouterConfig {
        RouterConfig {
            flowise_url: None,
            flowise_id: None,
            n8n_url: None,
            n8n_token: None,
            webhook_keywords: vec!["schalte".into()],
            enabled_skills: vec!["time".into(), "greeting".into()],
            retry_limit: 3,
            retry_backoff_secs: 0,
            request_timeout_secs: 2,
        }
    }

    /// Throwaway HTTP server counting hits, answering `status` on any path
    async fn mock_endpoint(
        status: axum::http::StatusCode,
        body: &'static str,
    ) -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let app = axum::Router::new().fallback(move || {
            let hits = hits_clone.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (status, body)
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    #[tokio::test]
    async fn test_skill_short_circuits_before_external_calls() {
        // With the time skill enabled no external HTTP call happens even
        // though an (unreachable) agent is configured.
        let mut config = offline_config();
        config.flowise_url = Some("http://127.0.0.1:9".into());
        config.flowise_id = Some("flow".into());
        let router = IntentRouter::new(&config).unwrap();

        let reply = router
            .route("Wie spät ist es?", "de", &LlmOptions::default(), &[])
            .await;
        assert_eq!(
            reply.intent,
            Intent::LocalSkill {
                name: "time".into()
            }
        );
        assert!(!reply.routing_failed);
        assert!(reply.reply.starts_with("Es ist "));
        assert!(reply.reply.ends_with(" Uhr."));
    }

    #[tokio::test]
    async fn test_unrouted_text_echoes() {
        let router = IntentRouter::new(&offline_config()).unwrap();
        let reply = router
            .route("Erzähl mir etwas über Rust", "de", &LlmOptions::default(), &[])
            .await;
        assert_eq!(reply.intent, Intent::Echo);
        assert_eq!(reply.reply, "Erzähl mir etwas über Rust");
        assert!(!reply.routing_failed);
    }

    #[tokio::test]
    async fn test_agent_success_routes_externally() {
        let (addr, hits) =
            mock_endpoint(axum::http::StatusCode::OK, r#"{"text":"Eine Antwort."}"#).await;
        let config = RouterConfig {
            flowise_url: Some(format!("http://{addr}")),
            flowise_id: Some("flow-1".into()),
            ..offline_config()
        };
        let router = IntentRouter::new(&config).unwrap();

        let reply = router
            .route("Etwas ohne Skill", "de", &LlmOptions::default(), &[])
            .await;
        assert!(matches!(reply.intent, Intent::ExternalAgent { .. }));
        assert_eq!(reply.reply, "Eine Antwort.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_agent_reply_degrades_to_echo() {
        let (addr, hits) = mock_endpoint(axum::http::StatusCode::OK, r#"{"text":""}"#).await;
        let config = RouterConfig {
            flowise_url: Some(format!("http://{addr}")),
            flowise_id: Some("flow-1".into()),
            ..offline_config()
        };
        let router = IntentRouter::new(&config).unwrap();

        let reply = router
            .route("Etwas ohne Skill", "de", &LlmOptions::default(), &[])
            .await;
        assert_eq!(reply.intent, Intent::Echo);
        assert!(reply.routing_failed);
        // Empty reply is answered, not retried.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_law_exactly_retry_limit_calls() {
        // A dependency failing every attempt is called exactly
        // retry_limit times, no more.
        let (addr, hits) =
            mock_endpoint(axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let config = RouterConfig {
            n8n_url: Some(format!("http://{addr}/")),
            retry_limit: 3,
            retry_backoff_secs: 0,
            ..offline_config()
        };
        let webhook = WebhookClient::new(&config).unwrap();

        let err = webhook.trigger("schalte das Licht ein").await.unwrap_err();
        assert!(matches!(err, RouterError::Webhook(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_webhook_acknowledgement() {
        let (addr, hits) = mock_endpoint(axum::http::StatusCode::OK, "ok").await;
        let config = RouterConfig {
            n8n_url: Some(format!("http://{addr}/")),
            ..offline_config()
        };
        let router = IntentRouter::new(&config).unwrap();

        let reply = router
            .route("Schalte das Licht an", "de", &LlmOptions::default(), &[])
            .await;
        assert!(matches!(reply.intent, Intent::Automation { .. }));
        assert_eq!(reply.reply, "Okay, wird erledigt.");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_agent_degrades_to_echo_with_flag() {
        // Unreachable agent endpoint: retries exhaust, reply echoes, the
        // routing_failed flag is set for the error surface.
        let config = RouterConfig {
            flowise_url: Some("http://127.0.0.1:1".into()),
            flowise_id: Some("flow".into()),
            retry_limit: 2,
            retry_backoff_secs: 0,
            ..offline_config()
        };
        let router = IntentRouter::new(&config).unwrap();

        let reply = router
            .route("Etwas ohne Skill", "de", &LlmOptions::default(), &[])
            .await;
        assert_eq!(reply.intent, Intent::Echo);
        assert_eq!(reply.reply, "Etwas ohne Skill");
        assert!(reply.routing_failed);
    }
}
