//! Delivering commands to agents.
//!
//! An agent may answer a command synchronously in the response body, or
//! accept it and answer later through the control plane's answer callback.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::TransportError;
use crate::message::{AgentEndpoint, Answer, Command};

/// Trait for agent communication.
///
/// This trait abstracts the wire protocol, allowing for mock
/// implementations in tests.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Send `command` to the agent at `endpoint`.
    ///
    /// Returns `Some(answer)` when the agent replied in-line and `None` when
    /// the answer will arrive asynchronously.
    ///
    /// # Errors
    ///
    /// Returns an error if the command could not be delivered.
    async fn send(
        &self,
        endpoint: &AgentEndpoint,
        command: &Command,
    ) -> Result<Option<Answer>, TransportError>;
}

/// HTTP transport: `POST {endpoint}/v1/commands` with the command as JSON.
///
/// `200` carries an answer, `202` means the agent will call back.
#[derive(Debug, Clone)]
pub struct HttpAgentTransport {
    client: reqwest::Client,
}

/// Error response from an agent.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpAgentTransport {
    /// Create a transport with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| TransportError::Request(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Create a transport with a custom reqwest client.
    #[must_use]
    pub const fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AgentTransport for HttpAgentTransport {
    async fn send(
        &self,
        endpoint: &AgentEndpoint,
        command: &Command,
    ) -> Result<Option<Answer>, TransportError> {
        let url = format!("{endpoint}/v1/commands");

        let response = self
            .client
            .post(&url)
            .json(command)
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        match response.status() {
            StatusCode::ACCEPTED => {
                tracing::debug!(
                    correlation_id = %command.correlation_id,
                    command = %command.name,
                    "Agent accepted command"
                );
                Ok(None)
            }
            status if status.is_success() => {
                let answer = response
                    .json::<Answer>()
                    .await
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
                Ok(Some(answer))
            }
            status => {
                let message = response
                    .json::<ErrorResponse>()
                    .await
                    .map(|e| e.error)
                    .unwrap_or_else(|_| format!("agent returned status {status}"));

                tracing::error!(
                    correlation_id = %command.correlation_id,
                    command = %command.name,
                    status = %status,
                    error = %message,
                    "Agent rejected command"
                );

                Err(TransportError::Rejected {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

/// Transport that delivers nothing.
///
/// Commands are logged and left unanswered, so they resolve through their
/// timeout. Used when no agent is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopAgentTransport;

impl NoopAgentTransport {
    /// Create a new no-op transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentTransport for NoopAgentTransport {
    async fn send(
        &self,
        endpoint: &AgentEndpoint,
        command: &Command,
    ) -> Result<Option<Answer>, TransportError> {
        tracing::warn!(
            %endpoint,
            correlation_id = %command.correlation_id,
            command = %command.name,
            "NoopAgentTransport: command not sent, no agent transport configured"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AnswerStatus;
    use nimbus_core::{AnswerFields, CorrelationId, ResourceId};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn command() -> Command {
        Command {
            correlation_id: CorrelationId::generate(),
            resource_kind: "template_copy".to_string(),
            resource_id: ResourceId::new(5),
            name: "download_template".to_string(),
            params: AnswerFields::new(),
        }
    }

    fn transport() -> HttpAgentTransport {
        HttpAgentTransport::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn inline_answer_is_returned() {
        let mock_server = MockServer::start().await;
        let command = command();

        Mock::given(method("POST"))
            .and(path("/v1/commands"))
            .and(body_partial_json(serde_json::json!({
                "name": "download_template",
                "resource_id": 5,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "correlation_id": command.correlation_id.to_string(),
                "success": true,
                "status": "DOWNLOADED",
                "fields": { "size_gb": 4 },
            })))
            .mount(&mock_server)
            .await;

        let endpoint = AgentEndpoint::new(mock_server.uri());
        let answer = transport().send(&endpoint, &command).await.unwrap().unwrap();

        assert_eq!(answer.correlation_id, command.correlation_id);
        assert_eq!(answer.status, AnswerStatus::Completed);
        assert_eq!(answer.fields["size_gb"], 4);
    }

    #[tokio::test]
    async fn accepted_means_answer_later() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/commands"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock_server)
            .await;

        let endpoint = AgentEndpoint::new(mock_server.uri());
        let answer = transport().send(&endpoint, &command()).await.unwrap();

        assert!(answer.is_none());
    }

    #[tokio::test]
    async fn error_status_is_rejected() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/commands"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_json(serde_json::json!({ "error": "pool offline" })),
            )
            .mount(&mock_server)
            .await;

        let endpoint = AgentEndpoint::new(mock_server.uri());
        let err = transport().send(&endpoint, &command()).await.unwrap_err();

        assert_eq!(
            err,
            TransportError::Rejected {
                status: 503,
                message: "pool offline".to_string(),
            }
        );
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn garbage_body_is_invalid_response() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&mock_server)
            .await;

        let endpoint = AgentEndpoint::new(mock_server.uri());
        let err = transport().send(&endpoint, &command()).await.unwrap_err();

        assert!(matches!(err, TransportError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn noop_transport_never_answers() {
        let endpoint = AgentEndpoint::new("http://nowhere");
        let answer = NoopAgentTransport::new().send(&endpoint, &command()).await.unwrap();
        assert!(answer.is_none());
    }
}
