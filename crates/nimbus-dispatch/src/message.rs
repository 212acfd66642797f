//! Commands sent to agents and the answers they send back.

use std::fmt;
use std::str::FromStr;

use nimbus_core::{AnswerFields, CorrelationId, ResourceId};
use serde::{Deserialize, Serialize};

/// Base URL of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentEndpoint(String);

impl AgentEndpoint {
    /// Wrap a base URL such as `http://agent-3:8250`. A trailing slash is dropped.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let mut url = url.into();
        while url.ends_with('/') {
            url.pop();
        }
        Self(url)
    }

    /// The base URL.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work shipped to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Ties the eventual answer back to this command.
    pub correlation_id: CorrelationId,
    /// Resource kind name.
    pub resource_kind: String,
    /// Target resource.
    pub resource_id: ResourceId,
    /// Operation name, e.g. `download_template`.
    pub name: String,
    /// Operation parameters.
    #[serde(default)]
    pub params: AnswerFields,
}

/// Status reported by an agent.
///
/// Agents report free-form strings; the ones the dispatcher cares about are
/// mapped here and everything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AnswerStatus {
    /// The operation finished.
    Completed,
    /// Still running; the answer is a heartbeat.
    InProgress,
    /// The operation failed.
    Error,
    /// The agent gave up on the operation.
    Abandoned,
    /// No recognised status.
    #[default]
    Unknown,
}

impl AnswerStatus {
    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::InProgress => "IN_PROGRESS",
            Self::Error => "ERROR",
            Self::Abandoned => "ABANDONED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for AnswerStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "COMPLETED" | "DOWNLOADED" | "SUCCEEDED" | "SUCCESS" => Self::Completed,
            "IN_PROGRESS" | "DOWNLOAD_IN_PROGRESS" | "NOT_DOWNLOADED" => Self::InProgress,
            "ERROR" | "DOWNLOAD_ERROR" | "FAILED" => Self::Error,
            "ABANDONED" => Self::Abandoned,
            _ => Self::Unknown,
        })
    }
}

impl From<String> for AnswerStatus {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(status) => status,
            Err(never) => match never {},
        }
    }
}

impl From<AnswerStatus> for String {
    fn from(status: AnswerStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for AnswerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An agent's reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    /// Correlation id of the command being answered.
    pub correlation_id: CorrelationId,
    /// Whether the agent considers the command successful.
    pub success: bool,
    /// Reported status.
    #[serde(default)]
    pub status: AnswerStatus,
    /// Error text or other detail.
    #[serde(default)]
    pub details: Option<String>,
    /// Progress percentage for heartbeats.
    #[serde(default)]
    pub progress: Option<u8>,
    /// Result fields (size, checksum, install path...).
    #[serde(default)]
    pub fields: AnswerFields,
}

impl Answer {
    /// A successful, finished answer.
    #[must_use]
    pub fn completed(correlation_id: CorrelationId, fields: AnswerFields) -> Self {
        Self {
            correlation_id,
            success: true,
            status: AnswerStatus::Completed,
            details: None,
            progress: Some(100),
            fields,
        }
    }

    /// A failed answer.
    #[must_use]
    pub fn failed(correlation_id: CorrelationId, details: impl Into<String>) -> Self {
        Self {
            correlation_id,
            success: false,
            status: AnswerStatus::Error,
            details: Some(details.into()),
            progress: None,
            fields: AnswerFields::new(),
        }
    }

    /// A heartbeat reporting progress.
    #[must_use]
    pub fn in_progress(correlation_id: CorrelationId, percent: u8) -> Self {
        Self {
            correlation_id,
            success: true,
            status: AnswerStatus::InProgress,
            details: None,
            progress: Some(percent.min(100)),
            fields: AnswerFields::new(),
        }
    }

    /// A heartbeat that leaves the command outstanding.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.status == AnswerStatus::InProgress
    }

    /// A final answer that should raise the success event.
    ///
    /// Only a completed status counts; an unrecognised one is a failure even
    /// when `success` is set.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success && self.status == AnswerStatus::Completed
    }

    /// Error text to record for a failed answer.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.details
            .clone()
            .unwrap_or_else(|| format!("agent reported {}", self.status))
    }
}
