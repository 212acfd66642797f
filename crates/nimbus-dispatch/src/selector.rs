//! Choosing which agent runs a command.

use nimbus_core::ResourceId;

use crate::error::{DispatchError, Result};
use crate::message::AgentEndpoint;

/// Picks the agent responsible for a resource.
pub trait AgentSelector: Send + Sync {
    /// Select an agent for `kind`/`id`.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::AgentUnavailable` if no agent can take the command.
    fn select(&self, kind: &'static str, id: ResourceId) -> Result<AgentEndpoint>;
}

/// Sends everything to one configured agent.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentSelector {
    endpoint: Option<AgentEndpoint>,
}

impl StaticAgentSelector {
    /// Route every command to `endpoint`.
    #[must_use]
    pub const fn new(endpoint: AgentEndpoint) -> Self {
        Self {
            endpoint: Some(endpoint),
        }
    }

    /// A selector with no agent: every selection fails.
    #[must_use]
    pub const fn unavailable() -> Self {
        Self { endpoint: None }
    }
}

impl AgentSelector for StaticAgentSelector {
    fn select(&self, kind: &'static str, id: ResourceId) -> Result<AgentEndpoint> {
        self.endpoint
            .clone()
            .ok_or_else(|| DispatchError::AgentUnavailable(format!("no agent configured for {kind} {id}")))
    }
}
