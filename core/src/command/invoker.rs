use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{error, info, warn};

use super::CommandHandler;
use crate::{CommandEnvelope, ConduitConfig, ConduitError, Payload, ResponseEnvelope, Result};

/// Client side of request/reply: builds commands and waits for their response.
pub struct CommandInvoker {
    name: String,
    default_timeout: Duration,
}

impl CommandInvoker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, &ConduitConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: &ConduitConfig) -> Self {
        Self {
            name: name.into(),
            default_timeout: config.command_timeout(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Executes a command on `handler`, waiting at most `wait`.
    ///
    /// Handler-level failures come back as error responses. Only an elapsed
    /// wait is raised, as [`ConduitError::CommandTimeout`]: the outcome is then
    /// unknown. The handler future is dropped at that point, which cancels it
    /// at its next suspension.
    #[tracing::instrument(skip(self, handler, parameters), fields(invoker = %self.name, handler = %handler.name(), command = %command_name, timeout_ms = wait.as_millis() as u64))]
    pub async fn invoke_command(
        &self,
        handler: &CommandHandler,
        command_name: &str,
        parameters: Payload,
        wait: Duration,
    ) -> Result<ResponseEnvelope> {
        let command = CommandEnvelope::new(command_name, parameters, self.name.clone())
            .with_destination(handler.name());
        let started = Instant::now();
        info!(target: "command_invoker", command = %command_name, command_id = %command.id(), "Invoking command");

        match timeout(wait, handler.execute_command(&command)).await {
            Ok(response) => {
                info!(
                    target: "command_invoker",
                    command = %command_name,
                    status = ?response.status(),
                    latency_ms = started.elapsed().as_secs_f64() * 1000.0,
                    "Command completed"
                );
                Ok(response)
            }
            Err(_) => {
                warn!(target: "command_invoker", command = %command_name, command_id = %command.id(), "Command timed out");
                Err(ConduitError::CommandTimeout {
                    command: command_name.to_string(),
                    timeout_ms: wait.as_millis() as u64,
                })
            }
        }
    }

    /// `invoke_command` bounded by the configured default timeout.
    pub async fn invoke_command_default(
        &self,
        handler: &CommandHandler,
        command_name: &str,
        parameters: Payload,
    ) -> Result<ResponseEnvelope> {
        self.invoke_command(handler, command_name, parameters, self.default_timeout)
            .await
    }

    /// Fire-and-forget: starts the command on a detached task and returns its
    /// id right away.
    ///
    /// No handle is kept, so the command cannot be awaited or cancelled later;
    /// its outcome is only logged. Must be called inside a Tokio runtime.
    pub fn invoke_async(
        &self,
        handler: Arc<CommandHandler>,
        command_name: &str,
        parameters: Payload,
    ) -> String {
        let command = CommandEnvelope::new(command_name, parameters, self.name.clone())
            .with_destination(handler.name());
        let command_id = command.id().to_string();
        info!(target: "command_invoker", command = %command_name, command_id = %command_id, "Invoking command asynchronously");

        tokio::spawn(async move {
            let response = handler.execute_command(&command).await;
            match response.error() {
                None => {
                    info!(target: "command_invoker", command = %command.command_name, command_id = %command.id(), "Async command completed")
                }
                Some(err) => {
                    error!(target: "command_invoker", command = %command.command_name, command_id = %command.id(), error = %err, "Async command failed")
                }
            }
        });

        command_id
    }
}

impl Default for CommandInvoker {
    fn default() -> Self {
        Self::new("CommandInvoker")
    }
}
