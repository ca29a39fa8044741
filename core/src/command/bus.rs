use std::sync::Arc;

use tracing::{debug, error, info};

use super::CommandHandler;
use crate::registry::OrderedRegistry;
use crate::{CommandEnvelope, ConduitError, Payload, ResponseEnvelope, Result};

/// Routes command names to the handler that executes them.
///
/// Unlike [`CommandHandler::execute_command`], which answers unknown commands
/// with an error response, `dispatch` fails fast with
/// [`ConduitError::NoHandlerRegistered`] when no route exists: a missing route
/// is a wiring defect, not a per-request failure.
#[derive(Default)]
pub struct CommandBus {
    handlers: OrderedRegistry<Arc<CommandHandler>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `command_name` to `handler`; later registrations for the same
    /// name replace the previous one.
    pub fn register_handler(&self, command_name: impl Into<String>, handler: Arc<CommandHandler>) {
        let command_name = command_name.into();
        info!(target: "command_bus", command = %command_name, handler = %handler.name(), "Handler registered");
        if self.handlers.insert(command_name.clone(), handler) {
            debug!(target: "command_bus", command = %command_name, "Previous route replaced");
        }
    }

    pub fn handler_for(&self, command_name: &str) -> Option<Arc<CommandHandler>> {
        self.handlers.get(command_name)
    }

    /// Builds a command and executes it on the routed handler.
    #[tracing::instrument(skip(self, parameters), fields(command = %command_name, source = %source))]
    pub async fn dispatch(
        &self,
        command_name: &str,
        parameters: Payload,
        source: &str,
    ) -> Result<ResponseEnvelope> {
        let handler = self.route(command_name)?;
        let command =
            CommandEnvelope::new(command_name, parameters, source).with_destination(handler.name());

        info!(target: "command_bus", command = %command_name, handler = %handler.name(), command_id = %command.id(), "Dispatching command");
        Ok(handler.execute_command(&command).await)
    }

    /// Dispatches an already-built command, keeping its id and source.
    pub async fn dispatch_envelope(&self, command: CommandEnvelope) -> Result<ResponseEnvelope> {
        let handler = self.route(&command.command_name)?;
        info!(target: "command_bus", command = %command.command_name, handler = %handler.name(), command_id = %command.id(), "Dispatching command");
        Ok(handler.execute_command(&command).await)
    }

    /// Registered command names in first-registration order; re-registering
    /// a name keeps its position.
    pub fn list_commands(&self) -> Vec<String> {
        self.handlers.keys()
    }

    fn route(&self, command_name: &str) -> Result<Arc<CommandHandler>> {
        self.handler_for(command_name).ok_or_else(|| {
            error!(target: "command_bus", command = %command_name, "No handler registered");
            ConduitError::NoHandlerRegistered(command_name.to_string())
        })
    }
}

impl std::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBus")
            .field("commands", &self.list_commands())
            .finish()
    }
}
