use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::function::{AsyncFn, CommandFunction, SyncFn};
use crate::registry::OrderedRegistry;
use crate::{panic_message, CommandEnvelope, Envelope, Payload, ResponseEnvelope, Result};

/// Executes named commands and answers each one with a [`ResponseEnvelope`].
///
/// Failures at this layer (unknown command, failing or panicking body) are
/// reported as error responses and never raised. Bindings can be added at any time, also
/// while commands are in flight.
///
/// # Examples
///
/// ```
/// use conduit_core::{CommandEnvelope, CommandHandler, Payload};
/// use serde_json::json;
///
/// # async fn example() {
/// let handler = CommandHandler::new("calculator")
///     .with_fn("double", |p: Payload| Ok(json!(p["n"].as_i64().unwrap_or(0) * 2)));
///
/// let mut params = Payload::new();
/// params.insert("n".into(), json!(21));
/// let response = handler
///     .execute_command(&CommandEnvelope::new("double", params, "caller"))
///     .await;
/// assert_eq!(response.result(), Some(&json!(42)));
/// # }
/// ```
pub struct CommandHandler {
    name: String,
    commands: OrderedRegistry<Arc<dyn CommandFunction>>,
}

impl CommandHandler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            commands: OrderedRegistry::new(),
        }
    }

    /// Creates a handler with an initial set of bindings.
    pub fn with_commands<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = (S, Arc<dyn CommandFunction>)>,
        S: Into<String>,
    {
        let handler = Self::new(name);
        for (command, function) in commands {
            handler.commands.insert(command.into(), function);
        }
        info!(target: "command_handler", handler = %handler.name, commands = handler.commands.len(), "Handler created");
        handler
    }

    pub fn with_fn<F>(self, command: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_fn(command, f);
        self
    }

    pub fn with_async_fn<F, Fut>(self, command: impl Into<String>, f: F) -> Self
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_async_fn(command, f);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds a command name to a function, replacing any previous binding.
    pub fn register_command(&self, command: impl Into<String>, function: Arc<dyn CommandFunction>) {
        let command = command.into();
        info!(target: "command_handler", handler = %self.name, command = %command, "Command registered");
        if self.commands.insert(command.clone(), function) {
            debug!(target: "command_handler", handler = %self.name, command = %command, "Previous binding replaced");
        }
    }

    pub fn register_fn<F>(&self, command: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Result<Value> + Send + Sync + 'static,
    {
        self.register_command(command, Arc::new(SyncFn(f)));
    }

    pub fn register_async_fn<F, Fut>(&self, command: impl Into<String>, f: F)
    where
        F: Fn(Payload) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register_command(command, Arc::new(AsyncFn(f)));
    }

    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }

    /// Registered command names in first-registration order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.keys()
    }

    /// Executes a command and always answers with a response.
    #[tracing::instrument(skip(self, command), fields(handler = %self.name, command = %command.command_name, command_id = %command.id()))]
    pub async fn execute_command(&self, command: &CommandEnvelope) -> ResponseEnvelope {
        let name = &command.command_name;

        let function = match self.commands.get(name) {
            Some(function) => function,
            None => {
                error!(target: "command_handler", handler = %self.name, command = %name, "Unknown command");
                return ResponseEnvelope::failure(
                    &command.envelope,
                    self.name.clone(),
                    format!("Unknown command: {name}"),
                );
            }
        };

        debug!(target: "command_handler", handler = %self.name, command = %name, command_id = %command.id(), "Executing command");
        let outcome = AssertUnwindSafe(function.invoke(command.parameters.clone()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(result)) => {
                ResponseEnvelope::success(&command.envelope, self.name.clone(), result)
            }
            Ok(Err(err)) => {
                error!(target: "command_handler", handler = %self.name, command = %name, error = %err, "Command failed");
                ResponseEnvelope::failure(&command.envelope, self.name.clone(), err.to_string())
            }
            Err(panic) => {
                let panic = panic_message(&panic);
                error!(target: "command_handler", handler = %self.name, command = %name, panic = %panic, "Command panicked");
                ResponseEnvelope::failure(
                    &command.envelope,
                    self.name.clone(),
                    format!("Command panicked: {panic}"),
                )
            }
        }
    }

    /// Entry point for envelopes that arrive untyped, e.g. from a transport.
    ///
    /// Anything that does not decode as a command gets an error response.
    pub async fn process_message(&self, envelope: Envelope) -> ResponseEnvelope {
        let original = envelope.clone();
        match CommandEnvelope::try_from(envelope) {
            Ok(command) => self.execute_command(&command).await,
            Err(err) => {
                warn!(target: "command_handler", handler = %self.name, message_id = %original.id(), error = %err, "Message is not a command");
                ResponseEnvelope::failure(&original, self.name.clone(), err.to_string())
            }
        }
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("name", &self.name)
            .field("commands", &self.commands())
            .finish()
    }
}
