//! Command messages: handlers execute named commands, the invoker waits on
//! them with a timeout, the bus routes names to handlers.

pub mod bus;
pub mod function;
pub mod handler;
pub mod invoker;

pub use bus::CommandBus;
pub use function::{AsyncFn, CommandFunction, SyncFn};
pub use handler::CommandHandler;
pub use invoker::CommandInvoker;
