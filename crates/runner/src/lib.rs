//! Conversation execution for PromptKit Arena.
//!
//! The [`pipeline`] module builds the middleware chain that produces each
//! model response (template -> context -> validation -> provider + hooks);
//! the [`runner`] walks a scenario's turns through that chain, handling
//! self-play, tool loops, streaming aborts, retries, and timeouts. Events
//! fan out on the [`bus`], and cancellation cascades through [`cancel`]
//! tokens.

pub mod bus;
pub mod cancel;
pub mod pipeline;
pub mod runner;
pub mod template;

pub use bus::EventBus;
pub use cancel::CancelToken;
pub use pipeline::{ExecutionContext, Middleware, Pipeline, Terminal};
pub use runner::{ConversationRunner, RunSetup, RunnerConfig};
