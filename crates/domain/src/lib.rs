//! Shared domain types for PromptKit Arena.
//!
//! Everything that crosses a crate boundary lives here: the message model,
//! stream chunks, run results, capabilities, configuration documents, the
//! shared error type, and the event vocabulary published on the run bus.

pub mod capability;
pub mod clock;
pub mod config;
pub mod cost;
pub mod duration;
pub mod error;
pub mod events;
pub mod message;
pub mod result;
pub mod stream;
pub mod validation;

pub use error::{Error, ErrorClass, Result};
