//! Shared domain types for the Coda session kernel.
//!
//! Everything the other crates agree on lives here: session entries and
//! their wire format, provider-agnostic LLM messages, streaming events,
//! the session event taxonomy, configuration, and the shared error type.

pub mod config;
pub mod entry;
pub mod error;
pub mod event;
pub mod message;
pub mod stream;

pub use error::{Error, ProviderErrorKind, Result};
