//! Session persistence: the append-only, tree-structured entry log and the
//! branch materializer that turns it into an LLM message list.

pub mod log;
pub mod materialize;

pub use log::SessionLog;
pub use materialize::{estimate_entry_tokens, materialize_branch, materialized_tokens};
