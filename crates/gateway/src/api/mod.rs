//! Control-plane transports: the HTTP surface (REST + SSE) and the
//! line-delimited stdio equivalent.

pub mod events;
pub mod http;
pub mod stdio;
