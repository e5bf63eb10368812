use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_bind")]
    pub bind: String,
    /// Per-command timeout for long-running RPC commands (seconds).
    #[serde(default = "d_rpc_timeout")]
    pub rpc_timeout_secs: u64,
    /// Request body cap for the HTTP plane (bytes).
    #[serde(default = "d_max_body")]
    pub max_body_bytes: usize,
    /// SSE heartbeat cadence (seconds).
    #[serde(default = "d_heartbeat")]
    pub heartbeat_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            bind: d_bind(),
            rpc_timeout_secs: d_rpc_timeout(),
            max_body_bytes: d_max_body(),
            heartbeat_secs: d_heartbeat(),
        }
    }
}

impl ServerConfig {
    /// Apply `CODA_PORT` / `CODA_BIND` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("CODA_PORT") {
            match port.parse::<u16>() {
                Ok(p) => self.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparsable CODA_PORT"),
            }
        }
        if let Ok(bind) = std::env::var("CODA_BIND") {
            if !bind.is_empty() {
                self.bind = bind;
            }
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    19000
}
fn d_bind() -> String {
    "127.0.0.1".into()
}
fn d_rpc_timeout() -> u64 {
    300
}
fn d_max_body() -> usize {
    1024 * 1024
}
fn d_heartbeat() -> u64 {
    30
}
