use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Backoff policy for transient provider errors:
/// `base_delay_ms * 2^attempt`, up to `max_retries` attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_true")]
    pub auto: bool,
    #[serde(default = "d_max_retries")]
    pub max_retries: u32,
    #[serde(default = "d_base_delay")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            auto: true,
            max_retries: d_max_retries(),
            base_delay_ms: d_base_delay(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_max_retries() -> u32 {
    3
}
fn d_base_delay() -> u64 {
    1000
}
