use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compaction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Compaction collapses the old branch prefix into a summary so the
/// context window stays healthy after many turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Run threshold compaction automatically at the end of each turn.
    #[serde(default = "d_true")]
    pub auto: bool,
    /// Tokens reserved for the model's response (and the summary itself).
    #[serde(default = "d_reserve")]
    pub reserve_tokens: u64,
    /// Recent-branch tokens kept verbatim when choosing the cut point.
    #[serde(default = "d_keep_recent")]
    pub keep_recent_tokens: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            auto: true,
            reserve_tokens: d_reserve(),
            keep_recent_tokens: d_keep_recent(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_reserve() -> u64 {
    16_384
}
fn d_keep_recent() -> u64 {
    20_000
}
