use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Root directory the file tools are confined to.
    #[serde(default = "d_workspace_root")]
    pub workspace_root: PathBuf,
    /// Hard timeout for `bash` invocations (seconds).
    #[serde(default = "d_bash_timeout")]
    pub bash_timeout_secs: u64,
    /// Directory where truncated tool output spills full copies.
    /// Defaults to `<state_dir>/tool-output` when unset.
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace_root: d_workspace_root(),
            bash_timeout_secs: d_bash_timeout(),
            spill_dir: None,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_workspace_root() -> PathBuf {
    PathBuf::from(".")
}
fn d_bash_timeout() -> u64 {
    600
}
