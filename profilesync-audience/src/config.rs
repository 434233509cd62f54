use serde::{Deserialize, Serialize};

/// Audience reconciliation and compilation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilationConfig {
    /// Sweeps at least this large stop a running compilation job instead
    /// of backing off.
    pub batch_threshold: usize,
    /// Audiences compiled per sweep by [`CompilationSweep::drain`](crate::CompilationSweep::drain).
    pub drain_max: usize,
    /// Name prefix given to retired audiences.
    pub obsolete_prefix: String,
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 10,
            drain_max: 50,
            obsolete_prefix: "OBSOLETE".to_string(),
        }
    }
}
