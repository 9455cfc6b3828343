use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Busy-wait after each executed END_BLOCK to put artificial load on the
    /// chain (`END_BLOCK_SPIN_MS`).
    pub end_block_spin: Option<Duration>,
    /// Log every block lifecycle step at info level (`VERBOSE_BLOCKS`).
    pub verbose_blocks: bool,
    /// Name attached to this node's log spans (`DEBUG_NAME`).
    pub debug_name: Option<String>,
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let end_block_spin = lookup("END_BLOCK_SPIN_MS").and_then(|raw| {
            match raw.trim().parse::<u64>() {
                Ok(0) => None,
                Ok(ms) => Some(Duration::from_millis(ms)),
                Err(_) => {
                    tracing::warn!(value = %raw, "ignoring invalid END_BLOCK_SPIN_MS");
                    None
                }
            }
        });
        let verbose_blocks = lookup("VERBOSE_BLOCKS").is_some_and(|raw| is_truthy(&raw));
        let debug_name = lookup("DEBUG_NAME").filter(|name| !name.is_empty());
        Self {
            end_block_spin,
            verbose_blocks,
            debug_name,
        }
    }
}

fn is_truthy(raw: &str) -> bool {
    !matches!(raw.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}
