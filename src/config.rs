//! Engine configuration and environment resolution
//!
//! Centralizes the environment variables the engine recognises:
//! - `ANTHROPIC_API_KEY`: LLM credential (warned at load, fatal at session start)
//! - `XDG_DATA_HOME`: fallback root for the default database path
//! - `MNEMOSYNE_LOG_LEVEL` / `MNEMOSYNE_LOG_FILE`: tracing configuration
//! - `MNEMOSYNE_DISABLE_EVALUATION`: disables the relevance-learning port

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Environment variable holding the LLM credential
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Environment variable controlling the log filter
pub const LOG_LEVEL_VAR: &str = "MNEMOSYNE_LOG_LEVEL";

/// Environment variable redirecting logs to a file
pub const LOG_FILE_VAR: &str = "MNEMOSYNE_LOG_FILE";

/// Environment variable disabling relevance learning
pub const DISABLE_EVALUATION_VAR: &str = "MNEMOSYNE_DISABLE_EVALUATION";

/// Resolve the LLM API key from the environment.
///
/// Absence is not fatal here: agents validate the key again at
/// `start_session` and fail there. Loading with a missing key only warns,
/// matching the behavior of environment validation at startup.
pub fn resolve_api_key() -> Option<String> {
    match std::env::var(API_KEY_VAR) {
        Ok(key) if !key.is_empty() => Some(key),
        _ => {
            warn!(
                "{} not set; agent sessions will fail to start without API access",
                API_KEY_VAR
            );
            None
        }
    }
}

/// Whether the relevance-learning port should be disabled.
pub fn evaluation_disabled() -> bool {
    std::env::var(DISABLE_EVALUATION_VAR)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Resolve the default database path.
///
/// Priority:
/// 1. `.mnemosyne/project.db` (if present)
/// 2. `$XDG_DATA_HOME/mnemosyne/mnemosyne.db`
/// 3. `~/.local/share/mnemosyne/mnemosyne.db`
pub fn default_db_path() -> PathBuf {
    let project_db = PathBuf::from(".mnemosyne/project.db");
    if project_db.exists() {
        return project_db;
    }

    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join("mnemosyne").join("mnemosyne.db");
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local")
        .join("share")
        .join("mnemosyne")
        .join("mnemosyne.db")
}

/// Top-level engine configuration.
///
/// Every agent's configuration is a fixed record of well-known fields; there
/// is no open-ended keyword surface.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Context monitor polling interval (default 10 ms)
    pub polling_interval: Duration,

    /// Utilization at which preservation fires (default 0.75)
    pub preservation_threshold: f64,

    /// Utilization at which emergency compaction fires (default 0.90)
    pub critical_threshold: f64,

    /// Maximum concurrent graph tasks (default 4)
    pub max_concurrent: usize,

    /// Per-task execution deadline (default 30 s)
    pub spawn_timeout: Duration,

    /// Maximum review-retry attempts before giving up (default 3)
    pub max_review_attempts: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(10),
            preservation_threshold: 0.75,
            critical_threshold: 0.90,
            max_concurrent: 4,
            spawn_timeout: Duration::from_secs(30),
            max_review_attempts: 3,
        }
    }
}
