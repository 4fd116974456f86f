//! Risk limit sets are declared in a TOML file and hot-reloadable at
//! runtime. An invalid file is fatal at startup; a missing file falls back
//! to the built-in defaults.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::domain::risk::limits::RiskLimitSet;

#[derive(Debug, serde::Deserialize)]
struct LimitsFile {
    limits: RiskLimitSet,
}

/// Load and validate the limit set from `path`. Missing file means the
/// operator accepted the defaults; a malformed or invalid file is an error
/// because silently trading under wrong limits is worse than not starting.
pub fn load_limits(path: &Path) -> Result<RiskLimitSet> {
    if !path.exists() {
        warn!(path = %path.display(), "Limits file not found, using built-in defaults");
        return Ok(RiskLimitSet::default());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read limits file {}", path.display()))?;
    let parsed: LimitsFile = toml::from_str(&raw)
        .with_context(|| format!("Failed to parse limits file {}", path.display()))?;
    parsed
        .limits
        .validate()
        .with_context(|| format!("Limits file {} failed validation", path.display()))?;

    info!(
        name = %parsed.limits.name,
        version = parsed.limits.version,
        "Loaded risk limits"
    );
    Ok(parsed.limits)
}
