//! Loading: file read, `${VAR}` substitution, env overrides.

use std::env;
use std::path::Path;

use tracing::info;

use crate::{ConfigError, NightwatchConfig};

/// Loads, substitutes, parses, applies env overrides and validates.
pub fn load_file(path: &Path) -> Result<NightwatchConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!(path = %path.display(), "loading configuration");
    load_str(&content)
}

/// Parses configuration from a YAML string (after substitution and
/// overrides). Validation runs before returning.
pub fn load_str(content: &str) -> Result<NightwatchConfig, ConfigError> {
    let substituted = substitute_env(content);
    let mut config: NightwatchConfig = serde_yaml::from_str(&substituted)?;
    apply_env_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Replaces `${VAR}` and `${VAR:-default}` references with environment
/// values. Unset variables without a default are left verbatim.
pub fn substitute_env(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let inner = &after[..end];
                let (name, default) = match inner.split_once(":-") {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => match default {
                        Some(d) => out.push_str(d),
                        None => {
                            out.push_str("${");
                            out.push_str(inner);
                            out.push('}');
                        }
                    },
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// The named environment overrides recognized regardless of file content.
fn apply_env_overrides(config: &mut NightwatchConfig) {
    if let Ok(level) = env::var("NIGHTWATCH_LOG_LEVEL") {
        config.system.log_level = level.to_ascii_lowercase();
    }
    if let Ok(mock) = env::var("NIGHTWATCH_MOCK") {
        config.mock_sensors = matches!(mock.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}
