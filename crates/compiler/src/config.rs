//! Emitter configuration.
//!
//! Everything here has a default that matches the runtime's
//! expectations; a config file is only needed to deviate (alternate
//! entry-point names for harnesses, assertion-free output for
//! measuring their overhead).

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitterConfig {
    /// Package member handed to `runtime_info_get_entry_point`.
    pub entry_point: String,
    /// Package member handed to `runtime_info_get_init_point`.
    pub init_point: String,
    /// Emit the context-marker and frame-alignment assertions.
    pub assertions: bool,
    /// Echo each lowered instruction as a `//` comment.
    pub line_comments: bool,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        EmitterConfig {
            entry_point: "main".to_string(),
            init_point: "init".to_string(),
            assertions: true,
            line_comments: true,
        }
    }
}

/// Error reading or parsing a config file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {e}"),
            ConfigError::Parse(e) => write!(f, "malformed config: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl EmitterConfig {
    pub fn from_toml(src: &str) -> Result<Self, ConfigError> {
        toml::from_str(src).map_err(ConfigError::Parse)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let src = fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EmitterConfig::default();
        assert_eq!(c.entry_point, "main");
        assert_eq!(c.init_point, "init");
        assert!(c.assertions);
        assert!(c.line_comments);
    }

    #[test]
    fn test_partial_toml_overlays_defaults() {
        let c = EmitterConfig::from_toml("assertions = false\n").unwrap();
        assert!(!c.assertions);
        assert_eq!(c.entry_point, "main");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(EmitterConfig::from_toml("entrypoint = \"m\"\n").is_err());
    }

    #[test]
    fn test_from_path() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("emit.toml");
        let mut f = fs::File::create(&path).unwrap();
        writeln!(f, "entry_point = \"bench_main\"").unwrap();
        let c = EmitterConfig::from_path(&path).unwrap();
        assert_eq!(c.entry_point, "bench_main");
    }
}
