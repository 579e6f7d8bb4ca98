//! Configuration file resolution and loading
//!
//! Config file location follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/cmix/config.toml`)
//! 4. None: the caller falls back to built-in defaults
//!
//! A missing config file is never fatal. A config file that exists but does
//! not parse is an error, so typos are not silently ignored.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CMIX_CONFIG";

/// Resolve which config file to load, if any.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    let platform = default_config_path()?;
    if platform.exists() {
        Some(platform)
    } else {
        debug!("No config file at {}", platform.display());
        None
    }
}

/// Platform config file path (`~/.config/cmix/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cmix").join("config.toml"))
}

/// Load a TOML config file, or `T::default()` if `path` is `None` or missing.
pub fn load_toml_or_default<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        info!("No config file found, using built-in defaults");
        return Ok(T::default());
    };

    match std::fs::read_to_string(path) {
        Ok(content) => {
            let config = toml::from_str::<T>(&content)?;
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                "Config file {} not found, using built-in defaults",
                path.display()
            );
            Ok(T::default())
        }
        Err(e) => Err(Error::Config(format!(
            "Failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        level: String,
        #[serde(default)]
        rate: u32,
    }

    #[test]
    #[serial]
    fn test_cli_argument_has_priority_over_env() {
        std::env::set_var("CMIX_TEST_CONFIG_A", "/tmp/from-env.toml");
        let cli = PathBuf::from("/tmp/from-cli.toml");
        let resolved = resolve_config_path(Some(&cli), "CMIX_TEST_CONFIG_A");
        assert_eq!(resolved, Some(cli));
        std::env::remove_var("CMIX_TEST_CONFIG_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_argument() {
        std::env::set_var("CMIX_TEST_CONFIG_B", "/tmp/from-env.toml");
        let resolved = resolve_config_path(None, "CMIX_TEST_CONFIG_B");
        assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));
        std::env::remove_var("CMIX_TEST_CONFIG_B");
    }

    #[test]
    fn test_missing_path_yields_default() {
        let loaded: Sample = load_toml_or_default(None).unwrap();
        assert_eq!(loaded, Sample::default());

        let missing = PathBuf::from("/nonexistent/cmix/config.toml");
        let loaded: Sample = load_toml_or_default(Some(&missing)).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn test_load_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "level = \"debug\"\nrate = 48000").unwrap();

        let loaded: Sample = load_toml_or_default(Some(file.path())).unwrap();
        assert_eq!(loaded.level, "debug");
        assert_eq!(loaded.rate, 48000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rate = \"not a number\"").unwrap();

        let result: Result<Sample> = load_toml_or_default(Some(file.path()));
        assert!(matches!(result, Err(Error::Toml(_))));
    }
}
