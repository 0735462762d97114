//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use cm_core::config::{self, MuxConfig};

use crate::output::{print_info, print_success};

/// Load the configuration from `path`, or the default location if it exists.
///
/// An explicit path must exist; a missing default file yields defaults.
pub fn load_or_default(path: Option<&Path>) -> Result<MuxConfig> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => {
            let default_path = config::default_config_path();
            if default_path.exists() {
                config::load_config(&default_path)
                    .with_context(|| format!("Failed to load config from {:?}", default_path))
            } else {
                tracing::debug!("No config at {:?}; using defaults", default_path);
                Ok(MuxConfig::default())
            }
        }
    }
}

/// Print the effective configuration as TOML
pub fn config_show(path: Option<&Path>) -> Result<()> {
    let config = load_or_default(path)?;
    let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("{}", content);
    Ok(())
}

/// Write a default configuration file
pub fn config_init(path: Option<&Path>, force: bool) -> Result<PathBuf> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path);

    if path.exists() && !force {
        print_info("Use --force to overwrite");
        bail!("Config file already exists: {:?}", path);
    }

    config::save_config(&path, &MuxConfig::default())
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    print_success(&format!("Wrote default config to {:?}", path));
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        config_init(Some(&path), false).unwrap();
        let loaded = load_or_default(Some(&path)).unwrap();
        assert_eq!(loaded, MuxConfig::default());

        assert!(config_init(Some(&path), false).is_err());
        assert!(config_init(Some(&path), true).is_ok());
    }

    #[test]
    fn test_explicit_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_or_default(Some(&dir.path().join("nope.toml"))).is_err());
    }
}
