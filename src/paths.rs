//! Config file location for kubectl-arcane
//!
//! # Environment Variables
//!
//! - `KUBECTL_ARCANE_CONFIG_DIR` - Override config directory
//!
//! # Path Resolution Priority
//!
//! 1. `KUBECTL_ARCANE_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/kubectl-arcane` (if set)
//! 3. `~/.config/kubectl-arcane`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "KUBECTL_ARCANE_CONFIG_DIR";

const APP_DIR: &str = "kubectl-arcane";
const CONFIG_FILE: &str = "config.toml";

/// Get the kubectl-arcane config directory path
pub fn config_dir() -> Result<PathBuf> {
    resolve_config_dir(
        std::env::var(ENV_CONFIG_DIR).ok().as_deref(),
        std::env::var("XDG_CONFIG_HOME").ok().as_deref(),
        dirs::home_dir().as_deref(),
    )
}

/// Get the config file path
pub fn config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

fn resolve_config_dir(
    override_dir: Option<&str>,
    xdg_config: Option<&str>,
    home: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        let path = expand(dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Some(xdg) = xdg_config.filter(|d| !d.is_empty()) {
        let path = PathBuf::from(xdg).join(APP_DIR);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    let home = home.context("Could not determine home directory")?;
    Ok(home.join(".config").join(APP_DIR))
}

/// Expand `~` and environment variables in a path
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_wins() {
        let dir = resolve_config_dir(
            Some("/custom/arcane"),
            Some("/xdg"),
            Some(Path::new("/home/u")),
        )
        .unwrap();
        assert_eq!(dir, PathBuf::from("/custom/arcane"));
    }

    #[test]
    fn test_xdg_config_home() {
        let dir = resolve_config_dir(None, Some("/xdg"), Some(Path::new("/home/u"))).unwrap();
        assert_eq!(dir, PathBuf::from("/xdg/kubectl-arcane"));
    }

    #[test]
    fn test_default_under_home() {
        let dir = resolve_config_dir(None, None, Some(Path::new("/home/u"))).unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.config/kubectl-arcane"));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let dir = resolve_config_dir(Some(""), Some(""), Some(Path::new("/home/u"))).unwrap();
        assert_eq!(dir, PathBuf::from("/home/u/.config/kubectl-arcane"));
    }

    #[test]
    fn test_no_home_is_an_error() {
        assert!(resolve_config_dir(None, None, None).is_err());
    }

    #[test]
    fn test_expand_with_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand("~/token"), home.join("token"));
    }

    #[test]
    fn test_expand_absolute() {
        assert_eq!(expand("/var/run/token"), PathBuf::from("/var/run/token"));
    }
}
