use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::Strategy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub site: SiteConfig,
  /// Site-relative paths warmed into the bucket at install time
  pub precache: Vec<String>,
  /// Fallback document for failed navigations
  #[serde(default = "default_offline_path")]
  pub offline_path: String,
  /// Paths never intercepted or cached (the site's own worker script goes
  /// here; caching it would pin a stale worker forever)
  #[serde(default)]
  pub bypass: Vec<String>,
  /// Asset routing policy: cache-first (default) or network-first
  #[serde(default)]
  pub strategy: Strategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
  /// Base URL the asset manifest is resolved against
  pub origin: String,
  /// Bucket name prefix
  pub name: String,
  /// Manually bumped version literal; the active bucket is `{name}-v{version}`
  pub version: String,
}

fn default_offline_path() -> String {
  "/offline.html".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachet.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachet/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/cachet/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachet.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachet").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;

    Ok(config)
  }

  /// Check invariants the rest of the program relies on.
  pub fn validate(&self) -> Result<()> {
    let origin = self.origin_url()?;
    if !matches!(origin.scheme(), "http" | "https") {
      return Err(eyre!(
        "site.origin must be an http(s) URL, got {}",
        self.site.origin
      ));
    }

    if self.site.version.trim().is_empty() {
      return Err(eyre!("site.version must not be empty"));
    }

    if self.site.name.trim().is_empty() {
      return Err(eyre!("site.name must not be empty"));
    }

    for path in &self.precache {
      if !path.starts_with('/') {
        return Err(eyre!("precache paths must be site-relative, got {}", path));
      }
    }

    if !self.precache.contains(&self.offline_path) {
      tracing::warn!(
        offline_path = %self.offline_path,
        "offline page is not in the precache list; navigation fallback will miss"
      );
    }

    Ok(())
  }

  /// The configured origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.site.origin)
      .map_err(|e| eyre!("Invalid site.origin {}: {}", self.site.origin, e))
  }
}
