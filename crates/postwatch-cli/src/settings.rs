//! Runtime settings: an optional TOML file overlaid with `POSTWATCH_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::Duration;
use postwatch_core::{users::DEFAULT_USER_CACHE_LIMIT, window::DEFAULT_MAX_EDITING_SECS};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
  /// SQLite database holding the forum data and the outbox.
  pub store_path:            PathBuf,
  /// Default sender for test mail.
  pub support_email:         String,
  /// Linked from the test mail body.
  pub site_url:              String,
  pub max_editing_time_secs: i64,
  pub user_cache_limit:      usize,
  /// Honour discussion display dates when selecting posts.
  pub timed_posts:           bool,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:            PathBuf::from("postwatch.db"),
      support_email:         "noreply@localhost".into(),
      site_url:              "http://localhost/".into(),
      max_editing_time_secs: DEFAULT_MAX_EDITING_SECS,
      user_cache_limit:      DEFAULT_USER_CACHE_LIMIT,
      timed_posts:           false,
    }
  }
}

impl Settings {
  /// Read `path` if it exists, then apply environment overrides.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let raw = config::Config::builder()
      .add_source(config::File::from(path.to_path_buf()).required(false))
      .add_source(config::Environment::with_prefix("POSTWATCH"))
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut settings: Settings = raw
      .try_deserialize()
      .context("failed to deserialise Settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    Ok(settings)
  }

  pub fn max_editing_time(&self) -> anyhow::Result<Duration> {
    Duration::try_seconds(self.max_editing_time_secs).with_context(|| {
      format!("max_editing_time_secs out of range: {}", self.max_editing_time_secs)
    })
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
