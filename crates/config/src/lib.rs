//! Layered configuration for lectern.
//!
//! Values are merged with [`figment`] in increasing priority:
//!
//! 1. Built-in defaults ([`Config::default`]),
//! 2. A TOML file (`lectern.toml` in the platform configuration directory, or
//!    an explicit path),
//! 3. Environment variables prefixed with `LECTERN_`, using `__` to address
//!    nested keys (e.g. `LECTERN_RENDER__BATCH_SIZE=10`).
//!
//! The merged result is validated before it is handed out, so that a bad
//! batch size or render scale fails at startup rather than mid-render.

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "LECTERN_";
const CONFIG_FILE: &str = "lectern.toml";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "lectern")
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub render: RenderConfig,
    pub entitlement: EntitlementConfig,
    pub log: LogConfig,
}

/// Local document cache and the HTTP client that fills it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Absolute directory holding cached documents.
    pub root: PathBuf,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    pub max_redirects: usize,
}
impl Default for CacheConfig {
    fn default() -> Self {
        let root = match project_dirs() {
            Some(dirs) => dirs.cache_dir().join("book_cache"),
            None => std::env::temp_dir().join("lectern").join("book_cache"),
        };
        Self {
            root,
            connect_timeout_secs: 10,
            user_agent: format!("lectern/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
        }
    }
}

/// Progressive rendering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Pages rendered per batch.
    pub batch_size: u32,
    /// Render scale factor. Higher is sharper but costs memory and latency.
    pub scale: f32,
    /// A new batch is triggered once the reader scrolls within this many
    /// viewport heights of the end of rendered content.
    pub prefetch_viewports: f32,
    /// A new batch is triggered once one of the last N rendered pages
    /// becomes visible.
    pub visible_trigger_pages: u32,
    /// Documents up to this size are handed to the surface as a single inline
    /// bundle; larger ones are loaded by URL.
    pub inline_max_bytes: u64,
    /// Capacity of the diagnostic channel from the surface to the host.
    pub bridge_capacity: usize,
}
impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            scale: 1.5,
            prefetch_viewports: 1.5,
            visible_trigger_pages: 3,
            inline_max_bytes: 8 * 1024 * 1024,
            bridge_capacity: 256,
        }
    }
}

/// Remote entitlement provider and series naming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntitlementConfig {
    /// Base URL of the entitlement REST API. Without one, every gated series
    /// is treated as locked.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// Whole-request timeout for provider lookups.
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Extra numeric-to-letter series code mappings, on top of the built-in
    /// `1 => a`, `2 => b`, ... table.
    pub series_aliases: BTreeMap<String, String>,
}
impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 15,
            user_agent: format!("lectern/{}", env!("CARGO_PKG_VERSION")),
            series_aliases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
}
impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Config {
    /// Location of the default configuration file, if the platform has a
    /// configuration directory.
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from the default file location (if present) and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path().as_deref())
    }

    /// Load from an explicit file (missing files are skipped) and the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), exists = path.exists(), "Loading configuration file");
        }
        let config: Self = Self::figment(path).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()
    }

    /// The provider chain, exposed so callers can merge their own overrides
    /// (e.g. CLI flags) on top before extracting.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values the rest of the workspace cannot work with.
    pub fn validate(self) -> Result<Self> {
        if !self.cache.root.is_absolute() {
            exn::bail!(ErrorKind::Invalid {
                field: "cache.root",
                reason: format!("must be absolute, got {}", self.cache.root.display()),
            });
        }
        if self.render.batch_size == 0 {
            exn::bail!(ErrorKind::Invalid { field: "render.batch_size", reason: "must be at least 1".to_string() });
        }
        if !self.render.scale.is_finite() || self.render.scale <= 0.0 {
            exn::bail!(ErrorKind::Invalid {
                field: "render.scale",
                reason: format!("must be a positive number, got {}", self.render.scale),
            });
        }
        if !self.render.prefetch_viewports.is_finite() || self.render.prefetch_viewports < 0.0 {
            exn::bail!(ErrorKind::Invalid {
                field: "render.prefetch_viewports",
                reason: format!("must not be negative, got {}", self.render.prefetch_viewports),
            });
        }
        if self.render.bridge_capacity == 0 {
            exn::bail!(ErrorKind::Invalid {
                field: "render.bridge_capacity",
                reason: "must be at least 1".to_string()
            });
        }
        if self.entitlement.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid {
                field: "entitlement.timeout_secs",
                reason: "must be at least 1".to_string()
            });
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default().validate().unwrap();
        assert_eq!(config.render.batch_size, 20);
        assert!(config.cache.root.is_absolute());
        assert!(config.cache.root.ends_with("book_cache"));
    }

    #[test]
    fn file_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lectern.toml",
                r#"
                    [render]
                    batch_size = 10
                    scale = 2.0

                    [entitlement.series_aliases]
                    5 = "e"
                "#,
            )?;
            jail.set_env("LECTERN_RENDER__BATCH_SIZE", "5");
            jail.set_env("LECTERN_LOG__LEVEL", "debug");
            jail.set_env("LECTERN_ENTITLEMENT__TIMEOUT_SECS", "30");
            let path = jail.directory().join("lectern.toml");
            let config = Config::load_from(Some(&path)).map_err(|e| e.to_string())?;
            assert_eq!(config.render.batch_size, 5);
            assert_eq!(config.render.scale, 2.0);
            assert_eq!(config.log.level, "debug");
            assert_eq!(config.entitlement.series_aliases.get("5").map(String::as_str), Some("e"));
            assert_eq!(config.entitlement.timeout_secs, 30);
            assert!(config.entitlement.user_agent.starts_with("lectern/"));
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("does-not-exist.toml");
            let config = Config::load_from(Some(&path)).map_err(|e| e.to_string())?;
            assert_eq!(config.render, RenderConfig::default());
            Ok(())
        });
    }

    #[test]
    fn unparseable_file_is_a_load_error() {
        Jail::expect_with(|jail| {
            jail.create_file("lectern.toml", "render = [not toml")?;
            let path = jail.directory().join("lectern.toml");
            let err = Config::load_from(Some(&path)).unwrap_err();
            assert_eq!(*err, ErrorKind::Load);
            Ok(())
        });
    }

    #[rstest]
    #[case::zero_batch(|c: &mut Config| c.render.batch_size = 0, "render.batch_size")]
    #[case::zero_scale(|c: &mut Config| c.render.scale = 0.0, "render.scale")]
    #[case::nan_scale(|c: &mut Config| c.render.scale = f32::NAN, "render.scale")]
    #[case::negative_prefetch(|c: &mut Config| c.render.prefetch_viewports = -1.0, "render.prefetch_viewports")]
    #[case::relative_root(|c: &mut Config| c.cache.root = PathBuf::from("relative/cache"), "cache.root")]
    #[case::zero_capacity(|c: &mut Config| c.render.bridge_capacity = 0, "render.bridge_capacity")]
    #[case::zero_entitlement_timeout(|c: &mut Config| c.entitlement.timeout_secs = 0, "entitlement.timeout_secs")]
    fn invalid_values_are_rejected(#[case] mutate: fn(&mut Config), #[case] expected: &str) {
        let mut config = Config::default();
        mutate(&mut config);
        let err = config.validate().unwrap_err();
        match &*err {
            ErrorKind::Invalid { field, .. } => assert_eq!(*field, expected),
            other => panic!("unexpected error: {other}"),
        }
    }
}
