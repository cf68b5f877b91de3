//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use kubediag_core::{
    AuditConfig, EngineConfig, ExecutorSettings, InvokerSettings, ReplanConfig, ReportConfig,
    SafetyPolicy, SessionSettings,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Where the registries are read from
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CatalogPaths {
    /// Environment registry document
    #[serde(default = "default_environments_path")]
    pub environments_path: PathBuf,
    /// Extra skills appended to the built-in catalog
    #[serde(default)]
    pub skills_path: Option<PathBuf>,
}

fn default_environments_path() -> PathBuf {
    PathBuf::from("config/environments.yaml")
}

impl Default for CatalogPaths {
    fn default() -> Self {
        Self {
            environments_path: default_environments_path(),
            skills_path: None,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub invoker: InvokerSettings,
    #[serde(default)]
    pub replan: ReplanConfig,
    #[serde(default)]
    pub safety: SafetyPolicy,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub catalog: CatalogPaths,
}

impl AppConfig {
    /// Engine-side view of the configuration
    #[must_use]
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            executor: self.executor.clone(),
            invoker: self.invoker.clone(),
            replan: self.replan,
            safety: self.safety.clone(),
            report: self.report.clone(),
            audit: self.audit.clone(),
            sessions: self.sessions,
        }
    }
}

/// Load configuration from `./config` and the environment
pub fn load_config() -> Result<AppConfig> {
    let profile = std::env::var("KUBEDIAG_ENV").unwrap_or_else(|_| "development".to_string());
    load_from(Path::new("config"), &profile)
}

/// Load configuration with overrides read from `dir`
pub fn load_from(dir: &Path, profile: &str) -> Result<AppConfig> {
    let layer = |name: &str| File::with_name(&dir.join(name).to_string_lossy()).required(false);

    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(layer("default"))
        .add_source(layer(profile))
        .add_source(layer("local"))
        // 3. Environment variables (highest priority)
        // KUBEDIAG_EXECUTOR__MAX_IN_FLIGHT: one "_" after the prefix, "__" between keys
        .add_source(
            Environment::with_prefix("KUBEDIAG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_match_engine_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(dir.path(), "development").unwrap();

        assert_eq!(config.engine(), EngineConfig::default());
        assert_eq!(
            config.catalog.environments_path,
            PathBuf::from("config/environments.yaml")
        );
        assert!(config.catalog.skills_path.is_none());
    }

    #[test]
    fn test_local_file_overrides_profile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "[executor]\nmax_in_flight = 5\n\n[replan]\nmax_rounds = 4\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.toml"),
            "[executor]\nmax_in_flight = 1\n\n[audit]\nenabled = false\n",
        )
        .unwrap();

        let config = load_from(dir.path(), "staging").unwrap();

        assert_eq!(config.executor.max_in_flight, 1);
        assert_eq!(config.replan.max_rounds, 4);
        assert!(!config.audit.enabled);
        // untouched keys keep their defaults
        assert_eq!(config.executor.max_attempts, 3);
    }

    #[test]
    fn test_profile_file_ignored_for_other_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("production.toml"),
            "[replan]\nmax_rounds = 0\n",
        )
        .unwrap();

        let config = load_from(dir.path(), "development").unwrap();
        assert_eq!(config.replan.max_rounds, 2);
    }
}
