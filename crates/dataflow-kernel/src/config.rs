//! Process-wide engine tunables, loaded the way the rest of the stack
//! loads configuration: layered sources through the `config` crate, with
//! `${VAR}`-style environment substitution, narrowed here to the handful of
//! fields the engine actually reads rather than the fully generic multi-format
//! loader this pattern usually backs.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum concurrently-running workers per dataflow. Default `max(2, 2*CPU)`.
    pub concurrency_cap: usize,
    /// Default map-reduce `batch_size` when a node config omits it.
    pub default_batch_size: usize,
    /// Selects the Store backend: `"memory"` or `"sqlite"`.
    pub store_backend: String,
    /// Connection string for non-memory backends.
    pub store_uri: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            concurrency_cap: (2 * cpus).max(2),
            default_batch_size: 1,
            store_backend: "memory".to_string(),
            store_uri: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read or parse config: {0}")]
    Load(#[from] config::ConfigError),
}

/// Substitutes `${VAR}` (and bare `$VAR`) references with process environment
/// values before the file is handed to the `config` crate parser. Unset
/// variables are left untouched rather than erroring.
fn substitute_env_vars(content: &str) -> String {
    let braced = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    let bare = Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let step1 = braced.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });
    bare.replace_all(&step1, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

/// Loads an [`EngineConfig`] from an optional file plus `DATAFLOW_`-prefixed
/// environment overrides. Falls back entirely to [`EngineConfig::default`]
/// when `path` is `None`.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigLoadError> {
    let mut builder = config::Config::builder()
        .set_default("concurrency_cap", EngineConfig::default().concurrency_cap as i64)?
        .set_default("default_batch_size", 1i64)?
        .set_default("store_backend", "memory")?;

    if let Some(path) = path {
        if let Ok(raw) = std::fs::read_to_string(path) {
            let substituted = substitute_env_vars(&raw);
            builder = builder.add_source(config::File::from_str(
                &substituted,
                detect_format(path),
            ));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DATAFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let config: EngineConfig = builder.build()?.try_deserialize()?;
    tracing::debug!(
        concurrency_cap = config.concurrency_cap,
        store_backend = %config.store_backend,
        "engine config loaded"
    );
    Ok(config)
}

fn detect_format(path: &Path) -> config::FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => config::FileFormat::Toml,
        Some("json") => config::FileFormat::Json,
        Some("yaml") | Some("yml") => config::FileFormat::Yaml,
        Some("ini") => config::FileFormat::Ini,
        Some("ron") => config::FileFormat::Ron,
        Some("json5") => config::FileFormat::Json5,
        _ => config::FileFormat::Toml,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_cap_is_at_least_two() {
        let cfg = EngineConfig::default();
        assert!(cfg.concurrency_cap >= 2);
    }

    #[test]
    fn substitution_leaves_unset_vars_untouched() {
        let out = substitute_env_vars("store_uri = \"${DATAFLOW_TEST_UNSET_VAR_XYZ}\"");
        assert!(out.contains("${DATAFLOW_TEST_UNSET_VAR_XYZ}"));
    }

    #[test]
    fn substitution_replaces_set_vars() {
        unsafe { std::env::set_var("DATAFLOW_TEST_SUBST_VAR", "resolved") };
        let out = substitute_env_vars("x = \"${DATAFLOW_TEST_SUBST_VAR}\"");
        assert!(out.contains("resolved"));
        unsafe { std::env::remove_var("DATAFLOW_TEST_SUBST_VAR") };
    }

    #[test]
    fn load_config_without_path_uses_defaults() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.store_backend, "memory");
        assert_eq!(cfg.default_batch_size, 1);
    }
}
