use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_CASK_CONFIG: &str = "CASK_CONFIG";

const DEFAULT_UMU_BINARY: &str = "umu-run";
const DEFAULT_STOP_GRACE_SECS: u64 = 5;
const MAX_STOP_GRACE_SECS: u64 = 60;
const DEFAULT_CONTEXT_BUFFER: usize = 64;
const DEFAULT_GLOBAL_BUFFER: usize = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaskConfig {
    /// Root of the prefix store (prefixes, shortcut tables, pointer to
    /// the current prefix).
    #[serde(default = "default_store_root")]
    pub store_root: String,
    #[serde(default)]
    pub runner: RunnerConfigToml,
    #[serde(default)]
    pub events: EventsConfigToml,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunnerConfigToml {
    #[serde(default = "default_umu_binary")]
    pub binary: String,
    /// Directory holding installed Proton builds, one per subdirectory.
    #[serde(default = "default_runners_root")]
    pub runners_root: String,
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,
}

impl Default for RunnerConfigToml {
    fn default() -> Self {
        Self {
            binary: default_umu_binary(),
            runners_root: default_runners_root(),
            stop_grace_secs: default_stop_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventsConfigToml {
    #[serde(default = "default_context_buffer")]
    pub context_buffer: usize,
    #[serde(default = "default_global_buffer")]
    pub global_buffer: usize,
}

impl Default for EventsConfigToml {
    fn default() -> Self {
        Self {
            context_buffer: default_context_buffer(),
            global_buffer: default_global_buffer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerRuntimeConfig {
    pub binary: String,
    pub runners_root: PathBuf,
    pub stop_grace: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventsRuntimeConfig {
    pub context_buffer: usize,
    pub global_buffer: usize,
}

impl CaskConfig {
    pub fn store_root(&self) -> PathBuf {
        PathBuf::from(&self.store_root)
    }

    pub fn runner_runtime(&self) -> RunnerRuntimeConfig {
        RunnerRuntimeConfig {
            binary: self.runner.binary.clone(),
            runners_root: PathBuf::from(&self.runner.runners_root),
            stop_grace: Duration::from_secs(self.runner.stop_grace_secs),
        }
    }

    pub fn events_runtime(&self) -> EventsRuntimeConfig {
        EventsRuntimeConfig {
            context_buffer: self.events.context_buffer,
            global_buffer: self.events.global_buffer,
        }
    }
}

impl Default for CaskConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            runner: RunnerConfigToml::default(),
            events: EventsConfigToml::default(),
        }
    }
}

pub fn load_from_env() -> Result<CaskConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<CaskConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME")
    })?;
    Ok(home.join(".config").join("cask").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_CASK_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "CASK_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_cask_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("XDG_DATA_HOME") {
        let path = path.trim();
        if !path.is_empty() {
            return PathBuf::from(path).join("cask");
        }
    }
    if let Some(home) = resolve_home_dir() {
        return home.join(".local").join("share").join("cask");
    }
    std::env::temp_dir().join("cask")
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn default_store_root() -> String {
    default_cask_data_dir()
        .join("store")
        .to_string_lossy()
        .to_string()
}

fn default_umu_binary() -> String {
    DEFAULT_UMU_BINARY.to_owned()
}

fn default_runners_root() -> String {
    default_cask_data_dir()
        .join("runners")
        .to_string_lossy()
        .to_string()
}

fn default_stop_grace_secs() -> u64 {
    DEFAULT_STOP_GRACE_SECS
}

fn default_context_buffer() -> usize {
    DEFAULT_CONTEXT_BUFFER
}

fn default_global_buffer() -> usize {
    DEFAULT_GLOBAL_BUFFER
}

fn persist_config(path: &Path, config: &CaskConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize CASK_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write CASK_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<CaskConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for CASK_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = CaskConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read CASK_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: CaskConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse CASK_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    let changed = normalize_config(&mut config);
    if changed {
        persist_config(path, &config)?;
    }

    Ok(config)
}

fn normalize_config(config: &mut CaskConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.store_root, default_store_root());
    changed |= normalize_non_empty_string(&mut config.runner.binary, default_umu_binary());
    changed |=
        normalize_non_empty_string(&mut config.runner.runners_root, default_runners_root());

    let normalized_stop_grace = if config.runner.stop_grace_secs == 0 {
        default_stop_grace_secs()
    } else {
        config.runner.stop_grace_secs.min(MAX_STOP_GRACE_SECS)
    };
    if normalized_stop_grace != config.runner.stop_grace_secs {
        config.runner.stop_grace_secs = normalized_stop_grace;
        changed = true;
    }

    if config.events.context_buffer == 0 {
        config.events.context_buffer = default_context_buffer();
        changed = true;
    }
    if config.events.global_buffer == 0 {
        config.events.global_buffer = default_global_buffer();
        changed = true;
    }

    changed
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{Mutex, OnceLock};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn env_lock() -> &'static Mutex<()> {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn with_env_vars<F>(vars: &[(&str, Option<&str>)], test: F)
    where
        F: FnOnce(),
    {
        let _guard = env_lock().lock().expect("env lock");
        let backup = vars
            .iter()
            .map(|(name, _)| ((*name).to_owned(), std::env::var(name).ok()))
            .collect::<Vec<_>>();

        for (name, value) in vars {
            match value {
                Some(value) => std::env::set_var(name, value),
                None => std::env::remove_var(name),
            }
        }

        test();

        for (name, value) in backup {
            match value {
                Some(value) => std::env::set_var(&name, value),
                None => std::env::remove_var(&name),
            }
        }
    }

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let path = std::env::temp_dir().join(format!(
            "cask-config-{prefix}-{nanos}-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&path).expect("create temp dir");
        path
    }

    fn remove_temp_path(path: &Path) {
        let _ = std::fs::remove_dir_all(path);
    }

    #[test]
    fn load_from_env_creates_default_config_when_missing() {
        let home = unique_temp_dir("home-defaults");
        let expected = home.join(".config").join("cask").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                (ENV_CASK_CONFIG, None),
                ("XDG_DATA_HOME", None),
            ],
            || {
                let config = load_from_env().expect("load defaults");
                assert_eq!(config.runner.binary, "umu-run");
                assert_eq!(config.runner.stop_grace_secs, 5);
                assert!(expected.exists());
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn load_from_env_honors_explicit_config_path() {
        let home = unique_temp_dir("home-explicit");
        let root = unique_temp_dir("explicit");
        let explicit = root.join("nested").join("custom.toml");
        let default = home.join(".config").join("cask").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                (
                    ENV_CASK_CONFIG,
                    Some(explicit.to_str().expect("config path")),
                ),
                ("XDG_DATA_HOME", None),
            ],
            || {
                let config = load_from_env().expect("load explicit path config");
                assert!(explicit.exists());
                assert!(!default.exists());
                assert_eq!(config.runner.binary, "umu-run");
            },
        );

        remove_temp_path(&home);
        remove_temp_path(&root);
    }

    #[test]
    fn blank_config_env_is_treated_as_unset() {
        let home = unique_temp_dir("home-blank");
        let expected = home.join(".config").join("cask").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.to_str().expect("home path"))),
                (ENV_CASK_CONFIG, Some("  ")),
                ("XDG_DATA_HOME", None),
            ],
            || {
                let config = load_from_env().expect("load config from default path");
                assert!(expected.exists());
                assert_eq!(config.events.context_buffer, 64);
            },
        );

        remove_temp_path(&home);
    }

    #[test]
    fn load_from_path_normalizes_and_persists_supported_bounds() {
        let root = unique_temp_dir("normalization");
        let path = root.join("config.toml");
        std::fs::write(
            &path,
            r#"
store_root = "  /tmp/cask-store  "

[runner]
binary = "   "
stop_grace_secs = 9999

[events]
context_buffer = 0
global_buffer = 0
"#,
        )
        .expect("write fixture config");

        let config = load_from_path(&path).expect("load and normalize config");
        assert_eq!(config.store_root, "/tmp/cask-store");
        assert_eq!(config.runner.binary, "umu-run");
        assert_eq!(config.runner.stop_grace_secs, 60);
        assert_eq!(config.events.context_buffer, 64);
        assert_eq!(config.events.global_buffer, 512);

        let persisted = std::fs::read_to_string(&path).expect("read persisted config");
        let parsed: CaskConfig = toml::from_str(&persisted).expect("parse persisted config");
        assert_eq!(parsed.runner.stop_grace_secs, 60);

        remove_temp_path(&root);
    }

    #[test]
    fn load_from_path_returns_parse_error_for_invalid_toml() {
        let root = unique_temp_dir("invalid");
        let path = root.join("config.toml");
        std::fs::write(&path, "store_root = [\n").expect("write fixture config");

        let error = load_from_path(&path).expect_err("expected parse failure");
        assert!(error.to_string().contains("Failed to parse CASK_CONFIG"));

        remove_temp_path(&root);
    }

    #[test]
    fn runtime_slices_expose_expected_fields() {
        let config = CaskConfig {
            store_root: "/data/cask/store".to_owned(),
            runner: RunnerConfigToml {
                binary: "/opt/umu/umu-run".to_owned(),
                runners_root: "/data/cask/runners".to_owned(),
                stop_grace_secs: 10,
            },
            events: EventsConfigToml {
                context_buffer: 32,
                global_buffer: 256,
            },
        };

        let runner = config.runner_runtime();
        let events = config.events_runtime();

        assert_eq!(runner.binary, "/opt/umu/umu-run");
        assert_eq!(runner.runners_root, PathBuf::from("/data/cask/runners"));
        assert_eq!(runner.stop_grace, Duration::from_secs(10));
        assert_eq!(events.context_buffer, 32);
        assert_eq!(events.global_buffer, 256);
        assert_eq!(config.store_root(), PathBuf::from("/data/cask/store"));
    }
}
