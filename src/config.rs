//! Process-wide offload configuration: `offload.cfg`, then environment, then CLI overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::sync::{OnceLock, RwLock};

use crate::entry::DEFAULT_ENTRY_SECTION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffloadConfig {
    /// Base section name that collects offload entries.
    pub entry_section: String,
    /// Execution environment target ID used when a command does not name one.
    pub env_target_id: Option<String>,
}

impl OffloadConfig {
    #[must_use]
    pub fn with_entry_section(mut self, section: Option<String>) -> Self {
        if let Some(section) = section {
            self.entry_section = section;
        }
        self
    }

    #[must_use]
    pub fn with_env_target_id(mut self, target_id: Option<String>) -> Self {
        if target_id.is_some() {
            self.env_target_id = target_id;
        }
        self
    }
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            entry_section: DEFAULT_ENTRY_SECTION.to_string(),
            env_target_id: None,
        }
    }
}

static GLOBAL_CONFIG: OnceLock<RwLock<OffloadConfig>> = OnceLock::new();

fn config_cell() -> &'static RwLock<OffloadConfig> {
    GLOBAL_CONFIG.get_or_init(|| RwLock::new(OffloadConfig::default()))
}

/// Update the process-wide configuration.
pub fn set_global(config: OffloadConfig) {
    if let Ok(mut guard) = config_cell().write() {
        *guard = config;
    }
}

/// Retrieve the current configuration.
#[must_use]
pub fn current() -> OffloadConfig {
    config_cell()
        .read()
        .map(|guard| guard.clone())
        .unwrap_or_default()
}

/// Layer the environment and CLI overrides over `offload.cfg`, or over [`current`] when no
/// config file is present.
#[must_use]
pub fn resolve(
    section_override: Option<String>,
    env_target_override: Option<String>,
) -> OffloadConfig {
    let base = load_from_config_file().unwrap_or_else(current);
    let env_section = env::var("OFFLOAD_ENTRY_SECTION").ok();
    let env_target = env::var("OFFLOAD_ENV_TARGET").ok();
    apply_overrides(base, env_section, env_target)
        .with_entry_section(section_override)
        .with_env_target_id(env_target_override)
}

fn apply_overrides(
    config: OffloadConfig,
    section: Option<String>,
    target_id: Option<String>,
) -> OffloadConfig {
    let section = section.filter(|value| !value.trim().is_empty());
    let target_id = target_id.filter(|value| !value.trim().is_empty());
    config
        .with_entry_section(section)
        .with_env_target_id(target_id)
}

fn load_from_config_file() -> Option<OffloadConfig> {
    let path = env::current_dir().ok().map(|dir| dir.join("offload.cfg"))?;
    load_from_path(&path)
}

fn load_from_path(path: &Path) -> Option<OffloadConfig> {
    if !path.exists() {
        return None;
    }
    match fs::read_to_string(path) {
        Ok(contents) => parse_config(&contents),
        Err(err) => {
            tracing::warn!(
                target: "offload.config",
                path = %path.display(),
                error = %err,
                "ignoring unreadable offload config"
            );
            None
        }
    }
}

fn parse_config(contents: &str) -> Option<OffloadConfig> {
    let mut config = OffloadConfig::default();
    let mut seen = false;

    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "entries.section" | "entry_section" => {
                config.entry_section = value.to_string();
                seen = true;
            }
            "amdgpu.env_target" | "env_target_id" => {
                config.env_target_id = Some(value.to_string());
                seen = true;
            }
            _ => {}
        }
    }

    if seen { Some(config) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_config_reads_known_keys() {
        let config = parse_config(
            "# offload defaults\nentries.section = omp_offloading_entries\namdgpu.env_target=gfx90a:xnack+\n",
        )
        .expect("config parsed");
        assert_eq!(config.entry_section, "omp_offloading_entries");
        assert_eq!(config.env_target_id.as_deref(), Some("gfx90a:xnack+"));
    }

    #[test]
    fn parse_config_ignores_unknown_and_blank_values() {
        assert!(parse_config("unknown = 1\nentries.section =\n").is_none());
        assert!(parse_config("").is_none());
    }

    #[test]
    fn overrides_layer_in_order() {
        let base = OffloadConfig::default();
        let layered = apply_overrides(base, Some("env_entries".into()), Some("  ".into()))
            .with_entry_section(Some("cli_entries".into()));
        assert_eq!(layered.entry_section, "cli_entries");
        assert_eq!(layered.env_target_id, None, "blank env target is ignored");
    }

    #[test]
    fn load_from_path_reads_written_file() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("offload.cfg");
        fs::write(&path, "entries.section = custom_entries\n").expect("write config");
        let config = load_from_path(&path).expect("config loaded");
        assert_eq!(config.entry_section, "custom_entries");
        assert!(load_from_path(&dir.path().join("missing.cfg")).is_none());
    }

    #[test]
    fn global_config_round_trips() {
        let config = OffloadConfig::default().with_env_target_id(Some("gfx1030".into()));
        set_global(config.clone());
        assert_eq!(current(), config);
        set_global(OffloadConfig::default());
    }
}
