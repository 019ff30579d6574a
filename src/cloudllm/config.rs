//! YAML configuration surface: loads the single active [`NamedModelConfig`] from a user config
//! file whose `active` key selects among a `configs[]` array.

use crate::cloudllm::error::{CoreError, CoreResult};
use crate::cloudllm::llm_executor::NamedModelConfig;
use std::path::{Path, PathBuf};

/// On-disk shape of the configuration file: a named array of model configs plus the name of
/// the one currently selected.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ConfigFile {
    pub active: String,
    pub configs: Vec<NamedModelConfig>,
}

/// Resolve the platform-standard user config path, preferring `APPDATA`/`USERPROFILE` on
/// Windows and `HOME` elsewhere. Returns `None` when none of the expected environment
/// variables are set.
pub fn config_path() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        std::env::var("APPDATA")
            .or_else(|_| std::env::var("LOCALAPPDATA"))
            .ok()
            .map(|base| PathBuf::from(base).join("routa").join("config.yaml"))
            .or_else(|| {
                std::env::var("USERPROFILE")
                    .ok()
                    .map(|profile| PathBuf::from(profile).join(".routa").join("config.yaml"))
            })
    } else {
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config").join("routa").join("config.yaml"))
    }
}

/// Load and parse the config file at the platform-standard path, then return the entry named by
/// its `active` key.
pub fn load_active_config() -> CoreResult<NamedModelConfig> {
    let path = config_path().ok_or_else(|| {
        CoreError::BadInput(
            "could not determine a user config directory from HOME/USERPROFILE/APPDATA/LOCALAPPDATA"
                .to_string(),
        )
    })?;
    load_active_config_from(&path)
}

/// Load and parse an explicit config file path, returning the entry named by its `active` key.
///
/// Exposed separately from [`load_active_config`] so callers (and tests) can point at a fixture
/// file without manipulating process environment variables.
pub fn load_active_config_from(path: &Path) -> CoreResult<NamedModelConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CoreError::NotFound(format!("config file {}: {}", path.display(), e)))?;
    parse_active_config(&contents)
}

/// Parse YAML content directly, bypassing the filesystem. Shared by
/// [`load_active_config_from`] and tests that want to exercise malformed-input handling without
/// writing a temp file.
pub fn parse_active_config(yaml: &str) -> CoreResult<NamedModelConfig> {
    let file: ConfigFile = serde_yaml::from_str(yaml)
        .map_err(|e| CoreError::BadInput(format!("invalid config yaml: {}", e)))?;
    let active = file.active.clone();
    file.configs
        .into_iter()
        .find(|c| c.name == active)
        .ok_or_else(|| CoreError::NotFound(format!("no config named '{}' in configs[]", active)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
active: work
configs:
  - name: work
    provider: OPENAI
    apiKey: sk-work
    baseUrl: null
    model: gpt-4.1-mini
  - name: personal
    provider: ANTHROPIC
    apiKey: sk-personal
    baseUrl: null
    model: claude-3-5-sonnet-latest
"#;

    #[test]
    fn selects_the_entry_named_by_active() {
        let config = parse_active_config(SAMPLE).unwrap();
        assert_eq!(config.name, "work");
        assert_eq!(config.model, "gpt-4.1-mini");
    }

    #[test]
    fn unknown_active_name_is_not_found() {
        let yaml = "active: missing\nconfigs: []\n";
        let err = parse_active_config(yaml).unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[test]
    fn malformed_yaml_is_bad_input() {
        let err = parse_active_config("not: [valid yaml").unwrap_err();
        assert_eq!(err.kind(), "BAD_INPUT");
    }

    #[test]
    fn loads_from_an_explicit_file_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = load_active_config_from(file.path()).unwrap();
        assert_eq!(config.name, "work");
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = load_active_config_from(Path::new("/nonexistent/routa/config.yaml")).unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }
}
