use crate::backends::{BackendConfig, BackendRegistry};
use crate::session::{SessionSettings, TemperatureSchedule};
use crate::tools::{self, ToolDescriptor};
use anyhow::{Context, Result, anyhow};
use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub default_backend: usize,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub session: SessionConfig,
}

/// `[tools]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub enabled: Vec<String>,
    /// Ask the model which tools are relevant before gathering context.
    pub intelligent_selection: bool,
    pub timeout_secs: u64,
    /// Per-tool timeout overrides in seconds.
    pub timeouts: HashMap<String, u64>,
}

/// `[session]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub temperature_floor: f64,
    pub temperature_step: f64,
    pub temperature_ceiling: f64,
    pub max_fix_output_chars: usize,
    pub context_window_tokens: usize,
    pub selection_timeout_secs: u64,
}

fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .and_then(|s| Path::new(&s).file_name().map(|n| n.to_string_lossy().to_string()))
        .unwrap_or_else(|| "bash".to_string())
}

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig {
            name: "openai".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "$OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            supports_vision: true,
            max_image_size_mb: Some(20.0),
            is_reasoning_model: false,
        },
        BackendConfig {
            name: "ollama".to_string(),
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: String::new(),
            model: "llama3".to_string(),
            supports_vision: false,
            max_image_size_mb: None,
            is_reasoning_model: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            default_backend: 0,
            backends: default_backends(),
            tools: ToolSettings::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            enabled: ["DirLister", "EnvInspector", "SystemInfo", "ShellHistoryInspector", "GitRepoInfo"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            intelligent_selection: true,
            timeout_secs: 5,
            timeouts: HashMap::new(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let temperatures = TemperatureSchedule::default();
        Self {
            temperature_floor: temperatures.floor,
            temperature_step: temperatures.step,
            temperature_ceiling: temperatures.ceiling,
            max_fix_output_chars: 4000,
            context_window_tokens: 4096,
            selection_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default location
    /// that exists, then apply environment overrides.
    ///
    /// A missing file is not an error: built-in defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_paths().into_iter().find(|p| p.exists()),
        };

        let mut config = match path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                let config = Self::load_from_str(&content)
                    .with_context(|| format!("Invalid config file {}", path.display()))?;
                info!("Loaded config from: {}", path.display());
                config
            }
            Some(path) => {
                return Err(anyhow!("Config file not found: {}", path.display()));
            }
            None => {
                eprintln!("No config file found, using built-in defaults (run `nlsh --init` to create one)");
                Self::default()
            }
        };

        config.apply_env_overrides_from(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Applies environment overrides using `lookup` to read variables.
    ///
    /// Order per backend: `NLSH_BACKEND_<i>_API_KEY`, then `<NAME>_API_KEY`,
    /// then `$VAR` indirection in the configured key.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(shell) = lookup("NLSH_SHELL").filter(|s| !s.is_empty()) {
            self.shell = shell;
        }
        if let Some(index) = lookup("NLSH_DEFAULT_BACKEND") {
            match index.trim().parse() {
                Ok(index) => self.default_backend = index,
                Err(_) => warn!("Ignoring NLSH_DEFAULT_BACKEND={}: not a number", index),
            }
        }

        for (i, backend) in self.backends.iter_mut().enumerate() {
            let name_var = format!("{}_API_KEY", env_name(&backend.name));
            if let Some(key) = lookup(&format!("NLSH_BACKEND_{i}_API_KEY")).or_else(|| lookup(&name_var)) {
                debug!("Using API key from environment for backend {}", backend.name);
                backend.api_key = key;
            } else if let Some(var) = backend.api_key.strip_prefix('$') {
                backend.api_key = lookup(var).unwrap_or_default();
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(anyhow!("No backends configured"));
        }
        if self.default_backend >= self.backends.len() {
            return Err(anyhow!(
                "default_backend {} is out of range ({} backends configured)",
                self.default_backend,
                self.backends.len()
            ));
        }
        let s = &self.session;
        if !(s.temperature_floor <= s.temperature_ceiling && s.temperature_step >= 0.0) {
            return Err(anyhow!("Invalid temperature settings in [session]"));
        }
        Ok(())
    }

    pub fn registry(&self) -> BackendRegistry {
        BackendRegistry::new(self.backends.clone(), self.default_backend)
    }

    pub fn session_settings(&self, follow_up: bool) -> SessionSettings {
        SessionSettings {
            shell: self.shell.clone(),
            temperatures: TemperatureSchedule {
                floor: self.session.temperature_floor,
                step: self.session.temperature_step,
                ceiling: self.session.temperature_ceiling,
            },
            max_fix_output_chars: self.session.max_fix_output_chars,
            context_window_tokens: self.session.context_window_tokens,
            follow_up,
        }
    }

    pub fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        tools::descriptors(
            &self.shell,
            &self.tools.enabled,
            Duration::from_secs(self.tools.timeout_secs),
            &self.tools.timeouts,
        )
    }

    pub fn selection_timeout(&self) -> Duration {
        Duration::from_secs(self.session.selection_timeout_secs)
    }

    /// Writes the default configuration to `path`. Refuses to overwrite.
    pub fn write_default(path: &Path) -> Result<()> {
        if path.exists() {
            return Err(anyhow!("Config file already exists: {}", path.display()));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())?;
        fs::write(path, content)?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Candidate config files, in lookup order.
    pub fn default_paths() -> Vec<PathBuf> {
        match home_dir() {
            Some(home) => vec![
                home.join(".nlsh").join("config.toml"),
                home.join(".config").join("nlsh").join("config.toml"),
            ],
            None => Vec::new(),
        }
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let home = home_dir().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(home.join(".nlsh").join("config.toml"))
    }
}

/// `my-backend` -> `MY_BACKEND`.
fn env_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
shell = "zsh"
default_backend = 1

[[backends]]
name = "openai"
url = "https://api.openai.com/v1"
api_key = "$MY_OPENAI_KEY"
model = "gpt-4o"
supports_vision = true

[[backends]]
name = "local-llm"
url = "http://localhost:11434/v1"
model = "deepseek-r1:8b"

[tools]
enabled = ["DirLister", "GitRepoInfo"]
intelligent_selection = false
timeouts = { GitRepoInfo = 2 }

[session]
temperature_step = 0.2
"#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_sample_config() {
        let config = Config::load_from_str(SAMPLE).unwrap();
        assert_eq!(config.shell, "zsh");
        assert_eq!(config.default_backend, 1);
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[1].base_url, "http://localhost:11434/v1");
        assert!(config.backends[1].reasoning_enabled());
        assert!(!config.tools.intelligent_selection);
        assert_eq!(config.tools.timeout_secs, 5);
        assert_eq!(config.session.temperature_step, 0.2);
        assert_eq!(config.session.temperature_floor, 0.2);
        assert_eq!(config.session.max_fix_output_chars, 4000);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::load_from_str("").unwrap();
        assert_eq!(config.backends.len(), 2);
        assert!(config.tools.intelligent_selection);
        assert_eq!(config.session.context_window_tokens, 4096);
    }

    #[test]
    fn test_api_key_indirection_and_overrides() {
        let mut config = Config::load_from_str(SAMPLE).unwrap();
        config.apply_env_overrides_from(env(&[
            ("MY_OPENAI_KEY", "sk-from-var"),
            ("LOCAL_LLM_API_KEY", "local-key"),
            ("NLSH_SHELL", "fish"),
            ("NLSH_DEFAULT_BACKEND", "0"),
        ]));
        assert_eq!(config.backends[0].api_key, "sk-from-var");
        assert_eq!(config.backends[1].api_key, "local-key");
        assert_eq!(config.shell, "fish");
        assert_eq!(config.default_backend, 0);
    }

    #[test]
    fn test_indexed_key_wins_over_named_key() {
        let mut config = Config::load_from_str(SAMPLE).unwrap();
        config.apply_env_overrides_from(env(&[
            ("NLSH_BACKEND_0_API_KEY", "indexed"),
            ("OPENAI_API_KEY", "named"),
        ]));
        assert_eq!(config.backends[0].api_key, "indexed");
    }

    #[test]
    fn test_unset_indirection_clears_key() {
        let mut config = Config::load_from_str(SAMPLE).unwrap();
        config.apply_env_overrides_from(env(&[]));
        assert_eq!(config.backends[0].api_key, "");
    }

    #[test]
    fn test_session_settings_and_descriptors() {
        let config = Config::load_from_str(SAMPLE).unwrap();
        let settings = config.session_settings(true);
        assert!(settings.follow_up);
        assert_eq!(settings.shell, "zsh");
        assert_eq!(settings.temperatures.temperature(1), 0.4);

        let descriptors = config.tool_descriptors();
        let enabled: Vec<&str> = descriptors.iter().filter(|d| d.enabled).map(|d| d.name()).collect();
        assert_eq!(enabled, vec!["DirLister", "GitRepoInfo"]);
        let git = descriptors.iter().find(|d| d.name() == "GitRepoInfo").unwrap();
        assert_eq!(git.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_load_rejects_out_of_range_default_backend() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "default_backend = 7\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Config::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_write_default_round_trips_and_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nlsh").join("config.toml");
        Config::write_default(&path).unwrap();

        let written = Config::load_from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.backends[0].api_key, "$OPENAI_API_KEY");
        assert!(Config::write_default(&path).is_err());
    }

    #[test]
    fn test_env_name() {
        assert_eq!(env_name("local-llm"), "LOCAL_LLM");
        assert_eq!(env_name("groq"), "GROQ");
    }
}
