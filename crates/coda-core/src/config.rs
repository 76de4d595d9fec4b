//! Configuration management for Coda
//!
//! A run is described by `coda.toml`: the target file and its build/test
//! commands, the loop bounds, model selection, and where run artifacts go.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{CodaError, Result};

/// Default config file name, looked up in the current directory
pub const CONFIG_FILE_NAME: &str = "coda.toml";

/// Top-level Coda configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodaConfig {
    /// What is being modified and how it is built and tested
    pub target: TargetConfig,

    /// Retry and attempt bounds for the control loop
    #[serde(default, rename = "loop")]
    pub loop_settings: LoopSettings,

    /// Model selection
    #[serde(default)]
    pub model: ModelSettings,

    /// Run artifact settings
    #[serde(default)]
    pub log: LogConfig,
}

/// The document under modification and its build/test commands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// File whose unsafe code is being reduced
    pub code_path: PathBuf,

    /// Optional secondary manifest (e.g. Cargo.toml) the model may also edit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<PathBuf>,

    /// Shell command that builds the project
    pub build_command: String,

    /// Shell command that exercises the project
    pub test_command: String,

    /// Substring whose presence in test output means the test passed
    pub test_expected_output: String,

    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,

    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,

    /// Working directory for build and test commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

/// How an ambiguous fragment is treated by the patch applier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// A fragment matching more than once is an error
    #[default]
    Unique,
    /// The first normalized occurrence wins
    First,
}

impl std::str::FromStr for MatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unique" => Ok(MatchPolicy::Unique),
            "first" => Ok(MatchPolicy::First),
            _ => Err(format!("Invalid match policy: {}. Use unique or first.", s)),
        }
    }
}

/// Control-loop bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    /// Generation calls per prompt before escalating the prompt
    #[serde(default = "default_generation_retries")]
    pub generation_retries: usize,

    /// Prompt attempts per strategy before FAILED_TOO_LONG
    #[serde(default = "default_max_prompt_attempts")]
    pub max_prompt_attempts: usize,

    /// Consecutive non-success strategies that end the run
    #[serde(default = "default_strategy_failure_threshold")]
    pub strategy_failure_threshold: usize,

    /// Re-asks allowed for an unparseable verdict
    #[serde(default = "default_max_verdict_retries")]
    pub max_verdict_retries: usize,

    /// Hard cap on strategies per run (0 = unlimited)
    #[serde(default)]
    pub max_strategies: usize,

    #[serde(default)]
    pub match_policy: MatchPolicy,

    /// Accept exit-0 builds that only print warnings without asking the model
    #[serde(default)]
    pub accept_build_warnings: bool,

    /// Keyword that opens an unsafe region
    #[serde(default = "default_unsafe_keyword")]
    pub unsafe_keyword: String,
}

/// Model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Default model to use (opus, sonnet, haiku)
    #[serde(default = "default_model")]
    pub default: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

/// Run artifact configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Root of the log tree (pristine copies, run directories)
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    /// Show an elapsed-time ticker while commands and calls run
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

// Default value providers
fn default_test_timeout_secs() -> u64 {
    15
}

fn default_build_timeout_secs() -> u64 {
    300
}

fn default_generation_retries() -> usize {
    5
}

fn default_max_prompt_attempts() -> usize {
    8
}

fn default_strategy_failure_threshold() -> usize {
    10
}

fn default_max_verdict_retries() -> usize {
    5
}

fn default_unsafe_keyword() -> String {
    "unsafe".to_string()
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_max_tokens() -> usize {
    16000
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".coda/log")
}

fn default_true() -> bool {
    true
}

impl CodaConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CodaError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| CodaError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Write a starter configuration to `<dir>/coda.toml`
    pub fn write_default(dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let config_path = dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            return Err(CodaError::Config(format!(
                "{} already exists",
                config_path.display()
            )));
        }

        let content = toml::to_string_pretty(&Self::example()).map_err(|e| {
            CodaError::Config(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// A cargo-based starter configuration
    pub fn example() -> Self {
        Self {
            target: TargetConfig {
                code_path: PathBuf::from("src/main.rs"),
                manifest_path: None,
                build_command: "cargo build".to_string(),
                test_command: "cargo run".to_string(),
                test_expected_output: "[1, 2, 3, 4, 7, 9]".to_string(),
                test_timeout_secs: default_test_timeout_secs(),
                build_timeout_secs: default_build_timeout_secs(),
                working_dir: None,
            },
            loop_settings: LoopSettings::default(),
            model: ModelSettings::default(),
            log: LogConfig::default(),
        }
    }

    /// Reject configurations the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let target = &self.target;
        if target.build_command.trim().is_empty() {
            return Err(CodaError::Config("target.build_command is empty".into()));
        }
        if target.test_command.trim().is_empty() {
            return Err(CodaError::Config("target.test_command is empty".into()));
        }
        if target.test_expected_output.is_empty() {
            return Err(CodaError::Config(
                "target.test_expected_output is empty".into(),
            ));
        }
        if target.test_timeout_secs == 0 || target.build_timeout_secs == 0 {
            return Err(CodaError::Config("timeouts must be at least 1 second".into()));
        }
        if !target.code_path.is_file() {
            return Err(CodaError::Config(format!(
                "target.code_path {} does not exist",
                target.code_path.display()
            )));
        }
        if let Some(manifest) = &target.manifest_path {
            if !manifest.is_file() {
                return Err(CodaError::Config(format!(
                    "target.manifest_path {} does not exist",
                    manifest.display()
                )));
            }
        }

        let bounds = &self.loop_settings;
        if bounds.generation_retries == 0
            || bounds.max_prompt_attempts == 0
            || bounds.strategy_failure_threshold == 0
            || bounds.max_verdict_retries == 0
        {
            return Err(CodaError::Config("loop bounds must be at least 1".into()));
        }
        if bounds.unsafe_keyword.trim().is_empty() {
            return Err(CodaError::Config("loop.unsafe_keyword is empty".into()));
        }
        Ok(())
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            generation_retries: default_generation_retries(),
            max_prompt_attempts: default_max_prompt_attempts(),
            strategy_failure_threshold: default_strategy_failure_threshold(),
            max_verdict_retries: default_max_verdict_retries(),
            max_strategies: 0,
            match_policy: MatchPolicy::default(),
            accept_build_warnings: false,
            unsafe_keyword: default_unsafe_keyword(),
        }
    }
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            default: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            show_progress: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
[target]
code_path = "src/main.rs"
build_command = "cargo build"
test_command = "./target/debug/quicksort"
test_expected_output = "[1, 2, 3, 4, 7, 9]"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = CodaConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.target.test_timeout_secs, 15);
        assert_eq!(config.target.build_timeout_secs, 300);
        assert!(config.target.manifest_path.is_none());
        assert_eq!(config.loop_settings.generation_retries, 5);
        assert_eq!(config.loop_settings.strategy_failure_threshold, 10);
        assert_eq!(config.loop_settings.match_policy, MatchPolicy::Unique);
        assert!(!config.loop_settings.accept_build_warnings);
        assert_eq!(config.loop_settings.unsafe_keyword, "unsafe");
        assert_eq!(config.model.default, "sonnet");
        assert_eq!(config.log.dir, PathBuf::from(".coda/log"));
    }

    #[test]
    fn test_loop_section_overrides() {
        let toml = format!(
            "{}\n[loop]\nmax_prompt_attempts = 3\nmatch_policy = \"first\"\naccept_build_warnings = true\n",
            MINIMAL
        );
        let config = CodaConfig::from_toml(&toml).unwrap();
        assert_eq!(config.loop_settings.max_prompt_attempts, 3);
        assert_eq!(config.loop_settings.match_policy, MatchPolicy::First);
        assert!(config.loop_settings.accept_build_warnings);
    }

    #[test]
    fn test_missing_target_is_error() {
        let err = CodaConfig::from_toml("[loop]\nmax_strategies = 2\n").unwrap_err();
        assert!(matches!(err, CodaError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_missing_code_file() {
        let config = CodaConfig::from_toml(MINIMAL).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_accepts_existing_file() {
        let temp_dir = TempDir::new().unwrap();
        let code = temp_dir.path().join("main.rs");
        std::fs::write(&code, "fn main() {}\n").unwrap();

        let mut config = CodaConfig::from_toml(MINIMAL).unwrap();
        config.target.code_path = code;
        assert!(config.validate().is_ok());

        config.loop_settings.max_prompt_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_write_default_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let path = CodaConfig::write_default(temp_dir.path()).unwrap();
        let loaded = CodaConfig::load(&path).unwrap();
        assert_eq!(loaded.target.build_command, "cargo build");

        // Second write refuses to clobber
        assert!(CodaConfig::write_default(temp_dir.path()).is_err());
    }

    #[test]
    fn test_match_policy_from_str() {
        assert_eq!("UNIQUE".parse::<MatchPolicy>().unwrap(), MatchPolicy::Unique);
        assert_eq!("first".parse::<MatchPolicy>().unwrap(), MatchPolicy::First);
        assert!("fuzzy".parse::<MatchPolicy>().is_err());
    }
}
