//! Unified configuration for pipedeck.
//!
//! Settings are read from `.pipedeck/pipedeck.toml` under the project
//! directory and layered: file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4000
//! max_body_bytes = 10485760
//! cors_permissive = false
//! diagnostics = "log"
//!
//! [analyzer]
//! command = "python3"
//! args = ["./ai-ml/analyzer.py"]
//! timeout_secs = 30
//!
//! [optimizer]
//! engine = "builtin"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::{DiagnosticPolicy, ProcessSpec};

/// Default cap for request bodies and buffered process output (10 MiB).
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// Name of the per-project configuration directory.
pub const CONFIG_DIR: &str = ".pipedeck";

/// Name of the configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "pipedeck.toml";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Which implementation serves a backend section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Spawn the configured external command per request (default)
    #[default]
    Process,
    /// Run the in-process implementation (optimizer only)
    Builtin,
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Engine::Process => write!(f, "process"),
            Engine::Builtin => write!(f, "builtin"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Largest accepted request body, in bytes
    #[serde(default = "default_max_bytes")]
    pub max_body_bytes: usize,
    /// Allow any origin (for a dashboard dev server on another port)
    #[serde(default)]
    pub cors_permissive: bool,
    /// What happens to backend stderr
    #[serde(default)]
    pub diagnostics: DiagnosticPolicy,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_max_bytes() -> usize {
    DEFAULT_MAX_BYTES
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_bytes(),
            cors_permissive: false,
            diagnostics: DiagnosticPolicy::default(),
        }
    }
}

/// Script run by the default analyzer command.
pub const ANALYZER_SCRIPT: &str = "./ai-ml/analyzer.py";

/// Script run by the default optimizer command.
pub const OPTIMIZER_SCRIPT: &str = "./ai-ml/optimizer.py";

/// Interpreter used when a backend section names no command.
pub const DEFAULT_COMMAND: &str = "python3";

/// Commands that execute their stdin as a program when given no script.
const INTERPRETERS: &[&str] = &[
    "python", "python3", "node", "ruby", "perl", "php", "sh", "bash", "zsh",
];

/// Settings for one backend (`[analyzer]` or `[optimizer]`).
///
/// `command` and `args` are resolved together against the section's
/// default script:
///
/// | command        | args      | runs                         |
/// |----------------|-----------|------------------------------|
/// | absent/python3 | absent    | `python3 <default script>`   |
/// | other          | absent    | `<command>` with no args     |
/// | any            | given     | `<command> <args>`           |
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub engine: Engine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    /// Working directory, relative to the project directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Seconds to wait for the process; absent waits forever
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub max_output_bytes: usize,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            engine: Engine::Process,
            command: None,
            args: None,
            working_dir: None,
            timeout_secs: None,
            max_output_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl BackendSection {
    fn python_script(script: &str) -> Self {
        Self {
            command: Some(DEFAULT_COMMAND.to_string()),
            args: Some(vec![script.to_string()]),
            ..Self::default()
        }
    }

    /// Explicit `[analyzer]` template: `python3 ./ai-ml/analyzer.py`.
    pub fn analyzer() -> Self {
        Self::python_script(ANALYZER_SCRIPT)
    }

    /// Explicit `[optimizer]` template: `python3 ./ai-ml/optimizer.py`.
    pub fn optimizer() -> Self {
        Self::python_script(OPTIMIZER_SCRIPT)
    }

    /// Command to launch.
    pub fn command(&self) -> &str {
        self.command.as_deref().unwrap_or(DEFAULT_COMMAND)
    }

    /// Arguments to launch with, falling back to `default_script` only for
    /// the default interpreter.
    pub fn resolved_args(&self, default_script: &str) -> Vec<String> {
        match &self.args {
            Some(args) => args.clone(),
            None if self.command() == DEFAULT_COMMAND => vec![default_script.to_string()],
            None => Vec::new(),
        }
    }

    /// Resolve into a launchable spec rooted at `project_dir`.
    pub fn process_spec(&self, default_script: &str, project_dir: &Path) -> ProcessSpec {
        let working_dir = match &self.working_dir {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => project_dir.join(p),
            None => project_dir.to_path_buf(),
        };
        ProcessSpec::new(self.command(), working_dir)
            .with_args(self.resolved_args(default_script))
            .with_timeout(self.timeout_secs.map(Duration::from_secs))
            .with_max_output_bytes(self.max_output_bytes)
    }

    fn validate(&self, section: &str, default_script: &str, warnings: &mut Vec<String>) {
        if self.engine == Engine::Process {
            let command = self.command().trim();
            if command.is_empty() {
                warnings.push(format!("[{}] command is empty", section));
            } else if self.resolved_args(default_script).is_empty() {
                let program = Path::new(command)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(command);
                if INTERPRETERS.contains(&program) {
                    warnings.push(format!(
                        "[{}] command '{}' has no args and would execute request bodies as code",
                        section, command
                    ));
                }
            }
        }
        if self.timeout_secs == Some(0) {
            warnings.push(format!(
                "[{}] timeout_secs = 0 fails every request; remove it to wait indefinitely",
                section
            ));
        }
        if self.max_output_bytes == 0 {
            warnings.push(format!("[{}] max_output_bytes must be greater than 0", section));
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default level for pipedeck's own events; `RUST_LOG` takes precedence
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// The complete pipedeck.toml structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeckToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub analyzer: BackendSection,
    #[serde(default)]
    pub optimizer: BackendSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl Default for DeckToml {
    fn default() -> Self {
        Self {
            server: ServerSection::default(),
            analyzer: BackendSection::analyzer(),
            optimizer: BackendSection::optimizer(),
            logging: LoggingSection::default(),
        }
    }
}

impl DeckToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse pipedeck.toml")
    }

    /// Load `<config_dir>/pipedeck.toml`, or defaults when it doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize pipedeck.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `PIPEDECK_*` overrides. `lookup` returns a variable's value if set.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("PIPEDECK_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PIPEDECK_PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid PIPEDECK_PORT '{}'", port))?;
        }
        // A command override drops file args; PIPEDECK_*_ARGS supplies new ones.
        for (section, cmd_var, args_var) in [
            (&mut self.analyzer, "PIPEDECK_ANALYZER_CMD", "PIPEDECK_ANALYZER_ARGS"),
            (&mut self.optimizer, "PIPEDECK_OPTIMIZER_CMD", "PIPEDECK_OPTIMIZER_ARGS"),
        ] {
            if let Some(cmd) = lookup(cmd_var) {
                section.command = Some(cmd);
                section.args = None;
            }
            if let Some(args) = lookup(args_var) {
                section.args = Some(args.split_whitespace().map(str::to_string).collect());
            }
        }
        if let Some(format) = lookup("PIPEDECK_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }
        Ok(())
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("[server] port 0 binds a random port".to_string());
        }
        if self.server.max_body_bytes == 0 {
            warnings.push("[server] max_body_bytes must be greater than 0".to_string());
        }
        if self.analyzer.engine == Engine::Builtin {
            warnings.push(
                "[analyzer] engine = \"builtin\" is not available; only the optimizer has a built-in engine"
                    .to_string(),
            );
        }
        self.analyzer
            .validate("analyzer", ANALYZER_SCRIPT, &mut warnings);
        self.optimizer
            .validate("optimizer", OPTIMIZER_SCRIPT, &mut warnings);

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            warnings.push(format!(
                "[logging] unknown level '{}'. Valid values: {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        warnings
    }
}

/// Effective configuration: pipedeck.toml merged with environment and CLI.
#[derive(Debug, Clone)]
pub struct DeckConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: DeckToml,
    pub verbose: bool,
}

impl DeckConfig {
    /// Load configuration for a project directory, applying environment overrides.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let mut toml = DeckToml::load_or_default(&config_dir)?;
        toml.apply_env_overrides(|key| std::env::var(key).ok())?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
        })
    }

    /// Load configuration with CLI overrides on top.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        host: Option<String>,
        port: Option<u16>,
        dev: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(host) = host {
            config.toml.server.host = host;
        }
        if let Some(port) = port {
            config.toml.server.port = port;
        }
        if dev {
            config.toml.server.cors_permissive = true;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn analyzer_spec(&self) -> ProcessSpec {
        self.toml
            .analyzer
            .process_spec(ANALYZER_SCRIPT, &self.project_dir)
    }

    pub fn optimizer_spec(&self) -> ProcessSpec {
        self.toml
            .optimizer
            .process_spec(OPTIMIZER_SCRIPT, &self.project_dir)
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
