//! Application configuration loading and validation.
//!
//! Reads `config.yaml` and resolves environment variables. Every section has
//! defaults, so running without a config file works as long as the selected
//! backend's credentials are in the environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::inference::{Backend, ModelSettings};
use crate::mcp_client::client::DEFAULT_CALL_TIMEOUT_MS;
use crate::mcp_client::types::{McpServersConfig, ServerConfig};

// ─── Constants ───────────────────────────────────────────────────────────────

pub const CONFIG_FILE_NAME: &str = "config.yaml";

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config: {reason}")]
    Parse { reason: String },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

// ─── Public Types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8000,
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid {
                reason: format!("bad listen address {}:{}: {e}", self.host, self.port),
            })
    }
}

/// Runtime MCP behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpSettings {
    /// Commands that `POST /api/mcp` may launch, matched exactly. Empty
    /// rejects every runtime connect; `mcp_servers` are not filtered.
    pub allowed_executables: Vec<String>,
    pub call_timeout_ms: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            allowed_executables: Vec::new(),
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
        }
    }
}

impl McpSettings {
    pub fn allows(&self, command: &str) -> bool {
        self.allowed_executables.iter().any(|allowed| allowed == command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `debug`).
    pub level: Option<String>,
    pub format: LogFormat,
    /// Write to a rotated log file in the data directory instead of stderr.
    pub file: bool,
}

/// Top-level configuration (mirrors `config.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSettings,
    pub server: ServerSettings,
    /// MCP servers started at launch, keyed by name.
    pub mcp_servers: HashMap<String, ServerConfig>,
    pub mcp: McpSettings,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Fill Databricks credentials the file left empty from the environment.
    pub fn apply_env_fallbacks(&mut self) {
        let databricks = &mut self.model.databricks;
        if databricks.host.is_empty() {
            databricks.host = std::env::var("DATABRICKS_HOST").unwrap_or_default();
        }
        if databricks.token.is_empty() {
            databricks.token = std::env::var("DATABRICKS_TOKEN").unwrap_or_default();
        }
    }

    /// Backend credentials are checked later, when the model is built, so a
    /// missing token leaves the UI up with the model uninitialized.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.model.validate_sampling().map_err(|e| ConfigError::Invalid {
            reason: e.to_string(),
        })?;
        self.server.socket_addr()?;
        if self.mcp.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "mcp.call_timeout_ms must be positive".into(),
            });
        }
        for (name, server) in &self.mcp_servers {
            if server.command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    reason: format!("MCP server '{name}' has an empty command"),
                });
            }
        }
        Ok(())
    }

    pub fn mcp_config(&self) -> McpServersConfig {
        McpServersConfig {
            servers: self.mcp_servers.clone(),
        }
    }

    /// Apply command-line overrides.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(backend) = cli.backend {
            self.model.backend = backend;
        }
        if let Some(level) = &cli.log_level {
            self.logging.level = Some(level.clone());
        }
    }
}

// ─── CLI ─────────────────────────────────────────────────────────────────────

/// Chat UI for Claude with MCP tools.
#[derive(Debug, Parser)]
#[command(name = "mcp-chat", version, about)]
pub struct Cli {
    /// Path to config.yaml (searched upward from the working directory by default).
    #[arg(long, short, env = "MCP_CHAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen host.
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port.
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Inference backend.
    #[arg(long, value_parser = parse_backend)]
    pub backend: Option<Backend>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,
}

fn parse_backend(value: &str) -> Result<Backend, String> {
    match value {
        "bedrock" => Ok(Backend::Bedrock),
        "databricks" => Ok(Backend::Databricks),
        other => Err(format!("unknown backend '{other}' (expected bedrock or databricks)")),
    }
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Search upward from `start` for `config.yaml`.
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load and parse a configuration file.
///
/// Performs environment-variable interpolation on `${VAR_NAME}` and
/// `${VAR_NAME:-default}` before parsing.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    parse_config(&raw)
}

pub fn parse_config(raw: &str) -> Result<AppConfig, ConfigError> {
    let interpolated = interpolate_env_vars(raw);
    if interpolated.trim().is_empty() {
        return Ok(AppConfig::default());
    }
    serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })
}

/// Resolve the effective configuration: explicit path (flag or env), else an
/// upward search, else defaults. Env fallbacks and CLI overrides are applied
/// and the result validated.
pub fn resolve(cli: &Cli) -> Result<(AppConfig, Option<PathBuf>), ConfigError> {
    let path = match &cli.config {
        Some(explicit) => Some(explicit.clone()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_path(&cwd)),
    };

    let mut config = match &path {
        Some(p) => load_config(p)?,
        None => AppConfig::default(),
    };
    config.apply_env_fallbacks();
    config.apply_cli(cli);
    config.validate()?;
    Ok((config, path))
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve a variable expression like `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    if let Some((var_name, default)) = expr.split_once(":-") {
        std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
    } else {
        std::env::var(expr).unwrap_or_default()
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__MCP_CHAT_TEST_UNSET__");
        let result = interpolate_env_vars("${__MCP_CHAT_TEST_UNSET__:-/fallback/path}");
        assert_eq!(result, "/fallback/path");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__MCP_CHAT_TEST_SET__", "https://dbc.example.com");
        let result = interpolate_env_vars("host: ${__MCP_CHAT_TEST_SET__}");
        assert_eq!(result, "host: https://dbc.example.com");
        std::env::remove_var("__MCP_CHAT_TEST_SET__");
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with $dollar but no braces";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/servers");
        assert!(!result.starts_with('~'), "tilde should be expanded");
        assert!(result.ends_with("/servers"));
    }

    #[test]
    fn test_empty_file_means_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.model.backend, Backend::Databricks);
        // Credentials are not required to start
        config.validate().unwrap();
    }

    #[test]
    fn test_full_config_parses() {
        let yaml = r#"
model:
  backend: bedrock
  inference:
    temperature: 1.0
    max_tokens: 8192
  thinking:
    budget_tokens: 2048
server:
  port: 9000
mcp_servers:
  math:
    command: math-server
    args: ["--log-level", "debug"]
logging:
  format: json
  file: true
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.model.backend, Backend::Bedrock);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.mcp_servers["math"].args, vec!["--log-level", "debug"]);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.logging.file);
        config.validate().unwrap();
    }

    #[test]
    fn test_mcp_settings() {
        let config = parse_config("").unwrap();
        assert!(config.mcp.allowed_executables.is_empty());
        assert!(!config.mcp.allows("sh"));
        assert_eq!(config.mcp.call_timeout_ms, 30_000);

        let yaml = r#"
mcp:
  allowed_executables: ["/opt/mcp/math-server", "uvx"]
  call_timeout_ms: 5000
"#;
        let config = parse_config(yaml).unwrap();
        assert!(config.mcp.allows("uvx"));
        assert!(config.mcp.allows("/opt/mcp/math-server"));
        assert!(!config.mcp.allows("math-server"));
        assert!(!config.mcp.allows("/tmp/uvx"));
        assert_eq!(config.mcp.call_timeout_ms, 5000);
        config.validate().unwrap();

        let err = parse_config("mcp:\n  call_timeout_ms: 0\n")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("call_timeout_ms"));
    }

    #[test]
    fn test_invalid_yaml_is_parse_error() {
        let err = parse_config("model: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_budget() {
        let yaml = r#"
model:
  backend: bedrock
  inference:
    max_tokens: 1024
  thinking:
    budget_tokens: 1024
"#;
        let err = parse_config(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("less than max_tokens"));
    }

    #[test]
    fn test_validation_rejects_empty_command() {
        let yaml = r#"
model:
  backend: bedrock
mcp_servers:
  broken:
    command: ""
"#;
        let err = parse_config(yaml).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "server:\n  port: 8123\n").unwrap();

        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(find_config_path(&nested), Some(path.clone()));

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 8123);
    }

    #[test]
    fn test_load_missing_file_is_read_error() {
        let err = load_config(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "mcp-chat",
            "--port",
            "9100",
            "--backend",
            "bedrock",
            "--log-level",
            "debug",
        ]);
        let mut config = AppConfig::default();
        config.apply_cli(&cli);
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.model.backend, Backend::Bedrock);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_socket_addr() {
        let addr = ServerSettings::default().socket_addr().unwrap();
        assert_eq!(addr.port(), 8000);
        let bad = ServerSettings {
            host: "not a host".into(),
            port: 1,
        };
        assert!(bad.socket_addr().is_err());
    }
}
