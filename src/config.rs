use crate::supervisor::runtime::ShellLauncher;
use crate::supervisor::SupervisorSettings;
use crate::utils::path_utils::expand_tilde_path_buf;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

const DEFAULT_HOME: &str = "~/.superterminals";
const STORE_FILE_NAME: &str = "terminals.json";
const AUDIT_LOG_FILE_NAME: &str = "command_calls.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub store_file: PathBuf,
    pub log_level: String,
    pub log_buffer_capacity: usize,
    pub stop_grace_period: Duration,
    pub default_shell: String,
    pub login_shell: bool,
    pub extra_path: Vec<PathBuf>,
    pub audit_log_file: PathBuf,
    pub audit_log_max_size_bytes: u64,
}

fn platform_default_shell() -> &'static str {
    if cfg!(windows) {
        "cmd"
    } else {
        "/bin/sh"
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `load` feeds it the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let data_dir_str = var("SUPERTERMINALS_HOME").unwrap_or_else(|| DEFAULT_HOME.to_string());
        let data_dir = expand_tilde_path_buf(&data_dir_str);

        let log_level = var("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let log_buffer_capacity = var("LOG_BUFFER_CAPACITY")
            .unwrap_or_else(|| "1000".to_string())
            .parse::<usize>()
            .context("Invalid LOG_BUFFER_CAPACITY")?;
        if log_buffer_capacity == 0 {
            anyhow::bail!("LOG_BUFFER_CAPACITY must be greater than zero");
        }

        let stop_grace_period = var("STOP_GRACE_PERIOD_MS")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid STOP_GRACE_PERIOD_MS")?;

        let default_shell =
            var("DEFAULT_SHELL").unwrap_or_else(|| platform_default_shell().to_string());

        let login_shell = var("LOGIN_SHELL")
            .map(|v| v.parse::<bool>())
            .transpose()
            .context("Invalid LOGIN_SHELL (expected true or false)")?
            .unwrap_or(false);

        let extra_path = var("EXTRA_PATH")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(expand_tilde_path_buf)
            .collect::<Vec<PathBuf>>();

        let audit_log_max_size_mb = var("AUDIT_LOG_MAX_SIZE_MB")
            .unwrap_or_else(|| "10".to_string()) // Default 10 MB
            .parse::<u64>()
            .context("Invalid AUDIT_LOG_MAX_SIZE_MB")?;
        let audit_log_max_size_bytes = audit_log_max_size_mb.saturating_mul(1024 * 1024);

        Ok(Config {
            store_file: data_dir.join(STORE_FILE_NAME),
            audit_log_file: data_dir.join("logs").join(AUDIT_LOG_FILE_NAME),
            data_dir,
            log_level,
            log_buffer_capacity,
            stop_grace_period,
            default_shell,
            login_shell,
            extra_path,
            audit_log_max_size_bytes,
        })
    }

    pub fn shell_launcher(&self) -> ShellLauncher {
        if which::which(&self.default_shell).is_err() {
            warn!(shell = %self.default_shell, "Configured shell was not found in PATH. Every start_process call will fail to spawn.");
        }
        ShellLauncher::new(&self.default_shell, self.login_shell, self.extra_path.clone())
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            log_capacity: self.log_buffer_capacity,
            stop_grace_period: self.stop_grace_period,
        }
    }
}
