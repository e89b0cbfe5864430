use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub const ENABLED_ENV: &str = "MESSAGES_OBSERVABILITY_ENABLED";
pub const LOG_LEVEL_ENV: &str = "MESSAGES_LOG_LEVEL";
pub const JSON_LOG_PATH_ENV: &str = "MESSAGES_JSON_LOG_PATH";

const DEFAULT_FILTER: &str = "info";
const DEFAULT_LOG_FILE: &str = "messages.logs.jsonl";

static INIT: OnceCell<()> = OnceCell::new();

/// Subscriber settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Explicit filter directive; `None` defers to `RUST_LOG`, then `info`.
    pub level: Option<String>,
    /// JSONL sink. Logs go to stdout when unset.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let enabled = lookup(ENABLED_ENV)
            .map(|value| parse_bool_env(&value).unwrap_or(true))
            .unwrap_or(true);
        Self {
            enabled,
            level: lookup(LOG_LEVEL_ENV).filter(|v| !v.trim().is_empty()),
            json_log_path: lookup(JSON_LOG_PATH_ENV)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = EnvFilter::try_new(level)
        {
            return filter;
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Splits a log path into the directory and file name the appender wants.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_owned();
    (dir, file_name)
}

/// Initialize logging once per process from the environment.
///
/// Environment variables:
/// - `MESSAGES_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `MESSAGES_LOG_LEVEL`: optional level/filter override (`info`, `messages_core=debug`, ...).
/// - `MESSAGES_JSON_LOG_PATH`: optional JSONL log file. Without it logs go to stdout.
/// - `RUST_LOG`: filter used when `MESSAGES_LOG_LEVEL` is unset.
pub fn init_observability() {
    init_with(ObservabilitySettings::from_env());
}

/// Like [`init_observability`] with explicit settings. Only the first call
/// in a process has any effect.
pub fn init_with(settings: ObservabilitySettings) {
    INIT.get_or_init(|| {
        if !settings.enabled {
            return;
        }
        let env_filter = settings.env_filter();
        match &settings.json_log_path {
            Some(path) => {
                let (dir, file_name) = split_log_path(path);
                let _ = std::fs::create_dir_all(&dir);
                let writer = tracing_appender::rolling::never(dir, file_name);
                let json_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_writer(writer);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(json_layer)
                    .try_init();
            }
            None => {
                let console_layer = tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stdout);
                let _ = tracing_subscriber::registry()
                    .with(env_filter)
                    .with(console_layer)
                    .try_init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> ObservabilitySettings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ObservabilitySettings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_enabled_stdout() {
        assert_eq!(
            settings(&[]),
            ObservabilitySettings {
                enabled: true,
                level: None,
                json_log_path: None,
            }
        );
    }

    #[test]
    fn reads_toggle_level_and_path() {
        let resolved = settings(&[
            (ENABLED_ENV, "off"),
            (LOG_LEVEL_ENV, "messages_core=debug"),
            (JSON_LOG_PATH_ENV, "logs/run.jsonl"),
        ]);
        assert!(!resolved.enabled);
        assert_eq!(resolved.level.as_deref(), Some("messages_core=debug"));
        assert_eq!(resolved.json_log_path, Some(PathBuf::from("logs/run.jsonl")));
    }

    #[test]
    fn unparseable_toggle_keeps_logging_on() {
        assert!(settings(&[(ENABLED_ENV, "sometimes")]).enabled);
        assert!(!settings(&[(ENABLED_ENV, " 0 ")]).enabled);
    }

    #[test]
    fn bare_file_name_logs_to_current_dir() {
        assert_eq!(
            split_log_path(Path::new("run.jsonl")),
            (PathBuf::from("."), "run.jsonl".to_owned())
        );
        assert_eq!(
            split_log_path(Path::new("/var/log/messages/")),
            (PathBuf::from("/var/log"), "messages".to_owned())
        );
    }
}
