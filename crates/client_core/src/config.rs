use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base HTTP(S) URL of the chat server; the socket scheme follows it.
    pub server_url: String,
    pub ws_path: String,
    pub session_cookie: Option<String>,
    pub batch_window_ms: u64,
    pub batch_max_items: usize,
    pub group_history_limit: u32,
    pub max_pending_outbound: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            ws_path: "/ws".into(),
            session_cookie: None,
            batch_window_ms: 300,
            batch_max_items: 20,
            group_history_limit: 50,
            max_pending_outbound: 500,
        }
    }
}

impl ClientSettings {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    ws_path: Option<String>,
    session_cookie: Option<String>,
    batch_window_ms: Option<u64>,
    batch_max_items: Option<usize>,
    group_history_limit: Option<u32>,
    max_pending_outbound: Option<usize>,
}

/// Defaults, then `client.toml` in the working directory if present, then
/// environment overrides. A broken file is logged and skipped.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(DEFAULT_SETTINGS_FILE) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(file = DEFAULT_SETTINGS_FILE, error = %err, "config: ignoring unreadable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Like [`load_settings`] but the file is mandatory.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let file_cfg = toml::from_str::<FileSettings>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;

    let mut settings = ClientSettings::default();
    apply_file_settings(&mut settings, file_cfg);
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file_settings(settings: &mut ClientSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.ws_path {
        settings.ws_path = v;
    }
    if let Some(v) = file_cfg.session_cookie {
        settings.session_cookie = Some(v);
    }
    if let Some(v) = file_cfg.batch_window_ms {
        settings.batch_window_ms = v;
    }
    if let Some(v) = file_cfg.batch_max_items {
        settings.batch_max_items = v;
    }
    if let Some(v) = file_cfg.group_history_limit {
        settings.group_history_limit = v;
    }
    if let Some(v) = file_cfg.max_pending_outbound {
        settings.max_pending_outbound = v;
    }
}

fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = lookup("APP__WS_PATH") {
        settings.ws_path = v;
    }

    if let Some(v) = lookup("APP__SESSION_COOKIE") {
        settings.session_cookie = Some(v);
    }

    if let Some(parsed) = lookup("APP__BATCH_WINDOW_MS").and_then(|v| v.parse().ok()) {
        settings.batch_window_ms = parsed;
    }
    if let Some(parsed) = lookup("APP__BATCH_MAX_ITEMS").and_then(|v| v.parse().ok()) {
        settings.batch_max_items = parsed;
    }
    if let Some(parsed) = lookup("APP__GROUP_HISTORY_LIMIT").and_then(|v| v.parse().ok()) {
        settings.group_history_limit = parsed;
    }
    if let Some(parsed) = lookup("APP__MAX_PENDING_OUTBOUND").and_then(|v| v.parse().ok()) {
        settings.max_pending_outbound = parsed;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
