use std::{fs, time::Duration};

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    /// Time the reactor takes before it confirms a command.
    pub processing_delay_ms: u64,
    /// Used when a client asks for a server-side wait without a usable timeout.
    pub default_await_timeout_secs: u64,
    pub notification_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3001".into(),
            processing_delay_ms: 500,
            default_await_timeout_secs: 2,
            notification_buffer: 256,
        }
    }
}

impl Settings {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    pub fn default_await_timeout(&self) -> Duration {
        Duration::from_secs(self.default_await_timeout_secs)
    }
}

/// `RUST_LOG` wins; otherwise `DEBUG=true` turns on debug output.
///
/// Read straight from the environment so logging is up before settings load.
pub fn log_filter(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("RUST_LOG").unwrap_or_else(|| {
        let debug = lookup("DEBUG").is_some_and(|v| v == "true");
        if debug { "debug" } else { "info" }.to_string()
    })
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());

    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let table = match toml::from_str::<toml::Table>(raw) {
        Ok(table) => table,
        Err(err) => {
            warn!(%err, "ignoring unreadable server.toml");
            return;
        }
    };

    if let Some(v) = table.get("bind_addr").and_then(toml::Value::as_str) {
        settings.server_bind = v.to_string();
    }
    if let Some(v) = table.get("processing_delay_ms").and_then(as_u64) {
        settings.processing_delay_ms = v;
    }
    if let Some(v) = table.get("default_await_timeout_secs").and_then(as_u64) {
        settings.default_await_timeout_secs = v;
    }
    if let Some(v) = table.get("notification_buffer").and_then(as_u64) {
        settings.notification_buffer = v as usize;
    }
}

fn as_u64(value: &toml::Value) -> Option<u64> {
    value.as_integer().and_then(|v| u64::try_from(v).ok())
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    for key in ["SERVE_ADDR", "SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = lookup(key) {
            settings.server_bind = v;
        }
    }

    if let Some(v) = lookup("APP__PROCESSING_DELAY_MS") {
        match v.parse() {
            Ok(parsed) => settings.processing_delay_ms = parsed,
            Err(_) => warn!(value = %v, "APP__PROCESSING_DELAY_MS is not a number"),
        }
    }
    if let Some(v) = lookup("APP__DEFAULT_AWAIT_TIMEOUT_SECS") {
        match v.parse() {
            Ok(parsed) => settings.default_await_timeout_secs = parsed,
            Err(_) => warn!(value = %v, "APP__DEFAULT_AWAIT_TIMEOUT_SECS is not a number"),
        }
    }
    if let Some(v) = lookup("APP__NOTIFICATION_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.notification_buffer = parsed.max(1);
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
