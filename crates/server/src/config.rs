use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context};
use session::{WorkflowConfig, DEFAULT_COOLDOWN_SECONDS};
use skybox_client::{ApiKey, DEFAULT_BASE_URL};

pub const CONFIG_FILE: &str = "server.toml";

#[derive(Debug, Clone)]
pub struct Settings {
    pub server_bind: String,
    pub generation_base_url: String,
    pub skybox_api_key: Option<ApiKey>,
    pub cooldown_seconds: f64,
    pub poll_interval_ms: u64,
    pub ready_clear_delay_ms: u64,
    /// `0` polls without a cap.
    pub max_poll_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8443".into(),
            generation_base_url: DEFAULT_BASE_URL.into(),
            skybox_api_key: None,
            cooldown_seconds: DEFAULT_COOLDOWN_SECONDS,
            poll_interval_ms: 5_000,
            ready_clear_delay_ms: 5_000,
            max_poll_attempts: 120,
        }
    }
}

impl Settings {
    pub fn require_api_key(&self) -> anyhow::Result<ApiKey> {
        match &self.skybox_api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => bail!(
                "no skybox API key configured; set SKYBOX_API_KEY or skybox_api_key in {CONFIG_FILE}"
            ),
        }
    }

    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ready_clear_delay: Duration::from_millis(self.ready_clear_delay_ms),
            max_poll_attempts: (self.max_poll_attempts > 0).then_some(self.max_poll_attempts),
        }
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(CONFIG_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the toml file if it exists, then environment overrides.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        let table: toml::Table =
            toml::from_str(&raw).with_context(|| format!("invalid {}", path.display()))?;
        apply_file(&mut settings, &table)
            .with_context(|| format!("invalid {}", path.display()))?;
    }

    apply_env(&mut settings, env)?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> anyhow::Result<()> {
    if !settings.cooldown_seconds.is_finite() || settings.cooldown_seconds < 0.0 {
        bail!(
            "cooldown_seconds must be a finite, non-negative number, got {}",
            settings.cooldown_seconds
        );
    }
    Ok(())
}

fn apply_file(settings: &mut Settings, table: &toml::Table) -> anyhow::Result<()> {
    if let Some(v) = file_str(table, "bind_addr")? {
        settings.server_bind = v;
    }
    if let Some(v) = file_str(table, "skybox_base_url")? {
        settings.generation_base_url = v;
    }
    if let Some(v) = file_str(table, "skybox_api_key")? {
        settings.skybox_api_key = Some(ApiKey::new(v));
    }
    if let Some(v) = table.get("cooldown_seconds") {
        settings.cooldown_seconds = match v {
            toml::Value::Float(f) => *f,
            toml::Value::Integer(i) => *i as f64,
            _ => bail!("cooldown_seconds must be a number"),
        };
    }
    if let Some(v) = file_u64(table, "poll_interval_ms")? {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = file_u64(table, "ready_clear_delay_ms")? {
        settings.ready_clear_delay_ms = v;
    }
    if let Some(v) = file_u64(table, "max_poll_attempts")? {
        settings.max_poll_attempts =
            u32::try_from(v).context("max_poll_attempts is out of range")?;
    }
    Ok(())
}

fn file_str(table: &toml::Table, key: &str) -> anyhow::Result<Option<String>> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => bail!("{key} must be a string"),
    }
}

fn file_u64(table: &toml::Table, key: &str) -> anyhow::Result<Option<u64>> {
    match table.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(i)) => u64::try_from(*i)
            .map(Some)
            .with_context(|| format!("{key} must not be negative")),
        Some(_) => bail!("{key} must be an integer"),
    }
}

fn apply_env(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("SKYBOX_BASE_URL") {
        settings.generation_base_url = v;
    }
    if let Some(v) = env("APP__SKYBOX_BASE_URL") {
        settings.generation_base_url = v;
    }

    if let Some(v) = env("SKYBOX_API_KEY") {
        settings.skybox_api_key = Some(ApiKey::new(v));
    }
    if let Some(v) = env("APP__SKYBOX_API_KEY") {
        settings.skybox_api_key = Some(ApiKey::new(v));
    }

    if let Some(v) = env("APP__COOLDOWN_SECONDS") {
        settings.cooldown_seconds = v
            .parse()
            .with_context(|| format!("APP__COOLDOWN_SECONDS is not a number: {v}"))?;
    }
    if let Some(v) = env("APP__POLL_INTERVAL_MS") {
        settings.poll_interval_ms = v
            .parse()
            .with_context(|| format!("APP__POLL_INTERVAL_MS is not an integer: {v}"))?;
    }
    if let Some(v) = env("APP__READY_CLEAR_DELAY_MS") {
        settings.ready_clear_delay_ms = v
            .parse()
            .with_context(|| format!("APP__READY_CLEAR_DELAY_MS is not an integer: {v}"))?;
    }
    if let Some(v) = env("APP__MAX_POLL_ATTEMPTS") {
        settings.max_poll_attempts = v
            .parse()
            .with_context(|| format!("APP__MAX_POLL_ATTEMPTS is not an integer: {v}"))?;
    }

    Ok(())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
