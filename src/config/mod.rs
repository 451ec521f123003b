use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::refresh::{DEFAULT_INTERVAL, INTERVAL_CHOICES};

pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub api: ApiConfig,
    pub refresh: RefreshConfig,
    pub ui: UiConfig,
    pub logs: LogsConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshConfig {
    pub auto: bool,
    pub interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_app: Option<String>,
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UiConfig {
    pub color: bool,
    pub max_table_rows: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsConfig {
    pub enabled: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                base_url: DEFAULT_BASE_URL.to_string(),
            },
            refresh: RefreshConfig {
                auto: false,
                interval_secs: DEFAULT_INTERVAL.as_secs(),
                default_app: None,
            },
            ui: UiConfig {
                color: true,
                max_table_rows: 50,
            },
            logs: LogsConfig { enabled: true },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    api: Option<RawApiConfig>,
    refresh: Option<RawRefreshConfig>,
    ui: Option<RawUiConfig>,
    logs: Option<RawLogsConfig>,
}

#[derive(Debug, Deserialize)]
struct RawApiConfig {
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRefreshConfig {
    auto: Option<bool>,
    interval_secs: Option<u64>,
    default_app: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUiConfig {
    color: Option<bool>,
    max_table_rows: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawLogsConfig {
    enabled: Option<bool>,
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("HOME is not set"))
}

pub fn config_dir(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/compliance-dash")
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    config_dir(home_dir).join("config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::default();

    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if config_path.is_some() && !path.exists() {
        return Err(anyhow!("config file not found: {}", path.display()));
    }

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&s)
            .with_context(|| format!("failed to parse config file (TOML): {}", path.display()))?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg)?;
    validate(&cfg)?;

    Ok(cfg)
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(api) = raw.api {
        if let Some(base_url) = api.base_url {
            cfg.api.base_url = base_url;
        }
    }

    if let Some(refresh) = raw.refresh {
        if let Some(auto) = refresh.auto {
            cfg.refresh.auto = auto;
        }
        if let Some(interval_secs) = refresh.interval_secs {
            cfg.refresh.interval_secs = interval_secs;
        }
        if let Some(default_app) = refresh.default_app {
            cfg.refresh.default_app = non_empty(&default_app);
        }
    }

    if let Some(ui) = raw.ui {
        if let Some(color) = ui.color {
            cfg.ui.color = color;
        }
        if let Some(max_table_rows) = ui.max_table_rows {
            cfg.ui.max_table_rows = max_table_rows;
        }
    }

    if let Some(logs) = raw.logs {
        if let Some(enabled) = logs.enabled {
            cfg.logs.enabled = enabled;
        }
    }
}

fn apply_env_overrides(cfg: &mut EffectiveConfig) -> Result<()> {
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_API_BASE_URL") {
        if let Some(v) = non_empty(&v) {
            cfg.api.base_url = v;
        }
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_REFRESH_AUTO") {
        cfg.refresh.auto = parse_bool(&v).context("COMPLIANCE_DASH_REFRESH_AUTO")?;
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_REFRESH_INTERVAL_SECS") {
        cfg.refresh.interval_secs = v
            .trim()
            .parse::<u64>()
            .context("COMPLIANCE_DASH_REFRESH_INTERVAL_SECS")?;
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_REFRESH_DEFAULT_APP") {
        cfg.refresh.default_app = non_empty(&v);
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_UI_COLOR") {
        cfg.ui.color = parse_bool(&v).context("COMPLIANCE_DASH_UI_COLOR")?;
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_UI_MAX_TABLE_ROWS") {
        cfg.ui.max_table_rows = v
            .trim()
            .parse::<usize>()
            .context("COMPLIANCE_DASH_UI_MAX_TABLE_ROWS")?;
    }
    if let Ok(v) = std::env::var("COMPLIANCE_DASH_LOGS_ENABLED") {
        cfg.logs.enabled = parse_bool(&v).context("COMPLIANCE_DASH_LOGS_ENABLED")?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    validate_base_url(&cfg.api.base_url).context("api.base_url")?;
    parse_interval_secs(cfg.refresh.interval_secs).context("refresh.interval_secs")?;
    Ok(())
}

pub fn validate_base_url(base_url: &str) -> Result<()> {
    let base = base_url.trim();
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(anyhow!("base url must start with http:// or https://: {base}"));
    }
    Ok(())
}

pub fn parse_interval_secs(secs: u64) -> Result<Duration> {
    let interval = Duration::from_secs(secs);
    if INTERVAL_CHOICES.contains(&interval) {
        return Ok(interval);
    }
    let allowed: Vec<String> = INTERVAL_CHOICES
        .iter()
        .map(|d| d.as_secs().to_string())
        .collect();
    Err(anyhow!(
        "invalid refresh interval: {secs}s (expected one of {})",
        allowed.join("|")
    ))
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

pub fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "invalid boolean: {s} (expected true|false|1|0|yes|no|on|off)"
        )),
    }
}
