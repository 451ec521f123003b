use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::core::{CompliancePayload, PayloadShape};

pub const FALLBACK_MESSAGE: &str = "Failed to fetch compliance data";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum AppSelection {
    #[default]
    All,
    App(String),
}

impl AppSelection {
    pub fn query_value(&self) -> Option<&str> {
        match self {
            AppSelection::All => None,
            AppSelection::App(name) => Some(name),
        }
    }
}

impl fmt::Display for AppSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppSelection::All => f.write_str("all"),
            AppSelection::App(name) => f.write_str(name),
        }
    }
}

impl FromStr for AppSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("app must not be empty".to_string());
        }
        if s.eq_ignore_ascii_case("all") {
            return Ok(AppSelection::All);
        }
        Ok(AppSelection::App(s.to_string()))
    }
}

impl Serialize for AppSelection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where payloads come from. Implementations block; callers run them off
/// the UI thread.
pub trait ComplianceSource: Send + Sync {
    fn fetch_apps(&self) -> Result<Vec<String>>;
    fn fetch_compliance(&self, app: &AppSelection) -> Result<CompliancePayload>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for FetchFailure {}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

pub fn describe_failure(status: StatusCode, body: &[u8]) -> FetchFailure {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = [parsed.message, parsed.error]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| format!("http status {status}"));
    FetchFailure {
        status: Some(status.as_u16()),
        message,
    }
}

pub fn failure_message(err: &anyhow::Error) -> String {
    if let Some(failure) = err.downcast_ref::<FetchFailure>() {
        if !failure.message.trim().is_empty() {
            return failure.message.clone();
        }
    }
    let text = err.to_string();
    if text.trim().is_empty() {
        FALLBACK_MESSAGE.to_string()
    } else {
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub vault_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Health {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Debug, Deserialize)]
struct AppsBody {
    #[serde(default)]
    apps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, app: Option<&str>) -> Result<Vec<u8>> {
        let mut request = self.client.get(self.url(path));
        if let Some(app) = app {
            request = request.query(&[("app", app)]);
        }
        let response = request.send().map_err(transport_failure)?;
        read_success(response)
    }

    pub fn health(&self) -> Result<Health> {
        let response = self
            .client
            .get(self.url("/api/health"))
            .send()
            .map_err(transport_failure)?;
        let status = response.status();
        let body = response.bytes().map_err(transport_failure)?;
        match serde_json::from_slice::<Health>(&body) {
            Ok(health) => Ok(health),
            Err(_) => Err(describe_failure(status, &body).into()),
        }
    }
}

fn transport_failure(err: reqwest::Error) -> anyhow::Error {
    let message = err.to_string();
    FetchFailure {
        status: err.status().map(|s| s.as_u16()),
        message: if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message
        },
    }
    .into()
}

fn read_success(response: Response) -> Result<Vec<u8>> {
    let status = response.status();
    let body = response.bytes().map_err(transport_failure)?;
    if !status.is_success() {
        return Err(describe_failure(status, &body).into());
    }
    Ok(body.to_vec())
}

impl ComplianceSource for HttpSource {
    fn fetch_apps(&self) -> Result<Vec<String>> {
        let body = self.get("/api/apps", None)?;
        let apps: AppsBody = serde_json::from_slice(&body).context("failed to decode app list")?;
        Ok(apps.apps)
    }

    fn fetch_compliance(&self, app: &AppSelection) -> Result<CompliancePayload> {
        let body = self.get("/api/compliance", app.query_value())?;
        CompliancePayload::from_json(&body)
    }
}

#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<CompliancePayload> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("failed to read payload file: {}", self.path.display()))?;
        CompliancePayload::from_json(&bytes)
            .with_context(|| format!("invalid payload file: {}", self.path.display()))
    }
}

impl ComplianceSource for FileSource {
    fn fetch_apps(&self) -> Result<Vec<String>> {
        Ok(self.read()?.app_names())
    }

    fn fetch_compliance(&self, app: &AppSelection) -> Result<CompliancePayload> {
        narrow_to_app(self.read()?, app)
    }
}

pub fn narrow_to_app(payload: CompliancePayload, app: &AppSelection) -> Result<CompliancePayload> {
    let AppSelection::App(name) = app else {
        return Ok(payload);
    };
    let apps = match payload.shape {
        PayloadShape::MultiApp { apps } => apps,
        shape => return Ok(CompliancePayload { shape, ..payload }),
    };
    let Some((app_name, report)) = apps.into_iter().find(|(n, _)| n == name) else {
        return Err(FetchFailure {
            status: None,
            message: format!("no compliance data for app: {name}"),
        }
        .into());
    };
    if let Some(error) = report.error {
        return Err(FetchFailure {
            status: None,
            message: error,
        }
        .into());
    }
    Ok(CompliancePayload {
        current_week: payload.current_week,
        current_year: payload.current_year,
        generated_at: report.generated_at.or(payload.generated_at),
        shape: PayloadShape::SingleApp {
            app_name,
            regions: report.regions,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_parses_all_and_names() {
        assert_eq!("ALL".parse::<AppSelection>(), Ok(AppSelection::All));
        assert_eq!(
            "billing".parse::<AppSelection>(),
            Ok(AppSelection::App("billing".to_string()))
        );
        assert!(" ".parse::<AppSelection>().is_err());
        assert_eq!(AppSelection::All.query_value(), None);
        assert_eq!(AppSelection::App("x".into()).to_string(), "x");
    }

    #[test]
    fn failure_prefers_message_then_error_then_status() {
        let f = describe_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            br#"{"error": "Failed to fetch compliance data", "message": "vault sealed"}"#,
        );
        assert_eq!(f.message, "vault sealed");
        assert_eq!(f.status, Some(500));

        let f = describe_failure(StatusCode::NOT_FOUND, br#"{"error": "unknown app"}"#);
        assert_eq!(f.message, "unknown app");

        let f = describe_failure(StatusCode::BAD_GATEWAY, b"<html>bad gateway</html>");
        assert_eq!(f.message, "http status 502 Bad Gateway");

        let f = describe_failure(StatusCode::SERVICE_UNAVAILABLE, br#"{"message": ""}"#);
        assert_eq!(f.message, "http status 503 Service Unavailable");
    }

    #[test]
    fn failure_message_reads_typed_failures_and_falls_back() {
        let err: anyhow::Error = FetchFailure {
            status: Some(500),
            message: "vault sealed".to_string(),
        }
        .into();
        assert_eq!(failure_message(&err.context("refresh")), "vault sealed");
        assert_eq!(failure_message(&anyhow::anyhow!("connection refused")), "connection refused");
        assert_eq!(failure_message(&anyhow::anyhow!("")), FALLBACK_MESSAGE);
    }

    #[test]
    fn narrowing_picks_one_app_in_single_app_shape() {
        let payload = CompliancePayload::from_json(
            br#"{"current_week": 10, "current_year": 2024, "apps": {
                "billing": {"regions": {"eu": {"compliant": 1}}},
                "broken": {"error": "vault unavailable", "regions": {}}
            }}"#,
        )
        .unwrap();

        let narrowed =
            narrow_to_app(payload.clone(), &AppSelection::App("billing".into())).unwrap();
        assert!(!narrowed.is_multi_app());
        assert_eq!(narrowed.app_names(), vec!["billing".to_string()]);
        assert_eq!(narrowed.current_week, 10);

        let err = narrow_to_app(payload.clone(), &AppSelection::App("broken".into())).unwrap_err();
        assert_eq!(failure_message(&err), "vault unavailable");

        let err = narrow_to_app(payload.clone(), &AppSelection::App("nope".into())).unwrap_err();
        assert_eq!(failure_message(&err), "no compliance data for app: nope");

        assert_eq!(narrow_to_app(payload.clone(), &AppSelection::All).unwrap(), payload);
    }
}
