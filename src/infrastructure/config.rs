use crate::domain::models::UserSession;
use crate::domain::time_window::OrganizationTimeConfig;
use crate::infrastructure::error::InfraError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use url::Url;

const APP_JSON: &str = "app.json";
const ORGANIZATION_JSON: &str = "organization.json";
const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub server_url: String,
    pub push_path: String,
    pub health_path: String,
    pub sync_interval_seconds: u64,
    pub connectivity_interval_seconds: u64,
    pub sync_lookback_weeks: u32,
    pub retry: RetryConfig,
}

impl AppConfig {
    pub fn push_endpoint(&self) -> Result<Url, InfraError> {
        self.endpoint(&self.push_path)
    }

    pub fn health_endpoint(&self) -> Result<Url, InfraError> {
        self.endpoint(&self.health_path)
    }

    fn endpoint(&self, path: &str) -> Result<Url, InfraError> {
        let base = Url::parse(self.server_url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid serverUrl: {error}")))?;
        base.join(path.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid endpoint path '{path}': {error}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub organization: OrganizationTimeConfig,
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "serverUrl": "http://127.0.0.1:3000/api/",
                "pushPath": "timesheet/timer/offline-sync",
                "healthPath": "health",
                "syncIntervalSeconds": 60,
                "connectivityIntervalSeconds": 15,
                "syncLookbackWeeks": 4,
                "retry": {
                    "maxAttempts": 3,
                    "baseDelayMs": 500,
                    "maxBackoffMs": 300000
                }
            }),
        ),
        (
            ORGANIZATION_JSON,
            serde_json::json!({
                "schema": 1,
                "organizationId": null,
                "timezone": null,
                "utcOffsetMinutes": 0,
                "startWeekOn": "MONDAY",
                "locale": "en"
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            write_config(&path, &value)?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SCHEMA_VERSION {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn write_config(path: &Path, value: &serde_json::Value) -> Result<(), InfraError> {
    let formatted = serde_json::to_string_pretty(value)?;
    fs::write(path, format!("{formatted}\n"))?;
    Ok(())
}

fn typed<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, InfraError> {
    serde_json::from_value(read_config(path)?)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid {}: {error}", path.display())))
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app: AppConfig = typed(&config_dir.join(APP_JSON))?;
    if app.sync_interval_seconds == 0 || app.connectivity_interval_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "syncIntervalSeconds and connectivityIntervalSeconds must be > 0".to_string(),
        ));
    }
    app.push_endpoint()?;
    app.health_endpoint()?;

    Ok(ConfigBundle {
        app,
        organization: typed(&config_dir.join(ORGANIZATION_JSON))?,
    })
}

/// Persists the active organization's time settings, as received when the
/// user switches organization.
pub fn save_organization_config(
    config_dir: &Path,
    organization: &OrganizationTimeConfig,
) -> Result<(), InfraError> {
    let mut value = serde_json::to_value(organization)?;
    let object = value.as_object_mut().ok_or_else(|| {
        InfraError::InvalidConfig("organization config must serialize to an object".to_string())
    })?;
    object.insert("schema".to_string(), serde_json::Value::from(SCHEMA_VERSION));
    write_config(&config_dir.join(ORGANIZATION_JSON), &value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session: UserSession,
    pub api_token: Option<String>,
}

pub fn load_session_from_env() -> Result<SessionContext, InfraError> {
    load_session_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_session_from_lookup<F>(lookup: F) -> Result<SessionContext, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let session = UserSession {
        employee_id: required_lookup_value(&lookup, "TIMESYNC_EMPLOYEE_ID", "employee id")?,
        tenant_id: required_lookup_value(&lookup, "TIMESYNC_TENANT_ID", "tenant id")?,
        organization_id: optional_lookup_value(&lookup, "TIMESYNC_ORGANIZATION_ID"),
    };
    session.validate().map_err(InfraError::InvalidConfig)?;

    Ok(SessionContext {
        session,
        api_token: optional_lookup_value(&lookup, "TIMESYNC_API_TOKEN"),
    })
}

fn required_lookup_value<F>(lookup: &F, key: &str, field_name: &str) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, key)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing {field_name} ({key})")))
}

fn optional_lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
