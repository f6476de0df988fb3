use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Screenshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Capture metadata returned for the "latest screenshots" strip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotCapture {
    pub screenshots: Vec<Screenshot>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    pub employee_id: String,
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
}

impl UserSession {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.employee_id, "session.employee_id")?;
        validate_non_empty(&self.tenant_id, "session.tenant_id")?;
        if let Some(organization_id) = &self.organization_id {
            validate_non_empty(organization_id, "session.organization_id")?;
        }
        Ok(())
    }
}

/// A tracked work period as stored locally and pushed to the server.
///
/// `duration` is not a field: it is always derived from `started_at` and
/// `stopped_at`, and emitted by [`Timer::to_object`] for the wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub synced: bool,
    #[serde(default)]
    pub screenshots: Vec<Screenshot>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub timelog_id: Option<String>,
    #[serde(default)]
    pub timesheet_id: Option<String>,
    #[serde(default)]
    pub timeslot_id: Option<String>,
    #[serde(default)]
    pub organization_team_id: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub is_started_offline: bool,
    #[serde(default)]
    pub is_stopped_offline: bool,
}

impl Timer {
    /// Starts a local record. Records started online are pushed by the live
    /// flow, so only offline starts begin life as sync candidates.
    pub fn start(employee_id: impl Into<String>, started_at: DateTime<Utc>, offline: bool) -> Self {
        Self {
            id: None,
            employee_id: employee_id.into(),
            started_at,
            stopped_at: None,
            synced: !offline,
            screenshots: Vec::new(),
            created_at: started_at,
            project_id: None,
            task_id: None,
            timelog_id: None,
            timesheet_id: None,
            timeslot_id: None,
            organization_team_id: None,
            description: None,
            version: None,
            is_started_offline: offline,
            is_stopped_offline: false,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.employee_id, "timer.employee_id")?;
        if let Some(id) = self.id {
            if id <= 0 {
                return Err("timer.id must be positive".to_string());
            }
        }
        if let Some(stopped_at) = self.stopped_at {
            if stopped_at < self.started_at {
                return Err("timer.stopped_at must be >= timer.started_at".to_string());
            }
        }
        for (field, value) in [
            ("timer.project_id", &self.project_id),
            ("timer.task_id", &self.task_id),
            ("timer.timelog_id", &self.timelog_id),
            ("timer.timesheet_id", &self.timesheet_id),
            ("timer.timeslot_id", &self.timeslot_id),
            ("timer.organization_team_id", &self.organization_team_id),
            ("timer.version", &self.version),
        ] {
            if let Some(value) = value {
                validate_non_empty(value, field)?;
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.stopped_at.is_none()
    }

    pub fn duration_seconds(&self) -> i64 {
        self.stopped_at
            .map(|stopped_at| (stopped_at - self.started_at).num_seconds().max(0))
            .unwrap_or(0)
    }

    pub fn stop(&mut self, stopped_at: DateTime<Utc>, offline: bool) -> Result<(), String> {
        if stopped_at < self.started_at {
            return Err("timer.stopped_at must be >= timer.started_at".to_string());
        }
        self.stopped_at = Some(stopped_at);
        self.is_stopped_offline = offline;
        Ok(())
    }

    pub fn to_object(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "duration".to_string(),
                serde_json::Value::from(self.duration_seconds()),
            );
        }
        Ok(value)
    }

    pub fn from_object(value: &serde_json::Value) -> Result<Self, String> {
        let timer: Timer = serde_json::from_value(value.clone())
            .map_err(|error| format!("invalid timer object: {error}"))?;
        timer.validate()?;

        if let Some(duration) = value.get("duration").filter(|duration| !duration.is_null()) {
            let duration = duration
                .as_i64()
                .ok_or_else(|| "timer.duration must be an integer".to_string())?;
            if timer.stopped_at.is_some() && duration != timer.duration_seconds() {
                return Err(format!(
                    "timer.duration {duration} does not match stopped_at - started_at ({})",
                    timer.duration_seconds()
                ));
            }
        }
        Ok(timer)
    }
}

/// The interval view of a [`Timer`]: the physical segment without the
/// server-side correlation identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Interval {
    pub id: Option<i64>,
    pub employee_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub synced: bool,
    pub screenshots: Vec<Screenshot>,
    pub created_at: DateTime<Utc>,
}

impl From<&Timer> for Interval {
    fn from(timer: &Timer) -> Self {
        Self {
            id: timer.id,
            employee_id: timer.employee_id.clone(),
            started_at: timer.started_at,
            stopped_at: timer.stopped_at,
            synced: timer.synced,
            screenshots: timer.screenshots.clone(),
            created_at: timer.created_at,
        }
    }
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}
