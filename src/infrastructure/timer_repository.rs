use crate::domain::models::{Screenshot, ScreenshotCapture, Timer, UserSession};
use crate::domain::time_window::{parse_storage_timestamp, storage_timestamp, TimeWindow};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::LocalStore;
use crate::infrastructure::transaction::RecordTransactions;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::sync::Arc;
use tracing::warn;

const TIMER_COLUMNS: &str = "id, employee_id, started_at, stopped_at, synced, screenshots, created_at, \
     project_id, task_id, timelog_id, timesheet_id, timeslot_id, organization_team_id, description, \
     version, is_started_offline, is_stopped_offline";
const LATEST_SCREENSHOT_LIMIT: i64 = 10;

/// Match criteria for local-only deletion. `id` is mandatory; the other
/// fields narrow the match further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerCriteria {
    pub id: Option<i64>,
    pub employee_id: Option<String>,
    pub synced: Option<bool>,
}

impl TimerCriteria {
    pub fn by_id(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
}

pub trait TimerRepository: Send + Sync {
    fn find_all(&self) -> Result<Vec<Timer>, InfraError>;
    fn find_all_synced(&self, is_synced: bool, user: &UserSession) -> Result<Vec<Timer>, InfraError>;
    fn save(&self, timer: &Timer) -> Result<Timer, InfraError>;
    fn find_one_by_id(&self, id: i64) -> Result<Option<Timer>, InfraError>;
    fn update(&self, id: i64, timer: &Timer) -> Result<Timer, InfraError>;
    fn stop(&self, id: i64, stopped_at: DateTime<Utc>, offline: bool) -> Result<Timer, InfraError>;
    fn delete(&self, criteria: &TimerCriteria) -> Result<usize, InfraError>;
    /// Unsynced records of `user` whose start lies in `[started_at, stopped_at]`,
    /// in recording order.
    fn backed_up_no_synced(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        user: &UserSession,
    ) -> Result<Vec<Timer>, InfraError>;
    /// Every record of `user` whose start lies in `window`, synced or not.
    fn find_in_window(&self, window: &TimeWindow, user: &UserSession) -> Result<Vec<Timer>, InfraError>;
    fn synced(&self, offline_start: DateTime<Utc>, offline_end: DateTime<Utc>) -> Result<usize, InfraError>;
    fn synced_records(&self, window: &TimeWindow, ids: &[i64]) -> Result<usize, InfraError>;
    fn count(&self, is_synced: bool, user: &UserSession) -> Result<usize, InfraError>;
    fn screenshots(&self, user: &UserSession) -> Result<Vec<ScreenshotCapture>, InfraError>;
    fn find_last_capture(&self, user: &UserSession) -> Result<Option<Timer>, InfraError>;
    fn find_to_synced(&self, user: &UserSession) -> Result<Vec<Timer>, InfraError>;
    fn interruptions(&self, user: &UserSession) -> Result<Vec<Timer>, InfraError>;
    fn remove(&self, id: i64) -> Result<bool, InfraError>;

    fn count_no_synced(&self, user: &UserSession) -> Result<usize, InfraError> {
        self.count(false, user)
    }
}

#[derive(Debug, Clone)]
pub struct SqliteTimerRepository {
    store: Arc<LocalStore>,
}

impl SqliteTimerRepository {
    pub fn new(store: Arc<LocalStore>) -> Self {
        Self { store }
    }

    fn transactions(&self) -> RecordTransactions<'_> {
        RecordTransactions::new(&self.store)
    }

    fn query_timers<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Timer>, InfraError> {
        self.store.with_connection(|connection| {
            let mut statement = connection.prepare(sql)?;
            let rows = statement
                .query_map(params, TimerRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(TimerRow::into_timer).collect()
        })
    }
}

impl TimerRepository for SqliteTimerRepository {
    fn find_all(&self) -> Result<Vec<Timer>, InfraError> {
        self.query_timers(&format!("SELECT {TIMER_COLUMNS} FROM timers ORDER BY id"), [])
    }

    fn find_all_synced(&self, is_synced: bool, user: &UserSession) -> Result<Vec<Timer>, InfraError> {
        self.query_timers(
            &format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE synced = ?1 AND employee_id = ?2
                 ORDER BY started_at, id"
            ),
            params![is_synced, user.employee_id.trim()],
        )
    }

    fn save(&self, timer: &Timer) -> Result<Timer, InfraError> {
        self.transactions().create(timer)
    }

    fn find_one_by_id(&self, id: i64) -> Result<Option<Timer>, InfraError> {
        self.store.with_connection(|connection| load_timer(connection, id))
    }

    fn update(&self, id: i64, timer: &Timer) -> Result<Timer, InfraError> {
        self.transactions().update(id, timer)
    }

    fn stop(&self, id: i64, stopped_at: DateTime<Utc>, offline: bool) -> Result<Timer, InfraError> {
        self.transactions().stop(id, stopped_at, offline)
    }

    fn delete(&self, criteria: &TimerCriteria) -> Result<usize, InfraError> {
        let id = criteria
            .id
            .ok_or_else(|| InfraError::InvalidRecord("delete requires an id".to_string()))?;
        self.store.with_connection(|connection| {
            let deleted = connection.execute(
                "DELETE FROM timers
                 WHERE id = ?1
                   AND (?2 IS NULL OR employee_id = ?2)
                   AND (?3 IS NULL OR synced = ?3)",
                params![id, criteria.employee_id.as_deref().map(str::trim), criteria.synced],
            )?;
            Ok(deleted)
        })
    }

    fn backed_up_no_synced(
        &self,
        started_at: DateTime<Utc>,
        stopped_at: DateTime<Utc>,
        user: &UserSession,
    ) -> Result<Vec<Timer>, InfraError> {
        self.query_timers(
            &format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND synced = 0
                   AND started_at >= ?2 AND started_at <= ?3
                 ORDER BY started_at, id"
            ),
            params![
                user.employee_id.trim(),
                storage_timestamp(started_at),
                storage_timestamp(stopped_at)
            ],
        )
    }

    fn find_in_window(&self, window: &TimeWindow, user: &UserSession) -> Result<Vec<Timer>, InfraError> {
        let (start, end) = window.storage_bounds();
        self.query_timers(
            &format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND started_at >= ?2 AND started_at <= ?3
                 ORDER BY started_at, id"
            ),
            params![user.employee_id.trim(), start, end],
        )
    }

    fn synced(&self, offline_start: DateTime<Utc>, offline_end: DateTime<Utc>) -> Result<usize, InfraError> {
        let window = TimeWindow::new(offline_start, offline_end).map_err(InfraError::InvalidRecord)?;
        self.transactions().mark_synced(&window, None)
    }

    fn synced_records(&self, window: &TimeWindow, ids: &[i64]) -> Result<usize, InfraError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.transactions().mark_synced(window, Some(ids))
    }

    fn count(&self, is_synced: bool, user: &UserSession) -> Result<usize, InfraError> {
        self.store.with_connection(|connection| {
            let count: i64 = connection.query_row(
                "SELECT COUNT(*) FROM timers WHERE synced = ?1 AND employee_id = ?2",
                params![is_synced, user.employee_id.trim()],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }

    fn screenshots(&self, user: &UserSession) -> Result<Vec<ScreenshotCapture>, InfraError> {
        let rows = self.store.with_connection(|connection| {
            let mut statement = connection.prepare(
                "SELECT id, screenshots, stopped_at, created_at FROM timers
                 WHERE employee_id = ?1
                 ORDER BY id DESC
                 LIMIT ?2",
            )?;
            let rows = statement
                .query_map(params![user.employee_id.trim(), LATEST_SCREENSHOT_LIMIT], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        let mut captures = Vec::with_capacity(rows.len());
        for (id, raw_screenshots, stopped_at, created_at) in rows {
            let screenshots = match serde_json::from_str::<Vec<Screenshot>>(&raw_screenshots) {
                Ok(screenshots) => screenshots,
                Err(error) => {
                    warn!(timer_id = id, %error, "skipping timer with unreadable screenshots");
                    continue;
                }
            };
            let recorded_at = match parse_storage_timestamp(stopped_at.as_deref().unwrap_or(&created_at)) {
                Ok(recorded_at) => recorded_at,
                Err(error) => {
                    warn!(timer_id = id, %error, "skipping timer with unreadable timestamp");
                    continue;
                }
            };
            captures.push(ScreenshotCapture {
                screenshots,
                recorded_at,
            });
        }
        Ok(captures)
    }

    fn find_last_capture(&self, user: &UserSession) -> Result<Option<Timer>, InfraError> {
        Ok(self
            .query_timers(
                &format!(
                    "SELECT {TIMER_COLUMNS} FROM timers
                     WHERE employee_id = ?1
                     ORDER BY id DESC
                     LIMIT 1"
                ),
                params![user.employee_id.trim()],
            )?
            .into_iter()
            .next())
    }

    fn find_to_synced(&self, user: &UserSession) -> Result<Vec<Timer>, InfraError> {
        self.query_timers(
            &format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND synced = 0 AND stopped_at IS NOT NULL
                 ORDER BY started_at, id"
            ),
            params![user.employee_id.trim()],
        )
    }

    fn interruptions(&self, user: &UserSession) -> Result<Vec<Timer>, InfraError> {
        self.query_timers(
            &format!(
                "SELECT {TIMER_COLUMNS} FROM timers
                 WHERE employee_id = ?1 AND synced = 0 AND stopped_at IS NULL
                 ORDER BY started_at, id"
            ),
            params![user.employee_id.trim()],
        )
    }

    fn remove(&self, id: i64) -> Result<bool, InfraError> {
        let criteria = TimerCriteria {
            id: Some(id),
            employee_id: None,
            synced: Some(false),
        };
        Ok(self.delete(&criteria)? > 0)
    }
}

pub(crate) fn load_timer(connection: &Connection, id: i64) -> Result<Option<Timer>, InfraError> {
    let row = connection
        .query_row(
            &format!("SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1"),
            params![id],
            TimerRow::from_row,
        )
        .optional()?;
    row.map(TimerRow::into_timer).transpose()
}

#[derive(Debug)]
struct TimerRow {
    id: i64,
    employee_id: String,
    started_at: String,
    stopped_at: Option<String>,
    synced: bool,
    screenshots: String,
    created_at: String,
    project_id: Option<String>,
    task_id: Option<String>,
    timelog_id: Option<String>,
    timesheet_id: Option<String>,
    timeslot_id: Option<String>,
    organization_team_id: Option<String>,
    description: Option<String>,
    version: Option<String>,
    is_started_offline: bool,
    is_stopped_offline: bool,
}

impl TimerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            employee_id: row.get(1)?,
            started_at: row.get(2)?,
            stopped_at: row.get(3)?,
            synced: row.get(4)?,
            screenshots: row.get(5)?,
            created_at: row.get(6)?,
            project_id: row.get(7)?,
            task_id: row.get(8)?,
            timelog_id: row.get(9)?,
            timesheet_id: row.get(10)?,
            timeslot_id: row.get(11)?,
            organization_team_id: row.get(12)?,
            description: row.get(13)?,
            version: row.get(14)?,
            is_started_offline: row.get(15)?,
            is_stopped_offline: row.get(16)?,
        })
    }

    fn into_timer(self) -> Result<Timer, InfraError> {
        let id = self.id;
        let timestamp = |raw: &str| {
            parse_storage_timestamp(raw)
                .map_err(|error| InfraError::InvalidRecord(format!("timer {id}: {error}")))
        };
        Ok(Timer {
            id: Some(self.id),
            employee_id: self.employee_id,
            started_at: timestamp(&self.started_at)?,
            stopped_at: self.stopped_at.as_deref().map(timestamp).transpose()?,
            synced: self.synced,
            screenshots: serde_json::from_str(&self.screenshots)?,
            created_at: timestamp(&self.created_at)?,
            project_id: self.project_id,
            task_id: self.task_id,
            timelog_id: self.timelog_id,
            timesheet_id: self.timesheet_id,
            timeslot_id: self.timeslot_id,
            organization_team_id: self.organization_team_id,
            description: self.description,
            version: self.version,
            is_started_offline: self.is_started_offline,
            is_stopped_offline: self.is_stopped_offline,
        })
    }
}
