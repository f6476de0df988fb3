use crate::domain::models::Timer;
use crate::domain::time_window::{storage_timestamp, TimeWindow};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::LocalStore;
use crate::infrastructure::timer_repository::load_timer;
use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

/// Atomic write paths for timer records.
///
/// Each operation runs in one immediate transaction; an error at any step
/// drops the transaction, which rolls back every statement it issued.
pub struct RecordTransactions<'a> {
    store: &'a LocalStore,
}

impl<'a> RecordTransactions<'a> {
    pub fn new(store: &'a LocalStore) -> Self {
        Self { store }
    }

    pub fn create(&self, timer: &Timer) -> Result<Timer, InfraError> {
        timer.validate().map_err(InfraError::InvalidRecord)?;
        let timer = normalized(timer);

        self.run(|tx| {
            let screenshots = serde_json::to_string(&timer.screenshots)?;
            let now = storage_timestamp(Utc::now());
            tx.execute(
                "INSERT INTO timers (
                   employee_id, started_at, stopped_at, duration, synced, screenshots,
                   created_at, updated_at, project_id, task_id, timelog_id, timesheet_id,
                   timeslot_id, organization_team_id, description, version,
                   is_started_offline, is_stopped_offline
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    timer.employee_id.trim(),
                    storage_timestamp(timer.started_at),
                    timer.stopped_at.map(storage_timestamp),
                    timer.duration_seconds(),
                    timer.synced,
                    screenshots,
                    storage_timestamp(timer.created_at),
                    now,
                    timer.project_id,
                    timer.task_id,
                    timer.timelog_id,
                    timer.timesheet_id,
                    timer.timeslot_id,
                    timer.organization_team_id,
                    timer.description,
                    timer.version,
                    timer.is_started_offline,
                    timer.is_stopped_offline,
                ],
            )?;
            let id = tx.last_insert_rowid();
            load_timer(tx, id)?.ok_or_else(|| InfraError::NotFound(format!("timer {id} after insert")))
        })
    }

    /// Full-record replace. `synced` never moves back to false: the stored
    /// flag is the maximum of the old and the incoming value.
    pub fn update(&self, id: i64, timer: &Timer) -> Result<Timer, InfraError> {
        timer.validate().map_err(InfraError::InvalidRecord)?;
        if let Some(timer_id) = timer.id {
            if timer_id != id {
                return Err(InfraError::InvalidRecord(format!(
                    "timer.id {timer_id} does not match update target {id}"
                )));
            }
        }
        let timer = normalized(timer);

        self.run(|tx| {
            let screenshots = serde_json::to_string(&timer.screenshots)?;
            let changed = tx.execute(
                "UPDATE timers SET
                   employee_id = ?2, started_at = ?3, stopped_at = ?4, duration = ?5,
                   synced = MAX(synced, ?6), screenshots = ?7, created_at = ?8, updated_at = ?9,
                   project_id = ?10, task_id = ?11, timelog_id = ?12, timesheet_id = ?13,
                   timeslot_id = ?14, organization_team_id = ?15, description = ?16, version = ?17,
                   is_started_offline = ?18, is_stopped_offline = ?19
                 WHERE id = ?1",
                params![
                    id,
                    timer.employee_id.trim(),
                    storage_timestamp(timer.started_at),
                    timer.stopped_at.map(storage_timestamp),
                    timer.duration_seconds(),
                    timer.synced,
                    screenshots,
                    storage_timestamp(timer.created_at),
                    storage_timestamp(Utc::now()),
                    timer.project_id,
                    timer.task_id,
                    timer.timelog_id,
                    timer.timesheet_id,
                    timer.timeslot_id,
                    timer.organization_team_id,
                    timer.description,
                    timer.version,
                    timer.is_started_offline,
                    timer.is_stopped_offline,
                ],
            )?;
            if changed == 0 {
                return Err(InfraError::NotFound(format!("timer {id}")));
            }
            load_timer(tx, id)?.ok_or_else(|| InfraError::NotFound(format!("timer {id}")))
        })
    }

    pub fn stop(&self, id: i64, stopped_at: DateTime<Utc>, offline: bool) -> Result<Timer, InfraError> {
        let stopped_at = stopped_at.trunc_subsecs(3);
        self.run(|tx| {
            let mut timer =
                load_timer(tx, id)?.ok_or_else(|| InfraError::NotFound(format!("timer {id}")))?;
            timer.stop(stopped_at, offline).map_err(InfraError::InvalidRecord)?;
            tx.execute(
                "UPDATE timers SET stopped_at = ?2, duration = ?3, is_stopped_offline = ?4, updated_at = ?5
                 WHERE id = ?1",
                params![
                    id,
                    storage_timestamp(stopped_at),
                    timer.duration_seconds(),
                    offline,
                    storage_timestamp(Utc::now()),
                ],
            )?;
            Ok(timer)
        })
    }

    /// Flips `synced` for every closed record inside `window`. With `ids`,
    /// only those records are eligible. Returns the number of rows that
    /// changed; rows already synced are left untouched.
    pub fn mark_synced(&self, window: &TimeWindow, ids: Option<&[i64]>) -> Result<usize, InfraError> {
        let (start, end) = window.storage_bounds();
        self.run(|tx| {
            let updated_at = storage_timestamp(Utc::now());
            let changed = match ids {
                None => tx.execute(
                    "UPDATE timers SET synced = 1, updated_at = ?3
                     WHERE synced = 0 AND stopped_at IS NOT NULL
                       AND started_at >= ?1 AND stopped_at <= ?2",
                    params![start, end, updated_at],
                )?,
                Some(ids) => {
                    let mut statement = tx.prepare(
                        "UPDATE timers SET synced = 1, updated_at = ?4
                         WHERE id = ?1 AND synced = 0 AND stopped_at IS NOT NULL
                           AND started_at >= ?2 AND stopped_at <= ?3",
                    )?;
                    let mut changed = 0;
                    for id in ids {
                        changed += statement.execute(params![id, start, end, updated_at])?;
                    }
                    changed
                }
            };
            Ok(changed)
        })
    }

    fn run<T, F>(&self, operation: F) -> Result<T, InfraError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, InfraError>,
    {
        self.store.with_connection(|connection: &mut Connection| {
            let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = operation(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }
}

// Stored timestamps carry millisecond precision.
fn normalized(timer: &Timer) -> Timer {
    let mut timer = timer.clone();
    timer.employee_id = timer.employee_id.trim().to_string();
    timer.started_at = timer.started_at.trunc_subsecs(3);
    timer.stopped_at = timer.stopped_at.map(|stopped_at| stopped_at.trunc_subsecs(3));
    timer.created_at = timer.created_at.trunc_subsecs(3);
    timer
}
