use crate::domain::models::{Interval, UserSession};
use crate::domain::time_window::{TimeWindow, TimeWindowManager};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::timer_repository::TimerRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySummary {
    pub window: TimeWindow,
    pub intervals: Vec<Interval>,
    pub total_seconds: i64,
    pub pending: usize,
}

/// Day and week history views. Reads its windows from the same manager the
/// sync engine uses.
pub struct HistoryService<R: TimerRepository> {
    repository: Arc<R>,
    time_windows: Arc<RwLock<TimeWindowManager>>,
}

impl<R: TimerRepository> HistoryService<R> {
    pub fn new(repository: Arc<R>, time_windows: Arc<RwLock<TimeWindowManager>>) -> Self {
        Self {
            repository,
            time_windows,
        }
    }

    pub fn today(&self, user: &UserSession, now: DateTime<Utc>) -> Result<HistorySummary, InfraError> {
        let window = self.read_manager()?.today(now);
        self.summarize(window, user)
    }

    pub fn this_week(&self, user: &UserSession, now: DateTime<Utc>) -> Result<HistorySummary, InfraError> {
        let window = self.read_manager()?.current_week(now);
        self.summarize(window, user)
    }

    fn summarize(&self, window: TimeWindow, user: &UserSession) -> Result<HistorySummary, InfraError> {
        let timers = self.repository.find_in_window(&window, user)?;
        let total_seconds = timers.iter().map(|timer| timer.duration_seconds()).sum();
        let pending = timers.iter().filter(|timer| !timer.synced).count();
        Ok(HistorySummary {
            window,
            intervals: timers.iter().map(Interval::from).collect(),
            total_seconds,
            pending,
        })
    }

    fn read_manager(&self) -> Result<std::sync::RwLockReadGuard<'_, TimeWindowManager>, InfraError> {
        self.time_windows
            .read()
            .map_err(|error| InfraError::InvalidConfig(format!("time window lock poisoned: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Timer;
    use crate::domain::time_window::OrganizationTimeConfig;
    use crate::infrastructure::storage::LocalStore;
    use crate::infrastructure::timer_repository::SqliteTimerRepository;
    use chrono::Duration;
    use std::fs;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn views_follow_the_shared_window_manager() {
        let dir = std::env::temp_dir().join(format!("timesync-history-tests-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create temp dir");
        let store = LocalStore::open(dir.join("timesync.sqlite")).expect("open store");
        let repository = Arc::new(SqliteTimerRepository::new(Arc::new(store)));
        let user = UserSession {
            employee_id: "emp-1".to_string(),
            tenant_id: "tenant-1".to_string(),
            organization_id: None,
        };
        for (started_at, offline) in [("2026-02-15T10:00:00Z", true), ("2026-02-18T09:00:00Z", false)] {
            let started_at = at(started_at);
            let mut timer = Timer::start("emp-1", started_at, offline);
            timer.stop(started_at + Duration::minutes(30), offline).expect("stop");
            repository.save(&timer).expect("save");
        }
        let manager = TimeWindowManager::new(&OrganizationTimeConfig {
            start_week_on: Some("MONDAY".to_string()),
            ..OrganizationTimeConfig::default()
        })
        .expect("manager");
        let windows = Arc::new(RwLock::new(manager));
        let history = HistoryService::new(Arc::clone(&repository), Arc::clone(&windows));
        let now = at("2026-02-18T12:00:00Z");

        let today = history.today(&user, now).expect("today");
        assert_eq!(today.intervals.len(), 1);
        assert_eq!(today.total_seconds, 30 * 60);
        assert_eq!(today.pending, 0);

        assert_eq!(history.this_week(&user, now).expect("week").intervals.len(), 1);

        windows
            .write()
            .expect("write manager")
            .set_organization(&OrganizationTimeConfig {
                start_week_on: Some("SUNDAY".to_string()),
                ..OrganizationTimeConfig::default()
            })
            .expect("switch organization");
        let week = history.this_week(&user, now).expect("week");
        assert_eq!(week.window.start, at("2026-02-15T00:00:00Z"));
        assert_eq!(week.intervals.len(), 2);
        assert_eq!(week.pending, 1);

        let _ = fs::remove_dir_all(&dir);
    }
}
