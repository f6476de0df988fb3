use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const SUNDAY_FIRST_LOCALES: [&str; 9] = ["en-us", "en-ca", "ja", "ko", "zh-tw", "pt-br", "he", "hi", "en-ph"];
const SATURDAY_FIRST_LOCALES: [&str; 3] = ["ar", "fa", "ps"];

/// Organization time settings as delivered by the organization config source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationTimeConfig {
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub start_week_on: Option<String>,
    #[serde(default = "default_locale")]
    pub locale: String,
}

impl Default for OrganizationTimeConfig {
    fn default() -> Self {
        Self {
            organization_id: None,
            timezone: None,
            utc_offset_minutes: 0,
            start_week_on: None,
            locale: default_locale(),
        }
    }
}

fn default_locale() -> String {
    "en".to_string()
}

/// Closed `[start, end]` range in UTC.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, String> {
        if end < start {
            return Err("time window end must be >= start".to_string());
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn storage_bounds(&self) -> (String, String) {
        (storage_timestamp(self.start), storage_timestamp(self.end))
    }
}

/// Formats an instant the way the local store persists it. The fixed-width
/// layout keeps lexical and chronological order identical.
pub fn storage_timestamp(instant: DateTime<Utc>) -> String {
    instant.format(STORAGE_FORMAT).to_string()
}

pub fn parse_storage_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    NaiveDateTime::parse_from_str(raw, STORAGE_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|error| format!("invalid stored timestamp '{raw}': {error}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrganizationZone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl OrganizationZone {
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Named(tz) => instant.with_timezone(tz).date_naive(),
            Self::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    fn midnight_utc(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        match self {
            Self::Named(tz) => resolve_local(tz, midnight),
            Self::Fixed(offset) => resolve_local(offset, midnight),
        }
    }
}

// Zones that skip midnight on a DST change start the day at the first
// representable local instant.
fn resolve_local<Z: TimeZone>(zone: &Z, naive: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = naive;
    for _ in 0..=24 {
        match zone.from_local_datetime(&candidate) {
            LocalResult::Single(value) | LocalResult::Ambiguous(value, _) => {
                return value.with_timezone(&Utc);
            }
            LocalResult::None => candidate += Duration::hours(1),
        }
    }
    naive.and_utc()
}

/// Computes day and week boundaries in organization-local calendar terms.
///
/// The manager is an explicit value: callers own it and hand it to the
/// history queries and the sync engine alike, so both see the same windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindowManager {
    organization_id: Option<String>,
    zone: OrganizationZone,
    locale: String,
    start_week_on: Option<Weekday>,
    week_start: Weekday,
}

impl TimeWindowManager {
    pub fn new(config: &OrganizationTimeConfig) -> Result<Self, String> {
        let mut manager = Self {
            organization_id: None,
            zone: OrganizationZone::Fixed(FixedOffset::east_opt(0).ok_or("invalid utc offset")?),
            locale: default_locale(),
            start_week_on: None,
            week_start: Weekday::Mon,
        };
        manager.set_organization(config)?;
        Ok(manager)
    }

    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Switches the active organization and recomputes the week start.
    pub fn set_organization(&mut self, config: &OrganizationTimeConfig) -> Result<(), String> {
        let zone = match config
            .timezone
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(name) => OrganizationZone::Named(
                name.parse::<Tz>()
                    .map_err(|error| format!("invalid organization timezone '{name}': {error}"))?,
            ),
            None => OrganizationZone::Fixed(fixed_offset(config.utc_offset_minutes)?),
        };
        let start_week_on = config
            .start_week_on
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(parse_week_day)
            .transpose()?;

        self.organization_id = config.organization_id.clone();
        self.zone = zone;
        self.locale = config.locale.trim().to_string();
        self.start_week_on = start_week_on;
        self.week_start = start_week_on.unwrap_or_else(|| locale_week_start(&self.locale));
        Ok(())
    }

    /// Overrides the zone with a fixed offset, as when the user picks a UTC
    /// offset preference instead of the organization timezone.
    pub fn set_utc_offset(&mut self, minutes: i32) -> Result<(), String> {
        self.zone = OrganizationZone::Fixed(fixed_offset(minutes)?);
        Ok(())
    }

    pub fn set_locale(&mut self, locale: &str) {
        self.locale = locale.trim().to_string();
        if self.start_week_on.is_none() {
            self.week_start = locale_week_start(&self.locale);
        }
    }

    pub fn start_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.zone.midnight_utc(self.zone.local_date(now))
    }

    pub fn end_of_day(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let date = self.zone.local_date(now);
        let next = date.succ_opt().unwrap_or(date);
        self.zone.midnight_utc(next) - Duration::milliseconds(1)
    }

    pub fn start_of_week(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.zone.midnight_utc(self.week_first_date(now))
    }

    pub fn end_of_week(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let next = self.week_first_date(now) + Duration::days(7);
        self.zone.midnight_utc(next) - Duration::milliseconds(1)
    }

    pub fn today(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: self.start_of_day(now),
            end: self.end_of_day(now),
        }
    }

    pub fn current_week(&self, now: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: self.start_of_week(now),
            end: self.end_of_week(now),
        }
    }

    /// The current week extended backwards by `lookback_weeks` full weeks.
    pub fn sync_window(&self, now: DateTime<Utc>, lookback_weeks: u32) -> TimeWindow {
        let first = self.week_first_date(now) - Duration::weeks(i64::from(lookback_weeks));
        TimeWindow {
            start: self.zone.midnight_utc(first),
            end: self.end_of_week(now),
        }
    }

    fn week_first_date(&self, now: DateTime<Utc>) -> NaiveDate {
        let date = self.zone.local_date(now);
        let back = (7 + date.weekday().num_days_from_monday() - self.week_start.num_days_from_monday()) % 7;
        date - Duration::days(i64::from(back))
    }
}

fn fixed_offset(minutes: i32) -> Result<FixedOffset, String> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| format!("invalid utc offset: {minutes} minutes"))
}

pub fn parse_week_day(raw: &str) -> Result<Weekday, String> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "MONDAY" => Ok(Weekday::Mon),
        "TUESDAY" => Ok(Weekday::Tue),
        "WEDNESDAY" => Ok(Weekday::Wed),
        "THURSDAY" => Ok(Weekday::Thu),
        "FRIDAY" => Ok(Weekday::Fri),
        "SATURDAY" => Ok(Weekday::Sat),
        "SUNDAY" => Ok(Weekday::Sun),
        other => Err(format!("invalid startWeekOn value '{other}'")),
    }
}

fn locale_week_start(locale: &str) -> Weekday {
    let locale = locale.trim().replace('_', "-").to_ascii_lowercase();
    let matches = |tag: &&str| locale == **tag || locale.starts_with(&format!("{tag}-"));
    if SUNDAY_FIRST_LOCALES.iter().any(matches) {
        Weekday::Sun
    } else if SATURDAY_FIRST_LOCALES.iter().any(matches) {
        Weekday::Sat
    } else {
        Weekday::Mon
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn config(timezone: Option<&str>, offset: i32, start_week_on: Option<&str>) -> OrganizationTimeConfig {
        OrganizationTimeConfig {
            organization_id: Some("org-1".to_string()),
            timezone: timezone.map(ToOwned::to_owned),
            utc_offset_minutes: offset,
            start_week_on: start_week_on.map(ToOwned::to_owned),
            locale: "en".to_string(),
        }
    }

    #[test]
    fn day_bounds_follow_fixed_offset() {
        let manager = TimeWindowManager::new(&config(None, 120, None)).expect("manager");
        let now = at("2026-02-16T23:30:00Z");

        assert_eq!(manager.start_of_day(now), at("2026-02-16T22:00:00Z"));
        assert_eq!(manager.end_of_day(now), at("2026-02-17T21:59:59.999Z"));
    }

    #[test]
    fn day_bounds_follow_named_timezone() {
        let manager = TimeWindowManager::new(&config(Some("Asia/Tokyo"), 0, None)).expect("manager");
        let now = at("2026-02-16T16:00:00Z");

        assert_eq!(manager.start_of_day(now), at("2026-02-16T15:00:00Z"));
        assert_eq!(manager.today(now).end, at("2026-02-17T14:59:59.999Z"));
    }

    #[test]
    fn dst_day_is_twenty_three_hours() {
        let manager =
            TimeWindowManager::new(&config(Some("Europe/Berlin"), 0, None)).expect("manager");
        let window = manager.today(at("2026-03-29T12:00:00Z"));
        assert_eq!(window.start, at("2026-03-28T23:00:00Z"));
        assert_eq!(window.end, at("2026-03-29T21:59:59.999Z"));
    }

    #[test]
    fn week_start_follows_organization_setting() {
        // 2026-02-18 is a Wednesday.
        let now = at("2026-02-18T12:00:00Z");
        let monday = TimeWindowManager::new(&config(None, 0, Some("MONDAY"))).expect("manager");
        assert_eq!(monday.start_of_week(now), at("2026-02-16T00:00:00Z"));
        assert_eq!(monday.end_of_week(now), at("2026-02-22T23:59:59.999Z"));

        let mut manager = monday.clone();
        manager
            .set_organization(&config(None, 0, Some("sunday")))
            .expect("switch organization");
        assert_eq!(manager.week_start(), Weekday::Sun);
        assert_eq!(manager.start_of_week(now), at("2026-02-15T00:00:00Z"));
    }

    #[test]
    fn week_start_falls_back_to_locale() {
        let mut organization = config(None, 0, None);
        organization.locale = "en_US".to_string();
        let mut manager = TimeWindowManager::new(&organization).expect("manager");
        assert_eq!(manager.week_start(), Weekday::Sun);

        manager.set_locale("de-DE");
        assert_eq!(manager.week_start(), Weekday::Mon);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(TimeWindowManager::new(&config(Some("Mars/Olympus"), 0, None)).is_err());
        assert!(TimeWindowManager::new(&config(None, 0, Some("FUNDAY"))).is_err());
        assert!(TimeWindowManager::new(&config(None, 24 * 60, None)).is_err());
    }

    #[test]
    fn utc_offset_override_moves_the_day() {
        let mut manager = TimeWindowManager::new(&config(None, 0, None)).expect("manager");
        manager.set_utc_offset(-300).expect("offset");
        let now = at("2026-02-16T03:00:00Z");
        assert_eq!(manager.start_of_day(now), at("2026-02-15T05:00:00Z"));
    }

    #[test]
    fn sync_window_extends_back_whole_weeks() {
        let manager = TimeWindowManager::new(&config(None, 0, Some("MONDAY"))).expect("manager");
        let window = manager.sync_window(at("2026-02-18T12:00:00Z"), 2);
        assert_eq!(window.start, at("2026-02-02T00:00:00Z"));
        assert_eq!(window.end, at("2026-02-22T23:59:59.999Z"));
        assert!(window.contains(at("2026-02-02T00:00:00Z")));
    }

    #[test]
    fn storage_format_round_trips_and_sorts() {
        let earlier = at("2026-02-16T09:00:00.250Z");
        let later = at("2026-02-16T10:00:00Z");
        let raw = storage_timestamp(earlier);
        assert_eq!(raw, "2026-02-16 09:00:00.250");
        assert_eq!(parse_storage_timestamp(&raw).expect("parse"), earlier);
        assert!(raw < storage_timestamp(later));
    }

    proptest! {
        #[test]
        fn identical_state_yields_identical_windows(
            seconds in 0i64..4_000_000_000,
            offset in -720i32..=840,
            day in prop_oneof![Just("MONDAY"), Just("SUNDAY"), Just("SATURDAY")],
        ) {
            let now = DateTime::<Utc>::from_timestamp(seconds, 0).expect("timestamp");
            let first = TimeWindowManager::new(&config(None, offset, Some(day))).expect("manager");
            let second = TimeWindowManager::new(&config(None, offset, Some(day))).expect("manager");

            prop_assert_eq!(storage_timestamp(first.start_of_day(now)), storage_timestamp(second.start_of_day(now)));
            prop_assert_eq!(storage_timestamp(first.end_of_day(now)), storage_timestamp(second.end_of_day(now)));
            prop_assert!(first.today(now).contains(now));
            prop_assert!(first.current_week(now).contains(now));
        }
    }
}
