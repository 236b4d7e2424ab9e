// src/models.rs
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::AppError;

pub type UserId = i64;
pub type DefinitionId = i64;
pub type ShiftTemplateId = i64;
pub type ScheduleId = i64;
pub type PreferenceId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

// --- Holidays ---

static DAY_MONTH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(0[1-9]|1[0-2])-(0[1-9]|[12]\d|3[01])$").expect("day_month pattern is valid")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("The day_month field must use the MM-DD format and name a real calendar day, got '{0}'.")]
pub struct InvalidDayMonth(pub String);

/// A month and day recurring every year, written `MM-DD`.
///
/// `02-29` is accepted; it simply has no date in non-leap years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DayMonth {
    month: u32,
    day: u32,
}

impl DayMonth {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        // 2000 is a leap year, so every day that exists in some year passes.
        NaiveDate::from_ymd_opt(2000, month, day).map(|_| Self { month, day })
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn day(&self) -> u32 {
        self.day
    }

    pub fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }
}

impl FromStr for DayMonth {
    type Err = InvalidDayMonth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDayMonth(s.to_string());
        let captures = DAY_MONTH_PATTERN.captures(s).ok_or_else(invalid)?;
        let month = captures[1].parse().map_err(|_| invalid())?;
        let day = captures[2].parse().map_err(|_| invalid())?;
        DayMonth::new(month, day).ok_or_else(invalid)
    }
}

impl fmt::Display for DayMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}", self.month, self.day)
    }
}

impl Serialize for DayMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Movable feasts a calculated holiday can be anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseEvent {
    Easter,
}

impl fmt::Display for BaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseEvent::Easter => write!(f, "easter"),
        }
    }
}

/// Offset rule of a calculated holiday. Serialized as
/// `{"base_type":"event","base_event":"easter","offset":1}` or
/// `{"base_type":"holiday","base_holiday_id":7,"offset":1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "base_type", rename_all = "snake_case")]
pub enum CalculationRule {
    Event {
        base_event: BaseEvent,
        #[serde(default)]
        offset: i32,
    },
    Holiday {
        base_holiday_id: DefinitionId,
        #[serde(default)]
        offset: i32,
    },
}

impl CalculationRule {
    pub fn offset(&self) -> i32 {
        match self {
            CalculationRule::Event { offset, .. } | CalculationRule::Holiday { offset, .. } => {
                *offset
            }
        }
    }

    pub fn base_holiday_id(&self) -> Option<DefinitionId> {
        match self {
            CalculationRule::Holiday {
                base_holiday_id, ..
            } => Some(*base_holiday_id),
            CalculationRule::Event { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayDefinition {
    pub id: DefinitionId,
    pub name: String,
    pub date: Option<NaiveDate>,
    pub day_month: Option<DayMonth>,
    pub calculation_rule: Option<CalculationRule>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// The single rule shape a well-formed definition carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HolidayRule<'a> {
    Fixed(NaiveDate),
    Annual(DayMonth),
    Calculated(&'a CalculationRule),
}

impl HolidayDefinition {
    /// `None` unless exactly one of `date`, `day_month`, `calculation_rule` is set.
    pub fn rule(&self) -> Option<HolidayRule<'_>> {
        match (self.date, self.day_month, &self.calculation_rule) {
            (Some(date), None, None) => Some(HolidayRule::Fixed(date)),
            (None, Some(day_month), None) => Some(HolidayRule::Annual(day_month)),
            (None, None, Some(rule)) => Some(HolidayRule::Calculated(rule)),
            _ => None,
        }
    }

    pub fn base_holiday_id(&self) -> Option<DefinitionId> {
        self.calculation_rule
            .as_ref()
            .and_then(CalculationRule::base_holiday_id)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHolidayDefinition {
    pub name: String,
    pub date: Option<NaiveDate>,
    pub day_month: Option<DayMonth>,
    pub calculation_rule: Option<CalculationRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayInstance {
    pub id: i64,
    pub holiday_definition_id: DefinitionId,
    pub name: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewHolidayInstance {
    pub holiday_definition_id: DefinitionId,
    pub name: String,
    pub date: NaiveDate,
}

// --- Shift templates ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftTemplate {
    pub id: ShiftTemplateId,
    pub name: String,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
    pub duration_hours: Decimal,
    pub required_staff_count: u32,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ShiftTemplate {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewShiftTemplate {
    pub name: String,
    pub time_from: NaiveTime,
    pub time_to: NaiveTime,
    pub duration_hours: Decimal,
    pub required_staff_count: u32,
}

/// Length of a shift in hours, rounded to two places. A shift whose end is
/// not after its start runs past midnight.
pub fn shift_duration_hours(time_from: NaiveTime, time_to: NaiveTime) -> Decimal {
    let mut minutes = (time_to - time_from).num_minutes();
    if minutes <= 0 {
        minutes += 24 * 60;
    }
    (Decimal::from(minutes) / dec!(60)).round_dp(2)
}

// --- Schedules ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    Publish,
    Unpublish,
    Archive,
    Restore,
}

impl ScheduleStatus {
    /// Lifecycle: draft <-> published, either -> archived, archived -> draft.
    pub fn apply(self, action: ScheduleAction) -> Result<ScheduleStatus, AppError> {
        use ScheduleAction::*;
        use ScheduleStatus::*;
        match (self, action) {
            (Draft, Publish) => Ok(Published),
            (Published, Unpublish) => Ok(Draft),
            (Draft | Published, Archive) => Ok(Archived),
            (Archived, Restore) => Ok(Draft),
            (from, action) => Err(AppError::InvalidTransition { from, action }),
        }
    }

    pub fn accepts_edits(self) -> bool {
        self == ScheduleStatus::Draft
    }

    pub fn is_visible_to_workers(self) -> bool {
        matches!(self, ScheduleStatus::Published | ScheduleStatus::Archived)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Draft => "draft",
            ScheduleStatus::Published => "published",
            ScheduleStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ScheduleStatus::Draft),
            "published" => Ok(ScheduleStatus::Published),
            "archived" => Ok(ScheduleStatus::Archived),
            other => Err(format!("unknown schedule status '{}'", other)),
        }
    }
}

impl fmt::Display for ScheduleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleAction::Publish => "publish",
            ScheduleAction::Unpublish => "unpublish",
            ScheduleAction::Archive => "archive",
            ScheduleAction::Restore => "restore",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub name: String,
    pub period_start_date: NaiveDate,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Schedule {
    pub fn period_end_date(&self) -> NaiveDate {
        end_of_month(self.period_start_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSchedule {
    pub name: String,
    pub period_start_date: NaiveDate,
    pub status: ScheduleStatus,
}

pub fn end_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .unwrap_or(date)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleAssignment {
    pub id: i64,
    pub schedule_id: ScheduleId,
    pub shift_template_id: ShiftTemplateId,
    pub assignment_date: NaiveDate,
    pub position: u32,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAssignment {
    pub shift_template_id: ShiftTemplateId,
    pub assignment_date: NaiveDate,
    pub position: u32,
    pub user_id: Option<UserId>,
}

// --- Preferences ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preference {
    pub id: PreferenceId,
    pub user_id: UserId,
    pub description: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub availability: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Preference {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Inclusive range intersection.
    pub fn overlaps(&self, date_from: NaiveDate, date_to: NaiveDate) -> bool {
        self.date_from <= date_to && self.date_to >= date_from
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPreference {
    pub user_id: UserId,
    pub description: Option<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
    pub availability: bool,
}
