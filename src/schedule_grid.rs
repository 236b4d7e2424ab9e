// src/schedule_grid.rs
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::FieldError;
use crate::models::{
    end_of_month, HolidayInstance, NewAssignment, Preference, Schedule, ScheduleAssignment,
    ShiftTemplate, ShiftTemplateId, User, UserId,
};

// --- Slot identity ---

/// Identity of one cell of the grid: `"{shift_template_id}_{date}_{position}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub shift_template_id: ShiftTemplateId,
    pub date: NaiveDate,
    pub position: u32,
}

impl SlotKey {
    pub fn new(shift_template_id: ShiftTemplateId, date: NaiveDate, position: u32) -> Self {
        Self {
            shift_template_id,
            date,
            position,
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.shift_template_id,
            self.date.format("%Y-%m-%d"),
            self.position
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a slot key")]
pub struct InvalidSlotKey(String);

impl FromStr for SlotKey {
    type Err = InvalidSlotKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidSlotKey(s.to_string());
        let mut parts = s.splitn(3, '_');
        let shift_template_id = parts
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(invalid)?;
        let date = parts
            .next()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
            .ok_or_else(invalid)?;
        let position = parts
            .next()
            .and_then(|raw| raw.parse().ok())
            .ok_or_else(invalid)?;
        Ok(SlotKey::new(shift_template_id, date, position))
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

impl From<&ScheduleAssignment> for SlotKey {
    fn from(assignment: &ScheduleAssignment) -> Self {
        SlotKey::new(
            assignment.shift_template_id,
            assignment.assignment_date,
            assignment.position,
        )
    }
}

impl From<&NewAssignment> for SlotKey {
    fn from(assignment: &NewAssignment) -> Self {
        SlotKey::new(
            assignment.shift_template_id,
            assignment.assignment_date,
            assignment.position,
        )
    }
}

// --- Calendar ---

const POLISH_DAY_NAMES: [&str; 7] = [
    "poniedziałek",
    "wtorek",
    "środa",
    "czwartek",
    "piątek",
    "sobota",
    "niedziela",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthDay {
    pub date: NaiveDate,
    pub day_number: u32,
    pub day_name: &'static str,
    pub is_saturday: bool,
    pub is_sunday: bool,
    pub is_holiday: bool,
    pub holiday_name: Option<String>,
}

/// Every day from `period_start` to the end of its month, flagged with
/// weekend and holiday information.
pub fn month_days(period_start: NaiveDate, holidays: &[HolidayInstance]) -> Vec<MonthDay> {
    let mut names_by_date: BTreeMap<NaiveDate, Vec<&str>> = BTreeMap::new();
    for holiday in holidays {
        names_by_date
            .entry(holiday.date)
            .or_default()
            .push(holiday.name.as_str());
    }

    let end = end_of_month(period_start);
    period_start
        .iter_days()
        .take_while(|date| *date <= end)
        .map(|date| {
            let weekday = date.weekday();
            let holiday_name = names_by_date.get(&date).map(|names| names.join(", "));
            MonthDay {
                date,
                day_number: date.day(),
                day_name: POLISH_DAY_NAMES[weekday.num_days_from_monday() as usize],
                is_saturday: weekday == Weekday::Sat,
                is_sunday: weekday == Weekday::Sun,
                is_holiday: holiday_name.is_some(),
                holiday_name,
            }
        })
        .collect()
}

// --- Lookups ---

pub type AssignmentLookup = BTreeMap<SlotKey, Option<UserId>>;

pub fn assignment_lookup(assignments: &[ScheduleAssignment]) -> AssignmentLookup {
    assignments
        .iter()
        .map(|assignment| (SlotKey::from(assignment), assignment.user_id))
        .collect()
}

/// Worker id -> day -> declared availability.
pub type PreferenceMap = BTreeMap<UserId, BTreeMap<NaiveDate, bool>>;

/// Expands every live preference intersecting `from..=to` into single days,
/// clipped to that range. Overlapping windows overwrite in input order.
pub fn preference_map(preferences: &[Preference], from: NaiveDate, to: NaiveDate) -> PreferenceMap {
    let mut map = PreferenceMap::new();
    for preference in preferences
        .iter()
        .filter(|preference| !preference.is_deleted() && preference.overlaps(from, to))
    {
        let first = preference.date_from.max(from);
        let last = preference.date_to.min(to);
        let days = map.entry(preference.user_id).or_default();
        for day in first.iter_days().take_while(|day| *day <= last) {
            days.insert(day, preference.availability);
        }
    }
    map
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotWorker {
    pub user_id: UserId,
    pub user_name: String,
}

/// Filled slots with worker names, optionally restricted to one worker.
pub fn named_assignments(
    assignments: &[ScheduleAssignment],
    users: &[User],
    only_user: Option<UserId>,
) -> BTreeMap<SlotKey, Vec<SlotWorker>> {
    let names: HashMap<UserId, &str> = users
        .iter()
        .map(|user| (user.id, user.name.as_str()))
        .collect();

    let mut grouped: BTreeMap<SlotKey, Vec<SlotWorker>> = BTreeMap::new();
    for assignment in assignments {
        let Some(user_id) = assignment.user_id else {
            continue;
        };
        if only_user.is_some_and(|only| only != user_id) {
            continue;
        }
        grouped
            .entry(SlotKey::from(assignment))
            .or_default()
            .push(SlotWorker {
                user_id,
                user_name: names.get(&user_id).copied().unwrap_or("?").to_string(),
            });
    }
    grouped
}

// --- Edit view ---

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEditView {
    pub schedule: Schedule,
    pub assigned_shift_templates: Vec<ShiftTemplate>,
    pub users: Vec<User>,
    pub initial_assignments: AssignmentLookup,
    pub month_days: Vec<MonthDay>,
    pub preferences: PreferenceMap,
}

pub fn build_edit_view(
    schedule: Schedule,
    templates: Vec<ShiftTemplate>,
    users: Vec<User>,
    assignments: &[ScheduleAssignment],
    holidays: &[HolidayInstance],
    preferences: &[Preference],
) -> ScheduleEditView {
    let start = schedule.period_start_date;
    let end = schedule.period_end_date();
    ScheduleEditView {
        assigned_shift_templates: templates,
        users,
        initial_assignments: assignment_lookup(assignments),
        month_days: month_days(start, holidays),
        preferences: preference_map(preferences, start, end),
        schedule,
    }
}

// --- Save validation ---

/// One submitted grid row. Every key is optional on the wire; rows without
/// template, date or position are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRow {
    #[serde(default)]
    pub shift_template_id: Option<ShiftTemplateId>,
    #[serde(default)]
    pub assignment_date: Option<NaiveDate>,
    #[serde(default)]
    pub position: Option<i64>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

/// What a submitted grid is checked against.
pub struct GridContext<'a> {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub templates: &'a [ShiftTemplate],
    pub known_users: &'a HashSet<UserId>,
}

/// Checks a full replacement set of rows. On success returns the rows to
/// persist; on failure every offending row is reported and nothing should
/// be persisted.
pub fn validate_assignments(
    rows: &[AssignmentRow],
    context: &GridContext<'_>,
) -> Result<Vec<NewAssignment>, Vec<FieldError>> {
    let templates: HashMap<ShiftTemplateId, &ShiftTemplate> = context
        .templates
        .iter()
        .map(|template| (template.id, template))
        .collect();

    let mut errors = Vec::new();
    let mut accepted: Vec<(usize, NewAssignment)> = Vec::new();
    let mut by_worker: BTreeMap<(UserId, ShiftTemplateId, NaiveDate), Vec<usize>> =
        BTreeMap::new();

    for (index, row) in rows.iter().enumerate() {
        let (Some(shift_template_id), Some(assignment_date), Some(position)) =
            (row.shift_template_id, row.assignment_date, row.position)
        else {
            warn!("Skipping assignment row {} with missing keys: {:?}", index, row);
            continue;
        };
        if let Some(user_id) = row.user_id {
            by_worker
                .entry((user_id, shift_template_id, assignment_date))
                .or_default()
                .push(index);
        }

        let mut row_ok = true;
        match templates.get(&shift_template_id) {
            None => {
                errors.push(FieldError::new(
                    format!("assignments.{}.shift_template_id", index),
                    "The shift template is not part of this schedule.",
                ));
                row_ok = false;
            }
            Some(template) => {
                if position < 1 || position > i64::from(template.required_staff_count) {
                    errors.push(FieldError::new(
                        format!("assignments.{}.position", index),
                        format!(
                            "The position must be between 1 and {}.",
                            template.required_staff_count
                        ),
                    ));
                    row_ok = false;
                }
            }
        }
        if assignment_date < context.period_start || assignment_date > context.period_end {
            errors.push(FieldError::new(
                format!("assignments.{}.assignment_date", index),
                "The date is outside the schedule month.",
            ));
            row_ok = false;
        }
        if let Some(user_id) = row.user_id {
            if !context.known_users.contains(&user_id) {
                errors.push(FieldError::new(
                    format!("assignments.{}.user_id", index),
                    "The selected worker does not exist.",
                ));
                row_ok = false;
            }
        }

        if let (true, Ok(position)) = (row_ok, u32::try_from(position)) {
            accepted.push((
                index,
                NewAssignment {
                    shift_template_id,
                    assignment_date,
                    position,
                    user_id: row.user_id,
                },
            ));
        }
    }

    // The same cell submitted twice.
    let mut by_slot: BTreeMap<SlotKey, Vec<usize>> = BTreeMap::new();
    for (index, row) in &accepted {
        by_slot.entry(SlotKey::from(row)).or_default().push(*index);
    }
    for (slot, indices) in by_slot.iter().filter(|(_, indices)| indices.len() > 1) {
        for index in indices {
            errors.push(FieldError::new(
                format!("assignments.{}.position", index),
                format!("The slot {} is submitted more than once.", slot),
            ));
        }
    }

    // The same worker twice on one shift and day, whatever the positions.
    for ((_, _, date), indices) in by_worker.iter().filter(|(_, indices)| indices.len() > 1) {
        for index in indices {
            errors.push(FieldError::new(
                format!("assignments.{}.user_id", index),
                format!("The worker is already assigned to the same shift on {}.", date),
            ));
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    debug!("Accepted {} assignment row(s)", accepted.len());
    Ok(accepted.into_iter().map(|(_, row)| row).collect())
}
