// src/store.rs
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::AppResult;
use crate::models::{
    DefinitionId, HolidayDefinition, HolidayInstance, NewAssignment, NewHolidayDefinition,
    NewHolidayInstance, NewPreference, NewSchedule, NewShiftTemplate, Preference, PreferenceId,
    Schedule, ScheduleAssignment, ScheduleId, ShiftTemplate, ShiftTemplateId, User, UserId,
};

/// Persistence boundary shared by every service.
///
/// The three `replace_*` operations are all-or-nothing: a reader never sees
/// the state between the delete and the insert.
#[async_trait]
pub trait Store: Send + Sync {
    // --- Users ---
    async fn list_users(&self) -> AppResult<Vec<User>>;
    async fn insert_user(&self, name: &str) -> AppResult<User>;

    // --- Holiday definitions ---
    async fn list_holiday_definitions(&self, include_deleted: bool)
        -> AppResult<Vec<HolidayDefinition>>;
    async fn get_holiday_definition(&self, id: DefinitionId)
        -> AppResult<Option<HolidayDefinition>>;
    async fn insert_holiday_definition(
        &self,
        definition: &NewHolidayDefinition,
    ) -> AppResult<HolidayDefinition>;
    async fn update_holiday_definition(&self, definition: &HolidayDefinition) -> AppResult<()>;

    // --- Holiday instances ---
    /// Drops every instance dated in `year` and inserts `instances`.
    async fn replace_holiday_instances_for_year(
        &self,
        year: i32,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()>;
    /// Drops every instance of `definition_id` and inserts `instances`.
    async fn replace_holiday_instances_for_definition(
        &self,
        definition_id: DefinitionId,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()>;
    /// Instances dated within `from..=to`, ordered by date.
    async fn list_holiday_instances(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HolidayInstance>>;
    async fn holiday_instances_exist_for_year(&self, year: i32) -> AppResult<bool>;

    // --- Shift templates ---
    async fn list_shift_templates(&self, include_deleted: bool) -> AppResult<Vec<ShiftTemplate>>;
    async fn get_shift_template(&self, id: ShiftTemplateId) -> AppResult<Option<ShiftTemplate>>;
    async fn insert_shift_template(&self, template: &NewShiftTemplate)
        -> AppResult<ShiftTemplate>;
    async fn update_shift_template(&self, template: &ShiftTemplate) -> AppResult<()>;

    // --- Schedules ---
    /// Every schedule, archived ones included.
    async fn list_schedules(&self) -> AppResult<Vec<Schedule>>;
    async fn get_schedule(&self, id: ScheduleId) -> AppResult<Option<Schedule>>;
    async fn insert_schedule(
        &self,
        schedule: &NewSchedule,
        shift_template_ids: &[ShiftTemplateId],
    ) -> AppResult<Schedule>;
    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()>;
    /// Templates attached to the schedule, ordered by id.
    async fn schedule_shift_templates(&self, schedule_id: ScheduleId)
        -> AppResult<Vec<ShiftTemplate>>;

    // --- Assignments ---
    async fn list_assignments(&self, schedule_id: ScheduleId)
        -> AppResult<Vec<ScheduleAssignment>>;
    async fn replace_assignments(
        &self,
        schedule_id: ScheduleId,
        rows: &[NewAssignment],
    ) -> AppResult<()>;

    // --- Preferences ---
    /// Preferences of one worker, or of everyone when `user_id` is `None`.
    /// Soft-deleted rows are included.
    async fn list_preferences(&self, user_id: Option<UserId>) -> AppResult<Vec<Preference>>;
    async fn get_preference(&self, id: PreferenceId) -> AppResult<Option<Preference>>;
    async fn insert_preference(&self, preference: &NewPreference) -> AppResult<Preference>;
    async fn update_preference(&self, preference: &Preference) -> AppResult<()>;
}

/// First and last day of a calendar year.
pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
    Some((
        NaiveDate::from_ymd_opt(year, 1, 1)?,
        NaiveDate::from_ymd_opt(year, 12, 31)?,
    ))
}
