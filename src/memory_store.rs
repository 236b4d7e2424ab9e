// src/memory_store.rs
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{AppError, AppResult};
use crate::models::{
    DefinitionId, HolidayDefinition, HolidayInstance, NewAssignment, NewHolidayDefinition,
    NewHolidayInstance, NewPreference, NewSchedule, NewShiftTemplate, Preference, PreferenceId,
    Schedule, ScheduleAssignment, ScheduleId, ShiftTemplate, ShiftTemplateId, User, UserId,
};
use crate::store::Store;

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    users: Vec<User>,
    holiday_definitions: Vec<HolidayDefinition>,
    holiday_instances: Vec<HolidayInstance>,
    shift_templates: Vec<ShiftTemplate>,
    schedules: Vec<Schedule>,
    schedule_shift_templates: Vec<(ScheduleId, ShiftTemplateId)>,
    assignments: Vec<ScheduleAssignment>,
    preferences: Vec<Preference>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn insert_instances(&mut self, instances: &[NewHolidayInstance]) {
        for instance in instances {
            let id = self.next_id();
            self.holiday_instances.push(HolidayInstance {
                id,
                holiday_definition_id: instance.holiday_definition_id,
                name: instance.name.clone(),
                date: instance.date,
            });
        }
    }
}

/// Process-local store. Every operation holds the single table lock for its
/// whole duration, which makes the replace operations atomic.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| AppError::Lock)
    }
}

fn unique_instances(instances: impl Iterator<Item = (NaiveDate, DefinitionId)>) -> AppResult<()> {
    let mut seen = HashSet::new();
    for key in instances {
        if !seen.insert(key) {
            return Err(AppError::Constraint(format!(
                "duplicate holiday instance for definition {} on {}",
                key.1, key.0
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_users(&self) -> AppResult<Vec<User>> {
        let tables = self.lock()?;
        let mut users = tables.users.clone();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn insert_user(&self, name: &str) -> AppResult<User> {
        let mut tables = self.lock()?;
        let user = User {
            id: tables.next_id(),
            name: name.to_string(),
        };
        tables.users.push(user.clone());
        Ok(user)
    }

    async fn list_holiday_definitions(
        &self,
        include_deleted: bool,
    ) -> AppResult<Vec<HolidayDefinition>> {
        let tables = self.lock()?;
        Ok(tables
            .holiday_definitions
            .iter()
            .filter(|definition| include_deleted || !definition.is_deleted())
            .cloned()
            .collect())
    }

    async fn get_holiday_definition(
        &self,
        id: DefinitionId,
    ) -> AppResult<Option<HolidayDefinition>> {
        let tables = self.lock()?;
        Ok(tables
            .holiday_definitions
            .iter()
            .find(|definition| definition.id == id)
            .cloned())
    }

    async fn insert_holiday_definition(
        &self,
        definition: &NewHolidayDefinition,
    ) -> AppResult<HolidayDefinition> {
        let mut tables = self.lock()?;
        let created = HolidayDefinition {
            id: tables.next_id(),
            name: definition.name.clone(),
            date: definition.date,
            day_month: definition.day_month,
            calculation_rule: definition.calculation_rule,
            deleted_at: None,
        };
        tables.holiday_definitions.push(created.clone());
        Ok(created)
    }

    async fn update_holiday_definition(&self, definition: &HolidayDefinition) -> AppResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .holiday_definitions
            .iter_mut()
            .find(|existing| existing.id == definition.id)
            .ok_or(AppError::not_found("Holiday", definition.id))?;
        *slot = definition.clone();
        Ok(())
    }

    async fn replace_holiday_instances_for_year(
        &self,
        year: i32,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()> {
        let mut tables = self.lock()?;
        let kept = tables
            .holiday_instances
            .iter()
            .filter(|instance| instance.date.year() != year)
            .map(|instance| (instance.date, instance.holiday_definition_id));
        let incoming = instances
            .iter()
            .map(|instance| (instance.date, instance.holiday_definition_id));
        unique_instances(kept.chain(incoming))?;
        tables
            .holiday_instances
            .retain(|instance| instance.date.year() != year);
        tables.insert_instances(instances);
        Ok(())
    }

    async fn replace_holiday_instances_for_definition(
        &self,
        definition_id: DefinitionId,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()> {
        let mut tables = self.lock()?;
        let kept = tables
            .holiday_instances
            .iter()
            .filter(|instance| instance.holiday_definition_id != definition_id)
            .map(|instance| (instance.date, instance.holiday_definition_id));
        let incoming = instances
            .iter()
            .map(|instance| (instance.date, instance.holiday_definition_id));
        unique_instances(kept.chain(incoming))?;

        tables
            .holiday_instances
            .retain(|instance| instance.holiday_definition_id != definition_id);
        tables.insert_instances(instances);
        Ok(())
    }

    async fn list_holiday_instances(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HolidayInstance>> {
        let tables = self.lock()?;
        let mut instances: Vec<HolidayInstance> = tables
            .holiday_instances
            .iter()
            .filter(|instance| instance.date >= from && instance.date <= to)
            .cloned()
            .collect();
        instances.sort_by_key(|instance| (instance.date, instance.holiday_definition_id));
        Ok(instances)
    }

    async fn holiday_instances_exist_for_year(&self, year: i32) -> AppResult<bool> {
        let tables = self.lock()?;
        Ok(tables
            .holiday_instances
            .iter()
            .any(|instance| instance.date.year() == year))
    }

    async fn list_shift_templates(&self, include_deleted: bool) -> AppResult<Vec<ShiftTemplate>> {
        let tables = self.lock()?;
        Ok(tables
            .shift_templates
            .iter()
            .filter(|template| include_deleted || !template.is_deleted())
            .cloned()
            .collect())
    }

    async fn get_shift_template(&self, id: ShiftTemplateId) -> AppResult<Option<ShiftTemplate>> {
        let tables = self.lock()?;
        Ok(tables
            .shift_templates
            .iter()
            .find(|template| template.id == id)
            .cloned())
    }

    async fn insert_shift_template(
        &self,
        template: &NewShiftTemplate,
    ) -> AppResult<ShiftTemplate> {
        let mut tables = self.lock()?;
        if tables
            .shift_templates
            .iter()
            .any(|existing| existing.name == template.name)
        {
            return Err(AppError::Constraint(format!(
                "shift template name '{}' already taken",
                template.name
            )));
        }
        let created = ShiftTemplate {
            id: tables.next_id(),
            name: template.name.clone(),
            time_from: template.time_from,
            time_to: template.time_to,
            duration_hours: template.duration_hours,
            required_staff_count: template.required_staff_count,
            deleted_at: None,
        };
        tables.shift_templates.push(created.clone());
        Ok(created)
    }

    async fn update_shift_template(&self, template: &ShiftTemplate) -> AppResult<()> {
        let mut tables = self.lock()?;
        if tables
            .shift_templates
            .iter()
            .any(|existing| existing.id != template.id && existing.name == template.name)
        {
            return Err(AppError::Constraint(format!(
                "shift template name '{}' already taken",
                template.name
            )));
        }
        let slot = tables
            .shift_templates
            .iter_mut()
            .find(|existing| existing.id == template.id)
            .ok_or(AppError::not_found("Shift template", template.id))?;
        *slot = template.clone();
        Ok(())
    }

    async fn list_schedules(&self) -> AppResult<Vec<Schedule>> {
        let tables = self.lock()?;
        Ok(tables.schedules.clone())
    }

    async fn get_schedule(&self, id: ScheduleId) -> AppResult<Option<Schedule>> {
        let tables = self.lock()?;
        Ok(tables
            .schedules
            .iter()
            .find(|schedule| schedule.id == id)
            .cloned())
    }

    async fn insert_schedule(
        &self,
        schedule: &NewSchedule,
        shift_template_ids: &[ShiftTemplateId],
    ) -> AppResult<Schedule> {
        let mut tables = self.lock()?;
        if let Some(missing) = shift_template_ids
            .iter()
            .find(|id| !tables.shift_templates.iter().any(|t| t.id == **id))
        {
            return Err(AppError::Constraint(format!(
                "shift template {} does not exist",
                missing
            )));
        }
        let created = Schedule {
            id: tables.next_id(),
            name: schedule.name.clone(),
            period_start_date: schedule.period_start_date,
            status: schedule.status,
            created_at: Utc::now(),
            deleted_at: None,
        };
        tables.schedules.push(created.clone());
        for template_id in shift_template_ids {
            if !tables
                .schedule_shift_templates
                .contains(&(created.id, *template_id))
            {
                tables
                    .schedule_shift_templates
                    .push((created.id, *template_id));
            }
        }
        Ok(created)
    }

    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .schedules
            .iter_mut()
            .find(|existing| existing.id == schedule.id)
            .ok_or(AppError::not_found("Schedule", schedule.id))?;
        *slot = schedule.clone();
        Ok(())
    }

    async fn schedule_shift_templates(
        &self,
        schedule_id: ScheduleId,
    ) -> AppResult<Vec<ShiftTemplate>> {
        let tables = self.lock()?;
        let attached: HashSet<ShiftTemplateId> = tables
            .schedule_shift_templates
            .iter()
            .filter(|(schedule, _)| *schedule == schedule_id)
            .map(|(_, template)| *template)
            .collect();
        let mut templates: Vec<ShiftTemplate> = tables
            .shift_templates
            .iter()
            .filter(|template| attached.contains(&template.id))
            .cloned()
            .collect();
        templates.sort_by_key(|template| template.id);
        Ok(templates)
    }

    async fn list_assignments(
        &self,
        schedule_id: ScheduleId,
    ) -> AppResult<Vec<ScheduleAssignment>> {
        let tables = self.lock()?;
        let mut assignments: Vec<ScheduleAssignment> = tables
            .assignments
            .iter()
            .filter(|assignment| assignment.schedule_id == schedule_id)
            .cloned()
            .collect();
        assignments.sort_by_key(|a| (a.assignment_date, a.shift_template_id, a.position));
        Ok(assignments)
    }

    async fn replace_assignments(
        &self,
        schedule_id: ScheduleId,
        rows: &[NewAssignment],
    ) -> AppResult<()> {
        let mut tables = self.lock()?;
        if !tables.schedules.iter().any(|s| s.id == schedule_id) {
            return Err(AppError::not_found("Schedule", schedule_id));
        }
        let mut slots = HashSet::new();
        for row in rows {
            if !slots.insert((row.shift_template_id, row.assignment_date, row.position)) {
                return Err(AppError::Constraint(format!(
                    "slot {}_{}_{} filled twice",
                    row.shift_template_id, row.assignment_date, row.position
                )));
            }
        }

        tables
            .assignments
            .retain(|assignment| assignment.schedule_id != schedule_id);
        for row in rows {
            let id = tables.next_id();
            tables.assignments.push(ScheduleAssignment {
                id,
                schedule_id,
                shift_template_id: row.shift_template_id,
                assignment_date: row.assignment_date,
                position: row.position,
                user_id: row.user_id,
            });
        }
        Ok(())
    }

    async fn list_preferences(&self, user_id: Option<UserId>) -> AppResult<Vec<Preference>> {
        let tables = self.lock()?;
        let mut preferences: Vec<Preference> = tables
            .preferences
            .iter()
            .filter(|preference| user_id.map_or(true, |user| preference.user_id == user))
            .cloned()
            .collect();
        preferences.sort_by_key(|preference| (preference.date_from, preference.id));
        Ok(preferences)
    }

    async fn get_preference(&self, id: PreferenceId) -> AppResult<Option<Preference>> {
        let tables = self.lock()?;
        Ok(tables
            .preferences
            .iter()
            .find(|preference| preference.id == id)
            .cloned())
    }

    async fn insert_preference(&self, preference: &NewPreference) -> AppResult<Preference> {
        let mut tables = self.lock()?;
        let created = Preference {
            id: tables.next_id(),
            user_id: preference.user_id,
            description: preference.description.clone(),
            date_from: preference.date_from,
            date_to: preference.date_to,
            availability: preference.availability,
            deleted_at: None,
        };
        tables.preferences.push(created.clone());
        Ok(created)
    }

    async fn update_preference(&self, preference: &Preference) -> AppResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .preferences
            .iter_mut()
            .find(|existing| existing.id == preference.id)
            .ok_or(AppError::not_found("Preference", preference.id))?;
        *slot = preference.clone();
        Ok(())
    }
}
