// src/schedule_service.rs
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::{AppError, AppResult, FieldError};
use crate::export::{ExportBundle, ViewMode};
use crate::holiday_service::HolidayService;
use crate::models::{
    NewSchedule, Schedule, ScheduleAction, ScheduleId, ScheduleStatus, ShiftTemplate,
    ShiftTemplateId, UserId,
};
use crate::permissions::Actor;
use crate::schedule_grid::{
    build_edit_view, month_days, named_assignments, validate_assignments, AssignmentRow,
    GridContext, MonthDay, ScheduleEditView, SlotKey, SlotWorker,
};
use crate::store::Store;

const MAX_NAME_LENGTH: usize = 255;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub period_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub selected_shift_templates: Vec<ShiftTemplateId>,
}

/// Read-only schedule as shown to workers.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerScheduleView {
    pub schedule: Schedule,
    #[serde(rename = "shiftTemplates")]
    pub shift_templates: Vec<ShiftTemplate>,
    pub assignments: BTreeMap<SlotKey, Vec<SlotWorker>>,
    #[serde(rename = "monthDays")]
    pub month_days: Vec<MonthDay>,
    pub view_mode: ViewMode,
}

#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    holidays: HolidayService,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, holidays: HolidayService) -> Self {
        Self {
            store,
            clock,
            holidays,
        }
    }

    // --- Scheduler side ---

    /// Live schedules, or only archived ones. Newest month first.
    pub async fn list(&self, show_archived: bool) -> AppResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .store
            .list_schedules()
            .await?
            .into_iter()
            .filter(|schedule| schedule.deleted_at.is_some() == show_archived)
            .collect();
        sort_newest_first(&mut schedules);
        Ok(schedules)
    }

    pub async fn create(&self, actor: &Actor, input: ScheduleInput) -> AppResult<Schedule> {
        let (fields, template_ids) = self.validate(input).await?;

        // A new month needs its holidays before the grid is first opened.
        let year = fields.period_start_date.year();
        if self.holidays.ensure_year(year).await? {
            info!("Generated holiday instances for {} ahead of a new schedule", year);
        }

        let created = self.store.insert_schedule(&fields, &template_ids).await?;
        info!(
            "Schedule '{}' ({}, {}) created by {}",
            created.name, created.period_start_date, created.status, actor
        );
        Ok(created)
    }

    pub async fn edit_view(&self, id: ScheduleId) -> AppResult<ScheduleEditView> {
        let schedule = self.find_editable(id).await?;
        let templates = self.store.schedule_shift_templates(id).await?;
        let users = self.store.list_users().await?;
        let assignments = self.store.list_assignments(id).await?;
        let holidays = self
            .store
            .list_holiday_instances(schedule.period_start_date, schedule.period_end_date())
            .await?;
        let preferences = self.store.list_preferences(None).await?;
        Ok(build_edit_view(
            schedule,
            templates,
            users,
            &assignments,
            &holidays,
            &preferences,
        ))
    }

    /// Replaces the whole grid of a draft schedule. Returns the number of
    /// rows stored.
    pub async fn update_assignments(
        &self,
        actor: &Actor,
        id: ScheduleId,
        rows: &[AssignmentRow],
    ) -> AppResult<usize> {
        let schedule = self.find_editable(id).await?;
        let templates = self.store.schedule_shift_templates(id).await?;
        let known_users: HashSet<UserId> = self
            .store
            .list_users()
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();

        let context = GridContext {
            period_start: schedule.period_start_date,
            period_end: schedule.period_end_date(),
            templates: &templates,
            known_users: &known_users,
        };
        let accepted = validate_assignments(rows, &context).map_err(AppError::Validation)?;

        self.store.replace_assignments(id, &accepted).await?;
        info!(
            "Schedule '{}' assignments replaced by {} ({} row(s))",
            schedule.name,
            actor,
            accepted.len()
        );
        Ok(accepted.len())
    }

    pub async fn publish(&self, actor: &Actor, id: ScheduleId) -> AppResult<Schedule> {
        self.transition(actor, id, ScheduleAction::Publish).await
    }

    pub async fn unpublish(&self, actor: &Actor, id: ScheduleId) -> AppResult<Schedule> {
        self.transition(actor, id, ScheduleAction::Unpublish).await
    }

    /// Status flip and soft delete in one write.
    pub async fn archive(&self, actor: &Actor, id: ScheduleId) -> AppResult<Schedule> {
        self.transition(actor, id, ScheduleAction::Archive).await
    }

    /// Back to draft, soft delete cleared.
    pub async fn restore(&self, actor: &Actor, id: ScheduleId) -> AppResult<Schedule> {
        self.transition(actor, id, ScheduleAction::Restore).await
    }

    async fn transition(
        &self,
        actor: &Actor,
        id: ScheduleId,
        action: ScheduleAction,
    ) -> AppResult<Schedule> {
        let mut schedule = self.find(id).await?;
        schedule.status = schedule.status.apply(action)?;
        match action {
            ScheduleAction::Archive => schedule.deleted_at = Some(self.clock.now()),
            ScheduleAction::Restore => schedule.deleted_at = None,
            ScheduleAction::Publish | ScheduleAction::Unpublish => {}
        }
        self.store.update_schedule(&schedule).await?;
        info!(
            "Schedule '{}' {} by {} (now {})",
            schedule.name,
            past_tense(action),
            actor,
            schedule.status
        );
        Ok(schedule)
    }

    // --- Worker side ---

    pub async fn list_visible(&self) -> AppResult<Vec<Schedule>> {
        let mut schedules: Vec<Schedule> = self
            .store
            .list_schedules()
            .await?
            .into_iter()
            .filter(|schedule| schedule.status.is_visible_to_workers())
            .collect();
        sort_newest_first(&mut schedules);
        Ok(schedules)
    }

    /// `user` set means the `my` view: only that worker's slots are listed.
    pub async fn worker_view(
        &self,
        id: ScheduleId,
        user: Option<UserId>,
    ) -> AppResult<WorkerScheduleView> {
        let schedule = self.find_visible(id).await?;
        let shift_templates = self.store.schedule_shift_templates(id).await?;
        let users = self.store.list_users().await?;
        let assignments = self.store.list_assignments(id).await?;
        let holidays = self
            .store
            .list_holiday_instances(schedule.period_start_date, schedule.period_end_date())
            .await?;

        Ok(WorkerScheduleView {
            month_days: month_days(schedule.period_start_date, &holidays),
            assignments: named_assignments(&assignments, &users, user),
            view_mode: if user.is_some() {
                ViewMode::My
            } else {
                ViewMode::Full
            },
            shift_templates,
            schedule,
        })
    }

    pub async fn export_bundle(
        &self,
        id: ScheduleId,
        view_type: ViewMode,
        auth_user_id: Option<UserId>,
    ) -> AppResult<ExportBundle> {
        let only_user = match view_type {
            ViewMode::My => Some(auth_user_id.ok_or(AppError::Unauthenticated)?),
            ViewMode::Full => None,
        };
        let view = self.worker_view(id, only_user).await?;
        let users = self.store.list_users().await?;
        Ok(ExportBundle {
            schedule: view.schedule,
            shift_templates: view.shift_templates,
            users,
            assignments: view.assignments,
            month_days: view.month_days,
            view_type,
            auth_user_id,
        })
    }

    // --- Lookups ---

    async fn find(&self, id: ScheduleId) -> AppResult<Schedule> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or(AppError::not_found("Schedule", id))
    }

    async fn find_editable(&self, id: ScheduleId) -> AppResult<Schedule> {
        let schedule = self.find(id).await?;
        if !schedule.status.accepts_edits() {
            return Err(AppError::ScheduleNotEditable {
                id,
                status: schedule.status,
            });
        }
        Ok(schedule)
    }

    async fn find_visible(&self, id: ScheduleId) -> AppResult<Schedule> {
        let schedule = self.find(id).await?;
        if !schedule.status.is_visible_to_workers() {
            return Err(AppError::NotVisible(id));
        }
        Ok(schedule)
    }

    async fn validate(&self, input: ScheduleInput) -> AppResult<(NewSchedule, Vec<ShiftTemplateId>)> {
        let mut errors = Vec::new();

        let name = input.name.trim().to_string();
        if name.is_empty() {
            errors.push(FieldError::new("name", "The name field is required."));
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "name",
                format!("The name may not be greater than {} characters.", MAX_NAME_LENGTH),
            ));
        }

        if input.period_start_date.is_none() {
            errors.push(FieldError::new(
                "period_start_date",
                "The period_start_date field is required.",
            ));
        }

        let status = match input.status.as_deref().map(str::parse::<ScheduleStatus>) {
            None => {
                errors.push(FieldError::new("status", "The status field is required."));
                None
            }
            Some(Err(_)) => {
                errors.push(FieldError::new("status", "The selected status is invalid."));
                None
            }
            Some(Ok(ScheduleStatus::Archived)) => {
                errors.push(FieldError::new(
                    "status",
                    "A schedule cannot be created as archived.",
                ));
                None
            }
            Some(Ok(status)) => Some(status),
        };

        let existing: HashSet<ShiftTemplateId> = self
            .store
            .list_shift_templates(true)
            .await?
            .into_iter()
            .map(|template| template.id)
            .collect();
        let mut template_ids = Vec::new();
        for (index, template_id) in input.selected_shift_templates.iter().enumerate() {
            if !existing.contains(template_id) {
                errors.push(FieldError::new(
                    format!("selected_shift_templates.{}", index),
                    "The selected shift template does not exist.",
                ));
            } else if !template_ids.contains(template_id) {
                template_ids.push(*template_id);
            }
        }

        match (input.period_start_date, status) {
            (Some(period_start_date), Some(status)) if errors.is_empty() => Ok((
                NewSchedule {
                    name,
                    period_start_date,
                    status,
                },
                template_ids,
            )),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

fn sort_newest_first(schedules: &mut [Schedule]) {
    schedules.sort_by(|a, b| {
        Reverse(a.period_start_date)
            .cmp(&Reverse(b.period_start_date))
            .then_with(|| a.name.cmp(&b.name))
    });
}

fn past_tense(action: ScheduleAction) -> &'static str {
    match action {
        ScheduleAction::Publish => "published",
        ScheduleAction::Unpublish => "unpublished",
        ScheduleAction::Archive => "archived",
        ScheduleAction::Restore => "restored",
    }
}
