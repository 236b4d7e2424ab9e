// src/shift_templates.rs
use chrono::NaiveTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{shift_duration_hours, NewShiftTemplate, ShiftTemplate, ShiftTemplateId};
use crate::permissions::Actor;
use crate::store::Store;

const MAX_NAME_LENGTH: usize = 255;
const DURATION_TOLERANCE: Decimal = dec!(0.005);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShiftTemplateInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub time_from: String,
    #[serde(default)]
    pub time_to: String,
    /// Optional; when given it must agree with the times.
    #[serde(default)]
    pub duration_hours: Option<Decimal>,
    #[serde(default)]
    pub required_staff_count: Option<i64>,
}

#[derive(Clone)]
pub struct ShiftTemplateService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}

impl ShiftTemplateService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn list(&self, show_deleted: bool) -> AppResult<Vec<ShiftTemplate>> {
        let mut templates: Vec<ShiftTemplate> = self
            .store
            .list_shift_templates(true)
            .await?
            .into_iter()
            .filter(|template| template.is_deleted() == show_deleted)
            .collect();
        templates.sort_by(|a, b| a.time_from.cmp(&b.time_from).then(a.name.cmp(&b.name)));
        Ok(templates)
    }

    pub async fn create(&self, actor: &Actor, input: ShiftTemplateInput) -> AppResult<ShiftTemplate> {
        let fields = self.validate(&input, None).await?;
        let created = self.store.insert_shift_template(&fields).await?;
        info!(
            "Shift template '{}' ({} - {}, {}h) created by {}",
            created.name, created.time_from, created.time_to, created.duration_hours, actor
        );
        Ok(created)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: ShiftTemplateId,
        input: ShiftTemplateInput,
    ) -> AppResult<ShiftTemplate> {
        let mut template = self.find(id, false).await?;
        let fields = self.validate(&input, Some(id)).await?;
        template.name = fields.name;
        template.time_from = fields.time_from;
        template.time_to = fields.time_to;
        template.duration_hours = fields.duration_hours;
        template.required_staff_count = fields.required_staff_count;
        self.store.update_shift_template(&template).await?;
        info!("Shift template '{}' updated by {}", template.name, actor);
        Ok(template)
    }

    pub async fn delete(&self, actor: &Actor, id: ShiftTemplateId) -> AppResult<ShiftTemplate> {
        let mut template = self.find(id, false).await?;
        template.deleted_at = Some(self.clock.now());
        self.store.update_shift_template(&template).await?;
        info!("Shift template '{}' deleted by {}", template.name, actor);
        Ok(template)
    }

    pub async fn restore(&self, actor: &Actor, id: ShiftTemplateId) -> AppResult<ShiftTemplate> {
        let mut template = self.find(id, true).await?;
        template.deleted_at = None;
        self.store.update_shift_template(&template).await?;
        info!("Shift template '{}' restored by {}", template.name, actor);
        Ok(template)
    }

    async fn find(&self, id: ShiftTemplateId, deleted: bool) -> AppResult<ShiftTemplate> {
        self.store
            .get_shift_template(id)
            .await?
            .filter(|template| template.is_deleted() == deleted)
            .ok_or(AppError::not_found("Shift template", id))
    }

    async fn validate(
        &self,
        input: &ShiftTemplateInput,
        editing: Option<ShiftTemplateId>,
    ) -> AppResult<NewShiftTemplate> {
        let mut errors = Vec::new();

        let name = input.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "The name field is required."));
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "name",
                format!("The name may not be greater than {} characters.", MAX_NAME_LENGTH),
            ));
        } else {
            let taken = self
                .store
                .list_shift_templates(true)
                .await?
                .iter()
                .any(|existing| existing.name == name && Some(existing.id) != editing);
            if taken {
                errors.push(FieldError::new("name", "The name has already been taken."));
            }
        }

        let time_from = parse_time(&input.time_from);
        if time_from.is_none() {
            errors.push(FieldError::new("time_from", "The time_from must use the HH:MM format."));
        }
        let time_to = parse_time(&input.time_to);
        if time_to.is_none() {
            errors.push(FieldError::new("time_to", "The time_to must use the HH:MM format."));
        }

        let required_staff_count = match input.required_staff_count.unwrap_or(1) {
            count if count >= 1 => u32::try_from(count).ok(),
            _ => None,
        };
        if required_staff_count.is_none() {
            errors.push(FieldError::new(
                "required_staff_count",
                "The required staff count must be at least 1.",
            ));
        }

        let duration_hours = match (time_from, time_to) {
            (Some(from), Some(to)) => {
                let computed = shift_duration_hours(from, to);
                if let Some(submitted) = input.duration_hours {
                    if (submitted - computed).abs() > DURATION_TOLERANCE {
                        errors.push(FieldError::new(
                            "duration_hours",
                            format!(
                                "The duration does not match the shift times (expected {}).",
                                computed
                            ),
                        ));
                    }
                }
                Some(computed)
            }
            _ => None,
        };

        match (time_from, time_to, duration_hours, required_staff_count) {
            (Some(time_from), Some(time_to), Some(duration_hours), Some(required_staff_count))
                if errors.is_empty() =>
            {
                Ok(NewShiftTemplate {
                    name: name.to_string(),
                    time_from,
                    time_to,
                    duration_hours,
                    required_staff_count,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}
