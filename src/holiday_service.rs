// src/holiday_service.rs
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{AppError, AppResult, FieldError};
use crate::holiday_calculator::{HolidayCalculator, Resolution, MAX_OFFSET_DAYS};
use crate::models::{
    CalculationRule, DayMonth, DefinitionId, HolidayDefinition, HolidayInstance,
    NewHolidayDefinition, NewHolidayInstance,
};
use crate::permissions::Actor;
use crate::store::{year_bounds, Store};

const MAX_NAME_LENGTH: usize = 100;

/// Submitted holiday definition. The rule stays raw JSON so that a malformed
/// rule becomes a field error instead of a rejected request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HolidayInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub day_month: Option<String>,
    #[serde(default)]
    pub calculation_rule: Option<Value>,
}

/// A definition another holiday can be computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseHoliday {
    pub id: DefinitionId,
    pub name: String,
}

#[derive(Clone)]
pub struct HolidayService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl HolidayService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    // --- Instance generation ---

    /// Regenerates every instance dated in `year` from the current
    /// definitions. Returns the number of instances written.
    pub async fn generate_for_year(&self, year: i32) -> AppResult<usize> {
        let definitions = self.store.list_holiday_definitions(false).await?;
        let mut calculator = HolidayCalculator::new();
        let resolution = calculator.compute_year(&definitions, year);
        log_unresolved(&definitions, &resolution);

        let instances = calculator.instances_dated_in(&definitions, year);
        self.store
            .replace_holiday_instances_for_year(year, &instances)
            .await?;
        info!(
            "Generated {} holiday instance(s) for {} from {} definition(s)",
            instances.len(),
            year,
            definitions.len()
        );
        Ok(instances.len())
    }

    /// Recomputes one definition's instances for the current and next year,
    /// then does the same for the definitions computed from it. Only live
    /// definitions take part, so dependents of an archived base lose their
    /// instances, as they do in `generate_for_year`.
    pub async fn sync_holiday_instances(&self, definition: &HolidayDefinition) -> AppResult<()> {
        let mut live = self.store.list_holiday_definitions(false).await?;
        live.retain(|existing| existing.id != definition.id);
        if !definition.is_deleted() {
            live.push(definition.clone());
        }

        let mut calculator = HolidayCalculator::new();
        self.sync_one(&mut calculator, &live, definition).await?;

        let dependents: Vec<&HolidayDefinition> = live
            .iter()
            .filter(|candidate| {
                candidate.id != definition.id
                    && candidate.base_holiday_id() == Some(definition.id)
            })
            .collect();
        for dependent in dependents {
            debug!(
                "Re-syncing '{}' which is computed from '{}'",
                dependent.name, definition.name
            );
            self.sync_one(&mut calculator, &live, dependent).await?;
        }
        Ok(())
    }

    async fn sync_one(
        &self,
        calculator: &mut HolidayCalculator,
        all: &[HolidayDefinition],
        definition: &HolidayDefinition,
    ) -> AppResult<usize> {
        if definition.is_deleted() {
            self.store
                .replace_holiday_instances_for_definition(definition.id, &[])
                .await?;
            debug!("Removed instances of deleted holiday '{}'", definition.name);
            return Ok(0);
        }

        let current_year = self.clock.today().year();
        let mut instances: Vec<NewHolidayInstance> = Vec::new();
        for year in [current_year, current_year + 1] {
            match calculator.compute_year(all, year).get(definition.id) {
                Some(Err(reason)) if reason.is_expected() => {
                    debug!("'{}' has no date in {}: {}", definition.name, year, reason)
                }
                Some(Err(reason)) => {
                    warn!("'{}' has no date in {}: {}", definition.name, year, reason)
                }
                _ => {}
            }
            instances.extend(
                calculator
                    .instances_dated_in(all, year)
                    .into_iter()
                    .filter(|instance| instance.holiday_definition_id == definition.id),
            );
        }

        self.store
            .replace_holiday_instances_for_definition(definition.id, &instances)
            .await?;
        debug!(
            "Synced {} instance(s) for holiday '{}'",
            instances.len(),
            definition.name
        );
        Ok(instances.len())
    }

    /// Generates `year` unless it already has instances. Returns whether a
    /// generation ran.
    pub async fn ensure_year(&self, year: i32) -> AppResult<bool> {
        if self.store.holiday_instances_exist_for_year(year).await? {
            return Ok(false);
        }
        info!("No holiday instances for {} yet, generating", year);
        self.generate_for_year(year).await?;
        Ok(true)
    }

    pub async fn instances_for_year(&self, year: i32) -> AppResult<Vec<HolidayInstance>> {
        let Some((first, last)) = year_bounds(year) else {
            return Ok(Vec::new());
        };
        self.store.list_holiday_instances(first, last).await
    }

    // --- Definition CRUD ---

    pub async fn list(&self, show_archived: bool) -> AppResult<Vec<HolidayDefinition>> {
        let mut definitions: Vec<HolidayDefinition> = self
            .store
            .list_holiday_definitions(true)
            .await?
            .into_iter()
            .filter(|definition| definition.is_deleted() == show_archived)
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(definitions)
    }

    pub async fn base_holidays(&self) -> AppResult<Vec<BaseHoliday>> {
        Ok(self
            .list(false)
            .await?
            .into_iter()
            .filter(|definition| definition.base_holiday_id().is_none())
            .map(|definition| BaseHoliday {
                id: definition.id,
                name: definition.name,
            })
            .collect())
    }

    pub async fn create(&self, actor: &Actor, input: HolidayInput) -> AppResult<HolidayDefinition> {
        let fields = self.validate(&input, None).await?;
        let created = self.store.insert_holiday_definition(&fields).await?;
        self.sync_holiday_instances(&created).await?;
        info!("Holiday '{}' created by {}", created.name, actor);
        Ok(created)
    }

    pub async fn update(
        &self,
        actor: &Actor,
        id: DefinitionId,
        input: HolidayInput,
    ) -> AppResult<HolidayDefinition> {
        let mut definition = self.find_active(id).await?;
        let fields = self.validate(&input, Some(id)).await?;
        definition.name = fields.name;
        definition.date = fields.date;
        definition.day_month = fields.day_month;
        definition.calculation_rule = fields.calculation_rule;

        self.store.update_holiday_definition(&definition).await?;
        self.sync_holiday_instances(&definition).await?;
        info!("Holiday '{}' updated by {}", definition.name, actor);
        Ok(definition)
    }

    pub async fn delete(&self, actor: &Actor, id: DefinitionId) -> AppResult<HolidayDefinition> {
        let mut definition = self.find_active(id).await?;
        definition.deleted_at = Some(self.clock.now());
        self.store.update_holiday_definition(&definition).await?;
        self.sync_holiday_instances(&definition).await?;
        info!("Holiday '{}' deleted by {}", definition.name, actor);
        Ok(definition)
    }

    pub async fn restore(&self, actor: &Actor, id: DefinitionId) -> AppResult<HolidayDefinition> {
        let mut definition = self
            .store
            .get_holiday_definition(id)
            .await?
            .filter(HolidayDefinition::is_deleted)
            .ok_or(AppError::not_found("Holiday", id))?;
        definition.deleted_at = None;
        self.store.update_holiday_definition(&definition).await?;
        self.sync_holiday_instances(&definition).await?;
        info!("Holiday '{}' restored by {}", definition.name, actor);
        Ok(definition)
    }

    async fn find_active(&self, id: DefinitionId) -> AppResult<HolidayDefinition> {
        self.store
            .get_holiday_definition(id)
            .await?
            .filter(|definition| !definition.is_deleted())
            .ok_or(AppError::not_found("Holiday", id))
    }

    async fn validate(
        &self,
        input: &HolidayInput,
        editing: Option<DefinitionId>,
    ) -> AppResult<NewHolidayDefinition> {
        let mut errors = Vec::new();

        let name = input.name.trim();
        if name.is_empty() {
            errors.push(FieldError::new("name", "The name field is required."));
        } else if name.chars().count() > MAX_NAME_LENGTH {
            errors.push(FieldError::new(
                "name",
                format!("The name may not be greater than {} characters.", MAX_NAME_LENGTH),
            ));
        }

        let raw_day_month = input
            .day_month
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty());
        let day_month = match raw_day_month.map(str::parse::<DayMonth>) {
            Some(Ok(day_month)) => Some(day_month),
            Some(Err(e)) => {
                errors.push(FieldError::new("day_month", e.to_string()));
                None
            }
            None => None,
        };

        let raw_rule = input.calculation_rule.as_ref().filter(|raw| !raw.is_null());
        let calculation_rule = match raw_rule.map(|raw| CalculationRule::deserialize(raw)) {
            Some(Ok(rule)) => Some(rule),
            Some(Err(e)) => {
                errors.push(FieldError::new(
                    "calculation_rule",
                    format!("The calculation rule is invalid: {}", e),
                ));
                None
            }
            None => None,
        };

        if let Some(rule) = calculation_rule {
            if rule.offset().unsigned_abs() > MAX_OFFSET_DAYS.unsigned_abs() {
                errors.push(FieldError::new(
                    "calculation_rule.offset",
                    format!(
                        "The offset must be between -{} and {} days.",
                        MAX_OFFSET_DAYS, MAX_OFFSET_DAYS
                    ),
                ));
            }
        }

        let shapes_set = [
            input.date.is_some(),
            raw_day_month.is_some(),
            raw_rule.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        if shapes_set == 0 {
            errors.push(FieldError::new(
                "date",
                "One of date, day_month or calculation_rule is required.",
            ));
        } else if shapes_set > 1 {
            errors.push(FieldError::new(
                "date",
                "Only one of date, day_month or calculation_rule may be set.",
            ));
        }

        if let Some(base_holiday_id) = calculation_rule.and_then(|rule| rule.base_holiday_id()) {
            if let Some(message) = self.check_base(base_holiday_id, editing).await? {
                errors.push(FieldError::new("calculation_rule.base_holiday_id", message));
            }
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(NewHolidayDefinition {
            name: name.to_string(),
            date: input.date,
            day_month,
            calculation_rule,
        })
    }

    /// Problem with using `base_holiday_id` as a base, if any.
    async fn check_base(
        &self,
        base_holiday_id: DefinitionId,
        editing: Option<DefinitionId>,
    ) -> AppResult<Option<String>> {
        if Some(base_holiday_id) == editing {
            return Ok(Some("A holiday cannot be computed from itself.".to_string()));
        }
        let message = match self.store.get_holiday_definition(base_holiday_id).await? {
            None => Some("The selected base holiday does not exist.".to_string()),
            Some(base) if base.is_deleted() => {
                Some("The selected base holiday is archived.".to_string())
            }
            Some(base) if base.base_holiday_id().is_some() => Some(
                "The base holiday must not itself be computed from another holiday.".to_string(),
            ),
            Some(_) => None,
        };
        if message.is_some() {
            return Ok(message);
        }

        if let Some(id) = editing {
            let has_dependents = self
                .store
                .list_holiday_definitions(false)
                .await?
                .iter()
                .any(|definition| definition.base_holiday_id() == Some(id));
            if has_dependents {
                return Ok(Some(
                    "Other holidays are computed from this one, so it cannot be computed from another holiday."
                        .to_string(),
                ));
            }
        }
        Ok(None)
    }
}

fn log_unresolved(definitions: &[HolidayDefinition], resolution: &Resolution) {
    for (id, reason) in resolution.unresolved() {
        let name = definitions
            .iter()
            .find(|definition| definition.id == id)
            .map_or("?", |definition| definition.name.as_str());
        if reason.is_expected() {
            debug!("Holiday '{}' ({}) skipped for {}: {}", name, id, resolution.year(), reason);
        } else {
            warn!("Holiday '{}' ({}) unresolved for {}: {}", name, id, resolution.year(), reason);
        }
    }
}
