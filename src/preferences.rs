// src/preferences.rs
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::error::{AppError, AppResult, FieldError};
use crate::models::{NewPreference, Preference, PreferenceId, UserId};
use crate::permissions::Actor;
use crate::store::Store;

const MAX_DESCRIPTION_LENGTH: usize = 255;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferenceInput {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub availability: Option<bool>,
}

/// A worker's own availability windows. Advisory only: the schedule grid
/// shows them but never enforces them.
#[derive(Clone)]
pub struct PreferenceService {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
}

impl PreferenceService {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn list(&self, actor: &Actor, show_deleted: bool) -> AppResult<Vec<Preference>> {
        let user_id = actor.require_user()?;
        Ok(self
            .store
            .list_preferences(Some(user_id))
            .await?
            .into_iter()
            .filter(|preference| preference.is_deleted() == show_deleted)
            .collect())
    }

    pub async fn create(&self, actor: &Actor, input: PreferenceInput) -> AppResult<Preference> {
        let user_id = actor.require_user()?;
        let mut errors = Vec::new();

        let description = input
            .description
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());
        if description
            .as_ref()
            .is_some_and(|raw| raw.chars().count() > MAX_DESCRIPTION_LENGTH)
        {
            errors.push(FieldError::new(
                "description",
                format!(
                    "The description may not be greater than {} characters.",
                    MAX_DESCRIPTION_LENGTH
                ),
            ));
        }
        if input.date_from.is_none() {
            errors.push(FieldError::new("date_from", "The date_from field is required."));
        }
        if input.date_to.is_none() {
            errors.push(FieldError::new("date_to", "The date_to field is required."));
        }
        if input.availability.is_none() {
            errors.push(FieldError::new("availability", "The availability field is required."));
        }

        let (Some(date_from), Some(date_to), Some(availability)) =
            (input.date_from, input.date_to, input.availability)
        else {
            return Err(AppError::Validation(errors));
        };
        if date_to < date_from {
            errors.push(FieldError::new(
                "date_to",
                "The date_to must be a date after or equal to date_from.",
            ));
        } else if let Some(message) = self.overlap_message(user_id, date_from, date_to, None).await? {
            errors.push(FieldError::new("date_from", message));
        }
        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }

        let created = self
            .store
            .insert_preference(&NewPreference {
                user_id,
                description,
                date_from,
                date_to,
                availability,
            })
            .await?;
        info!(
            "Preference {} ({} - {}) created by {}",
            created.id, created.date_from, created.date_to, actor
        );
        Ok(created)
    }

    pub async fn delete(&self, actor: &Actor, id: PreferenceId) -> AppResult<Preference> {
        let mut preference = self.find_own(actor, id, false).await?;
        preference.deleted_at = Some(self.clock.now());
        self.store.update_preference(&preference).await?;
        info!("Preference {} deleted by {}", preference.id, actor);
        Ok(preference)
    }

    pub async fn restore(&self, actor: &Actor, id: PreferenceId) -> AppResult<Preference> {
        let mut preference = self.find_own(actor, id, true).await?;
        if let Some(message) = self
            .overlap_message(
                preference.user_id,
                preference.date_from,
                preference.date_to,
                Some(preference.id),
            )
            .await?
        {
            return Err(AppError::Validation(vec![FieldError::new("date_from", message)]));
        }
        preference.deleted_at = None;
        self.store.update_preference(&preference).await?;
        info!("Preference {} restored by {}", preference.id, actor);
        Ok(preference)
    }

    async fn find_own(&self, actor: &Actor, id: PreferenceId, deleted: bool) -> AppResult<Preference> {
        let user_id = actor.require_user()?;
        self.store
            .get_preference(id)
            .await?
            .filter(|preference| preference.user_id == user_id && preference.is_deleted() == deleted)
            .ok_or(AppError::not_found("Preference", id))
    }

    async fn overlap_message(
        &self,
        user_id: UserId,
        date_from: NaiveDate,
        date_to: NaiveDate,
        ignore: Option<PreferenceId>,
    ) -> AppResult<Option<String>> {
        let clash = self
            .store
            .list_preferences(Some(user_id))
            .await?
            .into_iter()
            .find(|existing| {
                !existing.is_deleted()
                    && Some(existing.id) != ignore
                    && existing.overlaps(date_from, date_to)
            });
        Ok(clash.map(|existing| {
            format!(
                "The dates overlap an existing preference ({} - {}).",
                existing.date_from, existing.date_to
            )
        }))
    }
}
