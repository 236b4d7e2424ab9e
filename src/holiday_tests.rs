// src/holiday_tests.rs

#[cfg(test)]
mod tests {
    use crate::clock::FixedClock;
    use crate::error::AppError;
    use crate::holiday_service::{HolidayInput, HolidayService};
    use crate::memory_store::MemoryStore;
    use crate::models::NewHolidayDefinition;
    use crate::permissions::Actor;
    use crate::store::Store;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn input(value: serde_json::Value) -> HolidayInput {
        serde_json::from_value(value).unwrap()
    }

    fn setup() -> (HolidayService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(FixedClock::on_date(date(2025, 6, 1)));
        (HolidayService::new(store.clone(), clock), store)
    }

    async fn dates_of(store: &MemoryStore, definition_id: i64) -> Vec<NaiveDate> {
        store
            .list_holiday_instances(date(2000, 1, 1), date(2100, 12, 31))
            .await
            .unwrap()
            .into_iter()
            .filter(|instance| instance.holiday_definition_id == definition_id)
            .map(|instance| instance.date)
            .collect()
    }

    fn error_fields(error: &AppError) -> Vec<&str> {
        error
            .field_errors()
            .iter()
            .map(|field_error| field_error.field.as_str())
            .collect()
    }

    /// Definitions inserted straight into the store, bypassing sync.
    async fn seed_sample(store: &MemoryStore) -> (i64, i64, i64) {
        let new_year = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "New Year".to_string(),
                date: None,
                day_month: Some("01-01".parse().unwrap()),
                calculation_rule: None,
            })
            .await
            .unwrap();
        let easter_monday = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "Easter Monday".to_string(),
                date: None,
                day_month: None,
                calculation_rule: Some(
                    serde_json::from_value(
                        json!({"base_type": "event", "base_event": "easter", "offset": 1}),
                    )
                    .unwrap(),
                ),
            })
            .await
            .unwrap();
        let day_after = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "Day after Easter Monday".to_string(),
                date: None,
                day_month: None,
                calculation_rule: Some(
                    serde_json::from_value(json!({
                        "base_type": "holiday",
                        "base_holiday_id": easter_monday.id,
                        "offset": 1
                    }))
                    .unwrap(),
                ),
            })
            .await
            .unwrap();
        (new_year.id, easter_monday.id, day_after.id)
    }

    #[tokio::test]
    async fn sample_scenario_generates_three_instances() {
        let (service, store) = setup();
        seed_sample(&store).await;

        let written = service.generate_for_year(2025).await.unwrap();
        assert_eq!(written, 3);

        let instances = service.instances_for_year(2025).await.unwrap();
        let pairs: Vec<(String, NaiveDate)> = instances
            .into_iter()
            .map(|instance| (instance.name, instance.date))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("New Year".to_string(), date(2025, 1, 1)),
                ("Easter Monday".to_string(), date(2025, 4, 21)),
                ("Day after Easter Monday".to_string(), date(2025, 4, 22)),
            ]
        );
    }

    #[tokio::test]
    async fn generate_for_year_is_idempotent() {
        let (service, store) = setup();
        seed_sample(&store).await;

        service.generate_for_year(2025).await.unwrap();
        let first = service.instances_for_year(2025).await.unwrap();
        service.generate_for_year(2025).await.unwrap();
        let second = service.instances_for_year(2025).await.unwrap();

        let key = |list: &[crate::models::HolidayInstance]| -> Vec<(i64, NaiveDate, String)> {
            list.iter()
                .map(|i| (i.holiday_definition_id, i.date, i.name.clone()))
                .collect()
        };
        assert_eq!(first.len(), 3);
        assert_eq!(key(first.as_slice()), key(second.as_slice()));
    }

    #[tokio::test]
    async fn generate_skips_deleted_definitions_and_two_hop_chains() {
        let (service, store) = setup();
        let (new_year, easter_monday, day_after) = seed_sample(&store).await;
        let two_hops = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "Two days after Easter Monday".to_string(),
                date: None,
                day_month: None,
                calculation_rule: Some(
                    serde_json::from_value(json!({
                        "base_type": "holiday",
                        "base_holiday_id": day_after,
                        "offset": 1
                    }))
                    .unwrap(),
                ),
            })
            .await
            .unwrap();
        let mut deleted = store.get_holiday_definition(new_year).await.unwrap().unwrap();
        deleted.deleted_at = Some(chrono::Utc::now());
        store.update_holiday_definition(&deleted).await.unwrap();

        assert_eq!(service.generate_for_year(2025).await.unwrap(), 2);
        assert!(dates_of(&store, new_year).await.is_empty());
        assert!(dates_of(&store, two_hops.id).await.is_empty());
        assert_eq!(dates_of(&store, easter_monday).await, vec![date(2025, 4, 21)]);
    }

    #[tokio::test]
    async fn create_syncs_current_and_next_year() {
        let (service, store) = setup();
        let created = service
            .create(
                &Actor::User(1),
                input(json!({
                    "name": "Easter Monday",
                    "calculation_rule": {"base_type": "event", "base_event": "easter", "offset": 1}
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            dates_of(&store, created.id).await,
            vec![date(2025, 4, 21), date(2026, 4, 6)]
        );
    }

    #[tokio::test]
    async fn fixed_date_only_lands_in_its_year() {
        let (service, store) = setup();
        let created = service
            .create(
                &Actor::System,
                input(json!({"name": "Bridge day", "date": "2026-01-02"})),
            )
            .await
            .unwrap();
        assert_eq!(dates_of(&store, created.id).await, vec![date(2026, 1, 2)]);
    }

    #[tokio::test]
    async fn delete_and_restore_toggle_instances() {
        let (service, store) = setup();
        let actor = Actor::User(1);
        let created = service
            .create(&actor, input(json!({"name": "Labour Day", "day_month": "05-01"})))
            .await
            .unwrap();
        assert_eq!(dates_of(&store, created.id).await.len(), 2);

        service.delete(&actor, created.id).await.unwrap();
        assert!(dates_of(&store, created.id).await.is_empty());
        assert!(service.list(false).await.unwrap().is_empty());
        assert_eq!(service.list(true).await.unwrap().len(), 1);
        assert!(matches!(
            service.delete(&actor, created.id).await,
            Err(AppError::NotFound { .. })
        ));

        service.restore(&actor, created.id).await.unwrap();
        assert_eq!(
            dates_of(&store, created.id).await,
            vec![date(2025, 5, 1), date(2026, 5, 1)]
        );
        assert!(matches!(
            service.restore(&actor, created.id).await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn moving_a_base_moves_its_dependents() {
        let (service, store) = setup();
        let actor = Actor::User(1);
        let christmas = service
            .create(&actor, input(json!({"name": "Christmas", "day_month": "12-25"})))
            .await
            .unwrap();
        let boxing_day = service
            .create(
                &actor,
                input(json!({
                    "name": "Boxing Day",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": christmas.id, "offset": 1}
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            dates_of(&store, boxing_day.id).await,
            vec![date(2025, 12, 26), date(2026, 12, 26)]
        );

        service
            .update(&actor, christmas.id, input(json!({"name": "Christmas", "day_month": "12-24"})))
            .await
            .unwrap();
        assert_eq!(
            dates_of(&store, boxing_day.id).await,
            vec![date(2025, 12, 25), date(2026, 12, 25)]
        );
    }

    #[tokio::test]
    async fn rule_crossing_new_year_can_be_generated_repeatedly() {
        let (service, store) = setup();
        let actor = Actor::User(1);
        let sylwester = service
            .create(&actor, input(json!({"name": "Sylwester", "day_month": "12-31"})))
            .await
            .unwrap();
        let day_after = service
            .create(
                &actor,
                input(json!({
                    "name": "Day after Sylwester",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": sylwester.id, "offset": 1}
                })),
            )
            .await
            .unwrap();
        assert_eq!(
            dates_of(&store, day_after.id).await,
            vec![date(2025, 1, 1), date(2026, 1, 1)]
        );

        assert_eq!(service.generate_for_year(2025).await.unwrap(), 2);
        assert_eq!(service.generate_for_year(2025).await.unwrap(), 2);
        assert_eq!(service.generate_for_year(2026).await.unwrap(), 2);

        assert_eq!(
            dates_of(&store, day_after.id).await,
            vec![date(2025, 1, 1), date(2026, 1, 1)]
        );
        assert_eq!(
            dates_of(&store, sylwester.id).await,
            vec![date(2025, 12, 31), date(2026, 12, 31)]
        );
    }

    #[tokio::test]
    async fn archiving_a_base_clears_its_dependents() {
        let (service, store) = setup();
        let actor = Actor::User(1);
        let base = service
            .create(&actor, input(json!({"name": "Labour Day", "day_month": "05-01"})))
            .await
            .unwrap();
        let dependent = service
            .create(
                &actor,
                input(json!({
                    "name": "Day after Labour Day",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": base.id, "offset": 1}
                })),
            )
            .await
            .unwrap();

        service.delete(&actor, base.id).await.unwrap();
        assert!(dates_of(&store, dependent.id).await.is_empty());
        service.generate_for_year(2025).await.unwrap();
        assert!(dates_of(&store, dependent.id).await.is_empty());

        service.restore(&actor, base.id).await.unwrap();
        assert_eq!(
            dates_of(&store, dependent.id).await,
            vec![date(2025, 5, 2), date(2026, 5, 2)]
        );
    }

    #[tokio::test]
    async fn offsets_are_limited_to_half_a_year() {
        let (service, _) = setup();
        let actor = Actor::User(1);
        let too_far = service
            .create(
                &actor,
                input(json!({
                    "name": "Far away",
                    "calculation_rule": {"base_type": "event", "base_event": "easter", "offset": -184}
                })),
            )
            .await
            .unwrap_err();
        assert_eq!(error_fields(&too_far), vec!["calculation_rule.offset"]);

        service
            .create(
                &actor,
                input(json!({
                    "name": "Far but allowed",
                    "calculation_rule": {"base_type": "event", "base_event": "easter", "offset": 183}
                })),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ensure_year_generates_once() {
        let (service, store) = setup();
        seed_sample(&store).await;
        assert!(service.ensure_year(2027).await.unwrap());
        assert!(!service.ensure_year(2027).await.unwrap());
        assert_eq!(service.instances_for_year(2027).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn base_holidays_exclude_holiday_based_rules() {
        let (service, store) = setup();
        let (new_year, easter_monday, _) = seed_sample(&store).await;
        let bases: Vec<i64> = service
            .base_holidays()
            .await
            .unwrap()
            .into_iter()
            .map(|base| base.id)
            .collect();
        assert_eq!(bases, vec![easter_monday, new_year]);
    }

    #[tokio::test]
    async fn validation_requires_exactly_one_rule_shape() {
        let (service, _) = setup();
        let actor = Actor::User(1);

        let none = service
            .create(&actor, input(json!({"name": "Empty"})))
            .await
            .unwrap_err();
        assert_eq!(error_fields(&none), vec!["date"]);

        let both = service
            .create(
                &actor,
                input(json!({"name": "Both", "date": "2025-05-01", "day_month": "05-01"})),
            )
            .await
            .unwrap_err();
        assert_eq!(error_fields(&both), vec!["date"]);
    }

    #[tokio::test]
    async fn validation_reports_field_errors() {
        let (service, _) = setup();
        let actor = Actor::User(1);

        let bad_day = service
            .create(&actor, input(json!({"name": "Bad", "day_month": "02-30"})))
            .await
            .unwrap_err();
        assert_eq!(error_fields(&bad_day), vec!["day_month"]);

        let bad_rule = service
            .create(
                &actor,
                input(json!({"name": "Bad", "calculation_rule": {"base_type": "moon"}})),
            )
            .await
            .unwrap_err();
        assert_eq!(error_fields(&bad_rule), vec!["calculation_rule"]);

        let long_name = "x".repeat(101);
        let too_long = service
            .create(&actor, input(json!({"name": long_name, "day_month": "01-01"})))
            .await
            .unwrap_err();
        assert_eq!(error_fields(&too_long), vec!["name"]);

        let unknown_base = service
            .create(
                &actor,
                input(json!({
                    "name": "Orphan",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": 404, "offset": 1}
                })),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error_fields(&unknown_base),
            vec!["calculation_rule.base_holiday_id"]
        );
    }

    #[tokio::test]
    async fn chains_and_self_references_are_rejected() {
        let (service, store) = setup();
        let actor = Actor::User(1);
        let (new_year, easter_monday, day_after) = seed_sample(&store).await;

        let chained = service
            .create(
                &actor,
                input(json!({
                    "name": "Two hops",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": day_after, "offset": 1}
                })),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error_fields(&chained),
            vec!["calculation_rule.base_holiday_id"]
        );

        let itself = service
            .update(
                &actor,
                new_year,
                input(json!({
                    "name": "New Year",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": new_year, "offset": 1}
                })),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error_fields(&itself),
            vec!["calculation_rule.base_holiday_id"]
        );

        // Easter Monday has a dependent, so it may not become holiday-based.
        let base_with_dependents = service
            .update(
                &actor,
                easter_monday,
                input(json!({
                    "name": "Easter Monday",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": new_year, "offset": 100}
                })),
            )
            .await
            .unwrap_err();
        assert_eq!(
            error_fields(&base_with_dependents),
            vec!["calculation_rule.base_holiday_id"]
        );
    }
}
