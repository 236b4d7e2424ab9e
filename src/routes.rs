// src/routes.rs
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Datelike;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::clock::Clock;
use crate::error::AppResult;
use crate::export::{render_csv, ViewMode};
use crate::holiday_service::{HolidayInput, HolidayService};
use crate::models::{DefinitionId, PreferenceId, ScheduleId, ShiftTemplateId};
use crate::permissions::{
    require, Actor, PermissionChecker, CONFIGURE_HOLIDAYS, EDIT_SCHEDULES, MANAGE_SHIFT_TEMPLATES,
};
use crate::preferences::{PreferenceInput, PreferenceService};
use crate::schedule_grid::AssignmentRow;
use crate::schedule_service::{ScheduleInput, ScheduleService};
use crate::shift_templates::{ShiftTemplateInput, ShiftTemplateService};
use crate::store::Store;

//=============================================================================
// Application State
//=============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub holidays: HolidayService,
    pub shift_templates: ShiftTemplateService,
    pub schedules: ScheduleService,
    pub preferences: PreferenceService,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        let holidays = HolidayService::new(store.clone(), clock.clone());
        Self {
            shift_templates: ShiftTemplateService::new(store.clone(), clock.clone()),
            schedules: ScheduleService::new(store.clone(), clock.clone(), holidays.clone()),
            preferences: PreferenceService::new(store.clone(), clock.clone()),
            holidays,
            store,
            clock,
            permissions,
        }
    }

    fn require(&self, actor: &Actor, permission: &str) -> AppResult<()> {
        require(self.permissions.as_ref(), actor, permission)
    }
}

//=============================================================================
// Query Parameters
//=============================================================================

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    show_archived: bool,
    #[serde(default)]
    show_deleted: bool,
}

#[derive(Debug, Default, Deserialize)]
struct YearQuery {
    year: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkerQuery {
    #[serde(default)]
    my: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExportQuery {
    #[serde(default)]
    view: ViewMode,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateAssignmentsRequest {
    #[serde(default)]
    assignments: Vec<AssignmentRow>,
}

//=============================================================================
// Router
//=============================================================================

pub fn router(state: AppState) -> Router {
    let holiday_routes = Router::new()
        .route("/", get(list_holidays).post(create_holiday))
        .route("/base", get(base_holidays))
        .route("/generate", post(generate_holidays))
        .route("/{id}", put(update_holiday).delete(delete_holiday))
        .route("/{id}/restore", post(restore_holiday));

    let shift_template_routes = Router::new()
        .route("/", get(list_shift_templates).post(create_shift_template))
        .route("/{id}", put(update_shift_template).delete(delete_shift_template))
        .route("/{id}/restore", post(restore_shift_template));

    let schedule_routes = Router::new()
        .route("/", get(list_schedules).post(create_schedule))
        .route("/{id}", put(update_schedule_assignments).delete(archive_schedule))
        .route("/{id}/edit", get(edit_schedule))
        .route("/{id}/publish", post(publish_schedule))
        .route("/{id}/unpublish", post(unpublish_schedule))
        .route("/{id}/restore", post(restore_schedule));

    let employee_routes = Router::new()
        .route("/", get(list_visible_schedules))
        .route("/{id}", get(show_worker_schedule))
        .route("/{id}/export", get(export_bundle))
        .route("/{id}/export.csv", get(export_csv));

    let preference_routes = Router::new()
        .route("/", get(list_preferences).post(create_preference))
        .route("/{id}", delete(delete_preference))
        .route("/{id}/restore", post(restore_preference));

    let api_router = Router::new()
        .nest("/holidays", holiday_routes)
        .route("/holiday-instances", get(list_holiday_instances))
        .nest("/shift-templates", shift_template_routes)
        .nest("/schedules", schedule_routes)
        .nest("/employee-schedules", employee_routes)
        .nest("/preferences", preference_routes)
        .route("/users", get(list_users));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

//=============================================================================
// Holidays
//=============================================================================

async fn list_holidays(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    Ok(Json(state.holidays.list(query.show_archived).await?))
}

async fn base_holidays(
    State(state): State<AppState>,
    actor: Actor,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    Ok(Json(state.holidays.base_holidays().await?))
}

async fn create_holiday(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<HolidayInput>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    let created = state.holidays.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_holiday(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<DefinitionId>,
    Json(input): Json<HolidayInput>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    Ok(Json(state.holidays.update(&actor, id, input).await?))
}

async fn delete_holiday(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<DefinitionId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    Ok(Json(state.holidays.delete(&actor, id).await?))
}

async fn restore_holiday(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<DefinitionId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    Ok(Json(state.holidays.restore(&actor, id).await?))
}

async fn generate_holidays(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<YearQuery>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, CONFIGURE_HOLIDAYS)?;
    let year = query.year.unwrap_or(state.clock.today().year() + 1);
    let generated = state.holidays.generate_for_year(year).await?;
    info!("Holiday generation for {} requested by {}", year, actor);
    Ok(Json(json!({ "year": year, "generated": generated })))
}

async fn list_holiday_instances(
    State(state): State<AppState>,
    _actor: Actor,
    Query(query): Query<YearQuery>,
) -> AppResult<impl IntoResponse> {
    let year = query.year.unwrap_or(state.clock.today().year());
    Ok(Json(state.holidays.instances_for_year(year).await?))
}

//=============================================================================
// Shift Templates
//=============================================================================

async fn list_shift_templates(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, MANAGE_SHIFT_TEMPLATES)?;
    Ok(Json(state.shift_templates.list(query.show_deleted).await?))
}

async fn create_shift_template(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<ShiftTemplateInput>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, MANAGE_SHIFT_TEMPLATES)?;
    let created = state.shift_templates.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update_shift_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ShiftTemplateId>,
    Json(input): Json<ShiftTemplateInput>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, MANAGE_SHIFT_TEMPLATES)?;
    Ok(Json(state.shift_templates.update(&actor, id, input).await?))
}

async fn delete_shift_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ShiftTemplateId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, MANAGE_SHIFT_TEMPLATES)?;
    Ok(Json(state.shift_templates.delete(&actor, id).await?))
}

async fn restore_shift_template(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ShiftTemplateId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, MANAGE_SHIFT_TEMPLATES)?;
    Ok(Json(state.shift_templates.restore(&actor, id).await?))
}

//=============================================================================
// Schedules (scheduler side)
//=============================================================================

async fn list_schedules(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.list(query.show_archived).await?))
}

async fn create_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<ScheduleInput>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    let created = state.schedules.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn edit_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.edit_view(id).await?))
}

async fn update_schedule_assignments(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
    Json(request): Json<UpdateAssignmentsRequest>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    let stored = state
        .schedules
        .update_assignments(&actor, id, &request.assignments)
        .await?;
    Ok(Json(json!({ "stored": stored })))
}

async fn archive_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.archive(&actor, id).await?))
}

async fn restore_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.restore(&actor, id).await?))
}

async fn publish_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.publish(&actor, id).await?))
}

async fn unpublish_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
) -> AppResult<impl IntoResponse> {
    state.require(&actor, EDIT_SCHEDULES)?;
    Ok(Json(state.schedules.unpublish(&actor, id).await?))
}

//=============================================================================
// Schedules (worker side)
//=============================================================================

async fn list_visible_schedules(
    State(state): State<AppState>,
    _actor: Actor,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.schedules.list_visible().await?))
}

async fn show_worker_schedule(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
    Query(query): Query<WorkerQuery>,
) -> AppResult<impl IntoResponse> {
    let user = if query.my {
        Some(actor.require_user()?)
    } else {
        None
    };
    Ok(Json(state.schedules.worker_view(id, user).await?))
}

async fn export_bundle(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(
        state
            .schedules
            .export_bundle(id, query.view, actor.user_id())
            .await?,
    ))
}

async fn export_csv(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<ScheduleId>,
    Query(query): Query<ExportQuery>,
) -> AppResult<impl IntoResponse> {
    let bundle = state
        .schedules
        .export_bundle(id, query.view, actor.user_id())
        .await?;
    let body = render_csv(&bundle)?;
    info!("Schedule {} exported as CSV for {}", id, actor);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", bundle.file_name("csv")),
            ),
        ],
        body,
    ))
}

//=============================================================================
// Preferences and users
//=============================================================================

async fn list_preferences(
    State(state): State<AppState>,
    actor: Actor,
    Query(query): Query<ListQuery>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.preferences.list(&actor, query.show_deleted).await?))
}

async fn create_preference(
    State(state): State<AppState>,
    actor: Actor,
    Json(input): Json<PreferenceInput>,
) -> AppResult<impl IntoResponse> {
    let created = state.preferences.create(&actor, input).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn delete_preference(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<PreferenceId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.preferences.delete(&actor, id).await?))
}

async fn restore_preference(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<PreferenceId>,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.preferences.restore(&actor, id).await?))
}

async fn list_users(
    State(state): State<AppState>,
    _actor: Actor,
) -> AppResult<impl IntoResponse> {
    Ok(Json(state.store.list_users().await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::memory_store::MemoryStore;
    use crate::permissions::StaticPermissions;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::NaiveDate;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    const ADMIN: i64 = 1;
    const WORKER: i64 = 2;

    fn app() -> Router {
        let mut permissions = StaticPermissions::default();
        for permission in [CONFIGURE_HOLIDAYS, EDIT_SCHEDULES, MANAGE_SHIFT_TEMPLATES] {
            permissions.grant(ADMIN, permission);
        }
        let state = AppState::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FixedClock::on_date(NaiveDate::from_ymd_opt(2025, 4, 15).unwrap())),
            Arc::new(permissions),
        );
        router(state)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Vec<u8>) {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            request = request.header("x-user-id", user.to_string());
        }
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<i64>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, user, body).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn health_needs_no_user() {
        let app = app();
        let (status, body) = send_json(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn api_requires_user_and_permission() {
        let app = app();
        let (status, _) = send_json(&app, "GET", "/api/holidays", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send_json(
            &app,
            "POST",
            "/api/holidays",
            Some(WORKER),
            Some(json!({"name": "New Year", "day_month": "01-01"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["message"].as_str().unwrap().contains(CONFIGURE_HOLIDAYS));
    }

    #[tokio::test]
    async fn holiday_validation_returns_field_errors() {
        let app = app();
        let (status, body) = send_json(
            &app,
            "POST",
            "/api/holidays",
            Some(ADMIN),
            Some(json!({"name": "Broken", "calculation_rule": {"base_type": "moon"}})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["message"], "The given data was invalid.");
        assert!(body["errors"]["calculation_rule"].is_array());
    }

    #[tokio::test]
    async fn holidays_flow_into_instances() {
        let app = app();
        let (status, _) = send_json(
            &app,
            "POST",
            "/api/holidays",
            Some(ADMIN),
            Some(json!({
                "name": "Poniedziałek Wielkanocny",
                "calculation_rule": {"base_type": "event", "base_event": "easter", "offset": 1}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, instances) =
            send_json(&app, "GET", "/api/holiday-instances?year=2025", Some(WORKER), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(instances[0]["date"], "2025-04-21");

        let (status, generated) =
            send_json(&app, "POST", "/api/holidays/generate?year=2027", Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(generated["generated"], 1);
    }

    #[tokio::test]
    async fn schedule_grid_round_trip() {
        let app = app();
        let (_, template) = send_json(
            &app,
            "POST",
            "/api/shift-templates",
            Some(ADMIN),
            Some(json!({"name": "Dniówka", "time_from": "07:00", "time_to": "19:00", "required_staff_count": 2})),
        )
        .await;
        let template_id = template["id"].as_i64().unwrap();
        let (status, schedule) = send_json(
            &app,
            "POST",
            "/api/schedules",
            Some(ADMIN),
            Some(json!({
                "name": "Maj",
                "period_start_date": "2025-05-01",
                "status": "draft",
                "selected_shift_templates": [template_id]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let schedule_id = schedule["id"].as_i64().unwrap();
        let uri = format!("/api/schedules/{}", schedule_id);

        let (status, body) = send_json(
            &app,
            "PUT",
            &uri,
            Some(ADMIN),
            Some(json!({"assignments": [
                {"shift_template_id": template_id, "assignment_date": "2025-05-05", "position": 1, "user_id": null},
                {"shift_template_id": template_id, "assignment_date": "2025-05-05", "position": 2, "user_id": null}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], 2);

        let (status, view) =
            send_json(&app, "GET", &format!("{}/edit", uri), Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["monthDays"].as_array().unwrap().len(), 31);
        assert!(view["initialAssignments"]
            .as_object()
            .unwrap()
            .contains_key(&format!("{}_2025-05-05_2", template_id)));

        let (status, _) =
            send_json(&app, "POST", &format!("{}/publish", uri), Some(ADMIN), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send_json(
            &app,
            "PUT",
            &uri,
            Some(ADMIN),
            Some(json!({"assignments": []})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, bytes) = send(
            &app,
            "GET",
            &format!("/api/employee-schedules/{}/export.csv?view=full", schedule_id),
            Some(WORKER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let csv = String::from_utf8(bytes).unwrap();
        assert_eq!(csv.lines().count(), 3);
    }

    #[tokio::test]
    async fn workers_cannot_open_drafts() {
        let app = app();
        let (_, schedule) = send_json(
            &app,
            "POST",
            "/api/schedules",
            Some(ADMIN),
            Some(json!({"name": "Czerwiec", "period_start_date": "2025-06-01", "status": "draft"})),
        )
        .await;
        let (status, _) = send_json(
            &app,
            "GET",
            &format!("/api/employee-schedules/{}", schedule["id"]),
            Some(WORKER),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn preferences_belong_to_the_caller() {
        let app = app();
        let (status, created) = send_json(
            &app,
            "POST",
            "/api/preferences",
            Some(WORKER),
            Some(json!({"date_from": "2025-07-01", "date_to": "2025-07-03", "availability": false})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (_, mine) = send_json(&app, "GET", "/api/preferences", Some(WORKER), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        let (_, theirs) = send_json(&app, "GET", "/api/preferences", Some(ADMIN), None).await;
        assert!(theirs.as_array().unwrap().is_empty());

        let (status, _) = send_json(
            &app,
            "DELETE",
            &format!("/api/preferences/{}", created["id"]),
            Some(ADMIN),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
