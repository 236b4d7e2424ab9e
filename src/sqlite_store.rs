// src/sqlite_store.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{
    shift_duration_hours, CalculationRule, DayMonth, DefinitionId, HolidayDefinition,
    HolidayInstance, NewAssignment, NewHolidayDefinition, NewHolidayInstance, NewPreference,
    NewSchedule, NewShiftTemplate, Preference, PreferenceId, Schedule, ScheduleAssignment,
    ScheduleId, ScheduleStatus, ShiftTemplate, ShiftTemplateId, User, UserId,
};
use crate::store::{year_bounds, Store};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holidays (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        date TEXT NULL,
        day_month TEXT NULL,
        calculation_rule TEXT NULL,
        deleted_at TEXT NULL
    )",
    "CREATE TABLE IF NOT EXISTS holiday_instances (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        holiday_definition_id INTEGER NOT NULL REFERENCES holidays(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        date TEXT NOT NULL,
        UNIQUE (date, holiday_definition_id)
    )",
    "CREATE TABLE IF NOT EXISTS shift_templates (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        time_from TEXT NOT NULL,
        time_to TEXT NOT NULL,
        duration_hours TEXT NOT NULL,
        required_staff_count INTEGER NOT NULL DEFAULT 1,
        deleted_at TEXT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        period_start_date TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        created_at TEXT NOT NULL,
        deleted_at TEXT NULL
    )",
    "CREATE TABLE IF NOT EXISTS schedule_shift_templates (
        schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
        shift_template_id INTEGER NOT NULL REFERENCES shift_templates(id) ON DELETE CASCADE,
        PRIMARY KEY (schedule_id, shift_template_id)
    )",
    "CREATE TABLE IF NOT EXISTS schedule_assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        schedule_id INTEGER NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
        shift_template_id INTEGER NOT NULL REFERENCES shift_templates(id) ON DELETE CASCADE,
        user_id INTEGER NULL REFERENCES users(id) ON DELETE CASCADE,
        assignment_date TEXT NOT NULL,
        position INTEGER NOT NULL DEFAULT 1,
        UNIQUE (schedule_id, shift_template_id, assignment_date, position)
    )",
    "CREATE TABLE IF NOT EXISTS preferences (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        description TEXT NULL,
        date_from TEXT NOT NULL,
        date_to TEXT NOT NULL,
        availability INTEGER NOT NULL,
        deleted_at TEXT NULL
    )",
];

// =====================
// Row types
// =====================

#[derive(FromRow)]
struct HolidayRow {
    id: i64,
    name: String,
    date: Option<NaiveDate>,
    day_month: Option<String>,
    calculation_rule: Option<String>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<HolidayRow> for HolidayDefinition {
    fn from(row: HolidayRow) -> Self {
        // Unparseable stored values leave the definition malformed, which the
        // calculator reports instead of failing the whole listing.
        let day_month = row.day_month.and_then(|raw| match raw.parse::<DayMonth>() {
            Ok(day_month) => Some(day_month),
            Err(e) => {
                warn!("Holiday {} has an invalid day_month: {}", row.id, e);
                None
            }
        });
        let calculation_rule = row.calculation_rule.and_then(|raw| {
            match serde_json::from_str::<CalculationRule>(&raw) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!("Holiday {} has an invalid calculation_rule: {}", row.id, e);
                    None
                }
            }
        });
        HolidayDefinition {
            id: row.id,
            name: row.name,
            date: row.date,
            day_month,
            calculation_rule,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct ShiftTemplateRow {
    id: i64,
    name: String,
    time_from: NaiveTime,
    time_to: NaiveTime,
    duration_hours: String,
    required_staff_count: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<ShiftTemplateRow> for ShiftTemplate {
    fn from(row: ShiftTemplateRow) -> Self {
        let duration_hours = Decimal::from_str(&row.duration_hours).unwrap_or_else(|e| {
            warn!("Shift template {} has an invalid duration: {}", row.id, e);
            shift_duration_hours(row.time_from, row.time_to)
        });
        ShiftTemplate {
            id: row.id,
            name: row.name,
            time_from: row.time_from,
            time_to: row.time_to,
            duration_hours,
            required_staff_count: u32::try_from(row.required_staff_count).unwrap_or(1),
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    id: i64,
    name: String,
    period_start_date: NaiveDate,
    status: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = AppError;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let status = ScheduleStatus::from_str(&row.status).map_err(AppError::Constraint)?;
        Ok(Schedule {
            id: row.id,
            name: row.name,
            period_start_date: row.period_start_date,
            status,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(FromRow)]
struct AssignmentRow {
    id: i64,
    schedule_id: i64,
    shift_template_id: i64,
    assignment_date: NaiveDate,
    position: i64,
    user_id: Option<i64>,
}

impl From<AssignmentRow> for ScheduleAssignment {
    fn from(row: AssignmentRow) -> Self {
        ScheduleAssignment {
            id: row.id,
            schedule_id: row.schedule_id,
            shift_template_id: row.shift_template_id,
            assignment_date: row.assignment_date,
            position: u32::try_from(row.position).unwrap_or_default(),
            user_id: row.user_id,
        }
    }
}

#[derive(FromRow)]
struct PreferenceRow {
    id: i64,
    user_id: i64,
    description: Option<String>,
    date_from: NaiveDate,
    date_to: NaiveDate,
    availability: i64,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<PreferenceRow> for Preference {
    fn from(row: PreferenceRow) -> Self {
        Preference {
            id: row.id,
            user_id: row.user_id,
            description: row.description,
            date_from: row.date_from,
            date_to: row.date_to,
            availability: row.availability != 0,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    name: String,
}

// =====================
// Store
// =====================

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and its tables.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `sqlite::memory:` is its own database.
        let pool = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!("SQLite store ready at {}", database_url);
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn insert_instances<'c>(
        tx: &mut sqlx::Transaction<'c, sqlx::Sqlite>,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()> {
        for instance in instances {
            sqlx::query(
                "INSERT INTO holiday_instances (holiday_definition_id, name, date)
                 VALUES (?1, ?2, ?3)",
            )
            .bind(instance.holiday_definition_id)
            .bind(&instance.name)
            .bind(instance.date)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn rule_json(rule: &Option<CalculationRule>) -> AppResult<Option<String>> {
    Ok(rule.as_ref().map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl Store for SqliteStore {
    async fn list_users(&self) -> AppResult<Vec<User>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, UserRow>(
            "SELECT id, name FROM users ORDER BY name ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| User {
                id: row.id,
                name: row.name,
            })
            .collect())
    }

    async fn insert_user(&self, name: &str) -> AppResult<User> {
        let id = sqlx::query("INSERT INTO users (name) VALUES (?1)")
            .bind(name)
            .execute(&self.pool)
            .await?
            .last_insert_rowid();
        Ok(User {
            id,
            name: name.to_string(),
        })
    }

    async fn list_holiday_definitions(
        &self,
        include_deleted: bool,
    ) -> AppResult<Vec<HolidayDefinition>> {
        let sql = if include_deleted {
            "SELECT id, name, date, day_month, calculation_rule, deleted_at
             FROM holidays ORDER BY id ASC"
        } else {
            "SELECT id, name, date, day_month, calculation_rule, deleted_at
             FROM holidays WHERE deleted_at IS NULL ORDER BY id ASC"
        };
        let rows = sqlx::query_as::<sqlx::Sqlite, HolidayRow>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(HolidayDefinition::from).collect())
    }

    async fn get_holiday_definition(
        &self,
        id: DefinitionId,
    ) -> AppResult<Option<HolidayDefinition>> {
        let row = sqlx::query_as::<sqlx::Sqlite, HolidayRow>(
            "SELECT id, name, date, day_month, calculation_rule, deleted_at
             FROM holidays WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(HolidayDefinition::from))
    }

    async fn insert_holiday_definition(
        &self,
        definition: &NewHolidayDefinition,
    ) -> AppResult<HolidayDefinition> {
        let id = sqlx::query(
            "INSERT INTO holidays (name, date, day_month, calculation_rule)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&definition.name)
        .bind(definition.date)
        .bind(definition.day_month.map(|day_month| day_month.to_string()))
        .bind(rule_json(&definition.calculation_rule)?)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(HolidayDefinition {
            id,
            name: definition.name.clone(),
            date: definition.date,
            day_month: definition.day_month,
            calculation_rule: definition.calculation_rule,
            deleted_at: None,
        })
    }

    async fn update_holiday_definition(&self, definition: &HolidayDefinition) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE holidays
             SET name = ?1, date = ?2, day_month = ?3, calculation_rule = ?4, deleted_at = ?5
             WHERE id = ?6",
        )
        .bind(&definition.name)
        .bind(definition.date)
        .bind(definition.day_month.map(|day_month| day_month.to_string()))
        .bind(rule_json(&definition.calculation_rule)?)
        .bind(definition.deleted_at)
        .bind(definition.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Holiday", definition.id));
        }
        Ok(())
    }

    async fn replace_holiday_instances_for_year(
        &self,
        year: i32,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()> {
        let (first, last) = year_bounds(year)
            .ok_or_else(|| AppError::Constraint(format!("year {} out of range", year)))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM holiday_instances WHERE date BETWEEN ?1 AND ?2")
            .bind(first)
            .bind(last)
            .execute(&mut *tx)
            .await?;
        Self::insert_instances(&mut tx, instances).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_holiday_instances_for_definition(
        &self,
        definition_id: DefinitionId,
        instances: &[NewHolidayInstance],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM holiday_instances WHERE holiday_definition_id = ?1")
            .bind(definition_id)
            .execute(&mut *tx)
            .await?;
        Self::insert_instances(&mut tx, instances).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_holiday_instances(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> AppResult<Vec<HolidayInstance>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, (i64, i64, String, NaiveDate)>(
            "SELECT id, holiday_definition_id, name, date FROM holiday_instances
             WHERE date BETWEEN ?1 AND ?2
             ORDER BY date ASC, holiday_definition_id ASC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, holiday_definition_id, name, date)| HolidayInstance {
                id,
                holiday_definition_id,
                name,
                date,
            })
            .collect())
    }

    async fn holiday_instances_exist_for_year(&self, year: i32) -> AppResult<bool> {
        let Some((first, last)) = year_bounds(year) else {
            return Ok(false);
        };
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM holiday_instances WHERE date BETWEEN ?1 AND ?2",
        )
        .bind(first)
        .bind(last)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn list_shift_templates(&self, include_deleted: bool) -> AppResult<Vec<ShiftTemplate>> {
        let sql = if include_deleted {
            "SELECT id, name, time_from, time_to, duration_hours, required_staff_count, deleted_at
             FROM shift_templates ORDER BY id ASC"
        } else {
            "SELECT id, name, time_from, time_to, duration_hours, required_staff_count, deleted_at
             FROM shift_templates WHERE deleted_at IS NULL ORDER BY id ASC"
        };
        let rows = sqlx::query_as::<sqlx::Sqlite, ShiftTemplateRow>(sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ShiftTemplate::from).collect())
    }

    async fn get_shift_template(&self, id: ShiftTemplateId) -> AppResult<Option<ShiftTemplate>> {
        let row = sqlx::query_as::<sqlx::Sqlite, ShiftTemplateRow>(
            "SELECT id, name, time_from, time_to, duration_hours, required_staff_count, deleted_at
             FROM shift_templates WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ShiftTemplate::from))
    }

    async fn insert_shift_template(
        &self,
        template: &NewShiftTemplate,
    ) -> AppResult<ShiftTemplate> {
        let id = sqlx::query(
            "INSERT INTO shift_templates
                (name, time_from, time_to, duration_hours, required_staff_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&template.name)
        .bind(template.time_from)
        .bind(template.time_to)
        .bind(template.duration_hours.to_string())
        .bind(i64::from(template.required_staff_count))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(ShiftTemplate {
            id,
            name: template.name.clone(),
            time_from: template.time_from,
            time_to: template.time_to,
            duration_hours: template.duration_hours,
            required_staff_count: template.required_staff_count,
            deleted_at: None,
        })
    }

    async fn update_shift_template(&self, template: &ShiftTemplate) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE shift_templates
             SET name = ?1, time_from = ?2, time_to = ?3, duration_hours = ?4,
                 required_staff_count = ?5, deleted_at = ?6
             WHERE id = ?7",
        )
        .bind(&template.name)
        .bind(template.time_from)
        .bind(template.time_to)
        .bind(template.duration_hours.to_string())
        .bind(i64::from(template.required_staff_count))
        .bind(template.deleted_at)
        .bind(template.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Shift template", template.id));
        }
        Ok(())
    }

    async fn list_schedules(&self) -> AppResult<Vec<Schedule>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, ScheduleRow>(
            "SELECT id, name, period_start_date, status, created_at, deleted_at
             FROM schedules ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Schedule::try_from).collect()
    }

    async fn get_schedule(&self, id: ScheduleId) -> AppResult<Option<Schedule>> {
        let row = sqlx::query_as::<sqlx::Sqlite, ScheduleRow>(
            "SELECT id, name, period_start_date, status, created_at, deleted_at
             FROM schedules WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Schedule::try_from).transpose()
    }

    async fn insert_schedule(
        &self,
        schedule: &NewSchedule,
        shift_template_ids: &[ShiftTemplateId],
    ) -> AppResult<Schedule> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO schedules (name, period_start_date, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&schedule.name)
        .bind(schedule.period_start_date)
        .bind(schedule.status.as_str())
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for template_id in shift_template_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO schedule_shift_templates (schedule_id, shift_template_id)
                 VALUES (?1, ?2)",
            )
            .bind(id)
            .bind(*template_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(Schedule {
            id,
            name: schedule.name.clone(),
            period_start_date: schedule.period_start_date,
            status: schedule.status,
            created_at,
            deleted_at: None,
        })
    }

    async fn update_schedule(&self, schedule: &Schedule) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE schedules SET name = ?1, period_start_date = ?2, status = ?3, deleted_at = ?4
             WHERE id = ?5",
        )
        .bind(&schedule.name)
        .bind(schedule.period_start_date)
        .bind(schedule.status.as_str())
        .bind(schedule.deleted_at)
        .bind(schedule.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Schedule", schedule.id));
        }
        Ok(())
    }

    async fn schedule_shift_templates(
        &self,
        schedule_id: ScheduleId,
    ) -> AppResult<Vec<ShiftTemplate>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, ShiftTemplateRow>(
            "SELECT t.id, t.name, t.time_from, t.time_to, t.duration_hours,
                    t.required_staff_count, t.deleted_at
             FROM shift_templates t
             JOIN schedule_shift_templates st ON st.shift_template_id = t.id
             WHERE st.schedule_id = ?1
             ORDER BY t.id ASC",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ShiftTemplate::from).collect())
    }

    async fn list_assignments(
        &self,
        schedule_id: ScheduleId,
    ) -> AppResult<Vec<ScheduleAssignment>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, AssignmentRow>(
            "SELECT id, schedule_id, shift_template_id, assignment_date, position, user_id
             FROM schedule_assignments WHERE schedule_id = ?1
             ORDER BY assignment_date ASC, shift_template_id ASC, position ASC",
        )
        .bind(schedule_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScheduleAssignment::from).collect())
    }

    async fn replace_assignments(
        &self,
        schedule_id: ScheduleId,
        rows: &[NewAssignment],
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM schedule_assignments WHERE schedule_id = ?1")
            .bind(schedule_id)
            .execute(&mut *tx)
            .await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO schedule_assignments
                    (schedule_id, shift_template_id, user_id, assignment_date, position)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(schedule_id)
            .bind(row.shift_template_id)
            .bind(row.user_id)
            .bind(row.assignment_date)
            .bind(i64::from(row.position))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_preferences(&self, user_id: Option<UserId>) -> AppResult<Vec<Preference>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query_as::<sqlx::Sqlite, PreferenceRow>(
                    "SELECT id, user_id, description, date_from, date_to, availability, deleted_at
                     FROM preferences WHERE user_id = ?1 ORDER BY date_from ASC, id ASC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<sqlx::Sqlite, PreferenceRow>(
                    "SELECT id, user_id, description, date_from, date_to, availability, deleted_at
                     FROM preferences ORDER BY date_from ASC, id ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(Preference::from).collect())
    }

    async fn get_preference(&self, id: PreferenceId) -> AppResult<Option<Preference>> {
        let row = sqlx::query_as::<sqlx::Sqlite, PreferenceRow>(
            "SELECT id, user_id, description, date_from, date_to, availability, deleted_at
             FROM preferences WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Preference::from))
    }

    async fn insert_preference(&self, preference: &NewPreference) -> AppResult<Preference> {
        let id = sqlx::query(
            "INSERT INTO preferences (user_id, description, date_from, date_to, availability)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(preference.user_id)
        .bind(&preference.description)
        .bind(preference.date_from)
        .bind(preference.date_to)
        .bind(i64::from(preference.availability))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(Preference {
            id,
            user_id: preference.user_id,
            description: preference.description.clone(),
            date_from: preference.date_from,
            date_to: preference.date_to,
            availability: preference.availability,
            deleted_at: None,
        })
    }

    async fn update_preference(&self, preference: &Preference) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE preferences
             SET description = ?1, date_from = ?2, date_to = ?3, availability = ?4, deleted_at = ?5
             WHERE id = ?6",
        )
        .bind(&preference.description)
        .bind(preference.date_from)
        .bind(preference.date_to)
        .bind(i64::from(preference.availability))
        .bind(preference.deleted_at)
        .bind(preference.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::not_found("Preference", preference.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::holiday_service::HolidayService;
    use crate::permissions::Actor;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::sync::Arc;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    async fn setup_test_db() -> SqliteStore {
        SqliteStore::connect("sqlite::memory:")
            .await
            .expect("Failed to open in-memory database")
    }

    #[tokio::test]
    async fn holiday_definitions_round_trip_rules() {
        let store = setup_test_db().await;
        let created = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "Easter Monday".to_string(),
                date: None,
                day_month: None,
                calculation_rule: Some(CalculationRule::Event {
                    base_event: crate::models::BaseEvent::Easter,
                    offset: 1,
                }),
            })
            .await
            .unwrap();
        let annual = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "Labour Day".to_string(),
                date: None,
                day_month: Some("05-01".parse().unwrap()),
                calculation_rule: None,
            })
            .await
            .unwrap();

        let mut deleted = annual.clone();
        deleted.deleted_at = Some(Utc::now());
        store.update_holiday_definition(&deleted).await.unwrap();

        let active = store.list_holiday_definitions(false).await.unwrap();
        assert_eq!(active, vec![created.clone()]);
        let all = store.list_holiday_definitions(true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].day_month, annual.day_month);
        assert!(all[1].is_deleted());
    }

    #[tokio::test]
    async fn instance_replacement_is_scoped() {
        let store = setup_test_db().await;
        let definition = store
            .insert_holiday_definition(&NewHolidayDefinition {
                name: "New Year".to_string(),
                date: None,
                day_month: Some("01-01".parse().unwrap()),
                calculation_rule: None,
            })
            .await
            .unwrap();
        let instance = |on: NaiveDate| NewHolidayInstance {
            holiday_definition_id: definition.id,
            name: definition.name.clone(),
            date: on,
        };

        store
            .replace_holiday_instances_for_definition(
                definition.id,
                &[instance(date(2025, 1, 1)), instance(date(2026, 1, 1))],
            )
            .await
            .unwrap();
        store
            .replace_holiday_instances_for_year(2025, &[])
            .await
            .unwrap();

        assert!(!store.holiday_instances_exist_for_year(2025).await.unwrap());
        assert!(store.holiday_instances_exist_for_year(2026).await.unwrap());

        // A duplicate violates UNIQUE(date, definition) and rolls back.
        let result = store
            .replace_holiday_instances_for_definition(
                definition.id,
                &[instance(date(2027, 1, 1)), instance(date(2027, 1, 1))],
            )
            .await;
        assert!(matches!(result, Err(AppError::Database(_))));
        let remaining = store
            .list_holiday_instances(date(2020, 1, 1), date(2030, 12, 31))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].date, date(2026, 1, 1));
    }

    #[tokio::test]
    async fn generation_across_new_year_can_be_repeated() {
        let store = Arc::new(setup_test_db().await);
        let service = HolidayService::new(
            store.clone(),
            Arc::new(FixedClock::on_date(date(2025, 6, 1))),
        );
        let actor = Actor::System;
        let sylwester = service
            .create(
                &actor,
                serde_json::from_value(json!({"name": "Sylwester", "day_month": "12-31"}))
                    .unwrap(),
            )
            .await
            .unwrap();
        service
            .create(
                &actor,
                serde_json::from_value(json!({
                    "name": "Day after Sylwester",
                    "calculation_rule": {"base_type": "holiday", "base_holiday_id": sylwester.id, "offset": 1}
                }))
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(service.generate_for_year(2025).await.unwrap(), 2);
        assert_eq!(service.generate_for_year(2025).await.unwrap(), 2);

        let stored: Vec<(String, NaiveDate)> = store
            .list_holiday_instances(date(2025, 1, 1), date(2026, 12, 31))
            .await
            .unwrap()
            .into_iter()
            .map(|instance| (instance.name, instance.date))
            .collect();
        assert_eq!(
            stored,
            vec![
                ("Day after Sylwester".to_string(), date(2025, 1, 1)),
                ("Sylwester".to_string(), date(2025, 12, 31)),
                ("Day after Sylwester".to_string(), date(2026, 1, 1)),
                ("Sylwester".to_string(), date(2026, 12, 31)),
            ]
        );
    }

    #[tokio::test]
    async fn schedules_templates_and_assignments() {
        let store = setup_test_db().await;
        let worker = store.insert_user("Anna").await.unwrap();
        let template = store
            .insert_shift_template(&NewShiftTemplate {
                name: "Nocka".to_string(),
                time_from: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                time_to: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                duration_hours: dec!(12.00),
                required_staff_count: 2,
            })
            .await
            .unwrap();
        let schedule = store
            .insert_schedule(
                &NewSchedule {
                    name: "Maj".to_string(),
                    period_start_date: date(2025, 5, 1),
                    status: ScheduleStatus::Draft,
                },
                &[template.id],
            )
            .await
            .unwrap();

        let attached = store.schedule_shift_templates(schedule.id).await.unwrap();
        assert_eq!(attached.len(), 1);
        assert_eq!(attached[0].duration_hours, dec!(12.00));
        assert_eq!(attached[0].time_from, NaiveTime::from_hms_opt(19, 0, 0).unwrap());

        let rows = vec![
            NewAssignment {
                shift_template_id: template.id,
                assignment_date: date(2025, 5, 3),
                position: 1,
                user_id: Some(worker.id),
            },
            NewAssignment {
                shift_template_id: template.id,
                assignment_date: date(2025, 5, 3),
                position: 2,
                user_id: None,
            },
        ];
        store.replace_assignments(schedule.id, &rows).await.unwrap();
        store
            .replace_assignments(schedule.id, &rows[1..])
            .await
            .unwrap();
        let stored = store.list_assignments(schedule.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].position, 2);
        assert_eq!(stored[0].user_id, None);

        let mut archived = store.get_schedule(schedule.id).await.unwrap().unwrap();
        archived.status = ScheduleStatus::Archived;
        archived.deleted_at = Some(Utc::now());
        store.update_schedule(&archived).await.unwrap();
        let reloaded = store.get_schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, ScheduleStatus::Archived);
        assert!(reloaded.deleted_at.is_some());
    }

    #[tokio::test]
    async fn preferences_filter_by_user() {
        let store = setup_test_db().await;
        let anna = store.insert_user("Anna").await.unwrap();
        let jan = store.insert_user("Jan").await.unwrap();
        for (user, from, to) in [
            (anna.id, date(2025, 5, 1), date(2025, 5, 3)),
            (jan.id, date(2025, 5, 2), date(2025, 5, 2)),
        ] {
            store
                .insert_preference(&NewPreference {
                    user_id: user,
                    description: None,
                    date_from: from,
                    date_to: to,
                    availability: false,
                })
                .await
                .unwrap();
        }
        assert_eq!(store.list_preferences(None).await.unwrap().len(), 2);
        let annas = store.list_preferences(Some(anna.id)).await.unwrap();
        assert_eq!(annas.len(), 1);
        assert!(!annas[0].availability);
        assert_eq!(store.list_users().await.unwrap()[0].name, "Anna");
    }
}
