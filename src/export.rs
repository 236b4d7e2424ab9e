// src/export.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::models::{Schedule, ShiftTemplate, User, UserId};
use crate::schedule_grid::{MonthDay, SlotKey, SlotWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Full,
    My,
}

/// Everything a document renderer needs for one schedule. Assignments are
/// keyed like the edit grid; in the `my` view they only hold the
/// requesting worker.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub schedule: Schedule,
    #[serde(rename = "shiftTemplates")]
    pub shift_templates: Vec<ShiftTemplate>,
    pub users: Vec<User>,
    pub assignments: BTreeMap<SlotKey, Vec<SlotWorker>>,
    #[serde(rename = "monthDays")]
    pub month_days: Vec<MonthDay>,
    pub view_type: ViewMode,
    pub auth_user_id: Option<UserId>,
}

impl ExportBundle {
    /// `grafik_pracy_{name}_{YYYY-MM}_{caly|moj}.csv`
    pub fn file_name(&self, extension: &str) -> String {
        let suffix = match self.view_type {
            ViewMode::Full => "caly",
            ViewMode::My => "moj",
        };
        let name: String = self
            .schedule
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "grafik_pracy_{}_{}_{}.{}",
            name,
            self.schedule.period_start_date.format("%Y-%m"),
            suffix,
            extension
        )
    }
}

/// One row per template and position, one column per day of the month.
pub fn render_csv(bundle: &ExportBundle) -> AppResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec!["Zmiana".to_string(), "Pozycja".to_string()];
    header.extend(
        bundle
            .month_days
            .iter()
            .map(|day| day.date.format("%Y-%m-%d").to_string()),
    );
    writer.write_record(&header)?;

    for template in &bundle.shift_templates {
        let label = format!(
            "{} ({}-{})",
            template.name,
            template.time_from.format("%H:%M"),
            template.time_to.format("%H:%M")
        );
        for position in 1..=template.required_staff_count {
            let mut record = vec![label.clone(), position.to_string()];
            for day in &bundle.month_days {
                let key = SlotKey::new(template.id, day.date, position);
                let cell = bundle
                    .assignments
                    .get(&key)
                    .map(|workers| {
                        workers
                            .iter()
                            .map(|worker| worker.user_name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                record.push(cell);
            }
            writer.write_record(&record)?;
        }
    }

    let bytes = writer
        .into_inner()
        .map_err(|err| AppError::Io(err.into_error()))?;
    debug!(
        "Rendered schedule {} as CSV ({} bytes)",
        bundle.schedule.id,
        bytes.len()
    );
    Ok(bytes)
}
