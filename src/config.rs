// src/config.rs
use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("Invalid holiday generation date: month {month}, day {day}")]
    InvalidGenerationDate { month: u32, day: u32 },
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Server Configuration
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    // Database (unset = in-memory store)
    #[serde(default)]
    pub database_url: Option<String>,

    // Annual generation of next year's holiday instances
    #[serde(default = "default_generation_month")]
    pub holiday_generation_month: u32,
    #[serde(default = "default_generation_day")]
    pub holiday_generation_day: u32,

    // JSON map of user id -> permission names
    #[serde(default)]
    pub permissions_file: Option<String>,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_generation_month() -> u32 {
    12
}

fn default_generation_day() -> u32 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: default_server_host(),
            server_port: default_server_port(),
            database_url: None,
            holiday_generation_month: default_generation_month(),
            holiday_generation_day: default_generation_day(),
            permissions_file: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        envy::from_env::<Config>()?.validated()
    }

    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Config>(vars)?.validated()
    }

    fn validated(self) -> Result<Self, ConfigError> {
        // Any leap year will do: 02-29 is a valid generation day.
        if NaiveDate::from_ymd_opt(2024, self.holiday_generation_month, self.holiday_generation_day)
            .is_none()
        {
            return Err(ConfigError::InvalidGenerationDate {
                month: self.holiday_generation_month,
                day: self.holiday_generation_day,
            });
        }
        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Whether `date` is the configured day for generating next year's holidays.
    pub fn is_generation_day(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        date.month() == self.holiday_generation_month && date.day() == self.holiday_generation_day
    }
}
