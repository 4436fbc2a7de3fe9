//! Process settings.
//!
//! Settings are read once at start-up (environment plus an optional `.env`)
//! and passed by reference into every pipeline stage.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_FAOSTAT_BASE_URL: &str = "https://fenixservices.fao.org/faostat/api/v1/en";
pub const DEFAULT_FAOSTAT_DATASET: &str = "QCL";

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    /// Advisory cache for raw fetches and reconciled CSVs.
    pub raw_dir: PathBuf,
    pub database_path: PathBuf,
    pub model_path: PathBuf,
    pub schema_path: PathBuf,

    pub faostat_base_url: String,
    pub faostat_dataset: String,
    pub request_timeout: Duration,

    pub crop: String,
    pub country: String,
    pub start_year: i32,
    pub end_year: i32,

    pub test_size: f64,
    pub random_seed: u64,

    pub kamis_csv: PathBuf,
    pub agribora_csv: PathBuf,
}

impl Settings {
    /// Load settings from the process environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = PathBuf::from(get("AGRI_DATA_DIR").unwrap_or_else(|| "DATA".to_string()));
        let raw_dir = get("AGRI_RAW_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("raw"));
        let database_path = get("AGRI_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("database").join("agri.sqlite"));
        let model_path = get("AGRI_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models").join("model.json"));
        let schema_path = get("AGRI_SCHEMA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("models").join("feature_schema.json"));
        let kamis_csv = get("AGRI_KAMIS_CSV")
            .map(PathBuf::from)
            .unwrap_or_else(|| raw_dir.join("kamis_maize_prices_raw.csv"));
        let agribora_csv = get("AGRI_AGRIBORA_CSV")
            .map(PathBuf::from)
            .unwrap_or_else(|| raw_dir.join("agribora_maize_prices.csv"));

        let timeout_secs: u64 = parse_or(&get, "AGRI_REQUEST_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(AppError::Config("AGRI_REQUEST_TIMEOUT_SECS must be > 0.".to_string()));
        }

        let start_year: i32 = parse_or(&get, "AGRI_START_YEAR", 2000)?;
        let end_year: i32 = parse_or(&get, "AGRI_END_YEAR", 2023)?;
        if end_year < start_year {
            return Err(AppError::Config(format!(
                "AGRI_END_YEAR ({end_year}) is before AGRI_START_YEAR ({start_year})."
            )));
        }

        let test_size: f64 = parse_or(&get, "AGRI_TEST_SIZE", 0.2)?;
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(AppError::Config("AGRI_TEST_SIZE must be in (0, 1).".to_string()));
        }

        Ok(Self {
            data_dir,
            raw_dir,
            database_path,
            model_path,
            schema_path,
            faostat_base_url: get("FAOSTAT_BASE_URL").unwrap_or_else(|| DEFAULT_FAOSTAT_BASE_URL.to_string()),
            faostat_dataset: get("FAOSTAT_DATASET").unwrap_or_else(|| DEFAULT_FAOSTAT_DATASET.to_string()),
            request_timeout: Duration::from_secs(timeout_secs),
            crop: get("AGRI_CROP").unwrap_or_else(|| "Maize".to_string()),
            country: get("AGRI_COUNTRY").unwrap_or_else(|| "Kenya".to_string()),
            start_year,
            end_year,
            test_size,
            random_seed: parse_or(&get, "AGRI_RANDOM_SEED", 42)?,
            kamis_csv,
            agribora_csv,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| AppError::Config(format!("Invalid {key}='{raw}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_rooted_in_data_dir() {
        let settings = Settings::from_lookup(lookup(&[("AGRI_DATA_DIR", "/tmp/agri")])).unwrap();
        assert_eq!(settings.raw_dir, PathBuf::from("/tmp/agri/raw"));
        assert_eq!(settings.database_path, PathBuf::from("/tmp/agri/database/agri.sqlite"));
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.faostat_dataset, DEFAULT_FAOSTAT_DATASET);
        assert_eq!(settings.random_seed, 42);
    }

    #[test]
    fn invalid_numbers_are_config_errors() {
        let err = Settings::from_lookup(lookup(&[("AGRI_START_YEAR", "twenty")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));

        let err = Settings::from_lookup(lookup(&[("AGRI_TEST_SIZE", "1.5")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn year_range_must_be_ordered() {
        let err = Settings::from_lookup(lookup(&[("AGRI_START_YEAR", "2020"), ("AGRI_END_YEAR", "2010")]))
            .unwrap_err();
        assert!(err.to_string().contains("before"));
    }
}
