//! FAOSTAT API integration for crop statistics (yield, production, area).

use std::path::{Path, PathBuf};

use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::Settings;
use crate::data::raw::{RawTable, normalize_header_name};
use crate::error::AppError;
use crate::io::export::write_raw_csv;

/// Fields every FAOSTAT record must carry.
const REQUIRED_FIELDS: [&str; 2] = ["year", "value"];

/// One FAOSTAT request: `item` for `area` over an inclusive year range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaostatQuery {
    pub item: String,
    pub element: String,
    pub area: String,
    pub start_year: i32,
    pub end_year: i32,
}

impl FaostatQuery {
    pub fn year_range(&self) -> String {
        format!("{},{}", self.start_year, self.end_year)
    }

    /// File name used for the raw CSV cache.
    pub fn cache_file_name(&self) -> String {
        let slug = |s: &str| s.trim().replace(char::is_whitespace, "_");
        format!(
            "{}_{}_{}_{}_{}.csv",
            slug(&self.item),
            slug(&self.area),
            slug(&self.element).to_ascii_lowercase(),
            self.start_year,
            self.end_year
        )
    }
}

pub struct FaostatClient {
    client: Client,
    endpoint: String,
}

impl FaostatClient {
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {e}")))?;
        let endpoint = format!(
            "{}/{}",
            settings.faostat_base_url.trim_end_matches('/'),
            settings.faostat_dataset.trim_matches('/')
        );
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the records for `query` as a raw table.
    pub fn fetch(&self, query: &FaostatQuery) -> Result<RawTable, AppError> {
        let year = query.year_range();
        debug!(endpoint = %self.endpoint, item = %query.item, area = %query.area, %year, "requesting FAOSTAT data");

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("item", query.item.as_str()),
                ("element", query.element.as_str()),
                ("area", query.area.as_str()),
                ("year", year.as_str()),
            ])
            .send()
            .map_err(|e| AppError::UpstreamUnavailable(format!("FAOSTAT request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AppError::UpstreamUnavailable(format!(
                "FAOSTAT request failed with status {}.",
                resp.status()
            )));
        }

        let body = resp
            .text()
            .map_err(|e| AppError::UpstreamUnavailable(format!("Failed to read FAOSTAT response: {e}")))?;

        let table = parse_response(&body)?;
        info!(rows = table.len(), item = %query.item, area = %query.area, "fetched FAOSTAT records");
        Ok(table)
    }

    /// Fetch and, on success only, write the raw table to `cache_dir`.
    pub fn fetch_and_cache(
        &self,
        query: &FaostatQuery,
        cache_dir: Option<&Path>,
    ) -> Result<(RawTable, Option<PathBuf>), AppError> {
        let table = self.fetch(query)?;
        let cached = match cache_dir {
            Some(dir) => {
                let path = dir.join(query.cache_file_name());
                write_raw_csv(&path, &table)?;
                Some(path)
            }
            None => None,
        };
        Ok((table, cached))
    }
}

/// Parse a FAOSTAT JSON body (`{"data": [ {...}, ... ]}`) into a raw table.
pub fn parse_response(body: &str) -> Result<RawTable, AppError> {
    let json: Value = serde_json::from_str(body)
        .map_err(|e| AppError::SchemaMismatch(format!("FAOSTAT response is not valid JSON: {e}")))?;

    let records = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::SchemaMismatch("Unexpected FAOSTAT response: no `data` array.".to_string()))?;

    if records.is_empty() {
        return Err(AppError::EmptyResult(
            "FAOSTAT returned no records for this item/area/year range.".to_string(),
        ));
    }

    // Header set is the union of record keys, in first-seen order.
    let mut headers: Vec<String> = Vec::new();
    for record in records {
        let obj = record
            .as_object()
            .ok_or_else(|| AppError::SchemaMismatch("FAOSTAT `data` entries must be objects.".to_string()))?;
        for key in obj.keys() {
            let key = normalize_header_name(key);
            if !headers.contains(&key) {
                headers.push(key);
            }
        }
    }

    let mut table = RawTable::new(headers);
    let missing = table.missing_columns(&REQUIRED_FIELDS);
    if !missing.is_empty() {
        return Err(AppError::SchemaMismatch(format!(
            "FAOSTAT records lack expected fields: {}",
            missing.join(", ")
        )));
    }

    for record in records {
        let mut row = vec![None; table.headers.len()];
        if let Some(obj) = record.as_object() {
            for (key, value) in obj {
                let key = normalize_header_name(key);
                if let Some(idx) = table.headers.iter().position(|h| *h == key) {
                    row[idx] = stringify(value);
                }
            }
        }
        table.push_row(row);
    }

    Ok(table)
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => crate::data::raw::cell(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}
