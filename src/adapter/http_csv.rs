//! Reference fetch adapter: HTTP download of a CSV export.
//!
//! Covers the upstreams that publish plain CSV behind a templated URL. The
//! URL template carries `{resource}`, `{start}` and `{end}` placeholders;
//! chunk bounds are substituted in the dataset's civil time. Transient
//! failures are retried here with exponential backoff; the pipeline never
//! sees an attempt that still has retries left.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::common::constants::{HTTP_MAX_ATTEMPTS, HTTP_RETRY_BASE_DELAY_MS, HTTP_TIMEOUT_SECONDS};
use crate::dataset::Dataset;
use crate::ingest::errors::IngestError;
use crate::ingest::structs::TimeRange;

use super::{FetchAdapter, FetchError, RawRow};

pub struct HttpCsvAdapter {
    client: Client,
    url_template: String,
    timestamp_column: String,
    value_column: String,
    grouping_column: Option<String>,
    max_attempts: u32,
}

impl HttpCsvAdapter {
    pub fn for_dataset(dataset: &Dataset) -> Result<Self, IngestError> {
        let url_template = dataset.url_template.clone().ok_or_else(|| {
            IngestError::Config(format!(
                "dataset '{}' has no url_template; cannot build a fetch adapter",
                dataset.name
            ))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| IngestError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url_template,
            timestamp_column: dataset.timestamp_column.clone(),
            value_column: dataset.value_column.clone(),
            grouping_column: dataset.grouping_column.clone(),
            max_attempts: HTTP_MAX_ATTEMPTS,
        })
    }

    fn build_url(&self, resource: &str, range: TimeRange) -> String {
        self.url_template
            .replace("{resource}", resource)
            .replace("{start}", &range.start.format("%Y-%m-%dT%H:%M:%S").to_string())
            .replace("{end}", &range.end.format("%Y-%m-%dT%H:%M:%S").to_string())
    }

    fn download(&self, url: &str) -> Result<String, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FetchError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::Permanent(format!("resource not available (404) at {}", url)));
        }
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!("HTTP {} at {}", status, url)));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!("HTTP {} at {}", status, url)));
        }

        response
            .text()
            .map_err(|e| FetchError::Transient(format!("failed to read response body: {}", e)))
    }

    fn decode(&self, body: &str) -> Result<Vec<RawRow>, FetchError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(body.as_bytes());

        let headers = reader
            .headers()
            .map_err(|e| FetchError::Permanent(format!("malformed CSV header: {}", e)))?
            .clone();
        let column = |name: &str| headers.iter().position(|h| h == name);

        let ts_idx = column(&self.timestamp_column).ok_or_else(|| {
            FetchError::Permanent(format!("missing column '{}' in upstream payload", self.timestamp_column))
        })?;
        let value_idx = column(&self.value_column).ok_or_else(|| {
            FetchError::Permanent(format!("missing column '{}' in upstream payload", self.value_column))
        })?;
        let gk_idx = match &self.grouping_column {
            Some(name) => Some(column(name).ok_or_else(|| {
                FetchError::Permanent(format!("missing column '{}' in upstream payload", name))
            })?),
            None => None,
        };

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|e| FetchError::Permanent(format!("malformed CSV payload: {}", e)))?;
            rows.push(RawRow {
                timestamp: record.get(ts_idx).unwrap_or("").to_string(),
                grouping_key: gk_idx.and_then(|i| record.get(i)).unwrap_or("").to_string(),
                value: record.get(value_idx).unwrap_or("").to_string(),
            });
        }
        Ok(rows)
    }
}

impl FetchAdapter for HttpCsvAdapter {
    fn fetch(&self, resource: &str, range: TimeRange) -> Result<Vec<RawRow>, FetchError> {
        let url = self.build_url(resource, range);
        let mut delay = Duration::from_millis(HTTP_RETRY_BASE_DELAY_MS);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(%url, attempt, "fetching chunk");
            match self.download(&url).and_then(|body| self.decode(&body)) {
                Ok(rows) => {
                    debug!(%url, rows = rows.len(), "fetched chunk");
                    return Ok(rows);
                }
                Err(err) if err.is_transient() && attempt < self.max_attempts => {
                    warn!(%url, attempt, error = %err, "transient fetch failure, backing off");
                    thread::sleep(delay);
                    delay *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn adapter(grouping_column: Option<&str>) -> HttpCsvAdapter {
        HttpCsvAdapter {
            client: Client::new(),
            url_template: "https://example.test/export?resource={resource}&from={start}&to={end}".to_string(),
            timestamp_column: "timestamp".to_string(),
            value_column: "value".to_string(),
            grouping_column: grouping_column.map(str::to_string),
            max_attempts: 1,
        }
    }

    fn dt(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn url_template_substitution() {
        let url = adapter(None).build_url("A11", TimeRange::new(dt(0, 0), dt(6, 0)));
        assert_eq!(
            url,
            "https://example.test/export?resource=A11&from=2025-03-01T00:00:00&to=2025-03-01T06:00:00"
        );
    }

    #[test]
    fn decodes_rows_by_header_name() {
        let body = "value,timestamp\n1.5,2025-03-01 00:00:00\n,2025-03-01 00:01:00\n";
        let rows = adapter(None).decode(body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "1.5");
        assert_eq!(rows[0].timestamp, "2025-03-01 00:00:00");
        assert_eq!(rows[1].value, "");
        assert!(rows[0].grouping_key.is_empty());
    }

    #[test]
    fn decodes_grouping_column_when_configured() {
        let body = "timestamp,area,value\n2025-03-01 00:00:00,CZ,1.0\n";
        let rows = adapter(Some("area")).decode(body).unwrap();
        assert_eq!(rows[0].grouping_key, "CZ");
    }

    #[test]
    fn missing_column_is_permanent() {
        let body = "time,value\n2025-03-01 00:00:00,1.0\n";
        let err = adapter(None).decode(body).unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }
}
