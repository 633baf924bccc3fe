use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::config::ApiSettings;
use crate::domain::ItemId;
use crate::error::HarvestError;
use crate::fetch::{FetchOutcome, ItemFetcher};
use crate::table::AbundanceTable;

pub const TAXON_LEVEL: &str = "species";

const ACCEPT_VALUE: &str = "application/json, text/plain, */*";
const CONTENT_TYPE_VALUE: &str = "application/json;charset=UTF-8";
const BASE_DELAY_MS: u64 = 200;

#[derive(Serialize)]
struct RunDetailsRequest<'a> {
    run_id: &'a str,
}

#[derive(Serialize)]
struct AbundanceRequest<'a> {
    loaded_uid: &'a str,
    taxon_level: &'a str,
}

/// Fetches abundance tables through the GMrepo JSON API: run id to
/// `loaded_uid`, then `loaded_uid` to species-level rows.
#[derive(Clone)]
pub struct GmrepoHttpClient {
    client: Client,
    base_url: String,
    retries: usize,
}

impl GmrepoHttpClient {
    pub fn new(settings: &ApiSettings) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&settings.user_agent)
                .map_err(|err| HarvestError::InvalidConfig(format!("user agent: {err}")))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .build()
            .map_err(|err| HarvestError::ApiHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            retries: settings.retries,
        })
    }

    pub fn run_details_url(&self) -> String {
        format!("{}/getRunDetailsByRunID/", self.base_url)
    }

    pub fn abundance_url(&self) -> String {
        format!("{}/getRelativeAbundanceByRunID/", self.base_url)
    }

    /// First call. `Ok(None)` means the run exists but has no loaded data.
    pub fn loaded_uid(&self, id: &ItemId) -> Result<Option<String>, HarvestError> {
        let body = RunDetailsRequest { run_id: id.as_str() };
        let payload = self.post_json(&self.run_details_url(), &body)?;
        Ok(extract_loaded_uid(&payload))
    }

    /// Second call.
    pub fn relative_abundance(&self, loaded_uid: &str) -> Result<AbundanceTable, HarvestError> {
        let body = AbundanceRequest {
            loaded_uid,
            taxon_level: TAXON_LEVEL,
        };
        let payload = self.post_json(&self.abundance_url(), &body)?;
        AbundanceTable::from_json_rows(&payload)
    }

    fn try_fetch(&self, id: &ItemId) -> Result<FetchOutcome, HarvestError> {
        let Some(loaded_uid) = self.loaded_uid(id)? else {
            debug!(run_id = %id, "run has no loaded_uid");
            return Ok(FetchOutcome::Empty);
        };
        let table = self.relative_abundance(&loaded_uid)?;
        if table.is_empty() {
            debug!(run_id = %id, loaded_uid = %loaded_uid, "abundance payload has no rows");
            return Ok(FetchOutcome::Empty);
        }
        debug!(run_id = %id, rows = table.row_count(), "abundance rows received");
        Ok(FetchOutcome::Data(table))
    }

    fn post_json<T: Serialize>(&self, url: &str, body: &T) -> Result<Value, HarvestError> {
        let payload =
            serde_json::to_vec(body).map_err(|err| HarvestError::ApiPayload(err.to_string()))?;
        let response = self.send_with_retries(|| {
            self.client
                .post(url)
                .header(CONTENT_TYPE, CONTENT_TYPE_VALUE)
                .body(payload.clone())
        })?;
        let response = Self::handle_status(response)?;
        response
            .json()
            .map_err(|err| HarvestError::ApiPayload(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, HarvestError>
    where
        F: FnMut() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.retries && is_retryable_status(status) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.retries && is_retryable_error(&err) {
                        backoff(attempt);
                        attempt += 1;
                        continue;
                    }
                    return Err(HarvestError::ApiHttp(err.to_string()));
                }
            }
        }
    }

    fn handle_status(response: Response) -> Result<Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "GMrepo request failed".to_string());
        Err(HarvestError::ApiStatus { status, message })
    }
}

impl ItemFetcher for GmrepoHttpClient {
    fn fetch(&self, id: &ItemId) -> FetchOutcome {
        self.try_fetch(id).into()
    }
}

/// Reads `run.loaded_uid`, accepting strings and numbers. Absent, null,
/// blank, zero or boolean values mean the run has no data.
pub fn extract_loaded_uid(payload: &Value) -> Option<String> {
    match payload.get("run")?.get("loaded_uid")? {
        Value::String(uid) if !uid.trim().is_empty() => Some(uid.trim().to_string()),
        Value::Number(uid) if uid.as_f64() != Some(0.0) => Some(uid.to_string()),
        _ => None,
    }
}

fn backoff(attempt: usize) {
    thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn loaded_uid_variants() {
        assert_eq!(
            extract_loaded_uid(&json!({"run": {"loaded_uid": "57"}})),
            Some("57".to_string())
        );
        assert_eq!(
            extract_loaded_uid(&json!({"run": {"loaded_uid": 57}})),
            Some("57".to_string())
        );
        assert_eq!(extract_loaded_uid(&json!({"run": {"loaded_uid": ""}})), None);
        assert_eq!(extract_loaded_uid(&json!({"run": {"loaded_uid": 0}})), None);
        assert_eq!(extract_loaded_uid(&json!({"run": {"loaded_uid": 0.0}})), None);
        assert_eq!(extract_loaded_uid(&json!({"run": {"loaded_uid": false}})), None);
        assert_eq!(extract_loaded_uid(&json!({"run": {"loaded_uid": null}})), None);
        assert_eq!(extract_loaded_uid(&json!({"run": null})), None);
        assert_eq!(extract_loaded_uid(&json!({})), None);
    }
}
