use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::{Client, Response};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::BrowserSettings;
use crate::domain::ItemId;
use crate::error::HarvestError;
use crate::fetch::{FetchOutcome, ItemFetcher};
use crate::table::AbundanceTable;

pub const SPECIES_DOWNLOAD_XPATH: &str =
    "//a[@ng-click=\"downloadRelativeAbundanceByRunID( run, 'species' )\"]";

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const TSV_MIME: &str = "text/tab-separated-values";

/// Slower alternative to the JSON API: opens the run page in a headless
/// Firefox through a WebDriver server and clicks the species download link.
/// Each fetch gets its own browser session and download directory.
#[derive(Clone)]
pub struct WebDriverFetcher {
    client: Client,
    settings: BrowserSettings,
}

impl WebDriverFetcher {
    pub fn new(settings: &BrowserSettings) -> Result<Self, HarvestError> {
        fs::create_dir_all(settings.download_dir.as_std_path()).map_err(|err| {
            HarvestError::Filesystem(format!("create {}: {err}", settings.download_dir))
        })?;
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| HarvestError::WebDriver(err.to_string()))?;
        Ok(Self {
            client,
            settings: settings.clone(),
        })
    }

    pub fn page_url(&self, id: &ItemId) -> String {
        format!("{}{}", self.settings.page_url, id.as_str())
    }

    fn try_fetch(&self, id: &ItemId) -> Result<FetchOutcome, HarvestError> {
        let download_dir = tempfile::Builder::new()
            .prefix("gmrepo-dl")
            .tempdir_in(self.settings.download_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let absolute_dir = download_dir
            .path()
            .canonicalize()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let session = self.new_session(&absolute_dir)?;
        let result = self.download_in_session(&session, id, &absolute_dir);
        if let Err(err) = self.delete_session(&session) {
            warn!(session = %session, "failed to close webdriver session: {err}");
        }
        let file = result?;

        let content =
            fs::read(&file).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let table = AbundanceTable::from_tsv(&content)?;
        if table.is_empty() {
            return Ok(FetchOutcome::Empty);
        }
        Ok(FetchOutcome::Data(table))
    }

    fn download_in_session(
        &self,
        session: &str,
        id: &ItemId,
        download_dir: &Path,
    ) -> Result<PathBuf, HarvestError> {
        self.command(
            reqwest::Method::POST,
            &format!("session/{session}/url"),
            Some(json!({ "url": self.page_url(id) })),
        )?;
        let element = self.wait_for_element(session)?;
        debug!(run_id = %id, "clicking species download link");
        self.command(
            reqwest::Method::POST,
            &format!("session/{session}/element/{element}/click"),
            Some(json!({})),
        )?;
        wait_for_download(download_dir, self.settings.download_timeout)
    }

    fn new_session(&self, download_dir: &Path) -> Result<String, HarvestError> {
        let mut firefox_options = json!({
            "args": ["-headless", "--width=1920", "--height=1080"],
            "prefs": {
                "dom.webdriver.enabled": false,
                "dom.webnotifications.enabled": false,
                "media.navigator.enabled": true,
                "browser.download.folderList": 2,
                "browser.download.dir": download_dir.to_string_lossy(),
                "browser.helperApps.neverAsk.saveToDisk": TSV_MIME,
            }
        });
        if let Some(binary) = &self.settings.firefox_binary {
            firefox_options["binary"] = Value::String(binary.clone());
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "firefox",
                    "moz:firefoxOptions": firefox_options,
                }
            }
        });
        let value = self.command(reqwest::Method::POST, "session", Some(capabilities))?;
        value
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarvestError::WebDriver("new session response lacks sessionId".to_string()))
    }

    fn delete_session(&self, session: &str) -> Result<(), HarvestError> {
        self.command(reqwest::Method::DELETE, &format!("session/{session}"), None)
            .map(|_| ())
    }

    fn wait_for_element(&self, session: &str) -> Result<String, HarvestError> {
        let deadline = Instant::now() + self.settings.element_timeout;
        let query = json!({ "using": "xpath", "value": SPECIES_DOWNLOAD_XPATH });
        loop {
            match self.command(
                reqwest::Method::POST,
                &format!("session/{session}/element"),
                Some(query.clone()),
            ) {
                Ok(value) => {
                    return value
                        .get(ELEMENT_KEY)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| {
                            HarvestError::WebDriver("element response lacks reference".to_string())
                        });
                }
                Err(HarvestError::WebDriverStatus { status: 404, .. })
                    if Instant::now() < deadline =>
                {
                    thread::sleep(POLL_INTERVAL);
                }
                Err(HarvestError::WebDriverStatus { status: 404, .. }) => {
                    return Err(HarvestError::DownloadTimeout(
                        "species download link".to_string(),
                    ));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Sends one WebDriver command and returns its `value` member.
    fn command(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, HarvestError> {
        let url = format!("{}/{path}", self.settings.webdriver_url);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .map_err(|err| HarvestError::WebDriver(err.to_string()))?;
        Self::handle_response(response)
    }

    fn handle_response(response: Response) -> Result<Value, HarvestError> {
        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|err| HarvestError::WebDriver(err.to_string()))?;
        let value = payload.get("value").cloned().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| value.get("error").and_then(Value::as_str))
            .unwrap_or("webdriver command failed")
            .to_string();
        Err(HarvestError::WebDriverStatus {
            status: status.as_u16(),
            message,
        })
    }
}

impl ItemFetcher for WebDriverFetcher {
    fn fetch(&self, id: &ItemId) -> FetchOutcome {
        self.try_fetch(id).into()
    }
}

/// Waits until the directory holds a finished download: at least one file
/// and no Firefox `.part` placeholders.
pub fn wait_for_download(dir: &Path, timeout: Duration) -> Result<PathBuf, HarvestError> {
    let deadline = Instant::now() + timeout;
    loop {
        let mut finished = None;
        let mut in_progress = false;
        let entries =
            fs::read_dir(dir).map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        for entry in entries {
            let path = entry
                .map_err(|err| HarvestError::Filesystem(err.to_string()))?
                .path();
            if !path.is_file() {
                continue;
            }
            if path.extension().map(|ext| ext == "part").unwrap_or(false) {
                in_progress = true;
            } else if finished.is_none() {
                finished = Some(path);
            }
        }
        if let (Some(path), false) = (&finished, in_progress) {
            return Ok(path.clone());
        }
        if Instant::now() >= deadline {
            return Err(HarvestError::DownloadTimeout(format!(
                "download in {}",
                dir.display()
            )));
        }
        thread::sleep(POLL_INTERVAL);
    }
}
