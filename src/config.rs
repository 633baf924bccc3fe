use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

pub const DEFAULT_CONFIG_FILE: &str = "gmrepo-harvest.json";
pub const DEFAULT_GROUP_COLUMN: &str = "Disease MESH ID";
pub const DEFAULT_ITEM_COLUMN: &str = "Run ID";
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";
pub const DEFAULT_LEDGER: &str = "no_data.log";
pub const DEFAULT_WORKERS: usize = 10;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RETRIES: usize = 2;
pub const DEFAULT_API_BASE_URL: &str = "https://gmrepo.humangut.info/api";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://127.0.0.1:4444";
pub const DEFAULT_PAGE_URL: &str = "https://gmrepo.humangut.info/data/run/";
pub const DEFAULT_ELEMENT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// Two-step JSON API.
    #[default]
    Api,
    /// Headless Firefox driven over WebDriver.
    Browser,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub input: Option<InputEntry>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub ledger: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: Option<usize>,
    #[serde(default)]
    pub fetcher: Option<FetcherKind>,
    #[serde(default)]
    pub api: Option<ApiEntry>,
    #[serde(default)]
    pub browser: Option<BrowserEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct InputEntry {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    #[serde(default)]
    pub group_column: Option<String>,
    #[serde(default)]
    pub item_column: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BrowserEntry {
    #[serde(default)]
    pub webdriver_url: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
    #[serde(default)]
    pub download_dir: Option<String>,
    #[serde(default)]
    pub firefox_binary: Option<String>,
    #[serde(default)]
    pub element_timeout_secs: Option<u64>,
    #[serde(default)]
    pub download_timeout_secs: Option<u64>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input: Option<String>,
    pub sheet: Option<String>,
    pub output_dir: Option<String>,
    pub ledger: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<usize>,
    pub fetcher: Option<FetcherKind>,
}

#[derive(Debug, Clone)]
pub struct InputSpec {
    pub path: Utf8PathBuf,
    pub sheet: Option<String>,
    pub group_column: String,
    pub item_column: String,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub retries: usize,
}

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub page_url: String,
    pub download_dir: Utf8PathBuf,
    pub firefox_binary: Option<String>,
    pub request_timeout: Duration,
    pub element_timeout: Duration,
    pub download_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub input: InputSpec,
    pub output_dir: Utf8PathBuf,
    pub ledger_path: Utf8PathBuf,
    pub workers: usize,
    pub fetcher: FetcherKind,
    pub api: ApiSettings,
    pub browser: BrowserSettings,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file. An explicit path must exist; without one the
    /// default file is used when present and an empty config otherwise.
    pub fn load(path: Option<&str>) -> Result<Config, HarvestError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| HarvestError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, HarvestError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        let input_entry = config.input.unwrap_or_default();

        let input_path = overrides
            .input
            .or(input_entry.path)
            .filter(|path| !path.trim().is_empty())
            .ok_or(HarvestError::MissingInput)?;
        let input = InputSpec {
            path: Utf8PathBuf::from(input_path),
            sheet: overrides.sheet.or(input_entry.sheet),
            group_column: input_entry
                .group_column
                .unwrap_or_else(|| DEFAULT_GROUP_COLUMN.to_string()),
            item_column: input_entry
                .item_column
                .unwrap_or_else(|| DEFAULT_ITEM_COLUMN.to_string()),
        };

        let output_dir = Utf8PathBuf::from(
            overrides
                .output_dir
                .or(config.output_dir)
                .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
        );
        let ledger = Utf8PathBuf::from(
            overrides
                .ledger
                .or(config.ledger)
                .unwrap_or_else(|| DEFAULT_LEDGER.to_string()),
        );
        let ledger_path = if ledger.is_absolute() {
            ledger
        } else {
            output_dir.join(ledger)
        };

        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(HarvestError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        let timeout_secs = overrides
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(HarvestError::InvalidConfig(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        let timeout = Duration::from_secs(timeout_secs);
        let retries = overrides
            .retries
            .or(config.retries)
            .unwrap_or(DEFAULT_RETRIES);

        let api_entry = config.api.unwrap_or_default();
        let api = ApiSettings {
            base_url: api_entry
                .base_url
                .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            user_agent: api_entry
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout,
            retries,
        };

        let browser_entry = config.browser.unwrap_or_default();
        let browser = BrowserSettings {
            webdriver_url: browser_entry
                .webdriver_url
                .unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            page_url: browser_entry
                .page_url
                .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string()),
            download_dir: browser_entry
                .download_dir
                .map(Utf8PathBuf::from)
                .unwrap_or_else(|| output_dir.join(".downloads")),
            firefox_binary: browser_entry.firefox_binary,
            request_timeout: timeout,
            element_timeout: Duration::from_secs(
                browser_entry
                    .element_timeout_secs
                    .unwrap_or(DEFAULT_ELEMENT_TIMEOUT_SECS),
            ),
            download_timeout: Duration::from_secs(
                browser_entry
                    .download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
        };

        Ok(ResolvedConfig {
            schema_version,
            input,
            output_dir,
            ledger_path,
            workers,
            fetcher: overrides.fetcher.or(config.fetcher).unwrap_or_default(),
            api,
            browser,
        })
    }
}
