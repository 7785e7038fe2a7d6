use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use careport_live::table::DEFAULT_COLUMN_ATTRIBUTE;
use careport_live::{TransformOptions, DEFAULT_PAGE_KEY, DEFAULT_PERIOD};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::cli::Cli;

/// Columns of the CA beacon list, used when neither a template nor columns
/// are configured.
const BEACON_COLUMNS: [(&str, &str); 4] = [
    ("source", "Server"),
    ("age", "Last seen"),
    ("event", "Event"),
    ("beacon", "Beacon"),
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no page URL given (argument, CAREPORT_PAGE_URL or page-url in the config file)")]
    MissingPageUrl,
    #[error("invalid page URL {url:?}: {source}")]
    InvalidPageUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid column {0:?}, expected KEY=LABEL")]
    InvalidColumn(String),
    #[error("period must be greater than zero")]
    ZeroPeriod,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub key: String,
    pub label: String,
}

impl FromStr for ColumnSpec {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (key, label) = raw.split_once('=').unwrap_or((raw, raw));
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::InvalidColumn(raw.to_string()));
        }
        let label = label.trim();
        Ok(Self {
            key: key.to_string(),
            label: if label.is_empty() { key } else { label }.to_string(),
        })
    }
}

/// Contents of the `--config` file. Every field is optional; command line
/// and environment values take precedence.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct FileConfig {
    pub page_url: Option<String>,
    pub data_url: Option<String>,
    pub period_ms: Option<u64>,
    pub page_key: Option<String>,
    pub column_attribute: Option<String>,
    pub address_key: Option<String>,
    pub template: Option<PathBuf>,
    pub columns: Vec<String>,
    pub fragment: Option<String>,
    pub raw: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableSource {
    Template(PathBuf),
    Columns(Vec<ColumnSpec>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewSettings {
    Table(TableSource),
    Fragment { selector: String },
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub page_url: Url,
    pub data_url: String,
    pub period: Duration,
    pub page_key: String,
    pub column_attribute: String,
    pub transform: Option<TransformOptions>,
    pub view: ViewSettings,
}

impl Settings {
    pub fn resolve(cli: &Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: &Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let raw_url = cli
            .page_url
            .clone()
            .or(file.page_url)
            .ok_or(ConfigError::MissingPageUrl)?;
        let page_url = Url::parse(&raw_url).map_err(|source| ConfigError::InvalidPageUrl {
            url: raw_url.clone(),
            source,
        })?;

        let period = match cli.period_ms.or(file.period_ms) {
            Some(0) => return Err(ConfigError::ZeroPeriod),
            Some(ms) => Duration::from_millis(ms),
            None => DEFAULT_PERIOD,
        };

        let view = match cli.fragment.clone().or(file.fragment) {
            Some(selector) => ViewSettings::Fragment { selector },
            None => ViewSettings::Table(table_source(cli, file.template, &file.columns)?),
        };

        let transform = if cli.raw || file.raw.unwrap_or(false) {
            None
        } else {
            let mut options = TransformOptions::default();
            if let Some(key) = cli.address_key.clone().or(file.address_key) {
                options.address_key = key;
            }
            Some(options)
        };

        Ok(Self {
            page_url,
            data_url: cli.data_url.clone().or(file.data_url).unwrap_or_default(),
            period,
            page_key: cli
                .page_key
                .clone()
                .or(file.page_key)
                .unwrap_or_else(|| DEFAULT_PAGE_KEY.to_string()),
            column_attribute: cli
                .column_attribute
                .clone()
                .or(file.column_attribute)
                .unwrap_or_else(|| DEFAULT_COLUMN_ATTRIBUTE.to_string()),
            transform,
            view,
        })
    }
}

fn table_source(
    cli: &Cli,
    file_template: Option<PathBuf>,
    file_columns: &[String],
) -> Result<TableSource, ConfigError> {
    if !cli.columns.is_empty() {
        return Ok(TableSource::Columns(cli.columns.clone()));
    }
    if let Some(path) = cli.template.clone() {
        return Ok(TableSource::Template(path));
    }
    if !file_columns.is_empty() {
        let columns = file_columns
            .iter()
            .map(|raw| raw.parse())
            .collect::<Result<_, _>>()?;
        return Ok(TableSource::Columns(columns));
    }
    if let Some(path) = file_template {
        return Ok(TableSource::Template(path));
    }
    Ok(TableSource::Columns(
        BEACON_COLUMNS
            .iter()
            .map(|(key, label)| ColumnSpec {
                key: key.to_string(),
                label: label.to_string(),
            })
            .collect(),
    ))
}
