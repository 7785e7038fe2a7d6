use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::ColumnSpec;
use crate::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "careport-watch",
    about = "Follow a live CA Observer report page from the terminal",
    author,
    version
)]
pub struct Cli {
    #[arg(
        value_name = "PAGE_URL",
        env = "CAREPORT_PAGE_URL",
        help = "Report page to follow; its query string is carried into every request"
    )]
    pub page_url: Option<String>,

    #[arg(
        long,
        env = "CAREPORT_CONFIG",
        value_name = "PATH",
        help = "TOML file supplying defaults for any option below"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "data-url",
        env = "CAREPORT_DATA_URL",
        value_name = "URL",
        help = "JSON list endpoint, relative to the page (defaults to the page itself)"
    )]
    pub data_url: Option<String>,

    #[arg(
        long = "period-ms",
        env = "CAREPORT_PERIOD_MS",
        value_name = "MS",
        help = "Delay between a completed refresh and the next one [default: 10000]"
    )]
    pub period_ms: Option<u64>,

    #[arg(
        long = "page-key",
        env = "CAREPORT_PAGE_KEY",
        value_name = "KEY",
        help = "Query key holding the page number [default: page]"
    )]
    pub page_key: Option<String>,

    #[arg(
        long = "column-attribute",
        env = "CAREPORT_COLUMN_ATTRIBUTE",
        value_name = "NAME",
        help = "Header attribute naming each column's record field [default: atag]"
    )]
    pub column_attribute: Option<String>,

    #[arg(
        long = "address-key",
        env = "CAREPORT_ADDRESS_KEY",
        value_name = "KEY",
        help = "Record field holding the {host, port} address [default: source]"
    )]
    pub address_key: Option<String>,

    #[arg(
        long,
        env = "CAREPORT_TEMPLATE",
        value_name = "PATH",
        conflicts_with = "columns",
        help = "Table markup whose header cells name the columns"
    )]
    pub template: Option<PathBuf>,

    #[arg(
        long = "column",
        value_name = "KEY=LABEL",
        help = "Column to show, in order (repeatable)"
    )]
    pub columns: Vec<ColumnSpec>,

    #[arg(
        long,
        env = "CAREPORT_FRAGMENT",
        value_name = "SELECTOR",
        help = "Reload the page fragment matching SELECTOR instead of a table"
    )]
    pub fragment: Option<String>,

    #[arg(long, help = "Show records as served, without address/time rewriting")]
    pub raw: bool,

    #[arg(long, help = "Refresh once, print the result and exit")]
    pub once: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "CAREPORT_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "CAREPORT_LOG_FILE",
        help = "Write logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    /// The TUI owns the terminal, so without an explicit file it logs to
    /// `careport-watch.log` in the temp directory.
    pub fn to_config(&self, tui: bool) -> LogConfig {
        let file = match (&self.file, tui) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(std::env::temp_dir().join("careport-watch.log")),
            (None, false) => None,
        };
        LogConfig {
            level: self.level,
            file,
        }
    }
}
