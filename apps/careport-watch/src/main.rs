mod cli;
mod config;
mod logging;
mod tui;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use careport_live::{
    ca_mangler, FragmentConfig, FragmentHandle, FragmentReloader, HtmlFragment, HtmlTable,
    HttpFetcher, LiveTable, LiveTableConfig, LiveTableHandle, PagerState, Paginator,
    VisibilitySignal,
};
use clap::Parser;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::{Settings, TableSource, ViewSettings};

/// How long `--once` waits for the first refresh to settle.
const ONCE_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound view and the handle driving it.
pub enum Watched {
    Table {
        table: Arc<Mutex<HtmlTable>>,
        pager: Arc<Mutex<PagerState>>,
        handle: LiveTableHandle,
    },
    Fragment {
        selector: String,
        fragment: Arc<Mutex<HtmlFragment>>,
        handle: FragmentHandle,
    },
}

impl Watched {
    pub fn refresh(&self) {
        match self {
            Watched::Table { handle, .. } => handle.update(),
            Watched::Fragment { handle, .. } => handle.update(),
        }
    }

    pub fn stop(&self) {
        match self {
            Watched::Table { handle, .. } => handle.stop(),
            Watched::Fragment { handle, .. } => handle.stop(),
        }
    }

    pub fn shutdown(&self) {
        match self {
            Watched::Table { handle, .. } => handle.shutdown(),
            Watched::Fragment { handle, .. } => handle.shutdown(),
        }
    }

    /// Moves `delta` pages from the current one, within `1..=total`.
    pub fn step_page(&self, delta: i64) {
        if let Watched::Table { handle, .. } = self {
            let status = handle.status();
            let current = status.current_page.unwrap_or(status.next_page);
            if let Some(target) = page_target(current, status.total, delta) {
                handle.goto_page(target);
            }
        }
    }
}

fn page_target(current: u32, total: Option<u32>, delta: i64) -> Option<u32> {
    let total = i64::from(total?);
    let target = i64::from(current) + delta;
    (1..=total)
        .contains(&target)
        .then(|| u32::try_from(target).ok())
        .flatten()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config(!cli.once)).context("initialize logging")?;
    let settings = Settings::resolve(&cli)?;
    info!(
        page_url = %settings.page_url,
        period_ms = settings.period.as_millis() as u64,
        once = cli.once,
        "careport-watch starting"
    );

    let visibility = VisibilitySignal::global();
    let (watched, tasks) = bind(&settings, visibility)?;

    let result = if cli.once {
        print_once(&watched).await
    } else {
        tui::run(&watched, visibility, settings.page_url.as_str()).await
    };

    watched.shutdown();
    drop(watched);
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task ended abnormally");
        }
    }
    result
}

fn bind(
    settings: &Settings,
    visibility: &VisibilitySignal,
) -> Result<(Watched, Vec<JoinHandle<()>>)> {
    let fetcher = Arc::new(HttpFetcher::new());
    match &settings.view {
        ViewSettings::Table(source) => {
            let table = match source {
                TableSource::Template(path) => {
                    let markup = std::fs::read_to_string(path)
                        .with_context(|| format!("read table template {}", path.display()))?;
                    HtmlTable::parse(&markup)?
                }
                TableSource::Columns(columns) => HtmlTable::from_columns(
                    &settings.column_attribute,
                    columns.iter().map(|c| (c.key.clone(), c.label.clone())),
                ),
            };
            let table = Arc::new(Mutex::new(table));
            let pager = Arc::new(Mutex::new(PagerState::default()));

            let mut config = LiveTableConfig::new(settings.page_url.clone(), &settings.data_url)
                .with_period(settings.period)
                .with_page_key(&settings.page_key)
                .with_column_attribute(&settings.column_attribute);
            if let Some(options) = &settings.transform {
                config = config.with_mangle(ca_mangler(options.clone()));
            }

            let (live, handle) = LiveTable::new(config, fetcher, table.clone())?;
            let pager_task = Paginator::spawn(handle.subscribe_new_page(), pager.clone());
            let table_task = live.spawn(visibility.subscribe());
            Ok((
                Watched::Table {
                    table,
                    pager,
                    handle,
                },
                vec![table_task, pager_task],
            ))
        }
        ViewSettings::Fragment { selector } => {
            let fragment = Arc::new(Mutex::new(HtmlFragment::default()));
            let config = FragmentConfig::new(settings.page_url.clone(), selector.clone())
                .with_period(settings.period);
            let (reloader, handle) = FragmentReloader::new(config, fetcher, fragment.clone())?;
            let task = reloader.spawn(visibility.subscribe());
            Ok((
                Watched::Fragment {
                    selector: selector.clone(),
                    fragment,
                    handle,
                },
                vec![task],
            ))
        }
    }
}

async fn print_once(watched: &Watched) -> Result<()> {
    match watched {
        Watched::Table { table, handle, .. } => {
            let mut status = handle.status_receiver();
            let settled = tokio::time::timeout(
                ONCE_TIMEOUT,
                status.wait_for(|s| s.fetches > 0 && !s.in_flight),
            )
            .await
            .context("timed out waiting for the first refresh")??
            .clone();
            if settled.renders == 0 {
                bail!("first refresh produced no rows (see log for details)");
            }

            let table = table.lock();
            let labels: Vec<_> = table.headers().iter().map(|h| h.label.as_str()).collect();
            println!("{}", labels.join("\t"));
            for row in &table.body().rows {
                println!("{}", row.cells.join("\t"));
            }
            if let (Some(page), Some(total)) = (settled.current_page, settled.total) {
                println!("-- page {page}/{total}");
            }
        }
        Watched::Fragment {
            fragment, handle, ..
        } => {
            let mut status = handle.status_receiver();
            let settled = tokio::time::timeout(
                ONCE_TIMEOUT,
                status.wait_for(|s| s.fetches > 0 && !s.in_flight),
            )
            .await
            .context("timed out waiting for the first reload")??
            .clone();
            if settled.replacements == 0 {
                bail!("first reload found no fragment (see log for details)");
            }
            println!("{}", fragment.lock().text());
        }
    }
    Ok(())
}
