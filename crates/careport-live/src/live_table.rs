//! Polling table bound to a JSON list endpoint.
//!
//! A [`LiveTable`] runs as one task that owns its page state and its view. It
//! reacts to one event at a time: handle commands, visibility transitions,
//! fetch completions and timer expiries. Between a refresh and its completion
//! exactly one of {request, timer} is outstanding, never both.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::BindError;
use crate::fetch::{FetchOutcome, FetchRequest, FetchResult, Fetcher};
use crate::payload::PageData;
use crate::query::Query;
use crate::schedule::{Lifecycle, Wake};
use crate::table::{TableRenderer, TableView, DEFAULT_COLUMN_ATTRIBUTE};
use crate::visibility::VisibilityEvent;

pub const DEFAULT_PERIOD: Duration = Duration::from_millis(10_000);
pub const DEFAULT_PAGE_KEY: &str = "page";

const NEW_PAGE_CAPACITY: usize = 16;

/// Rewrites a payload between parsing and rendering.
pub type Mangle = Arc<dyn Fn(PageData) -> PageData + Send + Sync>;

#[derive(Clone)]
pub struct LiveTableConfig {
    /// Address of the page the table lives on; its query is carried into
    /// every request.
    pub page_url: Url,
    /// Data endpoint, resolved against `page_url`. Empty means the page itself.
    pub url: String,
    pub period: Duration,
    pub page_key: String,
    /// Header-cell attribute naming each column's record field.
    pub column_attribute: String,
    pub mangle: Option<Mangle>,
}

impl LiveTableConfig {
    pub fn new(page_url: Url, url: impl Into<String>) -> Self {
        Self {
            page_url,
            url: url.into(),
            period: DEFAULT_PERIOD,
            page_key: DEFAULT_PAGE_KEY.to_string(),
            column_attribute: DEFAULT_COLUMN_ATTRIBUTE.to_string(),
            mangle: None,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn with_page_key(mut self, page_key: impl Into<String>) -> Self {
        self.page_key = page_key.into();
        self
    }

    pub fn with_column_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.column_attribute = attribute.into();
        self
    }

    pub fn with_mangle(mut self, mangle: Mangle) -> Self {
        self.mangle = Some(mangle);
        self
    }
}

impl fmt::Debug for LiveTableConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTableConfig")
            .field("page_url", &self.page_url.as_str())
            .field("url", &self.url)
            .field("period", &self.period)
            .field("page_key", &self.page_key)
            .field("column_attribute", &self.column_attribute)
            .field("mangle", &self.mangle.is_some())
            .finish()
    }
}

/// Page position announced whenever `(page, total)` changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewPage {
    pub page: u32,
    pub total: u32,
}

/// Snapshot of a table's scheduler, republished after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus {
    pub in_flight: bool,
    pub timer_armed: bool,
    pub next_page: u32,
    pub current_page: Option<u32>,
    pub total: Option<u32>,
    /// Requests issued.
    pub fetches: u64,
    pub failures: u64,
    /// Payloads rendered.
    pub renders: u64,
}

#[derive(Debug)]
enum Command {
    Update,
    GotoPage(u32),
    Stop,
    Shutdown,
}

/// Caller side of a bound table. Holds no [`NewPage`] sender, so
/// subscribers see the channel close once the table task is gone.
#[derive(Debug)]
pub struct LiveTableHandle {
    commands: mpsc::UnboundedSender<Command>,
    new_page: broadcast::Receiver<NewPage>,
    status: watch::Receiver<PollStatus>,
}

impl Clone for LiveTableHandle {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            new_page: self.new_page.resubscribe(),
            status: self.status.clone(),
        }
    }
}

impl LiveTableHandle {
    /// Refresh right away.
    pub fn update(&self) {
        self.send(Command::Update);
    }

    /// Request `page` and refresh right away.
    pub fn goto_page(&self, page: u32) {
        self.send(Command::GotoPage(page));
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn subscribe_new_page(&self) -> broadcast::Receiver<NewPage> {
        self.new_page.resubscribe()
    }

    pub fn status(&self) -> PollStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(target: "careport::live_table", "table task already finished");
        }
    }
}

pub struct LiveTable<V> {
    endpoint: Url,
    query: Query,
    page_key: String,
    next_page: u32,
    current_page: Option<u32>,
    total: Option<u32>,
    mangle: Option<Mangle>,
    fetcher: Arc<dyn Fetcher>,
    renderer: TableRenderer,
    view: V,
    /// Request behind the outstanding fetch.
    pending_url: Option<Url>,
    /// Request whose payload is on screen; only it may be fetched conditionally.
    rendered_url: Option<Url>,
    lifecycle: Lifecycle<FetchResult>,
    wake_rx: mpsc::UnboundedReceiver<Wake<FetchResult>>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    new_page: broadcast::Sender<NewPage>,
    status: watch::Sender<PollStatus>,
    fetches: u64,
    failures: u64,
    renders: u64,
}

impl<V: TableView + 'static> LiveTable<V> {
    /// Binds `view` to `config`. Nothing is fetched until [`LiveTable::spawn`].
    pub fn new(
        config: LiveTableConfig,
        fetcher: Arc<dyn Fetcher>,
        view: V,
    ) -> Result<(Self, LiveTableHandle), BindError> {
        let endpoint = config
            .page_url
            .join(&config.url)
            .map_err(|source| BindError::InvalidUrl {
                url: config.url.clone(),
                source,
            })?;
        let query = Query::from_url(&config.page_url);
        let next_page = initial_page(&query, &config.page_key);

        let (lifecycle, wake_rx) = Lifecycle::new(config.period);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (new_page, new_page_rx) = broadcast::channel(NEW_PAGE_CAPACITY);
        let (status, status_rx) = watch::channel(PollStatus {
            next_page,
            ..PollStatus::default()
        });

        let handle = LiveTableHandle {
            commands: commands_tx,
            new_page: new_page_rx,
            status: status_rx,
        };
        let table = Self {
            endpoint,
            query,
            page_key: config.page_key,
            next_page,
            current_page: None,
            total: None,
            mangle: config.mangle,
            fetcher,
            renderer: TableRenderer::new(config.column_attribute),
            view,
            pending_url: None,
            rendered_url: None,
            lifecycle,
            wake_rx,
            commands_rx,
            new_page,
            status,
            fetches: 0,
            failures: 0,
            renders: 0,
        };
        Ok((table, handle))
    }

    /// Starts the table task: one immediate refresh, then polling until
    /// shutdown. `visibility` suspends and resumes polling.
    pub fn spawn(self, visibility: broadcast::Receiver<VisibilityEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(visibility))
    }

    async fn run(mut self, mut visibility: broadcast::Receiver<VisibilityEvent>) {
        info!(
            target: "careport::live_table",
            url = %self.endpoint,
            page = self.next_page,
            "live table bound"
        );
        self.refresh_now();
        self.publish_status();

        let mut visibility_open = true;
        loop {
            tokio::select! {
                Some(wake) = self.wake_rx.recv() => self.on_wake(wake),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Update) => self.refresh_now(),
                    Some(Command::GotoPage(page)) => {
                        self.next_page = page.max(1);
                        self.refresh_now();
                    }
                    Some(Command::Stop) => self.stop(),
                    Some(Command::Shutdown) | None => {
                        self.stop();
                        self.publish_status();
                        break;
                    }
                },
                event = visibility.recv(), if visibility_open => match event {
                    Ok(VisibilityEvent::Shown) => self.refresh_now(),
                    Ok(VisibilityEvent::Hidden) => self.stop(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "careport::live_table", skipped, "missed visibility events");
                    }
                    Err(RecvError::Closed) => visibility_open = false,
                },
            }
            self.publish_status();
        }
        debug!(target: "careport::live_table", url = %self.endpoint, "live table finished");
    }

    /// Fetches the next page now. Any pending timer is cancelled and any
    /// in-flight request is superseded.
    fn refresh_now(&mut self) {
        if self.lifecycle.in_flight() {
            debug!(target: "careport::live_table", "superseding in-flight request");
        }
        let url = self.request_url();
        let conditional = self.rendered_url.as_ref() == Some(&url);
        let request = FetchRequest::json(url.clone()).conditional(conditional);
        self.pending_url = Some(url);
        debug!(
            target: "careport::live_table",
            url = %request.url,
            page = self.next_page,
            conditional,
            "refreshing"
        );
        let fetcher = Arc::clone(&self.fetcher);
        self.lifecycle
            .begin(async move { fetcher.fetch(request).await });
        self.fetches += 1;
    }

    /// Arms the period timer unless something is already outstanding.
    fn schedule_next(&mut self) {
        if !self.lifecycle.arm() {
            debug!(
                target: "careport::live_table",
                in_flight = self.lifecycle.in_flight(),
                timer_armed = self.lifecycle.timer_armed(),
                "skip arming, already in progress"
            );
        }
    }

    fn stop(&mut self) {
        if self.lifecycle.stop() {
            debug!(target: "careport::live_table", "polling stopped");
        }
    }

    fn on_wake(&mut self, wake: Wake<FetchResult>) {
        match wake {
            Wake::Fetched { ticket, result } => {
                if !self.lifecycle.settle(ticket) {
                    debug!(target: "careport::live_table", ticket, "discarding stale response");
                    return;
                }
                let url = self.pending_url.take();
                match result {
                    Ok(FetchOutcome::Modified(body)) => {
                        if self.have_data(&body) {
                            self.rendered_url = url;
                        }
                    }
                    Ok(FetchOutcome::NotModified) => {
                        debug!(target: "careport::live_table", "not modified");
                    }
                    Err(err) => {
                        self.failures += 1;
                        self.next_page = self.current_page.unwrap_or(1);
                        warn!(
                            target: "careport::live_table",
                            url = %self.endpoint,
                            error = %err,
                            next_page = self.next_page,
                            "request failed"
                        );
                    }
                }
                self.schedule_next();
            }
            Wake::Expired { ticket } => {
                if self.lifecycle.expire(ticket) {
                    self.refresh_now();
                }
            }
        }
    }

    /// Renders a payload. `false` when it was unusable and nothing changed.
    fn have_data(&mut self, body: &str) -> bool {
        let data = match PageData::from_json(body) {
            Ok(data) => data,
            Err(err) => {
                warn!(
                    target: "careport::live_table",
                    url = %self.endpoint,
                    error = %err,
                    "ignoring unusable payload"
                );
                return false;
            }
        };
        let data = match &self.mangle {
            Some(mangle) => mangle(data),
            None => data,
        };

        self.renderer.render(&mut self.view, &data.object_list);
        self.renders += 1;

        if self.current_page != Some(data.page) || self.total != Some(data.total) {
            let _ = self.new_page.send(NewPage {
                page: data.page,
                total: data.total,
            });
        }
        self.current_page = Some(data.page);
        self.total = Some(data.total);
        true
    }

    fn request_url(&self) -> Url {
        let page = Query::from_iter([(self.page_key.clone(), self.next_page)]);
        Query::from_url(&self.endpoint)
            .merge(&self.query)
            .merge(&page)
            .apply_to(&self.endpoint)
    }

    fn publish_status(&self) {
        let status = PollStatus {
            in_flight: self.lifecycle.in_flight(),
            timer_armed: self.lifecycle.timer_armed(),
            next_page: self.next_page,
            current_page: self.current_page,
            total: self.total,
            fetches: self.fetches,
            failures: self.failures,
            renders: self.renders,
        };
        debug_assert!(
            !(status.in_flight && status.timer_armed),
            "request and timer outstanding together"
        );
        self.status.send_replace(status);
    }
}

fn initial_page(query: &Query, page_key: &str) -> u32 {
    query
        .get_first(page_key, "1")
        .trim()
        .parse::<u32>()
        .ok()
        .filter(|page| *page > 0)
        .unwrap_or(1)
}
