//! Periodic reload of one fragment of the current page.
//!
//! The reloader asks the server for the page it is bound to (full query
//! string included), picks the fragment matching its selector out of the
//! fresh document, and swaps it in. It follows the same visibility and
//! single-request/single-timer rules as [`crate::live_table`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use scraper::{Html, Selector};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::BindError;
use crate::fetch::{FetchOutcome, FetchRequest, FetchResult, Fetcher};
use crate::live_table::DEFAULT_PERIOD;
use crate::schedule::{Lifecycle, Wake};
use crate::visibility::VisibilityEvent;

pub trait FragmentView: Send {
    /// Replaces the bound fragment with `outer_html`.
    fn replace(&mut self, outer_html: String);
}

impl<T: FragmentView> FragmentView for Arc<Mutex<T>> {
    fn replace(&mut self, outer_html: String) {
        self.lock().replace(outer_html)
    }
}

/// Holds the latest markup of a fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlFragment {
    html: String,
    replacements: u64,
}

impl HtmlFragment {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            replacements: 0,
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn replacements(&self) -> u64 {
        self.replacements
    }

    /// Visible text of the fragment, whitespace-collapsed.
    pub fn text(&self) -> String {
        let fragment = Html::parse_fragment(&self.html);
        fragment
            .root_element()
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl FragmentView for HtmlFragment {
    fn replace(&mut self, outer_html: String) {
        self.html = outer_html;
        self.replacements += 1;
    }
}

#[derive(Debug, Clone)]
pub struct FragmentConfig {
    /// The page to re-request; the fragment is cut out of its response.
    pub page_url: Url,
    pub selector: String,
    pub period: Duration,
}

impl FragmentConfig {
    pub fn new(page_url: Url, selector: impl Into<String>) -> Self {
        Self {
            page_url,
            selector: selector.into(),
            period: DEFAULT_PERIOD,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentStatus {
    pub in_flight: bool,
    pub timer_armed: bool,
    pub fetches: u64,
    pub failures: u64,
    pub replacements: u64,
}

#[derive(Debug)]
enum Command {
    Update,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct FragmentHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<FragmentStatus>,
}

impl FragmentHandle {
    pub fn update(&self) {
        self.send(Command::Update);
    }

    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn status(&self) -> FragmentStatus {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<FragmentStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(target: "careport::fragment", "fragment task already finished");
        }
    }
}

pub struct FragmentReloader<V> {
    page_url: Url,
    selector_text: String,
    selector: Selector,
    fetcher: Arc<dyn Fetcher>,
    view: V,
    lifecycle: Lifecycle<FetchResult>,
    wake_rx: mpsc::UnboundedReceiver<Wake<FetchResult>>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<FragmentStatus>,
    fetches: u64,
    failures: u64,
    replacements: u64,
}

impl<V: FragmentView + 'static> FragmentReloader<V> {
    pub fn new(
        config: FragmentConfig,
        fetcher: Arc<dyn Fetcher>,
        view: V,
    ) -> Result<(Self, FragmentHandle), BindError> {
        let selector =
            Selector::parse(&config.selector).map_err(|err| BindError::InvalidSelector {
                selector: config.selector.clone(),
                message: err.to_string(),
            })?;
        let (lifecycle, wake_rx) = Lifecycle::new(config.period);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(FragmentStatus::default());

        let reloader = Self {
            page_url: config.page_url,
            selector_text: config.selector,
            selector,
            fetcher,
            view,
            lifecycle,
            wake_rx,
            commands_rx,
            status,
            fetches: 0,
            failures: 0,
            replacements: 0,
        };
        let handle = FragmentHandle {
            commands: commands_tx,
            status: status_rx,
        };
        Ok((reloader, handle))
    }

    pub fn spawn(self, visibility: broadcast::Receiver<VisibilityEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(visibility))
    }

    async fn run(mut self, mut visibility: broadcast::Receiver<VisibilityEvent>) {
        info!(
            target: "careport::fragment",
            url = %self.page_url,
            selector = %self.selector_text,
            "fragment reloader bound"
        );
        self.refresh_now();
        self.publish_status();

        let mut visibility_open = true;
        loop {
            tokio::select! {
                Some(wake) = self.wake_rx.recv() => self.on_wake(wake),
                command = self.commands_rx.recv() => match command {
                    Some(Command::Update) => self.refresh_now(),
                    Some(Command::Stop) => { self.lifecycle.stop(); }
                    Some(Command::Shutdown) | None => {
                        self.lifecycle.stop();
                        self.publish_status();
                        break;
                    }
                },
                event = visibility.recv(), if visibility_open => match event {
                    Ok(VisibilityEvent::Shown) => self.refresh_now(),
                    Ok(VisibilityEvent::Hidden) => { self.lifecycle.stop(); }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "careport::fragment", skipped, "missed visibility events");
                    }
                    Err(RecvError::Closed) => visibility_open = false,
                },
            }
            self.publish_status();
        }
    }

    fn refresh_now(&mut self) {
        let request = FetchRequest::html(self.page_url.clone()).conditional(self.replacements > 0);
        let fetcher = Arc::clone(&self.fetcher);
        self.lifecycle
            .begin(async move { fetcher.fetch(request).await });
        self.fetches += 1;
    }

    fn on_wake(&mut self, wake: Wake<FetchResult>) {
        match wake {
            Wake::Fetched { ticket, result } => {
                if !self.lifecycle.settle(ticket) {
                    return;
                }
                match result {
                    Ok(FetchOutcome::Modified(body)) if !body.trim().is_empty() => {
                        self.have_document(&body)
                    }
                    Ok(_) => debug!(target: "careport::fragment", "nothing new"),
                    Err(err) => {
                        self.failures += 1;
                        warn!(
                            target: "careport::fragment",
                            url = %self.page_url,
                            error = %err,
                            "reload failed"
                        );
                    }
                }
                self.lifecycle.arm();
            }
            Wake::Expired { ticket } => {
                if self.lifecycle.expire(ticket) {
                    self.refresh_now();
                }
            }
        }
    }

    fn have_document(&mut self, body: &str) {
        match extract_fragment(body, &self.selector) {
            Some(fragment) => {
                self.view.replace(fragment);
                self.replacements += 1;
            }
            None => warn!(
                target: "careport::fragment",
                selector = %self.selector_text,
                "reloaded page has no matching fragment"
            ),
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(FragmentStatus {
            in_flight: self.lifecycle.in_flight(),
            timer_armed: self.lifecycle.timer_armed(),
            fetches: self.fetches,
            failures: self.failures,
            replacements: self.replacements,
        });
    }
}

/// Outer HTML of the first element of `document` matching `selector`.
pub fn extract_fragment(document: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(document);
    let html = document.select(selector).next().map(|element| element.html());
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    use crate::visibility::VisibilitySignal;

    struct Pages {
        bodies: Mutex<VecDeque<FetchResult>>,
        accepts: Mutex<Vec<crate::fetch::Accept>>,
        conditional: Mutex<Vec<bool>>,
    }

    #[async_trait]
    impl Fetcher for Pages {
        async fn fetch(&self, request: FetchRequest) -> FetchResult {
            self.accepts.lock().push(request.accept);
            self.conditional.lock().push(request.conditional);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let next = self.bodies.lock().pop_front();
            next.unwrap_or(Ok(FetchOutcome::NotModified))
        }
    }

    fn page(count: u32) -> FetchResult {
        Ok(FetchOutcome::Modified(format!(
            "<html><body><h1>Beacons</h1><div id=\"summary\"><b>{count}</b> servers</div></body></html>"
        )))
    }

    #[test]
    fn extracts_first_match() {
        let selector = Selector::parse("#summary").unwrap();
        let doc = "<div id=\"summary\">one</div><div id=\"summary\">two</div>";
        assert_eq!(
            extract_fragment(doc, &selector).as_deref(),
            Some("<div id=\"summary\">one</div>")
        );
        assert!(extract_fragment("<p>nothing</p>", &selector).is_none());
    }

    #[test]
    fn fragment_text_collapses_whitespace() {
        let fragment = HtmlFragment::new("<div>\n  <b>12</b>\n servers </div>");
        assert_eq!(fragment.text(), "12 servers");
    }

    #[test]
    fn rejects_bad_selector() {
        let pages = Arc::new(Pages {
            bodies: Mutex::new(VecDeque::new()),
            accepts: Mutex::new(Vec::new()),
            conditional: Mutex::new(Vec::new()),
        });
        let config = FragmentConfig::new(Url::parse("http://obs.example/").unwrap(), "div[");
        let err = FragmentReloader::new(config, pages, HtmlFragment::default())
            .err()
            .expect("invalid selector");
        assert!(matches!(err, BindError::InvalidSelector { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn reloads_and_skips_unusable_responses() {
        let pages = Arc::new(Pages {
            bodies: Mutex::new(VecDeque::from([
                page(3),
                Ok(FetchOutcome::NotModified),
                Ok(FetchOutcome::Modified("   ".into())),
                Ok(FetchOutcome::Modified("<p>moved</p>".into())),
                Err(crate::fetch::FetchError::Transport("reset".into())),
                page(4),
            ])),
            accepts: Mutex::new(Vec::new()),
            conditional: Mutex::new(Vec::new()),
        });
        let view = Arc::new(Mutex::new(HtmlFragment::default()));
        let config = FragmentConfig::new(
            Url::parse("http://obs.example/beacons/?expr=ioc*").unwrap(),
            "#summary",
        )
        .with_period(Duration::from_secs(5));
        let visibility = VisibilitySignal::new();
        let (reloader, handle) =
            FragmentReloader::new(config, pages.clone(), view.clone()).unwrap();
        let mut status = handle.status_receiver();
        let task = reloader.spawn(visibility.subscribe());

        status.wait_for(|s| s.replacements == 1).await.unwrap();
        assert_eq!(view.lock().text(), "3 servers");

        let done = status
            .wait_for(|s| s.replacements == 2)
            .await
            .unwrap()
            .clone();
        assert_eq!(done.fetches, 6);
        assert_eq!(done.failures, 1);
        assert_eq!(view.lock().text(), "4 servers");
        assert_eq!(view.lock().replacements(), 2);
        assert!(pages
            .accepts
            .lock()
            .iter()
            .all(|accept| *accept == crate::fetch::Accept::Html));
        assert_eq!(
            *pages.conditional.lock(),
            [false, true, true, true, true, true],
            "validators are only sent once a fragment is shown"
        );

        visibility.observe(true);
        status
            .wait_for(|s| !s.in_flight && !s.timer_armed)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.status().fetches, 6);

        handle.shutdown();
        task.await.unwrap();
    }
}
