use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::live_table::NewPage;

/// Pager controls next to a live table.
pub trait PagerView: Send {
    fn set_label(&mut self, label: String);
    fn set_previous_hidden(&mut self, hidden: bool);
    fn set_next_hidden(&mut self, hidden: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagerState {
    pub label: String,
    pub previous_hidden: bool,
    pub next_hidden: bool,
}

impl PagerView for PagerState {
    fn set_label(&mut self, label: String) {
        self.label = label;
    }

    fn set_previous_hidden(&mut self, hidden: bool) {
        self.previous_hidden = hidden;
    }

    fn set_next_hidden(&mut self, hidden: bool) {
        self.next_hidden = hidden;
    }
}

impl<T: PagerView> PagerView for Arc<Mutex<T>> {
    fn set_label(&mut self, label: String) {
        self.lock().set_label(label)
    }

    fn set_previous_hidden(&mut self, hidden: bool) {
        self.lock().set_previous_hidden(hidden)
    }

    fn set_next_hidden(&mut self, hidden: bool) {
        self.lock().set_next_hidden(hidden)
    }
}

/// Mirrors a table's page position onto pager controls. It only listens;
/// moving between pages is up to whoever owns the table handle.
pub struct Paginator;

impl Paginator {
    pub fn apply<V: PagerView + ?Sized>(view: &mut V, page: NewPage) {
        view.set_label(format!("{}/{}", page.page, page.total));
        view.set_previous_hidden(page.page <= 1);
        view.set_next_hidden(page.page >= page.total);
    }

    pub fn spawn<V: PagerView + 'static>(
        mut events: broadcast::Receiver<NewPage>,
        mut view: V,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(page) => {
                        debug!(target: "careport::pagination", page = page.page, total = page.total, "new page");
                        Self::apply(&mut view, page);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(target: "careport::pagination", skipped, "pager fell behind table");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_hides_previous() {
        let mut pager = PagerState::default();
        Paginator::apply(&mut pager, NewPage { page: 1, total: 3 });
        assert_eq!(
            pager,
            PagerState {
                label: "1/3".into(),
                previous_hidden: true,
                next_hidden: false,
            }
        );
    }

    #[test]
    fn last_page_hides_next() {
        let mut pager = PagerState::default();
        Paginator::apply(&mut pager, NewPage { page: 3, total: 3 });
        assert_eq!(pager.label, "3/3");
        assert!(!pager.previous_hidden);
        assert!(pager.next_hidden);
    }

    #[test]
    fn single_page_hides_both() {
        let mut pager = PagerState::default();
        Paginator::apply(&mut pager, NewPage { page: 1, total: 1 });
        assert!(pager.previous_hidden && pager.next_hidden);
    }

    #[tokio::test]
    async fn follows_new_page_events_until_closed() {
        let (tx, rx) = broadcast::channel(4);
        let pager = Arc::new(Mutex::new(PagerState::default()));
        let task = Paginator::spawn(rx, pager.clone());

        tx.send(NewPage { page: 2, total: 5 }).unwrap();
        drop(tx);
        task.await.expect("pager task");

        let pager = pager.lock();
        assert_eq!(pager.label, "2/5");
        assert!(!pager.previous_hidden);
        assert!(!pager.next_hidden);
    }
}
