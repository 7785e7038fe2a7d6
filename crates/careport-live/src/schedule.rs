//! Request/timer bookkeeping shared by the live views.
//!
//! A [`Lifecycle`] holds at most one in-flight request and at most one pending
//! timer. Both run as child tasks that report back over a channel tagged with a
//! ticket; a report whose ticket is no longer current is stale and must be
//! dropped by the owner.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub(crate) type Ticket = u64;

#[derive(Debug)]
pub(crate) enum Wake<T> {
    Fetched { ticket: Ticket, result: T },
    Expired { ticket: Ticket },
}

#[derive(Debug)]
struct Outstanding {
    ticket: Ticket,
    handle: JoinHandle<()>,
}

impl Outstanding {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
pub(crate) struct Lifecycle<T> {
    period: Duration,
    in_flight: Option<Outstanding>,
    timer: Option<Outstanding>,
    last_ticket: Ticket,
    wake_tx: mpsc::UnboundedSender<Wake<T>>,
}

impl<T: Send + 'static> Lifecycle<T> {
    pub(crate) fn new(period: Duration) -> (Self, mpsc::UnboundedReceiver<Wake<T>>) {
        let (wake_tx, wake_rx) = mpsc::unbounded_channel();
        (
            Self {
                period,
                in_flight: None,
                timer: None,
                last_ticket: 0,
                wake_tx,
            },
            wake_rx,
        )
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn timer_armed(&self) -> bool {
        self.timer.is_some()
    }

    /// Starts `request`, superseding any pending timer or in-flight request.
    pub(crate) fn begin<F>(&mut self, request: F) -> Ticket
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.cancel_timer();
        self.cancel_request();
        let ticket = self.issue();
        let wake_tx = self.wake_tx.clone();
        let handle = tokio::spawn(async move {
            let result = request.await;
            let _ = wake_tx.send(Wake::Fetched { ticket, result });
        });
        self.in_flight = Some(Outstanding { ticket, handle });
        ticket
    }

    /// Arms the period timer unless a request or a timer is already active.
    pub(crate) fn arm(&mut self) -> bool {
        if self.in_flight.is_some() || self.timer.is_some() {
            return false;
        }
        let ticket = self.issue();
        let period = self.period;
        let wake_tx = self.wake_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(period).await;
            let _ = wake_tx.send(Wake::Expired { ticket });
        });
        self.timer = Some(Outstanding { ticket, handle });
        true
    }

    /// Clears the in-flight marker if `ticket` names the current request.
    pub(crate) fn settle(&mut self, ticket: Ticket) -> bool {
        match &self.in_flight {
            Some(current) if current.ticket == ticket => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Clears the timer marker if `ticket` names the current timer.
    pub(crate) fn expire(&mut self, ticket: Ticket) -> bool {
        match &self.timer {
            Some(current) if current.ticket == ticket => {
                self.timer = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn cancel_timer(&mut self) -> bool {
        self.timer.take().map(Outstanding::cancel).is_some()
    }

    pub(crate) fn cancel_request(&mut self) -> bool {
        self.in_flight.take().map(Outstanding::cancel).is_some()
    }

    /// Cancels both; returns whether anything was outstanding.
    pub(crate) fn stop(&mut self) -> bool {
        let request = self.cancel_request();
        let timer = self.cancel_timer();
        request || timer
    }

    fn issue(&mut self) -> Ticket {
        self.last_ticket += 1;
        self.last_ticket
    }
}

impl<T> Drop for Lifecycle<T> {
    fn drop(&mut self) {
        if let Some(outstanding) = self.in_flight.take() {
            outstanding.handle.abort();
        }
        if let Some(outstanding) = self.timer.take() {
            outstanding.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn arm_is_refused_while_request_in_flight() {
        let (mut lifecycle, mut wake_rx) = Lifecycle::<u32>::new(Duration::from_secs(10));
        let ticket = lifecycle.begin(async { 7 });
        assert!(lifecycle.in_flight());
        assert!(!lifecycle.arm());
        assert!(!lifecycle.timer_armed());

        match wake_rx.recv().await.expect("wake") {
            Wake::Fetched { ticket: got, result } => {
                assert_eq!(got, ticket);
                assert_eq!(result, 7);
            }
            other => panic!("unexpected wake {other:?}"),
        }
        assert!(lifecycle.settle(ticket));
        assert!(lifecycle.arm());
        assert!(lifecycle.timer_armed());
        assert!(!lifecycle.arm());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_supersedes_timer_and_request() {
        let (mut lifecycle, _wake_rx) = Lifecycle::<()>::new(Duration::from_secs(10));
        assert!(lifecycle.arm());
        let first = lifecycle.begin(std::future::pending());
        assert!(!lifecycle.timer_armed());
        let second = lifecycle.begin(std::future::pending());
        assert_ne!(first, second);
        assert!(!lifecycle.settle(first), "superseded ticket must be stale");
        assert!(lifecycle.in_flight());
        assert!(lifecycle.settle(second));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_reports_expiry_after_period() {
        let (mut lifecycle, mut wake_rx) = Lifecycle::<()>::new(Duration::from_secs(10));
        let started = tokio::time::Instant::now();
        assert!(lifecycle.arm());
        let Wake::Expired { ticket } = wake_rx.recv().await.expect("wake") else {
            panic!("expected expiry");
        };
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(lifecycle.expire(ticket));
        assert!(!lifecycle.expire(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_twice_is_harmless() {
        let (mut lifecycle, mut wake_rx) = Lifecycle::<()>::new(Duration::from_secs(1));
        assert!(lifecycle.arm());
        assert!(lifecycle.stop());
        assert!(!lifecycle.stop());
        assert!(!lifecycle.in_flight());
        assert!(!lifecycle.timer_armed());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(wake_rx.try_recv().is_err(), "cancelled timer must not fire");
        assert!(lifecycle.arm(), "stop leaves no stale guard behind");
    }
}
