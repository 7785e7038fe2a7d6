//! Process-wide "is the view visible" signal.
//!
//! Hosts report raw visibility notifications through [`VisibilitySignal::observe`];
//! subscribers only see actual transitions. [`VisibilitySignal::ready`] forces a
//! `Shown` edge for hosts that attach after their views have started.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 16;

static GLOBAL: Lazy<VisibilitySignal> = Lazy::new(VisibilitySignal::new);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityEvent {
    Shown,
    Hidden,
}

#[derive(Debug)]
pub struct VisibilitySignal {
    hidden: Mutex<Option<bool>>,
    sender: broadcast::Sender<VisibilityEvent>,
}

impl VisibilitySignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            hidden: Mutex::new(None),
            sender,
        }
    }

    /// The instance shared by every view in the process.
    pub fn global() -> &'static VisibilitySignal {
        &GLOBAL
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VisibilityEvent> {
        self.sender.subscribe()
    }

    /// Last flag reported by the host, if any.
    pub fn is_hidden(&self) -> Option<bool> {
        *self.hidden.lock()
    }

    /// Records a host visibility notification and emits an event when the
    /// flag differs from the previous one. The first notification always
    /// counts as a transition.
    pub fn observe(&self, hidden: bool) -> Option<VisibilityEvent> {
        let mut last = self.hidden.lock();
        if *last == Some(hidden) {
            return None;
        }
        let event = if hidden {
            VisibilityEvent::Hidden
        } else {
            VisibilityEvent::Shown
        };
        self.emit(event);
        *last = Some(hidden);
        Some(event)
    }

    /// Startup edge: emits `Shown` regardless of the recorded state.
    pub fn ready(&self) {
        self.emit(VisibilityEvent::Shown);
    }

    fn emit(&self, event: VisibilityEvent) {
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(
            target: "careport::visibility",
            ?event,
            receivers,
            "visibility transition"
        );
    }
}

impl Default for VisibilitySignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn emits_only_on_transitions() {
        let signal = VisibilitySignal::new();
        let mut rx = signal.subscribe();

        assert_eq!(signal.observe(false), Some(VisibilityEvent::Shown));
        assert_eq!(signal.observe(false), None);
        assert_eq!(signal.observe(true), Some(VisibilityEvent::Hidden));
        assert_eq!(signal.observe(true), None);
        assert_eq!(signal.observe(false), Some(VisibilityEvent::Shown));

        assert_eq!(rx.try_recv(), Ok(VisibilityEvent::Shown));
        assert_eq!(rx.try_recv(), Ok(VisibilityEvent::Hidden));
        assert_eq!(rx.try_recv(), Ok(VisibilityEvent::Shown));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(signal.is_hidden(), Some(false));
    }

    #[test]
    fn first_observation_is_a_transition() {
        let signal = VisibilitySignal::new();
        assert_eq!(signal.is_hidden(), None);
        assert_eq!(signal.observe(true), Some(VisibilityEvent::Hidden));
    }

    #[test]
    fn ready_is_unconditional() {
        let signal = VisibilitySignal::new();
        let mut rx = signal.subscribe();
        signal.observe(true);
        signal.ready();
        assert_eq!(rx.try_recv(), Ok(VisibilityEvent::Hidden));
        assert_eq!(rx.try_recv(), Ok(VisibilityEvent::Shown));
        // ready does not touch the recorded flag
        assert_eq!(signal.is_hidden(), Some(true));
    }

    #[test]
    fn late_subscribers_get_no_replay() {
        let signal = VisibilitySignal::new();
        signal.ready();
        signal.observe(true);
        let mut rx = signal.subscribe();
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }
}
