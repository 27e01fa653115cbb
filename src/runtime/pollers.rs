use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde_json::json;

use crate::logging::{LogLevel, json_str};

use super::frame::VisibilitySignal;
use super::hub::EventHub;

/// Queued when the target window appears and the overlay becomes visible.
pub const FOCUS_SHOWN_EVENT: &str = "overlay-shown";
/// Queued when the target window goes away and the overlay hides.
pub const FOCUS_HIDDEN_EVENT: &str = "overlay-hidden";

/// Background thread calling `tick` every `interval` until stopped or until
/// `tick` returns false.
pub struct PeriodicPoller {
    name: String,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl PeriodicPoller {
    pub fn spawn<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let worker = thread::Builder::new()
            .name(format!("overlay-poller:{name}"))
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    if !tick() {
                        break;
                    }
                    thread::park_timeout(interval);
                }
                flag.store(false, Ordering::Release);
            })?;
        Ok(Self {
            name: name.to_string(),
            running,
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the thread and wait for it. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            let _ = worker.join();
        }
    }
}

impl Drop for PeriodicPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reports whether the window the overlay is attached to is currently present.
pub trait ForegroundProbe: Send + 'static {
    fn target_present(&mut self) -> bool;
}

impl<F> ForegroundProbe for F
where
    F: FnMut() -> bool + Send + 'static,
{
    fn target_present(&mut self) -> bool {
        self()
    }
}

/// Polls a [`ForegroundProbe`] and flips the overlay's visibility.
///
/// Each transition writes the [`VisibilitySignal`] and queues
/// `overlay-shown` or `overlay-hidden`. Stops once the hub closes.
pub struct FocusPoller {
    poller: PeriodicPoller,
}

impl FocusPoller {
    pub fn spawn<P>(
        mut probe: P,
        interval: Duration,
        visibility: VisibilitySignal,
        hub: EventHub,
    ) -> io::Result<Self>
    where
        P: ForegroundProbe,
    {
        let poller = PeriodicPoller::spawn("focus", interval, move || {
            if hub.is_closed() {
                return false;
            }
            let present = probe.target_present();
            let was_visible = visibility.set_visible(present);
            if present != was_visible {
                let event = if present {
                    FOCUS_SHOWN_EVENT
                } else {
                    FOCUS_HIDDEN_EVENT
                };
                hub.log(
                    LogLevel::Debug,
                    "overlay::frame",
                    "visibility_changed",
                    [json_str("event", event)],
                );
                hub.queue_event(event, Some(json!({ "visible": present })));
            }
            true
        })?;
        Ok(Self { poller })
    }

    pub fn is_running(&self) -> bool {
        self.poller.is_running()
    }

    pub fn stop(&mut self) {
        self.poller.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::Mutex;
    use std::sync::mpsc;
    use std::time::Instant;

    fn wait_until(mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn poller_ticks_until_stopped() {
        let (tx, rx) = mpsc::channel();
        let mut poller = PeriodicPoller::spawn("test", Duration::from_millis(1), move || {
            tx.send(()).is_ok()
        })
        .unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        poller.stop();
        assert!(!poller.is_running());
        poller.stop();
    }

    #[test]
    fn poller_ends_when_tick_declines() {
        let poller = PeriodicPoller::spawn("once", Duration::from_millis(1), || false).unwrap();
        assert!(wait_until(|| !poller.is_running()));
    }

    #[test]
    fn focus_changes_flip_visibility_and_queue_events() {
        let hub = EventHub::new(&SchedulerConfig::default());
        let visibility = VisibilitySignal::new(false);
        let script = Arc::new(Mutex::new(vec![true, true, false]));
        let feed = Arc::clone(&script);
        let probe = move || {
            let mut steps = feed.lock().unwrap();
            if steps.is_empty() { false } else { steps.remove(0) }
        };

        let mut poller =
            FocusPoller::spawn(probe, Duration::from_millis(1), visibility.clone(), hub.clone())
                .unwrap();
        assert!(wait_until(|| script.lock().unwrap().is_empty()));
        poller.stop();

        let names: Vec<_> = hub
            .drain_events()
            .iter()
            .map(|event| event.name().to_string())
            .collect();
        assert_eq!(names, vec![FOCUS_SHOWN_EVENT, FOCUS_HIDDEN_EVENT]);
        assert!(!visibility.is_visible());
    }
}
