use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How often the background thread re-probes connectivity. Shutdown
/// latency is bounded by this interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background connectivity watcher. One thread polls the probe and keeps a
/// shared flag current; the foreground only ever reads the flag. Stops
/// cooperatively and joins on shutdown.
pub struct ConnectivityMonitor {
    online: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectivityMonitor {
    pub fn start(probe: impl Fn() -> bool + Send + 'static) -> Self {
        let online = Arc::new(AtomicBool::new(probe()));
        let stop = Arc::new(AtomicBool::new(false));
        let worker = thread::spawn({
            let online = online.clone();
            let stop = stop.clone();
            move || {
                while !stop.load(Ordering::SeqCst) {
                    online.store(probe(), Ordering::SeqCst);
                    thread::sleep(POLL_INTERVAL);
                }
            }
        });
        Self {
            online,
            stop,
            worker: Some(worker),
        }
    }

    pub fn online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn monitor_tracks_the_probe() {
        let state = Arc::new(AtomicBool::new(true));
        let probe_state = state.clone();
        let mut monitor = ConnectivityMonitor::start(move || probe_state.load(Ordering::SeqCst));
        assert!(monitor.online());

        state.store(false, Ordering::SeqCst);
        // Give the poll loop a couple of ticks to notice.
        for _ in 0..50 {
            if !monitor.online() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!monitor.online());
        monitor.stop();
    }

    #[test]
    fn stop_joins_and_halts_polling() {
        let polls = Arc::new(AtomicU32::new(0));
        let probe_polls = polls.clone();
        let mut monitor = ConnectivityMonitor::start(move || {
            probe_polls.fetch_add(1, Ordering::SeqCst);
            true
        });
        monitor.stop();
        let after_stop = polls.load(Ordering::SeqCst);
        thread::sleep(POLL_INTERVAL * 3);
        assert_eq!(polls.load(Ordering::SeqCst), after_stop);
    }
}
