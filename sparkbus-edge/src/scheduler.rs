use std::time::Duration;

use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::AbortHandle;
use tokio::time::{interval, MissedTickBehavior};

/// The recurring scan timers of one node.
///
/// One timer runs per distinct scan rate across the node's own metrics and
/// all device metrics. Ticks are delivered into the node task so metric
/// evaluation and publishing stay inside the node's serialisation domain.
/// Timers are owned here and aborted on stop; after `stop()` no timer task
/// remains.
pub(crate) struct ScanTimers {
    handles: Vec<AbortHandle>,
}

impl ScanTimers {
    pub fn new() -> Self {
        Self {
            handles: Vec::new(),
        }
    }

    pub fn start(&mut self, rates: Vec<Duration>, tx: UnboundedSender<Duration>) {
        self.stop();
        for rate in rates {
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let mut ticker = interval(rate);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // An interval's first tick completes immediately; the birth
                // snapshot already covered that instant.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if tx.send(rate).is_err() {
                        break;
                    }
                }
            })
            .abort_handle();
            self.handles.push(handle);
        }
        debug!("Started {} scan timer(s)", self.handles.len());
    }

    pub fn stop(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for ScanTimers {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn ticks_arrive_per_rate() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScanTimers::new();
        timers.start(vec![Duration::from_millis(100)], tx);

        for _ in 0..3 {
            let tick = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(tick, Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stop_kills_all_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScanTimers::new();
        timers.start(
            vec![Duration::from_millis(50), Duration::from_millis(70)],
            tx,
        );
        assert_eq!(timers.active_count(), 2);

        timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();

        timers.stop();
        assert_eq!(timers.active_count(), 0);
        // Drain anything already queued, then the channel must stay silent.
        while rx.try_recv().is_ok() {}
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_timers() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = ScanTimers::new();
        timers.start(vec![Duration::from_millis(100)], tx.clone());
        timers.start(vec![Duration::from_millis(200)], tx);
        assert_eq!(timers.active_count(), 1);
        let tick = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tick, Duration::from_millis(200));
    }
}
