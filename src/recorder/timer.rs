//! Session timer
//!
//! Elapsed time is sampled from a monotonic reference taken at start, never
//! accumulated from tick counts, so scheduling jitter cannot make it drift.

use super::manager::RecordingEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const TICK: Duration = Duration::from_secs(1);

pub struct SessionTimer {
    started: Instant,
    elapsed: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
    frozen: Option<u64>,
}

impl SessionTimer {
    /// Start ticking now, publishing each sample as [`RecordingEvent::Tick`]
    pub fn start(events: broadcast::Sender<RecordingEvent>) -> Self {
        let started = Instant::now();
        let elapsed = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(run(started, elapsed.clone(), events));
        Self {
            started,
            elapsed,
            task: Some(task),
            frozen: None,
        }
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.frozen
            .unwrap_or_else(|| self.elapsed.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.frozen.is_none()
    }

    /// Cancel the periodic task and freeze the elapsed value
    pub fn stop(&mut self) -> u64 {
        if let Some(frozen) = self.frozen {
            return frozen;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let last = self.started.elapsed().as_secs();
        let frozen = self.elapsed.fetch_max(last, Ordering::SeqCst).max(last);
        self.frozen = Some(frozen);
        frozen
    }
}

impl Drop for SessionTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(started: Instant, elapsed: Arc<AtomicU64>, events: broadcast::Sender<RecordingEvent>) {
    let mut ticker = tokio::time::interval_at(started + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let seconds = started.elapsed().as_secs();
        elapsed.fetch_max(seconds, Ordering::SeqCst);
        let _ = events.send(RecordingEvent::Tick(seconds));
    }
}

/// Render seconds as `MM:SS`
pub fn format_elapsed(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_follows_monotonic_clock() {
        let (tx, mut rx) = broadcast::channel(16);
        let mut timer = SessionTimer::start(tx);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(timer.elapsed_seconds(), 2);
        assert!(matches!(rx.recv().await.unwrap(), RecordingEvent::Tick(1)));
        assert!(matches!(rx.recv().await.unwrap(), RecordingEvent::Tick(2)));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(timer.stop(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_value() {
        let (tx, _rx) = broadcast::channel(16);
        let mut timer = SessionTimer::start(tx);

        tokio::time::sleep(Duration::from_secs(4)).await;
        let frozen = timer.stop();
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(timer.elapsed_seconds(), frozen);
        assert_eq!(timer.stop(), frozen);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00");
        assert_eq!(format_elapsed(75), "01:15");
        assert_eq!(format_elapsed(3600), "60:00");
    }
}
