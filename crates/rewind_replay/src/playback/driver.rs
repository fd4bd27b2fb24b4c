//! Real-time driver for a [`PlaybackScheduler`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::scheduler::PlaybackScheduler;
use super::signals::SignalSink;

/// Calls [`PlaybackScheduler::tick`] from a tokio interval with the real
/// time elapsed since the previous tick.
///
/// Must be spawned inside a tokio runtime. The scheduler stays usable from
/// other tasks through the shared mutex.
#[derive(Debug)]
pub struct PlaybackDriver {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl PlaybackDriver {
    pub fn spawn<S>(scheduler: Arc<Mutex<PlaybackScheduler<S>>>, period: Duration) -> Self
    where
        S: SignalSink + Send + 'static,
    {
        let (shutdown, mut stop) = oneshot::channel();
        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = Instant::now();
            loop {
                tokio::select! {
                    _ = &mut stop => break,
                    now = interval.tick() => {
                        let elapsed = now.saturating_duration_since(last);
                        last = now;
                        scheduler.lock().tick(elapsed.as_secs_f64() * 1_000.0);
                    }
                }
            }
            tracing::debug!("playback driver stopped");
        });
        Self {
            shutdown: Some(shutdown),
            task,
        }
    }

    /// Stop ticking and wait for the driver task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "playback driver task failed");
        }
    }
}

impl Drop for PlaybackDriver {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReplayConfig;
    use crate::playback::{PlaybackSignal, PlaybackState};
    use rewind_core::{RecordedSession, SerializedNode, Snapshot};

    fn scheduler() -> Arc<Mutex<PlaybackScheduler<tokio::sync::mpsc::UnboundedSender<PlaybackSignal>>>> {
        let session = RecordedSession::builder("driven")
            .snapshot(Snapshot::full(0.0, vec![SerializedNode::element(1, "body")]))
            .snapshot(Snapshot::meta(10_000.0))
            .build()
            .unwrap();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Arc::new(Mutex::new(
            PlaybackScheduler::with_sink(session, ReplayConfig::testing(), tx).unwrap(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn drives_playback_in_real_time() {
        let shared = scheduler();
        {
            let mut s = shared.lock();
            s.set_speed(2.0);
            s.play();
        }
        let driver = PlaybackDriver::spawn(Arc::clone(&shared), Duration::from_millis(16));

        time::sleep(Duration::from_millis(2_500)).await;
        let halfway = shared.lock().current_time();
        assert!((4_900.0..=5_100.0).contains(&halfway), "at {halfway}");

        time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(shared.lock().state(), PlaybackState::Paused);
        assert_eq!(shared.lock().current_time(), 10_000.0);

        driver.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_scheduler_does_not_move() {
        let shared = scheduler();
        let driver = PlaybackDriver::spawn(Arc::clone(&shared), Duration::from_millis(16));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(shared.lock().current_time(), 0.0);
        driver.shutdown().await;
    }
}
