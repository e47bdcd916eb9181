//! Call duration timer.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Whole-second call duration, published through a watch channel.
///
/// Started on entry to the connected state and stopped on every exit path;
/// the final value stays readable after the call ends until `reset`.
pub struct CallTimer {
    seconds: Arc<watch::Sender<u64>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for CallTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CallTimer {
    pub fn new() -> Self {
        let (seconds, _) = watch::channel(0);
        Self {
            seconds: Arc::new(seconds),
            task: Mutex::new(None),
        }
    }

    /// Observe the elapsed whole seconds.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.seconds.subscribe()
    }

    pub fn elapsed(&self) -> u64 {
        *self.seconds.borrow()
    }

    /// Begin ticking. No-op while already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let seconds = self.seconds.clone();
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                seconds.send_modify(|s| *s += 1);
            }
        }));
    }

    /// Stop ticking, keeping the elapsed value.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Stop and zero, for the next call attempt.
    pub fn reset(&self) {
        self.stop();
        let _ = self.seconds.send(0);
    }
}

impl Drop for CallTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, timeout};

    #[tokio::test(start_paused = true)]
    async fn counts_whole_seconds_while_running() {
        let timer = CallTimer::new();
        let mut rx = timer.subscribe();
        timer.start();

        advance(Duration::from_secs(3)).await;
        timeout(Duration::from_secs(1), rx.wait_for(|s| *s >= 3))
            .await
            .expect("timer never reached 3s")
            .expect("timer channel closed");
    }

    #[tokio::test(start_paused = true)]
    async fn stop_freezes_and_reset_zeroes() {
        let timer = CallTimer::new();
        let mut rx = timer.subscribe();
        timer.start();

        advance(Duration::from_secs(2)).await;
        timeout(Duration::from_secs(1), rx.wait_for(|s| *s >= 2))
            .await
            .expect("timer never reached 2s")
            .expect("timer channel closed");

        timer.stop();
        let frozen = timer.elapsed();
        advance(Duration::from_secs(5)).await;
        assert_eq!(timer.elapsed(), frozen);

        timer.reset();
        assert_eq!(timer.elapsed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn start_while_running_is_a_noop() {
        let timer = CallTimer::new();
        let mut rx = timer.subscribe();
        timer.start();
        timer.start();

        advance(Duration::from_secs(1)).await;
        timeout(Duration::from_secs(1), rx.wait_for(|s| *s >= 1))
            .await
            .expect("timer never ticked")
            .expect("timer channel closed");
        // A second task would double-count.
        assert_eq!(timer.elapsed(), 1);
    }
}
