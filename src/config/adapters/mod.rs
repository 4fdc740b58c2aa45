//! Concrete [`ConfigAdapter`](super::ConfigAdapter) implementations.
//!
//! Provides the local [`file::FileAdapter`], the HTTP key/value
//! [`consul::ConsulAdapter`] and the Kubernetes ConfigMap
//! [`kubecm::KubecmAdapter`], plus the poll loop they share.

pub mod consul;
pub mod file;
pub mod http;
pub mod kubecm;

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

const fn default_timeout_ms() -> u64 {
    10_000
}

const fn default_remote_interval_ms() -> u64 {
    30_000
}

/// `ms` as a duration, or `default_ms` when `ms` is zero.
const fn millis_or(ms: u64, default_ms: u64) -> Duration {
    Duration::from_millis(if ms == 0 { default_ms } else { ms })
}

fn is_false(v: &bool) -> bool {
    !*v
}

/// Background poll task owned by a watch-enabled adapter.
///
/// Dropping the handle (or calling [`PollHandle::stop`]) closes the shutdown
/// channel; the loop exits at its next select point.
pub(crate) struct PollHandle {
    shutdown: watch::Sender<bool>,
}

impl PollHandle {
    pub(crate) fn stop(&self) {
        self.shutdown.send_replace(true);
    }
}

pub(crate) fn spawn_poll_loop<F, Fut>(
    adapter: &'static str,
    interval: Duration,
    mut tick: F,
) -> PollHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => {
                    tracing::debug!(adapter, "config poll loop shutting down");
                    return;
                }
            }
            tick().await;
        }
    });

    PollHandle {
        shutdown: shutdown_tx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_millis_fall_back_to_default() {
        assert_eq!(millis_or(0, 3_000), Duration::from_secs(3));
        assert_eq!(millis_or(250, 3_000), Duration::from_millis(250));
    }
}
