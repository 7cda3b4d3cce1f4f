use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Run `tick` every `period` until `cancel` fires. A tick that already
/// started runs to completion before the loop exits.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        interval.tick().await;
        info!(task = name, period_ms = period.as_millis() as u64, "🕒 Periodic task started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(task = name, "Shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    tick().await;
                }
            }
        }
        info!(task = name, "Periodic task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = ticks.clone();
        let handle = spawn_periodic("test", Duration::from_secs(10), cancel.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }
}
