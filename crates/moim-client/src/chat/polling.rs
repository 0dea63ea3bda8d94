use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use moim_shared::ChatResult;

use crate::events::{emit_event, ChatEvent, SyncSource};

use super::{SyncPipeline, SyncTrigger};

/// Fixed-period refetch that catches inserts the realtime feed missed.
pub struct PollingFallback {
    period: Duration,
    ticker: Option<JoinHandle<()>>,
}

impl PollingFallback {
    /// Start ticking. The first tick fires one full period from now.
    pub(crate) fn start(period: Duration, triggers: mpsc::Sender<SyncTrigger>) -> Self {
        let ticker = tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.tick().await;

            loop {
                timer.tick().await;
                if triggers.send(SyncTrigger::PollTick(None)).await.is_err() {
                    break;
                }
            }
            debug!("Poll ticker stopped");
        });

        debug!(period_ms = period.as_millis() as u64, "Polling fallback started");
        Self {
            period,
            ticker: Some(ticker),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for PollingFallback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One poll: diff the remote list against what is rendered, notify for
/// unseen foreign messages, then replace the stream.
pub(crate) async fn handle_tick(pipeline: &SyncPipeline) -> ChatResult<()> {
    let fresh = match pipeline.store.load().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(meeting = %pipeline.store.meeting_id(), error = %e, "Poll fetch failed");
            emit_event(
                &pipeline.events,
                ChatEvent::SyncFailed {
                    source: SyncSource::Poll,
                    error: e.to_string(),
                },
            );
            return Err(e);
        }
    };

    let rendered = pipeline.store.rendered_ids();
    let mut unseen = 0usize;
    for message in fresh.iter().filter(|m| !rendered.contains(&m.id)) {
        unseen += 1;
        if pipeline.is_foreign(message.user_id) {
            pipeline.bridge.notify(message);
        }
    }
    if unseen > 0 {
        debug!(unseen, "Poll found messages missed by realtime");
    }

    let count = fresh.len();
    pipeline.store.replace(fresh);
    emit_event(
        &pipeline.events,
        ChatEvent::Synced {
            source: SyncSource::Poll,
            count,
        },
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut poller = PollingFallback::start(Duration::from_secs(5), tx);
        assert!(poller.is_running());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Ok(SyncTrigger::PollTick(None))));

        poller.stop();
        assert!(!poller.is_running());
    }
}
