//! Channel isolation (spec.md §8 scenario 6), exercised through the crate's
//! public `Dispatcher` API rather than `src/notifications/mod.rs`'s own
//! test module, since `FlakyChannel` there is private to that module.

use async_trait::async_trait;
use sairen_sentry::error::DispatchError;
use sairen_sentry::notifications::{ChannelOutcome, Dispatcher, NotificationEvent, RenderedContent};
use sairen_sentry::types::ChannelId;
use sairen_sentry::RootConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct FlakyChannel {
    id: ChannelId,
    fail_times: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl sairen_sentry::notifications::Channel for FlakyChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn configure(&mut self, _cfg: &RootConfig) -> Result<(), DispatchError> {
        Ok(())
    }

    async fn send(&self, _event: &NotificationEvent, _content: &RenderedContent) -> Result<(), DispatchError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            Err(DispatchError::Transient {
                channel: self.id.to_string(),
                message: "HTTP 500".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

fn cfg() -> RootConfig {
    let mut cfg = RootConfig::default();
    cfg.notifications.channel_send_timeout_seconds = 1;
    cfg.notifications.dispatch_budget_seconds = 15;
    cfg.notifications.global_min_interval_seconds = 0;
    cfg
}

/// Scenario 6: a flaky Teams channel that fails its first 3 sends and an
/// always-succeeding Slack channel are dispatched together. Both must end
/// up `Sent`, and Teams' retries must not affect Slack's single call —
/// the two channels are isolated by the concurrent `dispatch()` fan-out.
#[tokio::test]
async fn channel_isolation_scenario_6() {
    let teams_calls = Arc::new(AtomicUsize::new(0));
    let slack_calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::with_channels(
        &cfg(),
        vec![
            Box::new(FlakyChannel {
                id: ChannelId::Teams,
                fail_times: 3,
                calls: teams_calls.clone(),
            }),
            Box::new(FlakyChannel {
                id: ChannelId::Slack,
                fail_times: 0,
                calls: slack_calls.clone(),
            }),
        ],
    );

    let event = NotificationEvent::test(0);
    let result = dispatcher.dispatch(event, 0).await;

    assert_eq!(result.outcomes.get(&ChannelId::Teams), Some(&ChannelOutcome::Sent));
    assert_eq!(result.outcomes.get(&ChannelId::Slack), Some(&ChannelOutcome::Sent));
    assert_eq!(teams_calls.load(Ordering::SeqCst), 4);
    assert_eq!(slack_calls.load(Ordering::SeqCst), 1);

    let perf = dispatcher.perf_snapshot();
    assert_eq!(perf.get(&ChannelId::Teams).map(|p| p.sent), Some(1));
    assert_eq!(perf.get(&ChannelId::Slack).map(|p| p.sent), Some(1));
}

/// A channel that fails permanently is not retried and does not block a
/// co-dispatched channel from succeeding.
#[tokio::test]
async fn permanent_failure_does_not_block_other_channels() {
    struct PermanentlyFailingChannel;

    #[async_trait]
    impl sairen_sentry::notifications::Channel for PermanentlyFailingChannel {
        fn id(&self) -> ChannelId {
            ChannelId::Discord
        }
        fn configure(&mut self, _cfg: &RootConfig) -> Result<(), DispatchError> {
            Ok(())
        }
        async fn send(&self, _event: &NotificationEvent, _content: &RenderedContent) -> Result<(), DispatchError> {
            Err(DispatchError::Permanent {
                channel: "discord".to_string(),
                message: "HTTP 401".to_string(),
            })
        }
    }

    let slack_calls = Arc::new(AtomicUsize::new(0));
    let dispatcher = Dispatcher::with_channels(
        &cfg(),
        vec![
            Box::new(PermanentlyFailingChannel),
            Box::new(FlakyChannel {
                id: ChannelId::Slack,
                fail_times: 0,
                calls: slack_calls.clone(),
            }),
        ],
    );

    let result = dispatcher.dispatch(NotificationEvent::test(0), 0).await;

    assert!(matches!(
        result.outcomes.get(&ChannelId::Discord),
        Some(ChannelOutcome::Failed(_))
    ));
    assert_eq!(result.outcomes.get(&ChannelId::Slack), Some(&ChannelOutcome::Sent));
    assert_eq!(slack_calls.load(Ordering::SeqCst), 1);
}
