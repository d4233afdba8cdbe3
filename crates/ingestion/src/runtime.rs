//! Processor runtime.
//!
//! Receives messages one at a time, runs the processor kind's handler inside
//! a fresh [`CleanupScope`] while renewing the message lock, and settles every
//! message exactly once: acknowledged on success, abandoned or dead-lettered
//! on failure depending on the delivery count.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

use storage::{Feed, FeedMessage};

use crate::cleanup::CleanupScope;
use crate::config::FeedSettings;
use crate::error::{Result, StacError};
use crate::metrics::{self as stac_metrics, MessageMetrics};
use crate::processors::{FeedEvent, Outcome, Processor};

/// How long a single `receive` call may block.
const RECEIVE_WAIT: Duration = Duration::from_secs(5);

/// Pause after a failed `receive` before trying again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

/// Final state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Acknowledged,
    /// Handled, but the ack did not reach the feed. The lock expires and the
    /// message is redelivered.
    AckFailed,
    Abandoned,
    DeadLettered,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Acknowledged => "acknowledged",
            Resolution::AckFailed => "ack_failed",
            Resolution::Abandoned => "abandoned",
            Resolution::DeadLettered => "dead_lettered",
        }
    }
}

/// Decides what happens to a message whose handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailurePolicy {
    pub max_delivery_count: u32,
    pub fail_fast_non_retryable: bool,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_delivery_count: 2,
            fail_fast_non_retryable: false,
        }
    }
}

impl FailurePolicy {
    pub fn from_settings(settings: &FeedSettings) -> Self {
        Self {
            max_delivery_count: settings.max_delivery_count,
            fail_fast_non_retryable: settings.fail_fast_non_retryable,
        }
    }

    /// Abandon while deliveries remain, dead-letter afterwards.
    pub fn resolve(&self, delivery_count: u32, err: &StacError) -> Resolution {
        if self.fail_fast_non_retryable && !err.is_retryable() {
            return Resolution::DeadLettered;
        }
        if delivery_count < self.max_delivery_count {
            Resolution::Abandoned
        } else {
            Resolution::DeadLettered
        }
    }
}

/// Drives one processor over one feed consumer.
pub struct ProcessorRuntime<F: Feed> {
    feed: F,
    processor: Box<dyn Processor>,
    policy: FailurePolicy,
    lock_duration: Duration,
    scope_root: PathBuf,
    worker: usize,
    receive_wait: Duration,
}

impl<F: Feed> ProcessorRuntime<F> {
    pub fn new(
        feed: F,
        processor: Box<dyn Processor>,
        settings: &FeedSettings,
        scope_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            feed,
            processor,
            policy: FailurePolicy::from_settings(settings),
            lock_duration: settings.lock_duration,
            scope_root: scope_root.into(),
            worker: 0,
            receive_wait: RECEIVE_WAIT,
        }
    }

    /// Worker index used in logs.
    pub fn with_worker(mut self, worker: usize) -> Self {
        self.worker = worker;
        self
    }

    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    pub fn feed(&self) -> &F {
        &self.feed
    }

    /// Process messages until `shutdown` fires or its sender is dropped.
    pub async fn run(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        std::fs::create_dir_all(&self.scope_root).map_err(|e| {
            StacError::Config(format!(
                "cannot create working directory {}: {}",
                self.scope_root.display(),
                e
            ))
        })?;
        self.processor.register_metrics();

        info!(
            processor = self.processor.name(),
            worker = self.worker,
            max_delivery_count = self.policy.max_delivery_count,
            lock_secs = self.lock_duration.as_secs(),
            "Processor started"
        );

        loop {
            let received = tokio::select! {
                _ = shutdown.recv() => break,
                received = self.feed.receive(self.receive_wait) => received,
            };

            match received {
                Ok(Some(message)) => {
                    self.process_message(message).await;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        processor = self.processor.name(),
                        worker = self.worker,
                        error = %e,
                        "Receive failed, backing off"
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        info!(processor = self.processor.name(), worker = self.worker, "Processor stopped");
        Ok(())
    }

    /// Handle and settle one message.
    pub async fn process_message(&mut self, message: FeedMessage) -> Resolution {
        let span = info_span!(
            "message",
            processor = self.processor.name(),
            worker = self.worker,
            message_id = %message.id,
            delivery_count = message.delivery_count,
        );
        self.process_in_span(message).instrument(span).await
    }

    async fn process_in_span(&mut self, message: FeedMessage) -> Resolution {
        let started = Instant::now();
        debug!("Received message");

        let event = FeedEvent::decode(&message.payload);
        let url = event.as_ref().ok().map(|e| e.url().to_string());
        let hint = event.as_ref().ok().and_then(|e| self.processor.record_hint(e));

        let result = match (event, CleanupScope::enter(&self.scope_root)) {
            (Ok(event), Ok(scope)) => {
                let result = handle_with_renewal(
                    &mut self.feed,
                    self.processor.as_mut(),
                    &message,
                    &event,
                    &scope,
                    self.lock_duration,
                )
                .await;
                scope.close();
                result
            }
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        let (resolution, bytes) = match result {
            Ok(outcome) => (self.acknowledge(&message, &outcome).await, outcome.bytes),
            Err(e) => (
                self.settle_failure(&message, url.as_deref(), hint.as_deref(), &e)
                    .await,
                0,
            ),
        };

        self.processor.send_metrics(&MessageMetrics {
            status: resolution.as_str(),
            duration: started.elapsed(),
            bytes,
        });
        resolution
    }

    async fn acknowledge(&mut self, message: &FeedMessage, outcome: &Outcome) -> Resolution {
        match self.feed.ack(message).await {
            Ok(()) => {
                info!(record_id = ?outcome.record_id, "Message acknowledged");
                Resolution::Acknowledged
            }
            Err(e) => {
                error!(record_id = ?outcome.record_id, error = %e, "Failed to acknowledge message");
                Resolution::AckFailed
            }
        }
    }

    async fn settle_failure(
        &mut self,
        message: &FeedMessage,
        url: Option<&str>,
        record_hint: Option<&str>,
        err: &StacError,
    ) -> Resolution {
        let resolution = self.policy.resolve(message.delivery_count, err);

        let settled = match resolution {
            Resolution::Abandoned => {
                warn!(
                    url,
                    record_id = record_hint,
                    error = %err,
                    error_kind = err.kind(),
                    retryable = err.is_retryable(),
                    "Handler failed, abandoning message"
                );
                self.feed.abandon(message).await
            }
            _ => {
                error!(
                    url,
                    record_id = record_hint,
                    error = %err,
                    error_kind = err.kind(),
                    retryable = err.is_retryable(),
                    "Handler failed, dead-lettering message"
                );
                stac_metrics::record_dead_letter(self.processor.name());
                let reason = format!("{}: {} ({})", err.kind(), err, url.unwrap_or("-"));
                self.feed.dead_letter(message, &reason).await
            }
        };

        if let Err(e) = settled {
            error!(error = %e, resolution = resolution.as_str(), "Failed to settle message");
        }
        resolution
    }
}

/// Run the handler, renewing the message lock every half lock duration.
async fn handle_with_renewal<F: Feed>(
    feed: &mut F,
    processor: &mut dyn Processor,
    message: &FeedMessage,
    event: &FeedEvent,
    scope: &CleanupScope,
    lock_duration: Duration,
) -> Result<Outcome> {
    let period = (lock_duration / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut handler = processor.run_handler(event, scope);

    loop {
        tokio::select! {
            result = &mut handler => return result,
            _ = ticker.tick() => {
                match feed.renew_lock(message).await {
                    Ok(()) => debug!("Renewed message lock"),
                    Err(e) => warn!(error = %e, "Failed to renew message lock"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malformed() -> StacError {
        StacError::MalformedInput("bad payload".into())
    }

    #[test]
    fn test_abandon_then_dead_letter() {
        let policy = FailurePolicy::default();
        assert_eq!(policy.resolve(1, &malformed()), Resolution::Abandoned);
        assert_eq!(policy.resolve(2, &malformed()), Resolution::DeadLettered);
        assert_eq!(policy.resolve(3, &malformed()), Resolution::DeadLettered);
    }

    #[test]
    fn test_fail_fast_only_affects_non_retryable() {
        let policy = FailurePolicy {
            max_delivery_count: 2,
            fail_fast_non_retryable: true,
        };
        assert_eq!(policy.resolve(1, &malformed()), Resolution::DeadLettered);
        assert_eq!(
            policy.resolve(1, &StacError::Transport("reset".into())),
            Resolution::Abandoned
        );
    }

    #[test]
    fn test_resolution_labels() {
        assert_eq!(Resolution::AckFailed.as_str(), "ack_failed");
        assert_eq!(Resolution::DeadLettered.as_str(), "dead_lettered");
    }

    #[test]
    fn test_single_delivery_dead_letters_immediately() {
        let policy = FailurePolicy {
            max_delivery_count: 1,
            fail_fast_non_retryable: false,
        };
        assert_eq!(
            policy.resolve(1, &StacError::StoreUnavailable("timeout".into())),
            Resolution::DeadLettered
        );
    }
}
