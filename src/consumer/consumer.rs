//! Consumer loop with reconnection and manual offset commits

use crate::consumer::config::ConsumerConfig;
use crate::consumer::error::BrokerError;
use crate::consumer::log::{EventLog, Subscription};
use crate::consumer::metrics::ConsumerMetrics;
use crate::consumer::processor::MessageProcessor;
use crate::error::{PipelineError, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of the consumer's subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Subscribing to the configured topics
    Connecting,
    /// Polling and processing
    Consuming,
    /// Waiting out the backoff before the next subscription attempt
    Reconnecting,
    /// Reconnection attempts exhausted
    Failed,
    /// Shut down on request
    Stopped,
}

impl fmt::Display for ConsumerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsumerState::Connecting => "connecting",
            ConsumerState::Consuming => "consuming",
            ConsumerState::Reconnecting => "reconnecting",
            ConsumerState::Failed => "failed",
            ConsumerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a consume session ended
enum SessionExit {
    Shutdown,
    ConnectionLost(BrokerError),
}

/// Resolves once `shutdown` reads true; never resolves if the sender is gone
async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Reads from the event log, processes each message and commits its offset
pub struct ConsumerLoop {
    log: Arc<dyn EventLog>,
    processor: MessageProcessor,
    config: ConsumerConfig,
    metrics: Arc<ConsumerMetrics>,
    state_tx: watch::Sender<ConsumerState>,
    shutdown: watch::Receiver<bool>,
}

impl ConsumerLoop {
    /// Create a consumer; it stops once `shutdown` becomes true
    pub fn new(
        log: Arc<dyn EventLog>,
        processor: MessageProcessor,
        config: ConsumerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConsumerState::Connecting);
        Self {
            log,
            metrics: processor.metrics().clone(),
            processor,
            config,
            state_tx,
            shutdown,
        }
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConsumerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConsumerState {
        *self.state_tx.borrow()
    }

    pub fn processor(&self) -> &MessageProcessor {
        &self.processor
    }

    pub fn metrics(&self) -> Arc<ConsumerMetrics> {
        self.metrics.clone()
    }

    fn set_state(&self, state: ConsumerState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "Consumer state changed");
        }
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`; returns true if shutdown was requested meanwhile
    async fn sleep_or_shutdown(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown_signalled(&mut self.shutdown) => true,
        }
    }

    /// Run until shutdown or until reconnection attempts are exhausted
    pub async fn run(&mut self) -> Result<()> {
        info!(topics = ?self.config.topics, "Starting consumer");
        let policy = self.config.reconnect_policy.clone();
        let mut failures: u32 = 0;

        loop {
            if self.is_shutdown() {
                break;
            }

            self.set_state(ConsumerState::Connecting);
            let cause = match self.log.subscribe(&self.config.topics).await {
                Ok(mut subscription) => {
                    failures = 0;
                    self.set_state(ConsumerState::Consuming);
                    info!(topics = ?self.config.topics, "Subscribed to topics");

                    let exit = self.consume(subscription.as_mut()).await;
                    if let Err(e) = subscription.close().await {
                        debug!(error = %e, "Failed to release subscription");
                    }
                    match exit {
                        SessionExit::Shutdown => break,
                        SessionExit::ConnectionLost(e) => e,
                    }
                }
                Err(e) => e,
            };

            failures += 1;
            self.metrics.increment_reconnects();
            error!(attempt = failures, error = %cause, "Consumer connection failed");

            if !policy.should_retry(failures) {
                self.set_state(ConsumerState::Failed);
                error!(attempts = failures, "Maximum reconnection attempts exceeded");
                return Err(PipelineError::ReconnectExhausted {
                    attempts: failures,
                    last_error: cause.to_string(),
                });
            }

            self.set_state(ConsumerState::Reconnecting);
            let delay = policy.backoff_for(failures);
            info!(attempt = failures, ?delay, "Reconnecting after backoff");
            if self.sleep_or_shutdown(delay).await {
                break;
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(metrics = ?self.metrics.snapshot(), "Consumer stopped");
        Ok(())
    }

    async fn consume(&mut self, subscription: &mut dyn Subscription) -> SessionExit {
        let poll_timeout = self.config.poll_timeout();

        loop {
            let polled = tokio::select! {
                result = subscription.poll(poll_timeout) => result,
                _ = shutdown_signalled(&mut self.shutdown) => return SessionExit::Shutdown,
            };

            let batch = match polled {
                Ok(batch) => batch,
                Err(e) if e.is_connection_error() => {
                    error!(error = %e, "Connection lost while polling");
                    return SessionExit::ConnectionLost(e);
                }
                Err(e) => {
                    warn!(error = %e, "Error during consumption");
                    if self.sleep_or_shutdown(self.config.poll_error_pause()).await {
                        return SessionExit::Shutdown;
                    }
                    continue;
                }
            };

            for message in batch {
                self.metrics.increment_consumed();
                let outcome = self.processor.process_with_retry(&message).await;

                if outcome.is_success() {
                    match subscription.commit(&message).await {
                        Ok(()) => {
                            self.metrics.increment_committed();
                            debug!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                "offset committed"
                            );
                        }
                        Err(e) if e.is_connection_error() => {
                            self.metrics.increment_commit_failures();
                            error!(error = %e, offset = message.offset, "Connection lost while committing");
                            return SessionExit::ConnectionLost(e);
                        }
                        Err(e) => {
                            self.metrics.increment_commit_failures();
                            warn!(
                                topic = %message.topic,
                                partition = message.partition,
                                offset = message.offset,
                                error = %e,
                                "Failed to commit offset"
                            );
                        }
                    }
                } else {
                    error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        "Message processing failed permanently"
                    );
                }

                if self.is_shutdown() {
                    return SessionExit::Shutdown;
                }
            }
        }
    }
}
