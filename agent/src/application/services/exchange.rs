//! Exchange supervisor: delivers queued results, dispatches what the server
//! sends back, and repeats on an interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::MessageTransport;
use crate::application::services::registry::DispatchRegistry;
use crate::domain::{Backoff, ExchangeError};

/// Scheduling and identity for the exchange loop.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    pub computer_id: Option<String>,
    pub message_api: String,
    /// Delay between exchanges when nothing is waiting.
    pub interval: Duration,
    /// Delay when results are queued for delivery.
    pub urgent_interval: Duration,
    pub backoff: Backoff,
}

/// Counts from one successful round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeReport {
    pub delivered: usize,
    pub received: usize,
    pub dispatched: usize,
}

pub struct MessageExchange {
    transport: Arc<dyn MessageTransport>,
    registry: Arc<DispatchRegistry>,
    settings: ExchangeSettings,
}

impl MessageExchange {
    #[must_use]
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        registry: Arc<DispatchRegistry>,
        settings: ExchangeSettings,
    ) -> Self {
        Self {
            transport,
            registry,
            settings,
        }
    }

    /// One round trip: send every queued result, then dispatch the reply.
    ///
    /// On failure the results go back to the front of the queue.
    pub async fn exchange_once(&self) -> Result<ExchangeReport, ExchangeError> {
        let tracker = self.registry.tracker();
        let outbound = tracker.take_outbox().await;
        let inbound = match self
            .transport
            .exchange(
                &outbound,
                self.settings.computer_id.as_deref(),
                &self.settings.message_api,
            )
            .await
        {
            Ok(inbound) => inbound,
            Err(e) => {
                tracker.restore_outbox(outbound).await;
                return Err(e);
            }
        };
        tracker.acknowledge(&outbound).await;

        let outcomes = self.registry.dispatch_all(&inbound).await;
        let report = ExchangeReport {
            delivered: outbound.len(),
            received: inbound.len(),
            dispatched: outcomes.iter().filter(|o| o.is_ok()).count(),
        };
        tracing::info!(
            url = %self.transport.url(),
            delivered = report.delivered,
            received = report.received,
            dispatched = report.dispatched,
            "exchange complete"
        );
        Ok(report)
    }

    /// Exchange until `shutdown` resolves.
    ///
    /// Retryable failures back off exponentially. A certificate failure ends
    /// the loop with the error: the agent must not keep talking to an
    /// endpoint it cannot verify.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), ExchangeError> {
        tokio::pin!(shutdown);
        let mut backoff = self.settings.backoff;
        loop {
            let delay = match self.exchange_once().await {
                Ok(_) => {
                    backoff.reset();
                    if self.registry.tracker().queued_count().await > 0 {
                        self.settings.urgent_interval
                    } else {
                        self.settings.interval
                    }
                }
                Err(e) if !e.is_retryable() => {
                    tracing::error!(url = %self.transport.url(), error = %e, "exchange stopped");
                    return Err(e);
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        url = %self.transport.url(),
                        error = %e,
                        attempt = backoff.attempts(),
                        retry_in_secs = delay.as_secs(),
                        "exchange failed"
                    );
                    delay
                }
            };
            tokio::select! {
                biased;
                () = &mut shutdown => {
                    tracing::info!("exchange loop shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }
}
