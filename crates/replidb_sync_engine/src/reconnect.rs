//! Reconnect supervision with bounded exponential backoff.

use crate::config::RetryConfig;
use crate::error::SyncResult;
use std::future::Future;
use tokio::sync::watch;

/// Lifecycle of a supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Dialing or authenticating.
    #[default]
    Connecting,
    /// Authenticated and streaming.
    Connected,
    /// Not connected; a retry may be scheduled.
    Disconnected,
}

/// Runs a connection factory in a retry loop.
///
/// Retryable failures reconnect after an exponential backoff; the
/// attempt counter resets once a connection reached `Connected`, so a
/// long-lived session that drops starts over at the initial delay.
/// Fatal errors and clean exits end supervision.
#[derive(Debug)]
pub struct Reconnector {
    retry: RetryConfig,
    status: watch::Sender<ConnectionStatus>,
}

impl Reconnector {
    /// Creates a supervisor with the given backoff.
    #[must_use]
    pub fn new(retry: RetryConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self { retry, status }
    }

    /// Observes status transitions.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// Supervises `connect` until it exits cleanly, fails fatally, or
    /// `shutdown` turns true.
    ///
    /// `connect` receives a status sender for the attempt; the
    /// connection flips it to `Connected` once authenticated.
    pub async fn supervise<F, Fut>(
        &self,
        mut connect: F,
        mut shutdown: watch::Receiver<bool>,
    ) -> SyncResult<()>
    where
        F: FnMut(watch::Sender<ConnectionStatus>) -> Fut,
        Fut: Future<Output = SyncResult<()>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                self.status.send_replace(ConnectionStatus::Disconnected);
                return Ok(());
            }
            self.status.send_replace(ConnectionStatus::Connecting);
            let result = tokio::select! {
                result = connect(self.status.clone()) => result,
                _ = shutdown.wait_for(|stop| *stop) => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    return Ok(());
                }
            };

            let was_connected = *self.status.borrow() == ConnectionStatus::Connected;
            self.status.send_replace(ConnectionStatus::Disconnected);
            match result {
                Ok(()) => return Ok(()),
                Err(error) if !error.is_retryable() => {
                    tracing::warn!(%error, "connection failed fatally");
                    return Err(error);
                }
                Err(error) => tracing::warn!(%error, "connection lost; reconnecting"),
            }

            if was_connected {
                attempt = 0;
            }
            attempt += 1;
            let delay = self.retry.delay_for_attempt(attempt);
            tracing::debug!(attempt, ?delay, "backing off before reconnect");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.wait_for(|stop| *stop) => {
                    self.status.send_replace(ConnectionStatus::Disconnected);
                    return Ok(());
                }
            }
        }
    }
}
