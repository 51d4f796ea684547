use std::sync::Weak;
use std::time::SystemTime;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::hub::{Hub, PushError};
use crate::notification::Notification;
use crate::util::get_short_token;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle of one push run, in delivery order.
///
/// Every token of a run ends in exactly one `SendComplete` or `SendError`.
/// `WillSend` is only emitted for tokens actually handed to the hub, so tokens
/// skipped because of cancellation or a vanished hub go straight to `SendError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Begin,
    WillSend(String),
    SendComplete(String),
    SendError(String, PushError),
    Completed(RunSummary),
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sent: usize,
    pub failed: usize,
}

/// Reasons a run is refused before anything is queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushServiceError {
    #[error("no tokens to push to")]
    NoTokens,

    #[error("payload is empty")]
    EmptyPayload,

    #[error("hub is no longer available")]
    HubUnavailable,

    #[error("push worker has stopped")]
    WorkerStopped,
}

/// Handle to a queued run: its event stream plus a way to cancel it.
pub struct PushRun {
    events: mpsc::UnboundedReceiver<PushEvent>,
    canceller: RunCanceller,
}

impl PushRun {
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        self.events.recv().await
    }

    pub fn canceller(&self) -> RunCanceller {
        self.canceller.clone()
    }
}

#[derive(Clone, Debug)]
pub struct RunCanceller(mpsc::Sender<()>);

impl RunCanceller {
    /// Returns false if the run already finished or was already cancelled.
    pub fn cancel(&self) -> bool {
        self.0.try_send(()).is_ok()
    }
}

struct Batch {
    hub: Weak<dyn Hub>,
    tokens: Vec<String>,
    payload: String,
    expiry: Option<SystemTime>,
    priority: u8,
    delay: Duration,
    send_timeout: Duration,
    events: mpsc::UnboundedSender<PushEvent>,
    cancel: mpsc::Receiver<()>,
}

/// Pushes one payload to many tokens through a single hub.
///
/// All runs submitted to a service go through one worker task, so the hub
/// never sees two sends from the same service at once.
pub struct PushService {
    hub: Weak<dyn Hub>,
    delay: Duration,
    send_timeout: Duration,
    queue: mpsc::UnboundedSender<Batch>,
}

impl PushService {
    /// Must be called from within a Tokio runtime; spawns the worker task.
    pub fn new(hub: Weak<dyn Hub>) -> PushService {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx));
        PushService {
            hub,
            delay: Duration::ZERO,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            queue,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> PushService {
        self.delay = delay;
        self
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> PushService {
        self.send_timeout = send_timeout;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue a run pushing `payload` to every token, in order.
    pub fn push_with_tokens(&self,
        tokens: Vec<String>,
        payload: String,
        expiry: Option<SystemTime>,
        priority: u8) -> Result<PushRun, PushServiceError> {

        if tokens.is_empty() {
            return Err(PushServiceError::NoTokens);
        }
        if payload.trim().is_empty() {
            return Err(PushServiceError::EmptyPayload);
        }
        if self.hub.strong_count() == 0 {
            return Err(PushServiceError::HubUnavailable);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::channel(1);

        let batch = Batch {
            hub: Weak::clone(&self.hub),
            tokens,
            payload,
            expiry,
            priority,
            delay: self.delay,
            send_timeout: self.send_timeout,
            events: events_tx,
            cancel: cancel_rx,
        };
        self.queue.send(batch).map_err(|_| PushServiceError::WorkerStopped)?;

        Ok(PushRun {
            events: events_rx,
            canceller: RunCanceller(cancel_tx),
        })
    }
}

async fn run_worker(mut queue: mpsc::UnboundedReceiver<Batch>) {
    while let Some(batch) = queue.recv().await {
        batch.run().await;
    }
    debug!("push_worker:: queue closed, worker exiting");
}

impl Batch {
    fn emit(&self, event: PushEvent) {
        // A caller that dropped its PushRun still gets its tokens sent.
        self.events.send(event).ok();
    }

    fn fail(&self, summary: &mut RunSummary, token: String, error: PushError) {
        warn!("push_worker:: ...{} failed: {}", get_short_token(&token), error);
        summary.failed += 1;
        self.emit(PushEvent::SendError(token, error));
    }

    async fn run(mut self) {
        let tokens = std::mem::take(&mut self.tokens);
        let mut summary = RunSummary::default();
        let mut cancelled = false;

        info!("push_worker:: starting run of {} tokens (priority={}, delay={:?})", tokens.len(), self.priority, self.delay);
        self.emit(PushEvent::Begin);

        for (index, token) in tokens.into_iter().enumerate() {
            if !cancelled && self.cancel.try_recv().is_ok() {
                cancelled = true;
            }
            if !cancelled && index > 0 && !self.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.delay) => {}
                    Some(()) = self.cancel.recv() => {
                        cancelled = true;
                    }
                }
            }
            if cancelled {
                self.fail(&mut summary, token, PushError::Cancelled);
                continue;
            }

            let Some(hub) = self.hub.upgrade() else {
                self.fail(&mut summary, token, PushError::HubUnavailable);
                continue;
            };

            self.emit(PushEvent::WillSend(token.clone()));
            let notification = Notification::new(token, self.payload.clone(), self.expiry, self.priority);
            let result = tokio::time::timeout(self.send_timeout, hub.push(&notification))
                .await
                .unwrap_or(Err(PushError::Timeout(self.send_timeout)));
            drop(hub);

            match result {
                Ok(()) => {
                    debug!("push_worker:: ...{} sent", get_short_token(&notification.token));
                    summary.sent += 1;
                    self.emit(PushEvent::SendComplete(notification.token));
                }
                Err(e) => self.fail(&mut summary, notification.token, e),
            }
        }

        info!("push_worker:: run finished, sent={} failed={}", summary.sent, summary.failed);
        self.emit(PushEvent::Completed(summary));
    }
}
