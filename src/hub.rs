use async_trait::async_trait;
use log::info;
use thiserror::Error;
use tokio::time::Duration;

use crate::notification::Notification;
use crate::token::TokenError;
use crate::util::get_short_token;

/// Failure delivering a single notification. Never aborts a batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("rejected by push service (status {status}): {reason}")]
    Rejected { status: u16, reason: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("hub is no longer available")]
    HubUnavailable,

    #[error("push run was cancelled")]
    Cancelled,
}

/// An authenticated channel notifications are written to.
///
/// Hubs are owned by the application; push services only keep a `Weak` handle.
#[async_trait]
pub trait Hub: Send + Sync {
    async fn push(&self, notification: &Notification) -> Result<(), PushError>;
}

/// Hub that validates and logs notifications without contacting APNs.
pub struct SimulatedHub {
    latency: Duration,
}

impl SimulatedHub {
    pub fn new(latency: Duration) -> SimulatedHub {
        SimulatedHub { latency }
    }
}

#[async_trait]
impl Hub for SimulatedHub {
    async fn push(&self, notification: &Notification) -> Result<(), PushError> {
        let token = notification.validate()?;
        info!(
            "Simulated push to ...{} (priority={}, expiration={:?}, {} bytes)",
            get_short_token(&token),
            notification.priority,
            notification.expiration_secs(),
            notification.payload.len()
        );
        tokio::time::sleep(self.latency).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_hub_validates_before_sending() {
        let hub = SimulatedHub::new(Duration::from_millis(1));

        let ok = Notification::new("aa11".into(), "{}".into(), None, 10);
        assert_eq!(hub.push(&ok).await, Ok(()));

        let bad = Notification::new("not-a-token".into(), "{}".into(), None, 10);
        assert!(matches!(hub.push(&bad).await, Err(PushError::InvalidToken(_))));
    }
}
