use std::time::{SystemTime, UNIX_EPOCH};

use crate::hub::PushError;
use crate::token::normalize_token;

/// APNs rejects payloads above this size with `PayloadTooLarge`.
pub const MAX_PAYLOAD_BYTES: usize = 4096;

pub const DEFAULT_PRIORITY: u8 = 10;

/// A single notification as handed to a [`Hub`](crate::hub::Hub).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub token: String,
    pub payload: String,
    pub expiry: Option<SystemTime>,
    pub priority: u8,
}

impl Notification {
    pub fn new(token: String, payload: String, expiry: Option<SystemTime>, priority: u8) -> Notification {
        Notification { token, payload, expiry, priority }
    }

    /// Check the notification is deliverable and return the normalized token.
    pub fn validate(&self) -> Result<String, PushError> {
        let token = normalize_token(&self.token)?;

        if self.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(PushError::MalformedPayload(format!(
                "payload is {} bytes, max {MAX_PAYLOAD_BYTES}",
                self.payload.len()
            )));
        }
        serde_json::from_str::<serde_json::Value>(&self.payload)
            .map_err(|e| PushError::MalformedPayload(e.to_string()))?;

        Ok(token)
    }

    /// Value for the `apns-expiration` header, absent when the notification never expires.
    pub fn expiration_secs(&self) -> Option<u64> {
        self.expiry.map(|expiry| {
            expiry
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        })
    }
}
