use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::authtoken::AuthToken;
use crate::hub::{Hub, PushError};
use crate::notification::Notification;
use crate::util::{get_short_token, ApnsSettings};

/// Hub writing to APNs over one persistent HTTP/2 connection.
pub struct ApnsHub {
    client: Mutex<reqwest::Client>,
    auth_token: Arc<RwLock<AuthToken>>,
    host_name: String,
    topic: String,
    push_type: String,
}

#[derive(Deserialize, Debug)]
struct ApnsErrorBody {
    reason: String,
}

impl ApnsHub {
    pub fn new(settings: &ApnsSettings, auth_token: Arc<RwLock<AuthToken>>) -> Result<ApnsHub, reqwest::Error> {
        let client = reqwest::Client::builder()
            .http2_prior_knowledge()
            .build()?;

        Ok(ApnsHub {
            client: Mutex::new(client),
            auth_token,
            host_name: settings.host_name.clone(),
            topic: settings.topic.clone(),
            push_type: settings.push_type.clone(),
        })
    }

    fn headers(&self, notification: &Notification, auth_token: &str) -> Result<HeaderMap, InvalidHeaderValue> {
        let mut headers = HeaderMap::new();
        headers.insert("apns-topic", HeaderValue::from_str(&self.topic)?);
        headers.insert("apns-push-type", HeaderValue::from_str(&self.push_type)?);
        headers.insert("apns-priority", HeaderValue::from(u16::from(notification.priority)));
        if let Some(expiration) = notification.expiration_secs() {
            headers.insert("apns-expiration", HeaderValue::from(expiration));
        }
        headers.insert("authorization", HeaderValue::from_str(&format!("bearer {auth_token}"))?);
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl Hub for ApnsHub {
    async fn push(&self, notification: &Notification) -> Result<(), PushError> {
        let token = notification.validate()?;
        let short_token = get_short_token(&token);

        let headers = {
            let auth = self.auth_token.read().await;
            self.headers(notification, &auth.token)
                .map_err(|e| PushError::Channel(format!("invalid header: {e}")))?
        };
        let url = format!("https://{}/3/device/{}", self.host_name, token);

        // One writer at a time on the shared connection.
        let client = self.client.lock().await;
        let result = client.post(url)
            .headers(headers)
            .body(notification.payload.clone())
            .send()
            .await;

        match result {
            Ok(res) => {
                let status = res.status();
                let blank_header = HeaderValue::from_static("");
                let apns_id = res.headers().get("apns-id").unwrap_or(&blank_header).to_str().unwrap_or_default().to_string();
                let body = res.text().await.unwrap_or_default();

                debug!("APNs response for ...{}: status={}, apns-id={}, {}", short_token, status, apns_id, body);
                if status.is_success() {
                    Ok(())
                } else {
                    Err(rejection(status.as_u16(), &body))
                }
            },
            Err(e) => {
                error!("APNs error for ...{}: {e}", short_token);
                Err(PushError::Channel(e.to_string()))
            },
        }
    }
}

fn rejection(status: u16, body: &str) -> PushError {
    let reason = serde_json::from_str::<ApnsErrorBody>(body)
        .map(|b| b.reason)
        .unwrap_or_else(|_| body.trim().to_string());
    PushError::Rejected { status, reason }
}
