use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::hub::PushError;
use crate::notification::DEFAULT_PRIORITY;
use crate::push_service::{PushEvent, RunSummary};

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PushRequestData {
    pub tokens: Vec<String>,
    /// Either a pre-serialized JSON string or a JSON object sent as-is.
    pub payload: Value,
    /// Unix seconds.
    pub expiry: Option<u64>,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

impl PushRequestData {
    pub fn payload_string(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn expiry_time(&self) -> Option<SystemTime> {
        self.expiry.map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
    }
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PushAccepted {
    pub run_id: u64,
    pub tokens: usize,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    Queued,
    Running,
    Completed,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunFailure {
    pub token: String,
    pub error: String,
}

/// Progress of a push run, folded from its events.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub state: RunState,
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub errors: Vec<RunFailure>,
}

impl RunStatus {
    pub fn new(total: usize) -> RunStatus {
        RunStatus {
            state: RunState::Queued,
            total,
            sent: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }

    pub fn apply(&mut self, event: &PushEvent) {
        match event {
            PushEvent::Begin => self.state = RunState::Running,
            PushEvent::WillSend(_) => {}
            PushEvent::SendComplete(_) => self.sent += 1,
            PushEvent::SendError(token, error) => {
                self.failed += 1;
                self.errors.push(RunFailure { token: token.clone(), error: error.to_string() });
            }
            PushEvent::Completed(RunSummary { sent, failed }) => {
                self.state = RunState::Completed;
                self.sent = *sent;
                self.failed = *failed;
            }
        }
    }

    pub fn cancelled(&self) -> usize {
        let cancelled = PushError::Cancelled.to_string();
        self.errors.iter().filter(|e| e.error == cancelled).count()
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportFilesData {
    pub files: Vec<String>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportFilesResponse {
    pub added: usize,
    pub files: usize,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportFailure {
    pub file: String,
    pub error: String,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub tokens: Vec<String>,
    pub errors: Vec<ImportFailure>,
}

#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatus {
    pub working: bool,
    pub tokens: Vec<String>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ErrorBody {
    pub error: String,
}
