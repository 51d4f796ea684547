use std::collections::HashMap;

use crate::models::RunStatus;
use crate::push_service::RunCanceller;

/// <run_id, RunCanceller>
pub type CancelMap = HashMap<u64, RunCanceller>;

/// <run_id, RunStatus>
pub type RunStatusMap = HashMap<u64, RunStatus>;
