use std::sync::Arc;
use log::{debug, info, warn};
use tokio::sync::RwLock;

use crate::models::{RunState, RunStatus};
use crate::push_service::{PushEvent, PushRun};
use crate::types::{CancelMap, RunStatusMap};
use crate::util::get_short_token;

/// Finished runs kept around for `GET /runs/{run_id}`.
pub const MAX_TRACKED_RUNS: usize = 100;

/// Drain a run's events into the shared status map until it completes.
pub async fn track_run(run_id: u64,
    mut run: PushRun,
    runs: Arc<RwLock<RunStatusMap>>,
    cancel_channels: Arc<RwLock<CancelMap>>) {

    while let Some(event) = run.next_event().await {
        match &event {
            PushEvent::Begin => info!("run:: {} started", run_id),
            PushEvent::WillSend(token) => debug!("run:: {} sending to ...{}", run_id, get_short_token(token)),
            PushEvent::SendComplete(token) => debug!("run:: {} delivered to ...{}", run_id, get_short_token(token)),
            PushEvent::SendError(token, e) => warn!("run:: {} failed for ...{}: {}", run_id, get_short_token(token), e),
            PushEvent::Completed(summary) => info!("run:: {} completed, sent={} failed={}", run_id, summary.sent, summary.failed),
        }

        if let Some(status) = runs.write().await.get_mut(&run_id) {
            status.apply(&event);
        }
    }

    cancel_channels.write().await.remove(&run_id);

    let mut runs = runs.write().await;
    if let Some(status) = runs.get(&run_id) {
        if status.cancelled() > 0 {
            info!("run:: {} was cancelled, {} tokens skipped", run_id, status.cancelled());
        }
    }
    prune_finished(&mut runs);
}

/// Drop the oldest finished runs once more than [`MAX_TRACKED_RUNS`] are tracked.
fn prune_finished(runs: &mut RunStatusMap) {
    if runs.len() <= MAX_TRACKED_RUNS {
        return;
    }
    let mut finished: Vec<u64> = runs
        .iter()
        .filter(|(_, status)| status.state == RunState::Completed)
        .map(|(id, _)| *id)
        .collect();
    finished.sort_unstable();

    let excess = runs.len() - MAX_TRACKED_RUNS;
    for id in finished.into_iter().take(excess) {
        runs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{Hub, SimulatedHub};
    use crate::push_service::PushService;
    use std::collections::HashMap;
    use tokio::time::Duration;

    #[tokio::test]
    async fn tracked_run_ends_completed_and_uncancellable() {
        let hub: Arc<dyn Hub> = Arc::new(SimulatedHub::new(Duration::from_millis(1)));
        let service = PushService::new(Arc::downgrade(&hub));
        let run = service
            .push_with_tokens(vec!["aa11".into(), "zz".into()], "{}".into(), None, 10)
            .unwrap();

        let runs = Arc::new(RwLock::new(HashMap::from([(1, RunStatus::new(2))])));
        let cancel_channels = Arc::new(RwLock::new(HashMap::from([(1, run.canceller())])));
        track_run(1, run, Arc::clone(&runs), Arc::clone(&cancel_channels)).await;

        let status = runs.read().await.get(&1).cloned().unwrap();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!((status.sent, status.failed), (1, 1));
        assert_eq!(status.errors[0].token, "zz");
        assert!(cancel_channels.read().await.is_empty());
    }

    #[test]
    fn prune_keeps_running_and_newest() {
        let mut runs = RunStatusMap::new();
        for id in 1..=(MAX_TRACKED_RUNS as u64 + 5) {
            let mut status = RunStatus::new(1);
            if id != 2 {
                status.state = RunState::Completed;
            }
            runs.insert(id, status);
        }

        prune_finished(&mut runs);
        assert_eq!(runs.len(), MAX_TRACKED_RUNS);
        assert!(runs.contains_key(&2));
        assert!(!runs.contains_key(&1));
        assert!(!runs.contains_key(&6));
        assert!(runs.contains_key(&7));
    }
}
