use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tracing::error;
use tssbridge_watcher::{SideStatus, WatcherStatus};

use crate::jobs::{Job, JobError, JobQueues};

/// Latest progress published by the two watchers and the queues their
/// workers pull from.
pub struct NodeState {
    pub home: watch::Receiver<WatcherStatus>,
    pub side: watch::Receiver<SideStatus>,
    pub jobs: JobQueues,
}

impl NodeState {
    pub fn new(
        home: watch::Receiver<WatcherStatus>,
        side: watch::Receiver<SideStatus>,
        jobs: JobQueues,
    ) -> Self {
        Self { home, side, jobs }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct NextJobResponse {
    pub job: Option<Job>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn job_error(e: JobError) -> ApiError {
    let (status, error) = match &e {
        JobError::UnknownQueue(_) => (StatusCode::NOT_FOUND, "UnknownQueue"),
        JobError::NotInFlight { .. } => (StatusCode::CONFLICT, "NotInFlight"),
        JobError::Storage(_) => {
            error!("queue storage failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "StorageError")
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: e.to_string(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub home: WatcherStatus,
    pub side: SideStatus,
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Liveness with the cursor of each watcher.
pub async fn health_check(State(state): State<Arc<NodeState>>) -> Json<Value> {
    let home_cursor = state.home.borrow().cursor;
    let side_cursor = state.side.borrow().cursor;

    Json(json!({
        "status": "healthy",
        "timestamp": unix_seconds(),
        "components": {
            "home": { "cursor": home_cursor },
            "side": { "cursor": side_cursor }
        }
    }))
}

pub async fn get_status(State(state): State<Arc<NodeState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        home: state.home.borrow().clone(),
        side: state.side.borrow().clone(),
    })
}

/// Next job of a queue for a worker. The same job is returned until it is
/// acked; `job` is null when the queue is empty.
pub async fn next_job(
    State(state): State<Arc<NodeState>>,
    Path(name): Path<String>,
) -> Result<Json<NextJobResponse>, ApiError> {
    let job = state.jobs.next(&name).map_err(job_error)?;
    Ok(Json(NextJobResponse { job }))
}

pub async fn ack_job(
    State(state): State<Arc<NodeState>>,
    Path((name, tag)): Path<(String, u64)>,
) -> Result<Json<Value>, ApiError> {
    state.jobs.ack(&name, tag).map_err(job_error)?;
    Ok(Json(json!({ "acked": tag })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tssbridge_storage::{declare, InMemoryStorage};
    use tssbridge_types::{ChainId, EpochPhase, KeygenRequest, WorkMessage, WorkQueue};
    use tssbridge_watcher::RangeAlignment;

    fn home_status(cursor: u64) -> WatcherStatus {
        WatcherStatus {
            chain: ChainId::Home,
            cursor,
            epoch: 1,
            next_epoch: None,
            phase: EpochPhase::Ready,
            active: true,
            is_current_validator: true,
            threshold: 2,
            parties: 3,
            range: RangeAlignment::new(3, 100),
            foreign_nonce: 4,
            last_transaction_block: 0,
        }
    }

    fn side_status(cursor: u64) -> SideStatus {
        SideStatus {
            chain: ChainId::Side,
            cursor,
            committee: None,
        }
    }

    fn node_state(
        home: watch::Receiver<WatcherStatus>,
        side: watch::Receiver<SideStatus>,
    ) -> Arc<NodeState> {
        let jobs = JobQueues::declare(Arc::new(InMemoryStorage::new())).unwrap();
        Arc::new(NodeState::new(home, side, jobs))
    }

    #[tokio::test]
    async fn test_status_follows_published_progress() {
        let (home_tx, home_rx) = watch::channel(home_status(100));
        let (_side_tx, side_rx) = watch::channel(side_status(7));
        let state = node_state(home_rx, side_rx);

        home_tx.send_replace(home_status(150));

        let Json(status) = get_status(State(state.clone())).await;
        assert_eq!(status.home.cursor, 150);
        assert_eq!(status.side.cursor, 7);

        let body = serde_json::to_value(&status).unwrap();
        assert_eq!(body["home"]["foreignNonce"], 4);
        assert_eq!(body["home"]["range"]["size"], 3);
    }

    #[tokio::test]
    async fn test_health_reports_cursors() {
        let (_home_tx, home_rx) = watch::channel(home_status(42));
        let (_side_tx, side_rx) = watch::channel(side_status(9));
        let state = node_state(home_rx, side_rx);

        let Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["home"]["cursor"], 42);
        assert_eq!(body["components"]["side"]["cursor"], 9);
    }

    #[tokio::test]
    async fn test_worker_pulls_and_acks_jobs() {
        let storage = Arc::new(InMemoryStorage::new());
        let keygen = declare(storage.clone(), WorkQueue::Keygen).unwrap();
        keygen
            .send(&WorkMessage::Keygen(KeygenRequest {
                epoch: 2,
                block_number: 150,
                threshold: 2,
                parties: 3,
            }))
            .unwrap();

        let (_home_tx, home_rx) = watch::channel(home_status(100));
        let (_side_tx, side_rx) = watch::channel(side_status(7));
        let jobs = JobQueues::declare(storage.clone()).unwrap();
        let state = Arc::new(NodeState::new(home_rx, side_rx, jobs));

        let Json(next) = next_job(State(state.clone()), Path("keygenQueue".to_string()))
            .await
            .unwrap();
        let job = next.job.unwrap();
        let body = serde_json::to_value(&job).unwrap();
        assert_eq!(body["queue"], "keygenQueue");
        assert_eq!(body["message"]["blockNumber"], 150);
        assert_eq!(body["message"]["parties"], 3);

        let Err((status, _)) =
            ack_job(State(state.clone()), Path(("keygenQueue".to_string(), job.tag + 7))).await
        else {
            panic!("acked a delivery that is not in flight");
        };
        assert_eq!(status, StatusCode::CONFLICT);

        let Json(acked) = ack_job(State(state.clone()), Path(("keygenQueue".to_string(), job.tag)))
            .await
            .unwrap();
        assert_eq!(acked["acked"], job.tag);

        let Json(next) = next_job(State(state.clone()), Path("keygenQueue".to_string()))
            .await
            .unwrap();
        assert!(next.job.is_none());

        let Err((status, Json(error))) =
            next_job(State(state), Path("unknownQueue".to_string())).await
        else {
            panic!("unknown queue resolved");
        };
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error.error, "UnknownQueue");
    }
}
