use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assessment::{AssessmentSummary, Dataset, DatasetId, ExportFormat, JobId, JobState, Score};
use assessor::error::{ApiError, Result};
use assessor::job::POLL_FAILURE;
use assessor::types::{
    BackendInfo, ExportedReport, PollResponse, ProgressField, StartAssessmentRequest, StartedAssessment,
};
use assessor::{AssessmentController, JobBackend, PollPolicy};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use tokio::time::{sleep, Instant};

/// Backend that replays canned poll responses and counts every call.
#[derive(Default)]
struct Scripted {
    start_error: Mutex<Option<ApiError>>,
    polls: Mutex<VecDeque<Result<PollResponse>>>,
    poll_delay: Duration,
    starts: AtomicUsize,
    poll_calls: AtomicUsize,
    exports: AtomicUsize,
}

impl Scripted {
    fn new(polls: Vec<Result<PollResponse>>) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into()),
            ..Default::default()
        })
    }

    fn slow(polls: Vec<Result<PollResponse>>, poll_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            polls: Mutex::new(polls.into()),
            poll_delay,
            ..Default::default()
        })
    }

    fn failing_start(err: ApiError) -> Arc<Self> {
        Arc::new(Self {
            start_error: Mutex::new(Some(err)),
            ..Default::default()
        })
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobBackend for Scripted {
    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        Ok(Vec::new())
    }

    async fn get_dataset(&self, id: &DatasetId) -> Result<Dataset> {
        Err(ApiError::NotFound(format!("Dataset {id} not found")))
    }

    async fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        Err(ApiError::NotFound(format!("Dataset {id} not found")))
    }

    async fn start_assessment(&self, _req: &StartAssessmentRequest) -> Result<StartedAssessment> {
        let n = self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.start_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(StartedAssessment {
            assessment_id: JobId::from(31 + n as u64),
            status: assessment::StatusToken::InProgress,
        })
    }

    async fn poll_assessment(&self, _id: &JobId) -> Result<PollResponse> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            sleep(self.poll_delay).await;
        }
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(PollResponse::in_progress(None)))
    }

    async fn fetch_report(&self, id: &JobId) -> Result<serde_json::Value> {
        Err(ApiError::NotFound(format!("Assessment {id} not found")))
    }

    async fn export_report(&self, id: &JobId, format: ExportFormat) -> Result<ExportedReport> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        Ok(ExportedReport::new(id.clone(), format, Bytes::from_static(b"module,score\n")))
    }

    async fn list_assessments(&self, _dataset_id: &DatasetId) -> Result<Vec<AssessmentSummary>> {
        Ok(Vec::new())
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "scripted".to_string(),
            base_url: None,
        }
    }
}

fn controller(backend: &Arc<Scripted>, policy: PollPolicy) -> AssessmentController {
    AssessmentController::new(backend.clone(), policy)
}

fn scenario_a_result() -> serde_json::Value {
    json!({
        "overall_score": 85,
        "module_scores": [
            { "name": "quality", "score": 90 },
            { "name": "accessibility", "score": 80 }
        ]
    })
}

const MODULES: [&str; 2] = ["quality", "accessibility"];

#[tokio::test(start_paused = true)]
async fn test_scenario_a_progress_then_completed() {
    let backend = Scripted::new(vec![
        Ok(PollResponse::in_progress(Some(40.0))),
        Ok(PollResponse::completed(scenario_a_result())),
    ]);
    let mut ctl = controller(&backend, PollPolicy::default());
    let mut rx = ctl.subscribe();

    let job_id = ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    assert_eq!(job_id.as_str(), "31");
    assert_eq!(ctl.state(), JobState::InProgress);
    assert_eq!(ctl.active_polls(), 1);

    rx.wait_for(|job| job.progress == 40.0).await.unwrap();
    assert_eq!(ctl.state(), JobState::InProgress);

    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.progress, 100.0);
    assert_eq!(ctl.active_polls(), 0);

    let report = ctl.report().unwrap();
    assert_eq!(report.overall_score, Score::Value(85.0));
    assert_eq!(report.module_scores.len(), 2);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.poll_calls(), 2);
    assert_eq!(ctl.snapshot(), job);
}

#[tokio::test(start_paused = true)]
async fn test_scenario_b_poll_error_fails_job() {
    let backend = Scripted::new(vec![Err(ApiError::Transport("connection refused".into()))]);
    let mut ctl = controller(&backend, PollPolicy::default());

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;

    assert_eq!(job.state, JobState::Failed);
    let detail = job.error.as_deref().unwrap();
    assert!(detail.starts_with(POLL_FAILURE));
    assert!(matches!(ctl.report(), Err(ApiError::JobFailed(d)) if !d.is_empty()));

    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.poll_calls(), 1);
    assert_eq!(ctl.active_polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_server_failure_without_detail_gets_generic_message() {
    let backend = Scripted::new(vec![Ok(PollResponse::failed(None))]);
    let mut ctl = controller(&backend, PollPolicy::default());

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.error.as_deref(), Some(assessment::GENERIC_FAILURE));
}

#[tokio::test(start_paused = true)]
async fn test_empty_modules_rejected_without_calls() {
    let backend = Scripted::new(vec![]);
    let mut ctl = controller(&backend, PollPolicy::default());

    let err = ctl.start(DatasetId::from(7u64), Vec::<String>::new()).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    let err = ctl.start(DatasetId::from(7u64), ["  "]).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    let err = ctl.start(DatasetId::new(""), MODULES).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    assert_eq!(backend.starts(), 0);
    assert_eq!(ctl.state(), JobState::NotStarted);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_is_idempotent_and_keeps_state() {
    let backend = Scripted::new(vec![]);
    let mut ctl = controller(&backend, PollPolicy::default());

    let before = ctl.snapshot();
    ctl.cancel();
    ctl.cancel();
    assert_eq!(ctl.snapshot(), before);

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let started = ctl.snapshot();
    ctl.cancel();
    ctl.cancel();
    assert_eq!(ctl.active_polls(), 0);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.poll_calls(), 0);
    assert_eq!(ctl.snapshot(), started);
    assert_eq!(ctl.state(), JobState::InProgress);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_ignores_in_flight_outcome() {
    let backend = Scripted::slow(
        vec![Ok(PollResponse::completed(scenario_a_result()))],
        Duration::from_secs(5),
    );
    let mut ctl = controller(&backend, PollPolicy { attempt_timeout: None, ..PollPolicy::default() });

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    sleep(Duration::from_secs(3)).await;
    assert_eq!(backend.poll_calls(), 1);
    ctl.cancel();

    sleep(Duration::from_secs(30)).await;
    assert_eq!(ctl.state(), JobState::InProgress);
    assert!(ctl.snapshot().result.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_start_while_polling_rejected() {
    let backend = Scripted::new(vec![]);
    let mut ctl = controller(&backend, PollPolicy::default());

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let err = ctl.start(DatasetId::from(8u64), MODULES).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(backend.starts(), 1);
    assert_eq!(ctl.snapshot().dataset_id, DatasetId::from(7u64));

    // Allowed again once the previous subscription is cancelled.
    ctl.cancel();
    ctl.start(DatasetId::from(8u64), MODULES).await.unwrap();
    assert_eq!(backend.starts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_progress_kept_when_omitted_or_lower() {
    let backend = Scripted::new(vec![
        Ok(PollResponse::in_progress(Some(40.0))),
        Ok(PollResponse::in_progress(None)),
        Ok(PollResponse::in_progress(Some(30.0))),
        Ok(PollResponse::in_progress(Some(60.0))),
    ]);
    let mut ctl = controller(&backend, PollPolicy::default());
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..4 {
        sleep(Duration::from_millis(2000)).await;
        sleep(Duration::from_millis(1)).await;
        seen.push(ctl.snapshot().progress);
    }
    assert_eq!(seen, vec![40.0, 40.0, 40.0, 60.0]);
    ctl.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_leaves_not_started() {
    let backend = Scripted::failing_start(ApiError::Transport("unreachable".into()));
    let mut ctl = controller(&backend, PollPolicy::default());

    let err = ctl.start(DatasetId::from(7u64), MODULES).await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(ctl.state(), JobState::NotStarted);
    assert_eq!(ctl.active_polls(), 0);

    sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.poll_calls(), 0);

    // Caller may retry.
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    assert_eq!(ctl.state(), JobState::InProgress);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_terminal_uses_fresh_job() {
    let backend = Scripted::new(vec![Ok(PollResponse::completed(scenario_a_result()))]);
    let mut ctl = controller(&backend, PollPolicy::default());

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let first = ctl.wait_terminal().await;
    assert_eq!(first.state, JobState::Completed);

    let second_id = ctl.start(DatasetId::from(7u64), ["quality"]).await.unwrap();
    let second = ctl.snapshot();
    assert_ne!(second.run_id, first.run_id);
    assert_eq!(second.job_id, Some(second_id));
    assert_ne!(second.job_id, first.job_id);
    assert_eq!(second.state, JobState::InProgress);
    assert_eq!(second.progress, 0.0);
    assert!(second.result.is_none());
    ctl.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_bounded_retry_recovers() {
    let backend = Scripted::new(vec![
        Err(ApiError::ServiceUnavailable),
        Ok(PollResponse::completed(scenario_a_result())),
    ]);
    let policy = PollPolicy {
        max_consecutive_failures: 1,
        ..PollPolicy::default()
    };
    let mut ctl = controller(&backend, policy);

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(backend.poll_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_max_polls_fails_job() {
    let backend = Scripted::new(vec![]);
    let policy = PollPolicy {
        max_polls: Some(3),
        ..PollPolicy::default()
    };
    let mut ctl = controller(&backend, policy);

    let t0 = Instant::now();
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(backend.poll_calls(), 3);
    // Fails right after the last allowed poll, not one interval later.
    let elapsed = t0.elapsed();
    assert!(elapsed >= Duration::from_millis(6000), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(7000), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_slow_poll_times_out_as_failure() {
    let backend = Scripted::slow(vec![], Duration::from_secs(60));
    let policy = PollPolicy {
        attempt_timeout: Some(Duration::from_secs(1)),
        ..PollPolicy::default()
    };
    let mut ctl = controller(&backend, policy);

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Failed);
    assert!(job.error.unwrap().starts_with(POLL_FAILURE));
}

#[tokio::test(start_paused = true)]
async fn test_drop_stops_polling() {
    let backend = Scripted::new(vec![]);
    let mut ctl = controller(&backend, PollPolicy::default());
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    drop(ctl);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(backend.poll_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_export_leaves_state_alone() {
    let backend = Scripted::new(vec![Ok(PollResponse::completed(scenario_a_result()))]);
    let mut ctl = controller(&backend, PollPolicy::default());

    let err = ctl.export(ExportFormat::Csv).await.unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));

    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();
    let job = ctl.wait_terminal().await;

    let export = ctl.export(ExportFormat::Csv).await.unwrap();
    assert_eq!(export.file_name, "report_31.csv");
    assert!(!export.bytes.is_empty());
    assert_eq!(ctl.snapshot(), job);
    assert_eq!(backend.exports.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_progress_detail_without_percentage_records_module() {
    let backend = Scripted::new(vec![
        Ok(PollResponse::in_progress(Some(40.0))),
        Ok(PollResponse {
            progress: Some(ProgressField::Detail {
                percentage: None,
                current_module: Some("accessibility".to_string()),
                modules_completed: Some(1),
                total_modules: Some(2),
            }),
            ..PollResponse::in_progress(None)
        }),
    ]);
    let mut ctl = controller(&backend, PollPolicy::default());
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();

    sleep(Duration::from_millis(4001)).await;
    let job = ctl.snapshot();
    assert_eq!(backend.poll_calls(), 2);
    assert_eq!(job.state, JobState::InProgress);
    assert_eq!(job.progress, 40.0);
    assert_eq!(job.current_module.as_deref(), Some("accessibility"));
    assert_eq!(job.modules_completed, Some(1));
    assert_eq!(job.total_modules, Some(2));
    ctl.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_unknown_status_keeps_polling() {
    let paused: PollResponse = serde_json::from_value(json!({ "status": "paused", "progress": 20 })).unwrap();
    let backend = Scripted::new(vec![
        Ok(paused.clone()),
        Ok(paused),
        Ok(PollResponse::completed(scenario_a_result())),
    ]);
    let mut ctl = controller(&backend, PollPolicy::default());
    ctl.start(DatasetId::from(7u64), MODULES).await.unwrap();

    sleep(Duration::from_millis(2001)).await;
    assert_eq!(ctl.state(), JobState::InProgress);
    assert_eq!(ctl.snapshot().progress, 20.0);
    assert_eq!(ctl.active_polls(), 1);

    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(backend.poll_calls(), 3);
}
