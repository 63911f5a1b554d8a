use std::sync::Arc;
use std::time::Duration;

use assessment::{DatasetId, ExportFormat, JobId, JobState, Score, StatusToken};
use assessor::backend_local::{FixtureLatency, LocalBackend};
use assessor::error::ApiError;
use assessor::{AssessmentController, JobBackend, PollPolicy};
use tokio::time::Instant;

fn fixtures(latency: FixtureLatency) -> Arc<LocalBackend> {
    Arc::new(LocalBackend::new(latency, 42).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_every_operation_waits_within_range() {
    let backend = fixtures(FixtureLatency::default());

    for _ in 0..5 {
        let t0 = Instant::now();
        backend.list_datasets().await.unwrap();
        let elapsed = t0.elapsed();
        assert!(elapsed >= Duration::from_millis(1000), "{elapsed:?}");
        assert!(elapsed <= Duration::from_millis(1500), "{elapsed:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_flow_to_export() {
    let backend = fixtures(FixtureLatency::default());
    assert_eq!(backend.list_datasets().await.unwrap().len(), 7);
    let dataset = backend.get_dataset(&DatasetId::new("7")).await.unwrap();

    let mut ctl = AssessmentController::new(backend.clone(), PollPolicy::default());
    let job_id = ctl
        .start(DatasetId::new("7"), ["quality", "accessibility"])
        .await
        .unwrap();
    assert_eq!(job_id.as_str(), "5");

    let err = backend.fetch_report(&job_id).await.unwrap_err();
    assert_eq!(err, ApiError::Validation("Assessment not yet completed".into()));

    let mut rx = ctl.subscribe();
    rx.wait_for(|job| job.progress >= 25.0 && job.current_module.is_some())
        .await
        .unwrap();

    let job = ctl.wait_terminal().await;
    assert_eq!(job.state, JobState::Completed);

    let report = ctl.report().unwrap();
    assert_eq!(report.module_scores.len(), 2);
    assert_eq!(report.criteria_scores.len(), 6);
    assert_eq!(report.dataset_name.as_deref(), Some(dataset.name.as_str()));
    assert!(!report.findings.is_empty());
    assert!(!report.recommendations.is_empty());

    let mean = report.module_scores.iter().map(|m| m.score).sum::<f64>() / 2.0;
    let expected = (mean * 10.0).round() / 10.0;
    assert_eq!(report.overall_score, Score::Value(expected));

    let csv = ctl.export(ExportFormat::Csv).await.unwrap();
    assert_eq!(csv.file_name, "report_5.csv");
    let text = String::from_utf8(csv.bytes.to_vec()).unwrap();
    assert!(text.starts_with("module,score\n"));
    assert_eq!(text.lines().count(), 3);

    let pdf = ctl.export(ExportFormat::Pdf).await.unwrap();
    assert!(pdf.bytes.starts_with(b"%PDF"));
    assert_eq!(ctl.state(), JobState::Completed);

    let listed = backend.list_assessments(&DatasetId::new("7")).await.unwrap();
    let mine = listed.iter().find(|a| a.id == job_id).unwrap();
    assert_eq!(mine.status, StatusToken::Completed);
    assert_eq!(mine.overall_score, report.overall_score.value());
}

#[tokio::test(start_paused = true)]
async fn test_scores_are_deterministic() {
    let a = fixtures(FixtureLatency::none());
    let b = fixtures(FixtureLatency::none());

    let ra = a.fetch_report(&JobId::new("1")).await.unwrap();
    let rb = b.fetch_report(&JobId::new("1")).await.unwrap();
    assert_eq!(ra["module_scores"], rb["module_scores"]);
    assert_eq!(ra["overall_score"], rb["overall_score"]);
}

#[tokio::test(start_paused = true)]
async fn test_seeded_fixture_history() {
    let backend = fixtures(FixtureLatency::none());
    let history = backend.list_assessments(&DatasetId::new("1")).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|a| a.status == StatusToken::Completed && a.overall_score.is_some()));

    let html = backend.export_report(&JobId::new("2"), ExportFormat::Html).await.unwrap();
    assert_eq!(html.file_name, "report_2.html");
    assert!(String::from_utf8_lossy(&html.bytes).contains("<table>"));
}

#[tokio::test(start_paused = true)]
async fn test_missing_records_are_not_found() {
    let backend = fixtures(FixtureLatency::none());

    let mut ctl = AssessmentController::new(backend.clone(), PollPolicy::default());
    let err = ctl.start(DatasetId::new("99"), ["quality"]).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    assert_eq!(ctl.state(), JobState::NotStarted);

    assert!(matches!(
        backend.poll_assessment(&JobId::new("404")).await,
        Err(ApiError::NotFound(_))
    ));

    backend.delete_dataset(&DatasetId::new("3")).await.unwrap();
    assert!(matches!(
        backend.get_dataset(&DatasetId::new("3")).await,
        Err(ApiError::NotFound(_))
    ));
    assert!(matches!(
        backend.delete_dataset(&DatasetId::new("3")).await,
        Err(ApiError::NotFound(_))
    ));
}
