//! Job Lifecycle Controller.
//!
//! Owns one [`AssessmentJob`] at a time, starts it through the configured
//! backend and polls it on a fixed interval until the server reports a
//! terminal status. The poll loop runs as a spawned task bound to a
//! [`CancellationToken`]; the token is always cancelled before a terminal
//! state becomes visible, so observers never see a finished job with a live
//! subscription.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use assessment::{
    AssessmentJob, AssessmentReport, DatasetId, ExportFormat, JobEvent, JobId, JobState, StatusToken, GENERIC_FAILURE,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::JobBackend;
use crate::error::{ApiError, Result};
use crate::types::{ExportedReport, PollResponse, StartAssessmentRequest};

pub const POLL_INTERVAL: Duration = Duration::from_millis(2000);
const POLL_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Prefix of the failure detail recorded when a status check itself fails.
pub const POLL_FAILURE: &str = "Failed to check assessment status. Please try again.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// Upper bound for one status request; exceeding it counts as a failed poll.
    pub attempt_timeout: Option<Duration>,
    pub max_polls: Option<u32>,
    /// 0 fails the job on the first failed poll.
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            attempt_timeout: Some(POLL_ATTEMPT_TIMEOUT),
            max_polls: None,
            max_consecutive_failures: 0,
        }
    }
}

/// Handle to a running poll loop. Dropping it stops the loop.
struct PollSubscription {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollSubscription {
    fn is_active(&self) -> bool {
        !self.token.is_cancelled() && !self.handle.is_finished()
    }
}

impl Drop for PollSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

pub struct AssessmentController {
    backend: Arc<dyn JobBackend>,
    policy: PollPolicy,
    job_tx: Arc<watch::Sender<AssessmentJob>>,
    subscription: Option<PollSubscription>,
}

impl AssessmentController {
    pub fn new(backend: Arc<dyn JobBackend>, policy: PollPolicy) -> Self {
        let (job_tx, _) = watch::channel(AssessmentJob::idle());
        Self {
            backend,
            policy,
            job_tx: Arc::new(job_tx),
            subscription: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.job_tx.borrow().state
    }

    pub fn snapshot(&self) -> AssessmentJob {
        self.job_tx.borrow().clone()
    }

    /// Receiver that wakes on every observable change of the current job.
    pub fn subscribe(&self) -> watch::Receiver<AssessmentJob> {
        self.job_tx.subscribe()
    }

    /// 1 while a poll loop is live, else 0.
    pub fn active_polls(&self) -> usize {
        match &self.subscription {
            Some(sub) if sub.is_active() => 1,
            _ => 0,
        }
    }

    /// Starts a new assessment and begins polling it.
    ///
    /// Rejects an empty module set or a blank dataset id before any backend
    /// call. A previous job must be terminal or cancelled first. A failed
    /// start request leaves the fresh job in `NotStarted`.
    pub async fn start<I, S>(&mut self, dataset_id: DatasetId, modules: I) -> Result<JobId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let modules: BTreeSet<String> = modules
            .into_iter()
            .map(|m| m.into().trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        if modules.is_empty() {
            return Err(ApiError::Validation(
                "Select at least one assessment module".to_string(),
            ));
        }
        if dataset_id.is_blank() {
            return Err(ApiError::Validation("A dataset id is required".to_string()));
        }
        if self.active_polls() > 0 {
            return Err(ApiError::Validation(
                "An assessment is already running; cancel it or wait for it to finish".to_string(),
            ));
        }
        self.subscription = None;

        let job = AssessmentJob::new(dataset_id.clone(), modules.clone());
        let run_id = job.run_id;
        self.job_tx.send_replace(job);

        let req = StartAssessmentRequest {
            dataset_id: dataset_id.clone(),
            modules: modules.into_iter().collect(),
        };
        info!(run_id = %run_id, dataset_id = %dataset_id, modules = ?req.modules, "controller: starting assessment");

        let started = match self.backend.start_assessment(&req).await {
            Ok(started) => started,
            Err(e) => {
                warn!(run_id = %run_id, dataset_id = %dataset_id, error = %e, "controller: start failed");
                return Err(e);
            }
        };
        let job_id = started.assessment_id;
        if job_id.is_blank() {
            return Err(ApiError::Decode("start response carried no assessment id".to_string()));
        }

        publish(
            &self.job_tx,
            run_id,
            JobEvent::Started {
                job_id: job_id.clone(),
            },
        );

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.backend),
            self.policy.clone(),
            Arc::clone(&self.job_tx),
            run_id,
            job_id.clone(),
            token.clone(),
        ));
        self.subscription = Some(PollSubscription { token, handle });

        info!(run_id = %run_id, job_id = %job_id, "controller: polling started");
        Ok(job_id)
    }

    /// Stops polling without touching the recorded job state. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.token.cancel();
            debug!(run_id = %self.job_tx.borrow().run_id, "controller: polling cancelled");
        }
    }

    /// Resolves once the current poll loop has ended, returning the final snapshot.
    pub async fn wait_terminal(&mut self) -> AssessmentJob {
        if let Some(sub) = self.subscription.as_mut() {
            if let Err(e) = (&mut sub.handle).await {
                if e.is_panic() {
                    error!(error = %e, "controller: poll task panicked");
                }
            }
            self.subscription = None;
        }
        self.snapshot()
    }

    /// Report for the finished job.
    pub fn report(&self) -> Result<AssessmentReport> {
        let job = self.job_tx.borrow();
        match job.state {
            JobState::Completed => job
                .report()
                .ok_or_else(|| ApiError::Decode("completed assessment carried no result".to_string())),
            JobState::Failed => Err(ApiError::JobFailed(
                job.error.clone().unwrap_or_else(|| GENERIC_FAILURE.to_string()),
            )),
            JobState::NotStarted | JobState::InProgress => {
                Err(ApiError::Validation("Assessment not yet completed".to_string()))
            }
        }
    }

    /// Exports the current job's report. Never alters job state.
    pub async fn export(&self, format: ExportFormat) -> Result<ExportedReport> {
        let job_id = self
            .job_tx
            .borrow()
            .job_id
            .clone()
            .ok_or_else(|| ApiError::Validation("No assessment has been started".to_string()))?;
        self.backend.export_report(&job_id, format).await
    }
}

impl Drop for AssessmentController {
    fn drop(&mut self) {
        self.cancel();
    }
}

// Applies the event only if the watched job still belongs to `run_id`.
fn publish(tx: &watch::Sender<AssessmentJob>, run_id: Uuid, ev: JobEvent) -> bool {
    tx.send_if_modified(|job| job.run_id == run_id && job.apply_event(ev))
}

async fn poll_once(backend: &dyn JobBackend, job_id: &JobId, limit: Option<Duration>) -> Result<PollResponse> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, backend.poll_assessment(job_id))
            .await
            .map_err(|_| ApiError::Timeout)?,
        None => backend.poll_assessment(job_id).await,
    }
}

async fn poll_loop(
    backend: Arc<dyn JobBackend>,
    policy: PollPolicy,
    job_tx: Arc<watch::Sender<AssessmentJob>>,
    run_id: Uuid,
    job_id: JobId,
    token: CancellationToken,
) {
    let mut polls: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(policy.interval) => {}
        }

        polls += 1;

        let outcome = tokio::select! {
            _ = token.cancelled() => break,
            r = poll_once(backend.as_ref(), &job_id, policy.attempt_timeout) => r,
        };
        // A cancel that raced the response wins.
        if token.is_cancelled() {
            break;
        }

        match outcome {
            Ok(resp) => {
                failures = 0;
                debug!(run_id = %run_id, job_id = %job_id, status = %resp.status.as_str(), poll = polls, "poll: status");
                if let StatusToken::Unknown(raw) = &resp.status {
                    warn!(job_id = %job_id, status = %raw, "poll: unknown status, treating as in progress");
                }

                let event = resp.into_event();
                match event {
                    JobEvent::Completed { .. } => {
                        token.cancel();
                        if publish(&job_tx, run_id, event) {
                            info!(run_id = %run_id, job_id = %job_id, polls, "poll: assessment completed");
                        }
                        break;
                    }
                    JobEvent::Failed { .. } => {
                        token.cancel();
                        if publish(&job_tx, run_id, event) {
                            warn!(run_id = %run_id, job_id = %job_id, error = ?job_tx.borrow().error, "poll: assessment failed");
                        }
                        break;
                    }
                    _ => {
                        if publish(&job_tx, run_id, event) {
                            debug!(run_id = %run_id, job_id = %job_id, progress = job_tx.borrow().progress, "poll: progress");
                        }
                    }
                }
            }
            Err(e) => {
                failures += 1;
                if failures > policy.max_consecutive_failures {
                    token.cancel();
                    publish(
                        &job_tx,
                        run_id,
                        JobEvent::Failed {
                            detail: Some(format!("{POLL_FAILURE} {}", e.user_message())),
                        },
                    );
                    warn!(run_id = %run_id, job_id = %job_id, error = %e, failures, "poll: status check failed, job marked failed");
                    break;
                }
                warn!(run_id = %run_id, job_id = %job_id, error = %e, failures, "poll: status check failed, retrying");
            }
        }

        if let Some(max) = policy.max_polls {
            if polls >= max {
                token.cancel();
                publish(
                    &job_tx,
                    run_id,
                    JobEvent::Failed {
                        detail: Some(format!("Assessment did not finish after {max} status checks")),
                    },
                );
                warn!(run_id = %run_id, job_id = %job_id, polls, "poll: giving up after max polls");
                break;
            }
        }
    }
}
