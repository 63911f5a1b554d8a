use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{assemble, AssessmentReport, DatasetId, JobId, JobState};

/// Detail recorded when a job fails without a server-provided reason.
pub const GENERIC_FAILURE: &str = "Assessment failed for unknown reason";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percentage: Option<f64>,
    pub current_module: Option<String>,
    pub modules_completed: Option<u32>,
    pub total_modules: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started { job_id: JobId },
    Progress(ProgressUpdate),
    Completed { result: serde_json::Value },
    Failed { detail: Option<String> },
}

/// Client-side view of one assessment run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssessmentJob {
    /// Local identity, minted per start so a new run never reuses a terminal one.
    pub run_id: Uuid,
    pub job_id: Option<JobId>,
    pub dataset_id: DatasetId,
    pub modules: BTreeSet<String>,
    pub state: JobState,
    pub progress: f64, // 0..100
    pub current_module: Option<String>,
    pub modules_completed: Option<u32>,
    pub total_modules: Option<u32>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl AssessmentJob {
    pub fn new(dataset_id: DatasetId, modules: BTreeSet<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            job_id: None,
            dataset_id,
            modules,
            state: JobState::NotStarted,
            progress: 0.0,
            current_module: None,
            modules_completed: None,
            total_modules: None,
            result: None,
            error: None,
        }
    }

    /// Snapshot held by a controller that has never been started.
    pub fn idle() -> Self {
        Self {
            run_id: Uuid::nil(),
            ..Self::new(DatasetId::new(""), BTreeSet::new())
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Applies one lifecycle event. Returns whether anything observable changed.
    ///
    /// Terminal jobs ignore every event; `Started` is only accepted from
    /// `NotStarted`, everything else only from `InProgress`.
    pub fn apply_event(&mut self, ev: JobEvent) -> bool {
        match (self.state, ev) {
            (JobState::NotStarted, JobEvent::Started { job_id }) => {
                self.job_id = Some(job_id);
                self.state = JobState::InProgress;
                true
            }
            (JobState::InProgress, JobEvent::Progress(update)) => self.apply_progress(update),
            (JobState::InProgress, JobEvent::Completed { result }) => {
                self.state = JobState::Completed;
                self.progress = 100.0;
                self.result = Some(result);
                self.error = None;
                true
            }
            (JobState::InProgress, JobEvent::Failed { detail }) => {
                self.state = JobState::Failed;
                self.error = Some(
                    detail
                        .filter(|d| !d.trim().is_empty())
                        .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
                );
                true
            }
            _ => false,
        }
    }

    fn apply_progress(&mut self, update: ProgressUpdate) -> bool {
        let mut changed = false;

        // Omitted percentage keeps the last known value; a lower one never regresses it.
        if let Some(pct) = update.percentage {
            let pct = if pct.is_finite() { pct.clamp(0.0, 100.0) } else { 0.0 };
            if pct > self.progress {
                self.progress = pct;
                changed = true;
            }
        }
        if update.current_module.is_some() && update.current_module != self.current_module {
            self.current_module = update.current_module;
            changed = true;
        }
        if update.modules_completed.is_some() && update.modules_completed != self.modules_completed {
            self.modules_completed = update.modules_completed;
            changed = true;
        }
        if update.total_modules.is_some() && update.total_modules != self.total_modules {
            self.total_modules = update.total_modules;
            changed = true;
        }
        changed
    }

    /// Assembles the stored terminal payload; `None` unless completed.
    pub fn report(&self) -> Option<AssessmentReport> {
        match (self.state, &self.result) {
            (JobState::Completed, Some(payload)) => Some(assemble(payload)),
            _ => None,
        }
    }
}
