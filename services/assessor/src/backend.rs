use assessment::{AssessmentSummary, Dataset, DatasetId, ExportFormat, JobId};
use async_trait::async_trait;

use crate::error::Result;
use crate::types::{BackendInfo, ExportedReport, PollResponse, StartAssessmentRequest, StartedAssessment};

/// The logical operations the job client needs, independent of what answers them.
///
/// Chosen once at construction (see [`crate::mode::select_backend`]); the
/// controller and report assembly never branch on mode.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<Dataset>>;
    async fn get_dataset(&self, id: &DatasetId) -> Result<Dataset>;
    async fn delete_dataset(&self, id: &DatasetId) -> Result<()>;

    async fn start_assessment(&self, req: &StartAssessmentRequest) -> Result<StartedAssessment>;
    async fn poll_assessment(&self, id: &JobId) -> Result<PollResponse>;
    /// Raw report payload; feed it to [`assessment::assemble`].
    async fn fetch_report(&self, id: &JobId) -> Result<serde_json::Value>;
    async fn export_report(&self, id: &JobId, format: ExportFormat) -> Result<ExportedReport>;
    async fn list_assessments(&self, dataset_id: &DatasetId) -> Result<Vec<AssessmentSummary>>;

    fn info(&self) -> BackendInfo;
}
