use assessment::{AssessmentSummary, Dataset, DatasetId, ExportFormat, JobId};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::gateway::TransportGateway;
use crate::types::{BackendInfo, ExportedReport, PollResponse, StartAssessmentRequest, StartedAssessment};

/// Forwards every operation verbatim to the gateway.
pub struct LiveBackend {
    gateway: TransportGateway,
}

impl LiveBackend {
    pub fn new(gateway: TransportGateway) -> Self {
        Self { gateway }
    }
}

// Listing endpoints answer with either a bare array or a paged envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Datasets { datasets: Vec<T> },
    Assessments { assessments: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(v) | Listing::Datasets { datasets: v } | Listing::Assessments { assessments: v } => v,
        }
    }
}

fn seg(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl crate::backend::JobBackend for LiveBackend {
    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        let listing: Listing<Dataset> = self.gateway.get_json("/ingestion/datasets").await?;
        Ok(listing.into_vec())
    }

    async fn get_dataset(&self, id: &DatasetId) -> Result<Dataset> {
        self.gateway
            .get_json(&format!("/ingestion/datasets/{}", seg(id.as_str())))
            .await
    }

    async fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        self.gateway
            .delete(&format!("/ingestion/datasets/{}", seg(id.as_str())))
            .await
    }

    async fn start_assessment(&self, req: &StartAssessmentRequest) -> Result<StartedAssessment> {
        debug!(dataset_id = %req.dataset_id, modules = ?req.modules, "live: trigger assessment");
        self.gateway.post_json("/assessment/trigger", req).await
    }

    async fn poll_assessment(&self, id: &JobId) -> Result<PollResponse> {
        self.gateway
            .get_json(&format!("/assessment/status/{}", seg(id.as_str())))
            .await
    }

    async fn fetch_report(&self, id: &JobId) -> Result<serde_json::Value> {
        self.gateway
            .get_json(&format!("/assessment/report/{}", seg(id.as_str())))
            .await
    }

    async fn export_report(&self, id: &JobId, format: ExportFormat) -> Result<ExportedReport> {
        let bytes = self
            .gateway
            .get_bytes(
                &format!("/assessment/export/{}", seg(id.as_str())),
                &[("format", format.as_str())],
            )
            .await?;
        Ok(ExportedReport::new(id.clone(), format, bytes))
    }

    async fn list_assessments(&self, dataset_id: &DatasetId) -> Result<Vec<AssessmentSummary>> {
        let listing: Listing<AssessmentSummary> = self
            .gateway
            .get_json(&format!("/assessment/dataset/{}", seg(dataset_id.as_str())))
            .await?;
        Ok(listing.into_vec())
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "live".to_string(),
            base_url: Some(self.gateway.base_url().to_string()),
        }
    }
}
