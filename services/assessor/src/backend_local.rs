//! Deterministic in-process stand-in for the assessment server.
//!
//! Serves the bundled fixture collection, advances running assessments a
//! fixed step per poll and derives every score from a BLAKE3 hash, so the
//! same dataset and module always score the same. Each operation waits a
//! seeded-random delay to keep timing realistic.

use std::time::Duration;

use anyhow::{bail, Context};
use assessment::{
    assemble, display_label, AssessmentReport, AssessmentSummary, Dataset, DatasetId, ExportFormat, JobId,
    ScoreBand, StatusToken,
};
use async_trait::async_trait;
use bytes::Bytes;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::debug;

use crate::backend::JobBackend;
use crate::error::{ApiError, Result};
use crate::types::{
    BackendInfo, ExportedReport, PollResponse, ProgressField, StartAssessmentRequest, StartedAssessment,
};

const DATASETS_JSON: &str = include_str!("../fixtures/datasets.json");
const ASSESSMENTS_JSON: &str = include_str!("../fixtures/assessments.json");

/// Progress added by every poll of a running fixture assessment.
pub const PROGRESS_STEP: f64 = 25.0;

const NOT_COMPLETED: &str = "Assessment not yet completed";

/// Artificial latency range applied to every local operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixtureLatency {
    pub min: Duration,
    pub max: Duration,
}

impl Default for FixtureLatency {
    fn default() -> Self {
        Self {
            min: Duration::from_millis(1000),
            max: Duration::from_millis(1500),
        }
    }
}

impl FixtureLatency {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    /// `min-max` in milliseconds, or a single fixed value.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let ms = |s: &str| s.trim().parse::<u64>().with_context(|| format!("invalid milliseconds `{s}`"));
        let (min, max) = match raw.split_once('-') {
            Some((lo, hi)) => (ms(lo)?, ms(hi)?),
            None => {
                let v = ms(raw)?;
                (v, v)
            }
        };
        if min > max {
            bail!("latency minimum {min} exceeds maximum {max}");
        }
        Ok(Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        })
    }

    fn sample(&self, rng: &mut StdRng) -> Duration {
        if self.max.is_zero() {
            return Duration::ZERO;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rng.gen_range(lo..=hi))
    }
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureAssessment {
    id: JobId,
    dataset_id: DatasetId,
    modules: Vec<String>,
    status: StatusToken,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    result: Option<JsonValue>,
}

impl FixtureAssessment {
    fn summary(&self) -> AssessmentSummary {
        AssessmentSummary {
            id: self.id.clone(),
            dataset_id: self.dataset_id.clone(),
            status: self.status.clone(),
            overall_score: self
                .result
                .as_ref()
                .and_then(|r| r.get("overall_score"))
                .and_then(JsonValue::as_f64),
            created_at: self.created_at.clone(),
        }
    }

    fn completed_result(&self) -> Result<&JsonValue> {
        match (&self.status, &self.result) {
            (StatusToken::Completed, Some(result)) => Ok(result),
            _ => Err(ApiError::Validation(NOT_COMPLETED.to_string())),
        }
    }
}

struct FixtureStore {
    datasets: Vec<Dataset>,
    assessments: Vec<FixtureAssessment>,
    next_id: u64,
    rng: StdRng,
}

impl FixtureStore {
    fn dataset(&self, id: &DatasetId) -> Option<&Dataset> {
        self.datasets.iter().find(|d| &d.id == id)
    }

    fn assessment_mut(&mut self, id: &JobId) -> Result<&mut FixtureAssessment> {
        self.assessments
            .iter_mut()
            .find(|a| &a.id == id)
            .ok_or_else(|| ApiError::NotFound(format!("Assessment {id} not found")))
    }
}

pub struct LocalBackend {
    store: Mutex<FixtureStore>,
    latency: FixtureLatency,
}

impl LocalBackend {
    /// Loads the bundled fixture collection.
    pub fn new(latency: FixtureLatency, seed: u64) -> Result<Self> {
        let datasets: Vec<Dataset> = serde_json::from_str(DATASETS_JSON)?;
        let assessments: Vec<FixtureAssessment> = serde_json::from_str(ASSESSMENTS_JSON)?;
        Ok(Self::from_parts(datasets, assessments, latency, seed))
    }

    fn from_parts(
        datasets: Vec<Dataset>,
        mut assessments: Vec<FixtureAssessment>,
        latency: FixtureLatency,
        seed: u64,
    ) -> Self {
        // Completed fixtures ship without payloads; derive them like live runs.
        for a in assessments.iter_mut() {
            if a.status == StatusToken::Completed && a.result.is_none() {
                let name = datasets.iter().find(|d| d.id == a.dataset_id).map(|d| d.name.as_str());
                a.progress = 100.0;
                a.result = Some(fixture_result(a, name));
            }
        }
        let next_id = assessments
            .iter()
            .filter_map(|a| a.id.as_str().parse::<u64>().ok())
            .max()
            .unwrap_or(0)
            + 1;

        Self {
            store: Mutex::new(FixtureStore {
                datasets,
                assessments,
                next_id,
                rng: StdRng::seed_from_u64(seed),
            }),
            latency,
        }
    }

    async fn delay(&self) {
        let wait = {
            let mut store = self.store.lock().await;
            self.latency.sample(&mut store.rng)
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl JobBackend for LocalBackend {
    async fn list_datasets(&self) -> Result<Vec<Dataset>> {
        self.delay().await;
        Ok(self.store.lock().await.datasets.clone())
    }

    async fn get_dataset(&self, id: &DatasetId) -> Result<Dataset> {
        self.delay().await;
        self.store
            .lock()
            .await
            .dataset(id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Dataset {id} not found")))
    }

    async fn delete_dataset(&self, id: &DatasetId) -> Result<()> {
        self.delay().await;
        let mut store = self.store.lock().await;
        let before = store.datasets.len();
        store.datasets.retain(|d| &d.id != id);
        if store.datasets.len() == before {
            return Err(ApiError::NotFound(format!("Dataset {id} not found")));
        }
        Ok(())
    }

    async fn start_assessment(&self, req: &StartAssessmentRequest) -> Result<StartedAssessment> {
        self.delay().await;
        if req.modules.is_empty() {
            return Err(ApiError::Validation("At least one module is required".to_string()));
        }

        let mut store = self.store.lock().await;
        if store.dataset(&req.dataset_id).is_none() {
            return Err(ApiError::NotFound(format!("Dataset {} not found", req.dataset_id)));
        }

        let id = JobId::from(store.next_id);
        store.next_id += 1;
        store.assessments.push(FixtureAssessment {
            id: id.clone(),
            dataset_id: req.dataset_id.clone(),
            modules: req.modules.clone(),
            status: StatusToken::InProgress,
            progress: 0.0,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
            result: None,
        });
        debug!(job_id = %id, dataset_id = %req.dataset_id, "local: assessment started");

        Ok(StartedAssessment {
            assessment_id: id,
            status: StatusToken::InProgress,
        })
    }

    async fn poll_assessment(&self, id: &JobId) -> Result<PollResponse> {
        self.delay().await;
        let mut store = self.store.lock().await;
        let names: Vec<(DatasetId, String)> = store
            .datasets
            .iter()
            .map(|d| (d.id.clone(), d.name.clone()))
            .collect();
        let a = store.assessment_mut(id)?;

        match a.status {
            StatusToken::Completed => {
                let result = a.result.clone().unwrap_or_else(|| json!({}));
                return Ok(PollResponse::completed(result));
            }
            StatusToken::Failed => return Ok(PollResponse::failed(None)),
            _ => {}
        }

        a.status = StatusToken::InProgress;
        a.progress = (a.progress + PROGRESS_STEP).min(100.0);
        if a.progress >= 100.0 {
            let name = names.iter().find(|(ds, _)| ds == &a.dataset_id).map(|(_, n)| n.as_str());
            let result = fixture_result(a, name);
            a.status = StatusToken::Completed;
            a.result = Some(result.clone());
            debug!(job_id = %id, "local: assessment completed");
            return Ok(PollResponse::completed(result));
        }

        let total = a.modules.len() as u32;
        let done = ((a.progress / 100.0) * total as f64).floor() as u32;
        Ok(PollResponse {
            progress: Some(ProgressField::Detail {
                percentage: Some(a.progress),
                current_module: a.modules.get(done as usize).cloned(),
                modules_completed: Some(done),
                total_modules: Some(total),
            }),
            ..PollResponse::in_progress(None)
        })
    }

    async fn fetch_report(&self, id: &JobId) -> Result<JsonValue> {
        self.delay().await;
        let mut store = self.store.lock().await;
        store.assessment_mut(id)?.completed_result().cloned()
    }

    async fn export_report(&self, id: &JobId, format: ExportFormat) -> Result<ExportedReport> {
        self.delay().await;
        let mut store = self.store.lock().await;
        let report = assemble(store.assessment_mut(id)?.completed_result()?);
        let bytes = render_export(&report, id, format)?;
        Ok(ExportedReport::new(id.clone(), format, bytes))
    }

    async fn list_assessments(&self, dataset_id: &DatasetId) -> Result<Vec<AssessmentSummary>> {
        self.delay().await;
        let store = self.store.lock().await;
        Ok(store
            .assessments
            .iter()
            .filter(|a| &a.dataset_id == dataset_id)
            .map(FixtureAssessment::summary)
            .collect())
    }

    fn info(&self) -> BackendInfo {
        BackendInfo {
            name: "local".to_string(),
            base_url: None,
        }
    }
}

fn criteria_for(module: &str) -> &'static [&'static str] {
    match module {
        "quality" => &["completeness", "accuracy", "consistency"],
        "accessibility" => &["format_openness", "documentation", "licensing"],
        "privacy" => &["pii_exposure", "anonymization"],
        "fairness" => &["representation", "label_balance"],
        _ => &["coverage"],
    }
}

/// Stable score in [55.0, 99.9] for a (dataset, module[, criterion]) key.
pub fn fixture_score(parts: &[&str]) -> f64 {
    let hash = blake3::hash(parts.join("\u{1f}").as_bytes());
    let b = hash.as_bytes();
    let n = u16::from_le_bytes([b[0], b[1]]) % 450;
    55.0 + f64::from(n) / 10.0
}

fn fixture_result(a: &FixtureAssessment, dataset_name: Option<&str>) -> JsonValue {
    let ds = a.dataset_id.as_str();

    let mut module_scores = Vec::new();
    let mut criteria_scores = Vec::new();
    let mut findings = Vec::new();
    let mut recommendations = Vec::new();
    let mut total = 0.0;

    for module in &a.modules {
        let score = fixture_score(&[ds, module]);
        let label = display_label(module);
        total += score;
        module_scores.push(json!({
            "name": module,
            "score": score,
            "description": format!("{label} assessment"),
        }));
        for criterion in criteria_for(module) {
            criteria_scores.push(json!({
                "name": criterion,
                "score": fixture_score(&[ds, module, criterion]),
                "module": module,
            }));
        }
        match ScoreBand::of(score) {
            ScoreBand::Good => findings.push(format!("{label} meets the expected standard ({score:.1}).")),
            ScoreBand::Fair => {
                findings.push(format!("{label} shows room for improvement ({score:.1})."));
                recommendations.push(format!("Review the lowest scoring {} criteria.", module));
            }
            ScoreBand::Poor => {
                findings.push(format!("{label} is below the acceptable threshold ({score:.1})."));
                recommendations.push(format!("Prioritise remediation of {} issues.", module));
            }
        }
    }
    if recommendations.is_empty() {
        recommendations.push("No critical issues found; keep monitoring on new data.".to_string());
    }

    let mut result = json!({
        "assessment_id": a.id,
        "dataset_id": a.dataset_id,
        "module_scores": module_scores,
        "criteria_scores": criteria_scores,
        "findings": findings,
        "recommendations": recommendations,
        "created_at": a.created_at,
    });
    if !a.modules.is_empty() {
        let overall = (total / a.modules.len() as f64 * 10.0).round() / 10.0;
        result["overall_score"] = json!(overall);
        result["impact_analysis"] = json!({ "overall": ScoreBand::of(overall).as_str() });
    }
    if let Some(name) = dataset_name {
        result["dataset_name"] = json!(name);
    }
    result
}

const PDF_PLACEHOLDER: &[u8] = b"%PDF-1.4\n% placeholder report generated by the local fixture backend\n%%EOF\n";

fn render_export(report: &AssessmentReport, id: &JobId, format: ExportFormat) -> Result<Bytes> {
    let body = match format {
        ExportFormat::Csv => {
            let mut out = String::from("module,score\n");
            for m in &report.module_scores {
                out.push_str(&format!("{},{:.1}\n", csv_field(&m.name), m.score));
            }
            out.into_bytes()
        }
        ExportFormat::Json => serde_json::to_vec_pretty(report)?,
        ExportFormat::Html => {
            let rows: String = report
                .module_scores
                .iter()
                .map(|m| format!("<tr><td>{}</td><td>{:.1}</td></tr>", html_escape(&display_label(&m.name)), m.score))
                .collect();
            let id = html_escape(id.as_str());
            format!(
                "<!DOCTYPE html><html><head><title>Assessment {id}</title></head><body>\
                 <h1>Assessment {id}</h1><p>Overall score: {}</p>\
                 <table><tr><th>Module</th><th>Score</th></tr>{rows}</table></body></html>",
                report.overall_score
            )
            .into_bytes()
        }
        ExportFormat::Pdf => PDF_PLACEHOLDER.to_vec(),
    };
    Ok(Bytes::from(body))
}

fn csv_field(raw: &str) -> String {
    if raw.contains(|c: char| matches!(c, ',' | '"' | '\n' | '\r')) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
