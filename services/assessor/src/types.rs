use assessment::{DatasetId, ExportFormat, JobEvent, JobId, ProgressUpdate, StatusToken};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartAssessmentRequest {
    pub dataset_id: DatasetId,
    pub modules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StartedAssessment {
    #[serde(alias = "id")]
    pub assessment_id: JobId,
    #[serde(default = "in_progress")]
    pub status: StatusToken,
}

fn in_progress() -> StatusToken {
    StatusToken::InProgress
}

/// Progress arrives either as a bare percentage or as a detail object.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum ProgressField {
    Percentage(f64),
    Detail {
        percentage: Option<f64>,
        current_module: Option<String>,
        modules_completed: Option<u32>,
        total_modules: Option<u32>,
    },
}

// Numbers or numeric strings; anything else reads as absent.
fn lenient_number(v: &JsonValue) -> Option<f64> {
    match v {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn lenient_count(v: &JsonValue) -> Option<u32> {
    lenient_number(v).filter(|n| *n >= 0.0).map(|n| n as u32)
}

impl ProgressField {
    /// Reads whatever shape the server sent; `None` when nothing usable is there.
    pub fn from_value(v: &JsonValue) -> Option<Self> {
        match v {
            JsonValue::Object(map) => Some(ProgressField::Detail {
                percentage: map.get("percentage").and_then(lenient_number),
                current_module: map.get("current_module").and_then(JsonValue::as_str).map(str::to_string),
                modules_completed: map.get("modules_completed").and_then(lenient_count),
                total_modules: map.get("total_modules").and_then(lenient_count),
            }),
            other => lenient_number(other).map(ProgressField::Percentage),
        }
    }

    pub fn into_update(self) -> ProgressUpdate {
        match self {
            ProgressField::Percentage(p) => ProgressUpdate {
                percentage: Some(p),
                ..Default::default()
            },
            // A detail object without a percentage counts as 0.
            ProgressField::Detail {
                percentage,
                current_module,
                modules_completed,
                total_modules,
            } => ProgressUpdate {
                percentage: Some(percentage.unwrap_or(0.0)),
                current_module,
                modules_completed,
                total_modules,
            },
        }
    }
}

/// One status poll as returned by the server or the fixtures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollResponse {
    pub status: StatusToken,
    #[serde(default, deserialize_with = "de_progress", skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Everything else; older servers inline the result here.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, JsonValue>,
}

// A malformed progress field is dropped rather than failing the whole poll.
fn de_progress<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Option<ProgressField>, D::Error> {
    let raw = JsonValue::deserialize(d)?;
    Ok(ProgressField::from_value(&raw))
}

impl PollResponse {
    pub fn in_progress(percentage: Option<f64>) -> Self {
        Self {
            status: StatusToken::InProgress,
            progress: percentage.map(ProgressField::Percentage),
            result: None,
            error: None,
            extra: Default::default(),
        }
    }

    pub fn completed(result: JsonValue) -> Self {
        Self {
            status: StatusToken::Completed,
            progress: Some(ProgressField::Percentage(100.0)),
            result: Some(result),
            error: None,
            extra: Default::default(),
        }
    }

    pub fn failed(error: Option<String>) -> Self {
        Self {
            status: StatusToken::Failed,
            progress: None,
            result: None,
            error,
            extra: Default::default(),
        }
    }

    /// Lifecycle event this poll stands for.
    pub fn into_event(self) -> JobEvent {
        match self.status {
            StatusToken::Completed => JobEvent::Completed {
                result: self.result.unwrap_or(JsonValue::Object(self.extra)),
            },
            StatusToken::Failed => JobEvent::Failed { detail: self.error },
            StatusToken::NotStarted | StatusToken::InProgress | StatusToken::Unknown(_) => {
                JobEvent::Progress(self.progress.map(ProgressField::into_update).unwrap_or_default())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedReport {
    pub job_id: JobId,
    pub format: ExportFormat,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl ExportedReport {
    pub fn new(job_id: JobId, format: ExportFormat, bytes: Bytes) -> Self {
        Self {
            file_name: format.file_name(&job_id),
            content_type: format.content_type().to_string(),
            job_id,
            format,
            bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendInfo {
    pub name: String,
    pub base_url: Option<String>,
}
