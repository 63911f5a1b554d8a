//! Normalizes a terminal result payload into an [`AssessmentReport`].
//!
//! Payloads come from two kinds of servers and from the local fixtures, and
//! are frequently partial. Assembly never fails on a structurally valid JSON
//! value: absent lists become empty lists, malformed entries are skipped,
//! and a missing overall score becomes [`Score::Unavailable`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{parse_timestamp, CriterionScore, DatasetId, JobId, ModuleScore, ReportError, Result, Score};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AssessmentReport {
    pub assessment_id: Option<JobId>,
    pub dataset_id: Option<DatasetId>,
    pub dataset_name: Option<String>,
    pub overall_score: Score,
    pub module_scores: Vec<ModuleScore>,
    pub criteria_scores: Vec<CriterionScore>,
    pub recommendations: Vec<String>,
    pub findings: Vec<String>,
    pub impact_analysis: BTreeMap<String, String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// Builds a report from a raw result payload. Pure and idempotent.
pub fn assemble(payload: &Value) -> AssessmentReport {
    AssessmentReport {
        assessment_id: id_field(payload, &["assessment_id", "id"]).map(JobId::new),
        dataset_id: id_field(payload, &["dataset_id"]).map(DatasetId::new),
        dataset_name: payload.get("dataset_name").and_then(Value::as_str).map(str::to_string),
        overall_score: payload
            .get("overall_score")
            .and_then(score_of)
            .map(Score::Value)
            .unwrap_or(Score::Unavailable),
        module_scores: entries(payload, "module_scores")
            .filter_map(|e| {
                Some(ModuleScore {
                    name: name_of(e)?,
                    score: e.get("score").and_then(score_of)?,
                    description: e.get("description").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect(),
        criteria_scores: entries(payload, "criteria_scores")
            .filter_map(|e| {
                Some(CriterionScore {
                    name: name_of(e)?,
                    score: e.get("score").and_then(score_of)?,
                    module: e.get("module").and_then(Value::as_str).map(str::to_string),
                })
            })
            .collect(),
        recommendations: strings(payload, "recommendations"),
        findings: strings(payload, "findings"),
        impact_analysis: payload
            .get("impact_analysis")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default(),
        created_at: payload
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
    }
}

/// Parses JSON text and assembles it.
pub fn assemble_str(raw: &str) -> Result<AssessmentReport> {
    let payload: Value = serde_json::from_str(raw).map_err(|e| ReportError::Payload(e.to_string()))?;
    Ok(assemble(&payload))
}

fn entries<'a>(payload: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|a| a.as_slice())
        .unwrap_or_default()
        .iter()
}

fn strings(payload: &Value, key: &str) -> Vec<String> {
    entries(payload, key)
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn name_of(entry: &Value) -> Option<String> {
    entry
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn score_of(v: &Value) -> Option<f64> {
    let raw = match v {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    raw.is_finite().then(|| raw.clamp(0.0, 100.0))
}

fn id_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| match payload.get(*k)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
