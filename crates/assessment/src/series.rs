use serde::Serialize;

use crate::{AssessmentReport, ModuleScore};

/// Parallel label/value columns for a chart view.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Series {
    pub label: String,
    pub labels: Vec<String>,
    pub values: Vec<f64>,
}

impl Series {
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Good,
    Fair,
    Poor,
}

impl ScoreBand {
    pub fn of(score: f64) -> Self {
        if score >= 80.0 {
            ScoreBand::Good
        } else if score >= 60.0 {
            ScoreBand::Fair
        } else {
            ScoreBand::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScoreBand::Good => "good",
            ScoreBand::Fair => "fair",
            ScoreBand::Poor => "poor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedModule {
    pub rank: usize, // 1-based
    pub name: String,
    pub label: String,
    pub score: f64,
    pub band: ScoreBand,
}

/// "quality" -> "Quality"
pub fn display_label(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Module scores for the radar and pie views, in report order.
pub fn distribution_series(report: &AssessmentReport) -> Series {
    Series {
        label: "Module Scores".to_string(),
        labels: report.module_scores.iter().map(|m| display_label(&m.name)).collect(),
        values: report.module_scores.iter().map(|m| m.score).collect(),
    }
}

/// Criterion scores for the bar view, in report order.
pub fn breakdown_series(report: &AssessmentReport) -> Series {
    Series {
        label: "Criteria Scores".to_string(),
        labels: report.criteria_scores.iter().map(|c| display_label(&c.name)).collect(),
        values: report.criteria_scores.iter().map(|c| c.score).collect(),
    }
}

/// Modules ordered best first; equal scores fall back to name order.
pub fn ranked_modules(report: &AssessmentReport) -> Vec<RankedModule> {
    let mut sorted: Vec<&ModuleScore> = report.module_scores.iter().collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

    sorted
        .into_iter()
        .enumerate()
        .map(|(i, m)| RankedModule {
            rank: i + 1,
            name: m.name.clone(),
            label: display_label(&m.name),
            score: m.score,
            band: ScoreBand::of(m.score),
        })
        .collect()
}
