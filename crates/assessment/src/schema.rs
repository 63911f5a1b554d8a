use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// Servers hand out ids as JSON numbers or strings; both are carried as opaque text.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Unsigned(u64),
    Signed(i64),
    Text(String),
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            RawId::Unsigned(n) => n.to_string(),
            RawId::Signed(n) => n.to_string(),
            RawId::Text(s) => s,
        }
    }
}

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_blank(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self(n.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
                RawId::deserialize(d).map(|raw| Self(raw.into_string()))
            }
        }
    };
}

opaque_id!(
    /// Identifier of an ingested dataset.
    DatasetId
);
opaque_id!(
    /// Server-assigned identifier of one assessment run.
    JobId
);

/// Accepts RFC 3339 or a naive ISO-8601 timestamp (read as UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn de_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
}

/// Dataset record owned by the ingestion side; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    #[serde(rename = "file_size", default)]
    pub size_bytes: u64,
    #[serde(rename = "file_type", default)]
    pub content_type: String,
    #[serde(deserialize_with = "de_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Lifecycle state as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    NotStarted,
    InProgress,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::NotStarted => "not_started",
            JobState::InProgress => "in_progress",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status token reported by the server on a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusToken {
    NotStarted,
    InProgress,
    Completed,
    Failed,
    Unknown(String),
}

impl StatusToken {
    pub fn parse(raw: &str) -> Self {
        let norm = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "not_started" | "notstarted" | "pending" | "queued" => StatusToken::NotStarted,
            "in_progress" | "inprogress" | "running" => StatusToken::InProgress,
            "completed" | "complete" | "done" => StatusToken::Completed,
            "failed" | "error" => StatusToken::Failed,
            _ => StatusToken::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            StatusToken::NotStarted => "not_started",
            StatusToken::InProgress => "in_progress",
            StatusToken::Completed => "completed",
            StatusToken::Failed => "failed",
            StatusToken::Unknown(raw) => raw,
        }
    }
}

impl Serialize for StatusToken {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StatusToken {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(StatusToken::parse(&raw))
    }
}

/// Overall score, or an explicit marker that none was computed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Score {
    Value(f64),
    #[default]
    Unavailable,
}

impl Score {
    pub fn value(self) -> Option<f64> {
        match self {
            Score::Value(v) => Some(v),
            Score::Unavailable => None,
        }
    }

    pub fn is_available(self) -> bool {
        matches!(self, Score::Value(_))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Score::Value(v) => write!(f, "{v:.1}/100"),
            Score::Unavailable => f.write_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScore {
    pub name: String,
    pub score: f64, // 0..100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub name: String,
    pub score: f64, // 0..100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

/// Compact listing entry for the assessments of one dataset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssessmentSummary {
    #[serde(alias = "assessment_id")]
    pub id: JobId,
    pub dataset_id: DatasetId,
    pub status: StatusToken,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
}
