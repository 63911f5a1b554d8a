use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Unsupported export format: {0} (expected pdf, html, json or csv)")]
    UnknownFormat(String),

    #[error("Malformed report payload: {0}")]
    Payload(String),
}

pub type Result<T> = std::result::Result<T, ReportError>;
