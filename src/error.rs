use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(String),
    #[error("row source query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("row source returned corrupt data: {0}")]
    Corrupt(String),
}

impl SourceError {
    pub fn code(&self) -> &'static str {
        match self {
            SourceError::NotFound(_) => "not_found",
            SourceError::Query(_) => "db_query_failed",
            SourceError::Corrupt(_) => "source_failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("override store query failed: {0}")]
    Query(rusqlite::Error),
    #[error("override store write failed: {0}")]
    Write(rusqlite::Error),
    #[error("unknown grade: {0}")]
    UnknownGrade(String),
    #[error("missing student id")]
    MissingStudent,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Query(_) => "db_query_failed",
            StoreError::Write(_) => "db_insert_failed",
            StoreError::UnknownGrade(_) | StoreError::MissingStudent => "bad_params",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum GradingError {
    #[error("unknown grade label: {0}")]
    UnknownGrade(String),
    #[error("threshold for {grade} must be a finite number, got {threshold}")]
    BadThreshold { grade: String, threshold: f64 },
}

/// Failure of one grading pass. Collaborator failures are fatal for the pass.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] GradingError),
}

impl ReportError {
    pub fn code(&self) -> &'static str {
        match self {
            ReportError::Source(e) => e.code(),
            ReportError::Store(e) => e.code(),
            ReportError::Config(_) => "bad_params",
        }
    }
}
