use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AppError, Result};

/// Identificativo del prodotto a cui si riferisce un job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Un job in coda. Il payload sul canale è l'ID in forma decimale UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
}

impl Job {
    pub fn new(id: i64) -> Self {
        Self { id: JobId(id) }
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.id.to_string().into_bytes()
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| AppError::MalformedJob("payload non UTF-8".to_string()))?;

        text.parse::<i64>()
            .map(Self::new)
            .map_err(|e| AppError::MalformedJob(format!("{:?}: {}", text, e)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Tutte le immagini elaborate e salvate
    Completed,
    /// Alcune immagini scartate, le altre salvate
    Partial,
    /// Nessuna immagine riuscita: il record non viene toccato
    NoImages,
    /// Prodotto inesistente, nessun lavoro eseguito
    NotFound,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Partial => write!(f, "partial"),
            JobStatus::NoImages => write!(f, "no_images"),
            JobStatus::NotFound => write!(f, "not_found"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStage {
    Download,
    Decode,
    Resize,
    Encode,
    Save,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageFailure {
    pub source: String,
    pub stage: ImageStage,
    pub error: String,
}

/// Esito di una singola esecuzione della pipeline
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub processed: Vec<String>,
    pub failures: Vec<ImageFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobOutcome {
    pub fn aborted(job_id: JobId, status: JobStatus, error: impl Into<String>) -> Self {
        Self {
            job_id,
            status,
            processed: Vec::new(),
            failures: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Partial)
    }
}
