use radiograph_analyst::{AnalysisOutcome, BatchIdentity};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadedImage {
    pub filename: String,
    /// Base64 of the file contents.
    pub data: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzeRequest {
    pub images: Vec<UploadedImage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SkippedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub id: u64,
    pub images: BatchIdentity,
    pub duration: Duration,
    pub outcome: AnalysisOutcome,
}
