use crate::models::{ChatMessage, ResultRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct CreateSchemaRequest {
    pub schema: Vec<[String; 3]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSchemaResponse {
    #[serde(default)]
    pub success: bool,
    pub schema_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    pub job_id: Option<String>,
    pub files_count: Option<usize>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRequest<'a> {
    pub job_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub success: bool,
    pub results: Option<Vec<ResultRecord>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateResultsRequest<'a> {
    pub job_id: &'a str,
    pub results: &'a [ResultRecord],
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupRequest<'a> {
    pub job_id: Option<&'a str>,
    pub schema_id: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

/// Reply to an image upload in the chat flow.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageAnalysis {
    pub session_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub suggested_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub question: &'a str,
    pub session_id: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(default)]
    pub suggested_questions: Option<Vec<String>>,
}

/// Stored conversation returned by the service for a session id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConversationSnapshot {
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    pub image_description: Option<String>,
    pub image_url: Option<String>,
    pub suggested_questions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest<'a> {
    pub session_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRequest<'a> {
    pub api_key: &'a str,
}

/// Any error body the service sends back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    pub error: Option<String>,
    pub message: Option<String>,
}

/// Handle for the spreadsheet the service builds for a job. Fetching it is up to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub job_id: String,
    pub url: String,
}
