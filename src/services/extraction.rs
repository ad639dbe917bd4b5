//! HTTP client for the extraction service.
//!
//! Both flows talk to the same backend: the batch flow (schema, upload, process, export,
//! cleanup) through [`ExtractionService`] and the invoice Q&A flow through [`ChatService`].
//! [`HttpExtractionService`] implements both with a blocking `reqwest` client; the
//! workflow and chat state machines only see the traits.

use crate::config::Config;
use crate::error::{ExtractError, Result};
use crate::models::{FileHandle, ResultRecord};
use crate::types::{
    ApiKeyRequest, ChatReply, ChatRequest, CleanupRequest, ConversationSnapshot,
    CreateSchemaRequest, CreateSchemaResponse, ErrorBody, ImageAnalysis, JobRequest,
    ProcessResponse, SessionRequest, SuccessResponse, UpdateResultsRequest, UploadResponse,
};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest raw error body echoed back to the user.
const MAX_ERROR_BODY: usize = 500;

/// Batch extraction endpoints.
pub trait ExtractionService: Send + Sync {
    /// Registers `[name, type, description]` triples and returns the schema id.
    fn create_schema(&self, schema: &[[String; 3]]) -> Result<String>;
    /// Sends the whole batch in one multipart request and returns the job id.
    fn upload_files(&self, schema_id: &str, files: &[FileHandle]) -> Result<String>;
    fn process_job(&self, job_id: &str) -> Result<Vec<ResultRecord>>;
    fn update_results(&self, job_id: &str, results: &[ResultRecord]) -> Result<()>;
    fn export_url(&self, job_id: &str) -> Result<String>;
    fn download_export(&self, job_id: &str) -> Result<Vec<u8>>;
    fn cleanup(&self, job_id: Option<&str>, schema_id: Option<&str>) -> Result<()>;
}

/// Invoice Q&A endpoints.
pub trait ChatService: Send + Sync {
    fn upload_image(&self, image: &FileHandle, session_id: &str) -> Result<ImageAnalysis>;
    fn ask(&self, question: &str, session_id: &str) -> Result<ChatReply>;
    fn get_conversation(&self, session_id: &str) -> Result<ConversationSnapshot>;
    fn reset_conversation(&self, session_id: &str) -> Result<()>;
}

pub struct HttpExtractionService {
    client: Client,
    base_url: Url,
}

/// Error text for a failed response: the body's `error` (or `message`), else the raw body,
/// else the status line.
pub fn service_error_text(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(text) = parsed.error.or(parsed.message).filter(|t| !t.trim().is_empty()) {
            return text;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("Request failed ({})", status)
    } else if trimmed.chars().count() > MAX_ERROR_BODY {
        let cut: String = trimmed.chars().take(MAX_ERROR_BODY).collect();
        format!("Request failed ({}): {}...", status, cut)
    } else {
        format!("Request failed ({}): {}", status, trimmed)
    }
}

fn unsuccessful(error: Option<String>, fallback: &str) -> ExtractError {
    ExtractError::Service(
        error
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string()),
    )
}

fn file_part(file: &FileHandle) -> Result<Part> {
    let bytes = fs::read(&file.path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ExtractError::Validation(format!("File not found: {}", file.path.display()))
        } else {
            ExtractError::Validation(format!("Could not read file {}: {}", file.path.display(), e))
        }
    })?;
    let part = Part::bytes(bytes)
        .file_name(file.name.clone())
        .mime_str(&file.mime_type)?;
    Ok(part)
}

impl HttpExtractionService {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| ExtractError::Config(format!("Invalid API URL '{}': {}", config.api_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ExtractError::Config(format!(
                "API URL '{}' cannot be used as a base URL",
                config.api_url
            )));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("invoice-extract/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ExtractError::Config("API URL cannot be used as a base URL".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.endpoint(&[path])?;
        debug!(%url, "POST");
        Ok(self.client.post(url).json(body).send()?)
    }

    /// Decodes a JSON body, turning non-2xx statuses into [`ExtractError::Service`].
    fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            let text = service_error_text(status, &body);
            warn!(%status, error = %text, "service returned an error");
            return Err(ExtractError::Service(text));
        }
        serde_json::from_str(&body).map_err(|e| ExtractError::InvalidResponse(e.to_string()))
    }

    /// Accepts any 2xx; the body, if any, is ignored.
    fn expect_ok(response: Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        let text = service_error_text(status, &body);
        warn!(%status, error = %text, "service returned an error");
        Err(ExtractError::Service(text))
    }

    /// Stores a new model API key on the service.
    pub fn update_api_key(&self, api_key: &str) -> Result<()> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ExtractError::Validation("API key cannot be empty".to_string()));
        }
        let response = self.post_json("update_api_key", &ApiKeyRequest { api_key })?;
        Self::expect_ok(response)
    }
}

impl ExtractionService for HttpExtractionService {
    fn create_schema(&self, schema: &[[String; 3]]) -> Result<String> {
        let request = CreateSchemaRequest {
            schema: schema.to_vec(),
        };
        let response = self.post_json("create_schema", &request)?;
        let reply: CreateSchemaResponse = Self::read_json(response)?;
        match (reply.success, reply.schema_id) {
            (true, Some(id)) if !id.is_empty() => Ok(id),
            (true, _) => Err(ExtractError::InvalidResponse(
                "schema created but no schema_id returned".to_string(),
            )),
            (false, _) => Err(unsuccessful(reply.error, "Schema creation failed")),
        }
    }

    fn upload_files(&self, schema_id: &str, files: &[FileHandle]) -> Result<String> {
        let mut form = Form::new().text("schema_id", schema_id.to_string());
        for file in files {
            form = form.part("files[]", file_part(file)?);
        }
        let url = self.endpoint(&["upload_images"])?;
        debug!(%url, files = files.len(), "POST multipart");
        let response = self.client.post(url).multipart(form).send()?;
        let reply: UploadResponse = Self::read_json(response)?;
        match (reply.success, reply.job_id) {
            (true, Some(id)) if !id.is_empty() => {
                if let Some(count) = reply.files_count {
                    if count != files.len() {
                        warn!(sent = files.len(), accepted = count, "service accepted fewer files than sent");
                    }
                }
                Ok(id)
            }
            (true, _) => Err(ExtractError::InvalidResponse(
                "upload succeeded but no job_id returned".to_string(),
            )),
            (false, _) => Err(unsuccessful(reply.error, "Upload failed")),
        }
    }

    fn process_job(&self, job_id: &str) -> Result<Vec<ResultRecord>> {
        let response = self.post_json("process_images", &JobRequest { job_id })?;
        let reply: ProcessResponse = Self::read_json(response)?;
        if !reply.success {
            return Err(unsuccessful(reply.error, "Processing failed"));
        }
        Ok(reply.results.unwrap_or_default())
    }

    fn update_results(&self, job_id: &str, results: &[ResultRecord]) -> Result<()> {
        let response = self.post_json("update_results", &UpdateResultsRequest { job_id, results })?;
        Self::expect_ok(response)
    }

    fn export_url(&self, job_id: &str) -> Result<String> {
        Ok(self.endpoint(&["download_excel", job_id])?.to_string())
    }

    fn download_export(&self, job_id: &str) -> Result<Vec<u8>> {
        let url = self.endpoint(&["download_excel", job_id])?;
        debug!(%url, "GET");
        let response = self.client.get(url).send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ExtractError::Service(service_error_text(status, &body)));
        }
        Ok(response.bytes()?.to_vec())
    }

    fn cleanup(&self, job_id: Option<&str>, schema_id: Option<&str>) -> Result<()> {
        let response = self.post_json("cleanup", &CleanupRequest { job_id, schema_id })?;
        let reply: SuccessResponse = Self::read_json(response)?;
        if reply.success {
            Ok(())
        } else {
            Err(unsuccessful(reply.error, "Cleanup failed"))
        }
    }
}

impl ChatService for HttpExtractionService {
    fn upload_image(&self, image: &FileHandle, session_id: &str) -> Result<ImageAnalysis> {
        let form = Form::new()
            .part("image", file_part(image)?)
            .text("session_id", session_id.to_string());
        let url = self.endpoint(&["upload_image"])?;
        debug!(%url, %session_id, "POST multipart");
        let response = self.client.post(url).multipart(form).send()?;
        Self::read_json(response)
    }

    fn ask(&self, question: &str, session_id: &str) -> Result<ChatReply> {
        let response = self.post_json("chat", &ChatRequest { question, session_id })?;
        Self::read_json(response)
    }

    fn get_conversation(&self, session_id: &str) -> Result<ConversationSnapshot> {
        let url = self.endpoint(&["get_conversation"])?;
        debug!(%url, %session_id, "GET");
        let response = self
            .client
            .get(url)
            .query(&[("session_id", session_id)])
            .send()?;
        Self::read_json(response)
    }

    fn reset_conversation(&self, session_id: &str) -> Result<()> {
        let response = self.post_json("reset", &SessionRequest { session_id })?;
        Self::expect_ok(response)
    }
}
