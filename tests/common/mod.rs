#![allow(dead_code)]

use invoice_extract_lib::error::{ExtractError, Result};
use invoice_extract_lib::models::{ChatMessage, FileHandle, ResultRecord};
use invoice_extract_lib::services::{ChatService, ExtractionService};
use invoice_extract_lib::types::{ChatReply, ConversationSnapshot, ImageAnalysis};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// In-memory stand-in for the extraction service. Records every call and can be told to
/// fail a given operation with a given error.
#[derive(Default)]
pub struct FakeService {
    pub schema_id: String,
    pub job_id: String,
    pub records: Vec<ResultRecord>,
    pub export_bytes: Vec<u8>,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, ExtractError>>,
    pub uploaded: Mutex<Vec<String>>,
    pub saved: Mutex<Vec<Vec<ResultRecord>>>,
}

impl FakeService {
    pub fn new(schema_id: &str, job_id: &str, records: Vec<ResultRecord>) -> Self {
        Self {
            schema_id: schema_id.to_string(),
            job_id: job_id.to_string(),
            records,
            export_bytes: b"PK-fake-xlsx".to_vec(),
            ..Default::default()
        }
    }

    pub fn fail(&self, operation: &'static str, error: ExtractError) {
        self.failures.lock().unwrap().insert(operation, error);
    }

    pub fn heal(&self, operation: &'static str) {
        self.failures.lock().unwrap().remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(ExtractError::Service(msg)) => Err(ExtractError::Service(msg.clone())),
            Some(ExtractError::Transport(msg)) => Err(ExtractError::Transport(msg.clone())),
            Some(other) => Err(ExtractError::InvalidResponse(other.to_string())),
            None => Ok(()),
        }
    }
}

impl ExtractionService for FakeService {
    fn create_schema(&self, schema: &[[String; 3]]) -> Result<String> {
        let names: Vec<&str> = schema.iter().map(|f| f[0].as_str()).collect();
        self.record(format!("create_schema {}", names.join(",")), "create_schema")?;
        Ok(self.schema_id.clone())
    }

    fn upload_files(&self, schema_id: &str, files: &[FileHandle]) -> Result<String> {
        self.record(format!("upload_files {} {}", schema_id, files.len()), "upload_files")?;
        *self.uploaded.lock().unwrap() = files.iter().map(|f| f.name.clone()).collect();
        Ok(self.job_id.clone())
    }

    fn process_job(&self, job_id: &str) -> Result<Vec<ResultRecord>> {
        self.record(format!("process_job {}", job_id), "process_job")?;
        Ok(self.records.clone())
    }

    fn update_results(&self, job_id: &str, results: &[ResultRecord]) -> Result<()> {
        self.record(format!("update_results {}", job_id), "update_results")?;
        self.saved.lock().unwrap().push(results.to_vec());
        Ok(())
    }

    fn export_url(&self, job_id: &str) -> Result<String> {
        Ok(format!("http://fake.local/download_excel/{}", job_id))
    }

    fn download_export(&self, job_id: &str) -> Result<Vec<u8>> {
        self.record(format!("download_export {}", job_id), "download_export")?;
        Ok(self.export_bytes.clone())
    }

    fn cleanup(&self, job_id: Option<&str>, schema_id: Option<&str>) -> Result<()> {
        self.record(
            format!("cleanup {} {}", job_id.unwrap_or("-"), schema_id.unwrap_or("-")),
            "cleanup",
        )
    }
}

/// Chat-side fake; the call log is shared so tests can read it after the session owns
/// the service.
#[derive(Default, Clone)]
pub struct FakeChat {
    pub history: Vec<ChatMessage>,
    pub issued_session_id: String,
    pub description: String,
    pub suggestions: Vec<String>,
    pub reply_suggestions: Option<Vec<String>>,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub failures: Arc<Mutex<HashMap<&'static str, ExtractError>>>,
}

impl FakeChat {
    pub fn fail(&self, operation: &'static str, error: ExtractError) {
        self.failures.lock().unwrap().insert(operation, error);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String, operation: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(ExtractError::Service(msg)) => Err(ExtractError::Service(msg.clone())),
            Some(ExtractError::Transport(msg)) => Err(ExtractError::Transport(msg.clone())),
            Some(other) => Err(ExtractError::InvalidResponse(other.to_string())),
            None => Ok(()),
        }
    }
}

impl ChatService for FakeChat {
    fn upload_image(&self, image: &FileHandle, session_id: &str) -> Result<ImageAnalysis> {
        self.record(format!("upload_image {} {}", image.name, session_id), "upload_image")?;
        Ok(ImageAnalysis {
            session_id: self.issued_session_id.clone(),
            description: self.description.clone(),
            suggested_questions: self.suggestions.clone(),
        })
    }

    fn ask(&self, question: &str, session_id: &str) -> Result<ChatReply> {
        self.record(format!("ask {} {}", session_id, question), "ask")?;
        Ok(ChatReply {
            response: format!("Answer to: {}", question),
            suggested_questions: self.reply_suggestions.clone(),
        })
    }

    fn get_conversation(&self, session_id: &str) -> Result<ConversationSnapshot> {
        self.record(format!("get_conversation {}", session_id), "get_conversation")?;
        Ok(ConversationSnapshot {
            history: self.history.clone(),
            image_description: Some(self.description.clone()).filter(|d| !d.is_empty()),
            image_url: None,
            suggested_questions: Some(self.suggestions.clone()).filter(|s| !s.is_empty()),
        })
    }

    fn reset_conversation(&self, session_id: &str) -> Result<()> {
        self.record(format!("reset {}", session_id), "reset")
    }
}

pub fn handle(name: &str, size: u64) -> FileHandle {
    FileHandle {
        path: PathBuf::from(name),
        name: name.to_string(),
        size,
        mime_type: "image/png".to_string(),
    }
}

pub fn invoice_record(number: &str, total: &str) -> ResultRecord {
    ResultRecord::from_pairs([("invoice_number", number), ("total_amount", total)])
}
