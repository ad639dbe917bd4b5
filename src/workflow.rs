//! Batch extraction workflow: define a schema, upload files, process the job, review results.
//!
//! The active [`Step`] is never stored. It is derived by [`compute_step`] from the schema id,
//! the staged files, the job id and the results every time it is asked for, so a change to
//! any of them is reflected immediately (including reverting to an earlier step when a later
//! identifier disappears).
//!
//! Network operations are single-flight per workflow: while one is running any other fails
//! with [`ExtractError::Busy`] without touching the service. The state lock is not held
//! across the request, so local edits and status reads stay responsive.

use crate::error::{ExtractError, Result};
use crate::models::{
    FieldDefinition, FieldUpdate, FileBatch, FileHandle, ResultRecord, ResultSet, Schema,
};
use crate::models::batch::MAX_UPLOAD_BYTES;
use crate::services::ExtractionService;
use crate::types::ExportArtifact;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    DefineSchema = 1,
    UploadFiles = 2,
    Process = 3,
    Review = 4,
}

impl Step {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn title(&self) -> &'static str {
        match self {
            Step::DefineSchema => "Define Schema",
            Step::UploadFiles => "Upload Images",
            Step::Process => "Process Images",
            Step::Review => "Review Results",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step {}: {}", self.number(), self.title())
    }
}

/// Derives the active step. Rules are checked in order:
///
/// 1. schema id set and no staged files: `UploadFiles`
/// 2. job id set and no results: `Process`
/// 3. results present: `Review`
/// 4. schema id set with files staged but not uploaded: still `UploadFiles`
/// 5. otherwise `DefineSchema`
pub fn compute_step(
    schema_id: Option<&str>,
    files: &FileBatch,
    job_id: Option<&str>,
    results: Option<&ResultSet>,
) -> Step {
    if schema_id.is_some() && files.is_empty() {
        Step::UploadFiles
    } else if job_id.is_some() && results.is_none() {
        Step::Process
    } else if results.is_some() {
        Step::Review
    } else if schema_id.is_some() {
        Step::UploadFiles
    } else {
        Step::DefineSchema
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

/// The one-line banner describing what last happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl Status {
    fn new(kind: StatusKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything the workflow knows. Cloned out by [`BatchWorkflow::snapshot`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowState {
    pub schema: Schema,
    pub files: FileBatch,
    pub schema_id: Option<String>,
    pub job_id: Option<String>,
    pub results: Option<ResultSet>,
    pub status: Option<Status>,
}

impl WorkflowState {
    pub fn step(&self) -> Step {
        compute_step(
            self.schema_id.as_deref(),
            &self.files,
            self.job_id.as_deref(),
            self.results.as_ref(),
        )
    }

    /// True when schema, files, identifiers and results are all empty.
    pub fn is_clear(&self) -> bool {
        self.schema.is_empty()
            && self.files.is_empty()
            && self.schema_id.is_none()
            && self.job_id.is_none()
            && self.results.is_none()
    }

    fn set_status(&mut self, kind: StatusKind, message: impl Into<String>) {
        self.status = Some(Status::new(kind, message));
    }

    fn fail<T>(&mut self, err: ExtractError) -> Result<T> {
        self.set_status(StatusKind::Error, format!("Error: {}", err));
        Err(err)
    }

    // Later identifiers first so the derived step never passes through a stale state.
    fn clear(&mut self) {
        self.results = None;
        self.job_id = None;
        self.files.clear();
        self.schema_id = None;
        self.schema.clear();
    }

    fn ensure_schema_editable(&self) -> Result<()> {
        match &self.schema_id {
            Some(id) => Err(ExtractError::Validation(format!(
                "Schema {} is already created; reset to define a new one",
                id
            ))),
            None => Ok(()),
        }
    }

    fn ensure_files_editable(&self) -> Result<()> {
        match &self.job_id {
            Some(id) => Err(ExtractError::Validation(format!(
                "Files are already uploaded as job {}; reset to start a new batch",
                id
            ))),
            None => Ok(()),
        }
    }
}

/// Marks a workflow busy for as long as it lives.
struct FlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ExtractError::Busy)?;
        Ok(Self { flag })
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct BatchWorkflow<S> {
    service: S,
    state: Mutex<WorkflowState>,
    in_flight: AtomicBool,
}

impl<S: ExtractionService> BatchWorkflow<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            state: Mutex::new(WorkflowState::default()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, WorkflowState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(&self, message: &str) -> Result<FlightGuard<'_>> {
        let guard = FlightGuard::acquire(&self.in_flight)?;
        self.lock().set_status(StatusKind::Info, message);
        Ok(guard)
    }

    pub fn snapshot(&self) -> WorkflowState {
        self.lock().clone()
    }

    pub fn step(&self) -> Step {
        self.lock().step()
    }

    pub fn status(&self) -> Option<Status> {
        self.lock().status.clone()
    }

    pub fn schema_id(&self) -> Option<String> {
        self.lock().schema_id.clone()
    }

    pub fn job_id(&self) -> Option<String> {
        self.lock().job_id.clone()
    }

    /// Advisory flag for front ends; the guard itself is what rejects overlapping calls.
    pub fn is_processing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    // ---- schema builder ----

    pub fn add_field(&self) -> Result<usize> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_schema_editable() {
            return state.fail(e);
        }
        Ok(state.schema.add_field())
    }

    pub fn push_field(&self, field: FieldDefinition) -> Result<usize> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_schema_editable() {
            return state.fail(e);
        }
        state.schema.push(field);
        Ok(state.schema.len() - 1)
    }

    pub fn update_field(&self, index: usize, update: FieldUpdate) -> Result<()> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_schema_editable() {
            return state.fail(e);
        }
        match state.schema.update_field(index, update) {
            Ok(()) => Ok(()),
            Err(e) => state.fail(e),
        }
    }

    /// Removes a field; a stale index is silently ignored.
    pub fn delete_field(&self, index: usize) -> Result<Option<FieldDefinition>> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_schema_editable() {
            return state.fail(e);
        }
        Ok(state.schema.delete_field(index))
    }

    /// Replaces the whole (uncreated) schema, e.g. with one loaded from a file.
    pub fn set_schema(&self, schema: Schema) -> Result<()> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_schema_editable() {
            return state.fail(e);
        }
        let count = schema.len();
        state.schema = schema;
        state.set_status(StatusKind::Info, format!("{} field(s) loaded", count));
        Ok(())
    }

    pub fn create_schema(&self) -> Result<String> {
        let _flight = self.begin("Creating schema...")?;
        let wire = {
            let mut state = self.lock();
            if let Err(e) = state.ensure_schema_editable() {
                return state.fail(e);
            }
            if let Err(e) = state.schema.validate() {
                return state.fail(e);
            }
            state.schema.to_wire()
        };

        let outcome = self.service.create_schema(&wire);
        let mut state = self.lock();
        match outcome {
            Ok(schema_id) => {
                info!(schema_id = %schema_id, fields = wire.len(), "schema created");
                state.schema_id = Some(schema_id.clone());
                state.set_status(StatusKind::Success, "Schema created successfully");
                Ok(schema_id)
            }
            Err(e) => {
                warn!(error = %e, "schema creation failed");
                state.fail(e)
            }
        }
    }

    // ---- file batch ----

    /// Stages a file. The batch is frozen once it has been uploaded.
    pub fn add_file(&self, file: FileHandle) -> Result<()> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_files_editable() {
            return state.fail(e);
        }
        state.files.add(file);
        let count = state.files.len();
        state.set_status(StatusKind::Info, format!("{} file(s) selected", count));
        Ok(())
    }

    pub fn add_path(&self, path: &Path) -> Result<()> {
        let editable = self.lock().ensure_files_editable();
        if let Err(e) = editable {
            return self.lock().fail(e);
        }
        match FileHandle::from_path(path) {
            Ok(file) => self.add_file(file),
            Err(e) => self.lock().fail(e),
        }
    }

    /// Removes a staged file; a stale index is silently ignored.
    pub fn remove_file(&self, index: usize) -> Result<Option<FileHandle>> {
        let mut state = self.lock();
        if let Err(e) = state.ensure_files_editable() {
            return state.fail(e);
        }
        let removed = state.files.remove(index);
        if removed.is_some() {
            let count = state.files.len();
            state.set_status(StatusKind::Info, format!("{} file(s) selected", count));
        }
        Ok(removed)
    }

    pub fn upload_files(&self) -> Result<String> {
        let _flight = FlightGuard::acquire(&self.in_flight)?;
        let (schema_id, files) = {
            let mut state = self.lock();
            let schema_id = match state.schema_id.clone() {
                Some(id) => id,
                None => {
                    return state.fail(ExtractError::Validation(
                        "Create a schema before uploading files".to_string(),
                    ))
                }
            };
            if let Err(e) = state.ensure_files_editable() {
                return state.fail(e);
            }
            if state.files.is_empty() {
                return state.fail(ExtractError::Validation(
                    "Please select at least one image".to_string(),
                ));
            }
            if state.files.total_bytes() > MAX_UPLOAD_BYTES {
                let err = ExtractError::Validation(format!(
                    "Selected files total {} bytes; the service accepts at most {} per upload",
                    state.files.total_bytes(),
                    MAX_UPLOAD_BYTES
                ));
                return state.fail(err);
            }
            let files = state.files.files().to_vec();
            state.set_status(
                StatusKind::Info,
                format!("Uploading {} image(s)...", files.len()),
            );
            (schema_id, files)
        };

        let outcome = self.service.upload_files(&schema_id, &files);
        let mut state = self.lock();
        match outcome {
            Ok(job_id) => {
                info!(job_id = %job_id, schema_id = %schema_id, files = files.len(), "files uploaded");
                state.job_id = Some(job_id.clone());
                state.set_status(StatusKind::Success, "Images uploaded successfully");
                Ok(job_id)
            }
            Err(e) => {
                warn!(error = %e, "upload failed");
                state.fail(e)
            }
        }
    }

    // ---- processing and review ----

    pub fn process_job(&self) -> Result<usize> {
        let _flight = self.begin("Processing images...")?;
        let job_id = {
            let mut state = self.lock();
            let job_id = match state.job_id.clone() {
                Some(id) => id,
                None => {
                    return state.fail(ExtractError::Validation(
                        "Upload files before processing".to_string(),
                    ))
                }
            };
            if state.results.is_some() {
                return state.fail(ExtractError::Validation(
                    "This job has already been processed".to_string(),
                ));
            }
            job_id
        };

        let outcome = self.service.process_job(&job_id);
        let mut state = self.lock();
        match outcome {
            Ok(records) => {
                let results = ResultSet::new(records);
                let failed = results.failed_count();
                info!(job_id = %job_id, records = results.len(), failed, "job processed");
                let count = results.len();
                state.results = Some(results);
                state.set_status(StatusKind::Success, "Processing complete");
                Ok(count)
            }
            Err(e) => {
                warn!(error = %e, job_id = %job_id, "processing failed");
                state.fail(e)
            }
        }
    }

    pub fn edit_cell(&self, row: usize, column: &str, value: impl Into<String>) -> Result<()> {
        let mut state = self.lock();
        let outcome = match state.results.as_mut() {
            Some(results) => results.edit_cell(row, column, value),
            None => Err(ExtractError::Validation(
                "There are no results to edit".to_string(),
            )),
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(e) => state.fail(e),
        }
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.lock()
            .results
            .as_ref()
            .map(ResultSet::is_dirty)
            .unwrap_or(false)
    }

    /// Pushes the edited records. Returns `false` when there was nothing to save.
    pub fn save_results(&self) -> Result<bool> {
        let _flight = FlightGuard::acquire(&self.in_flight)?;
        let (job_id, records) = {
            let mut state = self.lock();
            let job_id = match state.job_id.clone() {
                Some(id) => id,
                None => {
                    return state.fail(ExtractError::Validation(
                        "There is no job to save results for".to_string(),
                    ))
                }
            };
            let pending: Option<Option<Vec<ResultRecord>>> = state
                .results
                .as_ref()
                .map(|r| r.is_dirty().then(|| r.records().to_vec()));
            let records = match pending {
                Some(Some(records)) => records,
                Some(None) => {
                    state.set_status(StatusKind::Info, "No changes to save");
                    return Ok(false);
                }
                None => {
                    return state.fail(ExtractError::Validation(
                        "There are no results to save".to_string(),
                    ))
                }
            };
            state.set_status(StatusKind::Info, "Saving changes...");
            (job_id, records)
        };

        let outcome = self.service.update_results(&job_id, &records);
        let mut state = self.lock();
        match outcome {
            Ok(()) => {
                info!(job_id = %job_id, records = records.len(), "results saved");
                if let Some(results) = state.results.as_mut() {
                    // Edits made while the request was out stay dirty.
                    if results.records() == records.as_slice() {
                        results.mark_saved();
                    }
                }
                state.set_status(StatusKind::Success, "Changes saved");
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, job_id = %job_id, "saving results failed");
                state.fail(e)
            }
        }
    }

    /// Where the job's spreadsheet can be fetched. Nothing is downloaded.
    pub fn export_artifact(&self) -> Result<ExportArtifact> {
        let mut state = self.lock();
        let job_id = match state.job_id.clone() {
            Some(id) => id,
            None => {
                return state.fail(ExtractError::Validation(
                    "There is no job to export".to_string(),
                ))
            }
        };
        match self.service.export_url(&job_id) {
            Ok(url) => Ok(ExportArtifact { job_id, url }),
            Err(e) => state.fail(e),
        }
    }

    /// Fetches the job's spreadsheet bytes.
    pub fn download_export(&self) -> Result<(ExportArtifact, Vec<u8>)> {
        let _flight = FlightGuard::acquire(&self.in_flight)?;
        let artifact = self.export_artifact()?;
        {
            let mut state = self.lock();
            let dirty = state.results.as_ref().map(ResultSet::is_dirty).unwrap_or(false);
            if dirty {
                warn!(job_id = %artifact.job_id, "exporting with unsaved edits");
                state.set_status(
                    StatusKind::Info,
                    "Downloading results (unsaved edits are not included)...",
                );
            } else {
                state.set_status(StatusKind::Info, "Downloading results...");
            }
        }

        let outcome = self.service.download_export(&artifact.job_id);
        let mut state = self.lock();
        match outcome {
            Ok(bytes) => {
                info!(job_id = %artifact.job_id, bytes = bytes.len(), "export downloaded");
                state.set_status(StatusKind::Success, "Results downloaded");
                Ok((artifact, bytes))
            }
            Err(e) => {
                error!(error = %e, job_id = %artifact.job_id, "export download failed");
                state.fail(e)
            }
        }
    }

    // ---- reset ----

    /// Cleans up server-side data and returns to the first step.
    ///
    /// Local state is only cleared once the service acknowledges the cleanup. With no
    /// identifiers held there is nothing to clean up remotely, so no request is made.
    pub fn reset(&self, confirmed: bool) -> Result<()> {
        if !confirmed {
            return self.lock().fail(ExtractError::Validation(
                "Reset requires confirmation".to_string(),
            ));
        }
        let _flight = FlightGuard::acquire(&self.in_flight)?;
        let (job_id, schema_id) = {
            let mut state = self.lock();
            if state.job_id.is_none() && state.schema_id.is_none() {
                let was_clear = state.is_clear();
                state.clear();
                if !was_clear {
                    state.set_status(StatusKind::Success, "Cleared");
                }
                return Ok(());
            }
            state.set_status(StatusKind::Info, "Cleaning up...");
            (state.job_id.clone(), state.schema_id.clone())
        };

        let outcome = self
            .service
            .cleanup(job_id.as_deref(), schema_id.as_deref());
        let mut state = self.lock();
        match outcome {
            Ok(()) => {
                info!(job_id = ?job_id, schema_id = ?schema_id, "cleanup complete");
                state.clear();
                state.set_status(StatusKind::Success, "Cleanup complete");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "cleanup failed; keeping local state");
                state.fail(e)
            }
        }
    }

    /// Drops all local state without asking the service.
    pub fn force_reset(&self) -> Result<()> {
        let _flight = FlightGuard::acquire(&self.in_flight)?;
        let mut state = self.lock();
        if state.job_id.is_some() || state.schema_id.is_some() {
            warn!(job_id = ?state.job_id, schema_id = ?state.schema_id, "discarding identifiers without cleanup");
        }
        state.clear();
        state.set_status(StatusKind::Info, "Local state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str) -> FileHandle {
        FileHandle {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 1,
            mime_type: "image/png".to_string(),
        }
    }

    fn batch(n: usize) -> FileBatch {
        let mut b = FileBatch::new();
        for i in 0..n {
            b.add(file(&format!("{}.png", i)));
        }
        b
    }

    #[test]
    fn nothing_set_is_define_schema() {
        assert_eq!(compute_step(None, &batch(0), None, None), Step::DefineSchema);
        assert_eq!(compute_step(None, &batch(2), None, None), Step::DefineSchema);
    }

    #[test]
    fn schema_without_files_is_upload() {
        assert_eq!(compute_step(Some("s"), &batch(0), None, None), Step::UploadFiles);
        assert_eq!(compute_step(Some("s"), &batch(1), None, None), Step::UploadFiles);
    }

    #[test]
    fn job_without_results_is_process() {
        assert_eq!(compute_step(Some("s"), &batch(1), Some("j"), None), Step::Process);
    }

    #[test]
    fn results_are_review() {
        let results = ResultSet::default();
        assert_eq!(
            compute_step(Some("s"), &batch(1), Some("j"), Some(&results)),
            Step::Review
        );
    }

    #[test]
    fn empty_batch_rule_comes_before_later_identifiers() {
        let results = ResultSet::default();
        assert_eq!(
            compute_step(Some("s"), &batch(0), Some("j"), Some(&results)),
            Step::UploadFiles
        );
    }

    #[test]
    fn step_display_includes_number() {
        assert_eq!(Step::Process.to_string(), "Step 3: Process Images");
    }

    #[test]
    fn flight_guard_is_exclusive_and_released_on_drop() {
        let flag = AtomicBool::new(false);
        let first = FlightGuard::acquire(&flag).unwrap();
        assert!(matches!(FlightGuard::acquire(&flag), Err(ExtractError::Busy)));
        drop(first);
        assert!(FlightGuard::acquire(&flag).is_ok());
    }
}
