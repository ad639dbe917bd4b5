mod common;

use common::{invoice_record, FakeService};
use invoice_extract_lib::commands::{run_batch_shell, run_pipeline, PipelineOptions};
use invoice_extract_lib::error::ExtractError;
use invoice_extract_lib::export::preview_workbook;
use invoice_extract_lib::workflow::{BatchWorkflow, Step};
use std::fs;
use std::io::Cursor;
use std::path::Path;

const SCHEMA_YAML: &str = "\
- name: invoice_number
  type: str
  description: The invoice number
- name: total_amount
  type: float
";

fn write_images(dir: &Path, names: &[&str]) -> Vec<std::path::PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            fs::write(&path, b"\x89PNG fake image").unwrap();
            path
        })
        .collect()
}

fn run_shell(workflow: &BatchWorkflow<FakeService>, script: &str) -> String {
    let mut input = Cursor::new(script.as_bytes().to_vec());
    let mut out = Vec::new();
    run_batch_shell(workflow, &mut input, &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn pipeline_writes_the_downloaded_spreadsheet() {
    let dir = tempfile::tempdir().unwrap();
    let schema_path = dir.path().join("schema.yaml");
    fs::write(&schema_path, SCHEMA_YAML).unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);

    let workflow = BatchWorkflow::new(FakeService::new(
        "abc123",
        "job987",
        vec![invoice_record("INV-1", "99.50")],
    ));
    let options = PipelineOptions {
        schema_path,
        files,
        output: Some(dir.path().join("out").join("results")),
        open: false,
        cleanup: true,
    };
    let mut out = Vec::new();
    let target = run_pipeline(&workflow, &options, &mut out).unwrap();

    assert_eq!(target, dir.path().join("out").join("results.xlsx"));
    assert_eq!(fs::read(&target).unwrap(), b"PK-fake-xlsx");
    assert_eq!(
        workflow.service().calls(),
        vec![
            "create_schema invoice_number,total_amount",
            "upload_files abc123 2",
            "process_job job987",
            "download_export job987",
            "cleanup job987 abc123",
        ]
    );
    assert!(workflow.snapshot().is_clear());
    let printed = String::from_utf8(out).unwrap();
    assert!(printed.contains("Schema abc123 created"));
    assert!(printed.contains("INV-1"));
}

#[test]
fn pipeline_stops_at_the_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let schema_path = dir.path().join("schema.yaml");
    fs::write(&schema_path, SCHEMA_YAML).unwrap();
    let files = write_images(dir.path(), &["a.png"]);

    let workflow = BatchWorkflow::new(FakeService::new("abc123", "job987", vec![]));
    workflow
        .service()
        .fail("upload_files", ExtractError::Service("Invalid schema ID".into()));
    let options = PipelineOptions {
        schema_path,
        files,
        output: Some(dir.path().join("never.xlsx")),
        ..Default::default()
    };
    let err = run_pipeline(&workflow, &options, &mut Vec::<u8>::new()).unwrap_err();
    assert_eq!(err.to_string(), "Invalid schema ID");
    assert!(!dir.path().join("never.xlsx").exists());
    assert_eq!(workflow.step(), Step::UploadFiles);
}

#[test]
fn shell_walks_the_workflow() {
    let dir = tempfile::tempdir().unwrap();
    let files = write_images(dir.path(), &["a.png", "b.png"]);
    let export_path = dir.path().join("local.xlsx");

    let workflow = BatchWorkflow::new(FakeService::new(
        "abc123",
        "job987",
        vec![invoice_record("INV-1", "99.50")],
    ));
    let script = format!(
        "add-field invoice_number str\n\
         add-field total_amount float \"Grand total\"\n\
         create-schema\n\
         add-file {} {}\n\
         upload\n\
         process\n\
         edit 1 total_amount 100.00\n\
         save\n\
         export {}\n\
         reset\n\
         y\n\
         status\n\
         quit\n",
        files[0].display(),
        files[1].display(),
        export_path.display()
    );
    let printed = run_shell(&workflow, &script);

    assert!(printed.contains("Schema created successfully"), "{}", printed);
    assert!(printed.contains("Processing complete"));
    assert!(printed.contains("Changes saved"));
    assert!(printed.contains("Cleanup complete"));
    assert!(printed.contains("Step 1: Define Schema | Cleanup complete"));
    assert!(workflow.snapshot().is_clear());

    let preview = preview_workbook(&export_path, 5).unwrap();
    assert_eq!(preview.sheets[0].rows[0], vec!["INV-1", "100.00"]);
}

#[test]
fn shell_reports_errors_and_keeps_going() {
    let workflow = BatchWorkflow::new(FakeService::new("abc123", "job987", vec![]));
    let printed = run_shell(&workflow, "create-schema\nbogus\nupload\nreset\nn\nstatus\n");

    assert!(printed.contains("Error: Please add at least one field to the schema"));
    assert!(printed.contains("Unknown command 'bogus'"));
    assert!(printed.contains("Error: Create a schema before uploading files"));
    assert!(printed.contains("Reset cancelled"));
    assert!(workflow.service().calls().is_empty());
}
