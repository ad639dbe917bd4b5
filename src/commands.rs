//! Console front end: line commands for the batch shell and the chat shell, and the
//! one-shot batch pipeline. Everything here drives [`BatchWorkflow`] or [`ChatSession`]
//! and prints; no state lives in this module.

use crate::chat::ChatSession;
use crate::error::{ExtractError, Result};
use crate::export;
use crate::models::{FieldType, FieldUpdate, ResultSet, Schema, Speaker};
use crate::services::{ChatService, ExtractionService};
use crate::session::SessionStore;
use crate::workflow::{BatchWorkflow, StatusKind, WorkflowState};
use regex::Regex;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

const RESET_PROMPT: &str = "Are you sure you want to reset? This will delete all current data. [y/N] ";
const CHAT_RESET_PROMPT: &str =
    "Are you sure you want to reset this conversation? All chat history will be cleared. [y/N] ";

pub const BATCH_HELP: &str = "\
Commands:
  add-field <name> <type> [description]   add a field (types: str, int, float, bool, List[str])
  set-field <n> name|type|description <value>
  delete-field <n>
  load-schema <file.yaml|file.json>
  create-schema
  add-file <path>...                      stage files for upload
  remove-file <n>
  upload
  process
  edit <row> <column> <value>
  save                                    push edited results to the service
  download [path] [--open]                fetch the service's spreadsheet
  export <file.xlsx|file.csv|file.json>   write the current results locally
  reset | force-reset
  status | show | help | quit";

pub const CHAT_HELP: &str = "\
Type a question to ask about the uploaded invoice, or:
  /upload <image>    analyze an invoice image
  /ask <n>           ask suggested question n
  /history           print the whole conversation
  /reset             start a new conversation
  /help | /quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAttr {
    Name,
    Type,
    Description,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchCommand {
    AddField {
        name: String,
        field_type: FieldType,
        description: String,
    },
    SetField {
        index: usize,
        attr: FieldAttr,
        value: String,
    },
    DeleteField(usize),
    LoadSchema(PathBuf),
    CreateSchema,
    AddFiles(Vec<PathBuf>),
    RemoveFile(usize),
    Upload,
    Process,
    Edit {
        row: usize,
        column: String,
        value: String,
    },
    Save,
    Download {
        path: Option<PathBuf>,
        open: bool,
    },
    Export(PathBuf),
    Reset,
    ForceReset,
    Status,
    Show,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Ask(String),
    AskSuggested(usize),
    Upload(PathBuf),
    History,
    Reset,
    Help,
    Quit,
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([^"]*)"|(\S+)"#).expect("static regex"))
}

/// Splits on whitespace; double quotes group words.
pub fn split_args(line: &str) -> Vec<String> {
    token_regex()
        .captures_iter(line)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn usage(text: &str) -> ExtractError {
    ExtractError::Validation(format!("Usage: {}", text))
}

/// 1-based position typed by the user, as a 0-based index.
fn parse_position(raw: Option<&String>, usage_text: &str) -> Result<usize> {
    let raw = raw.ok_or_else(|| usage(usage_text))?;
    match raw.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n - 1),
        _ => Err(ExtractError::Validation(format!(
            "'{}' is not a valid position (counting from 1)",
            raw
        ))),
    }
}

/// Parses one batch shell line. Blank lines and `#` comments yield `None`.
pub fn parse_batch_command(line: &str) -> Result<Option<BatchCommand>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let args = split_args(line);
    let Some((verb, rest)) = args.split_first() else {
        return Ok(None);
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "add-field" => {
            let name = rest.first().ok_or_else(|| usage("add-field <name> <type> [description]"))?;
            let field_type = rest
                .get(1)
                .ok_or_else(|| usage("add-field <name> <type> [description]"))?
                .parse::<FieldType>()?;
            BatchCommand::AddField {
                name: name.clone(),
                field_type,
                description: rest[2..].join(" "),
            }
        }
        "set-field" => {
            const USAGE: &str = "set-field <n> name|type|description <value>";
            let index = parse_position(rest.first(), USAGE)?;
            let attr = match rest.get(1).map(|a| a.to_ascii_lowercase()).as_deref() {
                Some("name") => FieldAttr::Name,
                Some("type") => FieldAttr::Type,
                Some("description") | Some("desc") => FieldAttr::Description,
                _ => return Err(usage(USAGE)),
            };
            if rest.len() < 3 && attr != FieldAttr::Description {
                return Err(usage(USAGE));
            }
            BatchCommand::SetField {
                index,
                attr,
                value: rest[2.min(rest.len())..].join(" "),
            }
        }
        "delete-field" => BatchCommand::DeleteField(parse_position(rest.first(), "delete-field <n>")?),
        "load-schema" => BatchCommand::LoadSchema(
            rest.first()
                .map(PathBuf::from)
                .ok_or_else(|| usage("load-schema <file>"))?,
        ),
        "create-schema" => BatchCommand::CreateSchema,
        "add-file" | "add-files" => {
            if rest.is_empty() {
                return Err(usage("add-file <path>..."));
            }
            BatchCommand::AddFiles(rest.iter().map(PathBuf::from).collect())
        }
        "remove-file" => BatchCommand::RemoveFile(parse_position(rest.first(), "remove-file <n>")?),
        "upload" => BatchCommand::Upload,
        "process" => BatchCommand::Process,
        "edit" => {
            const USAGE: &str = "edit <row> <column> <value>";
            let row = parse_position(rest.first(), USAGE)?;
            let column = rest.get(1).ok_or_else(|| usage(USAGE))?.clone();
            BatchCommand::Edit {
                row,
                column,
                value: rest[2.min(rest.len())..].join(" "),
            }
        }
        "save" => BatchCommand::Save,
        "download" => {
            let open = rest.iter().any(|a| a == "--open");
            let path = rest.iter().find(|a| !a.starts_with("--")).map(PathBuf::from);
            BatchCommand::Download { path, open }
        }
        "export" => BatchCommand::Export(
            rest.first()
                .map(PathBuf::from)
                .ok_or_else(|| usage("export <file.xlsx|file.csv|file.json>"))?,
        ),
        "reset" => BatchCommand::Reset,
        "force-reset" => BatchCommand::ForceReset,
        "status" => BatchCommand::Status,
        "show" => BatchCommand::Show,
        "help" | "?" => BatchCommand::Help,
        "quit" | "exit" => BatchCommand::Quit,
        other => {
            return Err(ExtractError::Validation(format!(
                "Unknown command '{}'. Type 'help' for a list.",
                other
            )))
        }
    };
    Ok(Some(command))
}

/// Parses one chat shell line. Anything not starting with `/` is a question.
pub fn parse_chat_command(line: &str) -> Result<Option<ChatCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if !line.starts_with('/') {
        return Ok(Some(ChatCommand::Ask(line.to_string())));
    }
    let args = split_args(&line[1..]);
    let Some((verb, rest)) = args.split_first() else {
        return Ok(None);
    };
    let command = match verb.to_ascii_lowercase().as_str() {
        "upload" => ChatCommand::Upload(
            rest.first()
                .map(PathBuf::from)
                .ok_or_else(|| usage("/upload <image>"))?,
        ),
        "ask" => {
            let number = parse_position(rest.first(), "/ask <n>")? + 1;
            ChatCommand::AskSuggested(number)
        }
        "history" => ChatCommand::History,
        "reset" => ChatCommand::Reset,
        "help" => ChatCommand::Help,
        "quit" | "exit" => ChatCommand::Quit,
        other => {
            return Err(ExtractError::Validation(format!(
                "Unknown command '/{}'. Type /help for a list.",
                other
            )))
        }
    };
    Ok(Some(command))
}

fn confirm<R: BufRead, W: Write>(prompt: &str, input: &mut R, out: &mut W) -> Result<bool> {
    write!(out, "{}", prompt)?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

pub fn render_schema(schema: &Schema) -> String {
    if schema.is_empty() {
        return "  (no fields)".to_string();
    }
    schema
        .fields()
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let field_type = f.field_type.map(|t| t.to_string()).unwrap_or_else(|| "?".to_string());
            let name = if f.name.trim().is_empty() { "(unnamed)" } else { f.name.as_str() };
            if f.description.is_empty() {
                format!("  {}. {} [{}]", i + 1, name, field_type)
            } else {
                format!("  {}. {} [{}] {}", i + 1, name, field_type, f.description)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Plain-text table with 1-based row numbers and an error marker for failed rows.
pub fn render_results(results: &ResultSet) -> String {
    if results.is_empty() {
        return "  (no results)".to_string();
    }
    let columns = results.columns();
    let mut lines = vec![format!("  #  | {}", columns.join(" | "))];
    for (i, record) in results.records().iter().enumerate() {
        let cells: Vec<&str> = columns.iter().map(|c| record.get(c).unwrap_or("")).collect();
        let mut line = format!("  {:<2} | {}", i + 1, cells.join(" | "));
        if let Some(error) = record.error() {
            line.push_str(&format!("  !! {}", error));
        }
        lines.push(line);
    }
    if results.is_dirty() {
        lines.push("  (unsaved changes)".to_string());
    }
    lines.join("\n")
}

pub fn render_state(state: &WorkflowState) -> String {
    let mut out = vec![state.step().to_string()];
    match &state.schema_id {
        Some(id) => out.push(format!("Schema {} ({} fields)", id, state.schema.len())),
        None => {
            out.push("Schema:".to_string());
            out.push(render_schema(&state.schema));
        }
    }
    if !state.files.is_empty() {
        out.push(format!("Files ({} bytes):", state.files.total_bytes()));
        for (i, f) in state.files.files().iter().enumerate() {
            out.push(format!("  {}. {} ({} bytes, {})", i + 1, f.name, f.size, f.mime_type));
        }
    }
    if let Some(job_id) = &state.job_id {
        out.push(format!("Job {}", job_id));
    }
    if let Some(results) = &state.results {
        out.push(format!("Results ({} rows, {} failed):", results.len(), results.failed_count()));
        out.push(render_results(results));
    }
    out.join("\n")
}

fn write_results_locally(results: &ResultSet, path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("json") => export::export_results_json(results, path),
        Some("csv") => export::export_results_csv(results, path),
        Some("xlsx") => export::export_results_xlsx(results, path),
        _ => Err(ExtractError::Validation(
            "Export path must end in .xlsx, .csv or .json".to_string(),
        )),
    }
}

/// Fetches the job spreadsheet and writes it to `path` (or the default location).
pub fn download_to<S: ExtractionService>(
    workflow: &BatchWorkflow<S>,
    path: Option<&Path>,
    open: bool,
) -> Result<PathBuf> {
    let (artifact, bytes) = workflow.download_export()?;
    let target = export::resolve_export_path(path, &artifact.job_id);
    export::write_export_bytes(&target, &bytes)?;
    if open {
        export::open_in_default_app(&target)?;
    }
    Ok(target)
}

/// Runs one batch command, writing any output to `out`.
pub fn execute_batch<S, R, W>(
    workflow: &BatchWorkflow<S>,
    command: BatchCommand,
    input: &mut R,
    out: &mut W,
) -> Result<()>
where
    S: ExtractionService,
    R: BufRead,
    W: Write,
{
    match command {
        BatchCommand::AddField {
            name,
            field_type,
            description,
        } => {
            let index = workflow.push_field(crate::models::FieldDefinition::new(name, field_type, description))?;
            writeln!(out, "Field {} added", index + 1)?;
        }
        BatchCommand::SetField { index, attr, value } => {
            let update = match attr {
                FieldAttr::Name => FieldUpdate {
                    name: Some(value),
                    ..Default::default()
                },
                FieldAttr::Type => FieldUpdate {
                    field_type: Some(value.parse()?),
                    ..Default::default()
                },
                FieldAttr::Description => FieldUpdate {
                    description: Some(value),
                    ..Default::default()
                },
            };
            workflow.update_field(index, update)?;
        }
        BatchCommand::DeleteField(index) => {
            if workflow.delete_field(index)?.is_none() {
                writeln!(out, "No field {}", index + 1)?;
            }
        }
        BatchCommand::LoadSchema(path) => workflow.set_schema(Schema::from_file(&path)?)?,
        BatchCommand::CreateSchema => {
            workflow.create_schema()?;
        }
        BatchCommand::AddFiles(paths) => {
            for path in paths {
                workflow.add_path(&path)?;
            }
        }
        BatchCommand::RemoveFile(index) => {
            if workflow.remove_file(index)?.is_none() {
                writeln!(out, "No file {}", index + 1)?;
            }
        }
        BatchCommand::Upload => {
            workflow.upload_files()?;
        }
        BatchCommand::Process => {
            workflow.process_job()?;
            if let Some(results) = workflow.snapshot().results {
                writeln!(out, "{}", render_results(&results))?;
            }
        }
        BatchCommand::Edit { row, column, value } => workflow.edit_cell(row, &column, value)?,
        BatchCommand::Save => {
            workflow.save_results()?;
        }
        BatchCommand::Download { path, open } => {
            let target = download_to(workflow, path.as_deref(), open)?;
            writeln!(out, "Saved {}", target.display())?;
        }
        BatchCommand::Export(path) => {
            let results = workflow
                .snapshot()
                .results
                .ok_or_else(|| ExtractError::Validation("There are no results to export".to_string()))?;
            write_results_locally(&results, &path)?;
            writeln!(out, "Wrote {}", path.display())?;
        }
        BatchCommand::Reset => {
            let confirmed = confirm(RESET_PROMPT, input, out)?;
            if !confirmed {
                writeln!(out, "Reset cancelled")?;
                return Ok(());
            }
            workflow.reset(true)?;
        }
        BatchCommand::ForceReset => {
            if confirm(RESET_PROMPT, input, out)? {
                workflow.force_reset()?;
            } else {
                writeln!(out, "Reset cancelled")?;
            }
        }
        BatchCommand::Status => match workflow.status() {
            Some(status) => writeln!(out, "{} | {}", workflow.step(), status)?,
            None => writeln!(out, "{}", workflow.step())?,
        },
        BatchCommand::Show => writeln!(out, "{}", render_state(&workflow.snapshot()))?,
        BatchCommand::Help => writeln!(out, "{}", BATCH_HELP)?,
        BatchCommand::Quit => {}
    }
    Ok(())
}

/// Interactive batch console. Returns when input ends or on `quit`.
pub fn run_batch_shell<S, R, W>(workflow: &BatchWorkflow<S>, input: &mut R, out: &mut W) -> Result<()>
where
    S: ExtractionService,
    R: BufRead,
    W: Write,
{
    writeln!(out, "{}\nType 'help' for commands.", workflow.step())?;
    loop {
        write!(out, "[{}]> ", workflow.step().number())?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let command = match parse_batch_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };
        if command == BatchCommand::Quit {
            break;
        }

        let before = workflow.status();
        match execute_batch(workflow, command, input, out) {
            Ok(()) => {
                let after = workflow.status();
                if after != before {
                    if let Some(status) = after.filter(|s| s.kind != StatusKind::Error) {
                        writeln!(out, "{}", status)?;
                    }
                }
            }
            Err(e) => writeln!(out, "Error: {}", e)?,
        }
    }
    Ok(())
}

fn print_messages<W: Write>(messages: &[crate::models::ChatMessage], out: &mut W) -> Result<()> {
    for message in messages {
        match message.speaker {
            Speaker::User => writeln!(out, "you> {}", message.message)?,
            Speaker::Bot => writeln!(out, "bot> {}", message.message)?,
            Speaker::System => writeln!(out, "  .. {}", message.message)?,
            Speaker::Error => writeln!(out, "  !! {}", message.message)?,
        }
    }
    Ok(())
}

fn print_suggestions<W: Write>(questions: &[String], out: &mut W) -> Result<()> {
    if questions.is_empty() {
        return Ok(());
    }
    writeln!(out, "Suggested questions:")?;
    for (i, q) in questions.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, q)?;
    }
    Ok(())
}

/// Interactive chat console.
pub fn run_chat_shell<C, St, R, W>(session: &mut ChatSession<C, St>, input: &mut R, out: &mut W) -> Result<()>
where
    C: ChatService,
    St: SessionStore,
    R: BufRead,
    W: Write,
{
    print_messages(session.messages(), out)?;
    print_suggestions(session.suggested_questions(), out)?;
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        let command = match parse_chat_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "{}", e)?;
                continue;
            }
        };

        let is_reset = command == ChatCommand::Reset;
        let seen = session.messages().len();
        let suggestions_before = session.suggested_questions().to_vec();
        let outcome = match command {
            ChatCommand::Quit => break,
            ChatCommand::Help => {
                writeln!(out, "{}", CHAT_HELP)?;
                continue;
            }
            ChatCommand::History => {
                print_messages(session.messages(), out)?;
                continue;
            }
            ChatCommand::Ask(question) => session.ask(&question).map(|_| ()),
            ChatCommand::AskSuggested(n) => session.ask_suggested(n).map(|_| ()),
            ChatCommand::Upload(path) => session.upload_image_path(&path),
            ChatCommand::Reset => {
                if confirm(CHAT_RESET_PROMPT, input, out)? {
                    session.reset(true)
                } else {
                    writeln!(out, "Reset cancelled")?;
                    continue;
                }
            }
        };

        // A successful reset replaces the transcript, so everything is new.
        let fresh = if is_reset && outcome.is_ok() { 0 } else { seen };
        let new_messages = &session.messages()[fresh..];
        print_messages(new_messages, out)?;
        if let Err(e) = outcome {
            if new_messages.is_empty() {
                writeln!(out, "Error: {}", e)?;
            }
        }
        if session.suggested_questions() != suggestions_before.as_slice() {
            print_suggestions(session.suggested_questions(), out)?;
        }
    }
    Ok(())
}

/// Options for [`run_pipeline`].
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub schema_path: PathBuf,
    pub files: Vec<PathBuf>,
    pub output: Option<PathBuf>,
    pub open: bool,
    pub cleanup: bool,
}

/// Schema file in, spreadsheet out: create, upload, process, download and optionally clean up.
pub fn run_pipeline<S: ExtractionService, W: Write>(
    workflow: &BatchWorkflow<S>,
    options: &PipelineOptions,
    out: &mut W,
) -> Result<PathBuf> {
    workflow.set_schema(Schema::from_file(&options.schema_path)?)?;
    let schema_id = workflow.create_schema()?;
    writeln!(out, "Schema {} created", schema_id)?;

    for path in &options.files {
        workflow.add_path(path)?;
    }
    let job_id = workflow.upload_files()?;
    writeln!(out, "Uploaded {} file(s) as job {}", options.files.len(), job_id)?;

    let count = workflow.process_job()?;
    writeln!(out, "Processed {} record(s)", count)?;
    if let Some(results) = workflow.snapshot().results {
        writeln!(out, "{}", render_results(&results))?;
    }

    let target = download_to(workflow, options.output.as_deref(), options.open)?;
    writeln!(out, "Saved {}", target.display())?;
    info!(path = %target.display(), job_id = %job_id, "pipeline finished");

    if options.cleanup {
        workflow.reset(true)?;
        writeln!(out, "Server-side data cleaned up")?;
    }
    Ok(target)
}
