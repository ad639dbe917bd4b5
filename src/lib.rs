pub mod chat;
pub mod cli;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod services;
pub mod session;
pub mod types;
pub mod workflow;

use clap::Parser;
use cli::{Cli, Command};
use config::Config;
use error::{ExtractError, Result};
use services::HttpExtractionService;
use std::io;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Logs go to stderr so they never mix with console output. `RUST_LOG` wins over `-v`.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "invoice_extract_lib=info",
        1 => "invoice_extract_lib=debug",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(&cli.overrides())?;
    debug!(api_url = %config.api_url, data_dir = %config.data_dir.display(), "configuration loaded");

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();

    match cli.command {
        Command::Shell => {
            let workflow = workflow::BatchWorkflow::new(HttpExtractionService::new(&config)?);
            commands::run_batch_shell(&workflow, &mut input, &mut out)
        }
        Command::Run {
            schema,
            output,
            open,
            cleanup,
            files,
        } => {
            let workflow = workflow::BatchWorkflow::new(HttpExtractionService::new(&config)?);
            let options = commands::PipelineOptions {
                schema_path: schema,
                files,
                output,
                open,
                cleanup,
            };
            commands::run_pipeline(&workflow, &options, &mut out).map(|_| ())
        }
        Command::Chat => {
            let store = db::Db::new(&config.db_path())?;
            let service = HttpExtractionService::new(&config)?;
            let mut session = chat::ChatSession::start(service, store)?;
            info!(session_id = %session.session_id(), "chat ready");
            commands::run_chat_shell(&mut session, &mut input, &mut out)
        }
        Command::SetApiKey { key } => {
            let key = key.or_else(|| config.api_key.clone()).ok_or_else(|| {
                ExtractError::Validation(format!(
                    "Pass the key as an argument or set {}",
                    config::ENV_API_KEY
                ))
            })?;
            HttpExtractionService::new(&config)?.update_api_key(&key)?;
            println!("API key updated");
            Ok(())
        }
        Command::Preview { file, rows } => {
            let preview = export::preview_workbook(&file, rows)?;
            print!("{}", export::render_preview(&preview));
            Ok(())
        }
    }
}
