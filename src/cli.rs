use crate::config::ConfigOverrides;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the extraction service (default http://localhost:5000)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Directory for the session database and an optional .env
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// More logging (-v debug for this crate, -vv debug for everything)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive batch extraction console
    Shell,

    /// Create a schema from a file, upload the files, process them and download the spreadsheet
    Run {
        /// Schema file (YAML or JSON): a list of {name, type, description}
        #[arg(short, long)]
        schema: PathBuf,

        /// Where to save the spreadsheet (default: Downloads, timestamped)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Open the spreadsheet when done
        #[arg(long)]
        open: bool,

        /// Delete the schema and job on the service afterwards
        #[arg(long)]
        cleanup: bool,

        /// Invoice images to extract from
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask questions about an invoice image
    Chat,

    /// Store a new model API key on the service (falls back to EXTRACT_API_KEY)
    SetApiKey { key: Option<String> },

    /// Print sheets, headers and the first rows of a workbook
    Preview {
        file: PathBuf,

        #[arg(long, default_value_t = 10)]
        rows: usize,
    },
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            api_url: self.api_url.clone(),
            timeout_secs: self.timeout,
            data_dir: self.data_dir.clone(),
        }
    }
}
