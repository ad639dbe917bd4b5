//! Prints every sheet of a workbook: `dump_export <file.xlsx> [rows]`.

use invoice_extract_lib::export::{preview_workbook, render_preview};
use std::path::PathBuf;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: dump_export <file.xlsx> [rows]");
        std::process::exit(2);
    };
    let rows = args.next().and_then(|r| r.parse().ok()).unwrap_or(usize::MAX);
    match preview_workbook(&path, rows) {
        Ok(preview) => print!("{}", render_preview(&preview)),
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
