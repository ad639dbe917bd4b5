fn main() {
    if let Err(e) = invoice_extract_lib::run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
