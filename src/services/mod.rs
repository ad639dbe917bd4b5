pub mod extraction;

pub use extraction::{ChatService, ExtractionService, HttpExtractionService};
