pub mod batch;
pub mod chat;
pub mod results;
pub mod schema;

pub use batch::{FileBatch, FileHandle};
pub use chat::{ChatMessage, Conversation, Speaker};
pub use results::{ResultRecord, ResultSet};
pub use schema::{FieldDefinition, FieldType, FieldUpdate, Schema};
