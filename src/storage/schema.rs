//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Messages table schema.
#[derive(Iden)]
pub enum Messages {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "message_type"]
    MessageType,
    #[iden = "message_content"]
    MessageContent,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the messages table.
pub const CREATE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_type TEXT NOT NULL,
    message_content TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
"#;
