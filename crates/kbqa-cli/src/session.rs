//! Interactive chat session state
//!
//! History is kept for display and counters only; questions are always
//! answered on their own.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A chat slash command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Clear,
    Stats,
    History,
    Help,
    Quit,
}

impl Command {
    /// Parse a line starting with `/`; `None` for ordinary questions
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        let name = line.strip_prefix('/')?;
        Some(match name.to_lowercase().as_str() {
            "clear" => Ok(Self::Clear),
            "stats" => Ok(Self::Stats),
            "history" => Ok(Self::History),
            "help" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            _ => Err(format!("Unknown command: {line}")),
        })
    }
}

/// Conversation history owned by the chat loop
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    messages: Vec<Message>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn push_question(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_response(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    fn push(&mut self, role: Role, content: String) {
        self.messages.push(Message {
            role,
            content,
            timestamp: Utc::now(),
        });
    }

    pub fn question_count(&self) -> usize {
        self.count(Role::User)
    }

    pub fn response_count(&self) -> usize {
        self.count(Role::Assistant)
    }

    fn count(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Drop the history and start over with a fresh id
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
