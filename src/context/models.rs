//! Data models for conversation memory

use crate::error::{ContextError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ContextError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ContextError::InvalidTurn(format!("unknown role '{}'", other))),
        }
    }
}

/// A single chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Parse a turn from an untyped chat record.
    ///
    /// Records missing `role` or `content` are rejected here, at ingestion,
    /// so the trimming code can assume well-formed turns.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let role = value
            .get("role")
            .and_then(|r| r.as_str())
            .ok_or_else(|| ContextError::InvalidTurn("missing 'role'".to_string()))?
            .parse::<Role>()?;
        let content = value
            .get("content")
            .and_then(|c| c.as_str())
            .ok_or_else(|| ContextError::InvalidTurn("missing 'content'".to_string()))?;
        Ok(Self::new(role, content))
    }
}

/// Append-only, chronologically ordered chat history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a conversation from untyped chat records, validating each one
    pub fn from_json_records(records: &[serde_json::Value]) -> Result<Self> {
        let turns = records
            .iter()
            .map(Turn::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { turns })
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl From<Vec<Turn>> for Conversation {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

impl AsRef<[Turn]> for Conversation {
    fn as_ref(&self) -> &[Turn] {
        &self.turns
    }
}
