//! Conversation history.
//!
//! Append-only list of turns owned by the orchestrator thread. Readers get
//! owned copies (`suffix`, `window`) so they never observe a mutation in
//! progress.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in the conversation.
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
}

/// Ordered turn history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    /// Creates a conversation, seeded with a system turn when a prompt is given.
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            conversation.append(Turn::system(prompt));
        }
        conversation
    }

    /// The only mutator.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The most recent `n` turns, oldest first.
    pub fn suffix(&self, n: usize) -> Vec<Turn> {
        let start = self.turns.len().saturating_sub(n);
        self.turns[start..].to_vec()
    }

    /// Reply context: the leading system turn, if any, followed by the most
    /// recent `n` turns after it.
    pub fn window(&self, n: usize) -> Vec<Turn> {
        match self.turns.first() {
            Some(first) if first.role == Role::System => {
                let rest = &self.turns[1..];
                let start = rest.len().saturating_sub(n);
                let mut window = Vec::with_capacity(1 + rest.len() - start);
                window.push(first.clone());
                window.extend_from_slice(&rest[start..]);
                window
            }
            _ => self.suffix(n),
        }
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

    /// The most recent turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }
}
