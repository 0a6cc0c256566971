//! Per-session conversation history
//!
//! A turn is appended only after a successful answer stage. History is
//! unbounded unless a `max_turns` bound is configured, in which case the
//! oldest turn is dropped first.

use crate::providers::Message;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One completed question/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// The standalone question produced by the rephrase stage
    pub question: String,
    /// Raw answer-stage output
    pub answer: String,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Ordered turn history, oldest first
///
/// # Examples
///
/// ```
/// use spatialmind::pipeline::{Conversation, Turn};
///
/// let mut conversation = Conversation::new(Some(1));
/// conversation.push(Turn::new("q1", "a1"));
/// conversation.push(Turn::new("q2", "a2"));
/// assert_eq!(conversation.len(), 1);
/// assert_eq!(conversation.turns()[0].question, "q2");
/// ```
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    max_turns: Option<usize>,
}

impl Conversation {
    pub fn new(max_turns: Option<usize>) -> Self {
        Self {
            turns: VecDeque::new(),
            max_turns: max_turns.filter(|m| *m > 0),
        }
    }

    /// Append a turn, evicting the oldest when the bound is reached
    pub fn push(&mut self, turn: Turn) {
        if let Some(max) = self.max_turns {
            while self.turns.len() >= max {
                self.turns.pop_front();
                tracing::debug!(max_turns = max, "Dropped oldest conversation turn");
            }
        }
        self.turns.push_back(turn);
    }

    pub fn turns(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    /// History as alternating user/assistant messages
    pub fn messages(&self) -> Vec<Message> {
        self.turns
            .iter()
            .flat_map(|t| [Message::user(&t.question), Message::assistant(&t.answer)])
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
