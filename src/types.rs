use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Chat identifier, the partition key of every per-user bucket.
pub type ChatId = i64;

/// Conversation state of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i64)]
pub enum Mode {
    Menu = 0,
    Add = 1,
    Study = 2,
    #[default]
    GetStarted = 3,
    Feedback = 4,
}

impl Mode {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            0 => Some(Mode::Menu),
            1 => Some(Mode::Add),
            2 => Some(Mode::Study),
            3 => Some(Mode::GetStarted),
            4 => Some(Mode::Feedback),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Menu => "menu",
            Mode::Add => "add",
            Mode::Study => "study",
            Mode::GetStarted => "get-started",
            Mode::Feedback => "feedback",
        }
    }
}

/// A phrase the user saved together with its recall score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phrase {
    pub phrase: String,
    pub explanation: String,
    #[serde(default)]
    pub score: i64,
}

impl Phrase {
    pub fn new(phrase: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            explanation: explanation.into(),
            score: 0,
        }
    }
}

/// What a chat should study right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Study {
    /// The chat has no phrases at all.
    Empty,
    /// Nothing is due yet; `next` is the time until the earliest phrase is.
    Waiting { next: Duration },
    /// `total` phrases are due, including the one returned.
    Due {
        phrase: String,
        explanation: String,
        total: usize,
    },
}

impl Study {
    /// Number of due studies, zero unless `Due`.
    pub fn total(&self) -> usize {
        match self {
            Study::Due { total, .. } => *total,
            _ => 0,
        }
    }
}

/// Criteria for bulk phrase deletion.
///
/// Text criteria match by substring, chat and score match exactly.
/// All set criteria must hold.
#[derive(Debug, Clone, Default)]
pub struct PhraseFilter {
    pub chat_id: Option<ChatId>,
    pub phrase: Option<String>,
    pub explanation: Option<String>,
    pub score: Option<i64>,
}

impl PhraseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chat(mut self, chat_id: ChatId) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn phrase(mut self, text: impl Into<String>) -> Self {
        self.phrase = Some(text.into());
        self
    }

    pub fn explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }

    pub fn score(mut self, score: i64) -> Self {
        self.score = Some(score);
        self
    }

    /// A filter with no criteria would delete everything.
    pub fn is_empty(&self) -> bool {
        self.chat_id.is_none()
            && self.phrase.is_none()
            && self.explanation.is_none()
            && self.score.is_none()
    }

    pub fn matches(&self, chat_id: ChatId, p: &Phrase) -> bool {
        if self.chat_id.is_some_and(|id| id != chat_id) {
            return false;
        }
        if let Some(text) = &self.phrase {
            if !p.phrase.contains(text.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.explanation {
            if !p.explanation.contains(text.as_str()) {
                return false;
            }
        }
        if self.score.is_some_and(|s| s != p.score) {
            return false;
        }
        true
    }
}
