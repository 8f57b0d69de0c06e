//! Core data models used throughout Recall Harness.
//!
//! Two record kinds flow through the embedding pipeline: wiki [`PageRecord`]s
//! and Q&A [`InteractionRecord`]s. Both carry the canonical text used to
//! derive their embedding and the staleness metadata the reconciliation
//! engine queries (`updated_at` vs `embedded_at`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw item produced by a page source before normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPage {
    pub id: String,
    pub title: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

/// A single comment attached to a page or an interaction.
///
/// Comments are append-only: the stored sequence grows over time and entries
/// are never removed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    pub text: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Normalized wiki page stored in SQLite.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub page_id: String,
    pub space_key: String,
    pub title: String,
    pub author: String,
    pub created_at: i64,
    /// Timestamp of the last content mutation. Compared against
    /// `embedded_at` to decide staleness.
    pub updated_at: i64,
    pub content: String,
    pub comments: Vec<Comment>,
    pub embedding: Option<Vec<u8>>,
    pub embedded_at: Option<i64>,
}

impl PageRecord {
    /// Render the canonical text body used to derive the page embedding.
    ///
    /// Deterministic key/value formatting — the same record always produces
    /// the same text, so re-embedding only happens on real content change.
    pub fn canonical_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("spaceKey: {}\n", self.space_key));
        out.push_str(&format!("pageId: {}\n", self.page_id));
        out.push_str(&format!("title: {}\n", self.title));
        out.push_str(&format!("author: {}\n", self.author));
        out.push_str(&format!("createdAt: {}\n", self.created_at));
        out.push_str(&format!("updatedAt: {}\n", self.updated_at));
        out.push_str(&format!("content: {}\n", self.content));
        for comment in &self.comments {
            out.push_str(&format!("comment ({}): {}\n", comment.author, comment.text));
        }
        out
    }
}

/// A tracked question/answer conversation stored in SQLite.
///
/// `thread_id` is the conversation correlation key: the message id of the
/// originating question. It is unique across interactions.
#[derive(Debug, Clone)]
pub struct InteractionRecord {
    pub id: String,
    pub thread_id: String,
    pub channel: String,
    pub question_text: String,
    pub answer_text: Option<String>,
    /// Conversation handle returned by the assistant, passed back on
    /// follow-up invocations in the same thread.
    pub assistant_thread_id: Option<String>,
    pub origin_user_id: String,
    pub asked_at: i64,
    pub updated_at: i64,
    pub comments: Vec<Comment>,
    pub embedding: Option<Vec<u8>>,
    pub embedded_at: Option<i64>,
}

impl InteractionRecord {
    /// Render the canonical text body used to derive the interaction embedding.
    pub fn canonical_text(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("question: {}\n", self.question_text));
        if let Some(answer) = &self.answer_text {
            out.push_str(&format!("answer: {}\n", answer));
        }
        for comment in &self.comments {
            out.push_str(&format!("comment ({}): {}\n", comment.author, comment.text));
        }
        out
    }
}

/// An inbound chat message event, before correlation.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    /// Platform-unique message identifier (Slack: the message `ts`).
    pub message_id: String,
    pub text: String,
    pub channel: String,
    pub author: String,
    /// Set when the message is a threaded reply; the id of the thread root.
    #[serde(default)]
    pub thread_ref: Option<String>,
    /// Originating workspace/tenant, checked against the allow-list.
    #[serde(default)]
    pub workspace: Option<String>,
}

/// Terminal classification of an inbound event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    /// A new question: a thread was opened under `thread_id`.
    Question { thread_id: String },
    /// Feedback correlated to an open question, carrying the original
    /// question text for downstream context.
    Feedback {
        thread_id: String,
        question_text: String,
    },
    /// The message id was already processed; no side effect taken.
    Duplicate,
    /// Neither a question nor a recognized reply; recorded for
    /// observability only.
    Ignored { reason: SkipReason },
}

/// Why an inbound event produced no downstream activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Workspace not on the allow-list.
    Unauthorized,
    /// Top-level message without a question marker.
    NotAQuestion,
    /// Reply whose thread has no recorded open question.
    UnknownThread,
}
