//! Conversation correlator: turns a stream of inbound chat events into
//! exactly-once question/feedback records.
//!
//! Every event runs a small terminal state machine: Duplicate, Question,
//! Feedback, or Ignored. The dedup set and open-question table live behind
//! a single async mutex, which both prevents two deliveries of the same
//! message id from passing the unseen check and serializes events so a
//! question is always registered before its feedback can match.
//!
//! Marking a message seen happens before any side effect — the seen mark
//! is the gate, so a downstream persistence failure cannot cause the
//! action to run twice on redelivery.
//!
//! The in-memory state is an ephemeral cache rebuilt from stored
//! interactions at startup; the durable rows are the source of truth.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::CoreError;
use crate::models::{Comment, EventOutcome, InboundEvent, SkipReason};
use crate::store::RecordStore;

struct CorrelationState {
    seen: HashSet<String>,
    /// thread_id → question text, for correlating threaded replies.
    open_questions: HashMap<String, String>,
}

pub struct Correlator {
    store: Arc<RecordStore>,
    /// Workspaces allowed to submit events. Empty means allow all.
    allowed_workspaces: Vec<String>,
    state: Mutex<CorrelationState>,
}

impl Correlator {
    /// Rebuild correlation state from the durable interaction records.
    ///
    /// Only question message ids survive a restart (feedback ids are not
    /// stored individually), so the rebuilt dedup set is a subset of what
    /// the previous process held.
    pub async fn load(
        store: Arc<RecordStore>,
        allowed_workspaces: Vec<String>,
    ) -> Result<Self, CoreError> {
        let interactions = store.all_interactions().await?;

        let mut seen = HashSet::new();
        let mut open_questions = HashMap::new();
        for interaction in interactions {
            seen.insert(interaction.thread_id.clone());
            open_questions.insert(interaction.thread_id, interaction.question_text);
        }

        info!(
            threads = open_questions.len(),
            "correlator state rebuilt from store"
        );

        Ok(Self {
            store,
            allowed_workspaces,
            state: Mutex::new(CorrelationState {
                seen,
                open_questions,
            }),
        })
    }

    fn is_authorized(&self, workspace: Option<&str>) -> bool {
        if self.allowed_workspaces.is_empty() {
            return true;
        }
        workspace
            .map(|w| self.allowed_workspaces.iter().any(|a| a == w))
            .unwrap_or(false)
    }

    /// Classify one inbound event and persist its consequences.
    ///
    /// Exactly-once: the first delivery of a message id takes effect, every
    /// later delivery yields [`EventOutcome::Duplicate`] with no side
    /// effect. Events for the same thread are serialized by the state lock,
    /// so feedback can never be processed ahead of its question.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome, CoreError> {
        if !self.is_authorized(event.workspace.as_deref()) {
            // Rejected before the state machine: no dedup slot is consumed.
            warn!(
                message_id = %event.message_id,
                workspace = event.workspace.as_deref().unwrap_or("-"),
                "event from unauthorized workspace"
            );
            return Ok(EventOutcome::Ignored {
                reason: SkipReason::Unauthorized,
            });
        }

        let mut state = self.state.lock().await;

        if state.seen.contains(&event.message_id) {
            info!(message_id = %event.message_id, "message already processed");
            return Ok(EventOutcome::Duplicate);
        }
        state.seen.insert(event.message_id.clone());

        let thread_ref = event.thread_ref.as_deref().filter(|t| !t.is_empty());

        if thread_ref.is_none() && event.text.contains('?') {
            // New top-level question: the message id becomes the thread id.
            self.store
                .insert_interaction(
                    &event.message_id,
                    &event.channel,
                    &event.text,
                    &event.author,
                )
                .await?;
            state
                .open_questions
                .insert(event.message_id.clone(), event.text.clone());

            info!(thread_id = %event.message_id, "new question registered");
            return Ok(EventOutcome::Question {
                thread_id: event.message_id,
            });
        }

        if let Some(thread_id) = thread_ref {
            if let Some(question_text) = state.open_questions.get(thread_id).cloned() {
                self.store
                    .append_comment(
                        thread_id,
                        &Comment {
                            text: event.text.clone(),
                            author: event.author.clone(),
                            timestamp: Utc::now(),
                        },
                    )
                    .await?;

                info!(thread_id = %thread_id, "feedback correlated to question");
                return Ok(EventOutcome::Feedback {
                    thread_id: thread_id.to_string(),
                    question_text,
                });
            }

            // Reply into a thread we never saw a question for. Possibly
            // real feedback lost to an incomplete state rebuild; recorded
            // for observability only.
            info!(message_id = %event.message_id, thread_ref = %thread_id, "reply to unknown thread");
            return Ok(EventOutcome::Ignored {
                reason: SkipReason::UnknownThread,
            });
        }

        info!(message_id = %event.message_id, "top-level message is not a question");
        Ok(EventOutcome::Ignored {
            reason: SkipReason::NotAQuestion,
        })
    }
}
