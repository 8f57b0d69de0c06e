//! Question responder.
//!
//! Drives the answer path for a newly opened question thread: retrieve the
//! nearest wiki pages as context, ask the assistant, persist the answer on
//! the interaction, then post it back into the originating chat thread.
//!
//! The [`Assistant`] and [`ChatPoster`] seams keep the flow testable and
//! deployment-agnostic; production wires them to whatever LLM gateway and
//! chat platform are in use.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use async_trait::async_trait;

use crate::config::ResponderConfig;
use crate::embedding::Embedder;
use crate::error::CoreError;
use crate::index::VectorIndex;
use crate::retrieve::retrieve;
use crate::store::RecordStore;

/// One assistant completion. `thread_ref` is the assistant-side
/// conversation handle, passed back on follow-ups in the same thread.
#[derive(Debug, Clone)]
pub struct AssistantReply {
    pub answer: String,
    pub thread_ref: Option<String>,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    async fn ask(
        &self,
        prompt: &str,
        prior_thread: Option<&str>,
    ) -> Result<AssistantReply, CoreError>;
}

#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ref: Option<&str>,
    ) -> Result<(), CoreError>;
}

// ============ OpenAI assistant ============

/// Assistant over the OpenAI chat completions API.
///
/// Stateless: each call carries the full prompt, so `prior_thread` is
/// ignored and no thread handle is returned.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiAssistant {
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiAssistant {
    pub fn new(config: &ResponderConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("responder.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl Assistant for OpenAiAssistant {
    async fn ask(
        &self,
        prompt: &str,
        _prior_thread: Option<&str>,
    ) -> Result<AssistantReply, CoreError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transient(format!(
                "OpenAI API error {}: {}",
                status, body_text
            )));
        }

        let json: serde_json::Value = response.json().await?;
        let answer = json
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| {
                CoreError::Transient("invalid OpenAI response: missing message content".to_string())
            })?;

        Ok(AssistantReply {
            answer: answer.to_string(),
            thread_ref: None,
        })
    }
}

// ============ Webhook poster ============

/// Posts answers to a chat relay webhook as JSON
/// `{ "channel", "text", "thread_ref" }`.
pub struct WebhookPoster {
    url: String,
    client: reqwest::Client,
}

impl WebhookPoster {
    pub fn new(url: String, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl ChatPoster for WebhookPoster {
    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ref: Option<&str>,
    ) -> Result<(), CoreError> {
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
            "thread_ref": thread_ref,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(CoreError::Transient(format!(
                "webhook post error {}: {}",
                status, body_text
            )));
        }
        Ok(())
    }
}

/// Poster used when no webhook is configured: answers are only persisted.
pub struct NullPoster;

#[async_trait]
impl ChatPoster for NullPoster {
    async fn post_message(
        &self,
        channel: &str,
        _text: &str,
        thread_ref: Option<&str>,
    ) -> Result<(), CoreError> {
        info!(channel, thread_ref = thread_ref.unwrap_or("-"), "no post_url configured; answer stored only");
        Ok(())
    }
}

pub struct QuestionResponder {
    store: Arc<RecordStore>,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    assistant: Arc<dyn Assistant>,
    poster: Arc<dyn ChatPoster>,
    pages_collection: String,
    context_k: usize,
    max_k: usize,
}

impl QuestionResponder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<RecordStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        assistant: Arc<dyn Assistant>,
        poster: Arc<dyn ChatPoster>,
        pages_collection: String,
        context_k: usize,
        max_k: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            index,
            assistant,
            poster,
            pages_collection,
            context_k,
            max_k,
        }
    }

    /// Answer the question that opened `thread_id`.
    ///
    /// Retrieval is best-effort: with no index hits the assistant is asked
    /// with the bare question. A posting failure after the answer is
    /// persisted is logged, not fatal, since the stored answer survives.
    pub async fn answer_question(&self, thread_id: &str) -> Result<(), CoreError> {
        let interaction = self
            .store
            .find_interaction_by_thread(thread_id)
            .await?
            .ok_or_else(|| {
                CoreError::Integrity(format!("no interaction for thread {}", thread_id))
            })?;

        let prompt = self.build_prompt(&interaction.question_text).await?;
        let reply = self.assistant.ask(&prompt, None).await?;

        self.store
            .set_answer(thread_id, &reply.answer, reply.thread_ref.as_deref())
            .await?;

        if let Err(e) = self
            .poster
            .post_message(&interaction.channel, &reply.answer, Some(thread_id))
            .await
        {
            warn!(thread_id, "answer stored but not posted: {}", e);
        }

        info!(thread_id, "question answered");
        Ok(())
    }

    /// Continue the conversation after feedback landed in `thread_id`.
    ///
    /// Reuses the interaction's stored assistant thread so the assistant
    /// sees the prior exchange.
    pub async fn answer_feedback(
        &self,
        thread_id: &str,
        feedback_text: &str,
    ) -> Result<(), CoreError> {
        let interaction = self
            .store
            .find_interaction_by_thread(thread_id)
            .await?
            .ok_or_else(|| {
                CoreError::Integrity(format!("no interaction for thread {}", thread_id))
            })?;

        let reply = self
            .assistant
            .ask(feedback_text, interaction.assistant_thread_id.as_deref())
            .await?;

        self.store
            .set_answer(thread_id, &reply.answer, reply.thread_ref.as_deref())
            .await?;

        if let Err(e) = self
            .poster
            .post_message(&interaction.channel, &reply.answer, Some(thread_id))
            .await
        {
            warn!(thread_id, "follow-up stored but not posted: {}", e);
        }

        Ok(())
    }

    async fn build_prompt(&self, question: &str) -> Result<String, CoreError> {
        let page_ids = retrieve(
            self.embedder.as_ref(),
            self.index.as_ref(),
            &self.pages_collection,
            question,
            self.context_k,
            self.max_k,
        )
        .await;

        let mut prompt = String::new();
        if !page_ids.is_empty() {
            prompt.push_str("Answer using the documentation below where relevant.\n\n");
            for page_id in &page_ids {
                if let Some(page) = self.store.find_page(page_id).await? {
                    prompt.push_str(&format!("--- {} ---\n{}\n\n", page.title, page.content));
                }
            }
        }
        prompt.push_str(&format!("Question: {}", question));
        Ok(prompt)
    }
}
