//! Reasoning service boundary.
//!
//! The engine treats the reasoning service as an opaque text-completion oracle:
//! a prompt, an optional system prompt and an ordered history go in, a string
//! comes out. No retry or backoff is layered on here; callers needing resilience
//! wrap [`ReasoningService`] themselves.

pub mod ollama;

use std::collections::VecDeque;
use std::sync::Mutex;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ollama::{OllamaClient, OllamaConfig};

/// Errors from the reasoning service.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("reasoning service is not available at {url}")]
    #[diagnostic(
        code(analyst::llm::unavailable),
        help("Start Ollama with `ollama serve`, or point `llm.base_url` at a running server.")
    )]
    Unavailable { url: String },

    #[error("reasoning request failed: {message}")]
    #[diagnostic(
        code(analyst::llm::request_failed),
        help("Check that the server is running and the model is pulled.")
    )]
    RequestFailed { message: String },

    #[error("failed to parse reasoning service response: {message}")]
    #[diagnostic(
        code(analyst::llm::parse_error),
        help("The server returned an unexpected response format.")
    )]
    ParseError { message: String },

    #[error("scripted reasoning service has no reply left for this call")]
    #[diagnostic(
        code(analyst::llm::script_exhausted),
        help("Queue one reply per expected call with `ScriptedService::push_reply`.")
    )]
    ScriptExhausted,
}

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant".
    pub role: String,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// A text-completion oracle.
pub trait ReasoningService: Send + Sync {
    /// Complete `prompt`, optionally under a system prompt and after `history`.
    fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<String, LlmError>;
}

/// A prompt recorded by [`ScriptedService`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub system: Option<String>,
    pub history_len: usize,
}

/// Deterministic reasoning service: answers from a queue of canned replies and
/// records every prompt it was given.
///
/// Used by tests and dry runs. A queued `Err` simulates a service failure.
pub struct ScriptedService {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a service that answers with `replies`, in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let service = Self::new();
        for reply in replies {
            service.push_reply(reply);
        }
        service
    }

    /// Queue a successful reply.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("script lock poisoned")
            .push_back(Ok(reply.into()));
    }

    /// Queue a failing call.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.replies
            .lock()
            .expect("script lock poisoned")
            .push_back(Err(message.into()));
    }

    /// All prompts received so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("script lock poisoned").clone()
    }

    /// Number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("script lock poisoned").len()
    }
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self::new()
    }
}

impl ReasoningService for ScriptedService {
    fn complete(
        &self,
        prompt: &str,
        system: Option<&str>,
        history: &[ChatMessage],
    ) -> Result<String, LlmError> {
        self.calls
            .lock()
            .expect("script lock poisoned")
            .push(RecordedCall {
                prompt: prompt.to_string(),
                system: system.map(str::to_string),
                history_len: history.len(),
            });

        match self
            .replies
            .lock()
            .expect("script lock poisoned")
            .pop_front()
        {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::RequestFailed { message }),
            None => Err(LlmError::ScriptExhausted),
        }
    }
}

impl std::fmt::Debug for ScriptedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedService")
            .field("calls", &self.call_count())
            .finish()
    }
}

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````) from a reply.
///
/// Replies without a fence are returned trimmed and otherwise untouched.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}
