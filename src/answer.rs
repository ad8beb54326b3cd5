//! Answer synthesizer: one reasoning call over the question and the digest.

use crate::config::AnswerSettings;
use crate::llm::ReasoningService;
use crate::observe::{AnalystEvent, EventSink};

/// Build the answer prompt from the question and the formatted context.
pub fn answer_prompt(query: &str, digest: &str) -> String {
    format!(
        "The question is: `{query}`\n\
         And here is the context: `{digest}`\n\n\
         Answer the question using only the context. If the context does not \
         contain enough information, say what is missing."
    )
}

/// Ask the reasoning service for the final answer. Never fails: a reasoning
/// error becomes an inline `Error generating answer: ...` string.
pub fn synthesize(
    reasoning: &dyn ReasoningService,
    settings: &AnswerSettings,
    query: &str,
    digest: &str,
    sink: &dyn EventSink,
) -> String {
    let prompt = answer_prompt(query, digest);
    match reasoning.complete(&prompt, Some(&settings.system_prompt), &[]) {
        Ok(answer) => answer.trim().to_string(),
        Err(e) => {
            let error = e.to_string();
            sink.emit(&AnalystEvent::AnswerFailed {
                error: error.clone(),
            });
            format!("Error generating answer: {error}")
        }
    }
}
