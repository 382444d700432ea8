//! Best-effort conversational rewrite of a matched answer.
//!
//! Never fails: if the chat call errors or returns nothing, the raw FAQ answer
//! is returned unchanged.

use std::sync::Arc;

use crate::chat::{ChatModel, GenerateOptions};

const SYSTEM_PROMPT: &str = "You are a helpful and friendly assistant for an FAQ service. \
Your task is to take a user's question and a corresponding FAQ answer, then create a more \
personalized, friendly, and comprehensive response.

Guidelines:
- Be conversational and warm in tone
- Address the user directly when appropriate
- If the FAQ answer seems technical, explain it in simpler terms
- Keep the core information from the FAQ answer intact
- Do not add facts, links, or instructions that are not present in the FAQ answer";

const ENHANCE_OPTIONS: GenerateOptions = GenerateOptions {
    max_tokens: 300,
    temperature: 0.7,
};

#[derive(Clone)]
pub struct AnswerEnhancer {
    chat: Arc<dyn ChatModel>,
}

impl AnswerEnhancer {
    pub fn new(chat: Arc<dyn ChatModel>) -> Self {
        Self { chat }
    }

    /// Rewrite `raw_answer` for `user_question`, or return it as-is on failure.
    pub async fn enhance(&self, user_question: &str, raw_answer: &str) -> String {
        let prompt = user_prompt(user_question, raw_answer);

        match self
            .chat
            .generate(SYSTEM_PROMPT, &prompt, &ENHANCE_OPTIONS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("enhancement returned empty text, using raw answer");
                raw_answer.to_string()
            }
            Err(e) => {
                tracing::warn!(error = %e, "enhancement failed, using raw answer");
                raw_answer.to_string()
            }
        }
    }
}

fn user_prompt(user_question: &str, raw_answer: &str) -> String {
    format!(
        "User's question: \"{}\"\n\n\
         FAQ answer: \"{}\"\n\n\
         Please provide a friendly, helpful response that addresses the user's \
         question using only the FAQ information.",
        user_question, raw_answer
    )
}
