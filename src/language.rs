//! Language detection via a constrained chat completion.
//!
//! The detector asks for a bare ISO 639-1 code. Anything that is not exactly
//! two ASCII letters after trimming and lower-casing resolves to the
//! configured default code; only a failure of the chat call itself is an
//! error.

use anyhow::Result;
use std::sync::Arc;

use crate::chat::{ChatModel, GenerateOptions};

const SYSTEM_PROMPT: &str = "You are a language detection expert.";

const DETECT_OPTIONS: GenerateOptions = GenerateOptions {
    max_tokens: 5,
    temperature: 0.0,
};

#[derive(Clone)]
pub struct LanguageDetector {
    chat: Arc<dyn ChatModel>,
    default_code: String,
}

impl LanguageDetector {
    pub fn new(chat: Arc<dyn ChatModel>, default_code: impl Into<String>) -> Self {
        Self {
            chat,
            default_code: default_code.into(),
        }
    }

    /// Detect the language of `text`, returning a two-letter code.
    pub async fn detect(&self, text: &str) -> Result<String> {
        let prompt = format!(
            "Identify the language of the following text. \
             Respond with only the two-letter ISO 639-1 language code \
             (e.g., 'en' for English, 'pt' for Portuguese). Text: '{}'",
            text
        );

        let raw = self
            .chat
            .generate(SYSTEM_PROMPT, &prompt, &DETECT_OPTIONS)
            .await?;

        Ok(self.normalize(&raw))
    }

    /// Validate a raw detector response, falling back to the default code.
    pub fn normalize(&self, raw: &str) -> String {
        match parse_language_code(raw) {
            Some(code) => code,
            None => {
                tracing::warn!(
                    response = raw,
                    fallback = %self.default_code,
                    "could not determine a valid language code"
                );
                self.default_code.clone()
            }
        }
    }
}

/// Returns the lower-cased code if `raw` is exactly two ASCII letters once trimmed.
pub fn parse_language_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_lowercase();
    if code.len() == 2 && code.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(code)
    } else {
        None
    }
}
