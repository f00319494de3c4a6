//! services/backend/src/adapters/flashcards_llm.rs
//!
//! This module contains the adapter for the flashcard-generating LLM.
//! It implements the `FlashcardGenerator` port from the `core` crate.

use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use notenest_core::{
    domain::{Flashcard, FlashcardSettings, NoteFile},
    ports::{BlobStore, FlashcardGenerator, PortError, PortResult},
};
use regex::Regex;
use tracing::{debug, warn};

use super::text_extract::extract_text;

/// Shorter extracts do not carry enough material for a deck.
pub const MIN_TEXT_CHARS: usize = 100;
/// Only this much of the extracted text is sent to the model.
pub const MAX_PROMPT_CHARS: usize = 10_000;

//=========================================================================================
// Pure Helpers
//=========================================================================================

/// Collapses whitespace and strips characters outside words and basic punctuation.
pub fn clean_text(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || c.is_whitespace()
                || matches!(c, '_' | '.' | ',' | '!' | '?' | ';' | ':' | '(' | ')' | '\'' | '"')
        })
        .collect();
    filtered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(text: &str, settings: &FlashcardSettings) -> String {
    format!(
        "Create exactly {count} educational flashcards from the following text content.\n\
         Requirements:\n\
         1. Use ONLY the provided text content\n\
         2. Each flashcard has a clear question (front) and a detailed answer (back)\n\
         3. Focus on key concepts, definitions and important facts\n\
         4. Difficulty level: {difficulty}\n\n\
         TEXT CONTENT:\n{text}\n\n\
         Return only a JSON array in exactly this format:\n\
         [{{\"front\": \"question\", \"back\": \"answer\", \"difficulty\": \"{difficulty}\"}}]",
        count = settings.card_count,
        difficulty = settings.difficulty,
        text = truncate_chars(text, MAX_PROMPT_CHARS),
    )
}

/// Pulls the first JSON array out of a model reply and parses it as flashcards.
pub fn extract_flashcards(reply: &str) -> PortResult<Vec<Flashcard>> {
    let pattern = Regex::new(r"\[[\s\S]*\]").map_err(|e| PortError::Unexpected(e.to_string()))?;
    let json = pattern.find(reply).ok_or_else(|| {
        PortError::Unexpected("Flashcard reply did not contain a JSON array.".to_string())
    })?;
    let cards: Vec<Flashcard> = serde_json::from_str(json.as_str())
        .map_err(|e| PortError::Unexpected(format!("Malformed flashcard JSON: {}", e)))?;
    let cards: Vec<Flashcard> = cards
        .into_iter()
        .filter(|c| !c.front.trim().is_empty() && !c.back.trim().is_empty())
        .collect();
    if cards.is_empty() {
        return Err(PortError::Unexpected(
            "Flashcard reply contained no usable cards.".to_string(),
        ));
    }
    Ok(cards)
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `FlashcardGenerator` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiFlashcardAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    blobs: Arc<dyn BlobStore>,
}

impl OpenAiFlashcardAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            client,
            model,
            blobs,
        }
    }

    async fn complete(&self, prompt: String) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content("You are a study assistant that writes flashcards strictly from the material provided. You reply with JSON only.")
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Unexpected("Flashcard LLM response contained no text content.".to_string())
            })
    }
}

//=========================================================================================
// `FlashcardGenerator` Trait Implementation
//=========================================================================================

#[async_trait]
impl FlashcardGenerator for OpenAiFlashcardAdapter {
    async fn generate(
        &self,
        file: &NoteFile,
        settings: &FlashcardSettings,
    ) -> PortResult<Vec<Flashcard>> {
        let data = self.blobs.get_blob(&file.file_url).await?;
        let text = clean_text(&extract_text(&file.file_type, data).await?);
        if text.chars().count() < MIN_TEXT_CHARS {
            warn!(file = %file.file_name, "Extracted text too short for flashcards");
            return Err(PortError::Unexpected(format!(
                "Extracted text is too short (less than {} characters).",
                MIN_TEXT_CHARS
            )));
        }

        let reply = self.complete(build_prompt(&text, settings)).await?;
        let mut cards = extract_flashcards(&reply)?;
        cards.truncate(settings.card_count as usize);
        for card in &mut cards {
            if card.difficulty.is_empty() {
                card.difficulty = settings.difficulty.to_string();
            }
        }
        debug!(file = %file.file_name, cards = cards.len(), "Flashcards parsed");
        Ok(cards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notenest_core::domain::Difficulty;

    #[test]
    fn clean_text_collapses_whitespace_and_strips_symbols() {
        assert_eq!(
            clean_text("  Big-O\tnotation:\n\n O(n²) → fast!  "),
            "BigO notation: O(n) fast!"
        );
    }

    #[test]
    fn prompt_is_capped() {
        let long = "a".repeat(MAX_PROMPT_CHARS + 500);
        let settings = FlashcardSettings {
            difficulty: Difficulty::Hard,
            card_count: 4,
        };
        let prompt = build_prompt(&long, &settings);
        assert!(prompt.contains("exactly 4 educational flashcards"));
        assert!(prompt.contains("Difficulty level: hard"));
        assert!(!prompt.contains(&"a".repeat(MAX_PROMPT_CHARS + 1)));
    }

    #[test]
    fn flashcards_are_found_inside_chatty_replies() {
        let reply = "Sure! Here you go:\n```json\n[{\"front\": \"What is a stack?\", \"back\": \"A LIFO structure.\", \"difficulty\": \"easy\"}, {\"front\": \" \", \"back\": \"dropped\"}]\n```";
        let cards = extract_flashcards(reply).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "What is a stack?");
    }

    #[test]
    fn replies_without_cards_are_errors() {
        assert!(extract_flashcards("I cannot help with that.").is_err());
        assert!(extract_flashcards("[]").is_err());
        assert!(extract_flashcards("[not json]").is_err());
    }
}
