//! ============================================================================
//! Translation Extractor - Structured block parsing from model replies
//! ============================================================================
//! Language-assistant personas are prompted to append a JSON object with
//! per-word translations after their natural-language reply. This module
//! pulls that block out of the raw text. Extraction is best-effort: a
//! missing or malformed block leaves the reply untouched, never fails the
//! turn.
//! ============================================================================

use serde_json::Value;
use tracing::debug;

use crate::types::WordTranslation;

/// Result of scanning a reply for a trailing translation block.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationExtract {
    pub words: Vec<WordTranslation>,
    pub full_translation: Option<String>,
    /// Reply text with the structured block stripped; identical to the
    /// input when nothing was extracted.
    pub cleaned_response: String,
    pub extracted: bool,
}

impl TranslationExtract {
    fn none(raw: &str) -> Self {
        Self {
            words: Vec::new(),
            full_translation: None,
            cleaned_response: raw.to_string(),
            extracted: false,
        }
    }
}

/// Scan the tail of a reply for an embedded JSON object carrying a `words`
/// array and a `fullTranslation` string. Walks candidate `{` positions from
/// the end so nested objects inside the block are skipped over.
pub fn extract_translations(raw: &str) -> TranslationExtract {
    let mut search_end = raw.len();

    while let Some(idx) = raw[..search_end].rfind('{') {
        let tail = strip_closing_fence(raw[idx..].trim_end());

        if let Some((words, full_translation)) = parse_block(tail) {
            debug!(
                "Extracted translation block: {} words",
                words.len()
            );
            return TranslationExtract {
                words,
                full_translation: Some(full_translation),
                cleaned_response: strip_opening_fence(&raw[..idx]).to_string(),
                extracted: true,
            };
        }

        if idx == 0 {
            break;
        }
        search_end = idx;
    }

    TranslationExtract::none(raw)
}

/// Models often wrap the block in a markdown code fence; tolerate it.
fn strip_closing_fence(tail: &str) -> &str {
    tail.strip_suffix("```").map(str::trim_end).unwrap_or(tail)
}

fn strip_opening_fence(prefix: &str) -> &str {
    let trimmed = prefix.trim_end();
    let trimmed = trimmed
        .strip_suffix("```json")
        .or_else(|| trimmed.strip_suffix("```"))
        .unwrap_or(trimmed);
    trimmed.trim_end()
}

/// Parse one candidate block. Both `words` and `fullTranslation` must be
/// present and well-typed; individual malformed word entries are discarded
/// silently rather than rejecting the whole block.
fn parse_block(candidate: &str) -> Option<(Vec<WordTranslation>, String)> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    let obj = value.as_object()?;

    let words_raw = obj.get("words")?.as_array()?;
    let full_translation = obj.get("fullTranslation")?.as_str()?.to_string();

    let words = words_raw.iter().filter_map(parse_word).collect();
    Some((words, full_translation))
}

fn parse_word(value: &Value) -> Option<WordTranslation> {
    let obj = value.as_object()?;
    let original_word = obj.get("originalWord")?.as_str()?;
    let translation = obj.get("translation")?.as_str()?;

    if original_word.is_empty() || translation.is_empty() {
        return None;
    }

    Some(WordTranslation {
        original_word: original_word.to_string(),
        translation: translation.to_string(),
        sentence_context: obj
            .get("sentenceContext")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_extraction() {
        let raw = "Hello\n\n{\"words\":[{\"originalWord\":\"你好\",\"translation\":\"hello\"}],\"fullTranslation\":\"Hello\"}";
        let result = extract_translations(raw);

        assert!(result.extracted);
        assert_eq!(result.cleaned_response, "Hello");
        assert_eq!(result.full_translation.as_deref(), Some("Hello"));
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].original_word, "你好");
        assert_eq!(result.words[0].translation, "hello");
    }

    #[test]
    fn test_no_block_leaves_text_unmodified() {
        let raw = "Just a plain reply with no JSON at the end.";
        let result = extract_translations(raw);

        assert!(!result.extracted);
        assert_eq!(result.cleaned_response, raw);
        assert!(result.words.is_empty());
        assert!(result.full_translation.is_none());
    }

    #[test]
    fn test_fenced_block() {
        let raw = "Bonjour!\n\n```json\n{\"words\":[{\"originalWord\":\"bonjour\",\"translation\":\"hello\",\"sentenceContext\":\"Bonjour!\"}],\"fullTranslation\":\"Hello!\"}\n```";
        let result = extract_translations(raw);

        assert!(result.extracted);
        assert_eq!(result.cleaned_response, "Bonjour!");
        assert_eq!(
            result.words[0].sentence_context.as_deref(),
            Some("Bonjour!")
        );
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let raw = "Hola\n\n{\"words\":[{\"originalWord\":\"hola\",\"translation\":\"hi\"},{\"originalWord\":\"\",\"translation\":\"x\"},{\"originalWord\":\"que\"},42],\"fullTranslation\":\"Hi\"}";
        let result = extract_translations(raw);

        assert!(result.extracted);
        assert_eq!(result.words.len(), 1);
        assert_eq!(result.words[0].original_word, "hola");
    }

    #[test]
    fn test_missing_full_translation_is_not_extracted() {
        let raw = "Hey\n\n{\"words\":[{\"originalWord\":\"hey\",\"translation\":\"hi\"}]}";
        let result = extract_translations(raw);

        assert!(!result.extracted);
        assert_eq!(result.cleaned_response, raw);
    }

    #[test]
    fn test_json_mid_text_without_trailing_block() {
        let raw = "Here is an example object: {\"a\": 1} and some more prose.";
        let result = extract_translations(raw);

        assert!(!result.extracted);
        assert_eq!(result.cleaned_response, raw);
    }

    #[test]
    fn test_empty_words_array_still_extracts() {
        let raw = "Danke\n\n{\"words\":[],\"fullTranslation\":\"Thanks\"}";
        let result = extract_translations(raw);

        assert!(result.extracted);
        assert!(result.words.is_empty());
        assert_eq!(result.full_translation.as_deref(), Some("Thanks"));
        assert_eq!(result.cleaned_response, "Danke");
    }
}
