use crate::{ChatMessage, InferenceError};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

const SYSTEM_INSTRUCTION: &str = "You are a helpful assistant that answers questions based on the provided context. \
Use only the information given in the context to answer the question. \
If the context doesn't contain enough information, say so clearly.";

/// Mistral instruct chat template with the retrieved context inlined.
pub fn contextual_prompt(question: &str, context: &str) -> String {
    format!("<s>[INST] {SYSTEM_INSTRUCTION}\n\nContext:\n{context}\n\nQuestion: {question} [/INST]")
}

pub fn format_messages_as_prompt(messages: &[ChatMessage]) -> String {
    let mut parts = messages
        .iter()
        .map(|message| format!("{}: {}", capitalize(&message.role), message.content))
        .collect::<Vec<_>>();
    parts.push("Assistant:".to_string());
    parts.join("\n\n")
}

fn capitalize(role: &str) -> String {
    let mut chars = role.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

const FENCE_PATTERN: &str = r"^```(?:json)?\s*|\s*```$";

static FENCE: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn fence() -> Result<&'static Regex, InferenceError> {
    FENCE
        .get_or_init(|| Regex::new(FENCE_PATTERN))
        .as_ref()
        .map_err(|error| InferenceError::JsonOutput(error.to_string()))
}

/// Parses model output that is supposed to be JSON, tolerating code fences,
/// wrapping quotes and backslash-escaped payloads.
pub fn clean_and_parse_json(raw: &str) -> Result<Value, InferenceError> {
    let unfenced = fence()?.replace_all(raw.trim(), "");
    let cleaned = unfenced.trim().trim_matches('\'');

    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(first) => serde_json::from_str(&unescape(cleaned))
            .map_err(|_| InferenceError::JsonOutput(first.to_string())),
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('b') => out.push('\u{8}'),
            Some('f') => out.push('\u{c}'),
            Some('u') => match read_hex4(&mut chars) {
                Some(high @ 0xD800..=0xDBFF) => {
                    let low = if chars.peek() == Some(&'\\') {
                        let mut lookahead = chars.clone();
                        lookahead.next();
                        match (lookahead.next(), read_hex4(&mut lookahead)) {
                            (Some('u'), Some(low @ 0xDC00..=0xDFFF)) => {
                                chars = lookahead;
                                Some(low)
                            }
                            _ => None,
                        }
                    } else {
                        None
                    };
                    let decoded = low.and_then(|low| {
                        char::from_u32(0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                    });
                    out.push(decoded.unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                Some(code) => out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)),
                None => out.push('u'),
            },
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Reads exactly four hex digits, consuming nothing when they are not there.
fn read_hex4<I>(chars: &mut std::iter::Peekable<I>) -> Option<u32>
where
    I: Iterator<Item = char> + Clone,
{
    let mut lookahead = chars.clone();
    let mut code = 0u32;
    for _ in 0..4 {
        code = code * 16 + lookahead.next()?.to_digit(16)?;
    }
    *chars = lookahead;
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn contextual_prompt_uses_instruct_template() {
        let prompt = contextual_prompt("What colour is the sky?", "The sky is blue.");

        assert!(prompt.starts_with("<s>[INST] You are a helpful assistant"));
        assert!(prompt.contains("\n\nContext:\nThe sky is blue.\n\n"));
        assert!(prompt.ends_with("Question: What colour is the sky? [/INST]"));
    }

    #[test]
    fn empty_context_still_produces_prompt() {
        let prompt = contextual_prompt("Anything?", "");
        assert!(prompt.contains("Context:\n\n\nQuestion: Anything?"));
    }

    #[test]
    fn messages_are_rendered_with_capitalised_roles() {
        let prompt = format_messages_as_prompt(&[
            ChatMessage::new("system", "Be brief."),
            ChatMessage::new("user", "Hi"),
        ]);
        assert_eq!(prompt, "System: Be brief.\n\nUser: Hi\n\nAssistant:");
    }

    #[test]
    fn fenced_json_is_parsed() {
        let raw = "```json\n{\"answer\": \"yes\", \"score\": 3}\n```";
        assert_eq!(
            clean_and_parse_json(raw).expect("should parse"),
            json!({"answer": "yes", "score": 3})
        );
    }

    #[test]
    fn escaped_json_is_parsed_on_second_attempt() {
        let raw = r#"'{\"items\": [\"a\", \"b\"]}'"#;
        assert_eq!(
            clean_and_parse_json(raw).expect("should parse"),
            json!({"items": ["a", "b"]})
        );
    }

    #[test]
    fn unicode_escapes_are_decoded() {
        let raw = r#"{\"city\": \"Montr\u00e9al\", \"icon\": \"\ud83c\udf41\"}"#;
        assert_eq!(
            clean_and_parse_json(raw).expect("should parse"),
            json!({"city": "Montréal", "icon": "🍁"})
        );
        assert_eq!(unescape(r"caf\u00e9 \uzz"), "café uzz");
    }

    #[test]
    fn prose_is_rejected() {
        assert!(matches!(
            clean_and_parse_json("I cannot answer that."),
            Err(InferenceError::JsonOutput(_))
        ));
    }
}
