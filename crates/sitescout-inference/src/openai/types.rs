//! Wire types for the chat completions endpoint.
//!
//! Requests borrow from the caller; replies keep only what the classifier
//! reads back.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<Turn<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ReplyFormat>,
}

/// One prompt turn.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Turn<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

impl<'a> Turn<'a> {
    pub fn system(content: &'a str) -> Self {
        Self { role: "system", content }
    }

    pub fn user(content: &'a str) -> Self {
        Self { role: "user", content }
    }
}

/// `{"type": "json_object"}` when JSON mode is on.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReplyFormat {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

impl ReplyFormat {
    pub const JSON_OBJECT: Self = Self { kind: "json_object" };
}

#[derive(Debug, Deserialize)]
pub struct CompletionReply {
    #[serde(default)]
    pub choices: Vec<ReplyChoice>,
}

impl CompletionReply {
    /// Text of the first choice, if the endpoint returned any.
    pub fn into_text(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReplyChoice {
    pub message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
pub struct ReplyMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// `{"error": {...}}` body returned on non-2xx replies.
#[derive(Debug, Default, Deserialize)]
pub struct ErrorEnvelope {
    #[serde(default)]
    pub error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_mode_and_roles() {
        let request = CompletionRequest {
            model: "gpt-4o-mini",
            messages: vec![Turn::system("rules"), Turn::user("hits")],
            temperature: None,
            response_format: Some(ReplyFormat::JSON_OBJECT),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hits");
        assert!(value.get("temperature").is_none());
    }

    #[test]
    fn test_reply_text_and_empty_choices() {
        let reply: CompletionReply = serde_json::from_str(
            r#"{"id": "x", "choices": [{"index": 0, "message": {"role": "assistant", "content": "{}"}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.into_text().as_deref(), Some("{}"));

        let empty: CompletionReply = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(empty.into_text().is_none());
    }

    #[test]
    fn test_error_envelope_tolerates_missing_fields() {
        let parsed: ErrorEnvelope =
            serde_json::from_str(r#"{"error": {"message": "bad key", "code": "invalid_api_key"}}"#)
                .unwrap();
        assert_eq!(parsed.error.message, "bad key");
        assert_eq!(parsed.error.kind, "");
        assert_eq!(parsed.error.code.as_deref(), Some("invalid_api_key"));
    }
}
