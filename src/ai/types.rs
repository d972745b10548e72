use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AiError, AiResult};
use crate::storage::{Disagreement, SummaryMetadata};

/// A chat message sent to the summarization API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Message role ("system" or "user").
    pub role: String,
    /// Message content.
    pub content: String,
}

impl Message {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for the chat completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    /// Forces the model to emit a JSON object.
    pub response_format: ResponseFormat,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token cap.
    pub max_tokens: u32,
}

/// Response format directive.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    /// Format type, always "json_object" here.
    #[serde(rename = "type")]
    pub format_type: String,
}

impl ResponseFormat {
    /// JSON-object response format
    pub fn json_object() -> Self {
        Self {
            format_type: "json_object".to_string(),
        }
    }
}

/// Response body from the chat completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Completion choices (first one is used).
    pub choices: Vec<Choice>,
}

/// A single completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    /// The generated message.
    pub message: ChoiceMessage,
}

/// Message payload of a completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    /// Generated text content.
    pub content: Option<String>,
}

impl ChatResponse {
    /// Extract the completion text, failing if the model returned nothing.
    pub fn completion(&self) -> AiResult<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| AiError::MalformedResponse {
                message: "model returned no content".to_string(),
            })
    }
}

/// Parse raw model output into a digest, enforcing the strict shape.
pub fn parse_digest(raw: &str) -> AiResult<SummaryMetadata> {
    let value: Value = serde_json::from_str(raw).map_err(|e| AiError::MalformedResponse {
        message: format!("not valid JSON: {}", e),
    })?;

    digest_from_value(&value)
}

/// Validate a JSON value against the digest contract:
/// `consensus` non-empty string, `disagreements` a list of
/// `{point, views[]}`, `new_questions` a list of strings.
fn digest_from_value(value: &Value) -> AiResult<SummaryMetadata> {
    let object = value.as_object().ok_or_else(|| AiError::MalformedResponse {
        message: "digest is not a JSON object".to_string(),
    })?;

    for field in ["consensus", "disagreements", "new_questions"] {
        if !object.contains_key(field) {
            return Err(AiError::MalformedResponse {
                message: format!("missing required field: {}", field),
            });
        }
    }

    let consensus = object
        .get("consensus")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AiError::MalformedResponse {
            message: "consensus must be a non-empty string".to_string(),
        })?;

    let raw_disagreements =
        object
            .get("disagreements")
            .and_then(Value::as_array)
            .ok_or_else(|| AiError::MalformedResponse {
                message: "disagreements must be an array".to_string(),
            })?;

    let mut disagreements = Vec::with_capacity(raw_disagreements.len());
    for entry in raw_disagreements {
        let point = entry
            .get("point")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| AiError::MalformedResponse {
                message: "disagreement entry missing point".to_string(),
            })?;

        let views = entry
            .get("views")
            .and_then(Value::as_array)
            .ok_or_else(|| AiError::MalformedResponse {
                message: "disagreement entry missing views array".to_string(),
            })?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| AiError::MalformedResponse {
                        message: "disagreement view must be a string".to_string(),
                    })
            })
            .collect::<AiResult<Vec<String>>>()?;

        disagreements.push(Disagreement {
            point: point.to_string(),
            views,
        });
    }

    let new_questions = object
        .get("new_questions")
        .and_then(Value::as_array)
        .ok_or_else(|| AiError::MalformedResponse {
            message: "new_questions must be an array".to_string(),
        })?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| AiError::MalformedResponse {
                    message: "new_questions entry must be a string".to_string(),
                })
        })
        .collect::<AiResult<Vec<String>>>()?;

    Ok(SummaryMetadata {
        consensus: consensus.to_string(),
        disagreements,
        new_questions,
        model: None,
        timestamp: None,
        confidence_score: object.get("confidence_score").and_then(Value::as_f64),
    })
}

/// Re-check an already-typed digest. The worker runs this before persisting
/// so the shape contract holds for any [`super::Summarizer`] implementation,
/// not just the HTTP client.
pub fn ensure_valid_digest(metadata: &SummaryMetadata) -> AiResult<()> {
    if metadata.consensus.trim().is_empty() {
        return Err(AiError::MalformedResponse {
            message: "consensus must be a non-empty string".to_string(),
        });
    }

    for disagreement in &metadata.disagreements {
        if disagreement.point.trim().is_empty() {
            return Err(AiError::MalformedResponse {
                message: "disagreement entry missing point".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_valid_digest() {
        let raw = json!({
            "consensus": "Broad agreement on funding transit first",
            "disagreements": [
                {"point": "timeline", "views": ["immediately", "phased over 5 years"]}
            ],
            "new_questions": ["How should funding be raised?"],
            "confidence_score": 0.85
        })
        .to_string();

        let digest = parse_digest(&raw).unwrap();
        assert_eq!(digest.consensus, "Broad agreement on funding transit first");
        assert_eq!(digest.disagreements.len(), 1);
        assert_eq!(digest.disagreements[0].views.len(), 2);
        assert_eq!(digest.new_questions.len(), 1);
        assert_eq!(digest.confidence_score, Some(0.85));
    }

    #[test]
    fn test_parse_digest_missing_fields() {
        let raw = json!({"consensus": "x"}).to_string();
        let err = parse_digest(&raw).unwrap_err();
        assert!(matches!(err, AiError::MalformedResponse { .. }));
        assert!(err.to_string().contains("disagreements"));
    }

    #[test]
    fn test_parse_digest_empty_consensus() {
        let raw = json!({
            "consensus": "   ",
            "disagreements": [],
            "new_questions": []
        })
        .to_string();
        assert!(parse_digest(&raw).is_err());
    }

    #[test]
    fn test_parse_digest_bad_disagreement_shape() {
        let raw = json!({
            "consensus": "x",
            "disagreements": [{"point": "y"}],
            "new_questions": []
        })
        .to_string();
        let err = parse_digest(&raw).unwrap_err();
        assert!(err.to_string().contains("views"));
    }

    #[test]
    fn test_parse_digest_not_json() {
        let err = parse_digest("Here is my summary: everyone agrees.").unwrap_err();
        assert!(matches!(err, AiError::MalformedResponse { .. }));
    }

    #[test]
    fn test_completion_extraction() {
        let response = ChatResponse {
            choices: vec![Choice {
                message: ChoiceMessage {
                    content: Some("{}".to_string()),
                },
            }],
        };
        assert_eq!(response.completion().unwrap(), "{}");

        let empty = ChatResponse { choices: vec![] };
        assert!(empty.completion().is_err());
    }

    #[test]
    fn test_ensure_valid_digest() {
        let mut digest = SummaryMetadata {
            consensus: "agreement".to_string(),
            disagreements: vec![],
            new_questions: vec![],
            model: None,
            timestamp: None,
            confidence_score: None,
        };
        assert!(ensure_valid_digest(&digest).is_ok());

        digest.consensus = "  ".to_string();
        assert!(ensure_valid_digest(&digest).is_err());
    }
}
