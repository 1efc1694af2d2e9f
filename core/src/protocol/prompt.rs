use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::message::{StructuredMessage, PROMPT_REQUEST_TYPE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Input,
    Confirm,
    Select,
    Checkbox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptChoice {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConfig {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<PromptChoice>,
}

/// Typed view of a `prompt_request` structured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    pub request_id: String,
    pub prompt_type: PromptKind,
    pub prompt_config: PromptConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub timestamp: String,
}

impl PromptRequest {
    pub fn new(kind: PromptKind, message: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            prompt_type: kind,
            prompt_config: PromptConfig {
                message: message.into(),
                default: None,
                choices: Vec::new(),
            },
            timeout_ms: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.prompt_config.default = Some(default);
        self
    }

    pub fn with_choice(mut self, name: impl Into<String>, value: Value) -> Self {
        self.prompt_config.choices.push(PromptChoice {
            name: name.into(),
            value,
        });
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn into_structured(self) -> StructuredMessage {
        let mut message = StructuredMessage::new(PROMPT_REQUEST_TYPE);
        if let Ok(Value::Object(fields)) = serde_json::to_value(&self) {
            message.fields = fields;
        }
        message
    }

    pub fn from_structured(message: &StructuredMessage) -> Option<Self> {
        if !message.is_prompt_request() {
            return None;
        }
        serde_json::from_value(Value::Object(message.fields.clone())).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structured_form_carries_request_id() {
        let req = PromptRequest::new(PromptKind::Select, "Pick one")
            .with_choice("first", json!(1))
            .with_choice("second", json!(2))
            .with_timeout_ms(500);
        let id = req.request_id.clone();
        let structured = req.clone().into_structured();

        assert!(structured.is_prompt_request());
        assert_eq!(structured.request_id(), Some(id.as_str()));
        assert_eq!(structured.get("promptType"), Some(&json!("select")));
        assert_eq!(PromptRequest::from_structured(&structured), Some(req));
    }
}
