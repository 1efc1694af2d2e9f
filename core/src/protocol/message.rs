use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PROMPT_REQUEST_TYPE: &str = "prompt_request";

/// Client to server frame.
///
/// `args` are stringified by the sender; the transport never formats values itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelMessage {
    Log { args: Vec<String> },
    Error { args: Vec<String> },
    Warn { args: Vec<String> },
    Debug { args: Vec<String> },
    Stdout { data: String },
    Stderr { data: String },
    Structured { message: StructuredMessage },
}

impl TunnelMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::Warn { .. } => "warn",
            Self::Debug { .. } => "debug",
            Self::Stdout { .. } => "stdout",
            Self::Stderr { .. } => "stderr",
            Self::Structured { .. } => "structured",
        }
    }
}

/// Open-ended structured event. Only the `type` tag is validated by the transport;
/// every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StructuredMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn is_prompt_request(&self) -> bool {
        self.kind == PROMPT_REQUEST_TYPE
    }

    pub fn request_id(&self) -> Option<&str> {
        self.fields
            .get("requestId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Answer to a `prompt_request`. When both are present `error` wins over `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PromptResponse {
    pub fn value(request_id: impl Into<String>, value: Value) -> Self {
        Self {
            request_id: request_id.into(),
            value: Some(value),
            error: None,
        }
    }

    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            value: None,
            error: Some(error.into()),
        }
    }

    /// Collapse into the outcome a waiter sees.
    pub fn outcome(self) -> Result<Value, String> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.value.unwrap_or(Value::Null)),
        }
    }
}

/// Server to client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerTunnelMessage {
    PromptResponse(PromptResponse),
    UserInput { content: String },
}
