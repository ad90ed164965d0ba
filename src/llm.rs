/*
 * Tether - Minimal Sandboxed Tool Agent
 * File Path: src/llm.rs
 * Responsibility: Conversation model, planner abstraction and the Gemini planner
 */

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

static POOLED_CLIENT: Lazy<reqwest::Client> = Lazy::new(reqwest::Client::new);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Model,
    /// Tool results. Gemini receives these under the `user` role.
    Tool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub parts: Vec<MultimodalPart>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MultimodalPart::text(text)],
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct MultimodalPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<Value>,
    /// Opaque reasoning token some models attach to calls; must be echoed back.
    #[serde(rename = "thoughtSignature", skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

impl MultimodalPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn function_call(name: &str, args: Value) -> Self {
        Self {
            function_call: Some(json!({ "name": name, "args": args })),
            ..Self::default()
        }
    }

    pub fn function_response(name: &str, response: Value) -> Self {
        Self {
            function_response: Some(json!({ "name": name, "response": response })),
            ..Self::default()
        }
    }
}

/// A single function call the planner asked for.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub args: Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// What the planner produced for one round-trip.
#[derive(Debug, Clone)]
pub enum PlannerTurn {
    /// Free text with no tool calls: the run is finished.
    Final(String),
    /// One or more calls to execute, in order. `parts` is the raw planner turn
    /// to record in the conversation, including any interleaved text.
    ToolCalls {
        parts: Vec<MultimodalPart>,
        calls: Vec<ToolCallRequest>,
    },
    /// Neither text nor calls.
    Empty,
}

impl PlannerTurn {
    /// Classify the parts of a planner response.
    pub fn from_parts(parts: Vec<MultimodalPart>) -> Self {
        let calls: Vec<ToolCallRequest> = parts
            .iter()
            .filter_map(|part| part.function_call.as_ref())
            .map(|call| {
                ToolCallRequest::new(
                    call["name"].as_str().unwrap_or_default(),
                    call.get("args").cloned().unwrap_or_else(|| json!({})),
                )
            })
            .collect();

        if !calls.is_empty() {
            return PlannerTurn::ToolCalls { parts, calls };
        }

        let text = parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect::<String>();
        if text.trim().is_empty() {
            PlannerTurn::Empty
        } else {
            PlannerTurn::Final(text)
        }
    }
}

/// The external agent that decides which tools to call.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Send the whole conversation plus the declared tools, get the next turn back.
    async fn plan(&self, conversation: &[Message], tools: &Value) -> anyhow::Result<PlannerTurn>;
}

pub struct GeminiPlanner {
    api_key: String,
    model: String,
    system_prompt: String,
    base_url: String,
}

impl GeminiPlanner {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn build_payload(&self, conversation: &[Message], tools: &Value) -> Value {
        let contents: Vec<Value> = conversation
            .iter()
            .map(|msg| {
                let gemini_role = match msg.role {
                    MessageRole::User | MessageRole::Tool => "user",
                    MessageRole::Model => "model",
                };
                json!({
                    "role": gemini_role,
                    "parts": msg.parts
                })
            })
            .collect();

        json!({
            "systemInstruction": {
                "parts": [{ "text": self.system_prompt }]
            },
            "contents": contents,
            "tools": [{ "functionDeclarations": tools }]
        })
    }
}

#[async_trait]
impl Planner for GeminiPlanner {
    async fn plan(&self, conversation: &[Message], tools: &Value) -> anyhow::Result<PlannerTurn> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let payload = self.build_payload(conversation, tools);

        let response = POOLED_CLIENT
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Failed to reach Gemini (model: {})", self.model))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!(
                "Gemini API Error {} (Model: {}): {}",
                status,
                self.model,
                error_text
            ));
        }

        let res_json: Value = response.json().await.context("Gemini returned invalid JSON")?;
        parse_response(&res_json)
    }
}

/// Turn a `generateContent` response body into a planner turn.
pub(crate) fn parse_response(res_json: &Value) -> anyhow::Result<PlannerTurn> {
    let candidate = &res_json["candidates"][0];
    if candidate.is_null() {
        let reason = res_json["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates");
        return Err(anyhow!("Gemini returned no candidates: {}", reason));
    }

    let parts = match candidate["content"]["parts"].as_array() {
        Some(parts) => parts
            .iter()
            .map(|part| serde_json::from_value(part.clone()))
            .collect::<Result<Vec<MultimodalPart>, _>>()
            .context("Gemini returned malformed content parts")?,
        None => {
            let reason = candidate["finishReason"].as_str().unwrap_or("UNKNOWN");
            tracing::warn!(reason, "Gemini returned a candidate without content");
            Vec::new()
        }
    };

    Ok(PlannerTurn::from_parts(parts))
}
