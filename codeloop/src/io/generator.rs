//! Code generation adapter over an OpenAI-compatible chat-completions API.
//!
//! The [`CodeGenerator`] trait decouples the engine from the model backend.
//! Tests use scripted generators that return predetermined payloads without
//! any network traffic.

use std::time::Duration;

use anyhow::{Context, Result};
use jsonschema::Draft;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::extract::{CodeExtractor, FencedBlockExtractor};
use crate::core::task::AttemptRecord;
use crate::core::types::{GeneratedCode, GenerationFailure};
use crate::io::config::GeneratorConfig;
use crate::io::prompt;
use crate::io::snippet;

const GENERATED_CODE_SCHEMA: &str = include_str!("schemas/generated_code.schema.json");
const TOOL_NAME: &str = "generated_code";

/// Inputs for one generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest<'a> {
    /// Effective instruction (refined when refinement succeeded).
    pub instruction: &'a str,
    /// Prior attempts for this task, oldest first.
    pub history: &'a [AttemptRecord],
    /// Most recent failure text to correct, if any.
    pub feedback: Option<&'a str>,
}

/// Abstraction over code generation backends.
///
/// Implementations keep no state between calls; each call is a pure
/// request-response exchange with the backing service.
pub trait CodeGenerator {
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<GeneratedCode, GenerationFailure>;

    /// Rewrite the raw instruction into a richer prompt. Best-effort; the
    /// default keeps the instruction unchanged.
    fn refine(&self, instruction: &str) -> Result<String, GenerationFailure> {
        Ok(instruction.to_string())
    }
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint.
///
/// Structured output is obtained by forcing a single `generated_code` tool
/// call whose arguments must satisfy the bundled JSON Schema; the payload is
/// then cleaned through the configured [`CodeExtractor`].
pub struct OpenAiGenerator {
    http: reqwest::blocking::Client,
    config: GeneratorConfig,
    model: String,
    extractor: Box<dyn CodeExtractor>,
    schema_json: Value,
    schema: jsonschema::Validator,
}

impl OpenAiGenerator {
    pub fn new(model: impl Into<String>, config: GeneratorConfig) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("build http client")?;
        let schema_json: Value =
            serde_json::from_str(GENERATED_CODE_SCHEMA).context("parse generated_code schema")?;
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema_json)
            .context("compile generated_code schema")?;
        Ok(Self {
            http,
            config,
            model: model.into(),
            extractor: Box::new(FencedBlockExtractor),
            schema_json,
            schema,
        })
    }

    /// Replace the payload-cleaning convention.
    pub fn with_extractor(mut self, extractor: Box<dyn CodeExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    fn send(&self, body: &ChatRequest<'_>) -> Result<ChatResponse, GenerationFailure> {
        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let mut request = self.http.post(url).json(body);
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request
            .send()
            .map_err(|err| GenerationFailure::ServiceUnavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(GenerationFailure::ServiceUnavailable(format!(
                "model service returned {status}: {}",
                snippet(&text, 500)
            )));
        }
        response.json::<ChatResponse>().map_err(|err| {
            GenerationFailure::MalformedResponse(format!("undecodable completion response: {err}"))
        })
    }

    fn validate_payload(&self, payload: &Value) -> Result<(), GenerationFailure> {
        let messages: Vec<String> = self
            .schema
            .iter_errors(payload)
            .map(|err| err.to_string())
            .collect();
        if messages.is_empty() {
            Ok(())
        } else {
            Err(GenerationFailure::MalformedResponse(format!(
                "tool arguments violate the generated_code schema: {}",
                messages.join("; ")
            )))
        }
    }

    fn clean(&self, raw: GeneratedCode) -> Result<GeneratedCode, GenerationFailure> {
        let imports = self.extractor.clean(&raw.imports);
        let code = self
            .extractor
            .extract(&raw.code)
            .map_err(|err| GenerationFailure::NoExtractableCode(err.to_string()))?;
        Ok(GeneratedCode {
            task_description: raw.task_description,
            imports,
            code,
        })
    }
}

impl CodeGenerator for OpenAiGenerator {
    #[instrument(skip_all, fields(model = %self.model, prior_attempts = request.history.len()))]
    fn generate(&self, request: &GenerateRequest<'_>) -> Result<GeneratedCode, GenerationFailure> {
        let user = prompt::render_generation(request.instruction, request.history, request.feedback);

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::GENERATION_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            tools: Some(vec![Tool {
                r#type: "function",
                function: ToolFunction {
                    name: TOOL_NAME,
                    description: "A complete Python solution split into imports and executable body.",
                    parameters: &self.schema_json,
                },
            }]),
            tool_choice: Some(serde_json::json!({
                "type": "function",
                "function": { "name": TOOL_NAME }
            })),
        };

        let response = self.send(&body)?;
        let payload = extract_tool_arguments(&response)?;
        self.validate_payload(&payload)?;
        let parsed: GeneratedCode = serde_json::from_value(payload).map_err(|err| {
            GenerationFailure::MalformedResponse(format!("undecodable tool arguments: {err}"))
        })?;
        let cleaned = self.clean(parsed)?;
        debug!(code_bytes = cleaned.code.len(), "generation produced code");
        Ok(cleaned)
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn refine(&self, instruction: &str) -> Result<String, GenerationFailure> {
        let user = prompt::render_refinement(instruction);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: prompt::REFINEMENT_SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
            tools: None,
            tool_choice: None,
        };

        let response = self.send(&body)?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|content| !content.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                GenerationFailure::MalformedResponse(
                    "refinement response carried no content".to_string(),
                )
            })
    }
}

fn extract_tool_arguments(response: &ChatResponse) -> Result<Value, GenerationFailure> {
    let message = response
        .choices
        .first()
        .map(|choice| &choice.message)
        .ok_or_else(|| {
            GenerationFailure::MalformedResponse("completion had no choices".to_string())
        })?;
    let call = message
        .tool_calls
        .as_ref()
        .and_then(|calls| calls.first())
        .ok_or_else(|| {
            GenerationFailure::MalformedResponse(format!(
                "the model did not call the {TOOL_NAME} tool"
            ))
        })?;
    if call.function.name != TOOL_NAME {
        return Err(GenerationFailure::MalformedResponse(format!(
            "unexpected tool call {}",
            call.function.name
        )));
    }
    serde_json::from_str(&call.function.arguments).map_err(|err| {
        GenerationFailure::MalformedResponse(format!("tool arguments are not valid JSON: {err}"))
    })
}

// Wire types for the chat-completions API.

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Tool<'a>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
    r#type: &'a str,
    function: ToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::GeneratorConfig;

    fn generator() -> OpenAiGenerator {
        OpenAiGenerator::new("test-model", GeneratorConfig::default()).expect("generator")
    }

    fn completion_with_arguments(arguments: &str) -> ChatResponse {
        ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: None,
                    tool_calls: Some(vec![ToolCall {
                        function: FunctionCall {
                            name: TOOL_NAME.to_string(),
                            arguments: arguments.to_string(),
                        },
                    }]),
                },
            }],
        }
    }

    #[test]
    fn parses_a_canned_completion_body() {
        let body = r#"{
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "generated_code",
                            "arguments": "{\"task_description\":\"t\",\"imports\":\"\",\"code\":\"print(1)\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        }"#;
        let response: ChatResponse = serde_json::from_str(body).expect("parse");
        let payload = extract_tool_arguments(&response).expect("arguments");
        assert_eq!(payload["code"], "print(1)");
    }

    #[test]
    fn missing_tool_call_is_a_malformed_response() {
        let response = ChatResponse {
            choices: vec![Choice {
                message: ResponseMessage {
                    content: Some("I cannot help with that.".to_string()),
                    tool_calls: None,
                },
            }],
        };
        assert!(matches!(
            extract_tool_arguments(&response),
            Err(GenerationFailure::MalformedResponse(_))
        ));
    }

    #[test]
    fn schema_rejects_payloads_missing_required_fields() {
        let generator = generator();
        let payload: Value =
            serde_json::from_str(r#"{"task_description": "t", "imports": ""}"#).expect("json");
        assert!(matches!(
            generator.validate_payload(&payload),
            Err(GenerationFailure::MalformedResponse(_))
        ));
    }

    #[test]
    fn schema_accepts_a_complete_payload() {
        let generator = generator();
        let payload: Value = serde_json::from_str(
            r#"{"task_description": "t", "imports": "import os", "code": "print(os.name)"}"#,
        )
        .expect("json");
        generator.validate_payload(&payload).expect("valid");
    }

    #[test]
    fn clean_strips_fences_and_rejects_empty_code() {
        let generator = generator();
        let cleaned = generator
            .clean(GeneratedCode {
                task_description: "t".to_string(),
                imports: "```python\nimport os\n```".to_string(),
                code: "```python\nprint(os.name)\n```".to_string(),
            })
            .expect("clean");
        assert_eq!(cleaned.imports, "import os");
        assert_eq!(cleaned.code, "print(os.name)");

        let empty = generator.clean(GeneratedCode {
            task_description: "t".to_string(),
            imports: String::new(),
            code: "```python\n```".to_string(),
        });
        assert!(matches!(
            empty,
            Err(GenerationFailure::NoExtractableCode(_))
        ));
    }

    #[test]
    fn tool_arguments_must_be_valid_json() {
        let response = completion_with_arguments("not json");
        assert!(matches!(
            extract_tool_arguments(&response),
            Err(GenerationFailure::MalformedResponse(_))
        ));
    }
}
