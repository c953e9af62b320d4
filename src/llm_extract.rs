// src/llm_extract.rs

use crate::config::{LlmBackend, LlmSection};
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Instructs the model to copy values verbatim and answer with JSON only.
const SYSTEM_PROMPT: &str = r#"You are a helpful assistant. Extract information EXACTLY as it appears in the provided text, without combining it with other unrelated text.
Return only a single valid JSON object with the shipping details, without any additional text, comments, or trailing content."#;

/// Field-by-field extraction rules for a Phytosanitary Certificate (P.Q.7).
const USER_PROMPT: &str = r#"Extract shipping details from the text below and return ONLY a valid JSON object with these fields:
- "receipt_number": The P.Q.7 receipt number
- "destination_country": Country/countries of destination as a single string
- "transportation_mode": Method of transport
- "total_weight": Total weight of shipment
- "number_of_boxes": Number of boxes/cartons as an integer
- "export_date": Date of exportation

EXTRACTION RULES:
1. receipt_number: the number with the format NP followed by digits (NP\d+).
2. destination_country: find the text near "City and country of destination".
   - Return a SINGLE STRING preserving the EXACT original format, including provinces and cities.
   - If multiple countries are listed, include them all in the same string.
   - Only correct misspelled country names (e.g. "CHNA" -> "CHINA").
   - The destination country is never Thailand.
   - Never include phrases like "IMPORT AND EXPORT TRADE".
3. transportation_mode: a phrase starting with "By" (e.g. "By Train", "By Truck", "By Truck and Railway").
4. number_of_boxes: a numeric value, possibly followed by the unit "CARTONS" or "cartons".
5. export_date: the date near the phrase "Date of exportation", in the middle or bottom part, formatted dd/mm/yyyy.
6. If you cannot find suitable information for a field, leave it empty. Never guess.

Return ONLY the JSON object without additional text, comments, or explanations.

TEXT TO PROCESS:
"#;

const SCHEMA_NAME: &str = "pq7_fields";

/// The LLM's first-pass guess for the six certificate fields.
///
/// Every key is required and unknown keys are rejected; `null` decodes as
/// empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pq7Fields {
    #[serde(deserialize_with = "null_as_empty")]
    pub receipt_number: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub destination_country: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub transportation_mode: String,
    #[serde(deserialize_with = "null_as_empty")]
    pub total_weight: String,
    #[serde(deserialize_with = "lenient_count")]
    pub number_of_boxes: u32,
    #[serde(deserialize_with = "null_as_empty")]
    pub export_date: String,
}

impl Pq7Fields {
    pub fn coverage(&self) -> (usize, usize) {
        let filled = [
            !self.receipt_number.is_empty(),
            !self.destination_country.is_empty(),
            !self.transportation_mode.is_empty(),
            !self.total_weight.is_empty(),
            self.number_of_boxes > 0,
            !self.export_date.is_empty(),
        ]
        .iter()
        .filter(|&&v| v)
        .count();
        (filled, 6)
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(i64),
    Float(f64),
    Text(String),
    Null,
}

/// Accepts `12`, `12.0`, `"1,200 CARTONS"` or `null`; negatives clamp to zero.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let n = match RawCount::deserialize(d)? {
        RawCount::Int(n) => n,
        RawCount::Float(f) => f as i64,
        RawCount::Text(s) => s
            .split(|c: char| !c.is_ascii_digit() && c != ',')
            .map(|part| part.replace(',', ""))
            .find(|digits| !digits.is_empty())
            .and_then(|digits| digits.parse::<i64>().ok())
            .unwrap_or(0),
        RawCount::Null => 0,
    };
    Ok(n.clamp(0, u32::MAX as i64) as u32)
}

/// JSON schema the completion service must enforce on its answer.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "receipt_number": { "type": "string" },
            "destination_country": { "type": "string" },
            "transportation_mode": { "type": "string" },
            "total_weight": { "type": "string" },
            "number_of_boxes": { "type": "integer" },
            "export_date": { "type": "string" }
        },
        "required": [
            "receipt_number",
            "destination_country",
            "transportation_mode",
            "total_weight",
            "number_of_boxes",
            "export_date"
        ],
        "additionalProperties": false
    })
}

/// A schema-constrained completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub schema_name: String,
    pub schema: Value,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Something that answers a prompt with a JSON value shaped by `schema`.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError>;
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builds the extraction prompt and decodes the service's answer.
pub struct LlmFieldExtractor {
    service: Arc<dyn CompletionService>,
    temperature: f64,
    max_tokens: u32,
    max_input_chars: usize,
}

impl LlmFieldExtractor {
    pub fn new(service: Arc<dyn CompletionService>, cfg: &LlmSection) -> Self {
        Self {
            service,
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            max_input_chars: cfg.max_input_chars,
        }
    }

    pub fn request_for(&self, document_text: &str) -> CompletionRequest {
        let text = truncate_chars(document_text, self.max_input_chars);
        if text.len() < document_text.len() {
            warn!(
                chars = self.max_input_chars,
                "OCR text truncated before prompting"
            );
        }

        CompletionRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: format!("{USER_PROMPT}{text}"),
            schema_name: SCHEMA_NAME.to_string(),
            schema: response_schema(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub async fn extract(&self, document_text: &str) -> Result<Pq7Fields, LlmError> {
        let request = self.request_for(document_text);
        let value = self.service.complete(&request).await?;
        decode_fields(value)
    }
}

/// Validate a completion value against the field schema.
pub fn decode_fields(value: Value) -> Result<Pq7Fields, LlmError> {
    if !value.is_object() {
        return Err(LlmError::Schema(format!("expected a JSON object, got {value}")));
    }
    serde_json::from_value(value).map_err(|e| LlmError::Schema(e.to_string()))
}

/// Extract the outermost JSON object from a string that may contain
/// surrounding text (e.g. thinking tokens from qwen3).
fn extract_json_object(s: &str) -> Result<&str, LlmError> {
    let start = s
        .find('{')
        .ok_or_else(|| LlmError::Schema("no '{' found in LLM response".into()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| LlmError::Schema("no '}' found in LLM response".into()))?;
    if end <= start {
        return Err(LlmError::Schema("malformed JSON in LLM response".into()));
    }
    Ok(&s[start..=end])
}

/// Parse message content, tolerating fences and leading reasoning text
/// from servers that ignore `response_format`.
pub fn parse_json_content(content: &str) -> Result<Value, LlmError> {
    if let Ok(value) = serde_json::from_str::<Value>(content.trim()) {
        return Ok(value);
    }

    let stripped = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json_str = extract_json_object(stripped)?;

    serde_json::from_str(json_str)
        .map_err(|e| LlmError::Schema(format!("failed to parse LLM response: {e}\nRaw: {json_str}")))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat<'a>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'a str,
    strict: bool,
    schema: &'a Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Resolved endpoint configuration ready to make API calls.
struct ResolvedEndpoint {
    base_url: String,
    model: String,
    api_key: String,
}

/// Resolve the LLM config section into a concrete endpoint.
fn resolve_endpoint(llm: &LlmSection) -> Result<ResolvedEndpoint, LlmError> {
    let endpoint = llm.endpoint();
    let api_key = match llm.backend {
        // required by the API shape but ignored by Ollama
        LlmBackend::Ollama => "ollama".to_string(),
        LlmBackend::Remote => std::env::var("LLM_API_KEY")
            .map_err(|_| LlmError::Unavailable("LLM_API_KEY env var required for remote backend".into()))?,
    };
    info!(
        backend = ?llm.backend,
        url = %endpoint.base_url,
        model = %endpoint.model,
        "Resolved completion endpoint"
    );
    Ok(ResolvedEndpoint {
        base_url: endpoint.base_url.trim_end_matches('/').to_string(),
        model: endpoint.model.clone(),
        api_key,
    })
}

/// Check if the Ollama server is reachable.
async fn check_ollama_health(client: &Client, base_url: &str) -> bool {
    // Ollama's health endpoint is at the root (not under /v1)
    let health_url = base_url.trim_end_matches('/').trim_end_matches("/v1");

    match client
        .get(health_url)
        .timeout(Duration::from_secs(3))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => {
            info!("Ollama server is reachable");
            true
        }
        Ok(resp) => {
            warn!(status = %resp.status(), "Ollama server returned non-OK status");
            false
        }
        Err(e) => {
            warn!(error = %e, "Ollama server not reachable");
            false
        }
    }
}

/// `CompletionService` backed by an OpenAI-compatible `/chat/completions`
/// endpoint with `json_schema` structured output.
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: ResolvedEndpoint,
    timeout_secs: u64,
}

impl OpenAiCompatClient {
    /// Build the shared client. For the Ollama backend the server must be up.
    pub async fn connect(cfg: &LlmSection) -> Result<Self, LlmError> {
        let endpoint = resolve_endpoint(cfg)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        if cfg.backend == LlmBackend::Ollama && !check_ollama_health(&client, &endpoint.base_url).await {
            return Err(LlmError::Unavailable(format!(
                "Ollama is not running at {}. Start it with: ollama serve",
                endpoint.base_url
            )));
        }

        Ok(Self {
            client,
            endpoint,
            timeout_secs: cfg.timeout_secs,
        })
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Value, LlmError> {
        let body = ChatRequest {
            model: &self.endpoint.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: &request.schema_name,
                    strict: true,
                    schema: &request.schema,
                },
            },
        };

        let url = format!("{}/chat/completions", self.endpoint.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.endpoint.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Schema(format!("unexpected completion envelope: {e}")))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        debug!(chars = content.len(), "Completion received");
        parse_json_content(&content)
    }
}
