//! Talks to an OpenAI-compatible reasoning oracle and validates its output.
//!
//! The oracle is untrusted and non-deterministic: every payload is forced
//! through a function/tool-call schema and re-validated here before any merge
//! component sees it. Transport failures map to `OracleUnavailable`,
//! unparsable or schema-invalid payloads to `OracleMalformed` — both leave
//! every ledger untouched.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::db::{Category, DiagnosisRecord, SolutionRecord};
use crate::error::EngineError;
use crate::merge::memory::RESERVED_MEMORY_PREFIX;
use crate::prompts;

fn transport_err(msg: impl Into<String>) -> EngineError {
    EngineError::OracleUnavailable(msg.into())
}

/// Bounded timeout on every oracle call; after this the pass is treated as
/// an oracle failure, never blocked indefinitely.
const ORACLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct OracleConfig {
    pub url: String,
    pub key: String,
    pub model: String,
    pub client: reqwest::Client,
    // Per-task model overrides (fall back to `model` if None)
    pub diagnosis_model: Option<String>,
    pub solution_model: Option<String>,
    pub memory_model: Option<String>,
    pub interview_model: Option<String>,
}

impl OracleConfig {
    pub fn model_for(&self, task: &str) -> &str {
        let m = match task {
            "diagnosis" => self.diagnosis_model.as_deref(),
            "solution" => self.solution_model.as_deref(),
            "memory" => self.memory_model.as_deref(),
            "interview" => self.interview_model.as_deref(),
            _ => None,
        };
        m.unwrap_or(&self.model)
    }

    /// Returns `None` if `ANAMNESIS_LLM_URL` is not set.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("ANAMNESIS_LLM_URL").ok()?;
        let key = std::env::var("ANAMNESIS_LLM_KEY").unwrap_or_default();
        let model =
            std::env::var("ANAMNESIS_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());

        let client = reqwest::Client::builder()
            .timeout(ORACLE_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");

        Some(Self {
            url,
            key,
            model,
            client,
            diagnosis_model: std::env::var("ANAMNESIS_DIAGNOSIS_MODEL").ok(),
            solution_model: std::env::var("ANAMNESIS_SOLUTION_MODEL").ok(),
            memory_model: std::env::var("ANAMNESIS_MEMORY_MODEL").ok(),
            interview_model: std::env::var("ANAMNESIS_INTERVIEW_MODEL").ok(),
        })
    }
}

/// One message of the conversation under analysis, as sent by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Render caller-supplied messages into the prompt transcript.
pub fn render_transcript(messages: &[ChatTurn]) -> String {
    let mut out = String::new();
    for turn in messages {
        use std::fmt::Write;
        let _ = writeln!(out, "{}: {}", turn.role, turn.content);
    }
    out
}

// --- typed oracle payloads -------------------------------------------------

/// A diagnosis proposed by the oracle, not yet merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosisCandidate {
    pub diagnosis: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    /// Back-reference to an existing record's display name, if the oracle
    /// believes this is the same entity reworded. May be absent or wrong.
    #[serde(default)]
    pub relates_to_existing: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosisBatch {
    #[serde(default)]
    pub diagnoses: Vec<DiagnosisCandidate>,
    /// When false (or absent from older prompt versions), the richer
    /// preserve-and-relate signal is missing and the merge falls back to a
    /// full ledger replace.
    #[serde(default)]
    pub preserve_existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionCandidate {
    pub solution: String,
    pub category: Category,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletenessJudgment {
    #[serde(default)]
    pub should_complete: bool,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub identified_topics_count: u32,
}

// --- OpenAI-compatible wire types ------------------------------------------

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ToolDef {
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionDef,
}

#[derive(Serialize)]
struct FunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

pub struct ToolCallResult<T> {
    pub value: T,
    pub usage: Option<Usage>,
    pub model: String,
    pub duration_ms: u64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFunction,
}

#[derive(Deserialize)]
struct ToolCallFunction {
    arguments: String,
}

/// Call the oracle with a function/tool definition, get back structured JSON.
/// Forces the model to call the named function, returns the parsed arguments.
pub async fn oracle_tool_call<T: serde::de::DeserializeOwned>(
    cfg: &OracleConfig,
    task: &str,
    system: &str,
    user: &str,
    fn_name: &str,
    fn_desc: &str,
    parameters: serde_json::Value,
) -> Result<ToolCallResult<T>, EngineError> {
    let model = cfg.model_for(task).to_string();
    let req = ChatRequest {
        model: model.clone(),
        messages: vec![
            ChatMessage { role: "system".into(), content: system.into() },
            ChatMessage { role: "user".into(), content: user.into() },
        ],
        temperature: 0.1,
        tools: Some(vec![ToolDef {
            tool_type: "function".into(),
            function: FunctionDef {
                name: fn_name.into(),
                description: fn_desc.into(),
                parameters,
            },
        }]),
        tool_choice: Some(serde_json::json!({"type": "function", "function": {"name": fn_name}})),
    };

    let mut builder = cfg.client.post(&cfg.url).json(&req);
    if !cfg.key.is_empty() {
        builder = builder.header("Authorization", format!("Bearer {}", cfg.key));
    }

    let start = std::time::Instant::now();
    let resp = builder
        .send()
        .await
        .map_err(|e| transport_err(format!("oracle request failed: {e}")))?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(transport_err(format!("oracle returned {status}: {body}")));
    }

    let chat: ChatResponse = resp
        .json()
        .await
        .map_err(|e| EngineError::OracleMalformed(format!("response parse failed: {e}")))?;
    let duration_ms = start.elapsed().as_millis() as u64;

    let args = chat
        .choices
        .first()
        .and_then(|c| c.message.tool_calls.as_ref())
        .and_then(|tc| tc.first())
        .map(|tc| tc.function.arguments.clone())
        .ok_or_else(|| EngineError::OracleMalformed("no tool call in response".into()))?;

    let value: T = serde_json::from_str(&args)
        .map_err(|e| EngineError::OracleMalformed(format!("tool arguments parse failed: {e}")))?;

    Ok(ToolCallResult { value, usage: chat.usage, model, duration_ms })
}

fn snapshot_block<T: Serialize>(label: &str, records: &[T]) -> String {
    if records.is_empty() {
        return format!("{label}: (none on record)\n");
    }
    let rendered = serde_json::to_string_pretty(records).unwrap_or_else(|_| "[]".into());
    format!("{label}:\n{rendered}\n")
}

/// Ask the oracle for diagnosis candidates given the transcript and the
/// current ledger snapshot.
pub async fn propose_diagnoses(
    cfg: &OracleConfig,
    transcript: &str,
    existing: &[DiagnosisRecord],
) -> Result<ToolCallResult<DiagnosisBatch>, EngineError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "diagnoses": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "diagnosis": {"type": "string"},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"},
                        "relates_to_existing": {"type": "string"}
                    },
                    "required": ["diagnosis", "confidence", "reasoning"]
                }
            },
            "preserve_existing": {
                "type": "boolean",
                "description": "true to refine the existing record, false to start over"
            }
        },
        "required": ["diagnoses", "preserve_existing"]
    });

    let user = format!(
        "{}\nConversation:\n{transcript}",
        snapshot_block("Diagnoses on record", existing)
    );

    let mut result = oracle_tool_call::<DiagnosisBatch>(
        cfg,
        "diagnosis",
        prompts::DIAGNOSIS_SYSTEM,
        &user,
        "report_diagnoses",
        "Report conditions suggested by the conversation",
        schema,
    )
    .await?;

    // Boundary validation: a nameless candidate is oracle noise, not data.
    let before = result.value.diagnoses.len();
    result.value.diagnoses.retain(|c| !c.diagnosis.trim().is_empty());
    if result.value.diagnoses.len() < before {
        warn!(dropped = before - result.value.diagnoses.len(), "dropped nameless diagnosis candidates");
    }
    debug!(count = result.value.diagnoses.len(), preserve = result.value.preserve_existing, "oracle proposed diagnoses");
    Ok(result)
}

#[derive(Deserialize)]
struct SolutionEnvelope {
    #[serde(default)]
    solutions: Vec<SolutionCandidate>,
}

/// Ask the oracle for solution candidates. Accepts both `{"solutions": [...]}`
/// and a bare array in the tool arguments — older prompt revisions produced
/// either shape.
pub async fn propose_solutions(
    cfg: &OracleConfig,
    transcript: &str,
    existing: &[SolutionRecord],
) -> Result<ToolCallResult<Vec<SolutionCandidate>>, EngineError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "solutions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "solution": {"type": "string"},
                        "category": {
                            "type": "string",
                            "enum": ["lifestyle", "stress", "sleep", "nutrition", "exercise", "mental_health"]
                        },
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["solution", "category", "confidence"]
                }
            }
        },
        "required": ["solutions"]
    });

    let user = format!(
        "{}\nConversation:\n{transcript}",
        snapshot_block("Suggestions on record", existing)
    );

    let result = oracle_tool_call::<serde_json::Value>(
        cfg,
        "solution",
        prompts::SOLUTION_SYSTEM,
        &user,
        "report_solutions",
        "Report practical suggestions for the patient",
        schema,
    )
    .await?;

    let raw = result.value;
    let candidates: Vec<SolutionCandidate> = if raw.is_array() {
        serde_json::from_value(raw)
            .map_err(|e| EngineError::OracleMalformed(format!("solution batch parse failed: {e}")))?
    } else {
        serde_json::from_value::<SolutionEnvelope>(raw)
            .map_err(|e| EngineError::OracleMalformed(format!("solution batch parse failed: {e}")))?
            .solutions
    };

    debug!(count = candidates.len(), "oracle proposed solutions");
    Ok(ToolCallResult {
        value: candidates,
        usage: result.usage,
        model: result.model,
        duration_ms: result.duration_ms,
    })
}

/// Ask the oracle for memory updates: an arbitrary JSON object of proposed
/// key/value pairs. Reserved-prefix keys are stripped here — the oracle must
/// never write into the image-confirmation namespace.
pub async fn propose_memory_updates(
    cfg: &OracleConfig,
    transcript: &str,
    existing: &serde_json::Map<String, serde_json::Value>,
) -> Result<ToolCallResult<serde_json::Map<String, serde_json::Value>>, EngineError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "updates": {
                "type": "object",
                "description": "New or changed fact keys. Empty object if nothing changed.",
                "additionalProperties": true
            }
        },
        "required": ["updates"]
    });

    #[derive(Deserialize)]
    struct MemoryProposal {
        #[serde(default)]
        updates: serde_json::Map<String, serde_json::Value>,
    }

    let current = serde_json::to_string_pretty(existing).unwrap_or_else(|_| "{}".into());
    let user = format!("Current memory:\n{current}\n\nConversation:\n{transcript}");

    let mut result = oracle_tool_call::<MemoryProposal>(
        cfg,
        "memory",
        prompts::MEMORY_SYSTEM,
        &user,
        "update_memory",
        "Propose key/value updates to the conversation memory",
        schema,
    )
    .await?;

    let reserved: Vec<String> = result
        .value
        .updates
        .keys()
        .filter(|k| k.starts_with(RESERVED_MEMORY_PREFIX))
        .cloned()
        .collect();
    for k in &reserved {
        warn!(key = %k, "oracle attempted to write a reserved memory key, dropping");
        result.value.updates.remove(k);
    }

    debug!(keys = result.value.updates.len(), "oracle proposed memory updates");
    Ok(ToolCallResult {
        value: result.value.updates,
        usage: result.usage,
        model: result.model,
        duration_ms: result.duration_ms,
    })
}

/// Ask the oracle whether the interview has gathered enough information.
pub async fn judge_completeness(
    cfg: &OracleConfig,
    transcript: &str,
) -> Result<ToolCallResult<CompletenessJudgment>, EngineError> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "should_complete": {"type": "boolean"},
            "confidence_score": {"type": "number"},
            "reasoning": {"type": "string"},
            "identified_topics_count": {"type": "integer"}
        },
        "required": ["should_complete", "confidence_score", "identified_topics_count"]
    });

    oracle_tool_call::<CompletenessJudgment>(
        cfg,
        "interview",
        prompts::COMPLETENESS_SYSTEM,
        transcript,
        "judge_completeness",
        "Judge whether the interview has gathered enough information",
        schema,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_rendering() {
        let msgs = vec![
            ChatTurn { role: "assistant".into(), content: "How long has this lasted?".into() },
            ChatTurn { role: "user".into(), content: "About two weeks".into() },
        ];
        let t = render_transcript(&msgs);
        assert_eq!(t, "assistant: How long has this lasted?\nuser: About two weeks\n");
    }

    #[test]
    fn diagnosis_batch_defaults() {
        // preserve_existing absent → false → full-replace fallback path
        let batch: DiagnosisBatch =
            serde_json::from_str(r#"{"diagnoses": [{"diagnosis": "Migraine"}]}"#).unwrap();
        assert!(!batch.preserve_existing);
        assert_eq!(batch.diagnoses[0].confidence, 0.0);
        assert!(batch.diagnoses[0].relates_to_existing.is_none());
    }

    #[test]
    fn solution_envelope_both_shapes() {
        let wrapped: SolutionEnvelope = serde_json::from_str(
            r#"{"solutions": [{"solution": "walk daily", "category": "exercise", "confidence": 0.5}]}"#,
        )
        .unwrap();
        assert_eq!(wrapped.solutions.len(), 1);

        let bare: Vec<SolutionCandidate> = serde_json::from_str(
            r#"[{"solution": "walk daily", "category": "exercise", "confidence": 0.5}]"#,
        )
        .unwrap();
        assert_eq!(bare.len(), 1);
    }

    #[test]
    fn invalid_category_is_a_parse_error() {
        let res: Result<SolutionCandidate, _> = serde_json::from_str(
            r#"{"solution": "x", "category": "surgery", "confidence": 0.5}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn completeness_judgment_defaults() {
        let j: CompletenessJudgment = serde_json::from_str("{}").unwrap();
        assert!(!j.should_complete);
        assert_eq!(j.identified_topics_count, 0);
    }
}
