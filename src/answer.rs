//! Answer composition.
//!
//! Builds a grounded prompt from the retrieved chunks and calls the
//! configured language model once per query. No conversational state is
//! kept across queries; each answer depends only on the question and the
//! session's indexed content.
//!
//! Providers: `gemini` (Generative Language `generateContent`) and
//! `ollama` (`/api/generate`). Transient failures retry with backoff like
//! the embedding client; exhausted retries surface as
//! [`Error::ModelUnavailable`] and leave the session untouched so the
//! client can simply retry.

use std::time::Duration;

use crate::config::{LlmConfig, API_KEY_ENV};
use crate::error::{Error, Result};
use crate::models::{Answer, ScoredChunk};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Exact phrase the model is instructed to emit when the retrieved context
/// cannot answer the question.
pub const FALLBACK_PHRASE: &str =
    "The requested information is not available in the provided data.";

/// Built-in grounded prompt template. `{context}` and `{question}` are
/// substituted at query time; `llm.prompt_template` overrides the whole
/// template.
pub const DEFAULT_PROMPT_TEMPLATE: &str = r#"You are an expert data assistant. Answer the user's question using only the context below, which was extracted from an uploaded spreadsheet.
- The context contains structured rows rendered as "Header: value" lines.
- If calculations, comparisons, or summaries are necessary, clearly show the result and briefly explain the reasoning.
- Provide clear, concise, and relevant answers. Use bullet points or tables for lists or summaries if possible.
- If the user's question cannot be answered from the context, politely respond: "The requested information is not available in the provided data."
<context>
{context}
</context>
Question:
{question}
"#;

/// Join the retrieved chunk texts into the prompt context block, in
/// retrieval order.
pub fn build_context(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| c.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Substitute the context and question into the active template.
pub fn build_prompt(config: &LlmConfig, question: &str, chunks: &[ScoredChunk]) -> String {
    let template = config
        .prompt_template
        .as_deref()
        .unwrap_or(DEFAULT_PROMPT_TEMPLATE);
    template
        .replace("{context}", &build_context(chunks))
        .replace("{question}", question)
}

/// Compose the grounded prompt and call the configured model once.
pub async fn generate_answer(
    config: &LlmConfig,
    question: &str,
    context: Vec<ScoredChunk>,
) -> Result<Answer> {
    let prompt = build_prompt(config, question, &context);

    let text = match config.provider.as_str() {
        "gemini" => complete_gemini(config, &prompt).await?,
        "ollama" => complete_ollama(config, &prompt).await?,
        other => return Err(Error::Config(format!("unknown llm provider: {other}"))),
    };

    Ok(Answer { text, context })
}

// ============ Gemini provider ============

async fn complete_gemini(config: &LlmConfig, prompt: &str) -> Result<String> {
    let api_key = std::env::var(API_KEY_ENV)
        .map_err(|_| Error::ModelUnavailable(format!("{API_KEY_ENV} not set")))?;

    let base = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);
    let url = format!("{}/v1beta/models/{}:generateContent", base, config.model);

    let mut generation_config = serde_json::json!({ "temperature": config.temperature });
    if let Some(max_tokens) = config.max_tokens {
        generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
    }
    let body = serde_json::json!({
        "contents": [ { "parts": [ { "text": prompt } ] } ],
        "generationConfig": generation_config,
    });

    let json = post_with_retry(config, &url, &body, Some(&api_key)).await?;
    parse_gemini_response(&json)
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            Error::ModelUnavailable("invalid response: missing candidates".to_string())
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(Error::ModelUnavailable(
            "model returned an empty answer".to_string(),
        ));
    }
    Ok(text)
}

// ============ Ollama provider ============

async fn complete_ollama(config: &LlmConfig, prompt: &str) -> Result<String> {
    let base = config.url.as_deref().unwrap_or("http://localhost:11434");
    let url = format!("{base}/api/generate");

    let mut body = serde_json::json!({
        "model": config.model,
        "prompt": prompt,
        "stream": false,
        "options": { "temperature": config.temperature },
    });
    if let Some(max_tokens) = config.max_tokens {
        body["options"]["num_predict"] = serde_json::json!(max_tokens);
    }

    let json = post_with_retry(config, &url, &body, None).await?;
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::ModelUnavailable("invalid response: missing response field".to_string()))
}

// ============ HTTP plumbing ============

/// POST a JSON body to the model endpoint, retrying 429/5xx/network errors
/// with exponential backoff bounded by `llm.max_retries`. Other client
/// errors (bad request, bad credentials) fail immediately.
async fn post_with_retry(
    config: &LlmConfig,
    url: &str,
    body: &serde_json::Value,
    api_key: Option<&str>,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| Error::ModelUnavailable(e.to_string()))?;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = api_key {
            request = request.header("x-goog-api-key", key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| Error::ModelUnavailable(e.to_string()));
                }

                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("HTTP {status}: {text}"));
                    continue;
                }
                return Err(Error::ModelUnavailable(format!("HTTP {status}: {text}")));
            }
            Err(e) => {
                last_err = Some(e.to_string());
                continue;
            }
        }
    }

    Err(Error::ModelUnavailable(
        last_err.unwrap_or_else(|| "request failed after retries".to_string()),
    ))
}
