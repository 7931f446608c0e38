//! Embedding client.
//!
//! Maps chunk text to fixed-length vectors through one of three providers,
//! selected by `embedding.provider` in the configuration:
//!
//! - **`gemini`** — the Google Generative Language `batchEmbedContents`
//!   endpoint. Requires `GOOGLE_API_KEY`.
//! - **`ollama`** — a local Ollama instance's `/api/embed` endpoint.
//! - **`hash`** — deterministic token-hash vectors computed locally. Not
//!   semantically accurate, but content-dependent and stable, which makes it
//!   suitable for offline use and tests.
//!
//! Remote providers batch their inputs and retry transient failures
//! (HTTP 429, 5xx, network errors) with exponential backoff, bounded by
//! `embedding.max_retries`. Non-retryable client errors fail immediately.
//! Every failure surfaces as [`Error::EmbeddingUnavailable`]; chunks are
//! never silently dropped. Embedding the same text twice yields the same
//! vector, so retries at any level are idempotent.

use std::time::Duration;

use crate::config::{EmbeddingConfig, API_KEY_ENV};
use crate::error::{Error, Result};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Embed a batch of texts using the configured provider.
///
/// Returns one vector per input text, in input order.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    match config.provider.as_str() {
        "gemini" => embed_gemini(config, texts).await,
        "ollama" => embed_ollama(config, texts).await,
        "hash" => Ok(texts.iter().map(|t| hash_embedding(t, config.dims)).collect()),
        other => Err(Error::Config(format!("unknown embedding provider: {other}"))),
    }
}

/// Embed a single query text.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let texts = [text.to_string()];
    let vectors = embed_texts(config, &texts).await?;
    vectors
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".to_string()))
}

// ============ Gemini provider ============

async fn embed_gemini(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var(API_KEY_ENV)
        .map_err(|_| Error::EmbeddingUnavailable(format!("{API_KEY_ENV} not set")))?;

    let base = config.url.as_deref().unwrap_or(GEMINI_BASE_URL);
    let url = format!("{}/v1beta/models/{}:batchEmbedContents", base, config.model);

    let client = http_client(config.timeout_secs)?;
    let mut embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(config.batch_size) {
        let requests: Vec<serde_json::Value> = batch
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{}", config.model),
                    "content": { "parts": [ { "text": text } ] },
                })
            })
            .collect();
        let body = serde_json::json!({ "requests": requests });

        let json = post_with_retry(&client, &url, &body, Some(&api_key), config.max_retries)
            .await
            .map_err(Error::EmbeddingUnavailable)?;

        embeddings.extend(parse_gemini_response(&json)?);
    }

    if embeddings.len() != texts.len() {
        return Err(Error::EmbeddingUnavailable(format!(
            "provider returned {} embeddings for {} texts",
            embeddings.len(),
            texts.len()
        )));
    }

    Ok(embeddings)
}

fn parse_gemini_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let items = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::EmbeddingUnavailable("invalid response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        let values = item
            .get("values")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                Error::EmbeddingUnavailable("invalid response: missing values".to_string())
            })?;
        result.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(result)
}

// ============ Ollama provider ============

async fn embed_ollama(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let base = config.url.as_deref().unwrap_or("http://localhost:11434");
    let url = format!("{base}/api/embed");

    let client = http_client(config.timeout_secs)?;
    let mut embeddings = Vec::with_capacity(texts.len());

    for batch in texts.chunks(config.batch_size) {
        let body = serde_json::json!({
            "model": config.model,
            "input": batch,
        });

        let json = post_with_retry(&client, &url, &body, None, config.max_retries)
            .await
            .map_err(Error::EmbeddingUnavailable)?;

        embeddings.extend(parse_ollama_response(&json)?);
    }

    if embeddings.len() != texts.len() {
        return Err(Error::EmbeddingUnavailable(format!(
            "provider returned {} embeddings for {} texts",
            embeddings.len(),
            texts.len()
        )));
    }

    Ok(embeddings)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let items = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::EmbeddingUnavailable("invalid response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(items.len());
    for item in items {
        let values = item.as_array().ok_or_else(|| {
            Error::EmbeddingUnavailable("invalid response: embedding is not an array".to_string())
        })?;
        result.push(
            values
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(result)
}

// ============ Hash provider ============

/// Deterministic bag-of-tokens embedding: each token is folded into a
/// bucket index, bucket counts are accumulated, and the vector is
/// L2-normalized. Same text in, same vector out.
fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dims];

    for token in text.to_lowercase().split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_alphanumeric());
        if token.len() < 2 {
            continue;
        }
        let hash = token
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        vector[(hash as usize) % dims] += 1.0;
    }

    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

// ============ Shared HTTP plumbing ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))
}

/// POST a JSON body, retrying 429/5xx/network errors with exponential
/// backoff (1s, 2s, 4s, ... capped at 2^5). Other client errors fail
/// immediately. Returns the parsed JSON response or a description of the
/// final failure.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    api_key: Option<&str>,
    max_retries: u32,
) -> std::result::Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
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
                    return response.json().await.map_err(|e| e.to_string());
                }

                let text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("HTTP {status}: {text}"));
                    continue;
                }
                return Err(format!("HTTP {status}: {text}"));
            }
            Err(e) => {
                last_err = Some(e.to_string());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| "request failed after retries".to_string()))
}

/// Cosine similarity between two vectors, in `[-1.0, 1.0]`.
/// Returns `0.0` for empty vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
