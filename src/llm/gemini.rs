use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::error::{AppError, Result};
use crate::llm::limiter::RateLimiter;
use crate::llm::Oracle;
use crate::pipeline::component::{Directive, GenerationKnobs, ImageBlob};
use crate::utils::http::get_http_client;
use crate::utils::timing::log_oracle_timing;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Run an operation under the shared rate limiter with exponential backoff.
/// A 429 skips straight to the maximum backoff; terminal errors (non-429
/// 4xx, validation) surface immediately.
pub async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    limiter: &RateLimiter,
    operation: F,
) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = retry.initial_backoff;
    let mut attempt = 0u32;

    loop {
        limiter.acquire().await;

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= retry.max_retries {
                    return Err(err);
                }
                let wait = if err.is_rate_limited() {
                    retry.max_backoff
                } else {
                    backoff
                };
                warn!(
                    "Oracle request failed (attempt {}/{}), retrying in {:.1}s: {err}",
                    attempt + 1,
                    retry.max_retries + 1,
                    wait.as_secs_f64()
                );
                tokio::time::sleep(wait).await;
                backoff = Duration::from_secs_f64(
                    (backoff.as_secs_f64() * retry.backoff_factor)
                        .min(retry.max_backoff.as_secs_f64()),
                );
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_error_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(message) = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .or_else(|| value.get("message").and_then(|v| v.as_str()))
        {
            return message.to_string();
        }
        return truncate_for_log(&value.to_string(), 2000);
    }

    truncate_for_log(trimmed, 2000)
}

fn inline_part(blob: &ImageBlob) -> Value {
    json!({
        "inlineData": {
            "mimeType": blob.mime,
            "data": general_purpose::STANDARD.encode(&blob.bytes),
        }
    })
}

fn knobs_config(knobs: &GenerationKnobs) -> Value {
    json!({
        "temperature": knobs.temperature,
        "topK": knobs.top_k,
        "topP": knobs.top_p,
    })
}

fn extract_text(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            for part in content.parts.unwrap_or_default() {
                if let GeminiPart::Text { text } = part {
                    if !text.trim().is_empty() {
                        text_parts.push(text);
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

/// First image part wins; a text-only response becomes a generation error
/// carrying the text (typically a policy refusal explanation).
fn extract_image(response: GeminiResponse) -> Result<ImageBlob> {
    let mut text_content = String::new();

    for candidate in response.candidates.unwrap_or_default() {
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if reason != "STOP" {
                debug!(target: "llm.gemini", finish_reason = reason);
            }
        }
        if let Some(content) = candidate.content {
            for part in content.parts.unwrap_or_default() {
                match part {
                    GeminiPart::InlineData { inline_data }
                        if inline_data.mime_type.starts_with("image/") =>
                    {
                        let bytes = general_purpose::STANDARD
                            .decode(inline_data.data)
                            .map_err(|err| {
                                AppError::Generation(format!("image decoding failed: {err}"))
                            })?;
                        return Ok(ImageBlob {
                            bytes,
                            mime: inline_data.mime_type,
                        });
                    }
                    GeminiPart::Text { text } => {
                        if text_content.is_empty() && !text.trim().is_empty() {
                            text_content = text;
                        }
                    }
                    GeminiPart::InlineData { .. } => {}
                }
            }
        }
    }

    if text_content.is_empty() {
        Err(AppError::Generation(
            "no image found in response".to_string(),
        ))
    } else {
        Err(AppError::Generation(format!(
            "no image found in response, received text instead: {}",
            truncate_for_log(&text_content, 500)
        )))
    }
}

pub struct GeminiClient {
    api_key: String,
    base_url: String,
    analysis_model: String,
    image_model: String,
    timeout: Duration,
    retry: RetryConfig,
    limiter: RateLimiter,
}

impl GeminiClient {
    pub fn from_config() -> Self {
        GeminiClient {
            api_key: CONFIG.gemini_api_key.clone(),
            base_url: CONFIG.api_base_url.clone(),
            analysis_model: CONFIG.gemini_model.clone(),
            image_model: CONFIG.gemini_image_model.clone(),
            timeout: Duration::from_secs(CONFIG.request_timeout_secs),
            retry: RetryConfig {
                max_retries: CONFIG.max_retries,
                ..RetryConfig::default()
            },
            limiter: RateLimiter::new(CONFIG.requests_per_second),
        }
    }

    async fn call_api(&self, model: &str, payload: &Value) -> Result<GeminiResponse> {
        let client = get_http_client();
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let response = client
            .post(url)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .await
            .map_err(AppError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = summarize_error_body(&body);
            warn!("Gemini API error: status={status}, detail={detail}");
            return Err(AppError::api(Some(status.as_u16()), detail));
        }

        response
            .json::<GeminiResponse>()
            .await
            .map_err(AppError::transport)
    }

    async fn send(&self, model: &str, payload: Value) -> Result<GeminiResponse> {
        with_retry(&self.retry, &self.limiter, |_attempt| {
            self.call_api(model, &payload)
        })
        .await
    }
}

#[async_trait]
impl Oracle for GeminiClient {
    async fn analyze(
        &self,
        image: &ImageBlob,
        prompt: &str,
        knobs: &GenerationKnobs,
    ) -> Result<String> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [inline_part(image), { "text": prompt }],
            }],
            "generationConfig": knobs_config(knobs),
        });

        log_oracle_timing(&self.analysis_model, "analyze", || async {
            let response = self.send(&self.analysis_model, payload).await?;
            let text = extract_text(response);
            if text.trim().is_empty() {
                return Err(AppError::analysis("no text response from API", None));
            }
            Ok(text)
        })
        .await
    }

    async fn generate(&self, directive: &Directive) -> Result<ImageBlob> {
        let mut parts = vec![inline_part(&directive.subject)];
        for companion in &directive.companions {
            parts.push(inline_part(companion));
        }
        parts.push(json!({ "text": directive.prose }));

        let mut generation_config = knobs_config(&directive.knobs);
        if let Some(map) = generation_config.as_object_mut() {
            map.insert("responseModalities".to_string(), json!(["TEXT", "IMAGE"]));
        }

        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        });

        log_oracle_timing(&self.image_model, "generate", || async {
            let response = self.send(&self.image_model, payload).await?;
            extract_image(response)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_bound_on_server_errors() {
        let retry = RetryConfig::default();
        let limiter = RateLimiter::new(100.0);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&retry, &limiter, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::api(Some(500), "server error")) }
        })
        .await;

        assert!(result.is_err());
        // MaxRetries + 1 outbound calls, no more.
        assert_eq!(calls.load(Ordering::SeqCst), retry.max_retries + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_client_error_is_not_retried() {
        let retry = RetryConfig::default();
        let limiter = RateLimiter::new(100.0);
        let calls = AtomicU32::new(0);

        let result: Result<()> = with_retry(&retry, &limiter, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::api(Some(403), "forbidden")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_jumps_to_max_backoff() {
        let retry = RetryConfig {
            max_retries: 1,
            ..RetryConfig::default()
        };
        let limiter = RateLimiter::new(100.0);
        let start = tokio::time::Instant::now();

        let result: Result<()> = with_retry(&retry, &limiter, |_| async {
            Err(AppError::api(Some(429), "too many requests"))
        })
        .await;

        assert!(result.is_err());
        assert!(start.elapsed() >= retry.max_backoff);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failure() {
        let retry = RetryConfig::default();
        let limiter = RateLimiter::new(100.0);
        let calls = AtomicU32::new(0);

        let result = with_retry(&retry, &limiter, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(AppError::api(Some(503), "unavailable"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn extracts_first_image_part() {
        let data = general_purpose::STANDARD.encode(b"fake-bytes");
        let raw = json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here you go" },
                        { "inlineData": { "mimeType": "image/png", "data": data } },
                    ]
                }
            }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        let blob = extract_image(response).unwrap();
        assert_eq!(blob.mime, "image/png");
        assert_eq!(blob.bytes, b"fake-bytes");
    }

    #[test]
    fn text_only_response_surfaces_payload() {
        let raw = json!({
            "candidates": [{
                "finishReason": "SAFETY",
                "content": { "parts": [{ "text": "cannot comply" }] }
            }]
        });
        let response: GeminiResponse = serde_json::from_value(raw).unwrap();
        let err = extract_image(response).unwrap_err();
        assert!(err.to_string().contains("cannot comply"));
    }

    #[test]
    fn error_body_summary_prefers_nested_message() {
        let body = r#"{"error": {"code": 400, "message": "invalid argument"}}"#;
        assert_eq!(summarize_error_body(body), "invalid argument");
        assert_eq!(summarize_error_body("   "), "empty response body");
    }
}
