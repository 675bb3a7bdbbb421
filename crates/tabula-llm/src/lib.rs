use anyhow::{Result, anyhow};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::thread;
use std::time::Duration;
use tabula_core::{ChatMessage, ChatRequest, LlmConfig, LlmResponse, LlmToolCall, Provider};

/// Base delay for network/transport error retries (1s, 2s, 4s exponential backoff).
const NETWORK_RETRY_BASE_MS: u64 = 1000;

pub trait LlmClient {
    /// Chat completion, optionally with tool definitions (function calling).
    fn complete_chat(&self, req: &ChatRequest) -> Result<LlmResponse>;
}

impl<T: LlmClient + ?Sized> LlmClient for Box<T> {
    fn complete_chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        (**self).complete_chat(req)
    }
}

/// Where a request goes and how it authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    OpenAi { url: String, key: String },
    Azure { base: String, key: String },
}

impl Target {
    fn chat_url(&self, model: &str, api_version: &str) -> String {
        match self {
            Self::OpenAi { url, .. } => url.clone(),
            Self::Azure { base, .. } => format!(
                "{}/openai/deployments/{model}/chat/completions?api-version={api_version}",
                base.trim_end_matches('/')
            ),
        }
    }

    fn embeddings_url(&self, endpoint: &str, model: &str, api_version: &str) -> String {
        match self {
            Self::OpenAi { .. } => endpoint.to_string(),
            Self::Azure { base, .. } => format!(
                "{}/openai/deployments/{model}/embeddings?api-version={api_version}",
                base.trim_end_matches('/')
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatClient {
    cfg: LlmConfig,
    client: Client,
}

impl ChatClient {
    /// Every request made through this client is bounded by `llm.timeout_seconds`.
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds.max(1)))
            .build()?;
        Ok(Self { cfg, client })
    }

    fn resolve_target(&self) -> Result<Target> {
        let azure = || {
            let base = read_env(&self.cfg.azure_endpoint_env)?;
            let key = read_env(&self.cfg.azure_api_key_env)?;
            Some(Target::Azure { base, key })
        };
        let openai = || {
            let key = read_env(&self.cfg.api_key_env).or_else(|| {
                self.cfg
                    .api_key
                    .as_ref()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
            })?;
            Some(Target::OpenAi {
                url: self.cfg.endpoint.clone(),
                key,
            })
        };
        match self.cfg.provider {
            Provider::Azure => azure().ok_or_else(|| {
                anyhow!(
                    "llm.provider='azure' requires {} and {}",
                    self.cfg.azure_endpoint_env,
                    self.cfg.azure_api_key_env
                )
            }),
            Provider::OpenAi => openai().ok_or_else(|| {
                anyhow!("{} not set and llm.api_key is empty", self.cfg.api_key_env)
            }),
            Provider::Auto => azure().or_else(openai).ok_or_else(|| {
                anyhow!(
                    "no LLM credentials: export {} and {} for Azure OpenAI, or {} for OpenAI",
                    self.cfg.azure_endpoint_env,
                    self.cfg.azure_api_key_env,
                    self.cfg.api_key_env
                )
            }),
        }
    }

    fn build_chat_payload(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| match m {
                ChatMessage::System { content } => json!({"role": "system", "content": content}),
                ChatMessage::User { content } => json!({"role": "user", "content": content}),
            })
            .collect();

        let mut payload = json!({
            "model": req.model,
            "messages": messages,
        });
        if let Some(temperature) = req.temperature {
            payload["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = req.max_tokens {
            payload["max_tokens"] = json!(max_tokens);
        }
        if !req.tools.is_empty() {
            payload["tools"] = serde_json::to_value(&req.tools).unwrap_or(json!([]));
            payload["tool_choice"] =
                serde_json::to_value(&req.tool_choice).unwrap_or(json!("auto"));
        }
        payload
    }

    /// POST `payload` with bounded retries; returns the body of the first 2xx response.
    fn post_with_retries(&self, url: &str, target: &Target, payload: &Value) -> Result<String> {
        let mut last_err: Option<anyhow::Error> = None;
        let mut attempt: u8 = 0;
        while attempt <= self.cfg.max_retries {
            let request = self.client.post(url).json(payload);
            let request = match target {
                Target::OpenAi { key, .. } => request.bearer_auth(key),
                Target::Azure { key, .. } => request.header("api-key", key),
            };

            match request.send() {
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = retry_after_seconds(resp.headers().get(RETRY_AFTER));
                    let body = resp.text()?;
                    if status.is_success() {
                        return Ok(body);
                    }
                    last_err = Some(api_error(&self.cfg, status, &body, attempt.saturating_add(1)));
                    if should_retry_status(status) && attempt < self.cfg.max_retries {
                        tracing::debug!(status = status.as_u16(), attempt, "retrying chat request");
                        thread::sleep(retry_delay_ms(self.cfg.retry_base_ms, attempt, retry_after));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
                Err(e) => {
                    last_err = Some(transport_error(&self.cfg, url, &e));
                    if should_retry_transport_error(&e) && attempt < self.cfg.max_retries {
                        tracing::debug!(error = %e, attempt, "retrying after transport error");
                        thread::sleep(retry_delay_ms(NETWORK_RETRY_BASE_MS, attempt, None));
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    break;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("chat request failed")))
    }

    /// Embeds `inputs` with an OpenAI-compatible embeddings endpoint.
    pub fn embeddings(&self, endpoint: &str, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let target = self.resolve_target()?;
        let url = target.embeddings_url(endpoint, model, &self.cfg.azure_api_version);
        let payload = json!({"model": model, "input": inputs});
        let body = self.post_with_retries(&url, &target, &payload)?;
        parse_embeddings_payload(&body, inputs.len())
    }
}

impl LlmClient for ChatClient {
    fn complete_chat(&self, req: &ChatRequest) -> Result<LlmResponse> {
        let target = self.resolve_target()?;
        let url = target.chat_url(&req.model, &self.cfg.azure_api_version);
        let payload = self.build_chat_payload(req);
        let body = self.post_with_retries(&url, &target, &payload)?;
        parse_non_streaming_payload(&body)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Error for a non-2xx response, pointing at the tabula setting that usually fixes it.
fn api_error(cfg: &LlmConfig, status: StatusCode, body: &str, attempts: u8) -> anyhow::Error {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let err = v.get("error")?;
            err.get("message").unwrap_or(err).as_str().map(str::to_string)
        })
        .unwrap_or_else(|| body.chars().take(200).collect());
    let code = status.as_u16();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => anyhow!(
            "LLM provider rejected the credentials (HTTP {code}); export {} (or {} and {}) \
             or set llm.api_key in .tabula/settings.local.json: {detail}",
            cfg.api_key_env,
            cfg.azure_endpoint_env,
            cfg.azure_api_key_env
        ),
        StatusCode::NOT_FOUND => anyhow!(
            "LLM endpoint has no such model or deployment (HTTP 404); pass a deployed name \
             with `tabula run --model` or fix llm.endpoint: {detail}"
        ),
        StatusCode::TOO_MANY_REQUESTS => anyhow!(
            "LLM endpoint still rate limited after {attempts} attempt(s) (HTTP 429); \
             rerun later to resume pending items or raise llm.retry_base_ms: {detail}"
        ),
        _ if status.is_server_error() => anyhow!(
            "LLM endpoint failed on all {attempts} attempt(s) (HTTP {code}); \
             rerun later to resume pending items: {detail}"
        ),
        _ => anyhow!("LLM endpoint answered HTTP {code}: {detail}"),
    }
}

/// Error for a request that never got a response.
fn transport_error(cfg: &LlmConfig, url: &str, err: &reqwest::Error) -> anyhow::Error {
    let cause = err
        .source()
        .map(|e| e.to_string().to_ascii_lowercase())
        .unwrap_or_default();
    let unresolved = ["dns", "resolve", "name or service not known", "no such host", "getaddrinfo"]
        .iter()
        .any(|needle| cause.contains(needle));
    let host = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());

    if err.is_timeout() {
        anyhow!(
            "no answer from {host} within llm.timeout_seconds ({}s); raise it for large tables",
            cfg.timeout_seconds
        )
    } else if unresolved {
        anyhow!("cannot resolve LLM host {host}; check llm.endpoint or the Azure endpoint variable")
    } else if err.is_connect() {
        anyhow!("cannot connect to LLM host {host}: {err}")
    } else {
        anyhow!("request to {host} failed: {err}")
    }
}

fn should_retry_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::SERVICE_UNAVAILABLE
    )
}

fn should_retry_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// `Retry-After` as seconds from now; accepts both the delta and HTTP-date forms.
fn retry_after_seconds(header: Option<&reqwest::header::HeaderValue>) -> Option<u64> {
    let value = header?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT").map(|n| n.and_utc())
        })
        .ok()?;
    Some(at.signed_duration_since(Utc::now()).num_seconds().max(0) as u64)
}

fn retry_delay_ms(base_ms: u64, attempt: u8, retry_after_seconds: Option<u64>) -> Duration {
    if let Some(seconds) = retry_after_seconds {
        return Duration::from_millis(seconds.saturating_mul(1000));
    }
    let exponent = u32::from(attempt);
    let exponential = base_ms.saturating_mul(2_u64.saturating_pow(exponent));
    Duration::from_millis(exponential.max(base_ms.max(1)))
}

fn parse_non_streaming_payload(body: &str) -> Result<LlmResponse> {
    let value: Value = serde_json::from_str(body)?;
    let choice = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first());
    let Some(choice) = choice else {
        return Err(anyhow!("unexpected chat payload: missing choices[0]"));
    };
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();
    let message = choice.get("message").cloned().unwrap_or_else(|| json!({}));
    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let tool_calls = message
        .get("tool_calls")
        .map(tool_calls_from)
        .unwrap_or_default();
    if text.is_empty() && tool_calls.is_empty() {
        return Err(anyhow!(
            "unexpected chat payload: missing message.content/tool_calls"
        ));
    }
    Ok(LlmResponse {
        text,
        finish_reason,
        tool_calls,
    })
}

/// Function calls from `message.tool_calls`; entries without a function name are dropped.
fn tool_calls_from(value: &Value) -> Vec<LlmToolCall> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    let mut calls = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let function = item.get("function");
        let name = function
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim();
        if name.is_empty() {
            continue;
        }
        // Some providers send arguments as an object instead of a JSON string.
        let arguments = match function.and_then(|f| f.get("arguments")) {
            Some(Value::String(raw)) => raw.clone(),
            Some(other) => other.to_string(),
            None => "{}".to_string(),
        };
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map_or_else(|| format!("call_{}", idx + 1), str::to_string);
        calls.push(LlmToolCall {
            id,
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

fn parse_embeddings_payload(body: &str, expected: usize) -> Result<Vec<Vec<f32>>> {
    let value: Value = serde_json::from_str(body)?;
    let Some(items) = value.get("data").and_then(|v| v.as_array()) else {
        return Err(anyhow!("unexpected embeddings payload: missing data[]"));
    };
    let mut indexed = items
        .iter()
        .enumerate()
        .map(|(pos, item)| {
            let index = item
                .get("index")
                .and_then(|v| v.as_u64())
                .map_or(pos, |i| i as usize);
            let vector = item
                .get("embedding")
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow!("unexpected embeddings payload: missing embedding"))?
                .iter()
                .map(|x| x.as_f64().unwrap_or_default() as f32)
                .collect::<Vec<_>>();
            Ok((index, vector))
        })
        .collect::<Result<Vec<_>>>()?;
    if indexed.len() != expected {
        return Err(anyhow!(
            "embeddings payload returned {} vectors for {} inputs",
            indexed.len(),
            expected
        ));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}
