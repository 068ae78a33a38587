//! LLM provider client for text-to-SQL completion.
//!
//! One request, one answer: retries, rate limiting and circuit breaking are
//! the resilience layer's job, so `complete` performs a single attempt and
//! reports failures precisely enough for the retry classifier.

use crate::config::LLMConfig;
use crate::error::{AppError, Result};
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Clone)]
pub struct LLMClient {
    client: Client,
    config: LLMConfig,
    provider: LLMProvider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LLMProvider {
    OpenAI,
    Anthropic,
    Ollama,
    AzureOpenAI,
    Gemini,
}

impl LLMProvider {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "openai" => Ok(LLMProvider::OpenAI),
            "anthropic" => Ok(LLMProvider::Anthropic),
            "ollama" => Ok(LLMProvider::Ollama),
            "azure" => Ok(LLMProvider::AzureOpenAI),
            "gemini" => Ok(LLMProvider::Gemini),
            other => Err(AppError::ConfigurationError(format!(
                "Unsupported LLM provider: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LLMProvider::OpenAI => "openai",
            LLMProvider::Anthropic => "anthropic",
            LLMProvider::Ollama => "ollama",
            LLMProvider::AzureOpenAI => "azure",
            LLMProvider::Gemini => "gemini",
        }
    }
}

/// Text completion returned by a provider.
#[derive(Debug, Clone)]
pub struct LlmCompletion {
    pub content: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// SQL pulled out of a completion, with any surrounding prose kept as the
/// explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlExtraction {
    pub sql: String,
    pub explanation: Option<String>,
}

impl LLMClient {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let provider = LLMProvider::from_name(&config.provider)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                AppError::InternalServerError(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            provider,
        })
    }

    pub fn provider(&self) -> LLMProvider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Single-attempt chat completion.
    pub async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<LlmCompletion> {
        if !self.config.has_credentials() {
            return Err(AppError::ConfigurationError(format!(
                "No API key configured for provider {}",
                self.provider.name()
            )));
        }

        debug!(provider = self.provider.name(), model = %self.config.model, "sending LLM request");

        let req_builder = self.build_request(system_prompt, user_prompt);
        let response = req_builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(match status.as_u16() {
                401 | 403 => AppError::AuthenticationError(format!(
                    "Provider rejected credentials ({}): {}",
                    status, error_text
                )),
                429 => AppError::RateLimitExceeded(format!(
                    "Provider rate limit (429): {}",
                    error_text
                )),
                500..=599 => {
                    AppError::LlmError(format!("Provider error {}: {}", status, error_text))
                }
                _ => AppError::ExternalServiceError(format!(
                    "Provider returned {}: {}",
                    status, error_text
                )),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::LlmError(format!("Failed to parse provider response: {}", e)))?;

        let content = self.extract_content(&body)?;
        let (prompt_tokens, completion_tokens) = extract_usage(self.provider, &body);

        Ok(LlmCompletion {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }

    /// Minimal round trip used by the health monitor.
    pub async fn health_check(&self) -> Result<()> {
        self.complete(
            "You are a health check responder.",
            "Respond with 'OK' if you can process this message.",
        )
        .await
        .map(|_| ())
    }

    fn build_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        match self.provider {
            LLMProvider::OpenAI => self.build_openai_request(system_prompt, user_prompt),
            LLMProvider::Anthropic => self.build_anthropic_request(system_prompt, user_prompt),
            LLMProvider::Ollama => self.build_ollama_request(system_prompt, user_prompt),
            LLMProvider::AzureOpenAI => self.build_azure_request(system_prompt, user_prompt),
            LLMProvider::Gemini => self.build_gemini_request(system_prompt, user_prompt),
        }
    }

    fn build_openai_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        self.client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn build_anthropic_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        let body = json!({
            "model": self.config.model,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        self.client
            .post(&self.config.api_url)
            .header("x-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .header("anthropic-version", "2023-06-01")
            .json(&body)
    }

    fn build_ollama_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "options": {
                "temperature": self.config.temperature,
                "num_predict": self.config.max_tokens,
            },
            "stream": false,
        });

        self.client
            .post(&self.config.api_url)
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn build_azure_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        let body = json!({
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        });

        self.client
            .post(&self.config.api_url)
            .header("api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn build_gemini_request(&self, system_prompt: &str, user_prompt: &str) -> RequestBuilder {
        let body = json!({
            "systemInstruction": {
                "parts": [{"text": system_prompt}]
            },
            "contents": [{
                "parts": [{"text": user_prompt}]
            }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            }
        });

        self.client
            .post(&self.config.api_url)
            .header("Content-Type", "application/json")
            .header("X-goog-api-key", &self.config.api_key)
            .json(&body)
    }

    fn extract_content(&self, body: &Value) -> Result<String> {
        extract_content_for(self.provider, body)
    }
}

/// Each provider wraps the generated text differently.
fn extract_content_for(provider: LLMProvider, body: &Value) -> Result<String> {
    let content = match provider {
        LLMProvider::OpenAI | LLMProvider::AzureOpenAI => body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str),
        LLMProvider::Anthropic => body.pointer("/content/0/text").and_then(Value::as_str),
        LLMProvider::Ollama => body.pointer("/message/content").and_then(Value::as_str),
        LLMProvider::Gemini => body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str),
    };

    content
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::LlmError("No content in provider response".to_string()))
}

fn extract_usage(provider: LLMProvider, body: &Value) -> (Option<u32>, Option<u32>) {
    let as_u32 = |v: &Value, pointer: &str| v.pointer(pointer).and_then(Value::as_u64).map(|n| n as u32);
    match provider {
        LLMProvider::OpenAI | LLMProvider::AzureOpenAI | LLMProvider::Ollama => (
            as_u32(body, "/usage/prompt_tokens"),
            as_u32(body, "/usage/completion_tokens"),
        ),
        LLMProvider::Anthropic => (
            as_u32(body, "/usage/input_tokens"),
            as_u32(body, "/usage/output_tokens"),
        ),
        LLMProvider::Gemini => (
            as_u32(body, "/usageMetadata/promptTokenCount"),
            as_u32(body, "/usageMetadata/candidatesTokenCount"),
        ),
    }
}

/// Pull the SQL statement out of a completion.
///
/// Accepts a fenced ```sql block, a plain fenced block that starts with
/// SELECT/WITH, or a bare statement in the prose. Text outside the statement
/// becomes the explanation.
pub fn extract_sql(content: &str) -> Result<SqlExtraction> {
    if let Some(extraction) = extract_fenced(content) {
        return Ok(extraction);
    }

    // No fence: find the first line that opens a SELECT and take lines until
    // a terminating semicolon or a blank line.
    let mut sql_lines: Vec<&str> = Vec::new();
    let mut prose_lines: Vec<&str> = Vec::new();
    let mut in_sql = false;
    let mut done = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if !in_sql && !done {
            let upper = trimmed.to_uppercase();
            if upper.starts_with("SELECT") || upper.starts_with("WITH") {
                in_sql = true;
                sql_lines.push(trimmed);
                if trimmed.ends_with(';') {
                    in_sql = false;
                    done = true;
                }
                continue;
            }
            prose_lines.push(trimmed);
        } else if in_sql {
            if trimmed.is_empty() {
                in_sql = false;
                done = true;
                continue;
            }
            sql_lines.push(trimmed);
            if trimmed.ends_with(';') {
                in_sql = false;
                done = true;
            }
        } else {
            prose_lines.push(trimmed);
        }
    }

    if sql_lines.is_empty() {
        return Err(AppError::ParseError(
            "Provider response contains no SQL statement".to_string(),
        ));
    }

    Ok(SqlExtraction {
        sql: sql_lines.join(" ").trim_end_matches(';').trim().to_string(),
        explanation: join_prose(&prose_lines),
    })
}

fn extract_fenced(content: &str) -> Option<SqlExtraction> {
    let mut search_from = 0;
    while let Some(rel_start) = content[search_from..].find("```") {
        let fence_start = search_from + rel_start;
        let after_ticks = &content[fence_start + 3..];
        let body_offset = after_ticks.find('\n')?;
        let lang = after_ticks[..body_offset].trim().to_lowercase();
        let body_start = fence_start + 3 + body_offset + 1;
        let rel_end = content[body_start..].find("```")?;
        let body = content[body_start..body_start + rel_end].trim();

        let looks_like_sql = lang == "sql"
            || (lang.is_empty()
                && (body.to_uppercase().starts_with("SELECT")
                    || body.to_uppercase().starts_with("WITH")));

        if looks_like_sql {
            let before = content[..fence_start].trim();
            let after = content[body_start + rel_end + 3..].trim();
            let prose: Vec<&str> = [before, after]
                .iter()
                .filter(|s| !s.is_empty())
                .copied()
                .collect();
            let sql = body
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            return Some(SqlExtraction {
                sql: sql.trim_end_matches(';').trim().to_string(),
                explanation: join_prose(&prose),
            });
        }

        search_from = body_start + rel_end + 3;
    }
    None
}

fn join_prose(lines: &[&str]) -> Option<String> {
    let text = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    // Strip a leading "Explanation:" label when the model uses one.
    let text = text
        .strip_prefix("Explanation:")
        .map(str::trim)
        .map(str::to_string)
        .unwrap_or(text);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
