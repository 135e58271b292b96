// src/llm.rs
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single-turn completion; empty output is an error.
    async fn generate(&self, prompt: &str) -> AppResult<String>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .next()?
        .content?
        .parts
        .into_iter()
        .next()?
        .text
        .filter(|t| !t.trim().is_empty())
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl GeminiClient {
    pub fn new(http: Client, api_key: Option<String>, model: &str) -> Self {
        GeminiClient {
            http,
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> AppResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AppError::Upstream("Gemini API key is not configured".to_string()))?;

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
        };

        let response = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Upstream(format!(
                "Gemini request failed: HTTP {}",
                status
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        debug!("Gemini returned {} candidates", parsed.candidates.len());
        first_text(parsed)
            .ok_or_else(|| AppError::Upstream("Gemini returned no text".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn takes_the_first_text_part() {
        let response = parse(json!({
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "Hello"}, {"text": "ignored"}]}},
                {"content": {"parts": [{"text": "second"}]}}
            ]
        }));
        assert_eq!(first_text(response), Some("Hello".to_string()));
    }

    #[test]
    fn missing_or_blank_text_yields_none() {
        assert_eq!(first_text(parse(json!({}))), None);
        assert_eq!(
            first_text(parse(json!({"candidates": [{"finishReason": "SAFETY"}]}))),
            None
        );
        assert_eq!(
            first_text(parse(json!({"candidates": [{"content": {"parts": [{"text": "  "}]}}]}))),
            None
        );
    }

    #[test]
    fn request_body_matches_the_api_shape() {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: "hi" }],
            }],
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"contents": [{"role": "user", "parts": [{"text": "hi"}]}]})
        );
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let client = GeminiClient::new(Client::new(), None, "gemini-2.5-flash-lite");
        assert!(client.generate("hi").await.is_err());
    }
}
