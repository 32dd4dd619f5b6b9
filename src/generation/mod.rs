//! 답변 생성 모듈
//!
//! 인용 번호가 붙은 컨텍스트 프롬프트를 받아 자연어 답변을 돌려줍니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::gemini::{get_api_key, GeminiClient};

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

// ============================================================================
// AnswerGenerator Trait
// ============================================================================

/// 답변 생성기 트레이트
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// 프롬프트 → 답변 텍스트
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn model(&self) -> &str;
}

// ============================================================================
// Google Gemini Generator
// ============================================================================

/// Gemini `generateContent` 구현체
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: GeminiClient,
    model: String,
}

impl GeminiGenerator {
    pub fn new(api_key: String, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key)?,
            model: model.into(),
        })
    }

    /// 환경변수의 API 키로 생성
    pub fn from_env(model: Option<&str>) -> Result<Self> {
        Self::new(get_api_key()?, model.unwrap_or(DEFAULT_MODEL))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GenerateResponse {
    /// 첫 후보의 텍스트 (파트 연결)
    fn first_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let url = GeminiClient::endpoint(&self.model, "generateContent");
        let response: GenerateResponse = self
            .client
            .post_json(&url, &request)
            .await
            .context("Answer generation failed")?;

        response
            .first_text()
            .ok_or_else(|| anyhow::anyhow!("Gemini returned no candidates for {}", self.model))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================
