//! # Gemini Card Identification
//!
//! This module sends a captured card photo to Google's Gemini `generateContent` REST endpoint
//! and turns the model's answer into an [`IdentificationResult`].
//!
//! ## Request
//!
//! Each request carries two parts:
//! - **Prompt**: the fixed instruction text in [`IDENTIFY_PROMPT`]
//! - **Image**: the snapshot as base64 `inline_data` with MIME type `image/jpeg`
//!
//! `generationConfig.responseMimeType` is set to `application/json`, but the answer is still
//! treated as untrusted text and goes through [`crate::normalize`].
//!
//! ## Error Handling
//!
//! - **Missing API key**: `IdentifyError::Configuration`, returned before any network I/O
//! - **Transport failures / non-2xx status / blocked prompts**: `IdentifyError::Upstream`
//! - **Unparseable answers**: `IdentifyError::Parse`
//!
//! Nothing is retried here; a retry is a new scan by the user.
//!
//! ## Environment Configuration
//!
//! See [`crate::config`]: `GEMINI_API_KEY`, `GEMINI_MODEL`, `GEMINI_BASE_URL` and
//! `GEMINI_TIMEOUT_SECS`.

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, info};

use crate::config::GeminiConfig;
use crate::error::IdentifyError;
use crate::models::{
    GeminiContent, GeminiPart, GenerateContentRequest, GenerateContentResponse, GenerationConfig,
    IdentificationResult, InlineData, Snapshot,
};
use crate::normalize;
use crate::traits::CardIdentifier;

/// Instruction sent with every photo
pub const IDENTIFY_PROMPT: &str = r#"
You are an expert in the One Piece Card Game. Identify the card in this image.

Instructions:
1. Analyze the visuals: look at the character, the scene, the colors and the art style. Identify the character name and the specific version of the card (Manga Rare, Alt Art or standard).
2. Locate the code: try to read the card code (e.g. OP01-001, ST01-001), usually printed at the bottom. If the code is unreadable or too small, rely entirely on the visual artwork to identify the card.
3. Market data: estimate the market price in USD for a raw, near mint copy.
4. Official image: provide a URL to a high-quality official image of the card.

Important: do NOT refuse because you cannot read the code. Make your best guess based on the artwork.

Return only a JSON object with the following keys:
- "name": string
- "set": string
- "code": string (the card ID; if unreadable, infer it from the artwork or return "Unknown")
- "rarity": string
- "price": number
- "image": string (URL)
- "description": string

If you absolutely cannot identify the character, only then use "Unknown" as the name.
"#;

/// HTTP client for the Gemini identification model
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, IdentifyError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| {
            IdentifyError::Configuration(format!("failed to create HTTP client: {e}"))
        })?;

        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set - card identification will be unavailable");
        }

        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self, api_key: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            urlencoding::encode(api_key)
        )
    }

    fn build_request(snapshot: &Snapshot) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart {
                        text: Some(IDENTIFY_PROMPT.to_string()),
                        inline_data: None,
                    },
                    GeminiPart {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type: Snapshot::MIME_TYPE.to_string(),
                            data: snapshot.to_base64(),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        }
    }

    async fn request_text(&self, api_key: &str, snapshot: &Snapshot) -> Result<String, IdentifyError> {
        let request = Self::build_request(snapshot);

        let response = self
            .client
            .post(self.endpoint(api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IdentifyError::Upstream {
                message: format!("model returned {status}: {}", body.trim()),
                source: None,
            });
        }

        let payload: GenerateContentResponse = response.json().await?;

        payload.text().ok_or_else(|| {
            let reason = payload
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.clone())
                .or_else(|| {
                    payload
                        .candidates
                        .first()
                        .and_then(|candidate| candidate.finish_reason.clone())
                })
                .unwrap_or_else(|| "no candidates".to_string());

            IdentifyError::Upstream {
                message: format!("model returned no text ({reason})"),
                source: None,
            }
        })
    }
}

#[async_trait]
impl CardIdentifier for GeminiClient {
    async fn identify(&self, snapshot: &Snapshot) -> Result<IdentificationResult, IdentifyError> {
        let api_key = self.config.api_key.as_deref().ok_or_else(|| {
            IdentifyError::Configuration(
                "Gemini API key is missing. Please add GEMINI_API_KEY to your .env file."
                    .to_string(),
            )
        })?;

        info!(
            model = %self.config.model,
            bytes = snapshot.jpeg.len(),
            "Sending snapshot for identification"
        );

        let result = match self.request_text(api_key, snapshot).await {
            Ok(text) => {
                debug!(raw = %text, "Gemini raw response");
                normalize::parse_identification(&text)
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(card) => info!(name = %card.name, code = %card.code, price = card.price, "Card identified"),
            Err(e) => error!(error = ?e, "Card identification failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mockito::{Matcher, Server};

    fn snapshot() -> Snapshot {
        Snapshot {
            jpeg: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 2,
            height: 2,
            captured_at: Utc::now(),
        }
    }

    fn client(base_url: String, api_key: Option<&str>) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: api_key.map(str::to_string),
            model: "gemini-test".to_string(),
            base_url,
            timeout: None,
        })
        .unwrap()
    }

    fn candidate_body(text: &str) -> String {
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn identifies_card_from_model_text() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1beta/models/gemini-test:generateContent")
            .match_query(Matcher::UrlEncoded("key".into(), "test key".into()))
            .match_body(Matcher::PartialJson(serde_json::json!({
                "contents": [{ "parts": [
                    { "text": IDENTIFY_PROMPT },
                    { "inline_data": { "mime_type": "image/jpeg", "data": "/9j/2Q==" } }
                ]}],
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(candidate_body(
                r#"{"Name":"Nico Robin","set":"OP01","code":"OP01-017","price":"$2.75"}"#,
            ))
            .create_async()
            .await;

        let result = client(server.url(), Some("test key"))
            .identify(&snapshot())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.name, "Nico Robin");
        assert_eq!(result.code, "OP01-017");
        assert_eq!(result.price, 2.75);
        assert_eq!(result.rarity, "Common");
        assert_eq!(result.description, "No description available.");
    }

    #[tokio::test]
    async fn fenced_model_text_is_accepted() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-test:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(candidate_body("```json\n{\"name\":\"Franky\",\"price\":4}\n```"))
            .create_async()
            .await;

        let result = client(server.url(), Some("k")).identify(&snapshot()).await.unwrap();
        assert_eq!(result.name, "Franky");
        assert_eq!(result.price, 4.0);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let err = client(server.url(), None).identify(&snapshot()).await.unwrap_err();

        assert!(matches!(err, IdentifyError::Configuration(_)));
        assert!(!err.is_retryable());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_error_is_upstream_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-test:generateContent")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = client(server.url(), Some("k")).identify(&snapshot()).await.unwrap_err();

        match &err {
            IdentifyError::Upstream { message, .. } => {
                assert!(message.contains("503"));
                assert!(message.contains("overloaded"));
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
        assert_eq!(
            err.user_message(),
            "Failed to identify card. Please try scanning again."
        );
    }

    #[tokio::test]
    async fn blocked_prompt_is_upstream_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-test:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create_async()
            .await;

        let err = client(server.url(), Some("k")).identify(&snapshot()).await.unwrap_err();
        match err {
            IdentifyError::Upstream { message, .. } => assert!(message.contains("SAFETY")),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn prose_answer_is_parse_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1beta/models/gemini-test:generateContent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(candidate_body("Sorry, that does not look like a card."))
            .create_async()
            .await;

        let err = client(server.url(), Some("k")).identify(&snapshot()).await.unwrap_err();
        assert!(matches!(err, IdentifyError::Parse { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_host_is_upstream_error() {
        let err = client("http://127.0.0.1:1".to_string(), Some("k"))
            .identify(&snapshot())
            .await
            .unwrap_err();

        assert!(matches!(err, IdentifyError::Upstream { source: Some(_), .. }));
    }
}
