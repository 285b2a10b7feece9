//! Data models for scanned cards, the persisted collection and Gemini payloads

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const UNKNOWN_NAME: &str = "Unknown";
pub const UNKNOWN_SET: &str = "Unknown Set";
pub const UNKNOWN_CODE: &str = "???";
pub const DEFAULT_RARITY: &str = "Common";
pub const NO_DESCRIPTION: &str = "No description available.";

/// A still JPEG frame grabbed from a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub const MIME_TYPE: &'static str = "image/jpeg";

    /// Base64 payload without any data URL prefix
    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.jpeg)
    }

    /// Displayable `data:` URL, kept on collection entries as a fallback image
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", Self::MIME_TYPE, self.to_base64())
    }
}

/// Normalized answer of one identification attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationResult {
    pub name: String,
    pub set: String,
    pub code: String,
    pub rarity: String,
    pub price: f64,
    pub image: String,
    pub description: String,
}

impl Default for IdentificationResult {
    fn default() -> Self {
        Self {
            name: UNKNOWN_NAME.to_string(),
            set: UNKNOWN_SET.to_string(),
            code: UNKNOWN_CODE.to_string(),
            rarity: DEFAULT_RARITY.to_string(),
            price: 0.0,
            image: String::new(),
            description: NO_DESCRIPTION.to_string(),
        }
    }
}

/// A confirmed card stored in the collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionEntry {
    pub id: String,
    pub card_code: String,
    pub name: String,
    pub set: String,
    pub rarity: String,
    pub price: f64,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_image_url: Option<String>,
    pub description: String,
    pub timestamp: i64,
}

impl CollectionEntry {
    /// Builds an entry from a confirmed result. The caller supplies the id and timestamp.
    pub fn from_result(
        id: String,
        result: &IdentificationResult,
        captured_image_url: Option<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id,
            card_code: result.code.clone(),
            name: result.name.clone(),
            set: result.set.clone(),
            rarity: result.rarity.clone(),
            price: result.price,
            image_url: result.image.clone(),
            captured_image_url,
            description: result.description.clone(),
            timestamp,
        }
    }

    /// Image to render: the canonical URL, falling back to the captured photo
    pub fn display_image(&self) -> Option<&str> {
        if self.image_url.trim().is_empty() {
            self.captured_image_url.as_deref()
        } else {
            Some(&self.image_url)
        }
    }
}

/// Ordering applied when reading the collection for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    #[default]
    Newest,
    Bounty,
    Set,
    Rarity,
}

impl SortOption {
    pub const ALL: [SortOption; 4] = [
        SortOption::Newest,
        SortOption::Bounty,
        SortOption::Set,
        SortOption::Rarity,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SortOption::Newest => "newest",
            SortOption::Bounty => "bounty",
            SortOption::Set => "set",
            SortOption::Rarity => "rarity",
        }
    }
}

impl fmt::Display for SortOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|option| option.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown sort option '{s}' (expected newest, bounty, set or rarity)"))
    }
}

/// Gemini `generateContent` request payload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// A single prompt or response part; either text or inline binary data
#[derive(Debug, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "inlineData")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InlineData {
    #[serde(alias = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_mime_type: String,
}

/// Gemini `generateContent` response payload, reduced to what we read
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate, if it produced any
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();

        if text.trim().is_empty() { None } else { Some(text) }
    }
}
