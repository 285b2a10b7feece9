//! # Configuration
//!
//! All settings come from the environment. A `.env` file in the working directory is
//! loaded first by the binary (see `main.rs`), so either source works.
//!
//! | Variable | Default | Purpose |
//! |----------|---------|---------|
//! | `GEMINI_API_KEY` | *(none)* | Credential for the identification model. `VITE_GEMINI_API_KEY` is accepted too |
//! | `GEMINI_MODEL` | `gemini-1.5-flash` | Model name used in the request path |
//! | `GEMINI_BASE_URL` | `https://generativelanguage.googleapis.com` | API host |
//! | `GEMINI_TIMEOUT_SECS` | *(none)* | Optional request timeout |
//! | `CARD_SCANNER_DATABASE_URL` | `sqlite:database/collection.db` | Collection database |
//! | `CARD_SCANNER_CAMERA` | `/dev/video0` | Video device opened by `scan` |
//!
//! A missing API key is not a startup error: collection commands work without it and the
//! identification client reports it when a scan is attempted.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:database/collection.db";
pub const DEFAULT_CAMERA: &str = "/dev/video0";

const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "VITE_GEMINI_API_KEY"];

/// Settings for the identification model
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub gemini: GeminiConfig,
    pub database_url: String,
    pub camera_device: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|key| non_blank(*key))
            .map(|key| key.trim().to_string());

        let timeout = non_blank("GEMINI_TIMEOUT_SECS")
            .map(|raw| {
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("GEMINI_TIMEOUT_SECS must be a whole number of seconds, got '{raw}'"))
            })
            .transpose()?
            .map(Duration::from_secs);

        Ok(Self {
            gemini: GeminiConfig {
                api_key,
                model: non_blank("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
                base_url: non_blank("GEMINI_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                timeout,
            },
            database_url: non_blank("CARD_SCANNER_DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            camera_device: PathBuf::from(
                non_blank("CARD_SCANNER_CAMERA").unwrap_or_else(|| DEFAULT_CAMERA.to_string()),
            ),
        })
    }
}
