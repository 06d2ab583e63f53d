//! Speech-intent recognition
//!
//! A [`Recognizer`] turns one captured utterance (48 kHz mono s16le) into
//! text plus scored intents. [`HttpRecognizer`] posts the raw audio to a
//! Wit-style `speech` endpoint.

use crate::error::{Error, Result};
use async_trait::async_trait;
use ditty_common::config::RecognizerConfig;
use serde::{Deserialize, Serialize};

const USER_AGENT: &str = concat!("ditty-radio/", env!("CARGO_PKG_VERSION"));
const SPEECH_CONTENT_TYPE: &str =
    "audio/raw;encoding=signed-integer;bits=16;rate=48000;endian=little";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Recognizer output for one utterance
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Recognition {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub intents: Vec<Intent>,
}

impl Recognition {
    pub fn from_text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            intents: Vec::new(),
        }
    }

    /// Highest-confidence intent
    pub fn top_intent(&self) -> Option<&Intent> {
        self.intents
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    /// None means the recognizer produced no usable result
    async fn recognize(&self, pcm: Vec<u8>) -> Result<Option<Recognition>>;
}

pub struct HttpRecognizer {
    http_client: reqwest::Client,
    url: String,
    api_token: String,
}

impl HttpRecognizer {
    pub fn new(config: &RecognizerConfig) -> Result<Self> {
        let api_token = config
            .api_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| Error::Config("Recognizer API token is not set".to_string()))?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.timeout())
            .build()?;
        Ok(Self {
            http_client,
            url: speech_url(&config.endpoint, &config.api_version),
            api_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// `<endpoint>/speech?v=<version>`
pub fn speech_url(endpoint: &str, version: &str) -> String {
    format!("{}/speech?v={}", endpoint.trim_end_matches('/'), version)
}

/// Parse a recognizer response body
///
/// Streaming endpoints send several JSON objects back to back; the last one
/// carries the final transcription.
pub fn parse_response(body: &str) -> Result<Option<Recognition>> {
    let mut last = None;
    for value in serde_json::Deserializer::from_str(body).into_iter::<Recognition>() {
        let recognition =
            value.map_err(|e| Error::Recognition(format!("Malformed response: {}", e)))?;
        last = Some(recognition);
    }
    Ok(last)
}

#[async_trait]
impl Recognizer for HttpRecognizer {
    async fn recognize(&self, pcm: Vec<u8>) -> Result<Option<Recognition>> {
        if pcm.is_empty() {
            return Ok(None);
        }
        tracing::debug!(bytes = pcm.len(), "Sending utterance to recognizer");

        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.api_token)
            .header(reqwest::header::CONTENT_TYPE, SPEECH_CONTENT_TYPE)
            .body(pcm)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Recognition(format!(
                "Recognizer returned {}: {}",
                status.as_u16(),
                body
            )));
        }

        let recognition = parse_response(&body)?;
        tracing::debug!(text = ?recognition.as_ref().and_then(|r| r.text.as_deref()), "Recognized utterance");
        Ok(recognition)
    }
}
