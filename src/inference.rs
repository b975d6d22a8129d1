/// Remote obstacle analysis
///
/// One still image in, one short verdict string out. Every call is a single
/// attempt against the `generateContent` endpoint with no session state and a
/// credential re-read from the environment, so a rotated key takes effect on
/// the very next cycle. Retry is the loop controller's job, on its own
/// cadence.

use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::camera::Frame;

/// Detection rules plus the strict output contract the classifier depends on
const SYSTEM_INSTRUCTION: &str = "\
Rôle: Cerveau IA pour aveugles.
Action: Analyse obstacle central.
Réponse courte:
- Si danger imminent (mur, poteau, trou, personne proche): \"{Objet} droit devant !\"
- Sinon, réponds exactement: \"RAS\"
";

/// Upper bound on one inference round trip; a hung request must not stall the
/// loop for longer than a few cadences
const REQUEST_TIMEOUT_SECS: u64 = 20;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Not transient: the loop surfaces this instead of retrying silently
    #[error("missing API key: set the {0} environment variable")]
    MissingApiKey(String),

    #[error("inference endpoint rejected the credential")]
    Auth,

    #[error("inference quota exhausted")]
    Quota,

    #[error("inference transport failure: {0}")]
    Transport(String),

    #[error("unexpected inference response: {0}")]
    MalformedResponse(String),
}

/// Seam between the analysis loop and the remote model
pub trait Analyzer {
    fn analyze(&self, frame: &Frame) -> Result<String, AnalysisError>;
}

/// Client for the Gemini `generateContent` REST endpoint
pub struct GeminiClient {
    http: Client,
    endpoint: String,
    model: String,
    key_var: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, key_var: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(
            "https://generativelanguage.googleapis.com/v1beta",
            model,
            key_var,
        )
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        key_var: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(GeminiClient {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            key_var: key_var.into(),
        })
    }

    /// Resolve the credential at call time, never caching it in a field
    fn api_key(&self) -> Result<String, AnalysisError> {
        std::env::var(&self.key_var)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| AnalysisError::MissingApiKey(self.key_var.clone()))
    }
}

impl Analyzer for GeminiClient {
    fn analyze(&self, frame: &Frame) -> Result<String, AnalysisError> {
        let key = self.api_key()?;

        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{
                "parts": [{
                    "inlineData": {
                        "mimeType": frame.mime_type,
                        "data": BASE64_STANDARD.encode(&frame.data),
                    }
                }]
            }],
            "generationConfig": { "temperature": 0.0 },
        });

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        debug!(model = %self.model, payload_bytes = frame.data.len(), "submitting frame");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", key)
            .json(&body)
            .send()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if let Some(err) = classify_http_status(response.status().as_u16()) {
            return Err(err);
        }

        let parsed: GenerateContentResponse = response
            .json()
            .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;
        extract_text(&parsed)
    }
}

/// Map non-success HTTP statuses onto the failure taxonomy
fn classify_http_status(status: u16) -> Option<AnalysisError> {
    match status {
        200..=299 => None,
        401 | 403 => Some(AnalysisError::Auth),
        429 => Some(AnalysisError::Quota),
        other => Some(AnalysisError::Transport(format!("HTTP {}", other))),
    }
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Option<Vec<CandidatePart>>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn extract_text(response: &GenerateContentResponse) -> Result<String, AnalysisError> {
    let text = response
        .candidates
        .as_ref()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.as_ref())
        .and_then(|parts| parts.first())
        .and_then(|part| part.text.as_ref());

    match text {
        Some(text) => Ok(text.trim().to_string()),
        None => Err(AnalysisError::MalformedResponse(
            "no text in response".to_string(),
        )),
    }
}
