//! fal.ai REST client for the HiDream-I1-Full model.
//!
//! This module talks to the fal.ai queue and streaming endpoints directly over
//! `reqwest`. Three transports are exposed:
//!
//! - [`FalClient::subscribe`]: queue submit, poll until terminal, fetch result
//! - [`FalClient::stream`]: server-sent events with the final result as the
//!   last event
//! - [`FalClient::queue_submit`] / [`FalClient::queue_status`] /
//!   [`FalClient::queue_result`]: fire-and-forget submission with follow-up
//!   calls keyed by the returned request id
//!
//! Retry and backoff are left to the service; the only local loop is the
//! fixed-interval status poll inside `subscribe`.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// fal.ai model identifier served by this adapter.
pub const MODEL_ID: &str = "fal-ai/hidream-i1-full";

/// Base URL for the fal.ai queue API.
pub const QUEUE_BASE_URL: &str = "https://queue.fal.run";

/// Base URL for the fal.ai synchronous/streaming API.
pub const SYNC_BASE_URL: &str = "https://fal.run";

/// Interval between status polls while waiting for a queued request.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

// =============================================================================
// Request Types
// =============================================================================

/// Image size: one of the named presets or explicit dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ImageSize {
    /// Predefined size preset
    Preset(SizePreset),
    /// Explicit width and height in pixels
    Dimensions {
        /// Width of the generated image
        width: u32,
        /// Height of the generated image
        height: u32,
    },
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize::Dimensions {
            width: 1024,
            height: 1024,
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSize::Preset(preset) => write!(f, "{}", preset),
            ImageSize::Dimensions { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

/// Named image size presets accepted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SizePreset {
    #[serde(rename = "square_hd")]
    SquareHd,
    #[serde(rename = "square")]
    Square,
    #[serde(rename = "portrait_4_3")]
    Portrait43,
    #[serde(rename = "portrait_16_9")]
    Portrait169,
    #[serde(rename = "landscape_4_3")]
    Landscape43,
    #[serde(rename = "landscape_16_9")]
    Landscape169,
}

impl SizePreset {
    /// Wire name of the preset.
    pub fn as_str(&self) -> &'static str {
        match self {
            SizePreset::SquareHd => "square_hd",
            SizePreset::Square => "square",
            SizePreset::Portrait43 => "portrait_4_3",
            SizePreset::Portrait169 => "portrait_16_9",
            SizePreset::Landscape43 => "landscape_4_3",
            SizePreset::Landscape169 => "landscape_16_9",
        }
    }
}

impl fmt::Display for SizePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output image format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Jpeg => f.write_str("jpeg"),
            OutputFormat::Png => f.write_str("png"),
        }
    }
}

/// A LoRA adapter applied on top of the base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Lora {
    /// URL or path to the LoRA weights
    pub path: String,
    /// Name of the LoRA weight, used only if path is a Hugging Face repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight_name: Option<String>,
    /// Scale applied to the LoRA weight
    #[serde(default = "default_lora_scale")]
    pub scale: f64,
}

fn default_lora_scale() -> f64 {
    1.0
}

/// Request payload for the HiDream-I1-Full model.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationInput {
    /// Text prompt describing the image
    pub prompt: String,
    /// What to avoid in the generated image
    pub negative_prompt: String,
    /// Size of the generated image
    pub image_size: ImageSize,
    /// Number of inference steps
    pub num_inference_steps: u32,
    /// Classifier-free guidance scale
    pub guidance_scale: f64,
    /// Random seed; `Some(0)` is a legitimate seed and is forwarded as-is
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Wait for the image to be uploaded before the service responds
    pub sync_mode: bool,
    /// Number of images to generate
    pub num_images: u32,
    /// Run the safety checker over the output
    pub enable_safety_checker: bool,
    /// Format of the generated image
    pub output_format: OutputFormat,
    /// LoRA adapters to apply
    pub loras: Vec<Lora>,
}

// =============================================================================
// Response Types
// =============================================================================

/// A generated image as reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteImage {
    /// URL where the image can be fetched
    pub url: String,
    /// Width in pixels
    #[serde(default)]
    pub width: Option<u32>,
    /// Height in pixels
    #[serde(default)]
    pub height: Option<u32>,
    /// MIME type of the image
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Terminal output of a generation request.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationOutput {
    /// Generated images
    pub images: Vec<RemoteImage>,
    /// Seed actually used by the model
    #[serde(default)]
    pub seed: Option<u64>,
    /// Prompt echoed back by the service, when available
    #[serde(default)]
    pub prompt: Option<String>,
}

/// Ticket returned by a queue submission.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueTicket {
    /// Identifier used to poll status and fetch the result
    pub request_id: String,
    /// URL of the eventual response
    #[serde(default)]
    pub response_url: Option<String>,
}

/// Lifecycle state of a queued request, as observed from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueState {
    InQueue,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueState::InQueue => f.write_str("IN_QUEUE"),
            QueueState::InProgress => f.write_str("IN_PROGRESS"),
            QueueState::Completed => f.write_str("COMPLETED"),
            QueueState::Failed => f.write_str("FAILED"),
        }
    }
}

/// Status report for a queued request.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    /// Current lifecycle state
    pub status: QueueState,
    /// Position in the queue while waiting
    #[serde(default)]
    pub queue_position: Option<u32>,
    /// URL of the eventual response
    #[serde(default)]
    pub response_url: Option<String>,
    /// Log lines emitted by the model, when requested
    #[serde(default)]
    pub logs: Option<Vec<LogEntry>>,
}

/// A single log line from the service.
#[derive(Debug, Clone, Deserialize)]
pub struct LogEntry {
    /// Log message
    pub message: String,
    /// Timestamp of the message
    #[serde(default)]
    pub timestamp: Option<String>,
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the fal.ai queue and streaming APIs.
#[derive(Clone)]
pub struct FalClient {
    http: reqwest::Client,
    api_key: String,
    /// Base URL for queue operations (overridable for testing)
    queue_base: String,
    /// Base URL for streaming operations (overridable for testing)
    sync_base: String,
}

impl FalClient {
    /// Create a new client using the production fal.ai endpoints.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_urls(api_key, QUEUE_BASE_URL, SYNC_BASE_URL)
    }

    /// Create a new client with custom base URLs (for testing).
    pub fn with_base_urls(
        api_key: impl Into<String>,
        queue_base: impl Into<String>,
        sync_base: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            queue_base: queue_base.into(),
            sync_base: sync_base.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Key {}", self.api_key)
    }

    /// Submit a request to the queue, optionally registering a webhook.
    ///
    /// # Errors
    /// Returns `Error::Api` if the submission fails.
    pub async fn queue_submit(
        &self,
        input: &GenerationInput,
        webhook_url: Option<&str>,
    ) -> Result<QueueTicket> {
        let mut endpoint = format!("{}/{}", self.queue_base, MODEL_ID);
        if let Some(webhook) = webhook_url {
            endpoint = format!("{}?fal_webhook={}", endpoint, urlencoding::encode(webhook));
        }
        debug!(endpoint = %endpoint, "Submitting queue request");

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", self.auth_header())
            .json(input)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        into_json(&endpoint, response).await
    }

    /// Check the status of a queued request.
    ///
    /// # Errors
    /// Returns `Error::Api` for unknown request ids or transport failures.
    pub async fn queue_status(&self, request_id: &str, logs: bool) -> Result<QueueStatus> {
        let endpoint = format!(
            "{}/{}/requests/{}/status?logs={}",
            self.queue_base,
            MODEL_ID,
            request_id,
            if logs { 1 } else { 0 }
        );
        debug!(request_id, "Checking queue status");

        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        into_json(&endpoint, response).await
    }

    /// Fetch the terminal output of a completed queued request.
    ///
    /// # Errors
    /// Returns `Error::Api` for unknown request ids or transport failures.
    pub async fn queue_result(&self, request_id: &str) -> Result<GenerationOutput> {
        let endpoint = format!("{}/{}/requests/{}", self.queue_base, MODEL_ID, request_id);
        debug!(request_id, "Fetching queue result");

        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        into_json(&endpoint, response).await
    }

    /// Submit a request and wait for its result.
    ///
    /// Submits to the queue, polls status at a fixed interval until the
    /// request reaches a terminal state, then fetches the output. Model log
    /// lines observed while polling are forwarded at debug level.
    ///
    /// # Errors
    /// Returns `Error::Api` if submission, polling, or result retrieval fails,
    /// or if the request ends in the FAILED state.
    pub async fn subscribe(&self, input: &GenerationInput) -> Result<(String, GenerationOutput)> {
        let ticket = self.queue_submit(input, None).await?;
        info!(request_id = %ticket.request_id, "Request submitted, waiting for completion");

        loop {
            let status = self.queue_status(&ticket.request_id, true).await?;
            match status.status {
                QueueState::Completed => break,
                QueueState::Failed => {
                    return Err(Error::GenerationFailed {
                        request_id: ticket.request_id.clone(),
                    });
                }
                QueueState::InQueue | QueueState::InProgress => {
                    for log in status.logs.iter().flatten() {
                        debug!(request_id = %ticket.request_id, "{}", log.message);
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
            }
        }

        let output = self.queue_result(&ticket.request_id).await?;
        Ok((ticket.request_id, output))
    }

    /// Open a streaming generation and consume it to completion.
    ///
    /// Every server-sent `data:` payload is accumulated in order; the last
    /// event carries the terminal output. Returns the request id (from the
    /// `x-fal-request-id` response header, empty if absent), the full event
    /// list, and the parsed output.
    ///
    /// # Errors
    /// Returns `Error::Api` if the stream cannot be opened, ends without a
    /// final event, or the final event does not parse as an output.
    pub async fn stream(
        &self,
        input: &GenerationInput,
    ) -> Result<(String, Vec<serde_json::Value>, GenerationOutput)> {
        let endpoint = format!("{}/{}/stream", self.sync_base, MODEL_ID);
        debug!(endpoint = %endpoint, "Opening generation stream");

        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", self.auth_header())
            .header("Accept", "text/event-stream")
            .json(input)
            .send()
            .await
            .map_err(|e| Error::api(&endpoint, 0, format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(&endpoint, status.as_u16(), body));
        }

        let request_id = response
            .headers()
            .get("x-fal-request-id")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let mut response = response;
        let mut events = Vec::new();
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = response
                .chunk()
                .await
                .map_err(|e| Error::api(&endpoint, status.as_u16(), format!("Stream error: {}", e)))?;
            match chunk {
                Some(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    drain_sse_events(&mut buffer, &mut events);
                }
                None => break,
            }
        }
        // A final frame without a trailing blank line still counts.
        buffer.extend_from_slice(b"\n\n");
        drain_sse_events(&mut buffer, &mut events);

        debug!(count = events.len(), "Stream finished");

        let last = events
            .last()
            .cloned()
            .ok_or_else(|| Error::api(&endpoint, status.as_u16(), "Stream ended without a result event"))?;
        let output: GenerationOutput = serde_json::from_value(last).map_err(|e| {
            Error::api(
                &endpoint,
                status.as_u16(),
                format!("Failed to parse final stream event: {}", e),
            )
        })?;

        Ok((request_id, events, output))
    }
}

/// Pull complete server-sent event frames out of `buffer`, appending each
/// parsed `data:` payload to `events`. Incomplete trailing data stays in the
/// buffer for the next chunk. The buffer holds raw bytes so a multi-byte
/// character split across chunks is only decoded once its frame is complete.
fn drain_sse_events(buffer: &mut Vec<u8>, events: &mut Vec<serde_json::Value>) {
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let frame: Vec<u8> = buffer.drain(..pos + 2).collect();
        let frame = String::from_utf8_lossy(&frame);
        for line in frame.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(data.trim()) {
                    events.push(value);
                }
            }
        }
    }
}

/// Check the HTTP status and deserialize a JSON response body.
async fn into_json<T: DeserializeOwned>(endpoint: &str, response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::api(endpoint, status.as_u16(), body));
    }
    response
        .json()
        .await
        .map_err(|e| Error::api(endpoint, status.as_u16(), format!("Failed to parse response: {}", e)))
}
