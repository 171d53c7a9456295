//! Generation handler and tool parameter types.
//!
//! `GenerateParams` is the typed, defaulted, boundary-validated form of the
//! tool input; `HidreamHandler` orchestrates the fal.ai client, the image
//! fetcher, and the response formatter for each operation.

use crate::config::Config;
use crate::download::ImageFetcher;
use crate::error::{Error, Result};
use crate::fal::{FalClient, GenerationInput, ImageSize, Lora, OutputFormat};
use crate::format::{self, GenerationSummary};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Bounds for `num_inference_steps`.
pub const MIN_INFERENCE_STEPS: u32 = 1;
pub const MAX_INFERENCE_STEPS: u32 = 100;

/// Bounds for `guidance_scale`.
pub const MIN_GUIDANCE_SCALE: f64 = 1.0;
pub const MAX_GUIDANCE_SCALE: f64 = 20.0;

/// Bounds for `num_images`.
pub const MIN_NUM_IMAGES: u32 = 1;
pub const MAX_NUM_IMAGES: u32 = 4;

/// Text-to-image generation parameters.
///
/// Every optional field has a documented default matching the model's
/// defaults; callers only supply what they want to override.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GenerateParams {
    /// The prompt to generate an image from
    pub prompt: String,

    /// The negative prompt to use. Use it to address details that you don't
    /// want in the image
    #[serde(default)]
    pub negative_prompt: String,

    /// The size of the generated image. Can be a predefined size
    /// (square_hd, square, portrait_4_3, portrait_16_9, landscape_4_3,
    /// landscape_16_9) or custom width/height. Defaults to 1024x1024
    #[serde(default)]
    pub image_size: ImageSize,

    /// The number of inference steps to perform (1-100, default 50)
    #[serde(default = "default_num_inference_steps")]
    #[schemars(range(min = 1, max = 100))]
    pub num_inference_steps: u32,

    /// The same seed and the same prompt given to the same version of the
    /// model will output the same image every time. Seed 0 is a valid seed
    #[serde(default)]
    pub seed: Option<u64>,

    /// The CFG (Classifier Free Guidance) scale is a measure of how close you
    /// want the model to stick to your prompt (1-20, default 5)
    #[serde(default = "default_guidance_scale")]
    #[schemars(range(min = 1.0, max = 20.0))]
    pub guidance_scale: f64,

    /// If set to true, the function will wait for the image to be generated
    /// and uploaded before returning the response
    #[serde(default = "default_true")]
    pub sync_mode: bool,

    /// The number of images to generate (1-4, default 1)
    #[serde(default = "default_num_images")]
    #[schemars(range(min = 1, max = 4))]
    pub num_images: u32,

    /// If set to true, the safety checker will be enabled
    #[serde(default = "default_true")]
    pub enable_safety_checker: bool,

    /// The format of the generated image (jpeg or png, default jpeg)
    #[serde(default)]
    pub output_format: OutputFormat,

    /// A list of LoRAs to apply to the model
    #[serde(default)]
    pub loras: Vec<Lora>,
}

fn default_num_inference_steps() -> u32 {
    50
}

fn default_guidance_scale() -> f64 {
    5.0
}

fn default_true() -> bool {
    true
}

fn default_num_images() -> u32 {
    1
}

/// Queue submission parameters: generation parameters plus an optional
/// webhook for result notification.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueSubmitParams {
    /// Generation parameters
    #[serde(flatten)]
    pub generate: GenerateParams,

    /// Optional webhook URL for result notifications
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Parameters for a queue status poll.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueStatusParams {
    /// The request ID returned from the queue submission
    pub request_id: String,

    /// Whether to include logs in the response
    #[serde(default = "default_true")]
    pub logs: bool,
}

/// Parameters for fetching a queue result.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QueueResultParams {
    /// The request ID returned from the queue submission
    pub request_id: String,
}

/// Validation error details for generation parameters.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field that failed validation.
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl GenerateParams {
    /// Validate the parameters against the model constraints.
    ///
    /// # Returns
    /// - `Ok(())` if all parameters are valid
    /// - `Err(Vec<ValidationError>)` with all validation errors
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.prompt.trim().is_empty() {
            errors.push(ValidationError {
                field: "prompt".to_string(),
                message: "Prompt cannot be empty".to_string(),
            });
        }

        if self.num_inference_steps < MIN_INFERENCE_STEPS
            || self.num_inference_steps > MAX_INFERENCE_STEPS
        {
            errors.push(ValidationError {
                field: "num_inference_steps".to_string(),
                message: format!(
                    "num_inference_steps must be between {} and {}, got {}",
                    MIN_INFERENCE_STEPS, MAX_INFERENCE_STEPS, self.num_inference_steps
                ),
            });
        }

        if self.guidance_scale < MIN_GUIDANCE_SCALE || self.guidance_scale > MAX_GUIDANCE_SCALE {
            errors.push(ValidationError {
                field: "guidance_scale".to_string(),
                message: format!(
                    "guidance_scale must be between {} and {}, got {}",
                    MIN_GUIDANCE_SCALE, MAX_GUIDANCE_SCALE, self.guidance_scale
                ),
            });
        }

        if self.num_images < MIN_NUM_IMAGES || self.num_images > MAX_NUM_IMAGES {
            errors.push(ValidationError {
                field: "num_images".to_string(),
                message: format!(
                    "num_images must be between {} and {}, got {}",
                    MIN_NUM_IMAGES, MAX_NUM_IMAGES, self.num_images
                ),
            });
        }

        if let ImageSize::Dimensions { width, height } = self.image_size {
            if width == 0 || height == 0 {
                errors.push(ValidationError {
                    field: "image_size".to_string(),
                    message: format!("Image dimensions must be positive, got {}x{}", width, height),
                });
            }
        }

        for (i, lora) in self.loras.iter().enumerate() {
            if lora.path.trim().is_empty() {
                errors.push(ValidationError {
                    field: format!("loras[{}].path", i),
                    message: "LoRA path cannot be empty".to_string(),
                });
            }
            if lora.scale < 0.0 {
                errors.push(ValidationError {
                    field: format!("loras[{}].scale", i),
                    message: format!("LoRA scale cannot be negative, got {}", lora.scale),
                });
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Build the API payload, overriding the sync-mode flag per transport.
    pub fn to_input(&self, sync_mode: bool) -> GenerationInput {
        GenerationInput {
            prompt: self.prompt.clone(),
            negative_prompt: self.negative_prompt.clone(),
            image_size: self.image_size.clone(),
            num_inference_steps: self.num_inference_steps,
            guidance_scale: self.guidance_scale,
            seed: self.seed,
            sync_mode,
            num_images: self.num_images,
            enable_safety_checker: self.enable_safety_checker,
            output_format: self.output_format,
            loras: self.loras.clone(),
        }
    }

    fn validated(&self) -> Result<()> {
        self.validate().map_err(|errors| {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Error::validation(messages.join("; "))
        })
    }
}

/// Generation handler wiring the fal.ai client to local image acquisition.
pub struct HidreamHandler {
    client: FalClient,
    fetcher: ImageFetcher,
}

impl HidreamHandler {
    /// Create a handler from configuration.
    ///
    /// # Errors
    /// Returns the configuration error if the API key is absent.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.require_api_key()?;
        Ok(Self {
            client: FalClient::new(api_key),
            fetcher: ImageFetcher::new(&config.images_dir),
        })
    }

    /// Create a handler with provided dependencies (for testing).
    pub fn with_deps(client: FalClient, fetcher: ImageFetcher) -> Self {
        Self { client, fetcher }
    }

    /// Generate images synchronously: submit, wait, download, summarize.
    #[instrument(level = "info", name = "generate", skip(self, params), fields(prompt = %params.prompt))]
    pub async fn generate(&self, params: GenerateParams) -> Result<String> {
        params.validated()?;
        let input = params.to_input(params.sync_mode);

        info!("Generating image");
        let (request_id, output) = self.client.subscribe(&input).await?;

        info!("Downloading images locally");
        let images = self.fetcher.fetch_all(&params.prompt, &output).await;

        Ok(format::generation_response(&GenerationSummary {
            params: &params,
            request_id: &request_id,
            output: &output,
            images: &images,
            stream_events: None,
            images_dir: self.fetcher.dir(),
        }))
    }

    /// Generate images over the streaming transport, surfacing the number of
    /// progress events received.
    #[instrument(level = "info", name = "generate_stream", skip(self, params), fields(prompt = %params.prompt))]
    pub async fn generate_stream(&self, params: GenerateParams) -> Result<String> {
        params.validated()?;
        // Streaming always runs in async mode on the service side.
        let input = params.to_input(false);

        info!("Creating generation stream");
        let (request_id, events, output) = self.client.stream(&input).await?;

        info!("Downloading images locally");
        let images = self.fetcher.fetch_all(&params.prompt, &output).await;

        Ok(format::generation_response(&GenerationSummary {
            params: &params,
            request_id: &request_id,
            output: &output,
            images: &images,
            stream_events: Some(events.len()),
            images_dir: self.fetcher.dir(),
        }))
    }

    /// Submit a generation to the queue and return immediately with the
    /// request id. No images are downloaded here.
    #[instrument(level = "info", name = "queue_submit", skip(self, params), fields(prompt = %params.generate.prompt))]
    pub async fn queue_submit(&self, params: QueueSubmitParams) -> Result<String> {
        params.generate.validated()?;
        let input = params.generate.to_input(false);

        let ticket = self
            .client
            .queue_submit(&input, params.webhook_url.as_deref())
            .await?;
        info!(request_id = %ticket.request_id, "Queue request submitted");

        Ok(format::queue_submit_response(
            &params.generate,
            params.webhook_url.as_deref(),
            &ticket.request_id,
        ))
    }

    /// Poll the status of a queued request. No images are downloaded here.
    #[instrument(level = "info", name = "queue_status", skip(self, params), fields(request_id = %params.request_id))]
    pub async fn queue_status(&self, params: QueueStatusParams) -> Result<String> {
        let status = self
            .client
            .queue_status(&params.request_id, params.logs)
            .await?;
        Ok(format::queue_status_response(&params.request_id, &status))
    }

    /// Fetch the finished output of a queued request and download its images.
    #[instrument(level = "info", name = "queue_result", skip(self, params), fields(request_id = %params.request_id))]
    pub async fn queue_result(&self, params: QueueResultParams) -> Result<String> {
        let output = self.client.queue_result(&params.request_id).await?;

        // The queue result may echo the prompt; fall back to a generic stem.
        let prompt = output.prompt.clone().unwrap_or_else(|| "generated".to_string());

        info!("Downloading images locally");
        let images = self.fetcher.fetch_all(&prompt, &output).await;

        Ok(format::queue_result_response(
            &params.request_id,
            &output,
            &images,
            self.fetcher.dir(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fal::SizePreset;

    #[test]
    fn defaults_from_minimal_json() {
        let params: GenerateParams = serde_json::from_str(r#"{"prompt": "a cat"}"#).unwrap();
        assert_eq!(params.negative_prompt, "");
        assert_eq!(
            params.image_size,
            ImageSize::Dimensions {
                width: 1024,
                height: 1024
            }
        );
        assert_eq!(params.num_inference_steps, 50);
        assert_eq!(params.guidance_scale, 5.0);
        assert!(params.seed.is_none());
        assert!(params.sync_mode);
        assert_eq!(params.num_images, 1);
        assert!(params.enable_safety_checker);
        assert_eq!(params.output_format, OutputFormat::Jpeg);
        assert!(params.loras.is_empty());
    }

    #[test]
    fn valid_params_pass() {
        let params: GenerateParams = serde_json::from_str(
            r#"{
                "prompt": "a cat",
                "image_size": "landscape_16_9",
                "num_inference_steps": 30,
                "guidance_scale": 7.5,
                "num_images": 4,
                "seed": 0,
                "loras": [{"path": "https://example.com/w.safetensors", "scale": 0.8}]
            }"#,
        )
        .unwrap();
        assert_eq!(params.image_size, ImageSize::Preset(SizePreset::Landscape169));
        assert_eq!(params.seed, Some(0));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn empty_prompt_rejected() {
        let params: GenerateParams = serde_json::from_str(r#"{"prompt": "   "}"#).unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "prompt"));
    }

    #[test]
    fn steps_out_of_range_rejected() {
        let params: GenerateParams =
            serde_json::from_str(r#"{"prompt": "a cat", "num_inference_steps": 101}"#).unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "num_inference_steps"));

        let params: GenerateParams =
            serde_json::from_str(r#"{"prompt": "a cat", "num_inference_steps": 0}"#).unwrap();
        assert!(params.validate().is_err());
    }

    #[test]
    fn guidance_out_of_range_rejected() {
        let params: GenerateParams =
            serde_json::from_str(r#"{"prompt": "a cat", "guidance_scale": 20.5}"#).unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "guidance_scale"));
    }

    #[test]
    fn num_images_out_of_range_rejected() {
        let params: GenerateParams =
            serde_json::from_str(r#"{"prompt": "a cat", "num_images": 5}"#).unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "num_images"));
    }

    #[test]
    fn zero_dimensions_rejected() {
        let params: GenerateParams = serde_json::from_str(
            r#"{"prompt": "a cat", "image_size": {"width": 0, "height": 512}}"#,
        )
        .unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "image_size"));
    }

    #[test]
    fn bad_lora_collected_with_field_index() {
        let params: GenerateParams = serde_json::from_str(
            r#"{"prompt": "a cat", "loras": [{"path": "ok"}, {"path": "", "scale": -1.0}]}"#,
        )
        .unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.field == "loras[1].path"));
        assert!(errors.iter().any(|e| e.field == "loras[1].scale"));
    }

    #[test]
    fn multiple_errors_collected() {
        let params: GenerateParams = serde_json::from_str(
            r#"{"prompt": " ", "num_inference_steps": 0, "guidance_scale": 0.5, "num_images": 9}"#,
        )
        .unwrap();
        let errors = params.validate().unwrap_err();
        assert!(errors.len() >= 4);
    }

    #[test]
    fn to_input_overrides_sync_mode() {
        let params: GenerateParams =
            serde_json::from_str(r#"{"prompt": "a cat", "sync_mode": true}"#).unwrap();
        let input = params.to_input(false);
        assert!(!input.sync_mode);
        assert_eq!(input.prompt, "a cat");
    }

    #[test]
    fn queue_params_flatten_generate_fields() {
        let params: QueueSubmitParams = serde_json::from_str(
            r#"{"prompt": "a cat", "webhook_url": "https://example.com/hook"}"#,
        )
        .unwrap();
        assert_eq!(params.generate.prompt, "a cat");
        assert_eq!(params.webhook_url.as_deref(), Some("https://example.com/hook"));
    }

    #[test]
    fn status_params_default_logs_on() {
        let params: QueueStatusParams =
            serde_json::from_str(r#"{"request_id": "req-1"}"#).unwrap();
        assert!(params.logs);
    }
}
