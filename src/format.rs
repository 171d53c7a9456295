//! Text-block formatting for tool responses.
//!
//! Pure functions from request parameters and service output to the single
//! text block returned to the MCP client. These never fail on well-formed
//! input.

use crate::download::DownloadedImage;
use crate::fal::{GenerationOutput, MODEL_ID, QueueState, QueueStatus};
use crate::handler::GenerateParams;
use std::fmt::Write as _;
use std::path::Path;

/// Everything needed to render a terminal generation response.
pub struct GenerationSummary<'a> {
    /// Original request parameters
    pub params: &'a GenerateParams,
    /// Request identifier assigned by the service
    pub request_id: &'a str,
    /// Output returned by the service
    pub output: &'a GenerationOutput,
    /// One record per remote image
    pub images: &'a [DownloadedImage],
    /// Number of stream events received, for the streaming operation
    pub stream_events: Option<usize>,
    /// Directory images were downloaded into
    pub images_dir: &'a Path,
}

/// Render the response for the sync and streaming generate operations.
pub fn generation_response(summary: &GenerationSummary<'_>) -> String {
    let GenerationSummary {
        params,
        request_id,
        output,
        images,
        stream_events,
        images_dir,
    } = summary;

    let mode = if stream_events.is_some() {
        " (Streaming)"
    } else {
        ""
    };
    let mut text = format!(
        "Successfully generated {} image(s) using {}{}:\n\n",
        images.len(),
        MODEL_ID,
        mode
    );

    let _ = writeln!(text, "Prompt: \"{}\"", params.prompt);
    if !params.negative_prompt.is_empty() {
        let _ = writeln!(text, "Negative Prompt: \"{}\"", params.negative_prompt);
    }
    let _ = writeln!(text, "Image Size: {}", params.image_size);
    let _ = writeln!(text, "Inference Steps: {}", params.num_inference_steps);
    let _ = writeln!(text, "Guidance Scale: {}", params.guidance_scale);
    let _ = writeln!(text, "Output Format: {}", params.output_format);
    match output.seed {
        Some(seed) => {
            let _ = writeln!(text, "Seed: {}", seed);
        }
        None => {
            let _ = writeln!(text, "Seed: Auto-generated");
        }
    }
    if !params.loras.is_empty() {
        let _ = writeln!(text, "LoRAs: {} applied", params.loras.len());
    }
    match stream_events {
        Some(count) => {
            let _ = writeln!(text, "Stream Events: {} received", count);
        }
        None => {
            let _ = writeln!(text, "Request ID: {}", request_id);
        }
    }

    let _ = write!(text, "\nGenerated Images:\n{}", image_details(images));
    let _ = write!(text, "\n\n{}", download_note(images, images_dir));
    text
}

/// Render the response for a queue submission.
pub fn queue_submit_response(
    params: &GenerateParams,
    webhook_url: Option<&str>,
    request_id: &str,
) -> String {
    let mut text = format!(
        "Successfully submitted image generation request to {} queue:\n\n",
        MODEL_ID
    );

    let _ = writeln!(text, "Request ID: {}", request_id);
    let _ = writeln!(text, "Prompt: \"{}\"", params.prompt);
    if !params.negative_prompt.is_empty() {
        let _ = writeln!(text, "Negative Prompt: \"{}\"", params.negative_prompt);
    }
    let _ = writeln!(text, "Image Size: {}", params.image_size);
    let _ = writeln!(text, "Inference Steps: {}", params.num_inference_steps);
    let _ = writeln!(text, "Guidance Scale: {}", params.guidance_scale);
    let _ = writeln!(text, "Output Format: {}", params.output_format);
    match params.seed {
        Some(seed) => {
            let _ = writeln!(text, "Seed: {}", seed);
        }
        None => {
            let _ = writeln!(text, "Seed: Auto-generated");
        }
    }
    if !params.loras.is_empty() {
        let _ = writeln!(text, "LoRAs: {} applied", params.loras.len());
    }
    if let Some(webhook) = webhook_url {
        let _ = writeln!(text, "Webhook URL: {}", webhook);
    }

    let _ = write!(
        text,
        "\nUse the 'hidream_i1_full_queue_status' tool with request ID '{id}' to check the status.\n\
         Use the 'hidream_i1_full_queue_result' tool with request ID '{id}' to get the result when completed.",
        id = request_id
    );
    text
}

/// Render the response for a queue status poll.
pub fn queue_status_response(request_id: &str, status: &QueueStatus) -> String {
    let mut text = format!(
        "Queue Status for Request {}:\n\nStatus: {}",
        request_id, status.status
    );

    if let Some(position) = status.queue_position {
        let _ = write!(text, "\nQueue Position: {}", position);
    }
    if let Some(url) = &status.response_url {
        let _ = write!(text, "\nResponse URL: {}", url);
    }
    if let Some(logs) = &status.logs {
        if !logs.is_empty() {
            let _ = write!(text, "\n\nLogs:");
            for log in logs {
                match &log.timestamp {
                    Some(ts) => {
                        let _ = write!(text, "\n[{}] {}", ts, log.message);
                    }
                    None => {
                        let _ = write!(text, "\n{}", log.message);
                    }
                }
            }
        }
    }

    match status.status {
        QueueState::Completed => {
            text.push_str(
                "\n\nRequest completed! Use 'hidream_i1_full_queue_result' tool to get the results.",
            );
        }
        QueueState::Failed => {
            text.push_str("\n\nRequest failed. Check the logs above for error details.");
        }
        QueueState::InProgress | QueueState::InQueue => {
            text.push_str("\n\nRequest is still processing. Check again in a few moments.");
        }
    }
    text
}

/// Render the response for a fetched queue result.
pub fn queue_result_response(
    request_id: &str,
    output: &GenerationOutput,
    images: &[DownloadedImage],
    images_dir: &Path,
) -> String {
    let mut text = format!(
        "Successfully retrieved result for request {}:\n\nRequest ID: {}\n",
        request_id, request_id
    );

    if let Some(prompt) = &output.prompt {
        let _ = writeln!(text, "Prompt: \"{}\"", prompt);
    }
    if let Some(seed) = output.seed {
        let _ = writeln!(text, "Seed: {}", seed);
    }

    let _ = write!(text, "\nGenerated Images:\n{}", image_details(images));
    let _ = write!(text, "\n\n{}", download_note(images, images_dir));
    text
}

/// Per-image detail blocks, one `Image N:` section per record.
fn image_details(images: &[DownloadedImage]) -> String {
    let blocks: Vec<String> = images
        .iter()
        .map(|img| {
            let mut details = format!("Image {}:", img.index);
            if let Some(path) = &img.local_path {
                let _ = write!(details, "\n  Local Path: {}", path.display());
            }
            let _ = write!(details, "\n  Original URL: {}", img.url);
            let _ = write!(details, "\n  Filename: {}", img.filename);
            if let (Some(width), Some(height)) = (img.width, img.height) {
                let _ = write!(details, "\n  Dimensions: {}x{}", width, height);
            }
            if let Some(content_type) = &img.content_type {
                let _ = write!(details, "\n  Content Type: {}", content_type);
            }
            details
        })
        .collect();
    blocks.join("\n\n")
}

fn download_note(images: &[DownloadedImage], images_dir: &Path) -> String {
    if images.iter().any(|img| img.local_path.is_some()) {
        format!(
            "Images have been downloaded to the local '{}' directory.",
            images_dir.display()
        )
    } else {
        "Note: Local download failed, but original URLs are available.".to_string()
    }
}
