//! MCP server implementation.
//!
//! Exposes five tools over the Model Context Protocol:
//! - `hidream_i1_full_generate`: synchronous generation with local download
//! - `hidream_i1_full_generate_stream`: streaming generation with progress
//!   event accounting
//! - `hidream_i1_full_generate_queue`: fire-and-forget queue submission
//! - `hidream_i1_full_queue_status`: status poll for a queued request
//! - `hidream_i1_full_queue_result`: result retrieval with local download
//!
//! Failures never surface as protocol errors: a missing credential or an
//! upstream failure produces an error-flagged tool result carrying a
//! human-readable message, so one broken call cannot affect another.

use crate::config::Config;
use crate::handler::{
    GenerateParams, HidreamHandler, QueueResultParams, QueueStatusParams, QueueSubmitParams,
};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;
use tracing::warn;

/// Message returned by every tool when the API key was not configured.
const MISSING_KEY_MESSAGE: &str =
    "Error: FAL_KEY environment variable is not set. Please configure your fal.ai API key.";

/// MCP server for fal.ai HiDream-I1-Full image generation.
///
/// The handler is built once at startup from the immutable configuration;
/// when the credential is absent the server still serves tool calls, each
/// answered with a configuration error.
#[derive(Clone)]
pub struct HidreamServer {
    handler: Option<Arc<HidreamHandler>>,
}

impl HidreamServer {
    /// Create a server from configuration. Never fails: a missing API key
    /// only degrades tool calls, it does not prevent startup.
    pub fn new(config: &Config) -> Self {
        let handler = match HidreamHandler::new(config) {
            Ok(handler) => Some(Arc::new(handler)),
            Err(e) => {
                warn!(error = %e, "Handler not constructed; tool calls will report a configuration error");
                None
            }
        };
        Self { handler }
    }

    /// Create a server around a prebuilt handler (for testing).
    pub fn with_handler(handler: HidreamHandler) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
        }
    }

    fn handler(&self) -> Result<&HidreamHandler, CallToolResult> {
        match self.handler.as_deref() {
            Some(handler) => Ok(handler),
            None => Err(error_result(MISSING_KEY_MESSAGE)),
        }
    }

    /// Generate images and wait for the result.
    pub async fn generate(&self, params: GenerateParams) -> CallToolResult {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(result) => return result,
        };
        match handler.generate(params).await {
            Ok(text) => text_result(text),
            Err(e) => {
                warn!(error = %e, "Image generation failed");
                error_result(format!(
                    "Failed to generate image with fal-ai/hidream-i1-full. Error: {}",
                    e
                ))
            }
        }
    }

    /// Generate images over the streaming transport.
    pub async fn generate_stream(&self, params: GenerateParams) -> CallToolResult {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(result) => return result,
        };
        match handler.generate_stream(params).await {
            Ok(text) => text_result(text),
            Err(e) => {
                warn!(error = %e, "Streaming image generation failed");
                error_result(format!(
                    "Failed to generate image with fal-ai/hidream-i1-full (Streaming). Error: {}",
                    e
                ))
            }
        }
    }

    /// Submit a generation to the queue.
    pub async fn generate_queue(&self, params: QueueSubmitParams) -> CallToolResult {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(result) => return result,
        };
        match handler.queue_submit(params).await {
            Ok(text) => text_result(text),
            Err(e) => {
                warn!(error = %e, "Queue submission failed");
                error_result(format!(
                    "Failed to submit image generation request to fal-ai/hidream-i1-full queue. Error: {}",
                    e
                ))
            }
        }
    }

    /// Check the status of a queued request.
    pub async fn queue_status(&self, params: QueueStatusParams) -> CallToolResult {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(result) => return result,
        };
        match handler.queue_status(params).await {
            Ok(text) => text_result(text),
            Err(e) => {
                warn!(error = %e, "Queue status check failed");
                error_result(format!("Failed to check queue status. Error: {}", e))
            }
        }
    }

    /// Fetch the result of a completed queued request.
    pub async fn queue_result(&self, params: QueueResultParams) -> CallToolResult {
        let handler = match self.handler() {
            Ok(handler) => handler,
            Err(result) => return result,
        };
        match handler.queue_result(params).await {
            Ok(text) => text_result(text),
            Err(e) => {
                warn!(error = %e, "Queue result retrieval failed");
                error_result(format!("Failed to get queue result. Error: {}", e))
            }
        }
    }
}

fn text_result(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text.into())])
}

fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Build the JSON input schema for a tool parameter type.
fn tool_input_schema<T: JsonSchema>() -> Arc<serde_json::Map<String, serde_json::Value>> {
    let schema = schemars::schema_for!(T);
    match serde_json::to_value(&schema).unwrap_or_default() {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    }
}

fn parse_params<T: DeserializeOwned>(
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<T, McpError> {
    arguments
        .map(|args| serde_json::from_value(serde_json::Value::Object(args)))
        .transpose()
        .map_err(|e| McpError::invalid_params(format!("Invalid parameters: {}", e), None))?
        .ok_or_else(|| McpError::invalid_params("Missing parameters", None))
}

impl ServerHandler for HidreamServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Image generation server for the fal.ai HiDream-I1-Full model. \
                 Use hidream_i1_full_generate for synchronous generation, \
                 hidream_i1_full_generate_stream for generation with progress events, \
                 and hidream_i1_full_generate_queue with the queue_status/queue_result \
                 tools for long-running requests. Generated images are downloaded to \
                 a local directory."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    fn list_tools(
        &self,
        _params: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<rmcp::model::ListToolsResult, McpError>> + Send + '_
    {
        async move {
            use rmcp::model::{ListToolsResult, Tool};

            let tool = |name: &'static str,
                        description: &'static str,
                        input_schema: Arc<serde_json::Map<String, serde_json::Value>>| {
                Tool {
                    name: Cow::Borrowed(name),
                    description: Some(Cow::Borrowed(description)),
                    input_schema,
                    annotations: None,
                    icons: None,
                    meta: None,
                    output_schema: None,
                    title: None,
                }
            };

            Ok(ListToolsResult {
                tools: vec![
                    tool(
                        "hidream_i1_full_generate",
                        "Generate high-quality images using fal-ai/hidream-i1-full - \
                         Advanced image generation model with superior quality and detail",
                        tool_input_schema::<GenerateParams>(),
                    ),
                    tool(
                        "hidream_i1_full_generate_stream",
                        "Generate images using fal-ai/hidream-i1-full with streaming \
                         for real-time progress updates",
                        tool_input_schema::<GenerateParams>(),
                    ),
                    tool(
                        "hidream_i1_full_generate_queue",
                        "Generate images using fal-ai/hidream-i1-full with queue method \
                         for long-running requests and webhook support",
                        tool_input_schema::<QueueSubmitParams>(),
                    ),
                    tool(
                        "hidream_i1_full_queue_status",
                        "Check the status of a queued image generation request",
                        tool_input_schema::<QueueStatusParams>(),
                    ),
                    tool(
                        "hidream_i1_full_queue_result",
                        "Get the result of a completed queued image generation request",
                        tool_input_schema::<QueueResultParams>(),
                    ),
                ],
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: rmcp::model::CallToolRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            match params.name.as_ref() {
                "hidream_i1_full_generate" => {
                    Ok(self.generate(parse_params(params.arguments)?).await)
                }
                "hidream_i1_full_generate_stream" => {
                    Ok(self.generate_stream(parse_params(params.arguments)?).await)
                }
                "hidream_i1_full_generate_queue" => {
                    Ok(self.generate_queue(parse_params(params.arguments)?).await)
                }
                "hidream_i1_full_queue_status" => {
                    Ok(self.queue_status(parse_params(params.arguments)?).await)
                }
                "hidream_i1_full_queue_result" => {
                    Ok(self.queue_result(parse_params(params.arguments)?).await)
                }
                _ => Err(McpError::invalid_params(
                    format!("Unknown tool: {}", params.name),
                    None,
                )),
            }
        }
    }
}
