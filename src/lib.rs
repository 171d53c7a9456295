//! fal.ai HiDream-I1-Full MCP Server Library
//!
//! Exposes the fal.ai `hidream-i1-full` text-to-image model as MCP tools:
//! synchronous, streaming, and queued generation, with generated images
//! downloaded to a local directory.

pub mod config;
pub mod download;
pub mod error;
pub mod fal;
pub mod format;
pub mod handler;
pub mod server;
pub mod transport;

pub use config::Config;
pub use error::{ConfigError, Error, Result};
pub use handler::{GenerateParams, HidreamHandler};
pub use server::HidreamServer;
pub use transport::{Transport, TransportArgs};
