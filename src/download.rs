//! Local image acquisition.
//!
//! Downloads generated images into a local directory, one at a time and in
//! result order, and derives collision-free filenames from the prompt, seed,
//! image index, and a timestamp.

use crate::error::{Error, Result};
use crate::fal::GenerationOutput;
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Filename prefix shared by all downloaded images.
const FILENAME_PREFIX: &str = "hidream_i1_full";

/// Maximum length of the sanitized prompt fragment in a filename.
const MAX_PROMPT_CHARS: usize = 50;

/// Local record of one remote image, kept whether or not the fetch succeeded.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    /// Source URL of the image
    pub url: String,
    /// Absolute local path, `None` if the download failed
    pub local_path: Option<PathBuf>,
    /// 1-based position within the result
    pub index: usize,
    /// Width in pixels, when reported
    pub width: Option<u32>,
    /// Height in pixels, when reported
    pub height: Option<u32>,
    /// MIME type, when reported
    pub content_type: Option<String>,
    /// Filename assigned by the naming policy
    pub filename: String,
}

/// Fetches remote images into a local directory.
pub struct ImageFetcher {
    http: reqwest::Client,
    dir: PathBuf,
}

impl ImageFetcher {
    /// Create a fetcher writing into `dir` (created on first use).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            dir: dir.into(),
        }
    }

    /// Directory this fetcher writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Download one image to `filename` inside the output directory.
    ///
    /// A non-200 response is a failure. On a write or transport error any
    /// partially written file is removed (best effort) before the error is
    /// returned.
    ///
    /// # Errors
    /// Returns `Error::Download` for HTTP failures and `Error::Io` for file
    /// system failures.
    pub async fn fetch(&self, url: &str, filename: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(filename);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::download(url, e.to_string()))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(Error::download(url, format!("HTTP {}", status.as_u16())));
        }

        let mut file = tokio::fs::File::create(&path).await?;
        let mut response = response;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&path).await;
                    return Err(Error::download(url, e.to_string()));
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e.into());
            }
        }
        if let Err(e) = file.flush().await {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        Ok(std::path::absolute(&path).unwrap_or(path))
    }

    /// Download every image of a result, sequentially and in order.
    ///
    /// Always produces exactly one record per remote image: a failed fetch
    /// degrades its record to `local_path: None` instead of dropping it, and
    /// does not affect the other images.
    pub async fn fetch_all(&self, prompt: &str, output: &GenerationOutput) -> Vec<DownloadedImage> {
        let timestamp = Utc::now();
        let mut records = Vec::with_capacity(output.images.len());

        for (i, image) in output.images.iter().enumerate() {
            let index = i + 1;
            let filename = image_filename(prompt, index, output.seed, &timestamp);
            let local_path = match self.fetch(&image.url, &filename).await {
                Ok(path) => {
                    info!(filename = %filename, "Downloaded image");
                    Some(path)
                }
                Err(e) => {
                    warn!(index, error = %e, "Failed to download image");
                    None
                }
            };
            records.push(DownloadedImage {
                url: image.url.clone(),
                local_path,
                index,
                width: image.width,
                height: image.height,
                content_type: image.content_type.clone(),
                filename,
            });
        }

        records
    }
}

/// Derive the filename for one downloaded image.
///
/// The prompt is lower-cased, stripped of everything but ASCII alphanumerics
/// and whitespace, whitespace-collapsed to underscores, and truncated to 50
/// characters. The seed (when present, including 0), the 1-based image index,
/// and a colon/period-free UTC timestamp keep repeated calls from colliding.
/// The extension is always `.jpg`.
pub fn image_filename(
    prompt: &str,
    index: usize,
    seed: Option<u64>,
    timestamp: &DateTime<Utc>,
) -> String {
    let stripped: String = prompt
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join("_");
    let safe: String = collapsed.chars().take(MAX_PROMPT_CHARS).collect();

    let stamp = timestamp
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");

    match seed {
        Some(seed) => format!("{FILENAME_PREFIX}_{safe}_{seed}_{index}_{stamp}.jpg"),
        None => format!("{FILENAME_PREFIX}_{safe}_{index}_{stamp}.jpg"),
    }
}
