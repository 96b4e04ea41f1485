//! Boundary to the external extraction engine.

use async_trait::async_trait;
use axum::body::Bytes;
use futures::stream::BoxStream;

use crate::models::{DownloadRequest, VideoMetadata};

pub mod ytdlp;

pub use ytdlp::YtDlpProvider;

/// Media bytes relayed to the client as they arrive.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("extraction engine is not installed")]
    NotInstalled,
    #[error("extraction engine timed out")]
    Timeout,
    #[error("extraction failed: {0}")]
    Failed(String),
    #[error("invalid metadata document: {0}")]
    InvalidResponse(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
    /// Formats come back ordered best-first, without variants that carry
    /// neither audio nor video.
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ProviderError>;

    /// Dropping the returned stream abandons the upstream read.
    async fn open_stream(&self, request: &DownloadRequest) -> Result<ByteStream, ProviderError>;
}
