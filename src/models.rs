use serde::Serialize;

use crate::formats::format_file_size;

/// Normalized metadata for one source video. Built per request, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
    pub thumbnail_url: String,
    pub formats: Vec<FormatDescriptor>,
}

/// One concrete encoded variant of a video.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    pub format_id: String,
    pub quality_label: String,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub content_length: Option<u64>,
    /// Ranking only, never sent to clients.
    pub height: Option<u32>,
    pub bitrate_kbps: Option<f64>,
}

impl FormatDescriptor {
    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    /// Option text shown by clients: `720p (mp4) - 1.5 MB`.
    pub fn option_label(&self) -> String {
        format!(
            "{} ({}) - {}",
            self.quality_label,
            self.container,
            format_file_size(self.content_length)
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInfoResponse {
    pub title: String,
    pub duration: u64,
    pub thumbnail: String,
    pub author: String,
    pub formats: Vec<FormatResponse>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormatResponse {
    pub quality: String,
    pub container: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub itag: String,
    pub content_length: Option<u64>,
    pub label: String,
}

impl From<&FormatDescriptor> for FormatResponse {
    fn from(format: &FormatDescriptor) -> Self {
        Self {
            quality: format.quality_label.clone(),
            container: format.container.clone(),
            has_video: format.has_video,
            has_audio: format.has_audio,
            itag: format.format_id.clone(),
            content_length: format.content_length,
            label: format.option_label(),
        }
    }
}

impl VideoInfoResponse {
    pub fn new(metadata: &VideoMetadata, formats: &[FormatDescriptor]) -> Self {
        Self {
            title: metadata.title.clone(),
            duration: metadata.duration_seconds,
            thumbnail: metadata.thumbnail_url.clone(),
            author: metadata.author.clone(),
            formats: formats.iter().map(FormatResponse::from).collect(),
        }
    }
}

/// A resolved download: the source plus the exact format to stream.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub source_url: String,
    pub format: FormatDescriptor,
}
