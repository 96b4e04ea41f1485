use std::{io::ErrorKind, process::Stdio, time::Duration};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{ChildStderr, Command},
    time::timeout,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{ByteStream, ProviderError, VideoProvider};
use crate::{
    formats::sort_best_first,
    models::{DownloadRequest, FormatDescriptor, VideoMetadata},
};

const UNKNOWN_AUTHOR: &str = "Unknown";
const UNTITLED: &str = "Untitled";
const AUDIO_LABEL: &str = "audio";

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    title: Option<String>,
    uploader: Option<String>,
    channel: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    thumbnails: Vec<YtDlpThumbnail>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpThumbnail {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<u32>,
    fps: Option<f32>,
    format_note: Option<String>,
    tbr: Option<f64>,
    abr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

/// Drives the `yt-dlp` executable: `-J` for metadata, `-o -` for bytes.
#[derive(Debug, Clone)]
pub struct YtDlpProvider {
    binary: String,
    metadata_timeout: Duration,
}

impl YtDlpProvider {
    pub fn new(binary: impl Into<String>, metadata_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            metadata_timeout,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<std::process::Output, ProviderError> {
        let command_future = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = timeout(self.metadata_timeout, command_future)
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(spawn_error)?;

        if !output.status.success() {
            return Err(ProviderError::Failed(run_error_message(&output.stderr)));
        }

        Ok(output)
    }
}

#[async_trait]
impl VideoProvider for YtDlpProvider {
    async fn fetch_metadata(&self, url: &str) -> Result<VideoMetadata, ProviderError> {
        let output = self
            .run(&["-J", "--no-playlist", "--no-warnings", "--", url])
            .await?;
        let info: YtDlpVideoInfo = serde_json::from_slice(&output.stdout)?;
        Ok(metadata_from_info(info))
    }

    async fn open_stream(&self, request: &DownloadRequest) -> Result<ByteStream, ProviderError> {
        let format_id = request.format.format_id.as_str();
        let mut child = Command::new(&self.binary)
            .args([
                "--no-playlist",
                "--no-warnings",
                "--no-progress",
                "--quiet",
                "-f",
                format_id,
                "-o",
                "-",
                "--",
                request.source_url.as_str(),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Failed("yt-dlp stdout was not captured".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, format_id.to_string()));
        }

        debug!("yt-dlp streaming format {format_id} of {}", request.source_url);

        // The child travels with the stream so that dropping the body kills it.
        let stream = stream::unfold(Some((ReaderStream::new(stdout), child)), |state| async move {
            let (mut reader, mut child) = state?;
            match reader.next().await {
                Some(chunk) => Some((chunk, Some((reader, child)))),
                None => match child.wait().await {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some((
                        Err(std::io::Error::other(format!("yt-dlp exited with {status}"))),
                        None,
                    )),
                    Err(error) => Some((Err(error), None)),
                },
            }
        });

        Ok(stream.boxed())
    }
}

fn metadata_from_info(info: YtDlpVideoInfo) -> VideoMetadata {
    let thumbnail_url = info
        .thumbnail
        .or_else(|| info.thumbnails.into_iter().rev().find_map(|thumb| thumb.url))
        .unwrap_or_default();

    let mut formats: Vec<FormatDescriptor> = info
        .formats
        .iter()
        .filter(|item| has_video(item) || has_audio(item))
        .map(descriptor_from_format)
        .collect();
    sort_best_first(&mut formats);

    VideoMetadata {
        title: non_blank(info.title).unwrap_or_else(|| UNTITLED.to_string()),
        author: non_blank(info.uploader)
            .or_else(|| non_blank(info.channel))
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
        duration_seconds: info
            .duration
            .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
            .map(|seconds| seconds.round() as u64)
            .unwrap_or_default(),
        thumbnail_url,
        formats,
    }
}

fn descriptor_from_format(item: &YtDlpFormat) -> FormatDescriptor {
    let has_video = has_video(item);
    let has_audio = has_audio(item);

    let quality_label = if has_video {
        item.height
            .map(|height| match item.fps {
                Some(fps) if fps > 30.0 => format!("{height}p{}", fps.round() as u32),
                _ => format!("{height}p"),
            })
            .or_else(|| item.format_note.clone())
            .unwrap_or_else(|| "video".to_string())
    } else {
        AUDIO_LABEL.to_string()
    };

    let bitrate_kbps = if has_video {
        item.tbr
    } else {
        item.abr.or(item.tbr)
    };

    FormatDescriptor {
        format_id: item.format_id.clone(),
        quality_label,
        container: item.ext.clone().unwrap_or_default(),
        has_video,
        has_audio,
        content_length: item
            .filesize
            .or(item.filesize_approx)
            .filter(|bytes| *bytes > 0.0)
            .map(|bytes| bytes as u64),
        height: item.height.filter(|_| has_video),
        bitrate_kbps,
    }
}

async fn log_stderr(stderr: ChildStderr, format_id: String) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => {
                warn!("yt-dlp (format {format_id}): {}", line.trim());
            }
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(error) => {
                debug!("stopped reading yt-dlp stderr: {error}");
                break;
            }
        }
    }
}

fn spawn_error(error: std::io::Error) -> ProviderError {
    if error.kind() == ErrorKind::NotFound {
        ProviderError::NotInstalled
    } else {
        ProviderError::Io(error)
    }
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the operation")
        .to_string()
}

fn has_video(format: &YtDlpFormat) -> bool {
    matches!(format.vcodec.as_deref(), Some(value) if value != "none")
}

fn has_audio(format: &YtDlpFormat) -> bool {
    matches!(format.acodec.as_deref(), Some(value) if value != "none")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
