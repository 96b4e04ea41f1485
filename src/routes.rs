use axum::{
    Json,
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderValue,
        header::{CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt, future, stream};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::{
    AppState,
    config::non_empty,
    error::ApiError,
    formats::{
        ContainerFilter, QualityHint, attachment_extension, attachment_filename, choose_format,
        content_disposition, content_type_for, dedupe_by_quality, find_format, format_duration,
    },
    models::{DownloadRequest, VideoInfoResponse, VideoMetadata},
    source_url::is_valid_source_url,
};

const URL_REQUIRED: &str = "URL is required";
const URL_AND_ITAG_REQUIRED: &str = "URL and itag are required";
const INVALID_URL: &str = "Invalid YouTube URL";
const INFO_FAILED: &str = "Failed to get video information";
const DOWNLOAD_FAILED: &str = "Download failed";

#[derive(Debug, Deserialize)]
pub struct VideoInfoQuery {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    url: Option<String>,
    quality: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProgressiveQuery {
    url: Option<String>,
    itag: Option<String>,
    /// Descriptor hints used when `itag` no longer appears in fresh metadata.
    quality: Option<String>,
    container: Option<String>,
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn video_info(
    State(state): State<AppState>,
    Query(query): Query<VideoInfoQuery>,
) -> Result<Json<VideoInfoResponse>, ApiError> {
    let url = non_empty_param(query.url.as_deref())
        .ok_or_else(|| ApiError::bad_request(URL_REQUIRED))?;
    validate_source_url(url)?;

    let metadata = state.provider.fetch_metadata(url).await.map_err(|error| {
        error!("Error getting video info for {url:?}: {error}");
        ApiError::internal(INFO_FAILED)
    })?;

    let formats = dedupe_by_quality(&metadata.formats);
    info!(
        "Video info for {url:?}: {:?} ({}), {} quality option(s) from {} format(s)",
        metadata.title,
        format_duration(metadata.duration_seconds),
        formats.len(),
        metadata.formats.len()
    );

    Ok(Json(VideoInfoResponse::new(&metadata, &formats)))
}

pub async fn download(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let url = non_empty_param(query.url.as_deref())
        .ok_or_else(|| ApiError::bad_request(URL_REQUIRED))?;
    validate_source_url(url)?;

    let filter = ContainerFilter::parse(query.format.as_deref())
        .ok_or_else(|| ApiError::bad_request("Unsupported format"))?;
    let quality = QualityHint::parse(query.quality.as_deref());

    let metadata = fetch_for_download(&state, url).await?;
    let format = choose_format(&metadata.formats, &quality, filter).ok_or_else(|| {
        warn!("No format for {url:?} matches quality {quality:?} with filter {filter:?}");
        ApiError::format_unavailable()
    })?;

    let extension = attachment_extension(filter == ContainerFilter::Audio, &format.container);
    let request = DownloadRequest {
        source_url: url.to_string(),
        format: format.clone(),
    };

    stream_download(&state, request, &metadata.title, extension).await
}

pub async fn download_progressive(
    State(state): State<AppState>,
    Query(query): Query<ProgressiveQuery>,
) -> Result<Response, ApiError> {
    let (Some(url), Some(itag)) = (
        non_empty_param(query.url.as_deref()),
        non_empty_param(query.itag.as_deref()),
    ) else {
        return Err(ApiError::bad_request(URL_AND_ITAG_REQUIRED));
    };
    validate_source_url(url)?;

    let metadata = fetch_for_download(&state, url).await?;
    let format = find_format(
        &metadata.formats,
        itag,
        non_empty_param(query.quality.as_deref()),
        non_empty_param(query.container.as_deref()),
    )
    .ok_or_else(|| {
        warn!("Format {itag:?} is not available for {url:?}");
        ApiError::format_unavailable()
    })?;

    if format.format_id != itag {
        info!(
            "Format {itag:?} is gone for {url:?}, using {:?} with the same quality and container",
            format.format_id
        );
    }

    let extension = attachment_extension(false, &format.container);
    let request = DownloadRequest {
        source_url: url.to_string(),
        format: format.clone(),
    };

    stream_download(&state, request, &metadata.title, extension).await
}

async fn fetch_for_download(state: &AppState, url: &str) -> Result<VideoMetadata, ApiError> {
    state.provider.fetch_metadata(url).await.map_err(|error| {
        error!("Download error while resolving {url:?}: {error}");
        ApiError::internal(DOWNLOAD_FAILED)
    })
}

/// Waits for the first chunk before committing the response, so an upstream
/// failure still becomes a 500. Later failures only cut the body short.
async fn stream_download(
    state: &AppState,
    request: DownloadRequest,
    title: &str,
    extension: &str,
) -> Result<Response, ApiError> {
    let filename = attachment_filename(title, extension);
    let content_type = content_type_for(&request.format);
    let format_id = request.format.format_id.clone();

    let mut upstream = state.provider.open_stream(&request).await.map_err(|error| {
        error!(
            "Could not open stream for format {format_id} of {:?}: {error}",
            request.source_url
        );
        ApiError::internal(DOWNLOAD_FAILED)
    })?;

    let first_chunk = match upstream.next().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(error)) => {
            error!(
                "Stream for format {format_id} of {:?} failed before any byte: {error}",
                request.source_url
            );
            return Err(ApiError::internal(DOWNLOAD_FAILED));
        }
        None => {
            error!(
                "Stream for format {format_id} of {:?} ended without data",
                request.source_url
            );
            return Err(ApiError::internal(DOWNLOAD_FAILED));
        }
    };

    let body = stream::once(future::ready(Ok(first_chunk)))
        .chain(upstream)
        .inspect_err(move |error| {
            warn!("Download of format {format_id} ended early: {error}");
        });

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&filename))
            .map_err(|_| ApiError::internal(DOWNLOAD_FAILED))?,
    );

    info!(
        "Streaming {filename:?} (format {}) from {:?}",
        request.format.format_id, request.source_url
    );

    Ok((headers, Body::from_stream(body)).into_response())
}

fn non_empty_param(value: Option<&str>) -> Option<&str> {
    value.and_then(non_empty)
}

fn validate_source_url(url: &str) -> Result<(), ApiError> {
    if is_valid_source_url(url) {
        Ok(())
    } else {
        Err(ApiError::bad_request(INVALID_URL))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::{body::Bytes, http::StatusCode};

    use super::*;
    use crate::{
        error::FORMAT_UNAVAILABLE,
        models::FormatDescriptor,
        provider::{ByteStream, ProviderError, VideoProvider},
    };

    const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[derive(Default)]
    struct FakeProvider {
        fail_metadata: bool,
        fail_stream: bool,
        fail_mid_stream: bool,
        opened: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VideoProvider for FakeProvider {
        async fn fetch_metadata(&self, _url: &str) -> Result<VideoMetadata, ProviderError> {
            if self.fail_metadata {
                return Err(ProviderError::Failed("ERROR: Sign in to confirm".to_string()));
            }
            Ok(sample_metadata())
        }

        async fn open_stream(&self, request: &DownloadRequest) -> Result<ByteStream, ProviderError> {
            self.opened
                .lock()
                .unwrap()
                .push(request.format.format_id.clone());

            let chunks: Vec<std::io::Result<Bytes>> = if self.fail_stream {
                vec![Err(std::io::Error::other("connection reset"))]
            } else if self.fail_mid_stream {
                vec![
                    Ok(Bytes::from_static(b"ab")),
                    Err(std::io::Error::other("yt-dlp exited with exit status: 1")),
                ]
            } else {
                vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"def"))]
            };
            Ok(stream::iter(chunks).boxed())
        }
    }

    fn descriptor(
        id: &str,
        label: &str,
        container: &str,
        video: bool,
        audio: bool,
    ) -> FormatDescriptor {
        FormatDescriptor {
            format_id: id.to_string(),
            quality_label: label.to_string(),
            container: container.to_string(),
            has_video: video,
            has_audio: audio,
            content_length: Some(1_048_576),
            height: None,
            bitrate_kbps: None,
        }
    }

    fn sample_metadata() -> VideoMetadata {
        VideoMetadata {
            title: "Lo-fi Beats: 24/7 🎧".to_string(),
            author: "Chill Channel".to_string(),
            duration_seconds: 125,
            thumbnail_url: "https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg".to_string(),
            formats: vec![
                descriptor("22", "720p", "mp4", true, true),
                descriptor("43", "360p", "webm", true, true),
                descriptor("137", "1080p", "mp4", true, false),
                descriptor("248", "1080p", "webm", true, false),
                descriptor("251", "audio", "webm", false, true),
                descriptor("140", "audio", "m4a", false, true),
            ],
        }
    }

    fn state_with(provider: FakeProvider) -> (AppState, Arc<FakeProvider>) {
        let provider = Arc::new(provider);
        let state = AppState {
            provider: provider.clone(),
        };
        (state, provider)
    }

    fn info_query(url: Option<&str>) -> Query<VideoInfoQuery> {
        Query(VideoInfoQuery {
            url: url.map(ToString::to_string),
        })
    }

    fn download_query(quality: Option<&str>, format: Option<&str>) -> Query<DownloadQuery> {
        Query(DownloadQuery {
            url: Some(VIDEO_URL.to_string()),
            quality: quality.map(ToString::to_string),
            format: format.map(ToString::to_string),
        })
    }

    fn progressive_query(
        itag: Option<&str>,
        quality: Option<&str>,
        container: Option<&str>,
    ) -> Query<ProgressiveQuery> {
        Query(ProgressiveQuery {
            url: Some(VIDEO_URL.to_string()),
            itag: itag.map(ToString::to_string),
            quality: quality.map(ToString::to_string),
            container: container.map(ToString::to_string),
        })
    }

    fn header(response: &Response, name: axum::http::HeaderName) -> String {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    }

    async fn body_bytes(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn missing_url_is_rejected_everywhere() {
        let (state, provider) = state_with(FakeProvider::default());

        for url in [None, Some(""), Some("   ")] {
            let error = video_info(State(state.clone()), info_query(url))
                .await
                .unwrap_err();
            assert_eq!(error.status, StatusCode::BAD_REQUEST);
            assert_eq!(error.message, URL_REQUIRED);
        }

        let error = download(
            State(state.clone()),
            Query(DownloadQuery {
                url: None,
                quality: None,
                format: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert!(!error.message.is_empty());

        let error = download_progressive(
            State(state),
            Query(ProgressiveQuery {
                url: None,
                itag: Some("22".to_string()),
                quality: None,
                container: None,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, URL_AND_ITAG_REQUIRED);

        assert!(provider.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_with_json_error() {
        let (state, _) = state_with(FakeProvider::default());

        let error = video_info(State(state.clone()), info_query(Some("https://vimeo.com/123")))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let response = download(
            State(state),
            Query(DownloadQuery {
                url: Some("youtube".to_string()),
                quality: None,
                format: None,
            }),
        )
        .await
        .unwrap_err()
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["error"], INVALID_URL);
    }

    #[tokio::test]
    async fn provider_failure_is_opaque() {
        let (state, _) = state_with(FakeProvider {
            fail_metadata: true,
            ..FakeProvider::default()
        });

        let error = video_info(State(state.clone()), info_query(Some(VIDEO_URL)))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, INFO_FAILED);

        let error = download(State(state), download_query(None, None))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn video_info_dedupes_quality_labels() {
        let (state, _) = state_with(FakeProvider::default());

        let Json(info) = video_info(State(state), info_query(Some(VIDEO_URL)))
            .await
            .unwrap();
        assert_eq!(info.title, "Lo-fi Beats: 24/7 🎧");
        assert_eq!(info.author, "Chill Channel");
        assert_eq!(info.duration, 125);

        let options: Vec<_> = info
            .formats
            .iter()
            .map(|f| (f.quality.as_str(), f.itag.as_str()))
            .collect();
        assert_eq!(
            options,
            vec![("720p", "22"), ("360p", "43"), ("1080p", "137"), ("audio", "251")]
        );
        assert!(info.formats[0].has_audio && info.formats[0].has_video);
        assert_eq!(info.formats[0].label, "720p (mp4) - 1 MB");
    }

    #[tokio::test]
    async fn download_defaults_to_best_muxed_mp4() {
        let (state, provider) = state_with(FakeProvider::default());

        let response = download(State(state), download_query(None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, CONTENT_DISPOSITION),
            "attachment; filename=\"Lofi Beats 247.mp4\""
        );
        assert_eq!(header(&response, CONTENT_TYPE), "video/mp4");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"abcdef"));
        assert_eq!(*provider.opened.lock().unwrap(), vec!["22".to_string()]);
    }

    #[tokio::test]
    async fn highestvideo_hint_reaches_video_only_variant() {
        let (state, provider) = state_with(FakeProvider::default());

        let response = download(State(state), download_query(Some("highestvideo"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*provider.opened.lock().unwrap(), vec!["137".to_string()]);
    }

    #[tokio::test]
    async fn audio_mode_names_file_mp3() {
        let (state, provider) = state_with(FakeProvider::default());

        let response = download(State(state), download_query(Some("lowest"), Some("audio")))
            .await
            .unwrap();
        assert_eq!(
            header(&response, CONTENT_DISPOSITION),
            "attachment; filename=\"Lofi Beats 247.mp3\""
        );
        assert_eq!(header(&response, CONTENT_TYPE), "audio/mp4");
        assert_eq!(*provider.opened.lock().unwrap(), vec!["140".to_string()]);
    }

    #[tokio::test]
    async fn download_rejects_unknown_selectors() {
        let (state, _) = state_with(FakeProvider::default());

        let error = download(State(state.clone()), download_query(None, Some("mkv")))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);

        let error = download(State(state), download_query(Some("4320p"), None))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, FORMAT_UNAVAILABLE);
    }

    #[tokio::test]
    async fn progressive_streams_exact_format() {
        let (state, provider) = state_with(FakeProvider::default());

        let response = download_progressive(State(state), progressive_query(Some("43"), None, None))
            .await
            .unwrap();
        assert_eq!(
            header(&response, CONTENT_DISPOSITION),
            "attachment; filename=\"Lofi Beats 247.webm\""
        );
        assert_eq!(header(&response, CONTENT_TYPE), "video/webm");
        assert_eq!(body_bytes(response).await, Bytes::from_static(b"abcdef"));
        assert_eq!(*provider.opened.lock().unwrap(), vec!["43".to_string()]);
    }

    #[tokio::test]
    async fn progressive_unknown_itag_is_unavailable() {
        let (state, provider) = state_with(FakeProvider::default());

        let error = download_progressive(
            State(state.clone()),
            progressive_query(Some("999"), None, None),
        )
        .await
        .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, FORMAT_UNAVAILABLE);

        let error = download_progressive(State(state), progressive_query(None, None, None))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
        assert_eq!(error.message, URL_AND_ITAG_REQUIRED);

        assert!(provider.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn progressive_falls_back_to_descriptor_hints() {
        let (state, provider) = state_with(FakeProvider::default());

        let response = download_progressive(
            State(state),
            progressive_query(Some("999"), Some("1080p"), Some("webm")),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*provider.opened.lock().unwrap(), vec!["248".to_string()]);
    }

    #[tokio::test]
    async fn stream_failure_before_first_byte_is_server_error() {
        let (state, _) = state_with(FakeProvider {
            fail_stream: true,
            ..FakeProvider::default()
        });

        let error = download_progressive(State(state), progressive_query(Some("22"), None, None))
            .await
            .unwrap_err();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.message, DOWNLOAD_FAILED);
    }

    #[tokio::test]
    async fn stream_failure_after_first_byte_cuts_body() {
        let (state, _) = state_with(FakeProvider {
            fail_mid_stream: true,
            ..FakeProvider::default()
        });

        let response = download_progressive(State(state), progressive_query(Some("22"), None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, CONTENT_DISPOSITION),
            "attachment; filename=\"Lofi Beats 247.mp4\""
        );
        assert!(
            axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }
}
