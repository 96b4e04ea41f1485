use std::{cmp::Ordering, collections::HashSet};

use crate::models::FormatDescriptor;

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
const FALLBACK_FILENAME: &str = "video";

/// Container hint accepted by the quality/format download route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFilter {
    /// mp4 container with a video track.
    Mp4,
    /// Audio-only variants.
    Audio,
}

impl ContainerFilter {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value.map(str::trim).filter(|value| !value.is_empty()) {
            None => Some(Self::Mp4),
            Some(value) if value.eq_ignore_ascii_case("mp4") => Some(Self::Mp4),
            Some(value) if value.eq_ignore_ascii_case("audio") => Some(Self::Audio),
            Some(_) => None,
        }
    }

    pub fn matches(self, format: &FormatDescriptor) -> bool {
        match self {
            Self::Mp4 => format.container == "mp4" && format.has_video,
            Self::Audio => format.is_audio_only(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualityHint {
    Highest,
    Lowest,
    HighestAudio,
    LowestAudio,
    HighestVideo,
    LowestVideo,
    /// A format id or a quality label such as `720p`.
    Exact(String),
}

impl QualityHint {
    pub fn parse(value: Option<&str>) -> Self {
        let value = value.map(str::trim).filter(|value| !value.is_empty());
        match value.map(str::to_ascii_lowercase).as_deref() {
            None | Some("highest") => Self::Highest,
            Some("lowest") => Self::Lowest,
            Some("highestaudio") => Self::HighestAudio,
            Some("lowestaudio") => Self::LowestAudio,
            Some("highestvideo") => Self::HighestVideo,
            Some("lowestvideo") => Self::LowestVideo,
            Some(_) => Self::Exact(value.unwrap_or_default().to_string()),
        }
    }
}

/// Orders formats best-first: variants carrying both video and audio lead,
/// then height, then bitrate, then audio presence. The sort is stable, so
/// equal variants keep the provider's order.
pub fn sort_best_first(formats: &mut [FormatDescriptor]) {
    formats.sort_by(|a, b| {
        is_muxed(b)
            .cmp(&is_muxed(a))
            .then_with(|| compare_video_rank(b, a))
            .then_with(|| b.has_audio.cmp(&a.has_audio))
    });
}

/// Keeps the first format seen for each quality label.
pub fn dedupe_by_quality(formats: &[FormatDescriptor]) -> Vec<FormatDescriptor> {
    let mut seen = HashSet::new();
    formats
        .iter()
        .filter(|format| seen.insert(format.quality_label.clone()))
        .cloned()
        .collect()
}

/// Applies the container filter, then picks a format for the quality hint.
/// `formats` must already be ordered best-first.
pub fn choose_format<'a>(
    formats: &'a [FormatDescriptor],
    quality: &QualityHint,
    filter: ContainerFilter,
) -> Option<&'a FormatDescriptor> {
    let candidates: Vec<&FormatDescriptor> =
        formats.iter().filter(|format| filter.matches(format)).collect();

    match quality {
        QualityHint::Highest => playable(&candidates).first().copied(),
        QualityHint::Lowest => playable(&candidates).last().copied(),
        QualityHint::HighestAudio => candidates
            .iter()
            .copied()
            .filter(|format| format.has_audio)
            .min_by(|a, b| compare_audio_rank(b, a)),
        QualityHint::LowestAudio => candidates
            .iter()
            .copied()
            .filter(|format| format.has_audio)
            .min_by(|a, b| compare_audio_rank(a, b)),
        QualityHint::HighestVideo => candidates
            .iter()
            .copied()
            .filter(|format| format.has_video)
            .min_by(|a, b| compare_video_rank(b, a)),
        QualityHint::LowestVideo => candidates
            .iter()
            .copied()
            .filter(|format| format.has_video)
            .min_by(|a, b| compare_video_rank(a, b)),
        QualityHint::Exact(wanted) => candidates
            .iter()
            .copied()
            .find(|format| format.format_id == *wanted)
            .or_else(|| {
                candidates
                    .iter()
                    .copied()
                    .find(|format| format.quality_label.eq_ignore_ascii_case(wanted))
            }),
    }
}

/// Resolves an explicit format id. When the id is gone from the fresh
/// metadata, falls back to the first format with the same label and container.
pub fn find_format<'a>(
    formats: &'a [FormatDescriptor],
    format_id: &str,
    quality_label: Option<&str>,
    container: Option<&str>,
) -> Option<&'a FormatDescriptor> {
    if let Some(format) = formats.iter().find(|format| format.format_id == format_id) {
        return Some(format);
    }

    let (Some(quality_label), Some(container)) = (quality_label, container) else {
        return None;
    };

    formats
        .iter()
        .find(|format| format.quality_label == quality_label && format.container == container)
}

pub fn attachment_extension(audio_requested: bool, container: &str) -> &'static str {
    if audio_requested {
        return "mp3";
    }

    match container {
        "mp4" => "mp4",
        "webm" => "webm",
        _ => "mp4",
    }
}

/// Keeps only `[A-Za-z0-9 ]` from the title.
pub fn sanitize_title(title: &str) -> String {
    let sanitized: String = title
        .chars()
        .filter(|character| character.is_ascii_alphanumeric() || *character == ' ')
        .collect();

    let compact = sanitized.trim();
    if compact.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        compact.to_string()
    }
}

pub fn attachment_filename(title: &str, extension: &str) -> String {
    format!("{}.{extension}", sanitize_title(title))
}

pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

pub fn content_type_for(format: &FormatDescriptor) -> &'static str {
    match (format.container.to_ascii_lowercase().as_str(), format.has_video) {
        ("mp4", true) => "video/mp4",
        ("webm", true) => "video/webm",
        ("3gp", true) => "video/3gpp",
        ("mp4" | "m4a", false) => "audio/mp4",
        ("webm", false) => "audio/webm",
        ("mp3", false) => "audio/mpeg",
        ("opus" | "ogg", false) => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// `125` -> `2:05`.
pub fn format_duration(seconds: u64) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// `1536` -> `1.5 KB`, `1048576` -> `1 MB`. Absent or zero is `Unknown size`.
pub fn format_file_size(bytes: Option<u64>) -> String {
    let bytes = match bytes {
        Some(bytes) if bytes > 0 => bytes,
        _ => return "Unknown size".to_string(),
    };

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", SIZE_UNITS[unit])
}

fn is_muxed(format: &FormatDescriptor) -> bool {
    format.has_video && format.has_audio
}

/// The muxed candidates when any exist, otherwise all of them.
fn playable<'a>(candidates: &[&'a FormatDescriptor]) -> Vec<&'a FormatDescriptor> {
    let muxed: Vec<&FormatDescriptor> = candidates
        .iter()
        .copied()
        .filter(|format| is_muxed(format))
        .collect();
    if muxed.is_empty() {
        candidates.to_vec()
    } else {
        muxed
    }
}

fn compare_video_rank(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
    a.height
        .unwrap_or_default()
        .cmp(&b.height.unwrap_or_default())
        .then_with(|| compare_bitrate(a, b))
}

fn compare_bitrate(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
    a.bitrate_kbps
        .unwrap_or_default()
        .partial_cmp(&b.bitrate_kbps.unwrap_or_default())
        .unwrap_or(Ordering::Equal)
}

/// Audio-only variants rank above muxed ones at the same bitrate.
fn compare_audio_rank(a: &FormatDescriptor, b: &FormatDescriptor) -> Ordering {
    compare_bitrate(a, b).then_with(|| b.has_video.cmp(&a.has_video))
}
