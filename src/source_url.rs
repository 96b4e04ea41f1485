//! Recognition of the video platform's URL shapes.

use url::Url;

const QUERY_DOMAINS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "gaming.youtube.com",
];

const PATH_DOMAINS: [&str; 2] = ["youtube.com", "www.youtube.com"];
const PATH_PREFIXES: [&str; 4] = ["embed", "v", "shorts", "live"];
const SHORT_LINK_DOMAIN: &str = "youtu.be";

const VIDEO_ID_LEN: usize = 11;

/// Extracts the video id from a watch, short-link, embed, shorts or live URL.
pub fn extract_video_id(input: &str) -> Option<String> {
    let parsed = Url::parse(input.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let mut segments = parsed
        .path_segments()
        .map(|segments| segments.filter(|segment| !segment.is_empty()).collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter();

    let candidate = if host == SHORT_LINK_DOMAIN {
        segments.next().map(ToString::to_string)
    } else if PATH_DOMAINS.contains(&host.as_str())
        && let Some(prefix) = segments.next()
        && PATH_PREFIXES.contains(&prefix)
    {
        segments.next().map(ToString::to_string)
    } else if QUERY_DOMAINS.contains(&host.as_str()) {
        parsed
            .query_pairs()
            .find(|(key, _)| key == "v")
            .map(|(_, value)| value.trim().to_string())
    } else {
        None
    };

    candidate.filter(|id| is_valid_video_id(id))
}

pub fn is_valid_source_url(input: &str) -> bool {
    extract_video_id(input).is_some()
}

fn is_valid_video_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'))
}
