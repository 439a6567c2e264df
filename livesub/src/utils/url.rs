//! URL helpers.

use url::Url;

/// Base of the YouTube channel video feed used as a WebSub topic.
pub const YOUTUBE_FEED_BASE: &str = "https://www.youtube.com/xml/feeds/videos.xml";

/// Extracts the `channel_id` query parameter from a topic URL.
///
/// Returns an empty string when the URL is invalid or carries no such parameter.
pub fn extract_channel_id(topic: &str) -> String {
    let Ok(url) = Url::parse(topic.trim()) else {
        return String::new();
    };

    url.query_pairs()
        .find(|(key, _)| key == "channel_id")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

/// The canonical feed topic for a YouTube channel.
pub fn youtube_topic(channel_id: &str) -> String {
    format!("{YOUTUBE_FEED_BASE}?channel_id={channel_id}")
}

/// Whether `url` parses with an `https` scheme.
pub fn is_https(url: &str) -> bool {
    Url::parse(url.trim())
        .map(|u| u.scheme() == "https")
        .unwrap_or(false)
}

/// The path component of an absolute URL, `None` if it does not parse.
pub fn path_of(url: &str) -> Option<String> {
    Url::parse(url.trim()).ok().map(|u| u.path().to_string())
}
