//! Media URL Extractor
//!
//! Pulls the single supported post link out of a chat message.

use regex::Regex;
use std::sync::LazyLock;

/// Regex pattern for supported post links
/// Matches Instagram reels, posts and IGTV links, with or without `www.`
static MEDIA_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)https?://(?:www\.)?instagram\.com/(?:reels?|p|tv)/[^\s<>]+")
        .expect("Invalid media URL regex")
});

/// Extract the first supported media URL from message text
///
/// Returns `None` when the text contains no supported link. Later links are ignored.
///
/// # Examples
/// ```
/// use media_relay_service::services::extract_media_url;
///
/// let text = "look https://www.instagram.com/reel/Cx1/ and https://instagram.com/p/Zz9/";
/// assert_eq!(
///     extract_media_url(text).as_deref(),
///     Some("https://www.instagram.com/reel/Cx1/")
/// );
/// assert_eq!(extract_media_url("no links here"), None);
/// ```
pub fn extract_media_url(text: &str) -> Option<String> {
    MEDIA_URL_REGEX
        .find(text)
        .map(|m| m.as_str().trim_end_matches([',', '.', ')', '!', '?']).to_string())
}
