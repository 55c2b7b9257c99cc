use once_cell::sync::Lazy;
use regex::Regex;

pub const FEED_BASE: &str = "https://www.youtube.com/feeds/videos.xml";

static CHANNEL_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"youtube\.com/channel/(UC[\w-]+)").expect("valid regex"));
static USER_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"youtube\.com/(?:user|c)/([\w-]+)").expect("valid regex"));
static VIDEO_ID: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"(?:v=|/videos/)([^&\n?#]+)").expect("valid regex"),
        Regex::new(r"youtu\.be/([^&\n?#]+)").expect("valid regex"),
        Regex::new(r"embed/([^&\n?#]+)").expect("valid regex"),
    ]
});
static WATCH_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?(?:youtube\.com/watch\?v=[\w-]{11}(?:&.*)?|youtu\.be/[\w-]{11})$")
        .expect("valid regex")
});

/// Map a channel source (id, username, channel URL or feed URL) to its RSS feed URL.
pub fn feed_url(source: &str, base: &str) -> String {
    let source = source.trim();
    if source.starts_with("http") && source.contains("feeds/videos.xml") {
        return source.to_string();
    }
    if source.starts_with("UC") {
        return format!("{}?channel_id={}", base, source);
    }
    if !source.starts_with("http") {
        return format!("{}?user={}", base, source);
    }
    if let Some(caps) = CHANNEL_URL.captures(source) {
        return format!("{}?channel_id={}", base, &caps[1]);
    }
    if let Some(caps) = USER_URL.captures(source) {
        return format!("{}?user={}", base, &caps[1]);
    }
    format!("{}?channel_id={}", base, source)
}

/// Extract the video id from watch, short, embed or `/videos/` URLs.
pub fn video_id(url: &str) -> Option<String> {
    VIDEO_ID
        .iter()
        .find_map(|re| re.captures(url).map(|caps| caps[1].to_string()))
}

/// Strict shape check used before generating from a user-supplied URL.
pub fn is_watch_url(url: &str) -> bool {
    WATCH_URL.is_match(url.trim())
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_from_channel_id() {
        assert_eq!(
            feed_url("UCabc123", FEED_BASE),
            "https://www.youtube.com/feeds/videos.xml?channel_id=UCabc123"
        );
    }

    #[test]
    fn test_feed_url_passthrough() {
        let url = "https://www.youtube.com/feeds/videos.xml?channel_id=UCzzz";
        assert_eq!(feed_url(url, FEED_BASE), url);
    }

    #[test]
    fn test_feed_url_from_urls_and_usernames() {
        assert!(feed_url("https://www.youtube.com/channel/UCxyz-9", FEED_BASE).ends_with("?channel_id=UCxyz-9"));
        assert!(feed_url("https://www.youtube.com/user/somebody", FEED_BASE).ends_with("?user=somebody"));
        assert!(feed_url("https://youtube.com/c/custom_name", FEED_BASE).ends_with("?user=custom_name"));
        assert!(feed_url("somebody", FEED_BASE).ends_with("?user=somebody"));
    }

    #[test]
    fn test_video_id_variants() {
        assert_eq!(video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=10").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("https://youtu.be/dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("https://www.youtube.com/embed/dQw4w9WgXcQ").as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(video_id("https://example.com/page"), None);
    }

    #[test]
    fn test_is_watch_url() {
        assert!(is_watch_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_watch_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_watch_url("https://youtube.com/watch?v=dQw4w9WgXcQ&list=PL1"));
        assert!(!is_watch_url("https://www.youtube.com/watch?v=short"));
        assert!(!is_watch_url("https://vimeo.com/12345"));
    }
}
