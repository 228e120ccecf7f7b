pub mod provider;

pub use provider::{ProviderError, ProviderTranscript, TranscriptProvider, YouTubeTranscriptProvider};

/// Extracts a YouTube video id from the URL forms we accept: standard watch
/// links, youtu.be short links, embed links and shorts links. Matchers are
/// tried in order and the first hit wins; the id runs until a URL delimiter.
/// Borrows from the input, no allocation.
pub fn extract_video_id(url: &str) -> Option<&str> {
    const MARKERS: [&str; 4] = [
        "youtube.com/watch?v=",
        "youtu.be/",
        "youtube.com/embed/",
        "youtube.com/shorts/",
    ];

    for marker in MARKERS {
        if let Some(pos) = url.find(marker) {
            let rest = &url[pos + marker.len()..];
            let end = rest
                .find(['&', '?', '#', '\n', '/'])
                .unwrap_or(rest.len());
            if end > 0 {
                return Some(&rest[..end]);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_extract_short_url() {
        assert_eq!(extract_video_id("https://youtu.be/abc123"), Some("abc123"));
    }

    #[test]
    fn test_all_url_shapes_agree() {
        let urls = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
        ];
        for url in urls {
            assert_eq!(extract_video_id(url), Some("dQw4w9WgXcQ"), "url: {}", url);
        }
    }

    #[test]
    fn test_trailing_params_stripped() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42s"),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?si=share"),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn test_unrecognized_url() {
        assert_eq!(extract_video_id("https://vimeo.com/12345"), None);
        assert_eq!(extract_video_id("not a url"), None);
        assert_eq!(extract_video_id("https://youtu.be/"), None);
    }
}
