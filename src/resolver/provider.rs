use std::fmt::Display;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::pipeline::types::Segment;

#[derive(Debug)]
pub enum ProviderError {
    /// No transcript track exists for the video (disabled or never created).
    Unavailable(String),
    Http(String),
    Malformed(String),
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Unavailable(msg) => write!(f, "transcript unavailable: {}", msg),
            ProviderError::Http(msg) => write!(f, "transcript request failed: {}", msg),
            ProviderError::Malformed(msg) => write!(f, "malformed transcript payload: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, Clone)]
pub struct ProviderTranscript {
    pub text: String,
    pub segments: Vec<Segment>,
}

#[async_trait]
pub trait TranscriptProvider: Send + Sync + 'static {
    async fn fetch(&self, video_id: &str, language: &str)
        -> Result<ProviderTranscript, ProviderError>;
}

/// Fetches the timedtext caption track YouTube serves for videos with
/// transcripts enabled (json3 format).
pub struct YouTubeTranscriptProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TimedText {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(rename = "tStartMs")]
    start_ms: Option<u64>,
    #[serde(rename = "dDurationMs")]
    duration_ms: Option<u64>,
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

impl YouTubeTranscriptProvider {
    pub fn new() -> Self {
        Self::with_base_url("https://www.youtube.com".to_string())
    }

    pub fn with_base_url(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    fn parse(body: &str) -> Result<ProviderTranscript, ProviderError> {
        let timed: TimedText =
            serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

        let mut segments = Vec::new();
        for event in timed.events {
            let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            let text = text.trim().to_string();
            if text.is_empty() {
                continue;
            }
            let start = event.start_ms.unwrap_or(0) as f64 / 1000.0;
            let end = start + event.duration_ms.unwrap_or(0) as f64 / 1000.0;
            segments.push(Segment { text, start, end });
        }

        if segments.is_empty() {
            return Err(ProviderError::Unavailable(
                "no caption events in transcript track".to_string(),
            ));
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        Ok(ProviderTranscript { text, segments })
    }
}

impl Default for YouTubeTranscriptProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptProvider for YouTubeTranscriptProvider {
    async fn fetch(
        &self,
        video_id: &str,
        language: &str,
    ) -> Result<ProviderTranscript, ProviderError> {
        let url = format!(
            "{}/api/timedtext?v={}&lang={}&fmt=json3",
            self.base_url, video_id, language
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Http(format!(
                "status {} for video {}",
                response.status(),
                video_id
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Http(e.to_string()))?;

        // YouTube answers 200 with an empty body when captions are disabled
        if body.trim().is_empty() {
            return Err(ProviderError::Unavailable(format!(
                "transcripts are disabled for video {}",
                video_id
            )));
        }

        let transcript = Self::parse(&body)?;
        info!(
            "Got provider transcript for video {} ({} segments)",
            video_id,
            transcript.segments.len()
        );
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json3_payload() {
        let body = r#"{
            "events": [
                {"tStartMs": 0, "dDurationMs": 1500, "segs": [{"utf8": "hello "}, {"utf8": "world"}]},
                {"tStartMs": 1500, "dDurationMs": 0, "segs": [{"utf8": "\n"}]},
                {"tStartMs": 2000, "dDurationMs": 1000, "segs": [{"utf8": "again"}]}
            ]
        }"#;

        let transcript = YouTubeTranscriptProvider::parse(body).unwrap();
        assert_eq!(transcript.text, "hello world again");
        assert_eq!(transcript.segments.len(), 2);
        assert_eq!(transcript.segments[0].start, 0.0);
        assert_eq!(transcript.segments[0].end, 1.5);
        assert_eq!(transcript.segments[1].text, "again");
    }

    #[test]
    fn test_parse_empty_events_is_unavailable() {
        let err = YouTubeTranscriptProvider::parse(r#"{"events": []}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = YouTubeTranscriptProvider::parse("<!doctype html>").unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }
}
