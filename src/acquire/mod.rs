//! Audio acquisition via yt-dlp. Downloads bestaudio, extracts to 16 kHz
//! mono wav through ffmpeg, and reports fractional download progress
//! parsed from yt-dlp's `--newline` output.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::YTDLP_BIN;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadProgress {
    pub percent: f32,
    pub download_speed: Option<String>,
    pub eta: Option<String>,
}

/// Downloads the audio track of `url` to `dest` (a `.wav` path). On any
/// failure the destination and every intermediate artifact sharing its stem
/// are removed before the error is returned; a failed acquisition leaves no
/// partial files behind.
pub async fn acquire_audio(
    url: &str,
    dest: &Path,
    on_progress: impl FnMut(DownloadProgress),
) -> Result<()> {
    run_download(&YTDLP_BIN, url, dest, on_progress).await
}

pub(crate) async fn run_download(
    bin: &str,
    url: &str,
    dest: &Path,
    mut on_progress: impl FnMut(DownloadProgress),
) -> Result<()> {
    let result = spawn_ytdlp(bin, url, dest, &mut on_progress).await;

    match result {
        Ok(()) => {
            let size = std::fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                cleanup_partials(dest);
                bail!("download produced no audio at {}", dest.display());
            }
            info!("Downloaded audio to {} ({} bytes)", dest.display(), size);
            on_progress(DownloadProgress {
                percent: 100.0,
                ..Default::default()
            });
            Ok(())
        }
        Err(e) => {
            cleanup_partials(dest);
            Err(e)
        }
    }
}

async fn spawn_ytdlp(
    bin: &str,
    url: &str,
    dest: &Path,
    on_progress: &mut impl FnMut(DownloadProgress),
) -> Result<()> {
    // yt-dlp appends the extension itself, so hand it a stem template
    let template = format!("{}.%(ext)s", dest.with_extension("").display());

    let mut child = Command::new(bin)
        .args(["-f", "bestaudio/best"])
        .args(["--extract-audio", "--audio-format", "wav"])
        .args(["--postprocessor-args", "ffmpeg:-ar 16000 -ac 1"])
        .args(["--no-playlist", "--newline"])
        .args(["-o", &template])
        .arg(url)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run {}", bin))?;

    if let Some(stdout) = child.stdout.take() {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(progress) = parse_progress_line(&line) {
                on_progress(progress);
            }
        }
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("failed to wait for {}", bin))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "{} exited with {}: {}",
            bin,
            output.status,
            stderr.trim().lines().last().unwrap_or("no output")
        );
    }

    Ok(())
}

/// Parses one `--newline` progress line, e.g.
/// `[download]  42.1% of 4.50MiB at 1.23MiB/s ETA 00:12`.
pub(crate) fn parse_progress_line(line: &str) -> Option<DownloadProgress> {
    let rest = line.strip_prefix("[download]")?.trim();
    let mut tokens = rest.split_whitespace();

    let percent_token = tokens.next()?;
    let percent: f32 = percent_token.strip_suffix('%')?.parse().ok()?;

    let mut download_speed = None;
    let mut eta = None;
    let mut tokens = tokens.peekable();
    while let Some(token) = tokens.next() {
        match token {
            "at" => {
                download_speed = tokens
                    .next()
                    .filter(|s| !s.starts_with("Unknown"))
                    .map(|s| s.to_string());
            }
            "ETA" => {
                eta = tokens
                    .next()
                    .filter(|s| !s.starts_with("Unknown"))
                    .map(|s| s.to_string());
            }
            _ => {}
        }
    }

    Some(DownloadProgress {
        percent,
        download_speed,
        eta,
    })
}

/// Removes the destination and any sibling files sharing its stem
/// (`audio.wav.part`, `audio.webm`, ...). Leaking partial downloads is a
/// defect, so this runs on every failure path.
fn cleanup_partials(dest: &Path) {
    let Some(parent) = dest.parent() else { return };
    let Some(stem) = dest.file_stem().and_then(|s| s.to_str()) else {
        return;
    };

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    let mut removed: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(stem) {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed.push(entry.path());
            }
        }
    }
    if !removed.is_empty() {
        warn!("Removed {} partial download artifact(s)", removed.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_progress_line() {
        let progress =
            parse_progress_line("[download]  42.1% of 4.50MiB at 1.23MiB/s ETA 00:12").unwrap();
        assert_eq!(progress.percent, 42.1);
        assert_eq!(progress.download_speed.as_deref(), Some("1.23MiB/s"));
        assert_eq!(progress.eta.as_deref(), Some("00:12"));
    }

    #[test]
    fn test_parse_progress_line_unknown_fields() {
        let progress =
            parse_progress_line("[download]   5.0% of ~10.00MiB at Unknown B/s ETA Unknown")
                .unwrap();
        assert_eq!(progress.percent, 5.0);
        assert!(progress.download_speed.is_none());
        assert!(progress.eta.is_none());
    }

    #[test]
    fn test_parse_non_progress_lines() {
        assert!(parse_progress_line("[ExtractAudio] Destination: audio.wav").is_none());
        assert!(parse_progress_line("[download] Destination: audio.webm").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn test_cleanup_removes_stem_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.wav");
        fs::write(&dest, b"partial").unwrap();
        fs::write(dir.path().join("audio.wav.part"), b"x").unwrap();
        fs::write(dir.path().join("audio.webm"), b"x").unwrap();
        fs::write(dir.path().join("other.txt"), b"keep").unwrap();

        cleanup_partials(&dest);

        assert!(!dest.exists());
        assert!(!dir.path().join("audio.wav.part").exists());
        assert!(!dir.path().join("audio.webm").exists());
        assert!(dir.path().join("other.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_download_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.wav");
        fs::write(dir.path().join("audio.wav.part"), b"half").unwrap();

        let result = run_download("false", "https://youtu.be/abc123", &dest, |_| {}).await;
        assert!(result.is_err());
        assert!(!dest.exists());
        assert!(!dir.path().join("audio.wav.part").exists());
    }

    #[tokio::test]
    async fn test_successful_exit_without_output_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("audio.wav");

        let result = run_download("true", "https://youtu.be/abc123", &dest, |_| {}).await;
        let err = result.unwrap_err().to_string();
        assert!(err.contains("no audio"), "unexpected error: {}", err);
    }
}
