use std::process::Command;

fn main() {
    // git version info for the startup banner
    let git_hash = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .unwrap_or_default();
    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    // yt-dlp shells out to ffmpeg for the audio extraction step
    let ffmpeg_check = Command::new("ffmpeg").arg("-version").output();
    if ffmpeg_check.is_err() {
        println!("cargo:warning=ffmpeg not found in PATH, audio acquisition will fail");
    }

    let ytdlp_check = Command::new("yt-dlp").arg("--version").output();
    if ytdlp_check.is_err() {
        println!("cargo:warning=yt-dlp not found in PATH, audio acquisition will fail");
    }
}
