use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Resolves a free-text search query to a downloaded local video file by
/// invoking `yt-dlp`. If the output file already exists, the download is
/// skipped.
pub async fn download_video(query: &str, output_file: impl AsRef<Path>) -> Result<PathBuf> {
    let output_file = output_file.as_ref();

    if output_file.exists() {
        info!("Video already exists: {}", output_file.display());
        return Ok(output_file.to_path_buf());
    }

    info!("Downloading video for query: {}", query);
    let status = Command::new("yt-dlp")
        .arg("--quiet")
        .arg("-f")
        .arg("best")
        .arg("-o")
        .arg(output_file)
        .arg(format!("ytsearch:{}", query))
        .status()
        .await
        .context("failed to run yt-dlp (is it installed?)")?;

    if !status.success() {
        anyhow::bail!("failed to download video: yt-dlp exited with {}", status);
    }
    if !output_file.exists() {
        anyhow::bail!(
            "failed to download video: yt-dlp produced no file at {}",
            output_file.display()
        );
    }

    info!("Video downloaded to {}", output_file.display());
    Ok(output_file.to_path_buf())
}
