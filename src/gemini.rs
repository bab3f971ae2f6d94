use anyhow::{Context, Result};
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::video::VideoSource;

const BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// A file tracked by the Gemini File API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiFile {
    pub name: String,
    pub uri: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: GeminiFile,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the hosted multimodal search path: upload a video, wait for it
/// to become active, then ask the model for timestamps matching a query.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Points the client at a different API endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Reads the API key from the `GEMINI_API_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key =
            std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY environment variable not set")?;
        Ok(Self::new(api_key, model))
    }

    /// Uploads a video through the resumable upload protocol and returns the
    /// file handle, typically still in the `PROCESSING` state.
    pub async fn upload_video(&self, path: impl AsRef<Path>) -> Result<GeminiFile> {
        let path = path.as_ref();
        info!("Uploading video to Gemini API...");

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read video file: {}", path.display()))?;
        let display_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("video.mp4")
            .to_string();

        let start = self
            .http
            .post(format!(
                "{}/upload/v1beta/files?key={}",
                self.base_url, self.api_key
            ))
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len())
            .header("X-Goog-Upload-Header-Content-Type", "video/mp4")
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .context("failed to start Gemini upload")?
            .error_for_status()
            .context("Gemini upload start was rejected")?;

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .context("no upload URL in Gemini response")?
            .to_string();

        let response: UploadResponse = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", 0)
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .context("failed to upload video bytes to Gemini")?
            .error_for_status()
            .context("Gemini upload was rejected")?
            .json()
            .await
            .context("failed to parse Gemini upload response")?;

        info!(
            "Uploaded file '{}' as: {}",
            response.file.display_name.as_deref().unwrap_or(&display_name),
            response.file.uri
        );
        Ok(response.file)
    }

    /// Polls the file state at a fixed interval until it leaves
    /// `PROCESSING`. Gives up when the deadline expires so a stuck upload
    /// cannot hang the process.
    pub async fn wait_until_active(
        &self,
        file: GeminiFile,
        poll_interval: Duration,
        deadline: Duration,
    ) -> Result<GeminiFile> {
        info!("Waiting for file processing...");
        let started = Instant::now();

        // The upload response may carry a stale or missing state; always
        // re-fetch before the first check.
        let mut file = self.get_file(&file.name).await?;

        while file.state == "PROCESSING" {
            if started.elapsed() >= deadline {
                anyhow::bail!(
                    "file {} still processing after {:.0}s, giving up",
                    file.name,
                    deadline.as_secs_f64()
                );
            }
            tokio::time::sleep(poll_interval).await;
            file = self.get_file(&file.name).await?;
        }

        if file.state != "ACTIVE" {
            anyhow::bail!("file {} failed to process (state: {})", file.name, file.state);
        }
        info!("File {} is ready", file.name);
        Ok(file)
    }

    async fn get_file(&self, name: &str) -> Result<GeminiFile> {
        self.http
            .get(format!(
                "{}/v1beta/{}?key={}",
                self.base_url, name, self.api_key
            ))
            .send()
            .await
            .context("failed to query Gemini file state")?
            .error_for_status()
            .context("Gemini file state query was rejected")?
            .json()
            .await
            .context("failed to parse Gemini file state")
    }

    /// Asks the model for timestamps where `query` is visible in the
    /// uploaded video and extracts `H:MM:SS`-shaped substrings from the
    /// free-text reply. Best effort by nature: the result depends on the
    /// model's response format.
    pub async fn find_timestamps(&self, file: &GeminiFile, query: &str) -> Result<Vec<String>> {
        let prompt = format!(
            "This is the video. Give me the timestamps of all frames where you see '{}' in the video.",
            query
        );

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": prompt },
                    { "file_data": {
                        "mime_type": file.mime_type.as_deref().unwrap_or("video/mp4"),
                        "file_uri": file.uri,
                    }},
                ],
            }],
            "generationConfig": {
                "temperature": 0,
                "topP": 0.95,
                "topK": 64,
                "maxOutputTokens": 8192,
                "responseMimeType": "text/plain",
            },
        });

        let response: GenerateContentResponse = self
            .http
            .post(format!(
                "{}/v1beta/models/{}:generateContent?key={}",
                self.base_url, self.model, self.api_key
            ))
            .json(&body)
            .send()
            .await
            .context("failed to send Gemini query")?
            .error_for_status()
            .context("Gemini query was rejected")?
            .json()
            .await
            .context("failed to parse Gemini response")?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        info!("Received response to check: {}", text);

        let timestamps = extract_timestamps(&text);
        info!("Found timestamps: {:?}", timestamps);
        Ok(timestamps)
    }
}

/// Pulls `H:MM:SS` / `HH:MM:SS` substrings out of free text, in order of
/// appearance. No validation against video duration or ordering.
pub fn extract_timestamps(text: &str) -> Vec<String> {
    let pattern = Regex::new(r"\d{1,2}:\d{2}:\d{2}").expect("timestamp pattern is valid");
    pattern
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Converts an `H:MM:SS` timestamp to seconds.
pub fn timestamp_to_seconds(timestamp: &str) -> Result<f64> {
    let mut parts = timestamp.split(':');
    let (Some(h), Some(m), Some(s), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        anyhow::bail!("invalid timestamp: {}", timestamp);
    };

    let hours: u32 = h.parse().with_context(|| format!("invalid timestamp: {}", timestamp))?;
    let minutes: u32 = m.parse().with_context(|| format!("invalid timestamp: {}", timestamp))?;
    let seconds: u32 = s.parse().with_context(|| format!("invalid timestamp: {}", timestamp))?;

    Ok((hours * 3600 + minutes * 60 + seconds) as f64)
}

/// Extracts one frame per timestamp into `frame_<idx>.jpg` files. A failed
/// extraction is logged and skipped; the rest of the batch proceeds.
pub fn extract_frames(
    video: &VideoSource,
    timestamps: &[String],
    frame_folder: impl AsRef<Path>,
) -> Result<Vec<PathBuf>> {
    let frame_folder = frame_folder.as_ref();
    std::fs::create_dir_all(frame_folder)
        .with_context(|| format!("failed to create frame folder: {}", frame_folder.display()))?;

    let mut extracted = Vec::new();
    for (idx, timestamp) in timestamps.iter().enumerate() {
        let seconds = match timestamp_to_seconds(timestamp) {
            Ok(s) => s,
            Err(e) => {
                warn!("Skipping timestamp {}: {}", timestamp, e);
                continue;
            }
        };

        let output_path = frame_folder.join(format!("frame_{:03}.jpg", idx));
        match video
            .extract_frame_at(seconds)
            .and_then(|frame| frame.save(&output_path).context("failed to save frame"))
        {
            Ok(()) => {
                info!("Extracted frame at {} -> {}", timestamp, output_path.display());
                extracted.push(output_path);
            }
            Err(e) => warn!("Error extracting frame at {}: {}", timestamp, e),
        }
    }

    Ok(extracted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves every request with a file object in the given state.
    async fn spawn_file_server(state: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    let body = format!(
                        r#"{{"name":"files/abc","uri":"https://example.com/files/abc","state":"{}"}}"#,
                        state
                    );
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{}", addr)
    }

    /// An upload response as it may come back from the File API: no state
    /// field at all.
    fn uploaded_file() -> GeminiFile {
        GeminiFile {
            name: "files/abc".to_string(),
            uri: "https://example.com/files/abc".to_string(),
            state: String::new(),
            mime_type: None,
            display_name: None,
        }
    }

    #[tokio::test]
    async fn test_wait_until_active_refreshes_missing_upload_state() {
        let base_url = spawn_file_server("ACTIVE").await;
        let client = GeminiClient::new("test-key", "test-model").with_base_url(base_url);

        let file = client
            .wait_until_active(
                uploaded_file(),
                Duration::from_millis(5),
                Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert_eq!(file.state, "ACTIVE");
    }

    #[tokio::test]
    async fn test_wait_until_active_gives_up_at_deadline() {
        let base_url = spawn_file_server("PROCESSING").await;
        let client = GeminiClient::new("test-key", "test-model").with_base_url(base_url);

        let err = client
            .wait_until_active(
                uploaded_file(),
                Duration::from_millis(5),
                Duration::from_millis(40),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still processing"), "{}", err);
    }

    #[tokio::test]
    async fn test_wait_until_active_rejects_failed_file() {
        let base_url = spawn_file_server("FAILED").await;
        let client = GeminiClient::new("test-key", "test-model").with_base_url(base_url);

        let err = client
            .wait_until_active(
                uploaded_file(),
                Duration::from_millis(5),
                Duration::from_millis(500),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to process"), "{}", err);
    }

    #[test]
    fn test_extract_timestamps_in_order_of_appearance() {
        let text = "I can see it at 00:01:23 and again near 1:02:03. Around \
                    minute two (2:15) nothing matches, but 12:34:56 does.";
        assert_eq!(
            extract_timestamps(text),
            vec!["00:01:23", "1:02:03", "12:34:56"]
        );
    }

    #[test]
    fn test_extract_timestamps_ignores_non_matching_text() {
        assert!(extract_timestamps("no timestamps here, just 42 and 7:5").is_empty());
        assert!(extract_timestamps("").is_empty());
    }

    #[test]
    fn test_timestamp_to_seconds() {
        assert_eq!(timestamp_to_seconds("00:01:23").unwrap(), 83.0);
        assert_eq!(timestamp_to_seconds("1:02:03").unwrap(), 3723.0);
        assert!(timestamp_to_seconds("12:34").is_err());
        assert!(timestamp_to_seconds("a:bb:cc").is_err());
    }
}
