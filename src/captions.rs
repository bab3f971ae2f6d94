use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_openai::Client;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Mapping of scene index to generated caption, persisted as a single JSON
/// object with string keys (`{"1": "A red car..."}`). Scene indices are `u32`
/// everywhere in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptionStore {
    entries: BTreeMap<u32, String>,
}

impl CaptionStore {
    /// Loads captions from an existing JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_store_path(path)?;

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read captions file: {}", path.display()))?;
        let entries: BTreeMap<u32, String> = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse captions file: {}", path.display()))?;

        Ok(Self { entries })
    }

    /// Loads the store if the file exists, otherwise starts empty.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        validate_store_path(path)?;

        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Writes the whole store to disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string(&self.entries).context("failed to encode captions")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write captions file: {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, scene: u32) -> Option<&str> {
        self.entries.get(&scene).map(String::as_str)
    }

    pub fn contains(&self, scene: u32) -> bool {
        self.entries.contains_key(&scene)
    }

    pub fn insert(&mut self, scene: u32, caption: String) {
        self.entries.insert(scene, caption);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending scene order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

fn validate_store_path(path: &Path) -> Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        anyhow::bail!("invalid captions file path: {}", path.display());
    }
    Ok(())
}

/// Produces a text description for a single scene image.
#[allow(async_fn_in_trait)]
pub trait SceneCaptioner {
    async fn caption(&self, image_path: &Path) -> Result<String>;
}

const CAPTION_PROMPT: &str = "Describe this image in one concise sentence.";

/// Captions scene images through the OpenAI chat completions API, sending
/// each frame as a base64 JPEG data URL.
pub struct OpenAiCaptioner {
    model: String,
}

impl OpenAiCaptioner {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

impl SceneCaptioner for OpenAiCaptioner {
    async fn caption(&self, image_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("failed to read scene image: {}", image_path.display()))?;
        let data_url = format!("data:image/jpeg;base64,{}", BASE64_STANDARD.encode(bytes));

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .max_tokens(512_u32)
            .messages([ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(vec![
                        ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(CAPTION_PROMPT)
                                .build()?,
                        ),
                        ChatCompletionRequestUserMessageContentPart::ImageUrl(
                            ChatCompletionRequestMessageContentPartImageArgs::default()
                                .image_url(ImageUrlArgs::default().url(data_url).build()?)
                                .build()?,
                        ),
                    ]))
                    .build()?,
            )])
            .build()?;

        let client = Client::new();
        let response = tokio::time::timeout(
            tokio::time::Duration::from_secs(300),
            client.chat().create(request),
        )
        .await
        .context("caption request timed out")?
        .context("caption request failed")?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("no content in caption response")
    }
}

/// Captions every scene image that is not yet in the store and flushes the
/// store once at the end. Scenes already captioned are skipped, so rerunning
/// against an unchanged image set performs no model calls. An error aborts
/// the batch; captions from the same run that were not yet flushed are lost.
pub async fn generate_captions<C: SceneCaptioner>(
    scene_images: &BTreeMap<u32, PathBuf>,
    captioner: &C,
    output_file: impl AsRef<Path>,
) -> Result<CaptionStore> {
    let output_file = output_file.as_ref();
    let mut store = CaptionStore::load_or_default(output_file)?;

    let mut added = 0usize;
    for (&scene, image_path) in scene_images {
        if store.contains(scene) {
            continue;
        }
        info!("Processing scene {}...", scene);
        let caption = captioner
            .caption(image_path)
            .await
            .with_context(|| format!("failed to generate caption for scene {}", scene))?;
        store.insert(scene, caption);
        added += 1;
    }

    if added > 0 {
        store.save(output_file)?;
        info!(
            "Captions saved to {} ({} new, {} total)",
            output_file.display(),
            added,
            store.len()
        );
    } else {
        info!("All {} scenes already captioned, nothing to do", store.len());
    }

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockCaptioner {
        calls: AtomicUsize,
    }

    impl MockCaptioner {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl SceneCaptioner for MockCaptioner {
        async fn caption(&self, image_path: &Path) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("caption for {}", image_path.display()))
        }
    }

    fn temp_store_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "scenefind-captions-{}-{}.json",
            tag,
            std::process::id()
        ))
    }

    #[test]
    fn test_store_rejects_non_json_path() {
        assert!(CaptionStore::load("captions.txt").is_err());
        assert!(CaptionStore::load_or_default("captions.txt").is_err());
    }

    #[test]
    fn test_store_roundtrip_uses_string_keys() {
        let path = temp_store_path("roundtrip");
        let mut store = CaptionStore::default();
        store.insert(1, "A red car".to_string());
        store.insert(2, "A park".to_string());
        store.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"1\""));

        let loaded = CaptionStore::load(&path).unwrap();
        assert_eq!(loaded, store);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_generate_captions_is_idempotent() {
        let path = temp_store_path("idempotent");
        std::fs::remove_file(&path).ok();

        let mut scene_images = BTreeMap::new();
        scene_images.insert(1, PathBuf::from("scene_images/scene_1.jpg"));
        scene_images.insert(2, PathBuf::from("scene_images/scene_2.jpg"));
        scene_images.insert(3, PathBuf::from("scene_images/scene_3.jpg"));

        let captioner = MockCaptioner::new();
        let first = generate_captions(&scene_images, &captioner, &path)
            .await
            .unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(captioner.calls(), 3);
        let on_disk = std::fs::read_to_string(&path).unwrap();

        // Second run: nothing new to caption, zero model calls, file unchanged.
        let second = generate_captions(&scene_images, &captioner, &path)
            .await
            .unwrap();
        assert_eq!(second, first);
        assert_eq!(captioner.calls(), 3);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), on_disk);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_generate_captions_resumes_missing_scenes() {
        let path = temp_store_path("resume");
        std::fs::remove_file(&path).ok();

        let mut store = CaptionStore::default();
        store.insert(1, "already there".to_string());
        store.save(&path).unwrap();

        let mut scene_images = BTreeMap::new();
        scene_images.insert(1, PathBuf::from("scene_1.jpg"));
        scene_images.insert(2, PathBuf::from("scene_2.jpg"));

        let captioner = MockCaptioner::new();
        let merged = generate_captions(&scene_images, &captioner, &path)
            .await
            .unwrap();

        // Only the uncaptioned scene is paid for.
        assert_eq!(captioner.calls(), 1);
        assert_eq!(merged.get(1), Some("already there"));
        assert_eq!(merged.get(2), Some("caption for scene_2.jpg"));

        std::fs::remove_file(&path).ok();
    }
}
