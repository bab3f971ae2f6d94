pub mod captions;
pub mod collage;
pub mod config;
pub mod downloader;
pub mod gemini;
pub mod pipeline;
pub mod scene_detector;
pub mod search;
pub mod video;

pub use captions::{generate_captions, CaptionStore, OpenAiCaptioner, SceneCaptioner};
pub use collage::{create_collage, grid_dimensions};
pub use config::{ConfigLoader, ConfigOverrides, SearchConfig};
pub use downloader::download_video;
pub use gemini::{extract_timestamps, GeminiClient, GeminiFile};
pub use pipeline::{run_interactive, PipelineOptions};
pub use scene_detector::{
    detect_and_save_scenes, enumerate_scene_images, Scene, SceneDetector,
};
pub use search::{search_advanced, search_basic, CaptionVocabulary};
pub use video::{VideoInfo, VideoSource};
