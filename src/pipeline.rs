use anyhow::{Context, Result};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

use crate::captions::{generate_captions, OpenAiCaptioner};
use crate::collage::create_collage;
use crate::config::SearchConfig;
use crate::downloader::download_video;
use crate::gemini::{self, GeminiClient};
use crate::scene_detector::{detect_and_save_scenes, enumerate_scene_images};
use crate::search::{search_advanced, CaptionVocabulary};
use crate::video::VideoSource;

/// File and folder layout for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub video_file: PathBuf,
    /// Search query used to fetch the video when it is not on disk yet.
    pub download_query: String,
    pub scenes_dir: PathBuf,
    pub captions_file: PathBuf,
    pub frames_dir: PathBuf,
    pub collage_file: PathBuf,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            video_file: PathBuf::from("downloaded_video.mp4"),
            download_query: "super mario movie trailer".to_string(),
            scenes_dir: PathBuf::from("scene_images"),
            captions_file: PathBuf::from("scene_captions.json"),
            frames_dir: PathBuf::from("gemini_frames"),
            collage_file: PathBuf::from("collage.png"),
        }
    }
}

/// Interactive entry point: prompts for a search mode, makes sure the video
/// is on disk, then runs the chosen branch. Everything is sequential and
/// blocking on purpose.
pub async fn run_interactive(config: &SearchConfig, opts: &PipelineOptions) -> Result<()> {
    println!("Choose a search mode:");
    println!("1. Search using image model");
    println!("2. Search using video model (Gemini)");
    let choice = prompt("Enter 1 or 2: ")?;

    if choice != "1" && choice != "2" {
        println!("Invalid choice. Exiting...");
        return Ok(());
    }

    download_video(&opts.download_query, &opts.video_file).await?;

    if choice == "1" {
        run_caption_mode(config, opts).await
    } else {
        run_video_mode(config, opts).await
    }
}

/// Branch 1: local captioning. Detect scenes once, caption the frames once,
/// then fuzzy-search the captions and collage the matches.
pub async fn run_caption_mode(config: &SearchConfig, opts: &PipelineOptions) -> Result<()> {
    println!("\n--- Using image model ---");
    let total_start = Instant::now();

    if dir_is_empty(&opts.scenes_dir) {
        let video = VideoSource::new(&opts.video_file)?;
        let detect_start = Instant::now();
        let scenes = detect_and_save_scenes(
            &video,
            &opts.scenes_dir,
            config.threshold,
            config.min_scene_len,
            config.sample_rate,
        )?;
        info!(
            "🎬 Detected {} scenes in {:.2}s",
            scenes.len(),
            detect_start.elapsed().as_secs_f64()
        );
    } else {
        info!(
            "Scenes already detected and saved in {}",
            opts.scenes_dir.display()
        );
    }

    let scene_images = enumerate_scene_images(&opts.scenes_dir)?;
    if scene_images.is_empty() {
        anyhow::bail!("no scene images found in {}", opts.scenes_dir.display());
    }

    let captioner = OpenAiCaptioner::new(&config.caption_model);
    let store = generate_captions(&scene_images, &captioner, &opts.captions_file).await?;

    let query = prompt("Search the video using a word: ")?;
    if query.is_empty() {
        println!("No search word provided. Exiting.");
        return Ok(());
    }

    let matches = search_advanced(&store, &query, config.cutoff);
    if matches.is_empty() {
        println!(
            "No scenes found matching '{}' with the given threshold ({}).",
            query, config.cutoff
        );
        let suggestions = CaptionVocabulary::from_store(&store).suggest(&query, 5);
        if !suggestions.is_empty() {
            println!("Did you mean: {}?", suggestions.join(", "));
        }
        return Ok(());
    }
    println!("Found scenes: {:?}", matches);

    let image_paths: Vec<PathBuf> = matches
        .iter()
        .map(|scene| opts.scenes_dir.join(format!("scene_{}.jpg", scene)))
        .collect();
    if let Some(collage) = create_collage(&image_paths, &opts.collage_file, config.thumbnail_size)? {
        println!("Collage created and saved to {}", collage.display());
    }

    info!(
        "✅ Image-model search finished in {:.2}s",
        total_start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Branch 2: hosted multimodal search. Upload the video, wait for it to
/// become active, ask for matching timestamps, extract one frame each and
/// collage them.
pub async fn run_video_mode(config: &SearchConfig, opts: &PipelineOptions) -> Result<()> {
    println!("\n--- Using video model (Gemini) ---");
    let query = prompt("Using a video model. What would you like me to find in the video? ")?;
    if query.is_empty() {
        println!("No search query provided. Exiting.");
        return Ok(());
    }

    let client = GeminiClient::from_env(&config.gemini_model)?;
    let file = client.upload_video(&opts.video_file).await?;
    let file = client
        .wait_until_active(
            file,
            Duration::from_secs(config.poll_interval_secs),
            Duration::from_secs(config.poll_timeout_secs),
        )
        .await?;

    let timestamps = client.find_timestamps(&file, &query).await?;
    if timestamps.is_empty() {
        println!("No timestamps found matching query '{}'.", query);
        return Ok(());
    }

    let video = VideoSource::new(&opts.video_file)?;
    let frames = gemini::extract_frames(&video, &timestamps, &opts.frames_dir)?;
    if frames.is_empty() {
        println!("No frames extracted for query '{}'.", query);
        return Ok(());
    }

    if let Some(collage) = create_collage(&frames, &opts.collage_file, config.thumbnail_size)? {
        println!("Collage created and saved to {}", collage.display());
    }
    Ok(())
}

fn dir_is_empty(path: &Path) -> bool {
    match std::fs::read_dir(path) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => true,
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush().context("failed to flush stdout")?;

    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("failed to read input")?;
    Ok(line.trim().to_string())
}
