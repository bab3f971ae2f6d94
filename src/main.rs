use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use scenefind::captions::{generate_captions, CaptionStore, OpenAiCaptioner};
use scenefind::collage::create_collage;
use scenefind::config::{ConfigLoader, ConfigOverrides};
use scenefind::gemini::{self, GeminiClient};
use scenefind::pipeline::{self, PipelineOptions};
use scenefind::scene_detector::{detect_and_save_scenes, enumerate_scene_images};
use scenefind::search::{search_advanced, search_basic, CaptionVocabulary};
use scenefind::video::VideoSource;

/// Search inside a video: download it, split it into scenes, caption the
/// scenes with a vision model, then fuzzy-search the captions.
#[derive(Parser, Debug)]
#[command(name = "scenefind")]
#[command(about = "Find moments in a video by captioning its scenes and fuzzy-searching the captions", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Interactive pipeline: download, detect, caption, search, collage
    Run {
        /// Local path of the (downloaded) video file
        #[arg(long, default_value = "downloaded_video.mp4")]
        video: PathBuf,

        /// Search query used to fetch the video when it is missing
        #[arg(long, default_value = "super mario movie trailer")]
        download_query: String,

        /// Folder for the per-scene JPEG frames
        #[arg(long, default_value = "scene_images")]
        scenes: PathBuf,

        /// Caption store path (must end in .json)
        #[arg(long, default_value = "scene_captions.json")]
        captions: PathBuf,

        /// Folder for frames extracted by the video-model branch
        #[arg(long, default_value = "gemini_frames")]
        frames: PathBuf,

        /// Output collage path
        #[arg(long, default_value = "collage.png")]
        collage: PathBuf,

        /// Optional INI config file (CLI > env > file > defaults)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Scene-change detection sensitivity (0.0-1.0)
        #[arg(long)]
        threshold: Option<f64>,

        /// Minimum scene length in seconds
        #[arg(long)]
        min_scene_len: Option<f64>,

        /// Frames per second sampled for scene detection
        #[arg(long)]
        sample_rate: Option<f64>,

        /// Fuzzy-search similarity cutoff (0-100)
        #[arg(long)]
        cutoff: Option<u32>,
    },
    /// Detect scenes in a video and save one frame per scene
    Detect {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Folder for the per-scene JPEG frames
        #[arg(short, long, default_value = "scene_images")]
        output: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        min_scene_len: Option<f64>,

        #[arg(long)]
        sample_rate: Option<f64>,
    },
    /// Caption scene images with a vision-language model
    Caption {
        /// Folder containing scene_<N>.jpg frames
        #[arg(long, default_value = "scene_images")]
        scenes: PathBuf,

        /// Caption store path (must end in .json)
        #[arg(long, default_value = "scene_captions.json")]
        captions: PathBuf,

        /// Vision model to use (defaults to the configured one)
        #[arg(long)]
        model: Option<String>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Search the caption store for a word
    Search {
        /// Word or phrase to look for
        query: String,

        #[arg(long, default_value = "scene_captions.json")]
        captions: PathBuf,

        /// Plain substring search instead of fuzzy matching
        #[arg(long)]
        basic: bool,

        /// Fuzzy-search similarity cutoff (0-100)
        #[arg(long)]
        cutoff: Option<u32>,

        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Tile images into a single grid collage
    Collage {
        /// Image files to tile, in order
        images: Vec<PathBuf>,

        #[arg(short, long, default_value = "collage.png")]
        output: PathBuf,

        #[arg(long, default_value_t = 200)]
        thumb_width: u32,

        #[arg(long, default_value_t = 200)]
        thumb_height: u32,
    },
    /// Ask the hosted video model for matching timestamps and collage the frames
    Find {
        /// Input video file
        #[arg(short, long)]
        video: PathBuf,

        /// What to look for in the video
        query: String,

        /// Folder for the extracted frames
        #[arg(long, default_value = "gemini_frames")]
        frames: PathBuf,

        #[arg(short, long, default_value = "collage.png")]
        output: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    match args.command {
        Commands::Run {
            video,
            download_query,
            scenes,
            captions,
            frames,
            collage,
            config,
            threshold,
            min_scene_len,
            sample_rate,
            cutoff,
        } => {
            let overrides = ConfigOverrides {
                threshold,
                min_scene_len,
                sample_rate,
                cutoff,
            };
            let config = ConfigLoader::load(config.as_deref(), &overrides)
                .context("failed to load configuration")?;
            let opts = PipelineOptions {
                video_file: video,
                download_query,
                scenes_dir: scenes,
                captions_file: captions,
                frames_dir: frames,
                collage_file: collage,
            };
            pipeline::run_interactive(&config, &opts).await?;
        }
        Commands::Detect {
            input,
            output,
            config,
            threshold,
            min_scene_len,
            sample_rate,
        } => {
            let overrides = ConfigOverrides {
                threshold,
                min_scene_len,
                sample_rate,
                cutoff: None,
            };
            let config = ConfigLoader::load(config.as_deref(), &overrides)
                .context("failed to load configuration")?;

            let video = VideoSource::new(&input)?;
            let scenes = detect_and_save_scenes(
                &video,
                &output,
                config.threshold,
                config.min_scene_len,
                config.sample_rate,
            )?;
            for (i, scene) in scenes.iter().enumerate() {
                println!(
                    "scene {}: {:.2}s - {:.2}s",
                    i + 1,
                    scene.start,
                    scene.end
                );
            }
            println!("Scenes saved: {}", scenes.len());
        }
        Commands::Caption {
            scenes,
            captions,
            model,
            config,
        } => {
            let config = ConfigLoader::load(config.as_deref(), &ConfigOverrides::default())
                .context("failed to load configuration")?;

            let scene_images = enumerate_scene_images(&scenes)?;
            if scene_images.is_empty() {
                anyhow::bail!("no scene images found in {}", scenes.display());
            }

            let captioner = OpenAiCaptioner::new(model.unwrap_or(config.caption_model));
            let store = generate_captions(&scene_images, &captioner, &captions).await?;
            println!("Captions generated and saved to {}", captions.display());
            println!("Total captions: {}", store.len());
        }
        Commands::Search {
            query,
            captions,
            basic,
            cutoff,
            config,
        } => {
            let config = ConfigLoader::load(config.as_deref(), &ConfigOverrides::default())
                .context("failed to load configuration")?;
            let store = CaptionStore::load(&captions)?;

            let matches = if basic {
                search_basic(&store, &query)
            } else {
                search_advanced(&store, &query, cutoff.unwrap_or(config.cutoff))
            };

            if matches.is_empty() {
                println!("No scenes found matching '{}'.", query);
                if !basic {
                    let suggestions = CaptionVocabulary::from_store(&store).suggest(&query, 5);
                    if !suggestions.is_empty() {
                        println!("Did you mean: {}?", suggestions.join(", "));
                    }
                }
            } else {
                println!("Scenes matching '{}': {:?}", query, matches);
                for scene in &matches {
                    if let Some(caption) = store.get(*scene) {
                        println!("  scene {}: {}", scene, caption);
                    }
                }
            }
        }
        Commands::Collage {
            images,
            output,
            thumb_width,
            thumb_height,
        } => {
            match create_collage(&images, &output, (thumb_width, thumb_height))? {
                Some(path) => println!("Collage created and saved to {}", path.display()),
                None => println!("No collage was created."),
            }
        }
        Commands::Find {
            video,
            query,
            frames,
            output,
            config,
        } => {
            let config = ConfigLoader::load(config.as_deref(), &ConfigOverrides::default())
                .context("failed to load configuration")?;

            let client = GeminiClient::from_env(&config.gemini_model)?;
            let file = client.upload_video(&video).await?;
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

            let source = VideoSource::new(&video)?;
            let extracted = gemini::extract_frames(&source, &timestamps, &frames)?;
            if extracted.is_empty() {
                println!("No frames extracted for query '{}'.", query);
                return Ok(());
            }

            match create_collage(&extracted, &output, config.thumbnail_size)? {
                Some(path) => println!("Collage created and saved to {}", path.display()),
                None => println!("No collage was created."),
            }
        }
    }

    Ok(())
}
