use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate::{
    config, FaceService, FileBackend, JsonlEventLog, Matcher, OnnxProvider, Outcome, Photo,
    VectorStore,
};
use facegate_vision::ModelPaths;
use log::info;

#[derive(Parser)]
#[command(name = "facegate")]
#[command(version, about = "Face enrollment and verification against a local embedding store")]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Photo files contain base64 text or data URLs instead of image bytes
    #[arg(long, global = true)]
    base64: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register an identity from one or more photos
    Register {
        #[arg(short, long)]
        nim: String,
        #[arg(short = 'N', long)]
        name: String,
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Add photos to an already registered identity
    Add {
        #[arg(short, long)]
        nim: String,
        #[arg(required = true)]
        photos: Vec<PathBuf>,
    },
    /// Match a photo against every enrolled face
    Verify { photo: PathBuf },
    /// Show enrollment counts and recent verifications
    Dashboard {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let service = |read_only: bool| -> Result<FaceService> {
        let cfg = config::load_config(cli.config.as_deref())?;
        build_service(&cfg, read_only)
    };

    let outcome = match cli.command {
        Commands::Register { nim, name, photos } => {
            let photos = read_photos(&photos, cli.base64)?;
            service(false)?.register(&nim, &name, &photos)
        }
        Commands::Add { nim, photos } => {
            let photos = read_photos(&photos, cli.base64)?;
            service(false)?.add_photos(&nim, &photos)
        }
        Commands::Verify { photo } => {
            let photo = read_photo(&photo, cli.base64)?;
            service(false)?.verify(&photo)
        }
        Commands::Dashboard { limit } => {
            let dashboard = service(true)?.dashboard(limit)?;
            println!("{}", serde_json::to_string_pretty(&dashboard)?);
            return Ok(());
        }
        Commands::Config => return open_config(cli.config.clone()),
    };

    let outcome = outcome.unwrap_or_else(Outcome::from);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if outcome.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

/// The dashboard only reads counters, so it skips loading the models.
fn build_service(cfg: &config::Config, read_only: bool) -> Result<FaceService> {
    let store = VectorStore::open(FileBackend::new(&cfg.store_path))
        .with_context(|| format!("opening store {}", cfg.store_path.display()))?;
    let events = JsonlEventLog::new(&cfg.events_path);

    let provider: Arc<dyn facegate::EmbeddingProvider> = if read_only {
        Arc::new(Unloaded)
    } else {
        let paths = ModelPaths::in_dir(&cfg.model_dir);
        info!("Loading models from {}", cfg.model_dir.display());
        Arc::new(
            OnnxProvider::new(&paths, cfg.detection_score, cfg.nms_threshold)
                .context("Failed to initialize face recognition pipeline")?,
        )
    };

    Ok(FaceService::new(
        Arc::new(store),
        Arc::new(events),
        provider,
        Matcher::new(cfg.threshold).context("Invalid match threshold")?,
    ))
}

/// Stand-in provider for commands that never embed.
struct Unloaded;

impl facegate::EmbeddingProvider for Unloaded {
    fn model_name(&self) -> &str {
        OnnxProvider::MODEL_NAME
    }

    fn embed(&self, _image: &image::DynamicImage) -> Result<Vec<f32>, facegate::ProviderError> {
        Err(anyhow::anyhow!("models are not loaded for this command").into())
    }
}

fn read_photo(path: &Path, base64: bool) -> Result<Photo> {
    if base64 {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Photo::Base64(text))
    } else {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Photo::Bytes(bytes))
    }
}

fn read_photos(paths: &[PathBuf], base64: bool) -> Result<Vec<Photo>> {
    paths.iter().map(|p| read_photo(p, base64)).collect()
}

fn open_config(path: Option<PathBuf>) -> Result<()> {
    let config_path = path.unwrap_or_else(|| config::CONFIG_PATH.clone());
    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(&config_path))?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(&config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
