use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    decode_image, EnrollmentStore, FaceCandidate, MatchResult, RecognitionPipeline,
    RecognitionService,
};
use rollcall_store::SqliteStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(
    name = "rollcall",
    about = "Face detection, recognition and enrollment"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image
    Detect { image: PathBuf },
    /// Recognize every face in one or more images
    Recognize {
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Only match against these identities (repeatable)
        #[arg(long = "only")]
        only: Vec<String>,
    },
    /// Enroll an identity from one or more images
    Enroll {
        /// Identity to enroll (replaces any previous enrollment)
        #[arg(short, long)]
        id: String,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove { id: String },
    /// Show configuration and store status
    Status,
}

#[derive(Serialize)]
struct DetectReport {
    image: PathBuf,
    faces: Vec<FaceCandidate>,
}

#[derive(Serialize)]
struct RecognizeReport {
    image: PathBuf,
    faces: Vec<MatchResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Detect { image } => {
            let service = build_service(&config)?;
            let faces = service.detect_all(&read_image(&image)?)?;
            print_json(&DetectReport { image, faces })?;
        }
        Commands::Recognize { images, only } => {
            let service = Arc::new(build_service(&config)?);
            let subset: Option<Arc<[String]>> = (!only.is_empty()).then(|| only.into());

            let tasks: Vec<_> = images
                .into_iter()
                .map(|path| {
                    let service = Arc::clone(&service);
                    let subset = subset.clone();
                    tokio::task::spawn_blocking(move || -> Result<RecognizeReport> {
                        let image = read_image(&path)?;
                        let faces = service.recognize_all(&image, subset.as_deref())?;
                        Ok(RecognizeReport { image: path, faces })
                    })
                })
                .collect();

            let mut reports = Vec::with_capacity(tasks.len());
            for task in tasks {
                reports.push(task.await.context("recognition task panicked")??);
            }
            print_json(&reports)?;
        }
        Commands::Enroll { id, images } => {
            let service = build_service(&config)?;
            let bytes = images
                .iter()
                .map(|path| {
                    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
                })
                .collect::<Result<Vec<_>>>()?;
            let report = service.enroll(&id, &bytes)?;
            print_json(&report)?;
        }
        Commands::List => {
            let store = open_store(&config)?;
            print_json(&store.list()?)?;
        }
        Commands::Remove { id } => {
            let store = open_store(&config)?;
            let removed = store.remove(&id)?;
            print_json(&serde_json::json!({ "identity": id, "removed": removed }))?;
        }
        Commands::Status => {
            let detector = config.detector_model_path();
            let embedder = config.embedder_model_path();
            let enrolled = open_store(&config)?.list()?.len();
            print_json(&serde_json::json!({
                "detector_model": { "path": &detector, "present": Path::new(&detector).exists() },
                "embedder_model": { "path": &embedder, "present": Path::new(&embedder).exists() },
                "db_path": config.db_path,
                "enrolled": enrolled,
                "similarity_threshold": config.matching.similarity_threshold,
                "confidence_threshold": config.pipeline.detector.confidence_threshold,
            }))?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening enrollment store {}", config.db_path.display()))
}

fn build_service(config: &Config) -> Result<RecognitionService> {
    let store = open_store(config)?;
    let pipeline = RecognitionPipeline::load(
        &config.detector_model_path(),
        &config.embedder_model_path(),
        &config.pipeline,
    )
    .context("loading models")?;

    tracing::info!(
        model_dir = %config.model_dir.display(),
        threshold = config.matching.similarity_threshold,
        "recognition service ready"
    );
    Ok(RecognitionService::new(pipeline, Arc::new(store), config.matching.clone()))
}

fn read_image(path: &Path) -> Result<image::RgbImage> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    decode_image(&bytes).with_context(|| format!("decoding {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
